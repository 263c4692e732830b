//! Transpipe operator CLI — drives the material processing pipeline
//! directly against the local `Store`/`BlobStore` rather than through HTTP.
//! Useful for operators seeding a client, kicking off translation for a
//! batch, or pulling an export archive without standing up `transpipe-web`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use transpipe_core::model::MaterialKind;
use transpipe_core::providers::Providers;
use transpipe_core::store::SledStore;
use transpipe_core::{AppConfig, EventBus, FsBlobStore, Orchestrator, SharedStore};

#[derive(Parser, Debug)]
#[command(name = "transpipe")]
#[command(author, version, about = "Material processing pipeline operator CLI", long_about = None)]
struct Args {
    /// Config file path. Falls back to `AppConfig::load`'s XDG/local defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for uploaded/rasterized/exported blob files.
    #[arg(long, env = "TRANSPIPE_BLOB_DIR", default_value = "./data/blobs")]
    blob_dir: PathBuf,

    /// Verbose output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new client (case).
    CreateClient { name: String },
    /// List clients.
    ListClients,
    /// Upload one or more files as materials for a client.
    Upload {
        client_id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List materials for a client.
    ListMaterials { client_id: String },
    /// Start translation for every material awaiting it (or a given id).
    Translate {
        client_id: String,
        #[arg(long)]
        material_id: Option<String>,
    },
    /// Export a client's confirmed materials to a ZIP archive.
    Export {
        client_id: String,
        #[arg(short, long, default_value = "export.zip")]
        output: PathBuf,
    },
}

fn now_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    FmtSubscriber::builder().with_max_level(now_level(args.verbose)).with_target(false).init();

    let config = args.config.as_ref().map_or_else(AppConfig::load, |path| {
        AppConfig::from_file(path).unwrap_or_else(|e| {
            tracing::warn!("failed to load config from {}: {e}, falling back to defaults", path.display());
            AppConfig::default()
        })
    });

    let list_cache_ttl = Duration::from_secs(config.store.list_cache_ttl_secs);
    let store: SharedStore =
        Arc::new(SledStore::open(config.resolve_db_path(), list_cache_ttl).context("failed to open sled store")?);
    let blobs = Arc::new(FsBlobStore::new(&args.blob_dir).context("failed to initialize blob store")?);
    let events = EventBus::new();
    let providers = Providers::from_config(&config);
    let orchestrator = Orchestrator::new(store.clone(), events, providers, blobs.clone(), config);

    match args.command {
        Command::CreateClient { name } => {
            let now = now_string();
            let client = transpipe_core::model::Client {
                id: uuid::Uuid::new_v4().to_string(),
                name,
                archived: false,
                created_at: now.clone(),
                updated_at: now,
            };
            let created = store.insert_client(client)?;
            println!("created client {} ({})", created.id, created.name);
        }
        Command::ListClients => {
            for client in store.list_clients()? {
                println!("{}\t{}\t{}", client.id, client.name, if client.archived { "archived" } else { "active" });
            }
        }
        Command::Upload { client_id, files } => {
            let pb = ProgressBar::new(files.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .context("invalid progress bar template")?
                    .progress_chars("#>-"),
            );
            for file in &files {
                pb.set_message(file.display().to_string());
                let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
                let kind = if file.extension().and_then(|e| e.to_str()) == Some("pdf") { MaterialKind::Pdf } else { MaterialKind::Image };
                let filename = file.file_name().and_then(|n| n.to_str()).map(str::to_string);
                let created = orchestrator.ingest_upload(&client_id, kind, filename, bytes).await?;
                info!("uploaded {} ({} material(s) created)", file.display(), created.len());
                pb.inc(1);
            }
            pb.finish_with_message("upload complete");
        }
        Command::ListMaterials { client_id } => {
            for material in store.list_materials(&client_id)? {
                println!("{}\t{:?}\t{}", material.id, material.kind, material.status);
            }
        }
        Command::Translate { client_id, material_id } => {
            let targets = match material_id {
                Some(id) => vec![id],
                None => store
                    .list_materials(&client_id)?
                    .into_iter()
                    .filter(|m| {
                        matches!(
                            m.processing_step,
                            transpipe_core::ProcessingStep::Uploaded | transpipe_core::ProcessingStep::SplitCompleted
                        )
                    })
                    .map(|m| m.id)
                    .collect(),
            };
            info!("queuing translation for {} material(s)", targets.len());
            for id in targets {
                orchestrator.start_translation(&id).await?;
            }
            println!("translation queued; stages run in the background");
        }
        Command::Export { client_id, output } => {
            let (name, bytes) = transpipe_core::export_client(store.as_ref(), blobs.as_ref(), &client_id)?;
            std::fs::write(&output, bytes).with_context(|| format!("failed to write {}", output.display()))?;
            println!("exported {name} to {}", output.display());
        }
    }

    Ok(())
}

fn now_string() -> String {
    let since_epoch = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    since_epoch.as_secs().to_string()
}
