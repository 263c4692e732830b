//! Transpipe web server — the JSON HTTP surface over the material
//! processing pipeline. Bootstrap: `clap` args with `env` fallbacks, an
//! `EnvFilter`-driven `tracing_subscriber`, then an `axum::Router` wrapped
//! in a middleware stack (response headers, compression, body limit,
//! trace, CORS).

mod dto;
mod helpers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transpipe_core::store::SledStore;
use transpipe_core::{AppConfig, FsBlobStore};

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "transpipe-web")]
#[command(author, version, about = "Material processing pipeline web server", long_about = None)]
struct Args {
    /// Host to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to.
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Path to a TOML config file. Falls back to the XDG/local defaults
    /// `AppConfig::load` already resolves when omitted.
    #[arg(long, env = "TRANSPIPE_CONFIG")]
    config: Option<String>,

    /// Directory for uploaded/rasterized/exported blob files.
    #[arg(long, env = "TRANSPIPE_BLOB_DIR", default_value = "./data/blobs")]
    blob_dir: String,

    /// Verbose output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    let config = args.config.map_or_else(AppConfig::load, |path| {
        AppConfig::from_file(&path).unwrap_or_else(|e| {
            tracing::warn!("failed to load config from {path}: {e}, falling back to defaults");
            AppConfig::default()
        })
    });

    let list_cache_ttl = std::time::Duration::from_secs(config.store.list_cache_ttl_secs);
    let store: transpipe_core::SharedStore =
        Arc::new(SledStore::open(config.resolve_db_path(), list_cache_ttl).context("failed to open sled store")?);
    let blobs: Arc<dyn transpipe_core::BlobStore> =
        Arc::new(FsBlobStore::new(&args.blob_dir).context("failed to initialize blob store")?);
    let state = Arc::new(AppState::new(store, blobs, config));

    let app = Router::new()
        .route("/healthz", get(routes::events::healthz))
        .route("/clients", post(routes::clients::create).get(routes::clients::list))
        .route("/clients/{client_id}", get(routes::clients::get).delete(routes::clients::delete))
        .route("/clients/{client_id}/export", get(routes::clients::export))
        .route("/clients/{client_id}/events", get(routes::events::client_events))
        .route("/clients/{client_id}/materials/upload", post(routes::materials::upload))
        .route("/clients/{client_id}/materials/urls", post(routes::materials::add_urls))
        .route("/clients/{client_id}/materials", get(routes::materials::list))
        .route("/clients/{client_id}/materials/translate", post(routes::materials::translate_all))
        .route("/materials/{id}", get(routes::materials::get).delete(routes::materials::delete))
        .route("/materials/{id}/events", get(routes::events::material_events))
        .route("/materials/{id}/entity-recognition/fast", post(routes::pipeline::entity_recognition_fast))
        .route("/materials/{id}/entity-recognition/deep", post(routes::pipeline::entity_recognition_deep))
        .route("/materials/{id}/confirm-entities", post(routes::pipeline::confirm_entities))
        .route("/materials/{id}/llm-translate", post(routes::pipeline::llm_translate))
        .route("/materials/{id}/retranslate", post(routes::pipeline::retranslate))
        .route("/materials/{id}/rotate", post(routes::pipeline::rotate))
        .route("/materials/{id}/confirm", post(routes::pipeline::confirm))
        .route("/materials/{id}/unconfirm", post(routes::pipeline::unconfirm))
        .route("/materials/{id}/save-regions", post(routes::pipeline::save_regions))
        .route("/materials/{id}/save-final-image", post(routes::pipeline::save_final_image))
        .layer(SetResponseHeaderLayer::if_not_present(header::CACHE_CONTROL, HeaderValue::from_static("no-store, max-age=0")))
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(300 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("starting transpipe-web at http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
