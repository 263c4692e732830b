//! End-to-end tests driving the `Orchestrator` against fake provider clients
//! and a temp-directory `SledStore`/`FsBlobStore` pair.
//! Each provider stage runs in a background `tokio::spawn`, so tests wait on
//! the `EventBus` room for the material rather than polling the store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use transpipe_core::config::Lang;
use transpipe_core::events::{Event, EventBus, Room};
use transpipe_core::model::{
    Client, MaterialKind, RecognizedEntity, TranslationGuidance,
};
use transpipe_core::providers::{
    EntityRecognitionProvider, LlmProvider, LlmTranslatedLine, OcrProvider, OcrRegion, OcrResult, Providers,
    WebCapture, WebCaptureProvider,
};
use transpipe_core::store::SledStore;
use transpipe_core::{AppConfig, BlobStore, FsBlobStore, Orchestrator, SharedStore};

struct FakeOcr;

#[async_trait]
impl OcrProvider for FakeOcr {
    async fn recognize(&self, _image_bytes: &[u8], _from: &Lang, _to: &Lang) -> transpipe_core::Result<OcrResult> {
        Ok(OcrResult {
            regions: vec![OcrRegion {
                src: "你好".to_string(),
                dst: "Hello".to_string(),
                points: vec![0.0, 0.0, 10.0, 10.0],
                line_count: 1,
            }],
        })
    }
}

struct FailingOcr;

#[async_trait]
impl OcrProvider for FailingOcr {
    async fn recognize(&self, _image_bytes: &[u8], _from: &Lang, _to: &Lang) -> transpipe_core::Result<OcrResult> {
        Err(transpipe_core::Error::ProviderFatal("fake OCR outage".to_string()))
    }
}

struct FakeLlm;

#[async_trait]
impl LlmProvider for FakeLlm {
    async fn optimize_batch(
        &self,
        sources: &[(String, String)],
        _guidance: Option<&TranslationGuidance>,
    ) -> transpipe_core::Result<Vec<LlmTranslatedLine>> {
        Ok(sources
            .iter()
            .map(|(id, text)| LlmTranslatedLine { id: id.clone(), translation: format!("refined: {text}") })
            .collect())
    }

    async fn propose_english_names(&self, chinese_names: &[String]) -> transpipe_core::Result<Vec<(String, String)>> {
        Ok(chinese_names.iter().map(|n| (n.clone(), format!("En({n})"))).collect())
    }
}

struct FakeEntityRecognition;

#[async_trait]
impl EntityRecognitionProvider for FakeEntityRecognition {
    async fn recognize(&self, _text: &str, _deep: bool) -> transpipe_core::Result<Vec<RecognizedEntity>> {
        Ok(vec![])
    }
}

struct FakeWebCapture;

#[async_trait]
impl WebCaptureProvider for FakeWebCapture {
    async fn capture(&self, _url: &str) -> transpipe_core::Result<WebCapture> {
        Ok(WebCapture { original_pdf: b"%PDF-fake-original".to_vec(), translated_pdf: b"%PDF-fake-translated".to_vec() })
    }
}

fn test_config(db_path: std::path::PathBuf) -> AppConfig {
    let mut config = AppConfig::default();
    config.store.db_path = Some(db_path);
    config
}

fn build_orchestrator(ocr: Arc<dyn OcrProvider>) -> (Orchestrator, SharedStore, EventBus, tempfile::TempDir) {
    let dir = tempdir().expect("tempdir");
    let config = test_config(dir.path().join("db"));
    let store: SharedStore =
        Arc::new(SledStore::open(dir.path().join("db"), Duration::from_secs(60)).expect("open sled store"));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path().join("blobs")).expect("open blob store"));
    let events = EventBus::new();
    let providers = Providers {
        ocr,
        llm: Arc::new(FakeLlm),
        entity_recognition: Arc::new(FakeEntityRecognition),
        web_capture: Arc::new(FakeWebCapture),
    };
    let orchestrator = Orchestrator::new(store.clone(), events.clone(), providers, blobs, config);
    (orchestrator, store, events, dir)
}

async fn wait_for_step(mut rx: tokio::sync::broadcast::Receiver<Event>, step: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await.expect("event bus closed") {
                Event::MaterialUpdated { processing_step, .. } if processing_step == step => return,
                Event::MaterialError { error, .. } => panic!("material errored while waiting for {step}: {error}"),
                _ => continue,
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for step {step}"));
}

fn sample_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img).write_to(&mut buf, image::ImageFormat::Jpeg).expect("encode jpeg");
    buf.into_inner()
}

#[tokio::test]
async fn image_upload_translates_through_ocr() {
    let (orchestrator, store, events, _dir) = build_orchestrator(Arc::new(FakeOcr));

    let client = Client {
        id: "client-1".to_string(),
        name: "Acme".to_string(),
        archived: false,
        created_at: "0".to_string(),
        updated_at: "0".to_string(),
    };
    store.insert_client(client).unwrap();

    let created = orchestrator.ingest_upload("client-1", MaterialKind::Image, Some("scan.jpg".to_string()), sample_jpeg()).await.unwrap();
    assert_eq!(created.len(), 1);
    let material_id = created[0].id.clone();
    assert_eq!(created[0].processing_step.as_str(), "uploaded");

    let rx = events.subscribe(Room::material(&material_id));
    let started = orchestrator.start_translation(&material_id).await.unwrap();
    assert_eq!(started.processing_step.as_str(), "translating");

    wait_for_step(rx, "translated").await;

    let finished = store.get_material(&material_id).unwrap();
    assert_eq!(finished.processing_step.as_str(), "translated");
    let info = finished.translation_text_info.expect("translation_text_info set");
    assert_eq!(info.regions.len(), 1);
    assert_eq!(info.regions[0].dst, "Hello");
}

#[tokio::test]
async fn ocr_failure_falls_back_to_uploaded() {
    let (orchestrator, store, events, _dir) = build_orchestrator(Arc::new(FailingOcr));

    let client = Client {
        id: "client-2".to_string(),
        name: "Beta".to_string(),
        archived: false,
        created_at: "0".to_string(),
        updated_at: "0".to_string(),
    };
    store.insert_client(client).unwrap();

    let created = orchestrator.ingest_upload("client-2", MaterialKind::Image, None, sample_jpeg()).await.unwrap();
    let material_id = created[0].id.clone();

    let rx = events.subscribe(Room::material(&material_id));
    orchestrator.start_translation(&material_id).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        let mut rx = rx;
        loop {
            if let Event::MaterialError { .. } = rx.recv().await.expect("event bus closed") {
                return;
            }
        }
    })
    .await
    .expect("expected a MaterialError event");

    let failed = store.get_material(&material_id).unwrap();
    assert_eq!(failed.processing_step.as_str(), "uploaded", "a fatal OCR error should fall back, not dead-end at Failed");
    assert!(failed.translation_error.is_some());
}

#[tokio::test]
async fn confirm_and_unconfirm_round_trip() {
    let (orchestrator, store, events, _dir) = build_orchestrator(Arc::new(FakeOcr));

    let client = Client {
        id: "client-3".to_string(),
        name: "Gamma".to_string(),
        archived: false,
        created_at: "0".to_string(),
        updated_at: "0".to_string(),
    };
    store.insert_client(client).unwrap();

    let created = orchestrator.ingest_upload("client-3", MaterialKind::Image, None, sample_jpeg()).await.unwrap();
    let material_id = created[0].id.clone();

    let rx = events.subscribe(Room::material(&material_id));
    orchestrator.start_translation(&material_id).await.unwrap();
    wait_for_step(rx, "translated").await;

    let confirmed = orchestrator.confirm(&material_id, None).unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].processing_step.as_str(), "confirmed");

    let unconfirmed = orchestrator.unconfirm(&material_id).unwrap();
    assert_eq!(unconfirmed[0].processing_step.as_str(), "translated");
}
