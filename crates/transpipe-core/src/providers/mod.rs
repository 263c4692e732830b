//! Provider clients: typed, retrying wrappers over the four external
//! collaborators the orchestrator drives (component A).

pub mod entity;
pub mod llm;
pub mod ocr;
pub mod traits;
pub mod web_capture;

pub use entity::HttpEntityRecognitionProvider;
pub use llm::HttpLlmProvider;
pub use ocr::HttpOcrProvider;
pub use traits::{
    EntityRecognitionProvider, LlmProvider, LlmTranslatedLine, OcrProvider, OcrRegion, OcrResult, WebCapture,
    WebCaptureProvider,
};
pub use web_capture::HttpWebCaptureProvider;

use std::sync::Arc;

use crate::config::AppConfig;

/// The four provider clients the orchestrator needs, bundled for
/// convenient construction/injection, built straight from `AppConfig`.
#[derive(Clone)]
pub struct Providers {
    pub ocr: Arc<dyn OcrProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub entity_recognition: Arc<dyn EntityRecognitionProvider>,
    pub web_capture: Arc<dyn WebCaptureProvider>,
}

impl Providers {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ocr: Arc::new(HttpOcrProvider::new(config.ocr.clone())),
            llm: Arc::new(HttpLlmProvider::new(config.llm.clone())),
            entity_recognition: Arc::new(HttpEntityRecognitionProvider::new(config.entity_recognition.clone())),
            web_capture: Arc::new(HttpWebCaptureProvider::new(config.web_capture.clone())),
        }
    }
}
