//! Provider client traits (component A). Each is a typed, retrying wrapper
//! over one external collaborator treated as out-of-scope to implement
//! directly: a small async interface plus a concrete reqwest-backed
//! implementation with its own retry/timeout policy.

use async_trait::async_trait;

use crate::config::Lang;
use crate::error::Result;
use crate::model::{RecognizedEntity, TranslationGuidance};

/// One OCR-identified region, as returned by the OCR provider before it is
/// wrapped into a `Region` with a generated id.
#[derive(Debug, Clone)]
pub struct OcrRegion {
    pub src: String,
    pub dst: String,
    pub points: Vec<f64>,
    pub line_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct OcrResult {
    pub regions: Vec<OcrRegion>,
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Translate the text found in an image. `from`/`to` follow the
    /// configured source/target languages; `from` may be `"auto"`.
    async fn recognize(&self, image_bytes: &[u8], from: &Lang, to: &Lang) -> Result<OcrResult>;
}

/// One `[id] -> translation` pair, the unit the LLM stage works in.
#[derive(Debug, Clone)]
pub struct LlmTranslatedLine {
    pub id: String,
    pub translation: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Refine one batch of `(id, source_text)` pairs, optionally guided by
    /// confirmed entity translations. Returns only the ids the model
    /// actually answered for — callers substitute OCR `dst` for the rest.
    async fn optimize_batch(
        &self,
        sources: &[(String, String)],
        guidance: Option<&TranslationGuidance>,
    ) -> Result<Vec<LlmTranslatedLine>>;

    /// Propose English names for a batch of Chinese entity names. Best
    /// effort: the entity stage tolerates failures here silently.
    async fn propose_english_names(&self, chinese_names: &[String]) -> Result<Vec<(String, String)>>;
}

#[async_trait]
pub trait EntityRecognitionProvider: Send + Sync {
    /// Recognize entities in `text`. `deep` requests the analyze-mode
    /// response shape (pre-resolved English names, source, confidence);
    /// otherwise the fast/identify-mode shape is used. Implementations
    /// report recoverable outages via `Error::ProviderRecoverable`.
    async fn recognize(&self, text: &str, deep: bool) -> Result<Vec<RecognizedEntity>>;
}

/// Result of capturing a webpage, #[derive(Debug, Clone)]
pub struct WebCapture {
    pub original_pdf: Vec<u8>,
    pub translated_pdf: Vec<u8>,
}

#[async_trait]
pub trait WebCaptureProvider: Send + Sync {
    async fn capture(&self, url: &str) -> Result<WebCapture>;
}
