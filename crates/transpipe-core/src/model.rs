//! The data model: `Material`, `Client`, and the nested structures they carry.
//!
//! Nested JSON-shaped fields (OCR result, LLM result, entity edits, regions)
//! are typed here and serialized by the store as `serde_json::Value`, per
//! ("serializing nested structures ... is the store's responsibility").

use serde::{Deserialize, Serialize};

use crate::state_machine::ProcessingStep;

/// Kind of translatable artifact a `Material` wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialKind {
    Image,
    Pdf,
    Webpage,
}

/// Which entity-recognition depth a material requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityRecognitionMode {
    Standard,
    Deep,
}

impl Default for EntityRecognitionMode {
    fn default() -> Self {
        Self::Standard
    }
}

/// Which rendered result the user picked as authoritative on confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectedResult {
    Api,
    Latex,
}

/// One OCR-identified text box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub src: String,
    pub dst: String,
    /// Polygon points, `[x0, y0, x1, y1, ...]`.
    pub points: Vec<f64>,
    pub line_count: u32,
}

/// OCR result: the parsed regions plus summary statistics, serialized to
/// `Material::translation_text_info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationTextInfo {
    pub regions: Vec<Region>,
    pub source_lang: String,
    pub target_lang: String,
    pub statistics: TranslationStatistics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationStatistics {
    pub region_count: usize,
    pub character_count: usize,
}

/// One region's LLM-refined translation, serialized to
/// `Material::llm_translation_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTranslationEntry {
    pub id: String,
    pub translation: String,
    pub original: String,
}

/// Per-type entity-to-translation guidance, keyed by entity category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationGuidance {
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub terms: Vec<String>,
}

/// User-confirmed entity edits, serialized to `Material::entity_user_edits`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityUserEdits {
    #[serde(default)]
    pub entities: serde_json::Value,
    pub translation_guidance: TranslationGuidance,
}

/// Raw provider result for one recognized entity, before user confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedEntity {
    pub chinese_name: String,
    pub english_name: Option<String>,
    pub source: Option<String>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRecognitionResult {
    pub entities: Vec<RecognizedEntity>,
    pub mode: String,
}

/// One user-edited region overlay, serialized to `Material::edited_regions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditedRegion {
    pub id: String,
    pub text: String,
    pub points: Vec<f64>,
    pub font_size: f32,
    pub color: Option<String>,
}

/// One translatable artifact belonging to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub id: String,
    pub client_id: String,
    pub kind: MaterialKind,

    pub file_path: Option<String>,
    pub url: Option<String>,
    pub original_filename: Option<String>,

    pub status: String,
    pub processing_step: ProcessingStep,

    pub translation_text_info: Option<TranslationTextInfo>,
    pub llm_translation_result: Option<Vec<LlmTranslationEntry>>,
    pub translation_error: Option<String>,

    pub entity_recognition_enabled: bool,
    pub entity_recognition_mode: EntityRecognitionMode,
    pub entity_recognition_result: Option<EntityRecognitionResult>,
    pub entity_recognition_confirmed: bool,
    pub entity_recognition_triggered: bool,
    pub entity_user_edits: Option<EntityUserEdits>,
    pub entity_recognition_error: Option<String>,

    pub edited_regions: Option<Vec<EditedRegion>>,
    pub final_image_path: Option<String>,
    pub has_edited_version: bool,
    pub selected_result: Option<SelectedResult>,

    pub pdf_session_id: Option<String>,
    pub pdf_page_number: Option<u32>,
    pub pdf_total_pages: Option<u32>,
    pub pdf_original_file: Option<String>,

    /// Blob path to the original source PDF: populated for webpage
    /// captures and for PDF ingest sessions,
    /// shared identically across all siblings of one `pdf_session_id`.
    pub original_pdf_path: Option<String>,
    pub translated_image_path: Option<String>,

    pub progress: u8,
    pub version: u64,

    pub created_at: String,
    pub updated_at: String,
}

impl Material {
    /// Recompute the denormalized `status` string from the canonical
    /// `processing_step`, keeping the invariant in ("status is
    /// always the canonical mapping of processing_step").
    pub fn sync_status(&mut self) {
        self.status = self.processing_step.display_status().to_string();
    }
}

/// A case ("client") that owns a set of materials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}
