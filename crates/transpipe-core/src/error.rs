use thiserror::Error;

/// Unified error type for transpipe-core.
///
/// Validation and not-found are caller mistakes, conflict/version-conflict
/// are concurrency signals the orchestrator reacts to directly, and the
/// provider/stage variants carry the recoverable-vs-fatal distinction that
/// decides whether a material falls back to its prior step or transitions
/// to `failed`.
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // Request/validation errors
    // ==========================================================================
    /// Bad input from the caller (oversized file, missing field, bad enum value).
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced material, client, or PDF session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The material already has a background stage task advancing it.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic-lock write failed because the row's version moved.
    #[error("version conflict on {entity} {id}: expected {expected}, found {actual}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    // ==========================================================================
    // Provider errors
    // ==========================================================================
    /// Upstream provider outage classified as recoverable; the pipeline
    /// should fall back to the prior step rather than fail the material.
    #[error("provider temporarily unavailable: {0}")]
    ProviderRecoverable(String),

    /// Malformed input, auth failure, or quota exhaustion reported by a provider.
    #[error("provider error: {0}")]
    ProviderFatal(String),

    /// Provider was rate limited.
    #[error("provider rate limited{}", retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    ProviderRateLimited { retry_after: Option<u64> },

    /// A stage exceeded its deadline.
    #[error("stage {0} timed out")]
    StageTimeout(&'static str),

    // ==========================================================================
    // PDF / image errors
    // ==========================================================================
    /// Failed to open or parse a PDF file.
    #[error("failed to open PDF: {0}")]
    PdfOpen(String),

    /// Invalid page number requested.
    #[error("invalid page number {page} (document has {total} pages)")]
    PdfInvalidPage { page: usize, total: usize },

    /// Failed to render a PDF page.
    #[error("failed to render page {page}: {reason}")]
    PdfRender { page: usize, reason: String },

    /// Error from the lopdf library while merging or building a PDF.
    #[error("lopdf error: {0}")]
    Lopdf(String),

    /// Image decode/encode/resize failure.
    #[error("image processing error: {0}")]
    Image(String),

    // ==========================================================================
    // Store errors
    // ==========================================================================
    /// The underlying store could not complete a read or write.
    #[error("store error: {0}")]
    Store(String),

    // ==========================================================================
    // Export errors
    // ==========================================================================
    /// Archive assembly failed.
    #[error("export error: {0}")]
    Export(String),

    // ==========================================================================
    // Configuration errors
    // ==========================================================================
    /// Failed to load configuration file.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value.
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // I/O / serialization
    // ==========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error should be reported to the client as recoverable
    /// (HTTP 503 with `{"recoverable": true}`) rather than fatal.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ProviderRecoverable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
