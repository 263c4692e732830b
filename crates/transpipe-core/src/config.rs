use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Language code, ISO 639-1 with regional variants (e.g. `"zh-CN"`, `"auto"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lang(pub String);

impl Lang {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Lang {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Lang {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn default_source_lang() -> Lang {
    Lang::new("auto")
}

fn default_target_lang() -> Lang {
    Lang::new("en")
}

/// Configuration for one HTTP-backed provider client (OCR, LLM, entity
/// recognition, or web capture).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_model() -> String {
    "default".to_string()
}

const fn default_retry_count() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080/v1".to_string(),
            api_key: None,
            model: default_model(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Per-stage deadlines, matching cancellation/timeout table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_secs: u64,
    #[serde(default = "default_entity_timeout_secs")]
    pub entity_recognition_secs: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_batch_secs: u64,
    #[serde(default = "default_web_capture_timeout_secs")]
    pub web_capture_secs: u64,
}

const fn default_ocr_timeout_secs() -> u64 {
    180
}

const fn default_entity_timeout_secs() -> u64 {
    120
}

const fn default_llm_timeout_secs() -> u64 {
    60
}

const fn default_web_capture_timeout_secs() -> u64 {
    60
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            ocr_secs: default_ocr_timeout_secs(),
            entity_recognition_secs: default_entity_timeout_secs(),
            llm_batch_secs: default_llm_timeout_secs(),
            web_capture_secs: default_web_capture_timeout_secs(),
        }
    }
}

/// Image ingress limits, shared by the upload path and the PDF-ingest stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImageLimits {
    #[serde(default = "default_max_dimension_px")]
    pub max_dimension_px: u32,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_jpeg_quality_min")]
    pub jpeg_quality_min: u8,
    #[serde(default = "default_jpeg_quality_max")]
    pub jpeg_quality_max: u8,
}

const fn default_max_dimension_px() -> u32 {
    2800
}

const fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}

const fn default_jpeg_quality_min() -> u8 {
    10
}

const fn default_jpeg_quality_max() -> u8 {
    85
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_dimension_px: default_max_dimension_px(),
            max_file_bytes: default_max_file_bytes(),
            jpeg_quality_min: default_jpeg_quality_min(),
            jpeg_quality_max: default_jpeg_quality_max(),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the sled database. Defaults to `.data/transpipe/db`.
    pub db_path: Option<PathBuf>,
    /// TTL in seconds for the in-memory `list_materials` cache.
    #[serde(default = "default_list_cache_ttl_secs")]
    pub list_cache_ttl_secs: u64,
}

const fn default_list_cache_ttl_secs() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            list_cache_ttl_secs: default_list_cache_ttl_secs(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_source_lang")]
    pub source_lang: Lang,
    #[serde(default = "default_target_lang")]
    pub target_lang: Lang,

    #[serde(default)]
    pub ocr: ProviderConfig,
    #[serde(default)]
    pub llm: ProviderConfig,
    #[serde(default)]
    pub entity_recognition: ProviderConfig,
    #[serde(default)]
    pub web_capture: ProviderConfig,

    #[serde(default)]
    pub timeouts: StageTimeouts,
    #[serde(default)]
    pub image_limits: ImageLimits,
    #[serde(default)]
    pub store: StoreConfig,

    /// Number of stage tasks allowed to run concurrently across all materials.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Regions per LLM refinement batch.
    #[serde(default = "default_llm_batch_size")]
    pub llm_batch_size: usize,
}

const fn default_worker_pool_size() -> usize {
    8
}

const fn default_llm_batch_size() -> usize {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            ocr: ProviderConfig::default(),
            llm: ProviderConfig::default(),
            entity_recognition: ProviderConfig::default(),
            web_capture: ProviderConfig::default(),
            timeouts: StageTimeouts::default(),
            image_limits: ImageLimits::default(),
            store: StoreConfig::default(),
            worker_pool_size: default_worker_pool_size(),
            llm_batch_size: default_llm_batch_size(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::error::Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::error::Error::ConfigLoad(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| crate::error::Error::ConfigLoad(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (`~/.config/transpipe/config.toml`, then
    /// `./config.toml`), falling back to defaults if neither is present.
    #[must_use]
    pub fn load() -> Self {
        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join("transpipe").join("config.toml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => {
                        tracing::debug!("loaded config from {}", user_config.display());
                        return config;
                    }
                    Err(e) => tracing::warn!("failed to load {}: {}", user_config.display(), e),
                }
            }
        }

        let local_config = std::path::PathBuf::from("config.toml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => {
                    tracing::debug!("loaded config from ./config.toml");
                    return config;
                }
                Err(e) => tracing::warn!("failed to load ./config.toml: {}", e),
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Resolve the sled database directory, applying the XDG-style default.
    #[must_use]
    pub fn resolve_db_path(&self) -> PathBuf {
        self.store.db_path.clone().unwrap_or_else(|| {
            crate::util::data_dir()
                .unwrap_or_else(|| PathBuf::from(".data"))
                .join("transpipe")
                .join("db")
        })
    }
}
