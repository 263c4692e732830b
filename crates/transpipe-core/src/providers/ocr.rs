use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Lang, ProviderConfig};
use crate::error::{Error, Result};

use super::traits::{OcrProvider, OcrRegion, OcrResult};

/// HTTP client for an external OCR-translation provider: one shared
/// `reqwest::Client`, a bounded
/// retry loop with exponential backoff on network/timeout errors, and
/// immediate failure on malformed-argument responses.
pub struct HttpOcrProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    image_base64: String,
    from: &'a str,
    to: &'a str,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    regions: Vec<OcrResponseRegion>,
}

#[derive(Debug, Deserialize)]
struct OcrResponseRegion {
    src: String,
    dst: String,
    #[serde(default)]
    points: Vec<f64>,
    #[serde(default = "default_line_count")]
    line_count: u32,
}

const fn default_line_count() -> u32 {
    1
}

impl HttpOcrProvider {
    /// # Panics
    /// Panics if the HTTP client cannot be constructed (TLS backend
    /// unavailable), which should only happen in extreme circumstances.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to create OCR HTTP client");
        Self { client, config }
    }
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn recognize(&self, image_bytes: &[u8], from: &Lang, to: &Lang) -> Result<OcrResult> {
        let url = format!("{}/ocr/translate", self.config.api_base.trim_end_matches('/'));
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let body = OcrRequest { image_base64, from: from.as_str(), to: to.as_str() };

        let mut last_error = None;

        for attempt in 0..self.config.retry_count {
            debug!("OCR request attempt {}/{}", attempt + 1, self.config.retry_count);

            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {key}"));
            }

            match req.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: OcrResponse = response
                        .json()
                        .await
                        .map_err(|e| Error::ProviderFatal(format!("invalid OCR response: {e}")))?;
                    return Ok(OcrResult {
                        regions: parsed
                            .regions
                            .into_iter()
                            .map(|r| OcrRegion {
                                src: r.src,
                                dst: r.dst,
                                points: r.points,
                                line_count: r.line_count,
                            })
                            .collect(),
                    });
                }
                Ok(response) if response.status().as_u16() == 400 => {
                    let body = response.text().await.unwrap_or_default();
                    // Malformed-argument errors are not retried.
                    return Err(Error::ProviderFatal(format!("OCR rejected input: {body}")));
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("OCR provider error {status}: {body}");
                    last_error = Some(Error::ProviderFatal(format!("HTTP {status}: {body}")));
                }
                Err(e) if e.is_timeout() => {
                    last_error = Some(Error::StageTimeout("ocr"));
                }
                Err(e) => {
                    last_error = Some(Error::ProviderFatal(e.to_string()));
                }
            }

            if attempt < self.config.retry_count - 1 {
                let backoff = 2u64.saturating_pow(attempt + 1);
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }

        Err(last_error.unwrap_or(Error::ProviderFatal("OCR failed after max retries".to_string())))
    }
}
