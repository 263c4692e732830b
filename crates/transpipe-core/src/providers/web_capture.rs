use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};

use super::traits::{WebCapture, WebCaptureProvider};

/// HTTP client for the headless-browser capture service. Per a
/// successful capture is cached by `md5(url)` so re-submitting the same URL
/// does not re-render the page; the cache lives here rather than in the
/// `Store` because it is a provider-side optimization, not part of the
/// material record.
pub struct HttpWebCaptureProvider {
    client: Client,
    config: ProviderConfig,
    cache: Cache<String, WebCapture>,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    original_pdf_base64: String,
    translated_pdf_base64: String,
}

impl HttpWebCaptureProvider {
    /// # Panics
    /// Panics if the HTTP client cannot be constructed.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to create web-capture HTTP client");
        let cache = Cache::builder().max_capacity(256).build();
        Self { client, config, cache }
    }

    fn cache_key(url: &str) -> String {
        format!("{:x}", md5::compute(url.as_bytes()))
    }
}

#[async_trait]
impl WebCaptureProvider for HttpWebCaptureProvider {
    async fn capture(&self, url: &str) -> Result<WebCapture> {
        let key = Self::cache_key(url);
        if let Some(cached) = self.cache.get(&key) {
            debug!("web capture cache hit for {url}");
            return Ok(cached);
        }

        let endpoint = format!("{}/capture", self.config.api_base.trim_end_matches('/'));

        let mut last_error = None;
        for attempt in 0..self.config.retry_count {
            let mut req = self.client.post(&endpoint).json(&serde_json::json!({ "url": url }));
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {api_key}"));
            }

            match req.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: CaptureResponse = response
                        .json()
                        .await
                        .map_err(|e| Error::ProviderFatal(format!("invalid capture response: {e}")))?;
                    let capture = WebCapture {
                        original_pdf: base64_decode(&parsed.original_pdf_base64)?,
                        translated_pdf: base64_decode(&parsed.translated_pdf_base64)?,
                    };
                    self.cache.insert(key, capture.clone());
                    return Ok(capture);
                }
                Ok(response) if response.status().as_u16() == 400 => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::ProviderFatal(format!("capture rejected url: {body}")));
                }
                Ok(response) => {
                    let status = response.status();
                    last_error = Some(Error::ProviderRecoverable(format!("HTTP {status}")));
                }
                Err(e) if e.is_timeout() => last_error = Some(Error::StageTimeout("web_capture")),
                Err(e) => last_error = Some(Error::ProviderRecoverable(e.to_string())),
            }

            if attempt < self.config.retry_count - 1 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::ProviderRecoverable("web capture unavailable".to_string())))
    }
}

fn base64_decode(data: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::ProviderFatal(format!("invalid base64 in capture response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_deterministic() {
        assert_eq!(HttpWebCaptureProvider::cache_key("https://a.test"), HttpWebCaptureProvider::cache_key("https://a.test"));
        assert_ne!(HttpWebCaptureProvider::cache_key("https://a.test"), HttpWebCaptureProvider::cache_key("https://b.test"));
    }
}
