use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::model::RecognizedEntity;

use super::traits::EntityRecognitionProvider;

/// HTTP client for the entity-recognition service. A fast call hits
/// `/identify` and returns bare Chinese names, while `deep` hits `/analyze`
/// and returns names with source spans and confidence already resolved.
pub struct HttpEntityRecognitionProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct RecognizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    entities: Vec<AnalyzeEntity>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeEntity {
    chinese_name: String,
    english_name: Option<String>,
    source: Option<String>,
    confidence: Option<f32>,
}

impl HttpEntityRecognitionProvider {
    /// # Panics
    /// Panics if the HTTP client cannot be constructed.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to create entity-recognition HTTP client");
        Self { client, config }
    }
}

#[async_trait]
impl EntityRecognitionProvider for HttpEntityRecognitionProvider {
    async fn recognize(&self, text: &str, deep: bool) -> Result<Vec<RecognizedEntity>> {
        let endpoint = if deep { "analyze" } else { "identify" };
        let url = format!("{}/entities/{endpoint}", self.config.api_base.trim_end_matches('/'));
        let body = RecognizeRequest { text };

        let mut last_error = None;
        for attempt in 0..self.config.retry_count {
            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {key}"));
            }

            match req.send().await {
                Ok(response) if response.status().is_success() => {
                    return if deep {
                        let parsed: AnalyzeResponse = response
                            .json()
                            .await
                            .map_err(|e| Error::ProviderRecoverable(format!("invalid analyze response: {e}")))?;
                        Ok(parsed
                            .entities
                            .into_iter()
                            .map(|e| RecognizedEntity {
                                chinese_name: e.chinese_name,
                                english_name: e.english_name,
                                source: e.source,
                                confidence: e.confidence,
                            })
                            .collect())
                    } else {
                        let parsed: IdentifyResponse = response
                            .json()
                            .await
                            .map_err(|e| Error::ProviderRecoverable(format!("invalid identify response: {e}")))?;
                        Ok(parsed
                            .names
                            .into_iter()
                            .map(|chinese_name| RecognizedEntity {
                                chinese_name,
                                english_name: None,
                                source: None,
                                confidence: None,
                            })
                            .collect())
                    };
                }
                Ok(response) if response.status().as_u16() == 400 => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::ProviderFatal(format!("entity recognition rejected input: {body}")));
                }
                Ok(response) => {
                    let status = response.status();
                    warn!("entity recognition provider error {status}, treating as recoverable");
                    last_error = Some(Error::ProviderRecoverable(format!("HTTP {status}")));
                }
                Err(e) if e.is_timeout() => last_error = Some(Error::StageTimeout("entity_recognition")),
                Err(e) => last_error = Some(Error::ProviderRecoverable(e.to_string())),
            }

            if attempt < self.config.retry_count - 1 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::ProviderRecoverable("entity recognition unavailable".to_string())))
    }
}
