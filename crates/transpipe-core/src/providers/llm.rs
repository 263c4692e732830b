use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::model::TranslationGuidance;

use super::traits::{LlmProvider, LlmTranslatedLine};

/// OpenAI-compatible chat completion client used for LLM refinement and for
/// the standard-mode entity-name follow-up call. Prompts are built as
/// `[id] source text` lines grouped into per-type guidance sections, sent
/// to `gpt-3.5-turbo` at `temperature=0.3`, with a bounded retry loop around
/// the request.
pub struct HttpLlmProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl HttpLlmProvider {
    /// # Panics
    /// Panics if the HTTP client cannot be constructed.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let client =
            Client::builder().timeout(Duration::from_secs(60)).build().expect("failed to create LLM HTTP client");
        Self { client, config }
    }

    fn build_batch_prompt(sources: &[(String, String)], guidance: Option<&TranslationGuidance>) -> String {
        let mut prompt = String::from(
            "Refine the following translations. Output exactly one line per input, \
             each formatted as \"[id] translation\", in the same order and count as the input.\n\n",
        );

        if let Some(g) = guidance {
            prompt.push_str("Use these confirmed entity translations where applicable:\n");
            Self::push_guidance_section(&mut prompt, "Persons", &g.persons);
            Self::push_guidance_section(&mut prompt, "Locations", &g.locations);
            Self::push_guidance_section(&mut prompt, "Organizations", &g.organizations);
            Self::push_guidance_section(&mut prompt, "Terms", &g.terms);
            prompt.push('\n');
        }

        for (id, text) in sources {
            prompt.push_str(&format!("[{id}] {text}\n"));
        }
        prompt
    }

    fn push_guidance_section(prompt: &mut String, label: &str, entries: &[String]) {
        if entries.is_empty() {
            return;
        }
        prompt.push_str(label);
        prompt.push_str(":\n");
        for entry in entries {
            prompt.push_str("  ");
            prompt.push_str(entry);
            prompt.push('\n');
        }
    }

    fn parse_batch_output(output: &str) -> HashMap<String, String> {
        let mut result = HashMap::new();
        for line in output.lines() {
            let line = line.trim();
            let Some(rest) = line.strip_prefix('[') else { continue };
            let Some(close) = rest.find(']') else { continue };
            let id = rest[..close].trim().to_string();
            let translation = rest[close + 1..].trim().to_string();
            if !id.is_empty() {
                result.insert(id, translation);
            }
        }
        result
    }

    async fn chat(&self, prompt: String, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: 0.3,
            max_tokens,
        };

        let mut last_error = None;
        for attempt in 0..self.config.retry_count {
            debug!("LLM request attempt {}/{}", attempt + 1, self.config.retry_count);
            let mut req = self.client.post(&url).json(&request);
            if let Some(key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {key}"));
            }

            match req.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| Error::ProviderFatal(format!("invalid LLM response: {e}")))?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| Error::ProviderFatal("LLM returned no choices".to_string()));
                }
                Ok(response) if response.status().as_u16() == 429 => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok());
                    last_error = Some(Error::ProviderRateLimited { retry_after });
                    tokio::time::sleep(Duration::from_secs(retry_after.unwrap_or(5))).await;
                    continue;
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("LLM provider error {status}: {body}");
                    last_error = Some(Error::ProviderFatal(format!("HTTP {status}: {body}")));
                }
                Err(e) if e.is_timeout() => last_error = Some(Error::StageTimeout("llm")),
                Err(e) => last_error = Some(Error::ProviderFatal(e.to_string())),
            }

            if attempt < self.config.retry_count - 1 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or(Error::ProviderFatal("LLM failed after max retries".to_string())))
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn optimize_batch(
        &self,
        sources: &[(String, String)],
        guidance: Option<&TranslationGuidance>,
    ) -> Result<Vec<LlmTranslatedLine>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = Self::build_batch_prompt(sources, guidance);
        let output = self.chat(prompt, 4000).await?;
        let parsed = Self::parse_batch_output(&output);

        Ok(sources
            .iter()
            .filter_map(|(id, _)| {
                parsed.get(id).map(|translation| LlmTranslatedLine { id: id.clone(), translation: translation.clone() })
            })
            .collect())
    }

    async fn propose_english_names(&self, chinese_names: &[String]) -> Result<Vec<(String, String)>> {
        if chinese_names.is_empty() {
            return Ok(Vec::new());
        }

        let mut prompt = String::from(
            "For each Chinese name below, give its standard English rendering. \
             Respond with one line per name, formatted as \"[name] english\".\n\n",
        );
        for name in chinese_names {
            prompt.push_str(&format!("[{name}] \n"));
        }

        let output = self.chat(prompt, 1000).await?;
        let parsed = Self::parse_batch_output(&output);
        Ok(parsed.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_output_lines() {
        let output = "[r1] Hello\n[r2] World\n";
        let parsed = HttpLlmProvider::parse_batch_output(output);
        assert_eq!(parsed.get("r1").unwrap(), "Hello");
        assert_eq!(parsed.get("r2").unwrap(), "World");
    }

    #[test]
    fn prompt_includes_guidance_sections_verbatim() {
        let guidance = TranslationGuidance {
            organizations: vec!["腾讯 -> Tencent".to_string()],
            ..Default::default()
        };
        let prompt = HttpLlmProvider::build_batch_prompt(
            &[("r1".to_string(), "some text".to_string())],
            Some(&guidance),
        );
        assert!(prompt.contains("腾讯 -> Tencent"));
        assert!(prompt.contains("[r1] some text"));
    }
}
