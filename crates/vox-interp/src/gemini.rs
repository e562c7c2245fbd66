use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{InterpConfig, LanguageModel};

/// Client for the Gemini `generateContent` REST call.
pub struct GeminiClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Zeroizing<String>,
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(cfg: &InterpConfig, api_key: Zeroizing<String>) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "empty API key");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .context("build HTTP client")?;
        let url = format!("{}/models/{}:generateContent", cfg.endpoint.trim_end_matches('/'), cfg.model);
        Ok(Self {
            client,
            url,
            model: cfg.model.clone(),
            api_key,
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
        })
    }

    fn body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
                "thinkingConfig": { "thinkingBudget": 0 }
            }
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&self.body(prompt))
            .send()
            .await
            .context("generateContent request")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("generateContent returned {}: {}", status, detail.chars().take(200).collect::<String>());
        }

        let parsed: GenerateResponse = resp.json().await.context("decode generateContent response")?;
        let text = reply_text(parsed).context("reply has no text")?;
        debug!("gemini: {} chars", text.len());
        Ok(text)
    }
}

fn reply_text(resp: GenerateResponse) -> Option<String> {
    let content = resp.candidates.into_iter().find_map(|c| c.content)?;
    let text: String = content.parts.into_iter().map(|p| p.text).collect();
    (!text.trim().is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_and_body() {
        let cfg = InterpConfig { endpoint: "https://example.test/v1beta/".into(), ..InterpConfig::default() };
        let client = GeminiClient::new(&cfg, Zeroizing::new("k".into())).unwrap();
        assert_eq!(client.url, "https://example.test/v1beta/models/gemini-2.5-flash:generateContent");
        let body = client.body("hi");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 300);
    }

    #[test]
    fn empty_key_is_refused() {
        assert!(GeminiClient::new(&InterpConfig::default(), Zeroizing::new("  ".into())).is_err());
    }

    #[test]
    fn text_parts_are_joined() {
        let resp: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"is_command\":"},{"text":" false}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(reply_text(resp).as_deref(), Some("{\"is_command\": false}"));
    }

    #[test]
    fn blocked_reply_has_no_text() {
        let resp: GenerateResponse = serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert_eq!(reply_text(resp), None);
        let resp: GenerateResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert_eq!(reply_text(resp), None);
    }
}
