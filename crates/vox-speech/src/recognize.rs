use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{SpeechConfig, SpeechError};

/// Whisper-compatible `/v1/audio/transcriptions` client (OpenAI API,
/// whisper.cpp server, faster-whisper servers).
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    language: String,
    api_key: Option<Zeroizing<String>>,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

impl HttpRecognizer {
    pub fn new(cfg: &SpeechConfig, api_key: Option<Zeroizing<String>>) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| SpeechError::Backend(format!("build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            language: cfg.language.clone(),
            api_key,
        })
    }

    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String, SpeechError> {
        let audio = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::Backend(e.to_string()))?;
        let form = Form::new()
            .part("file", audio)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");

        let mut req = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.as_str());
        }

        let resp = req.send().await.map_err(|e| SpeechError::Backend(format!("transcription request: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SpeechError::Backend(format!("transcription service returned {}", status)));
        }
        let body: Transcription = resp
            .json()
            .await
            .map_err(|e| SpeechError::Backend(format!("decode transcription: {}", e)))?;
        debug!("recognize: {:?}", body.text);
        clean(&body.text).ok_or(SpeechError::Unintelligible)
    }
}

/// Trims a transcript; blank or bracketed-only output (e.g. "[BLANK_AUDIO]",
/// "(wind)") counts as unintelligible.
pub fn clean(text: &str) -> Option<String> {
    let t = text.trim();
    let bracketed = (t.starts_with('[') && t.ends_with(']')) || (t.starts_with('(') && t.ends_with(')'));
    if t.is_empty() || bracketed {
        None
    } else {
        Some(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_annotation_only_transcripts() {
        assert_eq!(clean("  move forward  "), Some("move forward".into()));
        assert_eq!(clean(""), None);
        assert_eq!(clean(" [BLANK_AUDIO] "), None);
        assert_eq!(clean("(wind blowing)"), None);
    }

    #[tokio::test]
    async fn unreachable_service_is_a_backend_error() {
        let cfg = SpeechConfig {
            endpoint: "http://127.0.0.1:9/v1/audio/transcriptions".into(),
            request_timeout_ms: 500,
            ..SpeechConfig::default()
        };
        let rec = HttpRecognizer::new(&cfg, None).unwrap();
        assert!(matches!(rec.transcribe(vec![0; 44]).await, Err(SpeechError::Backend(_))));
    }
}
