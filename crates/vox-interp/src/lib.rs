pub mod basic;
pub mod doctor;
pub mod fallback;
pub mod gemini;
pub mod prompt;
pub mod response;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vox_proto::command::{CommandRecord, Source};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpConfig {
    pub model: String,
    /// Base URL of the generateContent API.
    pub endpoint: String,
    /// Environment variable holding the API key. Without a key only the
    /// keyword fallback is used.
    pub api_key_env: String,

    pub request_timeout_ms: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,

    /// Consecutive failures before remote calls are paused.
    pub failure_threshold: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key_env: "GEMINI_API_KEY".into(),
            request_timeout_ms: 8_000,
            temperature: 0.1,
            max_output_tokens: 300,
            failure_threshold: 3,
            backoff_base_ms: 5_000,
            backoff_max_ms: 120_000,
        }
    }
}

/// Single request/response text model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct ServiceHealth {
    pub rtt_ms: Option<u32>,
    pub consecutive_failures: u32,
    /// Remote calls are skipped until this instant.
    pub paused_until: Option<Instant>,
}

impl ServiceHealth {
    pub fn is_paused(&self, now: Instant) -> bool {
        self.paused_until.is_some_and(|t| now < t)
    }
}

/// Turns utterances into command records. Uses the language model when one
/// is configured and healthy, the keyword fallback otherwise. Never fails.
pub struct Interpreter {
    model: Option<Box<dyn LanguageModel>>,
    cfg: InterpConfig,
    health: ServiceHealth,
}

impl Interpreter {
    pub fn new(model: Box<dyn LanguageModel>, cfg: InterpConfig) -> Self {
        Self { model: Some(model), cfg, health: ServiceHealth::default() }
    }

    /// No model: the basic voice grammar answers every utterance.
    pub fn basic() -> Self {
        Self { model: None, cfg: InterpConfig::default(), health: ServiceHealth::default() }
    }

    pub fn is_enhanced(&self) -> bool {
        self.model.is_some()
    }

    pub fn health(&self) -> &ServiceHealth {
        &self.health
    }

    /// Pause after the threshold is reached: base << extra failures, capped.
    pub fn backoff(&self) -> Option<Duration> {
        let over = self.health.consecutive_failures.checked_sub(self.cfg.failure_threshold)?;
        let ms = self.cfg.backoff_base_ms.saturating_mul(1u64 << over.min(6));
        Some(Duration::from_millis(ms.min(self.cfg.backoff_max_ms)))
    }

    pub async fn interpret(&mut self, utterance: &str) -> CommandRecord {
        let text = utterance.trim();
        if text.is_empty() {
            return CommandRecord::not_a_command(text, Source::Fallback);
        }

        let Some(model) = self.model.as_deref() else {
            return basic::match_text(text);
        };
        if self.health.is_paused(Instant::now()) {
            debug!("interp: {} paused after {} failures; using fallback", model.name(), self.health.consecutive_failures);
            return fallback::match_text(text);
        }

        let start = Instant::now();
        let timeout = Duration::from_millis(self.cfg.request_timeout_ms);
        let outcome = match tokio::time::timeout(timeout, model.complete(&prompt::build(text))).await {
            Ok(Ok(reply)) => response::parse_reply(&reply, text).map_err(|e| {
                debug!("interp: raw reply: {}", reply);
                anyhow::Error::new(e)
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow::anyhow!("no reply within {:?}", timeout)),
        };

        match outcome {
            Ok(record) => {
                let rtt = start.elapsed().as_millis() as u32;
                self.health.rtt_ms = Some(rtt);
                self.health.consecutive_failures = 0;
                self.health.paused_until = None;
                debug!("interp: {} replied in {}ms", model.name(), rtt);
                record
            }
            Err(e) => {
                self.health.consecutive_failures += 1;
                warn!(
                    "interp: {} failed (failures: {}): {:#}; using keyword fallback",
                    model.name(),
                    self.health.consecutive_failures,
                    e
                );
                if let Some(pause) = self.backoff() {
                    info!("interp: pausing remote calls for {:?}", pause);
                    self.health.paused_until = Some(Instant::now() + pause);
                }
                fallback::match_text(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use vox_proto::command::Action;

    struct Scripted {
        reply: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(r) => Ok(r.to_string()),
                None => anyhow::bail!("service unavailable"),
            }
        }
    }

    struct Silent;

    #[async_trait]
    impl LanguageModel for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            std::future::pending().await
        }
    }

    fn scripted(reply: Option<&'static str>) -> (Interpreter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = Scripted { reply, calls: calls.clone() };
        (Interpreter::new(Box::new(model), InterpConfig::default()), calls)
    }

    #[tokio::test]
    async fn model_reply_is_used() {
        let (mut interp, _) = scripted(Some(r#"{"is_command": true, "action": "forward", "distance": 3}"#));
        let rec = interp.interpret("move forward 3 meters").await;
        assert_eq!(rec.action, Action::Forward);
        assert_eq!(rec.distance, Some(3.0));
        assert_eq!(rec.source, Source::Model);
        assert_eq!(interp.health().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn invalid_reply_routes_to_fallback() {
        let (mut interp, _) = scripted(Some("Sorry, I can't do that."));
        let rec = interp.interpret("turn left please").await;
        assert_eq!(rec.action, Action::TurnLeft);
        assert_eq!(rec.source, Source::Fallback);
        assert_eq!(interp.health().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn transport_error_routes_to_fallback() {
        let (mut interp, _) = scripted(None);
        let rec = interp.interpret("how's the weather today?").await;
        assert!(!rec.is_command);
        assert_eq!(rec.source, Source::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out_into_fallback() {
        let mut interp = Interpreter::new(Box::new(Silent), InterpConfig::default());
        let rec = interp.interpret("land").await;
        assert_eq!(rec.action, Action::Land);
        assert_eq!(rec.source, Source::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_pause_remote_calls() {
        let (mut interp, calls) = scripted(None);
        for _ in 0..3 {
            interp.interpret("go up").await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(interp.backoff(), Some(Duration::from_secs(5)));

        // paused: answered locally
        let rec = interp.interpret("go up").await;
        assert_eq!(rec.action, Action::Up);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(6)).await;
        interp.interpret("go up").await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(interp.backoff(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn backoff_is_capped() {
        let (mut interp, _) = scripted(None);
        interp.health.consecutive_failures = 40;
        assert_eq!(interp.backoff(), Some(Duration::from_millis(120_000)));
        interp.health.consecutive_failures = 2;
        assert_eq!(interp.backoff(), None);
    }

    #[tokio::test]
    async fn basic_interpreter_never_calls_out() {
        let mut interp = Interpreter::basic();
        assert!(!interp.is_enhanced());
        let rec = interp.interpret("turn right 45").await;
        assert_eq!((rec.action, rec.angle), (Action::TurnRight, Some(45.0)));
        assert_eq!(interp.interpret("go back and land").await.action, Action::Land);
        assert!(!interp.interpret("   ").await.is_command);
    }
}
