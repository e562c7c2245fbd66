pub mod capture;
pub mod doctor;
pub mod energy;
pub mod recognize;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::capture::Recorder;
use crate::energy::{Segment, Segmenter, SegmenterConfig};
use crate::recognize::HttpRecognizer;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// "mic" (recorder + HTTP recognizer) or "typed" (one line of stdin per
    /// utterance).
    pub backend: String,

    /// "arecord" | "sox"
    pub recorder: String,
    pub device: String,
    pub sample_rate: u32,

    /// Ambient calibration before each listen.
    pub calibrate_ms: u32,
    pub energy_margin: f32,
    pub min_threshold: f32,

    /// Give up if no speech starts within this time.
    pub listen_timeout_ms: u32,
    /// Longest phrase recorded.
    pub phrase_limit_ms: u32,
    /// Trailing silence that ends a phrase.
    pub silence_ms: u32,

    /// Whisper-compatible transcription endpoint.
    pub endpoint: String,
    pub model: String,
    pub language: String,
    /// Environment variable with a bearer token, if the service needs one.
    pub api_key_env: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            backend: "mic".into(),
            recorder: "arecord".into(),
            device: "default".into(),
            sample_rate: 16_000,
            calibrate_ms: 500,
            energy_margin: 1.5,
            min_threshold: 300.0,
            listen_timeout_ms: 10_000,
            phrase_limit_ms: 5_000,
            silence_ms: 800,
            endpoint: "http://127.0.0.1:8080/v1/audio/transcriptions".into(),
            model: "whisper-1".into(),
            language: "en".into(),
            api_key_env: None,
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("no speech detected")]
    Timeout,
    #[error("speech not understood")]
    Unintelligible,
    #[error("input closed")]
    Closed,
    #[error("speech backend: {0}")]
    Backend(String),
}

impl SpeechError {
    /// Timeout and unintelligible speech only need a re-prompt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SpeechError::Timeout | SpeechError::Unintelligible)
    }
}

/// Produces one utterance per call.
#[async_trait]
pub trait Transcriber: Send {
    async fn listen(&mut self) -> Result<String, SpeechError>;
}

const FRAME_MS: u32 = 30;

/// Microphone transcriber: a recorder process per utterance, ambient
/// calibration, energy segmentation, then an HTTP transcription call.
pub struct MicTranscriber {
    cfg: SpeechConfig,
    recognizer: HttpRecognizer,
}

impl MicTranscriber {
    pub fn new(cfg: SpeechConfig, recognizer: HttpRecognizer) -> Self {
        Self { cfg, recognizer }
    }

    async fn record_phrase(&self) -> Result<Vec<i16>, SpeechError> {
        let mut rec = Recorder::spawn(&self.cfg)?;
        let frame = (self.cfg.sample_rate * FRAME_MS / 1000) as usize;

        let calib_frames = (self.cfg.calibrate_ms / FRAME_MS).max(1);
        let mut ambient = 0.0;
        for _ in 0..calib_frames {
            ambient += energy::rms(&rec.read_frame(frame).await?);
        }
        ambient /= calib_frames as f32;
        let threshold = energy::threshold(ambient, self.cfg.energy_margin, self.cfg.min_threshold);
        debug!("speech: ambient rms {:.0}, threshold {:.0}", ambient, threshold);

        let mut seg = Segmenter::new(SegmenterConfig {
            threshold,
            frame_ms: FRAME_MS,
            listen_timeout_ms: self.cfg.listen_timeout_ms,
            phrase_limit_ms: self.cfg.phrase_limit_ms,
            silence_ms: self.cfg.silence_ms,
        });
        let outcome = loop {
            match seg.push(&rec.read_frame(frame).await?) {
                Segment::Waiting | Segment::Speaking => continue,
                done => break done,
            }
        };
        rec.stop().await;

        match outcome {
            Segment::TimedOut => Err(SpeechError::Timeout),
            _ => Ok(seg.into_samples()),
        }
    }
}

#[async_trait]
impl Transcriber for MicTranscriber {
    async fn listen(&mut self) -> Result<String, SpeechError> {
        // the recorder may stall; bound the whole capture in wall time
        let budget = Duration::from_millis(
            (self.cfg.calibrate_ms + self.cfg.listen_timeout_ms + self.cfg.phrase_limit_ms) as u64 + 2_000,
        );
        let samples = tokio::time::timeout(budget, self.record_phrase())
            .await
            .map_err(|_| SpeechError::Timeout)??;
        info!("speech: captured {:.1}s", samples.len() as f32 / self.cfg.sample_rate as f32);
        let wav = energy::encode_wav(&samples, self.cfg.sample_rate);
        self.recognizer.transcribe(wav).await
    }
}

/// Typed input standing in for speech: one line per utterance.
pub struct LineTranscriber<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin + Send> LineTranscriber<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Transcriber for LineTranscriber<R> {
    async fn listen(&mut self) -> Result<String, SpeechError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| SpeechError::Backend(format!("read input: {}", e)))?;
        if n == 0 {
            return Err(SpeechError::Closed);
        }
        let text = line.trim();
        if text.is_empty() {
            return Err(SpeechError::Unintelligible);
        }
        Ok(text.to_string())
    }
}
