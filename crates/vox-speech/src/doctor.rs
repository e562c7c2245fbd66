use anyhow::Result;

use crate::SpeechConfig;

pub fn check_speech(cfg: &SpeechConfig) -> Result<()> {
    anyhow::ensure!(
        matches!(cfg.backend.as_str(), "mic" | "typed"),
        "speech.backend must be mic|typed, got {}",
        cfg.backend
    );
    if cfg.backend == "typed" {
        return Ok(());
    }
    anyhow::ensure!(
        matches!(cfg.recorder.as_str(), "arecord" | "sox"),
        "speech.recorder must be arecord|sox, got {}",
        cfg.recorder
    );
    anyhow::ensure!((8_000..=48_000).contains(&cfg.sample_rate), "speech.sample_rate should be 8000..48000");
    anyhow::ensure!(cfg.energy_margin >= 1.0, "speech.energy_margin should be >= 1.0");
    anyhow::ensure!(cfg.silence_ms >= 200 && cfg.silence_ms < cfg.phrase_limit_ms, "speech.silence_ms should be 200..phrase_limit_ms");
    anyhow::ensure!(cfg.listen_timeout_ms >= 1_000, "speech.listen_timeout_ms too short");
    anyhow::ensure!(
        cfg.endpoint.starts_with("http://") || cfg.endpoint.starts_with("https://"),
        "speech.endpoint must be an http(s) URL: {}",
        cfg.endpoint
    );
    Ok(())
}

/// Whether the configured recorder binary is on PATH.
pub fn recorder_available(cfg: &SpeechConfig) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(&cfg.recorder).is_file()))
        .unwrap_or(false)
}
