use anyhow::Result;

use crate::InterpConfig;

pub fn check_interp(cfg: &InterpConfig) -> Result<()> {
    anyhow::ensure!(!cfg.model.trim().is_empty(), "interp.model is empty");
    anyhow::ensure!(
        cfg.endpoint.starts_with("https://") || cfg.endpoint.starts_with("http://"),
        "interp.endpoint must be an http(s) URL: {}",
        cfg.endpoint
    );
    anyhow::ensure!(
        (1_000..=60_000).contains(&cfg.request_timeout_ms),
        "interp.request_timeout_ms should be 1000..60000"
    );
    anyhow::ensure!((0.0..=2.0).contains(&cfg.temperature), "interp.temperature should be 0..2");
    anyhow::ensure!(cfg.max_output_tokens >= 64, "interp.max_output_tokens too small for a JSON reply");
    anyhow::ensure!(cfg.failure_threshold >= 1, "interp.failure_threshold must be >= 1");
    anyhow::ensure!(cfg.backoff_base_ms <= cfg.backoff_max_ms, "interp.backoff_base_ms above backoff_max_ms");
    Ok(())
}

/// Whether an API key is present; the interpreter runs in keyword mode without one.
pub fn api_key_present(cfg: &InterpConfig) -> bool {
    std::env::var(&cfg.api_key_env).map(|v| !v.trim().is_empty()).unwrap_or(false)
}
