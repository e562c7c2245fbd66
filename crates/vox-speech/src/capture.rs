use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::{SpeechConfig, SpeechError};

/// External recorder streaming raw signed 16-bit little-endian mono PCM on
/// stdout:
/// - arecord: `arecord -q -D <device> -f S16_LE -c 1 -r <rate> -t raw`
/// - sox: `sox -q -d -t raw -b 16 -e signed-integer -c 1 -r <rate> -` (device via AUDIODEV)
pub struct Recorder {
    child: Child,
    stdout: ChildStdout,
}

pub fn recorder_command(cfg: &SpeechConfig) -> Result<Command, SpeechError> {
    let rate = cfg.sample_rate.to_string();
    let mut cmd = match cfg.recorder.as_str() {
        "arecord" => {
            let mut cmd = Command::new("arecord");
            cmd.args(["-q", "-D", cfg.device.as_str(), "-f", "S16_LE", "-c", "1", "-r", rate.as_str(), "-t", "raw"]);
            cmd
        }
        "sox" => {
            let mut cmd = Command::new("sox");
            cmd.args(["-q", "-d", "-t", "raw", "-b", "16", "-e", "signed-integer", "-c", "1", "-r", rate.as_str(), "-"]);
            if cfg.device != "default" {
                cmd.env("AUDIODEV", &cfg.device);
            }
            cmd
        }
        other => return Err(SpeechError::Backend(format!("unknown speech.recorder: {}", other))),
    };
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);
    Ok(cmd)
}

impl Recorder {
    pub fn spawn(cfg: &SpeechConfig) -> Result<Self, SpeechError> {
        let mut cmd = recorder_command(cfg)?;
        debug!("capture: {}", cfg.recorder);
        let mut child = cmd
            .spawn()
            .map_err(|e| SpeechError::Backend(format!("start {}: {}", cfg.recorder, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpeechError::Backend("recorder has no stdout".into()))?;
        Ok(Self { child, stdout })
    }

    /// Reads exactly `samples` samples. End of stream means the recorder died.
    pub async fn read_frame(&mut self, samples: usize) -> Result<Vec<i16>, SpeechError> {
        let mut bytes = vec![0u8; samples * 2];
        self.stdout.read_exact(&mut bytes).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => SpeechError::Backend("recorder stopped".into()),
            _ => SpeechError::Backend(format!("read audio: {}", e)),
        })?;
        Ok(pcm_from_le(&bytes))
    }

    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("capture: kill recorder: {}", e);
        }
    }
}

pub fn pcm_from_le(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_samples() {
        assert_eq!(pcm_from_le(&[0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80]), vec![1, -1, i16::MIN]);
    }

    #[test]
    fn arecord_arguments() {
        let cmd = recorder_command(&SpeechConfig::default()).unwrap();
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "arecord");
        let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-q", "-D", "default", "-f", "S16_LE", "-c", "1", "-r", "16000", "-t", "raw"]);
    }

    #[test]
    fn unknown_recorder_is_refused() {
        let cfg = SpeechConfig { recorder: "parecord".into(), ..SpeechConfig::default() };
        assert!(matches!(recorder_command(&cfg), Err(SpeechError::Backend(_))));
    }
}
