//! Energy-based phrase detection on 16-bit mono PCM.

pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Speech threshold from the ambient level measured during calibration.
pub fn threshold(ambient_rms: f32, margin: f32, floor: f32) -> f32 {
    (ambient_rms * margin).max(floor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// No speech yet.
    Waiting,
    Speaking,
    /// Phrase ended by trailing silence or the phrase limit.
    Done,
    /// No speech started within the listen timeout.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub threshold: f32,
    pub frame_ms: u32,
    pub listen_timeout_ms: u32,
    pub phrase_limit_ms: u32,
    pub silence_ms: u32,
}

/// Splits a frame stream into one phrase. Time is counted in audio
/// milliseconds, one frame at a time.
#[derive(Debug)]
pub struct Segmenter {
    cfg: SegmenterConfig,
    waited_ms: u32,
    spoken_ms: u32,
    silent_ms: u32,
    started: bool,
    samples: Vec<i16>,
}

impl Segmenter {
    pub fn new(cfg: SegmenterConfig) -> Self {
        Self { cfg, waited_ms: 0, spoken_ms: 0, silent_ms: 0, started: false, samples: Vec::new() }
    }

    pub fn push(&mut self, frame: &[i16]) -> Segment {
        let loud = rms(frame) >= self.cfg.threshold;

        if !self.started {
            if !loud {
                self.waited_ms += self.cfg.frame_ms;
                return if self.waited_ms >= self.cfg.listen_timeout_ms { Segment::TimedOut } else { Segment::Waiting };
            }
            self.started = true;
        }

        self.samples.extend_from_slice(frame);
        self.spoken_ms += self.cfg.frame_ms;
        self.silent_ms = if loud { 0 } else { self.silent_ms + self.cfg.frame_ms };

        if self.silent_ms >= self.cfg.silence_ms || self.spoken_ms >= self.cfg.phrase_limit_ms {
            Segment::Done
        } else {
            Segment::Speaking
        }
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Wraps PCM samples in a canonical 44-byte RIFF/WAVE header.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SegmenterConfig {
        SegmenterConfig { threshold: 500.0, frame_ms: 30, listen_timeout_ms: 300, phrase_limit_ms: 600, silence_ms: 90 }
    }

    const QUIET: [i16; 4] = [10, -10, 5, -5];
    const LOUD: [i16; 4] = [2000, -2000, 1800, -1800];

    #[test]
    fn rms_of_constant_signal() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[1000, -1000]) - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn threshold_has_a_floor() {
        assert_eq!(threshold(100.0, 1.5, 300.0), 300.0);
        assert_eq!(threshold(400.0, 1.5, 300.0), 600.0);
    }

    #[test]
    fn phrase_ends_after_trailing_silence() {
        let mut seg = Segmenter::new(cfg());
        assert_eq!(seg.push(&QUIET), Segment::Waiting);
        assert_eq!(seg.push(&LOUD), Segment::Speaking);
        assert_eq!(seg.push(&LOUD), Segment::Speaking);
        assert_eq!(seg.push(&QUIET), Segment::Speaking);
        assert_eq!(seg.push(&QUIET), Segment::Speaking);
        assert_eq!(seg.push(&QUIET), Segment::Done);
        // leading silence is not kept
        assert_eq!(seg.into_samples().len(), 5 * 4);
    }

    #[test]
    fn no_speech_times_out() {
        let mut seg = Segmenter::new(cfg());
        let last = (0..10).map(|_| seg.push(&QUIET)).last();
        assert_eq!(last, Some(Segment::TimedOut));
    }

    #[test]
    fn phrase_limit_cuts_long_speech() {
        let mut seg = Segmenter::new(cfg());
        let steps: Vec<Segment> = (0..20).map(|_| seg.push(&LOUD)).collect();
        assert_eq!(steps.iter().position(|s| *s == Segment::Done), Some(19));
    }

    #[test]
    fn wav_header_layout() {
        let wav = encode_wav(&[1, -1, 256], 16_000);
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16_000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 6);
        assert_eq!(&wav[44..46], &[1, 0]);
    }
}
