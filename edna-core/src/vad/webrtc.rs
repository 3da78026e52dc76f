//! WebRTC voice activity detector (pure-Rust port).

use earshot::{VoiceActivityDetector, VoiceActivityProfile};

use super::VadDetector;
use crate::error::{EdnaError, Result};

/// GMM-based WebRTC VAD operating on 16 kHz S16LE frames.
pub struct WebRtcVad {
    detector: VoiceActivityDetector,
}

impl WebRtcVad {
    /// Create a detector with the given aggressiveness, 0 (permissive)
    /// to 3 (aggressive). Values above 3 clamp.
    pub fn new(mode: u8) -> Self {
        let profile = match mode {
            0 => VoiceActivityProfile::QUALITY,
            1 => VoiceActivityProfile::LBR,
            2 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        };
        Self {
            detector: VoiceActivityDetector::new(profile),
        }
    }
}

impl VadDetector for WebRtcVad {
    fn is_voiced(&mut self, frame: &[i16]) -> Result<bool> {
        self.detector
            .predict_16khz(frame)
            .map_err(|e| EdnaError::Vad(format!("predict failed: {e:?}")))
    }

    fn reset(&mut self) {
        self.detector.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 320;

    #[test]
    fn silence_is_unvoiced() {
        let mut vad = WebRtcVad::new(2);
        let frame = vec![0i16; FRAME];
        assert!(!vad.is_voiced(&frame).unwrap());
    }

    #[test]
    fn rejects_bad_frame_length() {
        let mut vad = WebRtcVad::new(2);
        let frame = vec![0i16; 123];
        assert!(vad.is_voiced(&frame).is_err());
    }

    #[test]
    fn all_modes_construct() {
        for mode in 0..=4 {
            let mut vad = WebRtcVad::new(mode);
            let frame = vec![0i16; FRAME];
            assert!(vad.is_voiced(&frame).is_ok());
        }
    }
}
