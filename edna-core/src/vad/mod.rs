//! Voice activity detection abstraction.
//!
//! The `VadDetector` trait is the seam between the capture loop and the
//! classifier: swap in the WebRTC detector (default) or a scripted stub in
//! tests without touching the segmentation logic.

pub mod webrtc;

pub use webrtc::WebRtcVad;

use crate::error::Result;

/// Frame classifier contract.
///
/// Implementors may be stateful (noise floor estimates, RNN hidden state),
/// hence `&mut self`. A hard engine failure is returned as `Err` and is
/// fatal to the capture loop.
pub trait VadDetector: Send + 'static {
    /// Classify one 20 ms mono S16LE frame at the configured sample rate.
    fn is_voiced(&mut self, frame: &[i16]) -> Result<bool>;

    /// Reset internal state between utterances or after a mic-gate region.
    fn reset(&mut self);
}
