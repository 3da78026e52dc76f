//! Sample-rate conversion from the device's native rate to the pipeline rate.
//!
//! Capture devices rarely open at 16 kHz natively; the callback delivers
//! audio at whatever the device reports and this converter bridges the gap
//! on the capture thread, where allocation is allowed. When the rates
//! already match no rubato session is created and input passes through.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{EdnaError, Result};

/// Fixed-ratio mono f32 resampler with input accumulation.
pub struct RateConverter {
    /// `None` in passthrough mode (rates match).
    inner: Option<FastFixedIn<f32>>,
    /// Partial input carried between calls; rubato wants fixed-size blocks.
    pending: Vec<f32>,
    /// Input samples per rubato call.
    block: usize,
    /// Reused `[1][max]` output buffer.
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `EdnaError::AudioDevice` when rubato rejects the ratio.
    pub fn new(source_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let inner = FastFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            block,
            1,
        )
        .map_err(|e| EdnaError::AudioDevice(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; inner.output_frames_max()]];
        tracing::info!(source_rate, target_rate, block, "resampling enabled");

        Ok(Self {
            inner: Some(inner),
            pending: Vec::new(),
            block,
            scratch,
        })
    }

    /// Feed samples; returns whatever full blocks produced (may be empty
    /// while input accumulates).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut inner) = self.inner else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= self.block {
            match inner.process_into_buffer(&[&self.pending[..self.block]], &mut self.scratch, None)
            {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => tracing::error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.block);
        }
        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input_unchanged() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..320).map(|i| (i as f32).sin()).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsampling_48k_to_16k_thirds_the_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.1f32; 960]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "len {}",
            out.len()
        );
    }

    #[test]
    fn partial_blocks_accumulate_across_calls() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).is_empty());
    }
}
