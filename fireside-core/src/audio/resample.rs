//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Microphones capture at the device's native rate (commonly 44.1 or 48 kHz);
//! the realtime wire format is 16 kHz mono. `RateConverter` bridges that gap
//! on the capture emission task, where allocation is allowed. When the rates
//! already match it is a passthrough and no rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{FiresideError, Result};

/// Input frame count handed to rubato per process call.
const RESAMPLE_CHUNK: usize = 960;

/// Converts mono f32 audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls until a full chunk accumulates.
    pending: Vec<f32>,
    /// Pre-allocated rubato output buffer: `[1][output_frames_max]`.
    output: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `FiresideError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                output: Vec::new(),
            });
        }

        let ratio = f64::from(target_rate) / f64::from(source_rate);
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            1, // mono
        )
        .map_err(|e| FiresideError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(source_rate, target_rate, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            output: vec![vec![0f32; max_out]],
        })
    }

    /// Feed samples, returning whatever resampled output is ready (possibly
    /// empty while input accumulates). Passthrough mode returns the input
    /// unchanged.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.pending.len() >= RESAMPLE_CHUNK {
            let input = &self.pending[..RESAMPLE_CHUNK];
            match resampler.process_into_buffer(&[input], &mut self.output, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output[0][..produced]);
                }
                Err(e) => tracing::error!("resampler process error: {e}"),
            }
            self.pending.drain(..RESAMPLE_CHUNK);
        }

        result
    }

    /// `true` when no rate conversion occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
