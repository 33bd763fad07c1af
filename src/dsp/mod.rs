//! Bounded, side-effect-free audio transforms: PCM format conversion,
//! channel mixing, resampling, and K-weighted gated loudness measurement.
//! Depends on nothing else in this crate and is never invoked by the
//! segmenter/writer core itself, callers wire it in as an optional
//! pre-encoder stage.
//!
//! The loudness/resampling math follows the formulas ITU-R BS.1770-4 / EBU
//! R128 define directly, in the same struct-per-stage shape used for the
//! codec adapters elsewhere in this codebase (`recorder/codec/*.rs`: a small
//! struct with an explicit `process`/`convert` method, no hidden global
//! state).

mod biquad;
mod loudness;
mod mix;
mod resample;

pub use biquad::{Biquad, KWeightingFilter};
pub use loudness::{GatedLoudnessMeter, LoudnessSummary};
pub use mix::ChannelMixMatrix;
pub use resample::{resample, ResampleMethod};

use serde::{Deserialize, Serialize};

fn default_target_sample_rate() -> u32 {
    48_000
}

fn default_target_channels() -> u16 {
    2
}

fn default_resample_method() -> ResampleMethod {
    ResampleMethod::Linear
}

fn default_target_lufs() -> f64 {
    -23.0
}

/// DSP pipeline parameters a caller loads from the same config file shape
/// as [`crate::segmenter::SegmenterConfig`]. Pure parameters; constructing
/// the actual resampler/loudness meter from them is the caller's job since
/// this module has no pipeline object of its own to own them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DspConfig {
    #[serde(default = "default_target_sample_rate")]
    pub target_sample_rate: u32,
    #[serde(default = "default_target_channels")]
    pub target_channels: u16,
    #[serde(default = "default_resample_method")]
    pub resample_method: ResampleMethod,
    /// Target integrated loudness in LUFS, following EBU R128's -23 LUFS
    /// broadcast default.
    #[serde(default = "default_target_lufs")]
    pub target_lufs: f64,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: default_target_sample_rate(),
            target_channels: default_target_channels(),
            resample_method: default_resample_method(),
            target_lufs: default_target_lufs(),
        }
    }
}

/// Convert signed 16-bit PCM to normalized `f32` in `[-1.0, 1.0]`.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32_768.0).collect()
}

/// Convert normalized `f32` PCM back to signed 16-bit, saturating at the
/// `i16` range rather than wrapping.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32_768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Split `channels`-interleaved samples into one `Vec<f32>` per channel.
pub fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let mut planes = vec![Vec::with_capacity(samples.len() / channels.max(1)); channels];
    for (i, &s) in samples.iter().enumerate() {
        planes[i % channels].push(s);
    }
    planes
}

/// Inverse of [`deinterleave`]; all planes must have equal length.
pub fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let Some(len) = planes.first().map(Vec::len) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(len * planes.len());
    for i in 0..len {
        for plane in planes {
            out.push(plane[i]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_round_trip_is_close() {
        let original = vec![0i16, 16_384, -16_384, i16::MAX, i16::MIN];
        let f32s = i16_to_f32(&original);
        let back = f32_to_i16(&f32s);
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
    }

    #[test]
    fn interleave_round_trips_deinterleave() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planes = deinterleave(&samples, 2);
        assert_eq!(planes, vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]);
        assert_eq!(interleave(&planes), samples);
    }

    #[test]
    fn dsp_config_deserializes_with_defaults() {
        let config: DspConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.target_sample_rate, 48_000);
        assert_eq!(config.target_channels, 2);
        assert_eq!(config.resample_method, ResampleMethod::Linear);
        assert_eq!(config.target_lufs, -23.0);
    }
}
