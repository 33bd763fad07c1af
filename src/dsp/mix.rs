//! Channel mix matrices.

/// A fixed `output_channels x input_channels` gain matrix applied per
/// sample frame: `output[o] = sum_i(coeffs[o][i] * input[i])`.
#[derive(Debug, Clone)]
pub struct ChannelMixMatrix {
    input_channels: usize,
    output_channels: usize,
    coeffs: Vec<f32>,
}

impl ChannelMixMatrix {
    pub fn new(input_channels: usize, output_channels: usize, coeffs: Vec<f32>) -> Self {
        debug_assert_eq!(coeffs.len(), input_channels * output_channels);
        Self {
            input_channels,
            output_channels,
            coeffs,
        }
    }

    /// Equal-gain downmix to mono: each output sample is the mean of all
    /// input channels.
    pub fn downmix_to_mono(input_channels: usize) -> Self {
        let gain = 1.0 / input_channels as f32;
        Self::new(input_channels, 1, vec![gain; input_channels])
    }

    /// Duplicate a mono channel to stereo at unity gain.
    pub fn mono_to_stereo() -> Self {
        Self::new(1, 2, vec![1.0, 1.0])
    }

    /// ITU-R BS.775 standard 5.1 (L R C LFE Ls Rs) to stereo downmix, with
    /// the conventional -3 dB (0.707) center/surround coefficients.
    pub fn surround_5_1_to_stereo() -> Self {
        const CENTER: f32 = std::f32::consts::FRAC_1_SQRT_2;
        const SURROUND: f32 = std::f32::consts::FRAC_1_SQRT_2;
        #[rustfmt::skip]
        let coeffs = vec![
            1.0, 0.0, CENTER, 0.0, SURROUND, 0.0,
            0.0, 1.0, CENTER, 0.0, 0.0,      SURROUND,
        ];
        Self::new(6, 2, coeffs)
    }

    /// Apply the matrix to `channels`-interleaved input, returning
    /// `output_channels`-interleaved output.
    pub fn apply(&self, input: &[f32]) -> Vec<f32> {
        let frames = input.len() / self.input_channels;
        let mut out = Vec::with_capacity(frames * self.output_channels);
        for frame in 0..frames {
            let base = frame * self.input_channels;
            for o in 0..self.output_channels {
                let mut acc = 0.0f32;
                for i in 0..self.input_channels {
                    acc += self.coeffs[o * self.input_channels + i] * input[base + i];
                }
                out.push(acc);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_downmix_averages_channels() {
        let matrix = ChannelMixMatrix::downmix_to_mono(2);
        let out = matrix.apply(&[1.0, -1.0, 0.5, 0.5]);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn mono_to_stereo_duplicates_samples() {
        let matrix = ChannelMixMatrix::mono_to_stereo();
        let out = matrix.apply(&[0.25, -0.25]);
        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn surround_downmix_preserves_front_channels() {
        let matrix = ChannelMixMatrix::surround_5_1_to_stereo();
        let out = matrix.apply(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(out, vec![1.0, 0.0]);
    }
}
