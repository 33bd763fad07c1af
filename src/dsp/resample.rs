//! PCM resampling: linear and windowed-sinc
//! (Lanczos) interpolation between arbitrary sample rates.

/// Resampling algorithm and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ResampleMethod {
    /// Linear interpolation between the two nearest input samples.
    Linear,
    /// Lanczos-windowed sinc interpolation with kernel half-width `a`
    /// (typically 2 or 3); higher `a` trades compute for less aliasing.
    Lanczos { a: usize },
}

/// Resample a single-channel `f32` signal from `in_rate` to `out_rate`.
/// Multi-channel callers resample each plane independently after
/// [`super::deinterleave`].
pub fn resample(input: &[f32], in_rate: u32, out_rate: u32, method: ResampleMethod) -> Vec<f32> {
    if input.is_empty() || in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }
    if in_rate == out_rate {
        return input.to_vec();
    }

    let ratio = in_rate as f64 / out_rate as f64;
    let out_len = ((input.len() as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for n in 0..out_len {
        let src_pos = n as f64 * ratio;
        let sample = match method {
            ResampleMethod::Linear => linear_at(input, src_pos),
            ResampleMethod::Lanczos { a } => lanczos_at(input, src_pos, a),
        };
        out.push(sample);
    }
    out
}

fn linear_at(input: &[f32], pos: f64) -> f32 {
    let i0 = pos.floor() as isize;
    let frac = (pos - pos.floor()) as f32;
    let s0 = sample_at(input, i0);
    let s1 = sample_at(input, i0 + 1);
    s0 + (s1 - s0) * frac
}

fn lanczos_kernel(x: f64, a: usize) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    if x.abs() >= a as f64 {
        return 0.0;
    }
    let pix = std::f64::consts::PI * x;
    (a as f64 * (pix).sin() * (pix / a as f64).sin()) / (pix * pix)
}

fn lanczos_at(input: &[f32], pos: f64, a: usize) -> f32 {
    let center = pos.floor() as isize;
    let mut acc = 0.0f64;
    for k in (center - a as isize + 1)..=(center + a as isize) {
        let weight = lanczos_kernel(pos - k as f64, a);
        acc += weight * sample_at(input, k) as f64;
    }
    acc as f32
}

fn sample_at(input: &[f32], index: isize) -> f32 {
    if index < 0 || index as usize >= input.len() {
        0.0
    } else {
        input[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 48_000, 48_000, ResampleMethod::Linear), input);
    }

    #[test]
    fn upsampling_doubles_output_length() {
        let input: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0).sin()).collect();
        let out = resample(&input, 24_000, 48_000, ResampleMethod::Linear);
        assert_eq!(out.len(), 960);
    }

    #[test]
    fn downsampling_halves_output_length() {
        let input: Vec<f32> = (0..960).map(|i| (i as f32 / 960.0).sin()).collect();
        let out = resample(&input, 48_000, 24_000, ResampleMethod::Lanczos { a: 3 });
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn linear_interpolates_midpoint() {
        let input = vec![0.0, 1.0, 0.0, -1.0];
        assert!((linear_at(&input, 0.5) - 0.5).abs() < 1e-6);
    }
}
