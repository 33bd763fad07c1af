//! Gated loudness measurement, following ITU-R
//! BS.1770-4 / EBU R128: per-block K-weighted mean-square power, an
//! absolute gate at -70 LUFS, then a relative gate 10 LU below the
//! absolute-gated mean for the integrated value.

/// Integrated loudness and loudness range (LRA) over a measurement session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessSummary {
    pub integrated_lufs: f64,
    pub range_lu: f64,
}

/// Combines per-channel mean-square blocks into gated loudness/LRA figures.
/// Input blocks are expected to already be K-weighted (see
/// [`super::KWeightingFilter`]) and windowed by the caller (e.g. 400 ms,
/// 75% overlap for momentary loudness per BS.1770-4 §3).
pub struct GatedLoudnessMeter {
    channel_weights: Vec<f64>,
}

const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_OFFSET_LU: f64 = -10.0;
/// EBU R128 LRA uses a -20 LU relative gate (looser than the -10 LU used
/// for integrated loudness) plus the 10th/95th percentile window.
const LRA_RELATIVE_GATE_OFFSET_LU: f64 = -20.0;
const LRA_LOW_PERCENTILE: f64 = 0.10;
const LRA_HIGH_PERCENTILE: f64 = 0.95;

impl GatedLoudnessMeter {
    pub fn new(channel_weights: Vec<f64>) -> Self {
        Self { channel_weights }
    }

    pub fn mono() -> Self {
        Self::new(vec![1.0])
    }

    pub fn stereo() -> Self {
        Self::new(vec![1.0, 1.0])
    }

    /// Block loudness in LUFS from per-channel mean-square power
    /// (BS.1770-4 eq. 2): `-0.691 + 10*log10(sum(G_i * mean_square_i))`.
    pub fn block_loudness(&self, mean_squares: &[f64]) -> f64 {
        let sum: f64 = mean_squares
            .iter()
            .zip(&self.channel_weights)
            .map(|(ms, w)| w * ms)
            .sum();
        -0.691 + 10.0 * sum.max(f64::MIN_POSITIVE).log10()
    }

    /// Compute integrated loudness and loudness range from a sequence of
    /// per-block per-channel mean-square measurements.
    pub fn summarize(&self, blocks: &[Vec<f64>]) -> LoudnessSummary {
        let loudnesses: Vec<f64> = blocks.iter().map(|b| self.block_loudness(b)).collect();

        let absolute_gated: Vec<f64> = loudnesses.iter().copied().filter(|&l| l > ABSOLUTE_GATE_LUFS).collect();
        if absolute_gated.is_empty() {
            return LoudnessSummary {
                integrated_lufs: f64::NEG_INFINITY,
                range_lu: 0.0,
            };
        }

        let ungated_mean = mean_loudness(&absolute_gated);
        let relative_threshold = ungated_mean + RELATIVE_GATE_OFFSET_LU;
        let gated: Vec<f64> = absolute_gated
            .iter()
            .copied()
            .filter(|&l| l > relative_threshold)
            .collect();
        let integrated_lufs = mean_loudness(&gated);

        let lra_threshold = ungated_mean + LRA_RELATIVE_GATE_OFFSET_LU;
        let lra_gated: Vec<f64> = absolute_gated
            .iter()
            .copied()
            .filter(|&l| l > lra_threshold)
            .collect();
        let range_lu = loudness_range(&lra_gated);

        LoudnessSummary { integrated_lufs, range_lu }
    }
}

fn mean_loudness(values: &[f64]) -> f64 {
    let power_mean: f64 =
        values.iter().map(|&l| 10f64.powf((l + 0.691) / 10.0)).sum::<f64>() / values.len() as f64;
    -0.691 + 10.0 * power_mean.log10()
}

/// 10th-to-95th percentile spread. Percentile indices are `int(n * p)`,
/// truncated rather than rounded, so `p=0.10` over `n=10` selects index 1.
fn loudness_range(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("loudness values are never NaN"));
    let n = sorted.len();
    let percentile_index = |p: f64| ((p * n as f64).floor() as usize).min(n - 1);

    let low = sorted[percentile_index(LRA_LOW_PERCENTILE)];
    let high = sorted[percentile_index(LRA_HIGH_PERCENTILE)];
    high - low
}
