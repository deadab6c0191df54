//! Input level metering for visual feedback.
//!
//! Reduces each block of captured samples to a fixed-size vector of smoothed
//! magnitudes. Consumers treat the vector as a read-only snapshot; it is
//! cosmetic data and never gates correctness.

/// Number of level buckets published per update.
pub const LEVEL_BUCKETS: usize = 32;

/// RMS-to-[0,1] scale factor. Speech at normal mic gain lands mid-range.
const LEVEL_SCALE: f32 = 20.0;

/// EMA smoothing factor (0.3 = 30% new value, 70% previous).
const EMA_ALPHA: f32 = 0.3;

/// Fixed-length array of normalized magnitudes in [0, 1].
pub type LevelVector = [f32; LEVEL_BUCKETS];

/// Stateful meter: holds the previous smoothed vector so successive updates
/// animate smoothly instead of jittering.
#[derive(Debug, Default)]
pub struct LevelMeter {
    levels: LevelVector,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a block of samples into the meter and return the smoothed vector.
    ///
    /// The block is split into `LEVEL_BUCKETS` contiguous chunks (the final
    /// chunk may be shorter); each bucket gets `min(1.0, rms * 20)` smoothed
    /// against its previous value. Buckets with no samples read as zero input.
    pub fn update(&mut self, samples: &[f32]) -> LevelVector {
        let chunk_size = samples.len().div_ceil(LEVEL_BUCKETS).max(1);

        for (i, level) in self.levels.iter_mut().enumerate() {
            let start = i * chunk_size;
            let end = ((i + 1) * chunk_size).min(samples.len());

            let target = if start < samples.len() {
                let chunk = &samples[start..end];
                let sum_squares: f32 = chunk.iter().map(|s| s * s).sum();
                let rms = (sum_squares / chunk.len() as f32).sqrt();
                (rms * LEVEL_SCALE).min(1.0)
            } else {
                0.0
            };

            *level = *level * (1.0 - EMA_ALPHA) + target * EMA_ALPHA;
        }

        self.levels
    }

    /// Drop all accumulated level state back to silence.
    pub fn reset(&mut self) -> LevelVector {
        self.levels = [0.0; LEVEL_BUCKETS];
        self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_count_is_invariant() {
        let mut meter = LevelMeter::new();

        for len in [0usize, 1, 7, 31, 32, 33, 1000, 16_000] {
            let samples = vec![0.25f32; len];
            let levels = meter.update(&samples);
            assert_eq!(levels.len(), LEVEL_BUCKETS);
        }
    }

    #[test]
    fn short_input_leaves_trailing_buckets_silent() {
        let mut meter = LevelMeter::new();
        let levels = meter.update(&vec![0.5f32; 10]);

        // 10 samples with chunk size 1: buckets 10.. never see input.
        for &level in &levels[10..] {
            assert_eq!(level, 0.0);
        }
        assert!(levels[0] > 0.0);
    }

    #[test]
    fn levels_are_clamped_to_unit_range() {
        let mut meter = LevelMeter::new();
        let loud = vec![1.0f32; 3200];

        for _ in 0..50 {
            let levels = meter.update(&loud);
            for &level in &levels {
                assert!((0.0..=1.0).contains(&level));
            }
        }
    }

    #[test]
    fn ema_smoothing_converges() {
        let mut meter = LevelMeter::new();
        let block = vec![0.05f32; 3200]; // rms 0.05 -> target 1.0

        let first = meter.update(&block)[0];
        assert!((first - EMA_ALPHA).abs() < 0.001, "first update is alpha * target");

        let second = meter.update(&block)[0];
        let expected = first * (1.0 - EMA_ALPHA) + EMA_ALPHA;
        assert!((second - expected).abs() < 0.001);
    }

    #[test]
    fn silence_decays_previous_levels() {
        let mut meter = LevelMeter::new();
        meter.update(&vec![0.5f32; 3200]);
        let before = meter.update(&vec![0.5f32; 3200])[0];
        let after = meter.update(&[])[0];
        assert!(after < before, "silence should pull levels down");
    }

    #[test]
    fn reset_returns_to_silence() {
        let mut meter = LevelMeter::new();
        meter.update(&vec![0.5f32; 3200]);
        let levels = meter.reset();
        assert_eq!(levels, [0.0; LEVEL_BUCKETS]);
    }
}
