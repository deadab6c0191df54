//! Post-capture conditioning for completed episodes.
//!
//! Splicing the pre-roll ring onto live capture leaves two artifacts: a DC /
//! low-frequency bump from the abrupt buffer boundary, and an audible click at
//! sample zero. A single-pole high-pass removes the first, a short linear
//! fade-in the second. Both run exactly once, at episode end, never on the
//! audio callback thread.

use std::f32::consts::PI;

/// Single-pole IIR high-pass: `y[n] = alpha * (y[n-1] + x[n] - x[n-1])`
/// with `alpha = RC / (RC + dt)`, `RC = 1 / (2*pi*cutoff)`.
///
/// Stateless across calls; the filter state lives only for the duration of
/// one pass over `samples`.
pub fn high_pass_filter(samples: &[f32], cutoff_hz: f32, sample_rate: u32) -> Vec<f32> {
    if samples.is_empty() || cutoff_hz <= 0.0 || sample_rate == 0 {
        return samples.to_vec();
    }

    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let alpha = rc / (rc + dt);

    let mut output = Vec::with_capacity(samples.len());
    output.push(samples[0]);

    for n in 1..samples.len() {
        let y = alpha * (output[n - 1] + samples[n] - samples[n - 1]);
        output.push(y);
    }

    output
}

/// Multiply the first `duration_secs * sample_rate` samples by a linear
/// 0 -> 1 ramp. Input shorter than the ramp is returned unchanged.
pub fn fade_in(samples: &[f32], duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let fade_len = (duration_secs * sample_rate as f32) as usize;
    if fade_len == 0 || samples.len() < fade_len {
        return samples.to_vec();
    }

    let mut output = samples.to_vec();
    for (i, sample) in output.iter_mut().take(fade_len).enumerate() {
        *sample *= i as f32 / fade_len as f32;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f32, duration_secs: f32, sample_rate: u32) -> Vec<f32> {
        let count = (duration_secs * sample_rate as f32) as usize;
        (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * PI * freq_hz * t).sin()
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        (sum_squares / samples.len() as f32).sqrt()
    }

    #[test]
    fn high_pass_attenuates_rumble() {
        let input = sine(30.0, 1.0, 16_000);
        let output = high_pass_filter(&input, 80.0, 16_000);

        assert_eq!(output.len(), input.len());
        assert!(
            rms(&output) < rms(&input),
            "30 Hz rumble should lose energy through an 80 Hz high-pass"
        );
    }

    #[test]
    fn high_pass_preserves_speech_band() {
        let input = sine(2000.0, 1.0, 16_000);
        let output = high_pass_filter(&input, 80.0, 16_000);

        let ratio = rms(&output) / rms(&input);
        assert!(
            (ratio - 1.0).abs() < 0.05,
            "2 kHz content should pass within 5%, got ratio {}",
            ratio
        );
    }

    #[test]
    fn high_pass_removes_dc_offset() {
        let input = vec![0.5f32; 16_000];
        let output = high_pass_filter(&input, 80.0, 16_000);

        // After the initial transient the constant offset decays toward zero.
        let tail_rms = rms(&output[8_000..]);
        assert!(tail_rms < 0.01, "DC should decay, tail rms was {}", tail_rms);
    }

    #[test]
    fn high_pass_empty_input() {
        assert!(high_pass_filter(&[], 80.0, 16_000).is_empty());
    }

    #[test]
    fn fade_in_boundary_values() {
        let input = vec![1.0f32; 1000];
        let output = fade_in(&input, 0.02, 16_000);
        let fade_len = (0.02f32 * 16_000.0) as usize; // 320

        assert_eq!(output.len(), input.len());
        assert!(output[0].abs() < 0.001, "first sample should be silenced");
        assert!(
            (output[fade_len - 1] - 1.0).abs() < 0.1,
            "last ramp sample should be near full scale"
        );
        for &sample in &output[fade_len..] {
            assert_eq!(sample, 1.0, "samples past the ramp must be untouched");
        }
    }

    #[test]
    fn fade_in_shorter_than_ramp_is_unchanged() {
        let input = vec![1.0f32; 100];
        let output = fade_in(&input, 0.02, 16_000);
        assert_eq!(output, input);
    }

    #[test]
    fn filter_then_fade_keeps_length() {
        let input = sine(440.0, 0.5, 16_000);
        let filtered = high_pass_filter(&input, 80.0, 16_000);
        let conditioned = fade_in(&filtered, 0.02, 16_000);
        assert_eq!(conditioned.len(), input.len());
    }
}
