//! Shared DSP primitives: frame RMS, mono mixdown, and test signal generators.

/// Root mean square of an audio frame. Empty frames are silent.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Average interleaved channels down to mono.
pub fn mix_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Test signal generators, available to unit tests.
#[cfg(test)]
pub mod test_helpers {
    use std::f64::consts::PI;

    /// `n` samples of a sine wave starting at phase zero.
    pub fn sine_frame(freq_hz: f64, amp: f64, sr: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (amp * (2.0 * PI * freq_hz * i as f64 / sr as f64).sin()) as f32)
            .collect()
    }

    /// A frame whose RMS is exactly `rms` (constant-magnitude square wave).
    pub fn frame_with_rms(rms: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| if i % 2 == 0 { rms } else { -rms })
            .collect()
    }
}
