//! Shared DSP primitives: RMS, DC removal, mean magnitude, and test signal generators.

/// Root mean square of an audio buffer.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Arithmetic mean (the DC component) of a buffer.
pub fn mean(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64).sum();
    (sum / samples.len() as f64) as f32
}

/// Copy of `samples` with the DC component subtracted.
pub fn remove_dc(samples: &[f32]) -> Vec<f32> {
    let dc = mean(samples);
    samples.iter().map(|s| s - dc).collect()
}

/// Mean absolute amplitude.
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s.abs() as f64).sum();
    (sum / samples.len() as f64) as f32
}
