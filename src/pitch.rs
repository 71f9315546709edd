use crate::dsp::{compute_rms, mean_abs, remove_dc};
use crate::error::EstimateError;
use crate::notes::{pitch_of, DEFAULT_A4_PITCH};
use crate::types::*;
use log::{debug, trace, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fundamental-frequency estimator using the average magnitude difference
/// function (AMDF).
///
/// # How it works
///
/// For every candidate lag τ between the periods of the highest and lowest
/// notes the tuner handles (with half a semitone of headroom), compute
///
///   d(τ) = mean |x[i] − x[i+τ]|
///
/// over the whole overlap. A periodic signal makes d(τ) dip towards zero at
/// its period and at every multiple of it. Picking the deepest dip overall
/// is prone to octave errors (the dip at 2P can be marginally deeper than
/// the one at P), so the search instead takes the *first* lag whose value
/// falls below a cutoff close to the global minimum, then the bottom of
/// that dip.
///
/// # Rejection
///
/// A frame is reported unpitched when:
///   - it is silent or pure DC (RMS of the centred signal under `silence_rms`)
///   - d(τ) is flat across the range (no periodicity at all)
///   - the chosen dip is shallow relative to the signal's own magnitude
///     (`clarity_threshold`) or relative to the curve's peak (`dip_ratio`)
///
/// Frames are estimated independently. Smoothing over time is the caller's
/// business.
pub struct PitchEstimator {
    settings: EstimatorSettings,
    /// Readers clone the `Arc` once per frame; reconfiguration swaps it whole.
    bounds: RwLock<Arc<LagBounds>>,
}

/// Tunable thresholds for the AMDF decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// RMS under which a frame is silence.
    pub silence_rms: f32,
    /// Fraction of the d(τ) range above the minimum that still counts as
    /// "in the dip" when looking for the first candidate lag.
    pub sensitivity: f64,
    /// Largest accepted d(τ*) / (2 · mean|x|). 0 = perfect periodicity,
    /// ~0.67 = white noise.
    pub clarity_threshold: f64,
    /// The dip must be at least this many times shallower than the peak.
    pub dip_ratio: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            silence_rms: 0.005,
            sensitivity: 0.1,
            clarity_threshold: 0.2,
            dip_ratio: 5.0,
        }
    }
}

/// Headroom searched beyond the note range, so strings tuned a little past
/// `LOWEST_NOTE` or `HIGHEST_NOTE` still have their period strictly inside
/// the lag range.
pub const LAG_MARGIN_SEMITONES: f64 = 0.5;

/// Admissible lag range for one (sample rate, reference pitch) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagBounds {
    pub sample_rate: u32,
    pub a4_pitch: f64,
    /// Just below the period of `HIGHEST_NOTE` + margin, in samples.
    pub min_lag: usize,
    /// Just above the period of `LOWEST_NOTE` − margin, in samples.
    pub max_lag: usize,
}

impl LagBounds {
    pub fn new(sample_rate: u32, a4_pitch: f64) -> Self {
        let sr = sample_rate as f64;
        let margin = 2.0_f64.powf(LAG_MARGIN_SEMITONES / 12.0);
        let f_hi = pitch_of(HIGHEST_NOTE, a4_pitch) * margin;
        let f_lo = pitch_of(LOWEST_NOTE, a4_pitch) / margin;
        // One whole sample either side keeps a neighbour for the refinement.
        let min_lag = ((sr / f_hi).floor() - 1.0).max(1.0) as usize;
        let max_lag = (sr / f_lo).ceil() as usize + 1;
        Self {
            sample_rate,
            a4_pitch,
            min_lag,
            max_lag: max_lag.max(min_lag + 1),
        }
    }

    /// Shortest frame the lag search can analyse.
    pub fn required_len(&self) -> usize {
        2 * self.max_lag
    }
}

impl PitchEstimator {
    pub fn new(sample_rate: u32, a4_pitch: f64) -> Self {
        Self {
            settings: EstimatorSettings::default(),
            bounds: RwLock::new(Arc::new(LagBounds::new(sample_rate, a4_pitch))),
        }
    }

    pub fn with_settings(mut self, settings: EstimatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    /// Currently published lag bounds.
    pub fn bounds(&self) -> Arc<LagBounds> {
        self.bounds.read().clone()
    }

    /// Re-derive the lag bounds for a new reference pitch. Safe to call while
    /// another thread is estimating: in-flight frames finish on the old bounds.
    pub fn set_reference_pitch(&self, a4_pitch: f64) {
        if !(a4_pitch.is_finite() && a4_pitch > 0.0) {
            warn!("Estimator: ignoring reference pitch {}", a4_pitch);
            return;
        }
        let mut bounds = self.bounds.write();
        *bounds = Arc::new(LagBounds::new(bounds.sample_rate, a4_pitch));
        debug!(
            "Estimator: a4={:.2}Hz lags {}..={}",
            a4_pitch, bounds.min_lag, bounds.max_lag
        );
    }

    /// Re-derive the lag bounds for a new sample rate.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        if sample_rate == 0 {
            warn!("Estimator: ignoring sample rate 0");
            return;
        }
        let mut bounds = self.bounds.write();
        *bounds = Arc::new(LagBounds::new(sample_rate, bounds.a4_pitch));
        debug!(
            "Estimator: sr={} lags {}..={}",
            sample_rate, bounds.min_lag, bounds.max_lag
        );
    }

    /// Estimate the fundamental of one frame.
    ///
    /// If `sample_rate` differs from the published bounds, the bounds are
    /// re-derived first.
    pub fn estimate(&self, samples: &[f32], sample_rate: u32) -> Result<PitchResult, EstimateError> {
        let mut bounds = self.bounds();
        if bounds.sample_rate != sample_rate && sample_rate > 0 {
            self.set_sample_rate(sample_rate);
            bounds = self.bounds();
        }
        let result = detect_pitch_amdf(samples, &bounds, &self.settings)?;
        trace!("amdf: {}", result);
        Ok(result)
    }
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, DEFAULT_A4_PITCH)
    }
}

/// Run the AMDF decision on one frame against fixed lag bounds.
pub fn detect_pitch_amdf(
    samples: &[f32],
    bounds: &LagBounds,
    settings: &EstimatorSettings,
) -> Result<PitchResult, EstimateError> {
    let required = bounds.required_len();
    if samples.len() < required {
        return Err(EstimateError::BufferTooShort {
            len: samples.len(),
            required,
        });
    }

    let x = remove_dc(samples);
    if compute_rms(&x) < settings.silence_rms {
        return Ok(PitchResult::unpitched());
    }

    let (min_lag, max_lag) = (bounds.min_lag, bounds.max_lag);
    let amdf = amdf_curve(&x, min_lag, max_lag);

    let (d_min, d_max) = amdf
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), &d| (lo.min(d), hi.max(d)));
    if d_max <= 0.0 || d_max - d_min <= d_max * 1e-6 {
        return Ok(PitchResult::unpitched());
    }

    // First lag inside the deepest dip region, then the bottom of that dip.
    let cutoff = d_min + settings.sensitivity * (d_max - d_min);
    let Some(first) = amdf.iter().position(|&d| d <= cutoff) else {
        return Ok(PitchResult::unpitched());
    };
    let window = (min_lag / 2).max((min_lag + first) / 8).max(1);
    let end = (first + window).min(amdf.len() - 1);
    let mut best = first;
    for j in first..=end {
        if amdf[j] < amdf[best] {
            best = j;
        }
    }
    // A dip against either end is the edge of a slope, not a located minimum.
    if best == 0 || best + 1 == amdf.len() {
        return Ok(PitchResult::unpitched());
    }
    let d_best = amdf[best];

    let magnitude = 2.0 * mean_abs(&x) as f64;
    if magnitude <= 0.0 || d_best / magnitude > settings.clarity_threshold {
        return Ok(PitchResult::unpitched());
    }
    if d_best * settings.dip_ratio >= d_max {
        return Ok(PitchResult::unpitched());
    }

    let lag = (min_lag + best) as f64 + v_offset(&amdf, best);
    Ok(PitchResult::pitched(bounds.sample_rate as f64 / lag))
}

/// d(τ) for τ in `min_lag..=max_lag`, index 0 = `min_lag`.
fn amdf_curve(x: &[f32], min_lag: usize, max_lag: usize) -> Vec<f64> {
    (min_lag..=max_lag)
        .map(|tau| {
            let overlap = x.len() - tau;
            let sum: f64 = x[..overlap]
                .iter()
                .zip(&x[tau..])
                .map(|(a, b)| (a - b).abs() as f64)
                .sum();
            sum / overlap as f64
        })
        .collect()
}

/// Sub-sample position of a minimum from its two neighbours, in [-0.5, 0.5].
///
/// Near its period d(τ) ≈ |τ − P| · mean|x'|, a V rather than a parabola, so
/// fit two lines of equal and opposite slope through the three points.
fn v_offset(curve: &[f64], i: usize) -> f64 {
    if i == 0 || i + 1 >= curve.len() {
        return 0.0;
    }
    let (y0, y1, y2) = (curve[i - 1], curve[i], curve[i + 1]);
    let slope = y0.max(y2) - y1;
    if slope <= f64::EPSILON {
        return 0.0;
    }
    (0.5 * (y0 - y2) / slope).clamp(-0.5, 0.5)
}
