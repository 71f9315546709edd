use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

// ─── Audio data ─────────────────────────────────────────────────────────────

/// One fixed-length frame of captured audio.
///
/// Produced by an `InputStream` and lent to every registered frame processor
/// for the duration of a single `process` call. Processors that want to keep
/// samples past that call must copy them.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Microseconds since capture session start (timestamp of first sample)
    pub timestamp_us: u64,
    /// Mono f32 samples, normalized -1.0 to 1.0
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Frame duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ─── Pitch estimation output ────────────────────────────────────────────────

/// Per-frame output of the pitch estimator.
///
/// `frequency` is only meaningful when `pitched` is true; unpitched results
/// carry `-1.0` so they can never be mistaken for a real frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchResult {
    pub pitched: bool,
    pub frequency: f64,
}

impl PitchResult {
    pub fn pitched(frequency: f64) -> Self {
        if frequency.is_finite() && frequency > 0.0 {
            Self {
                pitched: true,
                frequency,
            }
        } else {
            Self::unpitched()
        }
    }

    pub fn unpitched() -> Self {
        Self {
            pitched: false,
            frequency: -1.0,
        }
    }

    /// The detected frequency, if any.
    pub fn frequency(&self) -> Option<f64> {
        self.pitched.then_some(self.frequency)
    }
}

impl fmt::Display for PitchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frequency() {
            Some(hz) => write!(f, "{:.2} Hz", hz),
            None => write!(f, "unpitched"),
        }
    }
}

/// Sample rate and frame size actually in effect after device negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub buffer_size: usize,
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the capture session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Constants ──────────────────────────────────────────────────────────────

/// Lowest note the tuner handles: D1, in semitones from A4.
pub const LOWEST_NOTE: i32 = -43;

/// Highest note the tuner handles: B4, in semitones from A4.
pub const HIGHEST_NOTE: i32 = 2;

/// Offset (in semitones) below which the target counts as in tune.
pub const TUNED_OFFSET_THRESHOLD: f64 = 0.05;

/// How long the offset must stay under the threshold before the target is
/// confirmed in tune.
pub const TUNED_SUSTAIN_TIME: Duration = Duration::from_millis(900);

/// Requested capture sample rate (Hz).
pub const SAMPLE_RATE: u32 = 44100;

/// Requested analysis frame size. ~93ms at 44.1kHz; twice the period of D1
/// fits with room to spare, which the AMDF lag search needs.
pub const AUDIO_BUFFER_SIZE: usize = 4096;

/// Note selected in chromatic mode before anything is detected: E2.
pub const DEFAULT_SELECTED_NOTE: i32 = -29;
