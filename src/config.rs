//! Tuner configuration: the explicit settings a tuner session starts from.
//!
//! Only the choices worth persisting live here (reference pitch, tuning,
//! mode flags, estimator thresholds). Runtime state such as the selected
//! string or tuned flags never round-trips through this file.

use crate::notes::DEFAULT_A4_PITCH;
use crate::pitch::EstimatorSettings;
use crate::presets;
use crate::tuning::Tuning;
use crate::types::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Reference pitch for A4, in Hz.
    pub a4_pitch: f64,
    /// Requested capture rate; the device may negotiate another.
    pub sample_rate: u32,
    /// Requested frame size in samples.
    pub buffer_size: usize,
    pub tuning: Tuning,
    pub chromatic: bool,
    pub auto_detect: bool,
    pub estimator: EstimatorSettings,
    /// In-tune band for the sustain timer, in semitones.
    pub tuned_offset_threshold: f64,
    /// Dwell inside the band before a target is confirmed in tune.
    pub tuned_sustain_ms: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            a4_pitch: DEFAULT_A4_PITCH,
            sample_rate: SAMPLE_RATE,
            buffer_size: AUDIO_BUFFER_SIZE,
            tuning: presets::standard(),
            chromatic: false,
            auto_detect: true,
            estimator: EstimatorSettings::default(),
            tuned_offset_threshold: TUNED_OFFSET_THRESHOLD,
            tuned_sustain_ms: TUNED_SUSTAIN_TIME.as_millis() as u64,
        }
    }
}

impl TunerConfig {
    /// Load from a JSON file. Returns None if file is absent or malformed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(c) => {
                info!("Loaded tuner config from {:?}", path);
                Some(c)
            }
            Err(e) => {
                warn!("Failed to parse tuner config {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Tuner config saved to {:?}", path);
        Ok(())
    }

    pub fn tuned_sustain(&self) -> Duration {
        Duration::from_millis(self.tuned_sustain_ms)
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_a4_pitch(mut self, a4_pitch: f64) -> Self {
        self.a4_pitch = a4_pitch;
        self
    }

    pub fn with_chromatic(mut self, chromatic: bool) -> Self {
        self.chromatic = chromatic;
        self
    }

    pub fn with_auto_detect(mut self, auto_detect: bool) -> Self {
        self.auto_detect = auto_detect;
        self
    }
}
