//! Error types for the tuner engine.
//!
//! Estimation uncertainty is not an error (see `PitchResult::unpitched`).
//! Only caller contract violations, permission and device failures surface here.

use thiserror::Error;

use crate::types::{HIGHEST_NOTE, LOWEST_NOTE};

/// Errors returned by the tuner state machine and the acquisition pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TunerError {
    /// String index outside the current tuning.
    #[error("string index {index} out of range for a {count}-string tuning")]
    InvalidString { index: usize, count: usize },

    /// Note index outside `[LOWEST_NOTE, HIGHEST_NOTE]`.
    #[error("note index {0} outside the supported range {lo}..={hi}", lo = LOWEST_NOTE, hi = HIGHEST_NOTE)]
    InvalidNote(i32),

    /// Reference pitch that is not a positive finite frequency.
    #[error("reference pitch must be positive and finite, got {0}")]
    InvalidReferencePitch(f64),

    /// `start()` while the tuner or pipeline is already running.
    #[error("tuner already started")]
    AlreadyRunning,

    /// `start()` without microphone permission.
    #[error("microphone permission not granted")]
    PermissionDenied,

    /// The microphone could not be opened or failed while capturing.
    #[error("audio acquisition failed: {0}")]
    Device(#[from] DeviceError),
}

/// Failures reported by a `Microphone` or `InputStream`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("no audio input device available")]
    NoDevice,

    /// The device refused the requested frame size. `required` carries the
    /// size the device reports it needs, when it reports one.
    #[error("buffer size {requested} rejected by device (required: {required:?})")]
    BufferSizeRejected {
        requested: usize,
        required: Option<usize>,
    },

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("audio stream closed")]
    StreamClosed,
}

impl DeviceError {
    /// Buffer size the device asked for, if this is a size rejection.
    pub fn required_buffer_size(&self) -> Option<usize> {
        match self {
            DeviceError::BufferSizeRejected { required, .. } => *required,
            _ => None,
        }
    }
}

/// The estimator cannot analyse a frame at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimateError {
    #[error("frame of {len} samples is shorter than the {required} the lag range needs")]
    BufferTooShort { len: usize, required: usize },
}

/// Invalid musical input: note symbols and tuning shapes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MusicError {
    #[error("invalid note symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("a tuning needs at least one string")]
    EmptyTuning,
}

/// Errors reading or writing a tunings document.
#[derive(Error, Debug)]
pub enum TuningIoError {
    #[error("tunings JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tunings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid tuning: {0}")]
    Music(#[from] MusicError),

    #[error("tuning record has no strings")]
    MissingStrings,
}
