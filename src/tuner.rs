use crate::acquisition::{AcquisitionPipeline, FrameProcessor, Microphone};
use crate::config::TunerConfig;
use crate::error::{DeviceError, TunerError};
use crate::notes::{self, offset_from_a4};
use crate::pitch::PitchEstimator;
use crate::tuning::Tuning;
use crate::types::*;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Snapshots buffered per subscriber before new ones are dropped.
const SUBSCRIBER_CAPACITY: usize = 64;

// ─── State ──────────────────────────────────────────────────────────────────

/// Everything an observer needs to draw the tuner, as one consistent value.
///
/// Invariants (hold in every published snapshot):
///   - `selected_string < tuning.num_strings()`
///   - `LOWEST_NOTE <= selected_note <= HIGHEST_NOTE`
///   - `tuned.len() == tuning.num_strings()`
#[derive(Debug, Clone, PartialEq)]
pub struct TunerState {
    pub tuning: Tuning,
    pub selected_string: usize,
    /// Target note in chromatic mode.
    pub selected_note: i32,
    /// Signed distance from the target in semitones; None while no pitch
    /// is detected.
    pub note_offset: Option<f64>,
    /// Last detected frequency, Hz.
    pub frequency: Option<f64>,
    /// Per-string confirmed-in-tune flags (instrument mode).
    pub tuned: Vec<bool>,
    /// Confirmed-in-tune flag for `selected_note` (chromatic mode).
    pub note_tuned: bool,
    pub auto_detect: bool,
    pub chromatic: bool,
    pub a4_pitch: f64,
    pub running: bool,
    /// Last acquisition failure; cleared by the next successful start.
    pub error: Option<TunerError>,
}

impl TunerState {
    fn new(config: &TunerConfig) -> Self {
        Self {
            tuned: vec![false; config.tuning.num_strings()],
            tuning: config.tuning.clone(),
            selected_string: 0,
            selected_note: DEFAULT_SELECTED_NOTE,
            note_offset: None,
            frequency: None,
            note_tuned: false,
            auto_detect: config.auto_detect,
            chromatic: config.chromatic,
            a4_pitch: config.a4_pitch,
            running: false,
            error: None,
        }
    }

    pub fn num_strings(&self) -> usize {
        self.tuning.num_strings()
    }

    /// Note index the offset is measured against.
    pub fn target_note(&self) -> i32 {
        if self.chromatic {
            self.selected_note
        } else {
            self.tuning
                .string(self.selected_string)
                .map(|s| s.root)
                .unwrap_or(self.selected_note)
        }
    }

    pub fn target_frequency(&self) -> f64 {
        notes::pitch_of(self.target_note(), self.a4_pitch)
    }

    /// Whether the current target (string or chromatic note) is confirmed.
    pub fn is_target_tuned(&self) -> bool {
        if self.chromatic {
            self.note_tuned
        } else {
            self.tuned.get(self.selected_string).copied().unwrap_or(false)
        }
    }

    pub fn all_strings_tuned(&self) -> bool {
        self.tuned.iter().all(|&t| t)
    }

    fn check_string(&self, index: usize) -> Result<(), TunerError> {
        if index < self.num_strings() {
            Ok(())
        } else {
            Err(TunerError::InvalidString {
                index,
                count: self.num_strings(),
            })
        }
    }

    /// Per-frame update from one estimator result.
    fn apply_pitch(&mut self, result: PitchResult) {
        let Some(freq) = result.frequency() else {
            self.note_offset = None;
            self.frequency = None;
            return;
        };
        let note = offset_from_a4(freq, self.a4_pitch);

        if self.auto_detect {
            if self.chromatic {
                let nearest = (note.round() as i32).clamp(LOWEST_NOTE, HIGHEST_NOTE);
                if nearest != self.selected_note {
                    self.note_tuned = false;
                }
                self.selected_note = nearest;
            } else {
                self.selected_string = self.tuning.closest_string(note);
            }
        }

        self.frequency = Some(freq);
        self.note_offset = Some(note - self.target_note() as f64);
    }
}

// ─── Shared state and observers ─────────────────────────────────────────────

/// State plus observers, shared between the control side and the producer
/// thread.
struct Shared {
    state: Mutex<TunerState>,
    listeners: Mutex<Vec<Sender<TunerState>>>,
}

impl Shared {
    /// Read-modify-write under the state lock. A snapshot is published only
    /// if the state actually changed, and while the lock is still held so
    /// observers see updates in the order they were applied.
    fn update<R>(&self, f: impl FnOnce(&mut TunerState) -> R) -> R {
        let mut state = self.state.lock();
        let before = state.clone();
        let out = f(&mut state);
        if *state != before {
            self.publish(&state);
        }
        out
    }

    fn publish(&self, state: &TunerState) {
        self.listeners.lock().retain(|tx| match tx.try_send(state.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Subscriber lagging, snapshot dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Frame processor wiring the estimator into the state machine.
struct PitchTracker {
    estimator: Arc<PitchEstimator>,
    shared: Arc<Shared>,
}

impl FrameProcessor for PitchTracker {
    fn process(&mut self, frame: &AudioFrame) {
        let result = match self.estimator.estimate(&frame.samples, frame.sample_rate) {
            Ok(r) => r,
            Err(e) => {
                debug!("Frame skipped: {}", e);
                PitchResult::unpitched()
            }
        };
        self.shared.update(|s| s.apply_pitch(result));
    }

    fn on_error(&mut self, error: &DeviceError) {
        let error = TunerError::Device(error.clone());
        self.shared.update(|s| {
            s.running = false;
            s.note_offset = None;
            s.frequency = None;
            s.error = Some(error);
        });
    }

    fn on_end(&mut self) {
        self.shared.update(|s| {
            s.running = false;
            s.note_offset = None;
            s.frequency = None;
        });
    }
}

// ─── Tuner ──────────────────────────────────────────────────────────────────

/// The tuner state machine.
///
/// Control operations (`select_string`, `set_tuning`, ...) may be called from
/// any thread; each one is applied atomically to the state. Pitch updates
/// arrive from the acquisition thread once per frame while running.
///
/// Caller mistakes (string or note out of range, bad reference pitch) are
/// rejected with an `Err` and leave the state untouched.
pub struct Tuner {
    config: TunerConfig,
    shared: Arc<Shared>,
    estimator: Arc<PitchEstimator>,
    microphone: Option<Arc<dyn Microphone>>,
    pipeline: Mutex<Option<AcquisitionPipeline>>,
}

impl Tuner {
    pub fn new(config: TunerConfig) -> Self {
        let a4_pitch = if config.a4_pitch.is_finite() && config.a4_pitch > 0.0 {
            config.a4_pitch
        } else {
            warn!(
                "Invalid reference pitch {} in config, using {}",
                config.a4_pitch,
                notes::DEFAULT_A4_PITCH
            );
            notes::DEFAULT_A4_PITCH
        };
        let config = TunerConfig { a4_pitch, ..config };
        let estimator =
            PitchEstimator::new(config.sample_rate, a4_pitch).with_settings(config.estimator);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TunerState::new(&config)),
                listeners: Mutex::new(Vec::new()),
            }),
            estimator: Arc::new(estimator),
            microphone: None,
            pipeline: Mutex::new(None),
            config,
        }
    }

    pub fn with_microphone(mut self, microphone: Arc<dyn Microphone>) -> Self {
        self.microphone = Some(microphone);
        *self.pipeline.get_mut() = None;
        self
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn estimator(&self) -> Arc<PitchEstimator> {
        self.estimator.clone()
    }

    /// Current state.
    pub fn snapshot(&self) -> TunerState {
        self.shared.state.lock().clone()
    }

    /// Receive a snapshot after every state change, starting with the
    /// current one. Slow receivers miss snapshots rather than stall the
    /// tuner; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<TunerState> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_CAPACITY);
        let state = self.shared.state.lock();
        let _ = tx.try_send(state.clone());
        self.shared.listeners.lock().push(tx);
        rx
    }

    // ─── Selection ──────────────────────────────────────────────────────────

    /// Select string `index` manually. Turns auto-detect off.
    pub fn select_string(&self, index: usize) -> Result<(), TunerError> {
        self.shared.update(|s| {
            s.check_string(index)?;
            s.selected_string = index;
            s.auto_detect = false;
            Ok(())
        })
    }

    /// Select a chromatic target note manually. Turns auto-detect off.
    pub fn select_note(&self, note: i32) -> Result<(), TunerError> {
        if !notes::in_range(note) {
            return Err(TunerError::InvalidNote(note));
        }
        self.shared.update(|s| {
            if note != s.selected_note {
                s.note_tuned = false;
            }
            s.selected_note = note;
            s.auto_detect = false;
        });
        Ok(())
    }

    pub fn set_auto_detect(&self, enabled: bool) {
        self.shared.update(|s| s.auto_detect = enabled);
    }

    /// Switch between chromatic and instrument mode. All tuned flags reset.
    pub fn set_chromatic(&self, enabled: bool) {
        self.shared.update(|s| {
            s.tuned.iter_mut().for_each(|t| *t = false);
            s.note_tuned = false;
            s.chromatic = enabled;
        });
    }

    // ─── Tuning ─────────────────────────────────────────────────────────────

    /// Replace the tuning. Leaves chromatic mode. Tuned flags survive only
    /// for strings whose root is unchanged at the same index, and only if
    /// the string count is the same.
    pub fn set_tuning(&self, tuning: Tuning) {
        self.shared.update(|s| {
            if s.chromatic {
                s.chromatic = false;
                s.note_tuned = false;
            }
            s.tuned = if tuning.num_strings() == s.num_strings() {
                (0..tuning.num_strings())
                    .map(|i| s.tuned[i] && tuning.string(i) == s.tuning.string(i))
                    .collect()
            } else {
                vec![false; tuning.num_strings()]
            };
            s.selected_string = s.selected_string.min(tuning.num_strings() - 1);
            info!("Tuning: {} ({})", tuning, tuning.full_string());
            s.tuning = tuning;
        });
    }

    /// Transpose every string up a semitone. Returns false (and changes
    /// nothing) if the highest string is already at `HIGHEST_NOTE`.
    pub fn tune_up(&self) -> bool {
        self.shared.update(|s| {
            if s.tuning.max().root >= HIGHEST_NOTE {
                return false;
            }
            s.tuning = s.tuning.higher();
            s.tuned.iter_mut().for_each(|t| *t = false);
            true
        })
    }

    /// Transpose every string down a semitone. Returns false (and changes
    /// nothing) if the lowest string is already at `LOWEST_NOTE`.
    pub fn tune_down(&self) -> bool {
        self.shared.update(|s| {
            if s.tuning.min().root <= LOWEST_NOTE {
                return false;
            }
            s.tuning = s.tuning.lower();
            s.tuned.iter_mut().for_each(|t| *t = false);
            true
        })
    }

    /// Raise one string a semitone. `Ok(false)` if it is already at the top
    /// of the range.
    pub fn tune_string_up(&self, index: usize) -> Result<bool, TunerError> {
        self.shift_string(index, 1)
    }

    /// Lower one string a semitone. `Ok(false)` if it is already at the
    /// bottom of the range.
    pub fn tune_string_down(&self, index: usize) -> Result<bool, TunerError> {
        self.shift_string(index, -1)
    }

    fn shift_string(&self, index: usize, step: i32) -> Result<bool, TunerError> {
        self.shared.update(|s| {
            s.check_string(index)?;
            let Some(current) = s.tuning.string(index) else {
                return Ok(false);
            };
            let shifted = if step > 0 { current.higher() } else { current.lower() };
            if !notes::in_range(shifted.root) {
                return Ok(false);
            }
            let Some(tuning) = s.tuning.with_string(index, shifted) else {
                return Ok(false);
            };
            s.tuning = tuning;
            s.tuned[index] = false;
            Ok(true)
        })
    }

    // ─── Tuned flags and reference ──────────────────────────────────────────

    /// Mark the current target in or out of tune. In chromatic mode this is
    /// the selected note and `string` is ignored; otherwise it is `string`,
    /// or the selected string when None.
    pub fn set_tuned(&self, string: Option<usize>, tuned: bool) -> Result<(), TunerError> {
        self.shared.update(|s| {
            if s.chromatic {
                s.note_tuned = tuned;
                return Ok(());
            }
            let index = string.unwrap_or(s.selected_string);
            s.check_string(index)?;
            s.tuned[index] = tuned;
            Ok(())
        })
    }

    /// Change the A4 reference. Takes effect from the next frame; stored
    /// note indices are not touched.
    pub fn set_reference_pitch(&self, a4_pitch: f64) -> Result<(), TunerError> {
        if !(a4_pitch.is_finite() && a4_pitch > 0.0) {
            return Err(TunerError::InvalidReferencePitch(a4_pitch));
        }
        self.shared.update(|s| {
            s.a4_pitch = a4_pitch;
            self.estimator.set_reference_pitch(a4_pitch);
        });
        info!("Reference pitch: A4 = {:.1} Hz", a4_pitch);
        Ok(())
    }

    /// Feed one estimator result into the state machine. Called by the
    /// acquisition thread while running; callable directly for testing or
    /// for driving the tuner from another pitch source.
    pub fn process_pitch(&self, result: PitchResult) {
        self.shared.update(|s| s.apply_pitch(result));
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Start listening. `permission` is consulted once, synchronously.
    /// Blocks until the microphone is open and returns the negotiated format.
    pub fn start(&self, permission: impl Fn() -> bool) -> Result<StreamFormat, TunerError> {
        let mut pipeline = self.pipeline.lock();
        if pipeline.as_ref().map(|p| p.is_running()).unwrap_or(false) {
            return Err(TunerError::AlreadyRunning);
        }
        if !permission() {
            warn!("Microphone permission not granted");
            return Err(TunerError::PermissionDenied);
        }

        {
            // Marked running before the producer exists so its end/error
            // hooks always land after this.
            let mut state = self.shared.state.lock();
            state.running = true;
            state.error = None;
        }

        let started = match &self.microphone {
            None => Err(TunerError::Device(DeviceError::NoDevice)),
            Some(mic) => {
                let p = pipeline.get_or_insert_with(|| {
                    let p = AcquisitionPipeline::new(mic.clone());
                    p.add_processor(PitchTracker {
                        estimator: self.estimator.clone(),
                        shared: self.shared.clone(),
                    });
                    p
                });
                p.start(self.config.sample_rate, self.config.buffer_size)
            }
        };

        match started {
            Ok(format) => {
                self.estimator.set_sample_rate(format.sample_rate);
                let state = self.shared.state.lock();
                self.shared.publish(&state);
                info!("Tuner started");
                Ok(format)
            }
            Err(e) => {
                self.shared.update(|s| {
                    s.running = false;
                    s.error = Some(e.clone());
                });
                Err(e)
            }
        }
    }

    /// Stop listening and release the microphone. No-op when stopped.
    pub fn stop(&self) {
        let mut pipeline = self.pipeline.lock();
        if let Some(p) = pipeline.as_mut() {
            p.stop();
        }
        self.shared.update(|s| {
            if s.running {
                info!("Tuner stopped");
            }
            s.running = false;
            s.note_offset = None;
            s.frequency = None;
        });
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.stop();
    }
}
