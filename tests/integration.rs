//! End-to-end tests for the tuner pipeline.
//!
//! These drive the real acquisition thread:
//!   Microphone → audio-dispatcher thread → PitchEstimator → Tuner state → subscriber
//!
//! Sources are scripted (tone simulator, WAV files, mocks) so no audio
//! hardware is needed.

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use string_tuner::acquisition::{Capture, InputStream, Microphone};
use string_tuner::config::TunerConfig;
use string_tuner::error::{DeviceError, TunerError};
use string_tuner::notes::pitch_of;
use string_tuner::presets;
use string_tuner::simulator::{ToneMicrophone, ToneStep};
use string_tuner::sustain::TunedSustain;
use string_tuner::tuner::{Tuner, TunerState};
use string_tuner::tuning::{Instrument, Tuning};
use string_tuner::tuning_file::{self, TuningEntry};
use string_tuner::types::*;
use string_tuner::wav_player::WavMicrophone;

// ─── Helpers ───────────────────────────────────────────────────────────────

fn tuner_with(mic: impl Microphone + 'static, config: TunerConfig) -> Tuner {
    Tuner::new(config).with_microphone(Arc::new(mic))
}

/// Wait for a finite source to run out, then collect every published snapshot.
fn run_to_end(tuner: &Tuner, rx: &Receiver<TunerState>) -> Vec<TunerState> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while tuner.snapshot().running {
        assert!(Instant::now() < deadline, "source did not end");
        thread::sleep(Duration::from_millis(5));
    }
    rx.try_iter().collect()
}

fn pitched(states: &[TunerState]) -> Vec<&TunerState> {
    states.iter().filter(|s| s.note_offset.is_some()).collect()
}

fn write_mono_wav(path: &Path, freq: f64, sr: u32, duration_ms: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sr,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    let n = sr as u64 * duration_ms as u64 / 1000;
    for i in 0..n {
        let t = i as f64 / sr as f64;
        let v = 0.5 * (2.0 * std::f64::consts::PI * freq * t).sin()
            + 0.2 * (4.0 * std::f64::consts::PI * freq * t).sin();
        w.write_sample((v * i16::MAX as f64) as i16).unwrap();
    }
    w.finalize().unwrap();
}

/// Rejects every buffer size, always asking for `required`; records opens.
struct StubbornMic {
    required: usize,
    opens: Arc<Mutex<Vec<(u32, usize)>>>,
}

impl Microphone for StubbornMic {
    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Box<dyn InputStream>, DeviceError> {
        self.opens.lock().push((sample_rate, buffer_size));
        Err(DeviceError::BufferSizeRejected {
            requested: buffer_size,
            required: Some(self.required),
        })
    }
}

/// Yields `good_frames` silent frames, then fails.
struct FlakyMic {
    good_frames: usize,
}

struct FlakyStream {
    left: usize,
    sample_rate: u32,
    buffer_size: usize,
}

impl Microphone for FlakyMic {
    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Box<dyn InputStream>, DeviceError> {
        Ok(Box::new(FlakyStream {
            left: self.good_frames,
            sample_rate,
            buffer_size,
        }))
    }
}

impl InputStream for FlakyStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn read_frame(&mut self) -> Result<Capture, DeviceError> {
        if self.left == 0 {
            return Err(DeviceError::StreamClosed);
        }
        self.left -= 1;
        thread::sleep(Duration::from_millis(2));
        Ok(Capture::Frame(AudioFrame {
            timestamp_us: 0,
            samples: vec![0.0; self.buffer_size],
            sample_rate: self.sample_rate,
        }))
    }
}

// ─── Lifecycle ─────────────────────────────────────────────────────────────

#[test]
fn test_negotiation_gives_up_on_repeated_size() {
    let opens = Arc::new(Mutex::new(Vec::new()));
    let tuner = tuner_with(
        StubbornMic {
            required: 8192,
            opens: opens.clone(),
        },
        TunerConfig::default(),
    );

    let err = tuner.start(|| true).unwrap_err();
    assert_eq!(
        err,
        TunerError::Device(DeviceError::BufferSizeRejected {
            requested: 8192,
            required: Some(8192)
        })
    );
    assert_eq!(*opens.lock(), vec![(44100, 4096), (88200, 8192)]);

    let state = tuner.snapshot();
    assert!(!state.running);
    assert_eq!(state.error, Some(err));
}

#[test]
fn test_negotiated_rate_reaches_estimator() {
    let mic = ToneMicrophone::new(vec![ToneStep::Tone { freq: 110.0, ms: 500 }])
        .with_min_buffer_size(8192);
    let tuner = tuner_with(mic, TunerConfig::default());
    let rx = tuner.subscribe();

    let format = tuner.start(|| true).unwrap();
    assert_eq!(
        format,
        StreamFormat {
            sample_rate: 88200,
            buffer_size: 8192
        }
    );
    assert_eq!(tuner.estimator().bounds().sample_rate, 88200);

    let states = run_to_end(&tuner, &rx);
    let last = pitched(&states).last().copied().cloned().unwrap();
    assert!(
        (last.frequency.unwrap() - 110.0).abs() < 0.5,
        "A2 at 88.2kHz, got {:?}",
        last.frequency
    );
}

#[test]
fn test_permission_and_double_start() {
    let mic = ToneMicrophone::new(vec![ToneStep::Tone { freq: 110.0, ms: 30_000 }])
        .with_realtime(true);
    let tuner = tuner_with(mic, TunerConfig::default());

    assert_eq!(tuner.start(|| false), Err(TunerError::PermissionDenied));
    assert!(!tuner.snapshot().running);

    tuner.start(|| true).unwrap();
    assert_eq!(tuner.start(|| true), Err(TunerError::AlreadyRunning));
    assert!(tuner.snapshot().running);

    tuner.stop();
    let state = tuner.snapshot();
    assert!(!state.running);
    assert_eq!(state.note_offset, None);
}

#[test]
fn test_mid_run_failure_is_reported() {
    let tuner = tuner_with(FlakyMic { good_frames: 3 }, TunerConfig::default());
    let rx = tuner.subscribe();
    tuner.start(|| true).unwrap();

    let states = run_to_end(&tuner, &rx);
    let last = states.last().unwrap();
    assert!(!last.running);
    assert_eq!(
        last.error,
        Some(TunerError::Device(DeviceError::StreamClosed))
    );

    assert!(tuner.start(|| true).is_ok(), "restart after failure");
}

// ─── Detection through the pipeline ────────────────────────────────────────

#[test]
fn test_tone_auto_selects_string() {
    let mic = ToneMicrophone::new(vec![ToneStep::Tone { freq: 110.0, ms: 1500 }]);
    let tuner = tuner_with(mic, TunerConfig::default());
    let rx = tuner.subscribe();
    tuner.start(|| true).unwrap();

    let states = run_to_end(&tuner, &rx);
    let heard = pitched(&states);
    assert!(heard.len() >= 5, "expected most frames pitched, got {}", heard.len());
    for s in &heard {
        assert_eq!(s.selected_string, 4, "A2 is string 5");
        assert!(
            s.note_offset.unwrap().abs() < 0.05,
            "offset {:?}",
            s.note_offset
        );
    }
    assert_eq!(states.last().unwrap().note_offset, None, "cleared at end");
}

#[test]
fn test_chromatic_follows_glide() {
    // G3 sliding up to A3
    let mic = ToneMicrophone::new(vec![
        ToneStep::Tone { freq: pitch_of(-14, 440.0), ms: 600 },
        ToneStep::Glide {
            from: pitch_of(-14, 440.0),
            to: pitch_of(-12, 440.0),
            ms: 400,
        },
        ToneStep::Tone { freq: pitch_of(-12, 440.0), ms: 600 },
    ]);
    let tuner = tuner_with(mic, TunerConfig::default().with_chromatic(true));
    let rx = tuner.subscribe();
    tuner.start(|| true).unwrap();

    let states = run_to_end(&tuner, &rx);
    let notes: Vec<i32> = pitched(&states).iter().map(|s| s.selected_note).collect();
    assert_eq!(notes.first(), Some(&-14));
    assert_eq!(notes.last(), Some(&-12));
    assert!(
        notes.windows(2).all(|w| w[0] <= w[1]),
        "note never goes backwards on a rising glide: {:?}",
        notes
    );
}

#[test]
fn test_wav_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d3.wav");
    write_mono_wav(&path, pitch_of(-19, 440.0), 44100, 1500);

    let tuner = tuner_with(WavMicrophone::new(&path), TunerConfig::default());
    let rx = tuner.subscribe();
    tuner.start(|| true).unwrap();

    let states = run_to_end(&tuner, &rx);
    let heard = pitched(&states);
    assert!(!heard.is_empty());
    for s in heard {
        assert_eq!(s.selected_string, 3, "D3 is string 4");
        assert!(s.note_offset.unwrap().abs() < 0.05);
    }
}

#[test]
fn test_reference_pitch_change_while_running() {
    let a = 432.0;
    let mic = ToneMicrophone::new(vec![ToneStep::Tone { freq: a, ms: 30_000 }])
        .with_realtime(true);
    let tuner = tuner_with(mic, TunerConfig::default().with_chromatic(true));
    tuner.start(|| true).unwrap();
    tuner.set_reference_pitch(a).unwrap();

    // Let a few frames through at the new reference
    thread::sleep(Duration::from_millis(400));
    let s = tuner.snapshot();
    tuner.stop();
    assert_eq!(s.selected_note, 0);
    assert!(s.note_offset.unwrap().abs() < 0.05, "offset {:?}", s.note_offset);
}

// ─── Sustain confirmation ──────────────────────────────────────────────────

#[test]
fn test_held_note_is_confirmed_in_tune() {
    let target = pitch_of(-5, 440.0);
    let mic = ToneMicrophone::new(vec![
        ToneStep::Tone {
            freq: target * 1.02,
            ms: 400,
        },
        ToneStep::Tone { freq: target, ms: 1600 },
    ])
    .with_realtime(true);
    let config = TunerConfig::default();
    let tuner = tuner_with(mic, config.clone());
    tuner.select_string(0).unwrap();
    tuner.start(|| true).unwrap();

    let mut sustain = TunedSustain::new(config.tuned_offset_threshold, config.tuned_sustain());
    let mut saw_sharp = false;
    let mut confirmed = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let state = tuner.snapshot();
        if state.note_offset.map(|o| o > 0.2).unwrap_or(false) {
            saw_sharp = true;
        }
        if sustain.update(&state, Instant::now()) {
            tuner.set_tuned(None, true).unwrap();
            confirmed = true;
        }
        if !state.running {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    assert!(saw_sharp, "2% sharp should read ~0.34 semitones high");
    assert!(confirmed, "sustained in-tune pitch must fire the timer");
    let state = tuner.snapshot();
    assert_eq!(state.tuned, vec![true, false, false, false, false, false]);
}

// ─── Persistence ───────────────────────────────────────────────────────────

#[test]
fn test_config_and_tunings_files() {
    let dir = tempfile::tempdir().unwrap();

    let custom = Tuning::from_symbols(Some("Nashville"), Instrument::Guitar, None, "E4 B3 G4 D4 A3 E3")
        .unwrap();
    let entries = vec![
        TuningEntry::Chromatic,
        TuningEntry::Instrument(presets::dadgad()),
        TuningEntry::Instrument(custom.clone()),
    ];
    let tunings_path = dir.path().join("tunings.json");
    tuning_file::save_tunings(&tunings_path, &entries).unwrap();
    let loaded = tuning_file::load_tunings(&tunings_path).unwrap();
    assert_eq!(loaded, entries);

    let config = TunerConfig::default()
        .with_tuning(loaded[2].tuning().unwrap().clone())
        .with_a4_pitch(442.0);
    let config_path = dir.path().join("tuner.json");
    config.save(&config_path).unwrap();

    let tuner = Tuner::new(TunerConfig::load(&config_path).unwrap());
    let state = tuner.snapshot();
    assert_eq!(state.tuning, custom);
    assert_eq!(state.a4_pitch, 442.0);
    assert_eq!(tuner.estimator().bounds().a4_pitch, 442.0);
}
