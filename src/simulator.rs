use crate::acquisition::{Capture, InputStream, Microphone};
use crate::error::DeviceError;
use crate::notes::pitch_of;
use crate::tuning::Tuning;
use crate::types::*;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::thread;
use std::time::Duration;

/// Every stream opened from the same microphone hears the same noise.
const NOISE_SEED: u64 = 0x2545_f491_4f6c_dd1d;

/// A synthetic microphone that plays a scripted sequence of tones.
///
/// Exercises the full tuner pipeline without any hardware. Audio is rendered
/// from a monotonic sample counter and a running phase, so frames stitch
/// together without discontinuities and glides sweep smoothly.
pub struct ToneMicrophone {
    script: Vec<ToneStep>,
    /// Relative amplitude of each harmonic, index 0 = fundamental.
    partials: Vec<f64>,
    amplitude: f32,
    noise: f32,
    realtime: bool,
    /// Emulate a device with a minimum frame size.
    min_buffer_size: Option<usize>,
}

/// One step of a tone script.
#[derive(Debug, Clone, PartialEq)]
pub enum ToneStep {
    Silence { ms: u32 },
    Tone { freq: f64, ms: u32 },
    /// Eased sweep from one frequency to another.
    Glide { from: f64, to: f64, ms: u32 },
}

impl ToneStep {
    pub fn ms(&self) -> u32 {
        match *self {
            ToneStep::Silence { ms } | ToneStep::Tone { ms, .. } | ToneStep::Glide { ms, .. } => ms,
        }
    }
}

impl ToneMicrophone {
    pub fn new(script: Vec<ToneStep>) -> Self {
        Self {
            script,
            partials: vec![1.0, 0.4, 0.2],
            amplitude: 0.5,
            noise: 0.0,
            realtime: false,
            min_buffer_size: None,
        }
    }

    pub fn with_partials(mut self, partials: Vec<f64>) -> Self {
        self.partials = partials;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Add uniform white noise of the given peak amplitude.
    pub fn with_noise(mut self, amplitude: f32) -> Self {
        self.noise = amplitude;
        self
    }

    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    /// Reject frame sizes below `size` the way a real device would.
    pub fn with_min_buffer_size(mut self, size: usize) -> Self {
        self.min_buffer_size = Some(size);
        self
    }

    /// Script length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.script.iter().map(|s| s.ms() as u64).sum()
    }
}

impl Microphone for ToneMicrophone {
    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Box<dyn InputStream>, DeviceError> {
        if let Some(min) = self.min_buffer_size {
            if buffer_size < min {
                return Err(DeviceError::BufferSizeRejected {
                    requested: buffer_size,
                    required: Some(min),
                });
            }
        }
        if sample_rate == 0 || buffer_size == 0 {
            return Err(DeviceError::UnsupportedFormat(format!(
                "{}Hz / {} samples",
                sample_rate, buffer_size
            )));
        }

        let mut start = 0u64;
        let steps = self
            .script
            .iter()
            .map(|step| {
                let len = step.ms() as u64 * sample_rate as u64 / 1000;
                let placed = (start, len, step.clone());
                start += len;
                placed
            })
            .collect();

        info!(
            "Tone source: {} steps, {:.1}s at {}Hz",
            self.script.len(),
            start as f64 / sample_rate as f64,
            sample_rate
        );

        let norm: f64 = self.partials.iter().map(|a| a.abs()).sum::<f64>().max(1e-9);
        Ok(Box::new(ToneStream {
            steps,
            total: start,
            step_idx: 0,
            phase: 0.0,
            sample_counter: 0,
            partials: self.partials.iter().map(|a| a / norm).collect(),
            amplitude: self.amplitude as f64,
            noise: self.noise as f64,
            rng: StdRng::seed_from_u64(NOISE_SEED),
            sample_rate,
            buffer_size,
            pacing: self.realtime.then(SessionClock::new),
        }))
    }
}

struct ToneStream {
    /// (start sample, length in samples, step)
    steps: Vec<(u64, u64, ToneStep)>,
    total: u64,
    step_idx: usize,
    phase: f64,
    /// Monotonic sample counter; drives step lookup and timestamps.
    sample_counter: u64,
    partials: Vec<f64>,
    amplitude: f64,
    noise: f64,
    rng: StdRng,
    sample_rate: u32,
    buffer_size: usize,
    pacing: Option<SessionClock>,
}

impl ToneStream {
    fn next_sample(&mut self) -> f32 {
        let n = self.sample_counter;
        self.sample_counter += 1;

        while self.step_idx < self.steps.len() {
            let (start, len, _) = self.steps[self.step_idx];
            if n < start + len {
                break;
            }
            self.step_idx += 1;
        }
        let Some((start, len, step)) = self.steps.get(self.step_idx) else {
            return 0.0;
        };

        let freq = match *step {
            ToneStep::Silence { .. } => None,
            ToneStep::Tone { freq, .. } => Some(freq),
            ToneStep::Glide { from, to, .. } => {
                let t = (n - start) as f64 / (*len).max(1) as f64;
                Some(lerp(from, to, smoothstep(t)))
            }
        };

        let mut value = 0.0;
        if let Some(f) = freq {
            self.phase = (self.phase + 2.0 * PI * f / self.sample_rate as f64) % (2.0 * PI);
            value = self
                .partials
                .iter()
                .enumerate()
                .map(|(k, a)| a * ((k + 1) as f64 * self.phase).sin())
                .sum::<f64>()
                * self.amplitude;
        }
        if self.noise > 0.0 {
            value += self.noise * self.rng.random_range(-1.0..=1.0_f64);
        }
        value as f32
    }

    fn time_us(&self, samples: u64) -> u64 {
        samples * 1_000_000 / self.sample_rate as u64
    }
}

impl InputStream for ToneStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn read_frame(&mut self) -> Result<Capture, DeviceError> {
        if self.sample_counter + self.buffer_size as u64 > self.total {
            return Ok(Capture::Ended);
        }

        let timestamp_us = self.time_us(self.sample_counter);
        if let Some(clock) = &self.pacing {
            let due = self.time_us(self.sample_counter + self.buffer_size as u64);
            let now = clock.now_us();
            if now < due {
                thread::sleep(Duration::from_micros(due - now));
            }
        }

        let samples = (0..self.buffer_size).map(|_| self.next_sample()).collect();
        Ok(Capture::Frame(AudioFrame {
            timestamp_us,
            samples,
            sample_rate: self.sample_rate,
        }))
    }
}

/// Demo script: each string of `tuning`, lowest first, plucked 40 cents
/// sharp and eased down into tune, held, then released.
pub fn demo_script(tuning: &Tuning, a4_pitch: f64) -> Vec<ToneStep> {
    let mut script = vec![ToneStep::Silence { ms: 500 }];
    for s in tuning.strings().iter().rev() {
        let target = pitch_of(s.root, a4_pitch);
        let sharp = target * 2.0_f64.powf(0.4 / 12.0);
        script.push(ToneStep::Tone {
            freq: sharp,
            ms: 600,
        });
        script.push(ToneStep::Glide {
            from: sharp,
            to: target,
            ms: 800,
        });
        script.push(ToneStep::Tone {
            freq: target,
            ms: 1500,
        });
        script.push(ToneStep::Silence { ms: 400 });
    }
    script
}

// ─── Math helpers ───────────────────────────────────────────────────────────

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Smooth interpolation (ease in/out)
fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
