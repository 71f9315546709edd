use crate::acquisition::{Capture, InputStream, Microphone};
use crate::error::DeviceError;
use crate::types::*;
use hound::{SampleFormat, WavReader};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// A WAV file played back as a microphone.
///
/// Intended for testing without a live input: record yourself playing and
/// run the recording through the full tuner pipeline. Frames are yielded
/// at the file's own sample rate; a trailing partial frame is dropped.
///
/// Typical use: `--wav my_playing.wav`, paced in real time; add `--fast` to
/// analyse as fast as frames can be processed.
pub struct WavMicrophone {
    path: PathBuf,
    realtime: bool,
    looping: bool,
}

impl WavMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: false,
            looping: false,
        }
    }

    /// Pace frames to wall-clock time instead of delivering them as fast as
    /// the pipeline consumes them.
    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    /// Restart from the beginning instead of ending.
    pub fn with_looping(mut self, enabled: bool) -> Self {
        self.looping = enabled;
        self
    }
}

/// Read a WAV file and mix it down to mono f32. Returns (samples, sample_rate).
pub fn read_mono(path: &Path) -> Result<(Vec<f32>, u32), DeviceError> {
    let reader = WavReader::open(path)
        .map_err(|e| DeviceError::Backend(format!("cannot open {:?}: {}", path, e)))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels.max(1) as usize;

    info!(
        "WAV: {:?}  {} Hz  {} ch  {:?}  {} bit",
        path.file_name().unwrap_or_default(),
        sample_rate,
        channels,
        spec.sample_format,
        spec.bits_per_sample,
    );

    let decode_err = |e: hound::Error| DeviceError::Backend(format!("WAV decode error: {}", e));
    let samples_f32: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
    };

    let mono: Vec<f32> = if channels == 1 {
        samples_f32
    } else {
        samples_f32
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    info!(
        "WAV: {:.2}s, {} samples",
        mono.len() as f64 / sample_rate.max(1) as f64,
        mono.len()
    );
    Ok((mono, sample_rate))
}

impl Microphone for WavMicrophone {
    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Box<dyn InputStream>, DeviceError> {
        if buffer_size == 0 {
            return Err(DeviceError::BufferSizeRejected {
                requested: 0,
                required: None,
            });
        }
        let (samples, file_rate) = read_mono(&self.path)?;
        if file_rate != sample_rate {
            warn!(
                "WAV sample rate is {} Hz (requested {} Hz); analysing at the file's rate",
                file_rate, sample_rate
            );
        }
        Ok(Box::new(WavStream {
            samples,
            sample_rate: file_rate,
            buffer_size,
            pos: 0,
            emitted: 0,
            looping: self.looping,
            pacing: self.realtime.then(SessionClock::new),
        }))
    }
}

struct WavStream {
    samples: Vec<f32>,
    sample_rate: u32,
    buffer_size: usize,
    pos: usize,
    /// Samples delivered so far, across loops.
    emitted: u64,
    looping: bool,
    pacing: Option<SessionClock>,
}

impl WavStream {
    fn stream_time_us(&self) -> u64 {
        self.emitted * 1_000_000 / self.sample_rate.max(1) as u64
    }
}

impl InputStream for WavStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn read_frame(&mut self) -> Result<Capture, DeviceError> {
        if self.pos + self.buffer_size > self.samples.len() {
            if self.looping && self.samples.len() >= self.buffer_size {
                self.pos = 0;
            } else {
                return Ok(Capture::Ended);
            }
        }

        let timestamp_us = self.stream_time_us();
        if let Some(clock) = &self.pacing {
            // Wait until this frame would have finished recording.
            let due = timestamp_us + self.buffer_size as u64 * 1_000_000 / self.sample_rate.max(1) as u64;
            let now = clock.now_us();
            if now < due {
                thread::sleep(Duration::from_micros(due - now));
            }
        }

        let end = self.pos + self.buffer_size;
        let samples = self.samples[self.pos..end].to_vec();
        self.pos = end;
        self.emitted += self.buffer_size as u64;

        Ok(Capture::Frame(AudioFrame {
            timestamp_us,
            samples,
            sample_rate: self.sample_rate,
        }))
    }

    fn close(&mut self) {
        info!(
            "WAV playback closed at {:.2}s",
            self.emitted as f64 / self.sample_rate.max(1) as f64
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::sine_wave;
    use hound::{WavSpec, WavWriter};

    fn write_stereo_wav(path: &Path, samples: &[f32], sr: u32) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: sr,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            let v = (s * i16::MAX as f32) as i16;
            w.write_sample(v).unwrap();
            w.write_sample(v).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_read_mono_mixes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let tone = sine_wave(110.0, 0.5, 22050, 200);
        write_stereo_wav(&path, &tone, 22050);

        let (mono, sr) = read_mono(&path).unwrap();
        assert_eq!(sr, 22050);
        assert_eq!(mono.len(), tone.len());
        let max_err = mono
            .iter()
            .zip(&tone)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "16-bit round trip error {}", max_err);
    }

    #[test]
    fn test_frames_then_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        // 1000ms at 8kHz = 8000 samples → 3 full frames of 2048, remainder dropped
        write_stereo_wav(&path, &sine_wave(220.0, 0.5, 8000, 1000), 8000);

        let mut stream = WavMicrophone::new(&path).open(44100, 2048).unwrap();
        assert_eq!(stream.sample_rate(), 8000);
        let mut stamps = Vec::new();
        loop {
            match stream.read_frame().unwrap() {
                Capture::Frame(f) => {
                    assert_eq!(f.samples.len(), 2048);
                    stamps.push(f.timestamp_us);
                }
                Capture::Pending => {}
                Capture::Ended => break,
            }
        }
        assert_eq!(stamps, vec![0, 256_000, 512_000]);
    }

    #[test]
    fn test_looping_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_stereo_wav(&path, &sine_wave(220.0, 0.5, 8000, 300), 8000);

        let mut stream = WavMicrophone::new(&path)
            .with_looping(true)
            .open(8000, 1024)
            .unwrap();
        for _ in 0..10 {
            assert!(matches!(stream.read_frame().unwrap(), Capture::Frame(_)));
        }
    }

    #[test]
    fn test_missing_file_is_device_error() {
        let err = WavMicrophone::new("/nonexistent/never.wav")
            .open(44100, 4096)
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::Backend(_)), "got {:?}", err);
    }
}
