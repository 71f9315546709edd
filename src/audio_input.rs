use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, Stream, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{error, info, warn};
use std::time::Duration;

use crate::acquisition::{Capture, InputStream, Microphone};
use crate::error::DeviceError;
use crate::types::{AudioFrame, SessionClock};

/// How long `read_frame` waits for callback data before reporting `Pending`.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Live capture from the default input device via cpal.
///
/// The device is opened on the calling (producer) thread; cpal's realtime
/// callback mixes every buffer to mono f32 and forwards it over a bounded
/// channel, and `read_frame` re-chunks that into frames of exactly
/// `buffer_size` samples.
#[derive(Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Box<dyn InputStream>, DeviceError> {
        let host = cpal::default_host();

        let device = host.default_input_device().ok_or(DeviceError::NoDevice)?;

        info!(
            "Audio input: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::Backend(format!("no supported input config: {e}")))?;

        // Prefer the requested rate if any range with the default channel
        // count covers it; fall back to the device default if not.
        let preferred = cpal::SampleRate(sample_rate);
        let covering = device.supported_input_configs().ok().and_then(|configs| {
            configs
                .filter(|c| {
                    c.channels() == supported.channels()
                        && c.min_sample_rate() <= preferred
                        && c.max_sample_rate() >= preferred
                })
                .max_by_key(|c| c.max_sample_rate())
                .map(|c| c.with_sample_rate(preferred))
        });
        let chosen = covering.unwrap_or(supported);

        // The device's smallest callback buffer bounds the frame size we can
        // ask for.
        if let SupportedBufferSize::Range { min, .. } = chosen.buffer_size() {
            let min = *min as usize;
            if buffer_size < min {
                return Err(DeviceError::BufferSizeRejected {
                    requested: buffer_size,
                    required: Some(min),
                });
            }
        }

        let format = chosen.sample_format();
        let actual_rate = chosen.sample_rate().0;
        let mut config: StreamConfig = chosen.into();
        config.buffer_size = BufferSize::Default;
        let channels = config.channels as usize;

        if actual_rate != sample_rate {
            warn!(
                "Requested {}Hz not supported, capturing at {}Hz",
                sample_rate, actual_rate
            );
        }
        info!(
            "Capture config: {}Hz  {} ch  {:?}  frame {} samples",
            actual_rate, channels, format, buffer_size
        );

        // Realtime callback → producer thread. try_send never blocks the
        // callback; a full channel drops audio rather than stalling it.
        let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<f32>>(64);
        let (err_tx, err_rx) = crossbeam_channel::bounded::<String>(1);

        let err_fn = move |e: cpal::StreamError| {
            error!("Audio stream error: {e}");
            let _ = err_tx.try_send(e.to_string());
        };

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let _ = raw_tx.try_send(mix_mono_f32(data, channels));
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let _ = raw_tx.try_send(mix_mono_i16(data, channels));
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let _ = raw_tx.try_send(mix_mono_u16(data, channels));
                },
                err_fn,
                None,
            ),
            fmt => {
                return Err(DeviceError::UnsupportedFormat(format!(
                    "{fmt:?}; use an F32, I16 or U16 device"
                )))
            }
        }
        .map_err(|e| DeviceError::Backend(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            raw_rx,
            err_rx,
            accum: Vec::with_capacity(buffer_size * 2),
            sample_rate: actual_rate,
            buffer_size,
            clock: SessionClock::new(),
        }))
    }
}

struct CpalStream {
    stream: Option<Stream>,
    raw_rx: Receiver<Vec<f32>>,
    err_rx: Receiver<String>,
    accum: Vec<f32>,
    sample_rate: u32,
    buffer_size: usize,
    clock: SessionClock,
}

impl InputStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn read_frame(&mut self) -> Result<Capture, DeviceError> {
        if let Ok(msg) = self.err_rx.try_recv() {
            return Err(DeviceError::Backend(msg));
        }
        while self.accum.len() < self.buffer_size {
            match self.raw_rx.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.accum.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(Capture::Pending),
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::StreamClosed),
            }
        }
        let samples: Vec<f32> = self.accum.drain(..self.buffer_size).collect();
        Ok(Capture::Frame(AudioFrame {
            timestamp_us: self.clock.now_us(),
            samples,
            sample_rate: self.sample_rate,
        }))
    }

    fn close(&mut self) {
        // Dropping the cpal stream stops the callback and releases the device.
        if self.stream.take().is_some() {
            info!("Audio input closed");
        }
    }
}

// ─── Per-format mono mixdown helpers ─────────────────────────────────────────

fn mix_mono_f32(data: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn mix_mono_i16(data: &[i16], channels: usize) -> Vec<f32> {
    const SCALE: f32 = i16::MAX as f32;
    if channels == 1 {
        return data.iter().map(|&s| s as f32 / SCALE).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            sum as f32 / (channels as f32 * SCALE)
        })
        .collect()
}

fn mix_mono_u16(data: &[u16], channels: usize) -> Vec<f32> {
    // U16: 0 = -1.0, 32768 = 0.0, 65535 = +1.0
    const MID: f32 = 32768.0;
    if channels == 1 {
        return data.iter().map(|&s| (s as f32 - MID) / MID).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| (s as f32 - MID) / MID).sum();
            sum / channels as f32
        })
        .collect()
}
