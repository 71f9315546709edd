use crate::error::{DeviceError, TunerError};
use crate::types::*;
use crossbeam_channel::bounded;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Upper bound on distinct buffer sizes tried while opening a device.
const MAX_NEGOTIATION_ATTEMPTS: usize = 8;

// ─── Source seams ───────────────────────────────────────────────────────────

/// Outcome of one `InputStream::read_frame` call.
#[derive(Debug)]
pub enum Capture {
    /// A full frame of `buffer_size` samples.
    Frame(AudioFrame),
    /// No full frame yet. The producer checks its stop flag and reads again.
    Pending,
    /// Finite source exhausted (file or script end).
    Ended,
}

/// Something that can be opened as a fixed-frame audio stream.
pub trait Microphone: Send + Sync {
    /// Open at the requested rate and frame size. A device that cannot use
    /// `buffer_size` answers `DeviceError::BufferSizeRejected` with the size
    /// it needs, if it knows one.
    fn open(&self, sample_rate: u32, buffer_size: usize)
        -> Result<Box<dyn InputStream>, DeviceError>;
}

/// An open capture stream. Lives on the producer thread only.
pub trait InputStream {
    fn sample_rate(&self) -> u32;

    fn buffer_size(&self) -> usize;

    /// Read the next frame. Should return within ~100ms (`Pending` if
    /// nothing is ready) so `stop()` is honoured promptly.
    fn read_frame(&mut self) -> Result<Capture, DeviceError>;

    /// Release the device. Called once, on the producer thread.
    fn close(&mut self) {}
}

/// Consumer of captured frames, called on the producer thread.
///
/// The frame is only borrowed for the duration of `process`; copy what you
/// need to keep. Blocking here stalls acquisition.
pub trait FrameProcessor: Send {
    fn process(&mut self, frame: &AudioFrame);

    /// The stream failed mid-run; no more frames will follow.
    fn on_error(&mut self, _error: &DeviceError) {}

    /// A finite source reached its end; no more frames will follow.
    fn on_end(&mut self) {}
}

impl<F> FrameProcessor for F
where
    F: FnMut(&AudioFrame) + Send,
{
    fn process(&mut self, frame: &AudioFrame) {
        self(frame)
    }
}

// ─── Buffer negotiation ─────────────────────────────────────────────────────

/// Sample rate that keeps the frame duration of `base_rate`/`base_buffer`
/// when the frame holds `buffer_size` samples.
pub fn scale_sample_rate(base_rate: u32, base_buffer: usize, buffer_size: usize) -> u32 {
    if base_buffer == 0 {
        return base_rate;
    }
    (base_rate as f64 * buffer_size as f64 / base_buffer as f64).round() as u32
}

/// Open `microphone`, retrying once for every distinct buffer size the
/// device reports it needs. A size that was already tried, or a rejection
/// with no size, ends the negotiation with that error.
pub fn negotiate(
    microphone: &dyn Microphone,
    sample_rate: u32,
    buffer_size: usize,
) -> Result<Box<dyn InputStream>, DeviceError> {
    let mut tried = vec![buffer_size];
    let (mut rate, mut size) = (sample_rate, buffer_size);
    loop {
        let err = match microphone.open(rate, size) {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };
        let Some(required) = err.required_buffer_size() else {
            return Err(err);
        };
        if tried.contains(&required) || tried.len() >= MAX_NEGOTIATION_ATTEMPTS {
            error!(
                "Device keeps rejecting buffer size {} (asks for {}), giving up",
                size, required
            );
            return Err(err);
        }
        rate = scale_sample_rate(sample_rate, buffer_size, required);
        warn!(
            "Device rejected buffer size {}; retrying with {} samples at {}Hz",
            size, required, rate
        );
        tried.push(required);
        size = required;
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    format: StreamFormat,
}

/// Producer thread that reads fixed-size frames from a `Microphone` and
/// hands each one to every registered processor, in registration order,
/// before reading the next.
///
/// At most one producer runs per pipeline. `stop()` joins it, so the device
/// is released by the time `stop()` returns.
pub struct AcquisitionPipeline {
    microphone: Arc<dyn Microphone>,
    processors: Arc<Mutex<Vec<Box<dyn FrameProcessor>>>>,
    worker: Option<Worker>,
}

impl AcquisitionPipeline {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            processors: Arc::new(Mutex::new(Vec::new())),
            worker: None,
        }
    }

    /// Register a processor. Takes effect from the next frame.
    pub fn add_processor(&self, processor: impl FrameProcessor + 'static) {
        self.processors.lock().push(Box::new(processor));
    }

    pub fn clear_processors(&self) {
        self.processors.lock().clear();
    }

    /// True while the producer thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Format negotiated by the current (or last finished) run.
    pub fn format(&self) -> Option<StreamFormat> {
        self.worker.as_ref().map(|w| w.format)
    }

    /// Spawn the producer and open the device on it. Blocks until the
    /// device is open (or negotiation failed) and returns the format in
    /// effect.
    pub fn start(&mut self, sample_rate: u32, buffer_size: usize) -> Result<StreamFormat, TunerError> {
        if let Some(worker) = self.worker.take() {
            if !worker.handle.is_finished() {
                self.worker = Some(worker);
                return Err(TunerError::AlreadyRunning);
            }
            // Source ended or failed on its own; reap it.
            let _ = worker.handle.join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<StreamFormat, DeviceError>>(1);

        let microphone = self.microphone.clone();
        let processors = self.processors.clone();
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("audio-dispatcher".into())
            .spawn(move || {
                let mut stream = match negotiate(microphone.as_ref(), sample_rate, buffer_size) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let format = StreamFormat {
                    sample_rate: stream.sample_rate(),
                    buffer_size: stream.buffer_size(),
                };
                if ready_tx.send(Ok(format)).is_err() {
                    stream.close();
                    return;
                }
                dispatch(stream.as_mut(), &processors, &stop_flag);
                stream.close();
            })
            .map_err(|e| DeviceError::Backend(format!("cannot spawn audio thread: {e}")))?;

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::Backend("audio thread exited early".into())));

        match outcome {
            Ok(format) => {
                info!(
                    "Acquisition started: {}Hz, {} samples/frame ({:.1}ms)",
                    format.sample_rate,
                    format.buffer_size,
                    format.buffer_size as f64 * 1000.0 / format.sample_rate.max(1) as f64
                );
                self.worker = Some(Worker {
                    handle,
                    stop,
                    format,
                });
                Ok(format)
            }
            Err(e) => {
                let _ = handle.join();
                error!("Acquisition failed to start: {}", e);
                Err(TunerError::Device(e))
            }
        }
    }

    /// Stop the producer and wait for it to exit. No-op when not running.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                error!("Audio dispatcher panicked");
            }
            info!("Acquisition stopped");
        }
    }
}

impl Drop for AcquisitionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer loop: read, fan out, repeat until stopped or the source ends.
fn dispatch(
    stream: &mut dyn InputStream,
    processors: &Mutex<Vec<Box<dyn FrameProcessor>>>,
    stop: &AtomicBool,
) {
    let mut frame_count: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        match stream.read_frame() {
            Ok(Capture::Frame(frame)) => {
                for p in processors.lock().iter_mut() {
                    p.process(&frame);
                }
                frame_count += 1;
                if frame_count % 100 == 0 {
                    debug!("Dispatcher: {} frames processed", frame_count);
                }
            }
            Ok(Capture::Pending) => {}
            Ok(Capture::Ended) => {
                info!("Audio source ended after {} frames", frame_count);
                for p in processors.lock().iter_mut() {
                    p.on_end();
                }
                return;
            }
            Err(e) => {
                error!("Audio stream failed after {} frames: {}", frame_count, e);
                for p in processors.lock().iter_mut() {
                    p.on_error(&e);
                }
                return;
            }
        }
    }
    debug!("Dispatcher stopping after {} frames", frame_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Opens only for buffers of at least `min_buffer`; yields `frames`
    /// silent frames (forever when None) and records lifecycle calls.
    struct FakeMic {
        min_buffer: usize,
        frames: Option<usize>,
        fail_after: Option<usize>,
        opens: Arc<Mutex<Vec<(u32, usize)>>>,
        closed: Arc<AtomicBool>,
    }

    impl FakeMic {
        fn new(min_buffer: usize, frames: Option<usize>) -> Self {
            Self {
                min_buffer,
                frames,
                fail_after: None,
                opens: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct FakeStream {
        sample_rate: u32,
        buffer_size: usize,
        remaining: Option<usize>,
        fail_after: Option<usize>,
        produced: usize,
        closed: Arc<AtomicBool>,
    }

    impl Microphone for FakeMic {
        fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Box<dyn InputStream>, DeviceError> {
            self.opens.lock().push((sample_rate, buffer_size));
            if buffer_size < self.min_buffer {
                return Err(DeviceError::BufferSizeRejected {
                    requested: buffer_size,
                    required: Some(self.min_buffer),
                });
            }
            Ok(Box::new(FakeStream {
                sample_rate,
                buffer_size,
                remaining: self.frames,
                fail_after: self.fail_after,
                produced: 0,
                closed: self.closed.clone(),
            }))
        }
    }

    impl InputStream for FakeStream {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn buffer_size(&self) -> usize {
            self.buffer_size
        }

        fn read_frame(&mut self) -> Result<Capture, DeviceError> {
            if self.fail_after == Some(self.produced) {
                return Err(DeviceError::StreamClosed);
            }
            match self.remaining {
                Some(0) => return Ok(Capture::Ended),
                Some(ref mut n) => *n -= 1,
                None => thread::sleep(Duration::from_millis(1)),
            }
            self.produced += 1;
            Ok(Capture::Frame(AudioFrame {
                timestamp_us: self.produced as u64,
                samples: vec![0.0; self.buffer_size],
                sample_rate: self.sample_rate,
            }))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn wait_until_finished(p: &AcquisitionPipeline) {
        for _ in 0..500 {
            if !p.is_running() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("producer did not finish");
    }

    #[test]
    fn test_scale_sample_rate_keeps_frame_duration() {
        assert_eq!(scale_sample_rate(44100, 4096, 8192), 88200);
        assert_eq!(scale_sample_rate(44100, 4096, 2048), 22050);
        assert_eq!(scale_sample_rate(44100, 4096, 4800), 51680); // 51679.69 rounds up
    }

    #[test]
    fn test_negotiate_retries_with_required_size() {
        let mic = FakeMic::new(8192, Some(0));
        let stream = negotiate(&mic, 44100, 4096).unwrap();
        assert_eq!(stream.buffer_size(), 8192);
        assert_eq!(stream.sample_rate(), 88200);
        assert_eq!(*mic.opens.lock(), vec![(44100, 4096), (88200, 8192)]);
    }

    #[test]
    fn test_negotiate_without_required_size_fails_at_once() {
        struct Absent;
        impl Microphone for Absent {
            fn open(&self, _: u32, _: usize) -> Result<Box<dyn InputStream>, DeviceError> {
                Err(DeviceError::NoDevice)
            }
        }
        assert_eq!(negotiate(&Absent, 44100, 4096).err(), Some(DeviceError::NoDevice));
    }

    #[test]
    fn test_frames_reach_processors_in_registration_order() {
        let mic = FakeMic::new(0, Some(3));
        let mut p = AcquisitionPipeline::new(Arc::new(mic));
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let log = log.clone();
            p.add_processor(move |f: &AudioFrame| log.lock().push((name, f.timestamp_us)));
        }

        let format = p.start(44100, 256).unwrap();
        assert_eq!(
            format,
            StreamFormat {
                sample_rate: 44100,
                buffer_size: 256
            }
        );
        wait_until_finished(&p);
        assert_eq!(
            *log.lock(),
            vec![
                ("first", 1),
                ("second", 1),
                ("first", 2),
                ("second", 2),
                ("first", 3),
                ("second", 3)
            ]
        );
    }

    #[test]
    fn test_end_and_error_hooks() {
        struct Hooks(Arc<Mutex<Vec<String>>>);
        impl FrameProcessor for Hooks {
            fn process(&mut self, _: &AudioFrame) {}
            fn on_error(&mut self, e: &DeviceError) {
                self.0.lock().push(format!("error: {e}"));
            }
            fn on_end(&mut self) {
                self.0.lock().push("end".into());
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut p = AcquisitionPipeline::new(Arc::new(FakeMic::new(0, Some(2))));
        p.add_processor(Hooks(events.clone()));
        p.start(44100, 64).unwrap();
        wait_until_finished(&p);
        assert_eq!(*events.lock(), vec!["end".to_string()]);

        events.lock().clear();
        let mut mic = FakeMic::new(0, None);
        mic.fail_after = Some(1);
        let mut p = AcquisitionPipeline::new(Arc::new(mic));
        p.add_processor(Hooks(events.clone()));
        p.start(44100, 64).unwrap();
        wait_until_finished(&p);
        assert_eq!(*events.lock(), vec!["error: audio stream closed".to_string()]);
    }

    #[test]
    fn test_second_start_is_rejected_while_running() {
        let mut p = AcquisitionPipeline::new(Arc::new(FakeMic::new(0, None)));
        p.start(44100, 64).unwrap();
        assert_eq!(p.start(44100, 64), Err(TunerError::AlreadyRunning));
        assert!(p.is_running(), "first run must be unaffected");
        p.stop();
        assert!(!p.is_running());
    }

    #[test]
    fn test_stop_joins_and_releases_device() {
        let mic = FakeMic::new(0, None);
        let closed = mic.closed.clone();
        let mut p = AcquisitionPipeline::new(Arc::new(mic));
        let count = Arc::new(Mutex::new(0usize));
        let c = count.clone();
        p.add_processor(move |_: &AudioFrame| *c.lock() += 1);

        p.start(44100, 64).unwrap();
        thread::sleep(Duration::from_millis(20));
        p.stop();
        assert!(closed.load(Ordering::SeqCst), "device must be closed when stop returns");
        let after_stop = *count.lock();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(*count.lock(), after_stop, "no frames after stop");

        // Idempotent
        p.stop();
        p.stop();
    }

    #[test]
    fn test_restart_after_source_ended() {
        let mut p = AcquisitionPipeline::new(Arc::new(FakeMic::new(0, Some(1))));
        p.start(44100, 64).unwrap();
        wait_until_finished(&p);
        assert!(p.start(44100, 64).is_ok(), "finished producer should be reaped");
    }
}
