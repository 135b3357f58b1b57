//! cpal-backed implementations of the core audio device traits.
//!
//! Each device owns a dedicated thread holding its cpal stream (cpal streams
//! are not `Send`), with lock-free ring buffers between the realtime audio
//! callbacks and everything else. Microphone input is resampled from the
//! device rate to the service's 24 kHz; assistant audio is resampled the
//! other way on its way to the speakers.

use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parlance_core::audio::{
    AudioCapture, AudioPlayback, SERVICE_SAMPLE_RATE, TrackOffset, f32_to_pcm16, pcm16_to_f32,
};
use ringbuf::{HeapRb, traits::{Consumer, Producer, Split}};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Input block size fed through the resampler.
const RESAMPLE_CHUNK: usize = 1024;
/// Output samples retained for the frequency visualization.
const RECENT_WINDOW: usize = 2048;

fn make_resampler(in_rate: f64, out_rate: f64) -> anyhow::Result<FastFixedIn<f32>> {
    FastFixedIn::<f32>::new(
        out_rate / in_rate,
        1.0,
        PolynomialDegree::Cubic,
        RESAMPLE_CHUNK,
        1,
    )
    .context("creating resampler")
}

// ---- capture ---------------------------------------------------------------

struct CaptureShared {
    active: AtomicBool,
    sink: Mutex<Option<mpsc::Sender<Vec<i16>>>>,
}

/// Default-input-device microphone capture.
pub struct CpalCapture {
    shared: Arc<CaptureShared>,
}

impl CpalCapture {
    /// Opens the default input device on a dedicated thread. Fails when no
    /// input device exists or its stream cannot be built.
    pub fn spawn() -> anyhow::Result<Self> {
        let shared = Arc::new(CaptureShared {
            active: AtomicBool::new(false),
            sink: Mutex::new(None),
        });
        let thread_shared = shared.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("parlance-capture".to_string())
            .spawn(move || capture_thread(thread_shared, ready_tx))
            .context("spawning capture thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { shared }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("capture thread exited before reporting readiness")),
        }
    }
}

fn capture_thread(shared: Arc<CaptureShared>, ready_tx: std::sync::mpsc::Sender<anyhow::Result<()>>) {
    let setup = || -> anyhow::Result<(cpal::Stream, ringbuf::HeapCons<f32>, f64)> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device"))?;
        let config = device.default_input_config().context("input config")?;
        let sample_rate = config.sample_rate().0 as f64;
        let channels = config.channels() as usize;

        let rb = HeapRb::<f32>::new(sample_rate as usize * 2);
        let (mut producer, consumer) = rb.split();
        let callback_shared = shared.clone();
        let on_error = |e| warn!(error = %e, "capture stream error");

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    if !callback_shared.active.load(Ordering::Relaxed) {
                        return;
                    }
                    // Mono: take the first channel of each frame.
                    for frame in data.chunks(channels) {
                        let _ = producer.try_push(frame[0]);
                    }
                },
                on_error,
                None,
            )?,
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _| {
                    if !callback_shared.active.load(Ordering::Relaxed) {
                        return;
                    }
                    for frame in data.chunks(channels) {
                        let _ = producer.try_push(frame[0] as f32 / 32768.0);
                    }
                },
                on_error,
                None,
            )?,
            other => return Err(anyhow!("unsupported input sample format {other:?}")),
        };
        stream.play().context("starting input stream")?;
        Ok((stream, consumer, sample_rate))
    };

    let (stream, mut consumer, sample_rate) = match setup() {
        Ok(parts) => {
            let _ = ready_tx.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    // Keep the stream alive for the lifetime of the pump loop below.
    let _stream = stream;

    let mut resampler = match make_resampler(sample_rate, SERVICE_SAMPLE_RATE as f64) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "capture resampler unavailable");
            return;
        }
    };
    let mut pending: Vec<f32> = Vec::with_capacity(RESAMPLE_CHUNK * 2);

    loop {
        std::thread::sleep(Duration::from_millis(10));
        while let Some(sample) = consumer.try_pop() {
            pending.push(sample);
        }
        while pending.len() >= RESAMPLE_CHUNK {
            let chunk: Vec<f32> = pending.drain(..RESAMPLE_CHUNK).collect();
            let resampled = match resampler.process(&[chunk], None) {
                Ok(mut out) => out.remove(0),
                Err(e) => {
                    warn!(error = %e, "capture resample failed");
                    continue;
                }
            };
            let frame = f32_to_pcm16(&resampled);
            let sink = shared.sink.lock().expect("capture sink lock poisoned").clone();
            if let Some(sink) = sink {
                // Drop frames rather than stall the audio thread when the
                // session cannot keep up.
                if sink.try_send(frame).is_err() {
                    debug!("capture frame dropped");
                }
            }
        }
    }
}

impl AudioCapture for CpalCapture {
    fn begin(&self) -> anyhow::Result<()> {
        self.shared.active.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn record(&self, sink: mpsc::Sender<Vec<i16>>) -> anyhow::Result<()> {
        *self.shared.sink.lock().expect("capture sink lock poisoned") = Some(sink);
        self.shared.active.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&self) -> anyhow::Result<()> {
        self.shared.active.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn end(&self) -> anyhow::Result<()> {
        self.shared.active.store(false, Ordering::Relaxed);
        *self.shared.sink.lock().expect("capture sink lock poisoned") = None;
        Ok(())
    }
}

// ---- playback --------------------------------------------------------------

#[derive(Default)]
struct PlaybackQueue {
    /// Device-rate samples waiting for the output callback.
    queue: VecDeque<f32>,
    /// Service-rate samples not yet resampled (partial chunk).
    pending: Vec<f32>,
    track: Option<String>,
    /// Counters in service-rate samples, bounding the reported offset.
    appended: usize,
    played_device: usize,
    recent: VecDeque<f32>,
}

struct PlaybackShared {
    state: Mutex<PlaybackQueue>,
}

/// Default-output-device playback with per-track offset accounting.
pub struct CpalPlayback {
    shared: Arc<PlaybackShared>,
    resampler: Mutex<Option<FastFixedIn<f32>>>,
    device_rate: f64,
    started: AtomicBool,
}

impl CpalPlayback {
    /// Opens the default output device on a dedicated thread.
    pub fn spawn() -> anyhow::Result<Self> {
        let shared = Arc::new(PlaybackShared {
            state: Mutex::new(PlaybackQueue::default()),
        });
        let thread_shared = shared.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("parlance-playback".to_string())
            .spawn(move || playback_thread(thread_shared, ready_tx))
            .context("spawning playback thread")?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow!("playback thread exited before reporting readiness")),
        };

        Ok(Self {
            shared,
            resampler: Mutex::new(None),
            device_rate,
            started: AtomicBool::new(false),
        })
    }

    fn played_service_samples(&self, queue: &PlaybackQueue) -> usize {
        let played =
            (queue.played_device as f64 * SERVICE_SAMPLE_RATE as f64 / self.device_rate) as usize;
        played.min(queue.appended)
    }
}

fn playback_thread(
    shared: Arc<PlaybackShared>,
    ready_tx: std::sync::mpsc::Sender<anyhow::Result<f64>>,
) {
    let setup = || -> anyhow::Result<(cpal::Stream, f64)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"))?;
        let config = device.default_output_config().context("output config")?;
        let sample_rate = config.sample_rate().0 as f64;
        let channels = config.channels() as usize;
        let callback_shared = shared.clone();

        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _| {
                let mut state = callback_shared.state.lock().expect("playback lock poisoned");
                for frame in data.chunks_mut(channels) {
                    let sample = match state.queue.pop_front() {
                        Some(sample) => {
                            state.played_device += 1;
                            sample
                        }
                        None => 0.0,
                    };
                    state.recent.push_back(sample);
                    if state.recent.len() > RECENT_WINDOW {
                        state.recent.pop_front();
                    }
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |e| warn!(error = %e, "playback stream error"),
            None,
        )?;
        stream.play().context("starting output stream")?;
        Ok((stream, sample_rate))
    };

    match setup() {
        Ok((stream, rate)) => {
            let _ = ready_tx.send(Ok(rate));
            // Park forever; the stream lives as long as this thread.
            let _stream = stream;
            loop {
                std::thread::park();
            }
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

impl AudioPlayback for CpalPlayback {
    fn connect(&self) -> anyhow::Result<()> {
        self.started.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn add_pcm16(&self, track_id: &str, frames: &[i16]) {
        let mut resampler_guard = self.resampler.lock().expect("resampler lock poisoned");
        if resampler_guard.is_none() {
            match make_resampler(SERVICE_SAMPLE_RATE as f64, self.device_rate) {
                Ok(r) => *resampler_guard = Some(r),
                Err(e) => {
                    warn!(error = %e, "playback resampler unavailable; dropping audio");
                    return;
                }
            }
        }
        let Some(resampler) = resampler_guard.as_mut() else {
            return;
        };

        let mut state = self.shared.state.lock().expect("playback lock poisoned");
        if state.track.as_deref() != Some(track_id) {
            // New logical track: the previous response is over.
            state.queue.clear();
            state.pending.clear();
            state.appended = 0;
            state.played_device = 0;
            state.track = Some(track_id.to_string());
        }
        state.appended += frames.len();

        let mut input = std::mem::take(&mut state.pending);
        input.extend(pcm16_to_f32(frames));
        while input.len() >= RESAMPLE_CHUNK {
            let chunk: Vec<f32> = input.drain(..RESAMPLE_CHUNK).collect();
            match resampler.process(&[chunk], None) {
                Ok(mut out) => state.queue.extend(out.remove(0)),
                Err(e) => warn!(error = %e, "playback resample failed"),
            }
        }
        state.pending = input;
    }

    fn interrupt(&self) -> Option<TrackOffset> {
        let mut state = self.shared.state.lock().expect("playback lock poisoned");
        let track_id = state.track.take()?;
        let sample_offset = self.played_service_samples(&state);
        state.queue.clear();
        state.pending.clear();
        state.appended = 0;
        state.played_device = 0;
        Some(TrackOffset {
            track_id,
            sample_offset,
        })
    }

    fn frequencies(&self, bins: usize) -> Vec<f32> {
        if bins == 0 {
            return Vec::new();
        }
        let mut state = self.shared.state.lock().expect("playback lock poisoned");
        let recent = state.recent.make_contiguous().to_vec();
        band_magnitudes(&recent, bins)
    }
}

/// Coarse per-band RMS over a recent sample window. Not a spectrum, just
/// enough movement for a level-meter style visualization.
fn band_magnitudes(samples: &[f32], bins: usize) -> Vec<f32> {
    if samples.is_empty() {
        return vec![0.0; bins];
    }
    let band = samples.len().div_ceil(bins);
    (0..bins)
        .map(|i| {
            let start = i * band;
            let end = ((i + 1) * band).min(samples.len());
            if start >= end {
                return 0.0;
            }
            let window = &samples[start..end];
            let energy: f32 = window.iter().map(|s| s * s).sum();
            (energy / window.len() as f32).sqrt()
        })
        .collect()
}

// ---- null devices ----------------------------------------------------------

/// Capture stand-in for machines without audio hardware (`--no-audio`).
#[derive(Default)]
pub struct NullCapture;

impl AudioCapture for NullCapture {
    fn begin(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn record(&self, _sink: mpsc::Sender<Vec<i16>>) -> anyhow::Result<()> {
        Ok(())
    }

    fn pause(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn end(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Playback stand-in that still honors the offset-reporting contract.
#[derive(Default)]
pub struct NullPlayback {
    state: Mutex<PlaybackQueue>,
}

impl AudioPlayback for NullPlayback {
    fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn add_pcm16(&self, track_id: &str, frames: &[i16]) {
        let mut state = self.state.lock().expect("null playback lock poisoned");
        if state.track.as_deref() != Some(track_id) {
            state.appended = 0;
            state.track = Some(track_id.to_string());
        }
        state.appended += frames.len();
    }

    fn interrupt(&self) -> Option<TrackOffset> {
        let mut state = self.state.lock().expect("null playback lock poisoned");
        let track_id = state.track.take()?;
        // Nothing is audible; report the whole track as heard.
        let sample_offset = state.appended;
        state.appended = 0;
        Some(TrackOffset {
            track_id,
            sample_offset,
        })
    }

    fn frequencies(&self, bins: usize) -> Vec<f32> {
        vec![0.0; bins]
    }
}
