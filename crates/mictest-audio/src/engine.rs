//! Render drivers - the clocks that pull audio through a context's graph.
//!
//! `cpal::Stream` is not `Send`, so every hardware stream in the workspace is
//! owned by a dedicated [`StreamThread`] that builds it, plays it and drops
//! it when asked to stop.

use anyhow::{Context as _, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::context::ContextInner;
use mictest_core::{RENDER_QUANTUM, Sample};

/// How often a stream thread checks whether it should shut down
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest mono block the device callback renders in one pass
const MAX_CALLBACK_FRAMES: usize = 4096;

/// A running render clock for one context
pub trait RenderDriver: Send {
    fn name(&self) -> &'static str;

    /// Stop pulling audio. Idempotent.
    fn stop(&mut self);
}

/// A thread that owns one cpal stream for its whole life
pub struct StreamThread {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn a thread, build the stream on it and start playing
    ///
    /// Returns once the stream is playing, or with the build error if it
    /// could not be opened.
    pub fn spawn<F>(name: impl Into<String>, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let keep_running = Arc::clone(&running);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().context("Failed to start stream")?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        if ready_tx.send(Err(format!("{e:#}"))).is_err() {
                            tracing::error!("Stream build failed with nobody waiting: {:#}", e);
                        }
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    // Nobody holds the handle that would stop us
                    tracing::error!("Stream started with nobody waiting; closing it");
                    return;
                }

                while keep_running.load(Ordering::Relaxed) {
                    thread::sleep(STREAM_POLL_INTERVAL);
                }
                drop(stream);
            })
            .with_context(|| format!("Failed to spawn {name}"))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!("Stream thread {} running", name);
                Ok(Self {
                    name,
                    running,
                    handle: Some(handle),
                })
            }
            Ok(Err(message)) => {
                if handle.join().is_err() {
                    tracing::error!("Stream thread {} panicked after a failed build", name);
                }
                Err(anyhow!(message))
            }
            Err(_) => {
                if handle.join().is_err() {
                    tracing::error!("Stream thread {} panicked while building its stream", name);
                }
                bail!("{name} exited before its stream was ready")
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the stream and join the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Stream thread {} panicked", self.name);
            } else {
                tracing::debug!("Stream thread {} stopped", self.name);
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Find an output device by name on the default host, or the default device
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .context("No output device available"),
        Some(wanted) => host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|device| device.name().is_ok_and(|n| n == wanted))
            .with_context(|| format!("Output device '{wanted}' not found")),
    }
}

/// Renders a context to the default output device
pub struct DeviceDriver {
    stream: StreamThread,
}

impl DeviceDriver {
    pub(crate) fn start(inner: Arc<ContextInner>) -> Result<Self> {
        let sample_rate = inner.sample_rate();
        let stream = StreamThread::spawn(format!("mictest-render-{}", inner.id()), move || {
            let device = find_output_device(None)?;
            tracing::info!("Rendering to output device: {}", device.name()?);

            let default_config = device
                .default_output_config()
                .context("Output device has no default config")?;
            let config = cpal::StreamConfig {
                channels: default_config.channels(),
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let channels = usize::from(config.channels.max(1));

            // Pre-allocated so the callback never allocates
            let mut mono = vec![0.0 as Sample; MAX_CALLBACK_FRAMES];

            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for chunk in data.chunks_mut(MAX_CALLBACK_FRAMES * channels) {
                        let frames = chunk.len() / channels;
                        inner.try_render(&mut mono[..frames]);
                        for (frame, &sample) in chunk.chunks_exact_mut(channels).zip(&mono[..frames]) {
                            frame.fill(sample);
                        }
                    }
                },
                move |err| {
                    tracing::error!("Render stream error: {}", err);
                },
                None,
            )?;
            Ok(stream)
        })?;

        Ok(Self { stream })
    }
}

impl RenderDriver for DeviceDriver {
    fn name(&self) -> &'static str {
        "device"
    }

    fn stop(&mut self) {
        self.stream.stop();
    }
}

/// Renders a context on a plain thread at real-time pace, discarding output
///
/// Used where there is no hardware to clock the graph: simulated platforms
/// and headless runs.
pub struct ClockDriver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClockDriver {
    pub(crate) fn start(inner: Arc<ContextInner>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let keep_running = Arc::clone(&running);

        let period = Duration::from_secs_f64(RENDER_QUANTUM as f64 / f64::from(inner.sample_rate().max(1)));

        let handle = thread::Builder::new()
            .name(format!("mictest-clock-{}", inner.id()))
            .spawn(move || {
                let mut block = vec![0.0 as Sample; RENDER_QUANTUM];
                let mut next_tick = Instant::now();
                while keep_running.load(Ordering::Relaxed) {
                    inner.try_render(&mut block);
                    next_tick += period;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    } else {
                        // Fell behind; don't try to catch up in a burst
                        next_tick = now;
                    }
                }
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }
}

impl RenderDriver for ClockDriver {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Clock driver thread panicked");
            }
        }
    }
}

impl Drop for ClockDriver {
    fn drop(&mut self) {
        RenderDriver::stop(self);
    }
}
