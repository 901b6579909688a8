//! Real devices through cpal.
//!
//! Device ids are device names on the default host and the group id is the
//! host name. Capture runs on its own stream thread and feeds a sample ring;
//! each playback element owns an output stream on its sink device.
//! cpal has no echo canceller, so echo cancellation is reported unsupported
//! and requests for it capture the raw input.

use anyhow::bail;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{FromSample, Sample as _, SizedSample};
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::{
    AssetFetcher, ElementSinkRouting, MediaDevices, MediaStream, MediaStreamTrack, OutputBackend,
    PlaybackElement, SinkRouting,
};
use mictest_audio::StreamThread;
use mictest_audio::engine::find_output_device;
use mictest_comms::{SampleWriter, sample_ring};
use mictest_core::{
    AudioConstraints, DeviceDescriptor, DeviceKind, Error, Result, Sample, SampleRate,
    SampleReader, SupportedConstraints, TrackSettings,
};

/// Largest block converted in one pass inside a callback
const MAX_CALLBACK_FRAMES: usize = 4096;

/// Platform backed by the default cpal host
pub struct CpalPlatform {
    asset_dir: PathBuf,
    routing: Arc<dyn SinkRouting>,
}

impl CpalPlatform {
    /// Fixture assets are read from `asset_dir`
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            routing: Arc::new(ElementSinkRouting),
        }
    }
}

fn find_input_device(id: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match id {
        None => host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no capture device available".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to enumerate input devices: {e}")))?
            .find(|device| device.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| Error::DeviceUnavailable(format!("input device '{wanted}' not found"))),
    }
}

/// Try to find a supported input config with the target sample rate
fn find_config_with_sample_rate(
    device: &cpal::Device,
    target_rate: SampleRate,
) -> Option<cpal::SupportedStreamConfig> {
    device
        .supported_input_configs()
        .ok()?
        .find(|range| {
            range.min_sample_rate().0 <= target_rate && target_rate <= range.max_sample_rate().0
        })
        .map(|range| range.with_sample_rate(cpal::SampleRate(target_rate)))
}

/// Build an input stream that downmixes to mono and pushes into `writer`
fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut writer: SampleWriter,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample,
    Sample: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let scale = 1.0 / channels as Sample;
    let mut mono = vec![0.0 as Sample; MAX_CALLBACK_FRAMES];

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for chunk in data.chunks(MAX_CALLBACK_FRAMES * channels) {
                let frames = chunk.len() / channels;
                for (out, frame) in mono[..frames].iter_mut().zip(chunk.chunks_exact(channels)) {
                    *out = frame
                        .iter()
                        .map(|&s| s.to_sample::<Sample>())
                        .sum::<Sample>()
                        * scale;
                }
                writer.write(&mono[..frames]);
            }
        },
        |err| {
            tracing::error!("Capture stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

fn open_capture(constraints: &AudioConstraints) -> Result<MediaStream> {
    let device = find_input_device(constraints.device_id.as_deref())?;
    let name = device
        .name()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    if constraints.echo_cancellation {
        tracing::warn!(
            "Echo cancellation requested for '{}' but is not available; capturing raw input",
            name
        );
    }

    let supported = match constraints
        .sample_rate
        .and_then(|rate| find_config_with_sample_rate(&device, rate))
    {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| Error::DeviceUnavailable(format!("{name}: {e}")))?,
    };
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channel_count = config.channels;

    if constraints.sample_rate.is_some_and(|rate| rate != sample_rate) {
        tracing::warn!(
            "'{}' captures at {} Hz, not the requested {:?} Hz",
            name,
            sample_rate,
            constraints.sample_rate
        );
    }

    let (writer, reader) = sample_ring(sample_rate as usize);
    let stream = StreamThread::spawn(format!("mictest-capture-{name}"), move || {
        match sample_format {
            cpal::SampleFormat::F32 => build_capture::<f32>(&device, &config, writer),
            cpal::SampleFormat::I16 => build_capture::<i16>(&device, &config, writer),
            cpal::SampleFormat::U16 => build_capture::<u16>(&device, &config, writer),
            other => bail!("Unsupported capture sample format: {other:?}"),
        }
    })
    .map_err(|e| Error::DeviceUnavailable(format!("{name}: {e:#}")))?;

    tracing::info!(
        "Capturing from '{}' at {} Hz x{}",
        name,
        sample_rate,
        channel_count
    );

    let settings = TrackSettings {
        device_id: name.clone(),
        echo_cancellation: false,
        sample_rate,
        channel_count,
    };
    let track = MediaStreamTrack::new(name, settings, move || drop(stream));

    Ok(MediaStream::new(vec![track], Box::new(reader)))
}

fn enumerate() -> Result<Vec<DeviceDescriptor>> {
    let host = cpal::default_host();
    let group_id = host.id().name().to_string();

    let inputs = host
        .input_devices()
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to enumerate input devices: {e}")))?;
    let outputs = host
        .output_devices()
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to enumerate output devices: {e}")))?;

    let descriptors = inputs
        .map(|device| (device, DeviceKind::AudioInput))
        .chain(outputs.map(|device| (device, DeviceKind::AudioOutput)))
        .filter_map(|(device, kind)| {
            // Devices that can't report a name can't be selected by id either
            let name = device.name().ok()?;
            Some(DeviceDescriptor {
                device_id: name.clone(),
                group_id: group_id.clone(),
                kind,
                label: name,
            })
        })
        .collect();

    Ok(descriptors)
}

impl MediaDevices for CpalPlatform {
    fn get_user_media(
        &self,
        constraints: &AudioConstraints,
    ) -> impl Future<Output = Result<MediaStream>> + Send {
        let constraints = constraints.clone();
        async move { open_capture(&constraints) }
    }

    fn enumerate_devices(&self) -> impl Future<Output = Result<Vec<DeviceDescriptor>>> + Send {
        async { enumerate() }
    }

    fn supported_constraints(&self) -> SupportedConstraints {
        SupportedConstraints {
            device_id: true,
            echo_cancellation: false,
            sample_rate: true,
            channel_count: true,
        }
    }
}

impl AssetFetcher for CpalPlatform {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let full_path = self.asset_dir.join(path);
        async move {
            let bytes = std::fs::read(&full_path)?;
            tracing::debug!("Fetched {} ({} bytes)", full_path.display(), bytes.len());
            Ok(bytes)
        }
    }
}

/// Playback element with its own cpal output stream
pub struct CpalElement {
    source: Arc<Mutex<Box<dyn SampleReader>>>,
    sample_rate: SampleRate,
    paused: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    sink: Option<String>,
    stream: Option<StreamThread>,
}

impl CpalElement {
    fn open_stream(&self) -> Result<StreamThread> {
        let sink = self.sink.clone();
        let source = Arc::clone(&self.source);
        let paused = Arc::clone(&self.paused);
        let volume = Arc::clone(&self.volume);
        let sample_rate = self.sample_rate;

        let name = format!(
            "mictest-element-{}",
            sink.as_deref().unwrap_or("default")
        );
        StreamThread::spawn(name, move || {
            let device = find_output_device(sink.as_deref())?;
            let default_config = device.default_output_config()?;
            let config = cpal::StreamConfig {
                channels: default_config.channels(),
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let channels = usize::from(config.channels.max(1));
            let mut mono = vec![0.0 as Sample; MAX_CALLBACK_FRAMES];

            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Paused elements don't consume their source
                    if paused.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    let gain = f32::from_bits(volume.load(Ordering::Relaxed));
                    for chunk in data.chunks_mut(MAX_CALLBACK_FRAMES * channels) {
                        let frames = chunk.len() / channels;
                        match source.try_lock() {
                            Some(mut reader) => {
                                reader.read(&mut mono[..frames]);
                            }
                            None => mono[..frames].fill(0.0),
                        }
                        for (frame, &sample) in chunk.chunks_exact_mut(channels).zip(&mono[..frames]) {
                            frame.fill(sample * gain);
                        }
                    }
                },
                |err| {
                    tracing::error!("Playback stream error: {}", err);
                },
                None,
            )?;
            Ok(stream)
        })
        .map_err(|e| Error::DeviceUnavailable(format!("{e:#}")))
    }
}

impl PlaybackElement for CpalElement {
    fn play(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.open_stream()?);
        }
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn sink_id(&self) -> Option<&str> {
        self.sink.as_deref()
    }

    fn apply_sink(&mut self, sink_id: &str) -> Result<()> {
        find_output_device(Some(sink_id)).map_err(|e| Error::DeviceUnavailable(format!("{e:#}")))?;
        self.sink = Some(sink_id.to_string());

        // A live stream is reopened on the new device
        if let Some(mut old) = self.stream.take() {
            old.stop();
            self.stream = Some(self.open_stream()?);
        }
        Ok(())
    }
}

impl OutputBackend for CpalPlatform {
    type Element = CpalElement;

    fn create_element(
        &self,
        source: Box<dyn SampleReader>,
        sample_rate: SampleRate,
    ) -> Result<Self::Element> {
        Ok(CpalElement {
            source: Arc::new(Mutex::new(source)),
            sample_rate,
            paused: Arc::new(AtomicBool::new(true)),
            volume: Arc::new(AtomicU32::new(1.0_f32.to_bits())),
            sink: None,
            stream: None,
        })
    }

    fn sink_routing(&self) -> Arc<dyn SinkRouting> {
        Arc::clone(&self.routing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;
    use mictest_core::SilenceReader;

    /// Helper to check if a capture device is available
    /// Returns true if we should skip the test
    fn should_skip_capture_test() -> bool {
        cpal::default_host().default_input_device().is_none()
    }

    #[test]
    fn test_supported_constraints() {
        let platform = CpalPlatform::new(".");
        let supported = platform.supported_constraints();
        assert!(supported.device_id);
        assert!(!supported.echo_cancellation);
    }

    #[test]
    fn test_fetch_missing_asset_is_io_error() {
        let platform = CpalPlatform::new("/nonexistent-mictest-assets");
        let result = block_on(platform.fetch("beat.wav"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_element_starts_paused() {
        let platform = CpalPlatform::new(".");
        let mut element = platform
            .create_element(Box::new(SilenceReader), 48000)
            .unwrap();
        assert!(element.is_paused());
        assert_eq!(element.sink_id(), None);

        element.set_volume(3.0);
        assert_eq!(element.volume(), 1.0);
    }

    #[test]
    fn test_unknown_input_device() {
        let platform = CpalPlatform::new(".");
        let constraints = AudioConstraints::for_device("no-such-microphone-anywhere", false);
        let result = block_on(platform.get_user_media(&constraints));
        assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
    }

    #[test]
    fn test_capture_default_device() {
        if should_skip_capture_test() {
            eprintln!("Skipping test: No capture device available (CI environment)");
            return;
        }

        let platform = CpalPlatform::new(".");
        match block_on(platform.get_user_media(&AudioConstraints::default())) {
            Ok(stream) => {
                assert_eq!(stream.tracks().len(), 1);
                assert!(stream.active());
                stream.stop();
                assert!(!stream.active());
            }
            Err(e) => {
                eprintln!("Skipping test: Capture device unavailable - {e}");
            }
        }
    }
}
