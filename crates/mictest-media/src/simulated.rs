//! Scripted platform for tests, demos and headless runs.
//!
//! Inputs produce a sine tone, acquisition can be made to take a number of
//! scheduler polls so that overlapping requests really interleave, and every
//! issued track and element stays inspectable through the platform handle.
//! Clones of a `SimulatedPlatform` share all state.

use futures_lite::future::yield_now;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crate::{
    AssetFetcher, ElementSinkRouting, MediaDevices, MediaStream, MediaStreamTrack, NoSinkRouting,
    OutputBackend, PlaybackElement, SinkRouting,
};
use mictest_core::{
    AudioConstraints, DeviceDescriptor, DeviceKind, Error, Result, Sample, SampleRate,
    SampleReader, SupportedConstraints, TrackSettings, sample_rates,
};

/// A scripted device
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDevice {
    pub device_id: String,
    pub group_id: String,
    pub kind: DeviceKind,
    pub label: String,
    /// Frequency of the tone an input produces
    pub tone_hz: f32,
    /// Scheduler polls a capture request spends pending
    pub acquire_polls: usize,
    /// Unavailable devices are listed but can't be opened
    pub available: bool,
}

impl SimulatedDevice {
    pub fn input(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(device_id.into(), label.into(), DeviceKind::AudioInput)
    }

    pub fn output(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(device_id.into(), label.into(), DeviceKind::AudioOutput)
    }

    fn new(device_id: String, label: String, kind: DeviceKind) -> Self {
        Self {
            group_id: format!("group-{device_id}"),
            device_id,
            kind,
            label,
            tone_hz: 440.0,
            acquire_polls: 0,
            available: true,
        }
    }

    pub fn with_tone(mut self, tone_hz: f32) -> Self {
        self.tone_hz = tone_hz;
        self
    }

    pub fn with_acquire_polls(mut self, polls: usize) -> Self {
        self.acquire_polls = polls;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

/// Endless sine tone
struct ToneReader {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl ToneReader {
    fn new(tone_hz: f32, sample_rate: SampleRate, amplitude: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * tone_hz / sample_rate.max(1) as f32,
            amplitude,
        }
    }
}

impl SampleReader for ToneReader {
    fn read(&mut self, out: &mut [Sample]) -> usize {
        for sample in out.iter_mut() {
            *sample = self.amplitude * self.phase.sin();
            self.phase = (self.phase + self.step) % TAU;
        }
        out.len()
    }
}

/// Encode a mono 16-bit sine tone as WAV bytes
pub fn tone_wav(tone_hz: f32, seconds: f32, sample_rate: SampleRate) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (seconds * sample_rate as f32) as usize;
    let mut reader = ToneReader::new(tone_hz, sample_rate, 0.5);
    let mut samples = vec![0.0; frames];
    reader.read(&mut samples);

    let mut bytes = Vec::new();
    let mut writer =
        hound::WavWriter::new(Cursor::new(&mut bytes), spec).map_err(std::io::Error::other)?;
    for sample in samples {
        writer
            .write_sample((sample * f32::from(i16::MAX)) as i16)
            .map_err(std::io::Error::other)?;
    }
    writer.finalize().map_err(std::io::Error::other)?;
    Ok(bytes)
}

/// What a playback element currently looks like
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSnapshot {
    pub paused: bool,
    pub volume: f32,
    pub sink_id: Option<String>,
}

struct ElementShared {
    paused: AtomicBool,
    volume: AtomicU32,
    sink: Mutex<Option<String>>,
    // Set when every sink change should fail, as a stream reopen would
    sink_fault: AtomicBool,
}

struct SimState {
    devices: Vec<SimulatedDevice>,
    permission_granted: bool,
    // Labels stay hidden until a capture request has succeeded once
    labels_visible: bool,
    assets: HashMap<String, Arc<Vec<u8>>>,
    fetch_log: Vec<String>,
    tracks: Vec<MediaStreamTrack>,
    elements: Vec<Weak<ElementShared>>,
}

/// Builder for [`SimulatedPlatform`]
pub struct SimulatedPlatformBuilder {
    devices: Vec<SimulatedDevice>,
    permission_granted: bool,
    assets: HashMap<String, Arc<Vec<u8>>>,
    sink_routing: bool,
    fetch_polls: usize,
    sample_rate: SampleRate,
}

impl SimulatedPlatformBuilder {
    pub fn device(mut self, device: SimulatedDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn input(self, device_id: &str, label: &str) -> Self {
        self.device(SimulatedDevice::input(device_id, label))
    }

    pub fn output(self, device_id: &str, label: &str) -> Self {
        self.device(SimulatedDevice::output(device_id, label))
    }

    pub fn asset(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.assets.insert(path.to_string(), Arc::new(bytes));
        self
    }

    pub fn permission(mut self, granted: bool) -> Self {
        self.permission_granted = granted;
        self
    }

    /// Whether playback elements can be routed to a specific output
    pub fn sink_routing(mut self, supported: bool) -> Self {
        self.sink_routing = supported;
        self
    }

    /// Scheduler polls every asset fetch spends pending
    pub fn fetch_polls(mut self, polls: usize) -> Self {
        self.fetch_polls = polls;
        self
    }

    /// Rate of the tones capture streams produce
    pub fn sample_rate(mut self, sample_rate: SampleRate) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn build(self) -> SimulatedPlatform {
        let routing: Arc<dyn SinkRouting> = if self.sink_routing {
            Arc::new(ElementSinkRouting)
        } else {
            Arc::new(NoSinkRouting)
        };
        SimulatedPlatform {
            state: Arc::new(Mutex::new(SimState {
                devices: self.devices,
                permission_granted: self.permission_granted,
                labels_visible: false,
                assets: self.assets,
                fetch_log: Vec::new(),
                tracks: Vec::new(),
                elements: Vec::new(),
            })),
            routing,
            fetch_polls: self.fetch_polls,
            sample_rate: self.sample_rate,
        }
    }
}

/// Platform with scripted devices and in-memory assets
#[derive(Clone)]
pub struct SimulatedPlatform {
    state: Arc<Mutex<SimState>>,
    routing: Arc<dyn SinkRouting>,
    fetch_polls: usize,
    sample_rate: SampleRate,
}

impl SimulatedPlatform {
    pub fn builder() -> SimulatedPlatformBuilder {
        SimulatedPlatformBuilder {
            devices: Vec::new(),
            permission_granted: true,
            assets: HashMap::new(),
            sink_routing: true,
            fetch_polls: 0,
            sample_rate: sample_rates::SR_48000,
        }
    }

    /// Two microphones, two outputs and both fixture assets
    pub fn demo() -> Result<Self> {
        Ok(Self::builder()
            .device(SimulatedDevice::input("mic-builtin", "Built-in Microphone").with_tone(440.0))
            .device(SimulatedDevice::input("mic-usb", "usb Headset Microphone").with_tone(660.0))
            .output("spk-builtin", "Built-in Speakers")
            .output("spk-hdmi", "HDMI Output")
            .asset("guitar.wav", tone_wav(220.0, 2.0, sample_rates::SR_44100)?)
            .asset("beat.wav", tone_wav(880.0, 0.5, sample_rates::SR_44100)?)
            .build())
    }

    pub fn set_permission(&self, granted: bool) {
        self.state.lock().permission_granted = granted;
    }

    /// Mark a device as available or unavailable; returns false if unknown
    pub fn set_available(&self, device_id: &str, available: bool) -> bool {
        let mut state = self.state.lock();
        match state
            .devices
            .iter_mut()
            .find(|device| device.device_id == device_id)
        {
            Some(device) => {
                device.available = available;
                true
            }
            None => false,
        }
    }

    pub fn add_device(&self, device: SimulatedDevice) {
        self.state.lock().devices.push(device);
    }

    /// Every track ever issued, oldest first
    pub fn tracks(&self) -> Vec<MediaStreamTrack> {
        self.state.lock().tracks.clone()
    }

    /// Tracks that have not been stopped
    pub fn live_tracks(&self) -> Vec<MediaStreamTrack> {
        self.state
            .lock()
            .tracks
            .iter()
            .filter(|track| track.is_live())
            .cloned()
            .collect()
    }

    /// Paths fetched so far, in order
    pub fn fetch_log(&self) -> Vec<String> {
        self.state.lock().fetch_log.clone()
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .fetch_log
            .iter()
            .filter(|fetched| *fetched == path)
            .count()
    }

    /// Make every later sink change on the `index`th live element fail
    ///
    /// Indexes follow [`elements`](Self::elements). Returns `false` if there
    /// is no such element.
    pub fn fail_sink_changes(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        state.elements.retain(|element| element.strong_count() > 0);
        match state.elements.get(index).and_then(Weak::upgrade) {
            Some(element) => {
                element.sink_fault.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Snapshots of every element that still exists, oldest first
    pub fn elements(&self) -> Vec<ElementSnapshot> {
        let mut state = self.state.lock();
        state.elements.retain(|element| element.strong_count() > 0);
        state
            .elements
            .iter()
            .filter_map(Weak::upgrade)
            .map(|element| ElementSnapshot {
                paused: element.paused.load(Ordering::Acquire),
                volume: f32::from_bits(element.volume.load(Ordering::Acquire)),
                sink_id: element.sink.lock().clone(),
            })
            .collect()
    }
}

impl MediaDevices for SimulatedPlatform {
    fn get_user_media(
        &self,
        constraints: &AudioConstraints,
    ) -> impl Future<Output = Result<MediaStream>> + Send {
        let constraints = constraints.clone();
        let state = Arc::clone(&self.state);
        let sample_rate = self.sample_rate;

        async move {
            let device = {
                let state = state.lock();
                if !state.permission_granted {
                    return Err(Error::PermissionDenied(
                        "microphone access was denied".to_string(),
                    ));
                }
                let device = state
                    .devices
                    .iter()
                    .filter(|device| device.kind == DeviceKind::AudioInput)
                    .find(|device| {
                        constraints
                            .device_id
                            .as_ref()
                            .is_none_or(|id| *id == device.device_id)
                    })
                    .cloned();
                match device {
                    Some(device) if device.available => device,
                    Some(device) => {
                        return Err(Error::DeviceUnavailable(format!(
                            "'{}' is busy or disconnected",
                            device.device_id
                        )));
                    }
                    None => {
                        return Err(Error::DeviceUnavailable(match &constraints.device_id {
                            Some(id) => format!("no input device '{id}'"),
                            None => "no capture device available".to_string(),
                        }));
                    }
                }
            };

            for _ in 0..device.acquire_polls {
                yield_now().await;
            }

            let settings = TrackSettings {
                device_id: device.device_id.clone(),
                echo_cancellation: constraints.echo_cancellation,
                sample_rate,
                channel_count: 1,
            };
            let track = MediaStreamTrack::new(device.label.clone(), settings, || {});
            {
                let mut state = state.lock();
                state.labels_visible = true;
                state.tracks.push(track.clone());
            }
            tracing::debug!("Simulated capture opened on {}", device.device_id);

            let reader = ToneReader::new(device.tone_hz, sample_rate, 0.5);
            Ok(MediaStream::new(vec![track], Box::new(reader)))
        }
    }

    fn enumerate_devices(&self) -> impl Future<Output = Result<Vec<DeviceDescriptor>>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let state = state.lock();
            Ok(state
                .devices
                .iter()
                .map(|device| DeviceDescriptor {
                    device_id: device.device_id.clone(),
                    group_id: device.group_id.clone(),
                    kind: device.kind,
                    label: if state.labels_visible {
                        device.label.clone()
                    } else {
                        String::new()
                    },
                })
                .collect())
        }
    }

    fn supported_constraints(&self) -> SupportedConstraints {
        SupportedConstraints {
            device_id: true,
            echo_cancellation: true,
            sample_rate: false,
            channel_count: true,
        }
    }
}

impl AssetFetcher for SimulatedPlatform {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let path = path.to_string();
        let state = Arc::clone(&self.state);
        let polls = self.fetch_polls;

        async move {
            state.lock().fetch_log.push(path.clone());
            for _ in 0..polls {
                yield_now().await;
            }
            let bytes = state.lock().assets.get(&path).cloned();
            bytes.map(|bytes| bytes.to_vec()).ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("asset '{path}' not found"),
                ))
            })
        }
    }
}

/// Element that renders nowhere; tests pull its audio explicitly
pub struct SimulatedElement {
    shared: Arc<ElementShared>,
    source: Box<dyn SampleReader>,
    sink: Option<String>,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedElement {
    /// Pull what the element would play next; silence while paused
    pub fn pull(&mut self, out: &mut [Sample]) -> usize {
        if self.is_paused() {
            out.fill(0.0);
            return 0;
        }
        let read = self.source.read(out);
        let volume = self.volume();
        for sample in out.iter_mut() {
            *sample *= volume;
        }
        read
    }
}

impl PlaybackElement for SimulatedElement {
    fn play(&mut self) -> Result<()> {
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume.load(Ordering::Acquire))
    }

    fn sink_id(&self) -> Option<&str> {
        self.sink.as_deref()
    }

    fn apply_sink(&mut self, sink_id: &str) -> Result<()> {
        if self.shared.sink_fault.load(Ordering::Acquire) {
            return Err(Error::DeviceUnavailable(format!(
                "could not reopen output '{sink_id}'"
            )));
        }
        let usable = self.state.lock().devices.iter().any(|device| {
            device.kind == DeviceKind::AudioOutput && device.device_id == sink_id && device.available
        });
        if !usable {
            return Err(Error::DeviceUnavailable(format!(
                "no usable output device '{sink_id}'"
            )));
        }
        self.sink = Some(sink_id.to_string());
        *self.shared.sink.lock() = Some(sink_id.to_string());
        Ok(())
    }
}

impl OutputBackend for SimulatedPlatform {
    type Element = SimulatedElement;

    fn create_element(
        &self,
        source: Box<dyn SampleReader>,
        _sample_rate: SampleRate,
    ) -> Result<Self::Element> {
        let shared = Arc::new(ElementShared {
            paused: AtomicBool::new(true),
            volume: AtomicU32::new(1.0_f32.to_bits()),
            sink: Mutex::new(None),
            sink_fault: AtomicBool::new(false),
        });
        self.state.lock().elements.push(Arc::downgrade(&shared));
        Ok(SimulatedElement {
            shared,
            source,
            sink: None,
            state: Arc::clone(&self.state),
        })
    }

    fn sink_routing(&self) -> Arc<dyn SinkRouting> {
        Arc::clone(&self.routing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::{block_on, zip};
    use mictest_core::SilenceReader;

    fn platform() -> SimulatedPlatform {
        SimulatedPlatform::builder()
            .input("mic-A", "Mic A")
            .device(SimulatedDevice::input("mic-B", "Mic B").with_acquire_polls(3))
            .device(SimulatedDevice::input("mic-C", "Mic C").unavailable())
            .output("spk-1", "Speakers")
            .asset("beat.wav", vec![1, 2, 3])
            .build()
    }

    #[test]
    fn test_capture_binds_requested_device() {
        let platform = platform();
        let mut stream = block_on(
            platform.get_user_media(&AudioConstraints::for_device("mic-A", true)),
        )
        .unwrap();

        let track = &stream.tracks()[0];
        assert_eq!(track.device_id(), "mic-A");
        assert_eq!(track.label(), "Mic A");
        assert!(track.settings().echo_cancellation);
        assert_eq!(platform.live_tracks().len(), 1);

        let mut reader = stream.take_reader().unwrap();
        let mut samples = [0.0; 64];
        assert_eq!(reader.read(&mut samples), 64);
        assert!(samples.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_permission_denied() {
        let platform = platform();
        platform.set_permission(false);
        let result = block_on(platform.get_user_media(&AudioConstraints::default()));
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert!(platform.tracks().is_empty());
    }

    #[test]
    fn test_unknown_and_unavailable_devices() {
        let platform = platform();
        let unknown = block_on(platform.get_user_media(&AudioConstraints::for_device("mic-Z", false)));
        assert!(matches!(unknown, Err(Error::DeviceUnavailable(_))));

        let busy = block_on(platform.get_user_media(&AudioConstraints::for_device("mic-C", false)));
        assert!(matches!(busy, Err(Error::DeviceUnavailable(_))));

        assert!(platform.set_available("mic-C", true));
        assert!(!platform.set_available("mic-Z", true));
        assert!(block_on(platform.get_user_media(&AudioConstraints::for_device("mic-C", false))).is_ok());
    }

    #[test]
    fn test_labels_hidden_until_capture() {
        let platform = platform();
        let before = block_on(platform.enumerate_devices()).unwrap();
        assert!(before.iter().all(|device| device.label.is_empty()));

        block_on(platform.get_user_media(&AudioConstraints::default())).unwrap();
        let after = block_on(platform.enumerate_devices()).unwrap();
        assert_eq!(after.len(), 4);
        assert!(after.iter().all(|device| !device.label.is_empty()));
    }

    #[test]
    fn test_slow_acquisition_finishes_last() {
        let platform = platform();
        let order = Mutex::new(Vec::new());

        let slow = async {
            let stream = platform
                .get_user_media(&AudioConstraints::for_device("mic-B", false))
                .await;
            order.lock().push("mic-B");
            stream
        };
        let fast = async {
            let stream = platform
                .get_user_media(&AudioConstraints::for_device("mic-A", false))
                .await;
            order.lock().push("mic-A");
            stream
        };

        let (slow, fast) = block_on(zip(slow, fast));
        assert!(slow.is_ok() && fast.is_ok());
        assert_eq!(*order.lock(), vec!["mic-A", "mic-B"]);
    }

    #[test]
    fn test_fetch_log() {
        let platform = platform();
        assert_eq!(block_on(platform.fetch("beat.wav")).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            block_on(platform.fetch("missing.wav")),
            Err(Error::Io(_))
        ));
        assert_eq!(platform.fetch_count("beat.wav"), 1);
        assert_eq!(platform.fetch_log(), vec!["beat.wav", "missing.wav"]);
    }

    #[test]
    fn test_element_sink_validation() {
        let platform = platform();
        let mut element = platform
            .create_element(Box::new(SilenceReader), 48000)
            .unwrap();

        assert!(element.apply_sink("spk-404").is_err());
        element.apply_sink("spk-1").unwrap();
        element.set_volume(0.2);

        let snapshots = platform.elements();
        assert_eq!(
            snapshots,
            vec![ElementSnapshot {
                paused: true,
                volume: 0.2,
                sink_id: Some("spk-1".to_string()),
            }]
        );

        drop(element);
        assert!(platform.elements().is_empty());
    }

    #[test]
    fn test_failing_sink_keeps_previous_sink() {
        let platform = platform();
        let mut element = platform
            .create_element(Box::new(SilenceReader), 48000)
            .unwrap();
        element.apply_sink("spk-1").unwrap();

        assert!(platform.fail_sink_changes(0));
        assert!(!platform.fail_sink_changes(1));
        assert!(matches!(
            element.apply_sink("spk-1"),
            Err(Error::DeviceUnavailable(_))
        ));
        assert_eq!(element.sink_id(), Some("spk-1"));
        assert_eq!(platform.elements()[0].sink_id.as_deref(), Some("spk-1"));
    }

    #[test]
    fn test_paused_element_is_silent() {
        let platform = platform();
        let mut element = platform
            .create_element(Box::new(ToneReader::new(440.0, 48000, 0.5)), 48000)
            .unwrap();

        let mut out = [1.0; 32];
        assert_eq!(element.pull(&mut out), 0);
        assert_eq!(out, [0.0; 32]);

        element.play().unwrap();
        assert_eq!(element.pull(&mut out), 32);
    }

    #[test]
    fn test_tone_wav_decodes() {
        let bytes = tone_wav(440.0, 0.1, 8000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 800);
    }
}
