//! The device manager facade.
//!
//! One [`AudioDeviceManager`] owns the audio context, the current capture
//! stream, the playback fixtures and the feature flags. All commands take
//! `&self`; state sits behind one mutex that is never held across an await,
//! so commands can interleave at their suspension points (capture requests
//! and asset fetches) without corrupting the graph.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ManagerConfig;
use crate::meter::{LevelSource, mean_level};
use mictest_audio::decode::decode_wav;
use mictest_audio::{
    AnalyserNode, AudioBufferSourceNode, AudioContext, ContextId, ContextState, NodeHandle,
};
use mictest_core::{
    AudioConstraints, DecodedAudio, DeviceDescriptor, DeviceKind, Error, LoopingReader, Result,
    SupportedConstraints, TrackInfo,
};
use mictest_media::{MediaPlatform, MediaStream, PlaybackElement};
use mictest_node::NodeKind;

/// How the current input reaches the analyser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRoute {
    /// No input, or its source feeds nothing
    Disconnected,
    /// source → analyser
    Direct,
    /// source → delay → analyser
    Delayed,
}

/// Where the graph output and the background track currently go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputRoutes {
    /// Node kinds the output gain feeds
    pub gain_targets: Vec<NodeKind>,
    /// Sink of the element playing the graph output, if one exists
    pub element_sink: Option<String>,
    /// Sink of the background track element, if it has been loaded
    pub background_sink: Option<String>,
}

/// Nodes that live as long as their context
struct ContextGraph {
    context: AudioContext,
    gain: NodeHandle,
    analyser: AnalyserNode,
    /// Reused by every level read
    level_bytes: Vec<u8>,
}

/// The open capture stream and the nodes bound to it
struct InputChain {
    stream: MediaStream,
    source: NodeHandle,
    delay: NodeHandle,
}

/// Graph output routed through a playback element
struct OutputChain<E> {
    destination: NodeHandle,
    element: E,
}

struct ManagerState<E> {
    context: Option<ContextGraph>,
    input_device: Option<String>,
    output_device: Option<String>,
    delay_enabled: bool,
    echo_cancellation: bool,
    input: Option<InputChain>,
    output: Option<OutputChain<E>>,
    background: Option<E>,
    buffer_source: Option<AudioBufferSourceNode>,
    /// Decoded buffer fixture, valid only for the context it was decoded for
    decoded: Option<(ContextId, Arc<DecodedAudio>)>,
}

/// Point the gain stage at `target` only
fn route_gain(context: &AudioContext, gain: &NodeHandle, target: &NodeHandle) -> Result<()> {
    context.disconnect(gain)?;
    context.connect(gain, target)
}

fn discard_destination(context: &AudioContext, destination: &NodeHandle) {
    if let Err(e) = context.remove(destination) {
        tracing::warn!("Could not remove unused stream destination: {}", e);
    }
}

fn no_context() -> Error {
    Error::ContextUnavailable("no audio context; recreate it first".to_string())
}

/// Composes device enumeration, input and output selection, metering and
/// playback fixtures over one audio context
pub struct AudioDeviceManager<P: MediaPlatform> {
    platform: P,
    config: ManagerConfig,
    /// Bumped by every input selection; an acquisition whose token is stale
    /// when it completes has been superseded
    input_seq: AtomicU64,
    state: Mutex<ManagerState<P::Element>>,
}

impl<P: MediaPlatform> AudioDeviceManager<P> {
    /// Create a manager with no context yet; call [`Self::create_context`]
    pub fn new(platform: P, config: ManagerConfig) -> Self {
        Self {
            platform,
            config,
            input_seq: AtomicU64::new(0),
            state: Mutex::new(ManagerState {
                context: None,
                input_device: None,
                output_device: None,
                delay_enabled: false,
                echo_cancellation: false,
                input: None,
                output: None,
                background: None,
                buffer_source: None,
                decoded: None,
            }),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn build_context(&self) -> Result<ContextGraph> {
        let context = AudioContext::new(&self.config.context_options())?;

        let gain = context.create_gain()?;
        context.connect(&gain, context.destination())?;

        let analyser = context.create_analyser(self.config.fft_size)?;
        context.connect(analyser.handle(), &gain)?;

        let level_bytes = vec![0; analyser.frequency_bin_count()];
        Ok(ContextGraph {
            context,
            gain,
            analyser,
            level_bytes,
        })
    }

    /// Disconnect and drop the input nodes, then stop every track
    fn release_input(state: &mut ManagerState<P::Element>) {
        let Some(input) = state.input.take() else {
            return;
        };
        if let Some(graph) = &state.context {
            for node in [&input.source, &input.delay] {
                if let Err(e) = graph.context.remove(node) {
                    tracing::warn!("Could not remove input node: {}", e);
                }
            }
        }
        input.stream.stop();
        tracing::debug!("Released input stream {}", input.stream.id());
    }

    fn wire_input(graph: &ContextGraph, input: &InputChain, delayed: bool) -> Result<()> {
        let context = &graph.context;
        context.disconnect(&input.source)?;
        context.disconnect(&input.delay)?;
        if delayed {
            context.connect(&input.source, &input.delay)?;
            context.connect(&input.delay, graph.analyser.handle())?;
        } else {
            context.connect(&input.source, graph.analyser.handle())?;
        }
        Ok(())
    }

    fn build_input(
        &self,
        graph: &ContextGraph,
        mut stream: MediaStream,
        delayed: bool,
    ) -> Result<InputChain> {
        let Some(reader) = stream.take_reader() else {
            stream.stop();
            return Err(Error::DeviceUnavailable(format!(
                "capture stream {} carries no audio",
                stream.id()
            )));
        };

        let delay_seconds = self.config.delay_seconds.max(0.0);
        let nodes = graph
            .context
            .create_media_stream_source(reader)
            .and_then(|source| {
                let delay = graph
                    .context
                    .create_delay(delay_seconds.max(1.0), delay_seconds)?;
                Ok((source, delay))
            });

        match nodes {
            Ok((source, delay)) => {
                let input = InputChain {
                    stream,
                    source,
                    delay,
                };
                if let Err(e) = Self::wire_input(graph, &input, delayed) {
                    input.stream.stop();
                    return Err(e);
                }
                Ok(input)
            }
            Err(e) => {
                stream.stop();
                Err(e)
            }
        }
    }

    /// Close any existing context and build a fresh one
    ///
    /// Stops buffer playback and the capture stream, drops the output
    /// element and the decoded fixture, then reapplies the last input and
    /// output selections against the new context. Both are attempted; the
    /// first failure is returned. On a construction failure the manager is
    /// left without a context until the next call.
    pub async fn create_context(&self) -> Result<()> {
        let (input_device, output_device) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            Self::release_input(state);
            if let Some(source) = state.buffer_source.take() {
                source.stop();
            }
            state.output = None;
            if let Some(old) = state.context.take() {
                old.context.close();
            }
            state.decoded = None;

            state.context = Some(self.build_context()?);
            (state.input_device.clone(), state.output_device.clone())
        };

        // The output is restored even when the input cannot be
        let input_result = match input_device {
            Some(device_id) => self.set_input_device(&device_id).await,
            None => Ok(()),
        };
        let output_result = match output_device {
            Some(device_id) => self.set_output_device(&device_id),
            None => Ok(()),
        };
        if let Err(e) = &input_result {
            tracing::warn!("Input selection not restored on the new context: {}", e);
        }
        input_result.and(output_result)
    }

    pub fn resume_context(&self) -> Result<()> {
        let state = self.state.lock();
        let graph = state.context.as_ref().ok_or_else(no_context)?;
        if graph.context.state() == ContextState::Suspended {
            graph.context.resume()?;
        }
        Ok(())
    }

    pub fn suspend_context(&self) -> Result<()> {
        let state = self.state.lock();
        state
            .context
            .as_ref()
            .ok_or_else(no_context)?
            .context
            .suspend()
    }

    /// Devices of `kind`, sorted by case-insensitive label
    ///
    /// Opens and immediately releases a probe capture stream first, since
    /// platforms withhold labels until capture has been granted.
    pub async fn get_devices(&self, kind: DeviceKind) -> Result<Vec<DeviceDescriptor>> {
        let probe = self
            .platform
            .get_user_media(&AudioConstraints::default())
            .await?;
        let devices = self.platform.enumerate_devices().await;
        probe.stop();

        let mut devices: Vec<_> = devices?
            .into_iter()
            .filter(|device| device.kind == kind)
            .collect();
        devices.sort_by_cached_key(|device| device.label.to_lowercase());
        Ok(devices)
    }

    /// Switch capture to `device_id`
    ///
    /// The previous stream is stopped before the new one is requested. If a
    /// newer selection starts while this one is waiting for its stream, the
    /// stream is stopped on arrival and this call fails with `Superseded`.
    pub async fn set_input_device(&self, device_id: &str) -> Result<()> {
        let token = self.input_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let constraints = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.input_device = Some(device_id.to_string());
            Self::release_input(state);
            if state.context.is_none() {
                return Err(no_context());
            }
            AudioConstraints {
                device_id: Some(device_id.to_string()),
                echo_cancellation: state.echo_cancellation,
                sample_rate: Some(self.config.sample_rate),
            }
        };

        let stream = self.platform.get_user_media(&constraints).await?;

        if self.input_seq.load(Ordering::SeqCst) != token {
            stream.stop();
            tracing::debug!("Input selection of {} superseded", device_id);
            return Err(Error::Superseded("input device"));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.context.is_none() {
            stream.stop();
            return Err(no_context());
        }
        // A concurrent path may have installed a stream since the release
        Self::release_input(state);
        let graph = state.context.as_ref().ok_or_else(no_context)?;
        let input = self.build_input(graph, stream, state.delay_enabled)?;

        tracing::info!(
            "Input device set to {} (echo cancellation {})",
            device_id,
            if constraints.echo_cancellation { "on" } else { "off" }
        );
        state.input = Some(input);
        Ok(())
    }

    /// Route the graph output and the background track to `device_id`
    ///
    /// Fails with `UnsupportedOperation` before touching the graph when the
    /// platform cannot pick an output device per element. Any other failure
    /// leaves the graph output and the background track on their previous
    /// sink.
    pub fn set_output_device(&self, device_id: &str) -> Result<()> {
        let routing = self.platform.sink_routing();
        if !routing.is_supported() {
            return Err(Error::UnsupportedOperation(format!(
                "cannot route output to '{device_id}': sink selection is not supported"
            )));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let graph = state.context.as_ref().ok_or_else(no_context)?;
        let context = &graph.context;
        let background = &mut state.background;

        let (destination, reader) = context.create_media_stream_destination()?;
        let previous_sink = background
            .as_ref()
            .and_then(|element| element.sink_id().map(str::to_owned));

        // Nothing in the graph moves until both elements play on the new sink
        let staged = self
            .platform
            .create_element(Box::new(reader), context.sample_rate())
            .and_then(|mut element| {
                routing.set_sink(&mut element, device_id)?;
                element.play()?;
                if let Some(background) = background.as_mut() {
                    routing.set_sink(background, device_id)?;
                }
                Ok(element)
            });
        let element = match staged {
            Ok(element) => element,
            Err(e) => {
                discard_destination(context, &destination);
                return Err(e);
            }
        };

        let old_target = state
            .output
            .as_ref()
            .map_or(*context.destination(), |old| old.destination);
        if let Err(e) = route_gain(context, &graph.gain, &destination) {
            if let Err(restore_err) = route_gain(context, &graph.gain, &old_target) {
                tracing::warn!("Could not restore graph output: {}", restore_err);
            }
            if let (Some(background), Some(sink)) = (background.as_mut(), previous_sink.as_deref()) {
                if let Err(restore_err) = routing.set_sink(background, sink) {
                    tracing::warn!("Could not move background track back to {}: {}", sink, restore_err);
                }
            }
            discard_destination(context, &destination);
            return Err(e);
        }

        if let Some(old) = state.output.take() {
            if let Err(e) = context.remove(&old.destination) {
                tracing::warn!("Could not remove previous stream destination: {}", e);
            }
        }
        state.output = Some(OutputChain {
            destination,
            element,
        });
        state.output_device = Some(device_id.to_string());

        tracing::info!("Output device set to {}", device_id);
        Ok(())
    }

    /// Mean analyser level in `[0, 1]`; 0 without a context
    pub fn get_analyser_level(&self) -> f32 {
        let mut state = self.state.lock();
        let Some(graph) = state.context.as_mut() else {
            return 0.0;
        };
        if !graph.analyser.get_byte_frequency_data(&mut graph.level_bytes) {
            return 0.0;
        }
        mean_level(&graph.level_bytes)
    }

    /// Tracks of the current capture stream; empty without one
    pub fn get_input_tracks(&self) -> Vec<TrackInfo> {
        self.state
            .lock()
            .input
            .as_ref()
            .map(|input| input.stream.tracks().iter().map(|track| track.info()).collect())
            .unwrap_or_default()
    }

    pub fn get_constraints(&self) -> SupportedConstraints {
        self.platform.supported_constraints()
    }

    /// Play or pause the looping background track; returns whether it is now paused
    ///
    /// The track is fetched and decoded on first use and outlives context
    /// recreation.
    pub async fn toggle_audio_element(&self) -> Result<bool> {
        let loaded = self.state.lock().background.is_some();
        if !loaded {
            let bytes = self.platform.fetch(&self.config.background_path).await?;
            let audio = decode_wav(&bytes, self.config.sample_rate)?;

            let mut element = self.platform.create_element(
                Box::new(LoopingReader::new(Arc::new(audio))),
                self.config.sample_rate,
            )?;
            element.set_volume(self.config.background_volume);

            let mut state = self.state.lock();
            if state.background.is_none() {
                if let Some(sink) = state.output_device.as_deref() {
                    self.platform.sink_routing().set_sink(&mut element, sink)?;
                }
                tracing::debug!("Loaded background track {}", self.config.background_path);
                state.background = Some(element);
            }
        }

        let mut state = self.state.lock();
        let element = state.background.as_mut().ok_or_else(|| {
            Error::DecodeFailure(format!("{} is not loaded", self.config.background_path))
        })?;
        if element.is_paused() {
            element.play()?;
            Ok(false)
        } else {
            element.pause();
            Ok(true)
        }
    }

    /// Start or stop the looping buffer fixture; returns whether it is now paused
    ///
    /// A running source is stopped and discarded. Otherwise the fixture is
    /// fetched and decoded once per context and played through a fresh
    /// single-use source.
    pub async fn toggle_audio_buffer(&self) -> Result<bool> {
        let (context_id, cached) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(source) = state.buffer_source.take() {
                source.stop();
                if let Some(graph) = &state.context {
                    graph.context.remove(source.handle())?;
                }
                tracing::debug!("Buffer playback stopped");
                return Ok(true);
            }

            let graph = state.context.as_ref().ok_or_else(no_context)?;
            let context_id = graph.context.id();
            let cached = state
                .decoded
                .as_ref()
                .filter(|(id, _)| *id == context_id)
                .map(|(_, audio)| Arc::clone(audio));
            (context_id, cached)
        };

        let audio = match cached {
            Some(audio) => audio,
            None => {
                let bytes = self.platform.fetch(&self.config.buffer_path).await?;
                self.cache_decoded(context_id, &bytes)?
            }
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let graph = Self::context_for(state, context_id)?;
        if state.buffer_source.is_some() {
            return Err(Error::Superseded("audio buffer"));
        }

        let source = graph.context.create_buffer_source(audio)?;
        graph.context.connect(source.handle(), &graph.gain)?;
        source.set_loop(true);
        source.start()?;
        state.buffer_source = Some(source);

        tracing::debug!("Buffer playback started");
        Ok(false)
    }

    /// The live context, provided it is still the one `expected` names
    fn context_for(
        state: &ManagerState<P::Element>,
        expected: ContextId,
    ) -> Result<&ContextGraph> {
        let graph = state.context.as_ref().ok_or_else(no_context)?;
        if graph.context.id() != expected {
            return Err(Error::Superseded("audio context"));
        }
        Ok(graph)
    }

    fn cache_decoded(&self, context_id: ContextId, bytes: &[u8]) -> Result<Arc<DecodedAudio>> {
        let mut state = self.state.lock();
        let graph = Self::context_for(&state, context_id)?;
        let audio = Arc::new(graph.context.decode_audio_data(bytes)?);
        state.decoded = Some((context_id, Arc::clone(&audio)));
        Ok(audio)
    }

    /// Flip the delay flag and rewire the current input; returns the new flag
    pub fn toggle_delay(&self) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.delay_enabled = !state.delay_enabled;
        if let (Some(graph), Some(input)) = (&state.context, &state.input) {
            Self::wire_input(graph, input, state.delay_enabled)?;
        }
        tracing::info!(
            "Delay {}",
            if state.delay_enabled { "enabled" } else { "disabled" }
        );
        Ok(state.delay_enabled)
    }

    /// Flip the echo cancellation flag and reacquire the current input with
    /// it; returns the new flag
    pub async fn toggle_echo_cancellation(&self) -> Result<bool> {
        let (enabled, input_device) = {
            let mut state = self.state.lock();
            state.echo_cancellation = !state.echo_cancellation;
            (state.echo_cancellation, state.input_device.clone())
        };
        if let Some(device_id) = input_device {
            self.set_input_device(&device_id).await?;
        }
        Ok(enabled)
    }

    pub fn current_input_device(&self) -> Option<String> {
        self.state.lock().input_device.clone()
    }

    pub fn current_output_device(&self) -> Option<String> {
        self.state.lock().output_device.clone()
    }

    pub fn is_delay_enabled(&self) -> bool {
        self.state.lock().delay_enabled
    }

    pub fn is_echo_cancellation_enabled(&self) -> bool {
        self.state.lock().echo_cancellation
    }

    /// Whether the background track is paused (true until it is first played)
    pub fn is_element_paused(&self) -> bool {
        self.state
            .lock()
            .background
            .as_ref()
            .is_none_or(PlaybackElement::is_paused)
    }

    pub fn is_buffer_paused(&self) -> bool {
        self.state.lock().buffer_source.is_none()
    }

    pub fn context_id(&self) -> Option<ContextId> {
        self.state
            .lock()
            .context
            .as_ref()
            .map(|graph| graph.context.id())
    }

    /// State of the live context; `Closed` when there is none
    pub fn context_state(&self) -> ContextState {
        self.state
            .lock()
            .context
            .as_ref()
            .map_or(ContextState::Closed, |graph| graph.context.state())
    }

    /// Whether a capture stream is currently held
    pub fn has_input_stream(&self) -> bool {
        self.state.lock().input.is_some()
    }

    pub fn input_route(&self) -> InputRoute {
        let state = self.state.lock();
        let (Some(graph), Some(input)) = (&state.context, &state.input) else {
            return InputRoute::Disconnected;
        };
        let feeds = |from: &NodeHandle, to: &NodeHandle| {
            graph
                .context
                .outputs_of(from)
                .is_ok_and(|outputs| outputs.contains(to))
        };

        let analyser = graph.analyser.handle();
        if feeds(&input.source, analyser) {
            InputRoute::Direct
        } else if feeds(&input.source, &input.delay) && feeds(&input.delay, analyser) {
            InputRoute::Delayed
        } else {
            InputRoute::Disconnected
        }
    }

    pub fn output_routes(&self) -> OutputRoutes {
        let state = self.state.lock();
        let gain_targets = state
            .context
            .as_ref()
            .and_then(|graph| graph.context.outputs_of(&graph.gain).ok())
            .map(|outputs| outputs.iter().map(NodeHandle::kind).collect())
            .unwrap_or_default();
        OutputRoutes {
            gain_targets,
            element_sink: state
                .output
                .as_ref()
                .and_then(|output| output.element.sink_id().map(str::to_string)),
            background_sink: state
                .background
                .as_ref()
                .and_then(|element| element.sink_id().map(str::to_string)),
        }
    }
}

impl<P: MediaPlatform> LevelSource for AudioDeviceManager<P> {
    fn level(&self) -> f32 {
        self.get_analyser_level()
    }
}

impl<P: MediaPlatform> Drop for AudioDeviceManager<P> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        Self::release_input(state);
        if let Some(source) = state.buffer_source.take() {
            source.stop();
        }
    }
}
