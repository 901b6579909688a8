//! Audio context - the root container of one audio graph.
//!
//! A context owns its graph, its hardware destination and the driver that
//! renders it. Node handles carry the id of the context that created them;
//! handing a node to a different context is a [`Error::Graph`], and every
//! operation on a closed context is [`Error::ContextUnavailable`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::builtin::analyser::is_valid_fft_size;
use crate::builtin::{
    AnalyserProcessor, AnalyserState, BufferSourceProcessor, DelayProcessor, DestinationProcessor,
    GainProcessor, SourceControl, SourceState, StreamDestinationProcessor, StreamSourceProcessor,
};
use crate::engine::{ClockDriver, DeviceDriver, RenderDriver};
use crate::graph::{AudioGraph, NodeId};
use crate::{ContextOptions, DriverKind, decode};
use mictest_comms::{RingReader, sample_ring};
use mictest_core::{
    DecodedAudio, Error, RENDER_QUANTUM, Result, Sample, SampleRate, SampleReader,
};
use mictest_node::{NodeError, NodeKind, Processor};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id of a context within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl ContextState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Suspended => 0,
            Self::Running => 1,
            Self::Closed => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Suspended,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspended => f.write_str("suspended"),
            Self::Running => f.write_str("running"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Reference to a node inside a specific context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    context: ContextId,
    id: NodeId,
    kind: NodeKind,
}

impl NodeHandle {
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }
}

/// Analyser node plus read access to its spectrum
///
/// The handle does not keep the analyser alive. Once the node is removed or
/// its context closes, reads fill zeros and report `false`.
#[derive(Debug, Clone)]
pub struct AnalyserNode {
    handle: NodeHandle,
    fft_size: usize,
    state: Weak<Mutex<AnalyserState>>,
}

impl AnalyserNode {
    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Whether the underlying node still exists
    pub fn is_live(&self) -> bool {
        self.state.strong_count() > 0
    }

    /// Copy the current byte spectrum into `out`
    ///
    /// Returns `false` (with `out` zeroed) if the node no longer exists.
    pub fn get_byte_frequency_data(&self, out: &mut [u8]) -> bool {
        match self.state.upgrade() {
            Some(state) => {
                state.lock().byte_frequency_data(out);
                true
            }
            None => {
                out.fill(0);
                false
            }
        }
    }
}

/// One-shot buffer player
#[derive(Debug, Clone)]
pub struct AudioBufferSourceNode {
    handle: NodeHandle,
    control: Arc<SourceControl>,
}

impl AudioBufferSourceNode {
    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    pub fn state(&self) -> SourceState {
        self.control.state()
    }

    pub fn is_looping(&self) -> bool {
        self.control.is_looping()
    }

    pub fn set_loop(&self, looping: bool) {
        self.control.set_looping(looping);
    }

    /// Start playback. A source can only ever be started once.
    pub fn start(&self) -> Result<()> {
        if self.control.start() {
            Ok(())
        } else {
            Err(Error::Graph(format!(
                "buffer source {} can only be started once",
                self.handle.id
            )))
        }
    }

    /// Stop playback for good
    pub fn stop(&self) {
        self.control.stop();
    }
}

/// State shared between a context and its render driver
pub(crate) struct ContextInner {
    id: ContextId,
    sample_rate: SampleRate,
    state: AtomicU8,
    graph: Mutex<AudioGraph>,
}

impl ContextInner {
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ContextState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// Render without ever blocking; silence while an edit holds the graph
    pub(crate) fn try_render(&self, out: &mut [Sample]) {
        if self.state() != ContextState::Running {
            out.fill(0.0);
            return;
        }
        match self.graph.try_lock() {
            Some(mut graph) => render_graph(&mut graph, out),
            None => out.fill(0.0),
        }
    }

    fn render(&self, out: &mut [Sample]) {
        if self.state() != ContextState::Running {
            out.fill(0.0);
            return;
        }
        render_graph(&mut self.graph.lock(), out);
    }
}

fn render_graph(graph: &mut AudioGraph, out: &mut [Sample]) {
    let block = graph.block_size();
    for chunk in out.chunks_mut(block) {
        graph.process(chunk);
    }
}

fn node_error(err: NodeError) -> Error {
    Error::Graph(err.to_string())
}

/// The root container of an audio graph
pub struct AudioContext {
    inner: Arc<ContextInner>,
    destination: NodeHandle,
    driver: Mutex<Option<Box<dyn RenderDriver>>>,
}

impl AudioContext {
    /// Create a running context with a hardware destination
    pub fn new(options: &ContextOptions) -> Result<Self> {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));

        let mut graph = AudioGraph::with_config(options.sample_rate, RENDER_QUANTUM);
        let destination_id = graph
            .add_node(Box::new(DestinationProcessor))
            .map_err(node_error)?;

        let inner = Arc::new(ContextInner {
            id,
            sample_rate: options.sample_rate,
            state: AtomicU8::new(ContextState::Running.to_u8()),
            graph: Mutex::new(graph),
        });

        let driver: Option<Box<dyn RenderDriver>> = match options.driver {
            DriverKind::Device => Some(Box::new(
                DeviceDriver::start(Arc::clone(&inner))
                    .map_err(|e| Error::ContextUnavailable(format!("{e:#}")))?,
            )),
            DriverKind::Clock => Some(Box::new(
                ClockDriver::start(Arc::clone(&inner))
                    .map_err(|e| Error::ContextUnavailable(e.to_string()))?,
            )),
            DriverKind::Manual => None,
        };

        tracing::info!(
            "Audio context {} created at {} Hz ({:?} driver)",
            id,
            options.sample_rate,
            options.driver
        );

        Ok(Self {
            inner,
            destination: NodeHandle {
                context: id,
                id: destination_id,
                kind: NodeKind::Destination,
            },
            driver: Mutex::new(driver),
        })
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.inner.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.inner.state()
    }

    /// The hardware destination node
    pub fn destination(&self) -> &NodeHandle {
        &self.destination
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == ContextState::Closed {
            return Err(Error::ContextUnavailable(format!(
                "context {} is closed",
                self.inner.id
            )));
        }
        Ok(())
    }

    fn check(&self, node: &NodeHandle) -> Result<()> {
        if node.context != self.inner.id {
            return Err(Error::Graph(format!(
                "{:?} node {} belongs to context {}, not {}",
                node.kind, node.id, node.context, self.inner.id
            )));
        }
        Ok(())
    }

    fn add(&self, processor: Box<dyn Processor>) -> Result<NodeHandle> {
        self.ensure_open()?;
        let kind = processor.kind();
        let id = self
            .inner
            .graph
            .lock()
            .add_node(processor)
            .map_err(node_error)?;
        Ok(NodeHandle {
            context: self.inner.id,
            id,
            kind,
        })
    }

    pub fn create_gain(&self) -> Result<NodeHandle> {
        self.add(Box::new(GainProcessor::default()))
    }

    /// Create a delay line holding up to `max_delay` seconds, set to `delay_time`
    pub fn create_delay(&self, max_delay: f32, delay_time: f32) -> Result<NodeHandle> {
        self.add(Box::new(DelayProcessor::new(max_delay, delay_time)))
    }

    pub fn create_analyser(&self, fft_size: usize) -> Result<AnalyserNode> {
        if !is_valid_fft_size(fft_size) {
            return Err(Error::Graph(format!(
                "FFT size {fft_size} must be a power of two between 32 and 32768"
            )));
        }
        let state = Arc::new(Mutex::new(AnalyserState::new(fft_size)));
        let weak = Arc::downgrade(&state);
        let handle = self.add(Box::new(AnalyserProcessor::new(state)))?;
        Ok(AnalyserNode {
            handle,
            fft_size,
            state: weak,
        })
    }

    /// Create a source node that pulls from a capture stream's reader
    pub fn create_media_stream_source(&self, reader: Box<dyn SampleReader>) -> Result<NodeHandle> {
        self.add(Box::new(StreamSourceProcessor::new(reader)))
    }

    /// Create a destination node and the reader carrying what it receives
    ///
    /// The reader buffers up to half a second of audio.
    pub fn create_media_stream_destination(&self) -> Result<(NodeHandle, RingReader)> {
        let capacity = (self.inner.sample_rate as usize / 2).max(RENDER_QUANTUM);
        let (writer, reader) = sample_ring(capacity);
        let handle = self.add(Box::new(StreamDestinationProcessor::new(writer)))?;
        Ok((handle, reader))
    }

    pub fn create_buffer_source(&self, audio: Arc<DecodedAudio>) -> Result<AudioBufferSourceNode> {
        let control = Arc::new(SourceControl::default());
        let handle = self.add(Box::new(BufferSourceProcessor::new(
            audio,
            Arc::clone(&control),
        )))?;
        Ok(AudioBufferSourceNode { handle, control })
    }

    /// Connect the output of `from` into `to`
    pub fn connect(&self, from: &NodeHandle, to: &NodeHandle) -> Result<()> {
        self.ensure_open()?;
        self.check(from)?;
        self.check(to)?;
        self.inner
            .graph
            .lock()
            .connect(from.id, to.id)
            .map_err(Error::Graph)
    }

    /// Disconnect every outgoing edge of `node`; returns how many were removed
    pub fn disconnect(&self, node: &NodeHandle) -> Result<usize> {
        self.ensure_open()?;
        self.check(node)?;
        Ok(self.inner.graph.lock().disconnect_all(node.id))
    }

    /// Nodes that `node` currently feeds
    pub fn outputs_of(&self, node: &NodeHandle) -> Result<Vec<NodeHandle>> {
        self.ensure_open()?;
        self.check(node)?;
        let graph = self.inner.graph.lock();
        Ok(graph
            .outputs_of(node.id)
            .into_iter()
            .filter_map(|id| {
                graph.kind_of(id).map(|kind| NodeHandle {
                    context: self.inner.id,
                    id,
                    kind,
                })
            })
            .collect())
    }

    /// Remove a node and all its edges. Removing a missing node is a no-op.
    pub fn remove(&self, node: &NodeHandle) -> Result<()> {
        self.ensure_open()?;
        self.check(node)?;
        self.inner.graph.lock().remove_node(node.id);
        Ok(())
    }

    /// Render `out.len()` frames synchronously
    ///
    /// Used with the manual driver; suspended and closed contexts render silence.
    pub fn render(&self, out: &mut [Sample]) {
        self.inner.render(out);
    }

    /// Decode fixture audio at this context's sample rate
    pub fn decode_audio_data(&self, bytes: &[u8]) -> Result<DecodedAudio> {
        self.ensure_open()?;
        decode::decode_wav(bytes, self.inner.sample_rate)
    }

    pub fn resume(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state() != ContextState::Running {
            self.inner.set_state(ContextState::Running);
            tracing::info!("Audio context {} resumed", self.inner.id);
        }
        Ok(())
    }

    pub fn suspend(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state() != ContextState::Suspended {
            self.inner.set_state(ContextState::Suspended);
            tracing::info!("Audio context {} suspended", self.inner.id);
        }
        Ok(())
    }

    /// Stop rendering and release every node. Idempotent.
    pub fn close(&self) {
        if self.state() == ContextState::Closed {
            return;
        }
        self.inner.set_state(ContextState::Closed);

        if let Some(mut driver) = self.driver.lock().take() {
            driver.stop();
            tracing::debug!("Stopped {} driver of context {}", driver.name(), self.inner.id);
        }
        self.inner.graph.lock().clear();

        tracing::info!("Audio context {} closed", self.inner.id);
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContext")
            .field("id", &self.inner.id)
            .field("sample_rate", &self.inner.sample_rate)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
