//! Audio processing graph.
//!
//! Nodes are processed in topological order once per block. A node's input is
//! the sum of the outputs of every node connected into it; the graph output is
//! whatever reaches the destination node.

use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use mictest_core::{Frames, RENDER_QUANTUM, Sample, SampleRate, sample_rates};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

/// Identifier of a node within one graph
pub type NodeId = usize;

/// A node in the audio graph
pub struct GraphNode {
    id: NodeId,
    kind: NodeKind,
    processor: Box<dyn Processor>,
}

impl GraphNode {
    /// Get the node's ID
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }
}

/// Connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
}

/// The audio processing graph
pub struct AudioGraph {
    nodes: HashMap<NodeId, GraphNode>,
    connections: HashSet<Connection>,
    next_id: NodeId,

    sample_rate: SampleRate,
    block_size: Frames,

    // Output buffer per node
    node_buffers: HashMap<NodeId, Vec<Sample>>,

    // Input buffer per node, cleared and mixed before each process
    input_buffers: HashMap<NodeId, Vec<Sample>>,

    // Pre-computed on every structural change so process() never allocates
    processing_order: Vec<NodeId>,
    incoming: HashMap<NodeId, SmallVec<[NodeId; 4]>>,

    destination: Option<NodeId>,
}

impl AudioGraph {
    /// Create a new empty audio graph
    pub fn new() -> Self {
        Self::with_config(sample_rates::SR_48000, RENDER_QUANTUM)
    }

    /// Create a new audio graph with specific sample rate and block size
    pub fn with_config(sample_rate: SampleRate, block_size: Frames) -> Self {
        Self {
            nodes: HashMap::new(),
            connections: HashSet::new(),
            next_id: 0,
            sample_rate,
            block_size,
            node_buffers: HashMap::new(),
            input_buffers: HashMap::new(),
            processing_order: Vec::new(),
            incoming: HashMap::new(),
            destination: None,
        }
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn block_size(&self) -> Frames {
        self.block_size
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(GraphNode::kind)
    }

    /// The node whose output becomes the graph output
    pub fn destination(&self) -> Option<NodeId> {
        self.destination
    }

    /// Add a node to the graph
    ///
    /// The first `Destination` node added becomes the graph output.
    pub fn add_node(&mut self, mut processor: Box<dyn Processor>) -> Result<NodeId, NodeError> {
        processor.initialize(self.sample_rate, self.block_size)?;

        let id = self.next_id;
        self.next_id += 1;

        let kind = processor.kind();
        if kind == NodeKind::Destination && self.destination.is_none() {
            self.destination = Some(id);
        }

        self.nodes.insert(
            id,
            GraphNode {
                id,
                kind,
                processor,
            },
        );
        self.input_buffers.insert(id, vec![0.0; self.block_size]);
        self.node_buffers.insert(id, vec![0.0; self.block_size]);

        self.update_processing_order();

        tracing::debug!("Added {:?} node {}", kind, id);
        Ok(id)
    }

    /// Remove a node and every connection touching it
    pub fn remove_node(&mut self, id: NodeId) -> Option<GraphNode> {
        self.connections
            .retain(|conn| conn.from != id && conn.to != id);

        let mut node = self.nodes.remove(&id)?;
        node.processor.deactivate();

        self.node_buffers.remove(&id);
        self.input_buffers.remove(&id);
        if self.destination == Some(id) {
            self.destination = None;
        }

        self.update_processing_order();

        tracing::debug!("Removed {:?} node {}", node.kind, id);
        Some(node)
    }

    /// Remove every node and connection
    pub fn clear(&mut self) {
        for node in self.nodes.values_mut() {
            node.processor.deactivate();
        }
        self.nodes.clear();
        self.connections.clear();
        self.node_buffers.clear();
        self.input_buffers.clear();
        self.processing_order.clear();
        self.incoming.clear();
        self.destination = None;
    }

    /// Connect the output of `from` into the input of `to`
    ///
    /// Connecting an existing edge again is a no-op, so an edge never carries
    /// the signal twice.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), String> {
        if !self.nodes.contains_key(&from) {
            return Err(format!("Source node {from} not found"));
        }
        let Some(target) = self.nodes.get(&to) else {
            return Err(format!("Destination node {to} not found"));
        };
        if !target.processor.accepts_input() {
            return Err(format!("{:?} node {to} has no input", target.kind));
        }

        if self.connections.insert(Connection { from, to }) {
            tracing::debug!("Connected {} -> {}", from, to);
            self.update_processing_order();
        }

        Ok(())
    }

    /// Disconnect two nodes, returning whether the edge existed
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> bool {
        let removed = self.connections.remove(&Connection { from, to });
        if removed {
            tracing::debug!("Disconnected {} -> {}", from, to);
            self.update_processing_order();
        }
        removed
    }

    /// Disconnect every outgoing edge of `from`, returning how many were removed
    pub fn disconnect_all(&mut self, from: NodeId) -> usize {
        let before = self.connections.len();
        self.connections.retain(|conn| conn.from != from);
        let removed = before - self.connections.len();
        if removed > 0 {
            tracing::debug!("Disconnected {} outputs of {}", removed, from);
            self.update_processing_order();
        }
        removed
    }

    /// Targets of every outgoing edge of `from`, sorted
    pub fn outputs_of(&self, from: NodeId) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = self
            .connections
            .iter()
            .filter(|conn| conn.from == from)
            .map(|conn| conn.to)
            .collect();
        targets.sort_unstable();
        targets
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.connections.contains(&Connection { from, to })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Update the processing order after graph structure changes
    /// IMPORTANT: This allocates, so call it on edits, NOT in `process()`
    ///
    /// If the graph contains cycles, falls back to sorted node IDs.
    fn update_processing_order(&mut self) {
        self.incoming.clear();
        for conn in &self.connections {
            self.incoming.entry(conn.to).or_default().push(conn.from);
        }

        match self.topological_sort() {
            Ok(order) => self.processing_order = order,
            Err(cycle_nodes) => {
                tracing::warn!(
                    "Graph contains cycle involving nodes: {:?}. Using linear order instead.",
                    cycle_nodes
                );
                self.processing_order.clear();
                self.processing_order.extend(self.nodes.keys().copied());
                self.processing_order.sort_unstable();
            }
        }
    }

    /// Kahn's algorithm; `Err(remaining_nodes)` if cycles exist
    fn topological_sort(&self) -> Result<Vec<NodeId>, Vec<NodeId>> {
        let mut in_degree: HashMap<NodeId, usize> = HashMap::with_capacity(self.nodes.len());
        for &id in self.nodes.keys() {
            in_degree.insert(id, 0);
        }

        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(self.nodes.len());
        for conn in &self.connections {
            *in_degree.entry(conn.to).or_insert(0) += 1;
            adjacency.entry(conn.from).or_default().push(conn.to);
        }

        // Min-heap keeps the order deterministic
        let mut queue: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(node_id)) = queue.pop() {
            result.push(node_id);

            if let Some(outgoing) = adjacency.get(&node_id) {
                for &to_id in outgoing {
                    if let Some(degree) = in_degree.get_mut(&to_id) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push(Reverse(to_id));
                        }
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Ok(result)
        } else {
            let processed: HashSet<NodeId> = result.into_iter().collect();
            let remaining = self
                .nodes
                .keys()
                .filter(|id| !processed.contains(id))
                .copied()
                .collect();
            Err(remaining)
        }
    }

    /// Render one block into `output`
    ///
    /// At most `block_size` frames are rendered; any tail beyond that is
    /// silenced. A node that fails to process outputs silence for the block.
    pub fn process(&mut self, output: &mut [Sample]) {
        let frames = output.len().min(self.block_size);
        output.fill(0.0);

        if self.nodes.is_empty() {
            return;
        }

        for input_buffer in self.input_buffers.values_mut() {
            input_buffer[..frames].fill(0.0);
        }

        for &node_id in &self.processing_order {
            if let (Some(input_buffer), Some(sources)) = (
                self.input_buffers.get_mut(&node_id),
                self.incoming.get(&node_id),
            ) {
                for source_id in sources {
                    if let Some(source_output) = self.node_buffers.get(source_id) {
                        for (input_sample, &source_sample) in input_buffer[..frames]
                            .iter_mut()
                            .zip(&source_output[..frames])
                        {
                            *input_sample += source_sample;
                        }
                    }
                }
            }

            if let (Some(node), Some(input_buffer), Some(output_buffer)) = (
                self.nodes.get_mut(&node_id),
                self.input_buffers.get(&node_id),
                self.node_buffers.get_mut(&node_id),
            ) {
                let mut audio = AudioBuffer {
                    input: &input_buffer[..frames],
                    output: &mut output_buffer[..frames],
                    frames,
                };

                // Real-time path: no logging, silence on error
                if node.processor.process(&mut audio).is_err() {
                    output_buffer[..frames].fill(0.0);
                }
            }
        }

        if let Some(node_output) = self
            .destination
            .and_then(|id| self.node_buffers.get(&id))
        {
            output[..frames].copy_from_slice(&node_output[..frames]);
        }
    }
}

impl Default for AudioGraph {
    fn default() -> Self {
        Self::new()
    }
}
