//! Node abstraction layer.
//!
//! This crate defines the `Processor` trait that every node in the audio
//! graph implements (sources, gain, delay, analyser, destinations). The graph
//! engine only ever talks to nodes through this trait.

use mictest_core::{Frames, Sample, SampleRate};

/// Mono audio buffer for one processing block
pub struct AudioBuffer<'a> {
    pub input: &'a [Sample],
    pub output: &'a mut [Sample],
    pub frames: Frames,
}

impl AudioBuffer<'_> {
    /// Copy input straight to output.
    pub fn pass_through(&mut self) {
        let frames = self.frames;
        self.output[..frames].copy_from_slice(&self.input[..frames]);
    }
}

/// Role a node plays in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Hardware destination of a context
    Destination,
    Gain,
    Delay,
    Analyser,
    /// Source bound to a capture stream
    StreamSource,
    /// Destination feeding a stream consumed by a playback element
    StreamDestination,
    /// One-shot decoded buffer player
    BufferSource,
}

/// Main trait all graph nodes implement
pub trait Processor: Send {
    /// Role of this node
    fn kind(&self) -> NodeKind;

    /// Prepare for processing at the given sample rate and max block size
    fn initialize(
        &mut self,
        sample_rate: SampleRate,
        max_block_size: Frames,
    ) -> Result<(), NodeError>;

    /// Process one block
    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError>;

    /// Whether the node consumes upstream audio
    fn accepts_input(&self) -> bool {
        true
    }

    /// Release resources when the node leaves the graph
    fn deactivate(&mut self) {}
}

/// Node-related errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Node processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Processor for Silent {
        fn kind(&self) -> NodeKind {
            NodeKind::Gain
        }

        fn initialize(&mut self, _: SampleRate, _: Frames) -> Result<(), NodeError> {
            Ok(())
        }

        fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
            audio.output.fill(0.0);
            Ok(())
        }
    }

    #[test]
    fn test_defaults() {
        let mut node = Silent;
        assert_eq!(node.kind(), NodeKind::Gain);
        assert!(node.accepts_input());
        node.deactivate();
    }

    #[test]
    fn test_pass_through() {
        let input = [0.25; 8];
        let mut output = [0.0; 8];
        let mut audio = AudioBuffer {
            input: &input,
            output: &mut output,
            frames: 4,
        };
        audio.pass_through();
        assert_eq!(output[..4], [0.25; 4]);
        assert_eq!(output[4..], [0.0; 4]);
    }
}
