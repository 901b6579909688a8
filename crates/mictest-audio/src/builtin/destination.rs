//! Hardware destination of a context.

use mictest_core::{Frames, SampleRate};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

/// Terminal node whose output is handed to the render driver
#[derive(Default)]
pub struct DestinationProcessor;

impl Processor for DestinationProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Destination
    }

    fn initialize(&mut self, _sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        audio.pass_through();
        Ok(())
    }
}
