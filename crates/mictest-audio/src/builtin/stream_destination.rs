//! Destination node that exposes its input as a stream.

use mictest_comms::SampleWriter;
use mictest_core::{Frames, SampleRate};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

/// Writes every block it receives into a sample ring
///
/// A playback element reads the other end of the ring. The node itself has
/// no audible output. Blocks are dropped while the ring is full.
pub struct StreamDestinationProcessor {
    writer: SampleWriter,
}

impl StreamDestinationProcessor {
    pub fn new(writer: SampleWriter) -> Self {
        Self { writer }
    }
}

impl Processor for StreamDestinationProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::StreamDestination
    }

    fn initialize(&mut self, _sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        if !self.writer.is_abandoned() {
            self.writer.write(&audio.input[..audio.frames]);
        }
        audio.output[..audio.frames].fill(0.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mictest_comms::sample_ring;
    use mictest_core::SampleReader;

    #[test]
    fn test_forwards_input_to_reader() {
        let (writer, mut reader) = sample_ring(16);
        let mut node = StreamDestinationProcessor::new(writer);

        let input = [0.1, 0.2, 0.3];
        let mut output = [9.0; 3];
        let mut audio = AudioBuffer {
            input: &input,
            output: &mut output,
            frames: 3,
        };
        node.process(&mut audio).unwrap();
        assert_eq!(output, [0.0; 3]);

        let mut received = [0.0; 3];
        assert_eq!(reader.read(&mut received), 3);
        assert_eq!(received, input);
    }
}
