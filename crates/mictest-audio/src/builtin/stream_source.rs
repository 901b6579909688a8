//! Source node bound to a capture stream.

use mictest_core::{Frames, SampleRate, SampleReader};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

/// Pulls samples from a capture reader on every block
///
/// The reader is owned by the node; dropping the node releases it.
pub struct StreamSourceProcessor {
    reader: Box<dyn SampleReader>,
}

impl StreamSourceProcessor {
    pub fn new(reader: Box<dyn SampleReader>) -> Self {
        Self { reader }
    }
}

impl Processor for StreamSourceProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::StreamSource
    }

    fn initialize(&mut self, _sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        self.reader.read(&mut audio.output[..audio.frames]);
        Ok(())
    }

    fn accepts_input(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mictest_comms::sample_ring;

    #[test]
    fn test_reads_ring_and_pads_with_silence() {
        let (mut writer, reader) = sample_ring(16);
        writer.write(&[0.5, 0.25]);

        let mut source = StreamSourceProcessor::new(Box::new(reader));
        let input = [1.0; 4];
        let mut output = [9.0; 4];
        let mut audio = AudioBuffer {
            input: &input,
            output: &mut output,
            frames: 4,
        };
        source.process(&mut audio).unwrap();
        assert_eq!(output, [0.5, 0.25, 0.0, 0.0]);
    }
}
