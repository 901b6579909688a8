//! Gain processor - fixed volume scaling.

use mictest_core::{Frames, SampleRate};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

/// Largest accepted gain factor (+6 dB)
pub const MAX_GAIN: f32 = 2.0;

/// Multiplies every sample by a gain factor fixed at construction
///
/// The context's output gain sits between the analyser and whichever
/// destination is currently attached, at unity.
pub struct GainProcessor {
    gain: f32,
}

impl Default for GainProcessor {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

impl GainProcessor {
    /// Gain is clamped to `0.0..=MAX_GAIN`
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, MAX_GAIN),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Processor for GainProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Gain
    }

    fn initialize(&mut self, _sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        if audio.input.len() < audio.frames || audio.output.len() < audio.frames {
            return Err(NodeError::ProcessingFailed(format!(
                "Gain needs {} frames, got input {} / output {}",
                audio.frames,
                audio.input.len(),
                audio.output.len()
            )));
        }

        for (out, &sample) in audio.output[..audio.frames]
            .iter_mut()
            .zip(&audio.input[..audio.frames])
        {
            *out = sample * self.gain;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_default() {
        assert_eq!(GainProcessor::default().gain(), 1.0);
    }

    #[test]
    fn test_gain_clamping() {
        assert_eq!(GainProcessor::new(10.0).gain(), MAX_GAIN);
        assert_eq!(GainProcessor::new(-1.0).gain(), 0.0);
    }

    #[test]
    fn test_gain_processing() {
        let mut processor = GainProcessor::new(0.5);
        processor.initialize(48000, 128).unwrap();

        let input = vec![1.0; 64];
        let mut output = vec![0.0; 64];
        let mut audio = AudioBuffer {
            input: &input,
            output: &mut output,
            frames: 64,
        };

        processor.process(&mut audio).unwrap();
        assert!(output.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_short_buffers_rejected() {
        let mut processor = GainProcessor::default();
        let input = vec![1.0; 16];
        let mut output = vec![0.0; 16];
        let mut audio = AudioBuffer {
            input: &input,
            output: &mut output,
            frames: 32,
        };
        assert!(processor.process(&mut audio).is_err());
    }
}
