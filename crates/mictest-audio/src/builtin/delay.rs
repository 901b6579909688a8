//! Delay line processor.

use mictest_core::{Frames, SampleRate};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

/// Fixed-capacity delay line
///
/// Capacity is set by the maximum delay time at construction. The delay time
/// is clamped into that capacity.
pub struct DelayProcessor {
    max_delay: f32,
    delay_time: f32,
    sample_rate: SampleRate,
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayProcessor {
    /// Create a delay line that can hold up to `max_delay` seconds
    pub fn new(max_delay: f32, delay_time: f32) -> Self {
        let max_delay = max_delay.max(0.0);
        Self {
            max_delay,
            delay_time: delay_time.clamp(0.0, max_delay),
            sample_rate: 48000,
            buffer: Vec::new(),
            write_pos: 0,
        }
    }

    /// Delay time in seconds
    pub fn delay_time(&self) -> f32 {
        self.delay_time
    }

    fn delay_frames(&self) -> usize {
        (self.delay_time * self.sample_rate as f32).round() as usize
    }
}

impl Processor for DelayProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Delay
    }

    fn initialize(&mut self, sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), NodeError> {
        if sample_rate == 0 {
            return Err(NodeError::InitializationFailed(
                "Delay needs a non-zero sample rate".to_string(),
            ));
        }
        self.sample_rate = sample_rate;
        let capacity = (self.max_delay * sample_rate as f32).ceil() as usize + 1;
        self.buffer = vec![0.0; capacity];
        self.write_pos = 0;
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        let len = self.buffer.len();
        if len == 0 {
            return Err(NodeError::InvalidState(
                "Delay used before initialization".to_string(),
            ));
        }

        let delay = self.delay_frames().min(len - 1);
        for (out, &sample) in audio.output[..audio.frames]
            .iter_mut()
            .zip(&audio.input[..audio.frames])
        {
            self.buffer[self.write_pos] = sample;
            let read_pos = (self.write_pos + len - delay) % len;
            *out = self.buffer[read_pos];
            self.write_pos = (self.write_pos + 1) % len;
        }

        Ok(())
    }

    fn deactivate(&mut self) {
        self.buffer.clear();
    }
}
