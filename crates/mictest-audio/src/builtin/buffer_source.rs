//! One-shot player for decoded audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use mictest_core::{DecodedAudio, Frames, SampleRate};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

/// Playback state of a buffer source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Created, never started
    Idle,
    Playing,
    /// Stopped or ran off the end; can never play again
    Ended,
}

impl SourceState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Playing => 1,
            Self::Ended => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Playing,
            _ => Self::Ended,
        }
    }
}

/// Control block shared between a buffer source node and its handle
#[derive(Debug)]
pub struct SourceControl {
    state: AtomicU8,
    looping: AtomicBool,
}

impl Default for SourceControl {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(SourceState::Idle.to_u8()),
            looping: AtomicBool::new(false),
        }
    }
}

impl SourceControl {
    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }

    /// Move from `Idle` to `Playing`; returns false if the source was ever started
    pub fn start(&self) -> bool {
        self.state
            .compare_exchange(
                SourceState::Idle.to_u8(),
                SourceState::Playing.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn stop(&self) {
        self.state
            .store(SourceState::Ended.to_u8(), Ordering::Release);
    }
}

/// Plays a shared decoded buffer once, or forever when looping
pub struct BufferSourceProcessor {
    audio: Arc<DecodedAudio>,
    control: Arc<SourceControl>,
    position: usize,
}

impl BufferSourceProcessor {
    pub fn new(audio: Arc<DecodedAudio>, control: Arc<SourceControl>) -> Self {
        Self {
            audio,
            control,
            position: 0,
        }
    }
}

impl Processor for BufferSourceProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::BufferSource
    }

    fn initialize(&mut self, _sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        let output = &mut audio.output[..audio.frames];
        if self.control.state() != SourceState::Playing {
            output.fill(0.0);
            return Ok(());
        }

        let samples = self.audio.samples();
        let looping = self.control.is_looping();
        let mut written = 0;
        while written < output.len() {
            if self.position >= samples.len() {
                if looping && !samples.is_empty() {
                    self.position = 0;
                } else {
                    self.control.stop();
                    break;
                }
            }
            let count = (output.len() - written).min(samples.len() - self.position);
            output[written..written + count]
                .copy_from_slice(&samples[self.position..self.position + count]);
            self.position += count;
            written += count;
        }
        output[written..].fill(0.0);

        Ok(())
    }

    fn accepts_input(&self) -> bool {
        false
    }

    fn deactivate(&mut self) {
        self.control.stop();
    }
}
