//! Audio contexts and the processing graph.
//!
//! This crate provides the audio graph, the built-in nodes a context can
//! create, fixture decoding, and the drivers (cpal device, clock thread or
//! manual) that render a context.

pub mod builtin;
pub mod context;
pub mod decode;
pub mod engine;
pub mod graph;

pub use context::{
    AnalyserNode, AudioBufferSourceNode, AudioContext, ContextId, ContextState, NodeHandle,
};
pub use engine::{RenderDriver, StreamThread};
pub use graph::AudioGraph;

use serde::{Deserialize, Serialize};

use mictest_core::{SampleRate, sample_rates};

/// What clocks a context's graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverKind {
    /// The default cpal output device
    #[default]
    Device,
    /// A real-time paced thread with no audible output
    Clock,
    /// Nothing; the owner calls `AudioContext::render`
    Manual,
}

/// Context configuration
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub sample_rate: SampleRate,
    pub driver: DriverKind,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            sample_rate: sample_rates::SR_48000,
            driver: DriverKind::Device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ContextOptions::default();
        assert_eq!(options.sample_rate, 48000);
        assert_eq!(options.driver, DriverKind::Device);
    }
}
