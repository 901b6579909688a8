//! Built-in audio processors.
//!
//! Every node a context can create is implemented here against the
//! `Processor` trait. The context wraps them in typed handles; nothing else
//! constructs them directly.

pub mod analyser;
pub mod buffer_source;
pub mod delay;
pub mod destination;
pub mod gain;
pub mod stream_destination;
pub mod stream_source;

pub use analyser::{AnalyserProcessor, AnalyserState};
pub use buffer_source::{BufferSourceProcessor, SourceControl, SourceState};
pub use delay::DelayProcessor;
pub use destination::DestinationProcessor;
pub use gain::GainProcessor;
pub use stream_destination::StreamDestinationProcessor;
pub use stream_source::StreamSourceProcessor;
