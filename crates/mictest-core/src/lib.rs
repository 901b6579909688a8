//! Core types, traits, and constants shared across the mictest crates.
//!
//! Every other crate in the workspace depends on this one for the sample
//! type aliases, the device/track descriptors the view layer renders, and the
//! error taxonomy that device operations surface.

pub mod buffer;
pub mod device;

pub use buffer::{DecodedAudio, LoopingReader, SampleReader, SilenceReader};
pub use device::{
    AudioConstraints, DeviceDescriptor, DeviceKind, SupportedConstraints, TrackInfo,
    TrackReadyState, TrackSettings,
};

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Audio sample type
pub type Sample = f32;

/// Common sample rates
pub mod sample_rates {
    use super::SampleRate;

    /// 44.1 kHz sample rate (CD quality)
    pub const SR_44100: SampleRate = 44100;
    /// 48 kHz sample rate (default context rate)
    pub const SR_48000: SampleRate = 48000;
}

/// Frames rendered per graph pass, matching the Web Audio render quantum.
pub const RENDER_QUANTUM: Frames = 128;

/// Errors surfaced by device, graph and fixture operations.
///
/// The first four variants are the taxonomy the view layer turns into status
/// text. None of them are retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture request rejected or dismissed
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Selected device is gone, busy or never existed
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capability absent on this platform (e.g. sink routing)
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Fixture audio could not be decoded
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// No live audio context; only an explicit recreate recovers
    #[error("Audio context unavailable: {0}")]
    ContextUnavailable(String),

    /// Invalid graph edit (foreign or removed node)
    #[error("Graph error: {0}")]
    Graph(String),

    /// A newer request of the same kind was issued while this one was in flight
    #[error("Superseded by a newer {0} request")]
    Superseded(&'static str),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
