//! Platform boundary for capture, enumeration, fixture assets and playback.
//!
//! The manager only ever talks to the platform through the traits in this
//! crate. Two implementations ship with it:
//! - [`CpalPlatform`]: real devices on the default cpal host
//! - [`SimulatedPlatform`]: scripted devices and assets for tests and demos

pub mod cpal_platform;
pub mod simulated;
pub mod stream;

pub use cpal_platform::CpalPlatform;
pub use simulated::{SimulatedDevice, SimulatedPlatform};
pub use stream::{MediaStream, MediaStreamTrack};

use std::future::Future;
use std::sync::Arc;

use mictest_core::{
    AudioConstraints, DeviceDescriptor, Error, Result, SampleRate, SampleReader,
    SupportedConstraints,
};

/// Permission, capture and enumeration
pub trait MediaDevices: Send + Sync {
    /// Ask for a capture stream matching `constraints`
    ///
    /// Fails with `PermissionDenied` when capture is refused and
    /// `DeviceUnavailable` when no matching device can be opened.
    fn get_user_media(
        &self,
        constraints: &AudioConstraints,
    ) -> impl Future<Output = Result<MediaStream>> + Send;

    /// List every input and output device
    ///
    /// Labels may be empty until capture permission has been granted once.
    fn enumerate_devices(&self) -> impl Future<Output = Result<Vec<DeviceDescriptor>>> + Send;

    fn supported_constraints(&self) -> SupportedConstraints;
}

/// Fixture asset loading
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// A playback element: a paused-or-playing player of one sample stream
pub trait PlaybackElement: Send {
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn is_paused(&self) -> bool;

    /// Linear volume, clamped to `[0, 1]`
    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    /// Output device the element renders to; `None` is the platform default
    fn sink_id(&self) -> Option<&str>;

    /// Move the element to another output device
    ///
    /// Called through a [`SinkRouting`]; callers should not use it directly.
    fn apply_sink(&mut self, sink_id: &str) -> Result<()>;
}

/// Capability to direct playback elements at a specific output device
pub trait SinkRouting: Send + Sync {
    fn is_supported(&self) -> bool;

    fn set_sink(&self, element: &mut dyn PlaybackElement, sink_id: &str) -> Result<()>;
}

/// Sink routing on platforms that can pick an output device per element
#[derive(Debug, Default, Clone, Copy)]
pub struct ElementSinkRouting;

impl SinkRouting for ElementSinkRouting {
    fn is_supported(&self) -> bool {
        true
    }

    fn set_sink(&self, element: &mut dyn PlaybackElement, sink_id: &str) -> Result<()> {
        element.apply_sink(sink_id)?;
        tracing::debug!("Routed playback element to sink {}", sink_id);
        Ok(())
    }
}

/// Sink routing on platforms without it
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSinkRouting;

impl SinkRouting for NoSinkRouting {
    fn is_supported(&self) -> bool {
        false
    }

    fn set_sink(&self, _element: &mut dyn PlaybackElement, sink_id: &str) -> Result<()> {
        Err(Error::UnsupportedOperation(format!(
            "cannot route playback to '{sink_id}': output device selection is not supported"
        )))
    }
}

/// Creates playback elements and hands out the platform's sink routing
pub trait OutputBackend: Send + Sync {
    type Element: PlaybackElement + 'static;

    /// Create a paused element that plays `source`, which runs at `sample_rate`
    fn create_element(
        &self,
        source: Box<dyn SampleReader>,
        sample_rate: SampleRate,
    ) -> Result<Self::Element>;

    /// Chosen once at construction
    fn sink_routing(&self) -> Arc<dyn SinkRouting>;
}

/// Everything the device manager needs from a platform
pub trait MediaPlatform: MediaDevices + AssetFetcher + OutputBackend {}

impl<T: MediaDevices + AssetFetcher + OutputBackend> MediaPlatform for T {}
