//! Device and track descriptors.
//!
//! These are plain snapshots handed to the view layer; nothing here owns a
//! platform resource.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SampleRate;

/// Class of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Capture device (microphone, line in)
    AudioInput,
    /// Render device (speakers, headphones)
    AudioOutput,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AudioInput => f.write_str("audioinput"),
            Self::AudioOutput => f.write_str("audiooutput"),
        }
    }
}

/// A device as reported by the platform device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub group_id: String,
    pub kind: DeviceKind,
    /// Human readable name; empty when the platform withholds labels
    pub label: String,
}

/// Constraints for a capture request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioConstraints {
    /// Exact device to open, or `None` for the platform default
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    /// Preferred capture rate; platforms may ignore it
    pub sample_rate: Option<SampleRate>,
}

impl AudioConstraints {
    pub fn for_device(device_id: impl Into<String>, echo_cancellation: bool) -> Self {
        Self {
            device_id: Some(device_id.into()),
            echo_cancellation,
            sample_rate: None,
        }
    }
}

/// Capture constraints a platform knows how to honour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedConstraints {
    pub device_id: bool,
    pub echo_cancellation: bool,
    pub sample_rate: bool,
    pub channel_count: bool,
}

impl SupportedConstraints {
    /// Names of the supported constraints, in a stable order.
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.device_id, "deviceId"),
            (self.echo_cancellation, "echoCancellation"),
            (self.sample_rate, "sampleRate"),
            (self.channel_count, "channelCount"),
        ]
        .into_iter()
        .filter_map(|(supported, name)| supported.then_some(name))
        .collect()
    }
}

/// Lifecycle state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackReadyState {
    Live,
    Ended,
}

impl fmt::Display for TrackReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

/// Settings actually applied to a capture track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub device_id: String,
    pub echo_cancellation: bool,
    pub sample_rate: SampleRate,
    pub channel_count: u16,
}

/// Snapshot of a track for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    /// Always `"audio"` for capture tracks
    pub kind: String,
    pub label: String,
    pub enabled: bool,
    pub muted: bool,
    pub ready_state: TrackReadyState,
    pub settings: TrackSettings,
}
