//! Capture streams and their tracks.
//!
//! A [`MediaStream`] bundles the tracks of one capture request with the
//! reader that delivers its audio. Stopping a track is final and runs the
//! platform's release hook exactly once, however many clones of the track
//! exist.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mictest_core::{SampleReader, TrackInfo, TrackReadyState, TrackSettings};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

type StopHook = Box<dyn FnOnce() + Send>;

struct TrackInner {
    id: String,
    label: String,
    settings: TrackSettings,
    enabled: AtomicBool,
    muted: AtomicBool,
    ended: AtomicBool,
    on_stop: Mutex<Option<StopHook>>,
}

/// One audio track of a capture stream
///
/// Clones share state: stopping any clone ends them all.
#[derive(Clone)]
pub struct MediaStreamTrack {
    inner: Arc<TrackInner>,
}

impl MediaStreamTrack {
    /// Create a live track; `on_stop` releases the platform resource behind it
    pub fn new(
        label: impl Into<String>,
        settings: TrackSettings,
        on_stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        let id = format!("track-{}", NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(TrackInner {
                id,
                label: label.into(),
                settings,
                enabled: AtomicBool::new(true),
                muted: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                on_stop: Mutex::new(Some(Box::new(on_stop))),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> &'static str {
        "audio"
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn settings(&self) -> &TrackSettings {
        &self.inner.settings
    }

    pub fn device_id(&self) -> &str {
        &self.inner.settings.device_id
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the platform is currently withholding audio
    pub fn muted(&self) -> bool {
        self.inner.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::Release);
    }

    pub fn ready_state(&self) -> TrackReadyState {
        if self.inner.ended.load(Ordering::Acquire) {
            TrackReadyState::Ended
        } else {
            TrackReadyState::Live
        }
    }

    pub fn is_live(&self) -> bool {
        self.ready_state() == TrackReadyState::Live
    }

    /// End the track and release its platform resource. Idempotent.
    pub fn stop(&self) {
        if self.inner.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self.inner.on_stop.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        tracing::debug!("Stopped track {} ({})", self.inner.id, self.inner.label);
    }

    /// Whether two handles refer to the same track
    pub fn same_track(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot for display
    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.inner.id.clone(),
            kind: self.kind().to_string(),
            label: self.inner.label.clone(),
            enabled: self.enabled(),
            muted: self.muted(),
            ready_state: self.ready_state(),
            settings: self.inner.settings.clone(),
        }
    }
}

impl fmt::Debug for MediaStreamTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStreamTrack")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

/// A live capture handle bound to one input device
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaStreamTrack>,
    reader: Option<Box<dyn SampleReader>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaStreamTrack>, reader: Box<dyn SampleReader>) -> Self {
        Self {
            id: format!("stream-{}", NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)),
            tracks,
            reader: Some(reader),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaStreamTrack] {
        &self.tracks
    }

    /// Whether any track is still live
    pub fn active(&self) -> bool {
        self.tracks.iter().any(MediaStreamTrack::is_live)
    }

    /// Hand the audio reader to a source node. Only the first call gets it.
    pub fn take_reader(&mut self) -> Option<Box<dyn SampleReader>> {
        self.reader.take()
    }

    /// Stop every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks)
            .finish_non_exhaustive()
    }
}
