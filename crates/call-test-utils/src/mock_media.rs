//! Fake capture device.
//!
//! # Example
//!
//! ```rust,ignore
//! use call_test_utils::FakeMediaCapture;
//!
//! let capture = FakeMediaCapture::new();
//! // ... run a call ...
//! assert!(capture.all_stopped_once());
//!
//! let blocked = FakeMediaCapture::denying("permission dismissed");
//! ```

use async_trait::async_trait;
use call_session::media::{
    LocalTrack, MediaCapture, MediaConstraints, MediaError, MediaTracks, TrackKind,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A local track that counts `stop()` calls.
#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stops: AtomicUsize,
}

impl FakeTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_count() > 0
    }
}

impl LocalTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct CaptureState {
    denied: Option<String>,
    acquisitions: usize,
    tracks: Vec<Arc<FakeTrack>>,
}

/// Capture device that grants (or denies) tracks on demand.
#[derive(Debug, Clone, Default)]
pub struct FakeMediaCapture {
    inner: Arc<Mutex<CaptureState>>,
}

impl FakeMediaCapture {
    /// A capture device that grants every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// A capture device whose permission prompt is rejected.
    pub fn denying(reason: impl Into<String>) -> Self {
        let capture = Self::new();
        capture.set_denied(Some(reason.into()));
        capture
    }

    /// Change the permission outcome for subsequent acquisitions.
    pub fn set_denied(&self, reason: Option<String>) {
        self.inner.lock().unwrap().denied = reason;
    }

    /// Number of successful acquisitions.
    pub fn acquisitions(&self) -> usize {
        self.inner.lock().unwrap().acquisitions
    }

    /// Every track handed out so far.
    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.inner.lock().unwrap().tracks.clone()
    }

    pub fn track_of_kind(&self, kind: TrackKind) -> Option<Arc<FakeTrack>> {
        self.tracks().into_iter().rev().find(|t| t.kind == kind)
    }

    /// True once every track handed out has been stopped exactly once.
    pub fn all_stopped_once(&self) -> bool {
        let tracks = self.tracks();
        !tracks.is_empty() && tracks.iter().all(|t| t.stop_count() == 1)
    }
}

#[async_trait]
impl MediaCapture for FakeMediaCapture {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaTracks, MediaError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(reason) = &state.denied {
            return Err(MediaError::PermissionDenied(reason.clone()));
        }

        state.acquisitions += 1;
        let n = state.acquisitions;
        let mut tracks: Vec<Arc<dyn LocalTrack>> = Vec::new();
        if constraints.audio {
            let track = FakeTrack::new(format!("audio-{n}"), TrackKind::Audio);
            state.tracks.push(Arc::clone(&track));
            tracks.push(track);
        }
        if constraints.video {
            let track = FakeTrack::new(format!("video-{n}"), TrackKind::Video);
            state.tracks.push(Arc::clone(&track));
            tracks.push(track);
        }
        if tracks.is_empty() {
            return Err(MediaError::DeviceUnavailable(
                "no track kinds requested".to_string(),
            ));
        }
        Ok(MediaTracks::new(tracks))
    }
}
