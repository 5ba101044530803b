//! Local media controller.
//!
//! Owns the local capture tracks of one call session. Tracks are acquired
//! once on start, toggled in place (never stopped and restarted, so no
//! renegotiation is needed), and released exactly once on every exit path.

use crate::errors::CallError;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Identity of a track, as reported to the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
}

/// A local capture track owned by the session.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Stop capture. Called once per track when the session releases media.
    fn stop(&self);

    fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id().to_string(),
            kind: self.kind(),
        }
    }
}

/// Which tracks to request from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// The set of local tracks produced by one acquisition.
#[derive(Clone, Default)]
pub struct MediaTracks {
    tracks: Vec<Arc<dyn LocalTrack>>,
}

impl MediaTracks {
    #[must_use]
    pub fn new(tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self { tracks }
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn of_kind(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn LocalTrack>> {
        self.tracks.iter().filter(move |track| track.kind() == kind)
    }
}

impl fmt::Debug for MediaTracks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| t.info()))
            .finish()
    }
}

/// Media capture failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// The platform media-capture API.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire local tracks. May suspend on a user permission prompt.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaTracks, MediaError>;
}

/// Scoped owner of a session's local tracks.
pub struct LocalMediaController {
    capture: Arc<dyn MediaCapture>,
    constraints: MediaConstraints,
    tracks: Option<MediaTracks>,
}

impl LocalMediaController {
    #[must_use]
    pub fn new(capture: Arc<dyn MediaCapture>, constraints: MediaConstraints) -> Self {
        Self {
            capture,
            constraints,
            tracks: None,
        }
    }

    /// Acquire local tracks.
    ///
    /// # Errors
    ///
    /// `MediaAcquisitionDenied` if capture is refused or no device exists;
    /// `InvalidState` if tracks are already held.
    pub async fn acquire(&mut self) -> Result<MediaTracks, CallError> {
        if self.tracks.is_some() {
            return Err(CallError::InvalidState(
                "local media already acquired".to_string(),
            ));
        }

        let tracks = self.capture.acquire(self.constraints).await?;
        debug!(target: "call.media", tracks = tracks.len(), "Local media acquired");
        self.tracks = Some(tracks.clone());
        Ok(tracks)
    }

    #[must_use]
    pub fn has_tracks(&self) -> bool {
        self.tracks.is_some()
    }

    #[must_use]
    pub fn tracks(&self) -> Option<&MediaTracks> {
        self.tracks.as_ref()
    }

    /// Current audio enablement, `None` without an audio track.
    #[must_use]
    pub fn audio_enabled(&self) -> Option<bool> {
        self.enabled(TrackKind::Audio)
    }

    /// Current video enablement, `None` without a video track.
    #[must_use]
    pub fn video_enabled(&self) -> Option<bool> {
        self.enabled(TrackKind::Video)
    }

    fn enabled(&self, kind: TrackKind) -> Option<bool> {
        let tracks = self.held(kind).ok()?;
        Some(tracks.of_kind(kind).any(|t| t.is_enabled()))
    }

    /// Enable or disable every audio track in place.
    ///
    /// # Errors
    ///
    /// `InvalidState` if no audio track is held.
    pub fn set_audio_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.set_enabled(TrackKind::Audio, enabled)
    }

    /// Enable or disable every video track in place.
    ///
    /// # Errors
    ///
    /// `InvalidState` if no video track is held.
    pub fn set_video_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.set_enabled(TrackKind::Video, enabled)
    }

    /// Flip audio enablement and return the new state.
    ///
    /// # Errors
    ///
    /// `InvalidState` if no audio track is held.
    pub fn toggle_audio(&self) -> Result<bool, CallError> {
        self.toggle(TrackKind::Audio)
    }

    /// Flip video enablement and return the new state.
    ///
    /// # Errors
    ///
    /// `InvalidState` if no video track is held.
    pub fn toggle_video(&self) -> Result<bool, CallError> {
        self.toggle(TrackKind::Video)
    }

    /// Stop every held track. Safe to call repeatedly; only the first call
    /// stops anything.
    pub fn release(&mut self) {
        if let Some(tracks) = self.tracks.take() {
            for track in tracks.tracks() {
                track.stop();
            }
            info!(target: "call.media", tracks = tracks.len(), "Local media released");
        }
    }

    fn toggle(&self, kind: TrackKind) -> Result<bool, CallError> {
        let tracks = self.held(kind)?;
        let enabled = !tracks.of_kind(kind).any(|t| t.is_enabled());
        self.set_enabled(kind, enabled)?;
        Ok(enabled)
    }

    fn set_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), CallError> {
        let tracks = self.held(kind)?;
        for track in tracks.of_kind(kind) {
            track.set_enabled(enabled);
        }
        debug!(target: "call.media", kind = kind.as_str(), enabled = enabled, "Track enablement changed");
        Ok(())
    }

    fn held(&self, kind: TrackKind) -> Result<&MediaTracks, CallError> {
        match &self.tracks {
            Some(tracks) if tracks.of_kind(kind).next().is_some() => Ok(tracks),
            _ => Err(CallError::InvalidState(format!(
                "no local {} track",
                kind.as_str()
            ))),
        }
    }
}

impl Drop for LocalMediaController {
    fn drop(&mut self) {
        self.release();
    }
}
