//! Player backend abstraction.
//!
//! A backend enumerates the media players present on the system and sends
//! them play/pause/volume commands. The arbitration engine never talks to a
//! backend directly; the monitor and the command layer do.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::arbiter::PlayerCommand;
use crate::state::source::{display_name_for, PlaybackStatus, SourceId, TrackInfo};

mod playerctl;

pub use playerctl::PlayerctlBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("player backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },
    #[error("'{0}' timed out")]
    Timeout(String),
    #[error("command failed for '{source_id}': {reason}")]
    CommandFailed { source_id: String, reason: String },
    #[error("not supported on this platform: {0}")]
    Unsupported(String),
}

/// One player as the backend currently sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendSource {
    pub id: SourceId,
    pub display_name: String,
    /// Lowercase player family, e.g. `firefox` for `firefox.instance1234`
    pub kind: String,
    pub playback_status: PlaybackStatus,
    pub track: Option<TrackInfo>,
}

impl BackendSource {
    pub fn new(id: impl Into<SourceId>, kind: &str, playback_status: PlaybackStatus) -> Self {
        let kind = kind.to_lowercase();
        Self {
            id: id.into(),
            display_name: display_name_for(&kind),
            kind,
            playback_status,
            track: None,
        }
    }

    pub fn with_track(mut self, track: TrackInfo) -> Self {
        self.track = Some(track);
        self
    }

    /// Whether the player has something loaded that a play command could
    /// resume.
    pub fn has_content(&self) -> bool {
        match self.playback_status {
            PlaybackStatus::Playing => true,
            PlaybackStatus::Paused => self.track.is_some(),
            PlaybackStatus::Stopped => false,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Every player currently present. Players that fail to report a status
    /// are left out.
    async fn list_sources(&self) -> Result<Vec<BackendSource>, BackendError>;

    async fn send_command(&self, id: &SourceId, command: PlayerCommand)
        -> Result<(), BackendError>;

    async fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_source_content() {
        let track = TrackInfo {
            title: "Song".to_string(),
            artist: Some("Band".to_string()),
        };

        assert!(BackendSource::new("spotify", "spotify", PlaybackStatus::Playing).has_content());
        assert!(!BackendSource::new("vlc", "vlc", PlaybackStatus::Paused).has_content());
        assert!(BackendSource::new("vlc", "vlc", PlaybackStatus::Paused)
            .with_track(track.clone())
            .has_content());
        assert!(!BackendSource::new("vlc", "vlc", PlaybackStatus::Stopped)
            .with_track(track)
            .has_content());
    }

    #[test]
    fn test_backend_source_kind_is_lowercase() {
        let source = BackendSource::new("Spotify", "Spotify", PlaybackStatus::Stopped);
        assert_eq!(source.kind, "spotify");
        assert_eq!(source.id.as_str(), "Spotify");
    }
}
