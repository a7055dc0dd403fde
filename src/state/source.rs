use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a media source (the MPRIS instance name for playerctl).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Playback status as reported by MPRIS players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl PlaybackStatus {
    /// Parse the status string printed by `playerctl status`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Playing" => Some(PlaybackStatus::Playing),
            "Paused" => Some(PlaybackStatus::Paused),
            "Stopped" => Some(PlaybackStatus::Stopped),
            _ => None,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "▶",
            PlaybackStatus::Paused => "⏸",
            PlaybackStatus::Stopped => "⏹",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: Option<String>,
}

/// One managed media endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub display_name: String,
    pub kind: String,
    pub is_browser: bool,
    pub priority: u32,
    pub playback_status: PlaybackStatus,
    pub manually_paused: bool,
    pub has_content: bool,
    pub track: Option<TrackInfo>,
    pub volume: Option<f64>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) paused_seq: u64,
}

impl Source {
    /// A freshly detected source: stopped, no content, not manually paused.
    pub fn new(id: impl Into<SourceId>, kind: impl Into<String>, priority: u32) -> Self {
        let kind = kind.into();
        Self {
            id: id.into(),
            display_name: display_name_for(&kind),
            kind,
            is_browser: false,
            priority,
            playback_status: PlaybackStatus::Stopped,
            manually_paused: false,
            has_content: false,
            track: None,
            volume: None,
            last_seen: Utc::now(),
            paused_seq: 0,
        }
    }

    pub fn with_content(mut self, track: TrackInfo) -> Self {
        self.track = Some(track);
        self.has_content = true;
        self
    }

    pub fn with_status(mut self, status: PlaybackStatus) -> Self {
        self.playback_status = status;
        self
    }

    pub fn is_playing(&self) -> bool {
        self.playback_status == PlaybackStatus::Playing
    }

    /// Eligible for auto-resume: auto-paused with something loaded.
    pub fn is_resume_candidate(&self) -> bool {
        self.playback_status == PlaybackStatus::Paused && !self.manually_paused && self.has_content
    }

    /// Pause reason suffix used by status listings.
    pub fn pause_reason(&self) -> Option<&'static str> {
        match self.playback_status {
            PlaybackStatus::Paused if self.manually_paused => Some("manually paused"),
            PlaybackStatus::Paused => Some("auto-paused"),
            _ => None,
        }
    }

    /// One-line summary, e.g. `▶ [P1] Firefox: Some Video`.
    pub fn summary(&self) -> String {
        let reason = self
            .pause_reason()
            .map(|r| format!(" ({})", r))
            .unwrap_or_default();
        format!("{}{}", self.observed_summary(), reason)
    }

    /// Summary without the pause reason, for sources the arbiter never owned.
    pub fn observed_summary(&self) -> String {
        const MAX_TITLE: usize = 40;

        let title = match &self.track {
            Some(track) if track.title.chars().count() > MAX_TITLE => {
                format!("{}...", track.title.chars().take(MAX_TITLE).collect::<String>())
            }
            Some(track) => track.title.clone(),
            None => "-".to_string(),
        };
        format!(
            "{} [P{}] {}: {}",
            self.playback_status.icon(),
            self.priority,
            self.display_name,
            title
        )
    }
}

/// `firefox` -> `Firefox`
pub fn display_name_for(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playback_status() {
        assert_eq!(PlaybackStatus::parse("Playing\n"), Some(PlaybackStatus::Playing));
        assert_eq!(PlaybackStatus::parse("Paused"), Some(PlaybackStatus::Paused));
        assert_eq!(PlaybackStatus::parse(" Stopped "), Some(PlaybackStatus::Stopped));
        assert_eq!(PlaybackStatus::parse("No players found"), None);
    }

    #[test]
    fn test_new_source_has_no_content() {
        let source = Source::new("spotify", "spotify", 2);
        assert_eq!(source.playback_status, PlaybackStatus::Stopped);
        assert!(!source.has_content);
        assert!(!source.manually_paused);
        assert_eq!(source.display_name, "Spotify");
    }

    #[test]
    fn test_resume_candidate_requires_content_and_auto_pause() {
        let track = TrackInfo {
            title: "Song".to_string(),
            artist: None,
        };
        let mut source = Source::new("vlc", "vlc", 3)
            .with_content(track)
            .with_status(PlaybackStatus::Paused);
        assert!(source.is_resume_candidate());

        source.manually_paused = true;
        assert!(!source.is_resume_candidate());

        source.manually_paused = false;
        source.has_content = false;
        assert!(!source.is_resume_candidate());
    }

    #[test]
    fn test_summary_truncates_long_titles() {
        let track = TrackInfo {
            title: "x".repeat(60),
            artist: Some("Someone".to_string()),
        };
        let mut source = Source::new("firefox.instance1", "firefox", 1)
            .with_content(track)
            .with_status(PlaybackStatus::Paused);
        source.manually_paused = true;

        let summary = source.summary();
        assert!(summary.starts_with("⏸ [P1] Firefox: "));
        assert!(summary.contains(&format!("{}...", "x".repeat(40))));
        assert!(summary.ends_with("(manually paused)"));
    }

    #[test]
    fn test_source_id_serializes_as_plain_string() {
        let id = SourceId::from("spotify");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"spotify\"");
    }
}
