use std::collections::BTreeMap;

use serde::Serialize;

use crate::arbiter::ArbiterError;
use crate::state::source::{PlaybackStatus, Source, SourceId, TrackInfo};

/// Status triple replaced atomically by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStatus {
    pub playback_status: PlaybackStatus,
    pub manually_paused: bool,
    pub has_content: bool,
}

impl SourceStatus {
    pub fn playing() -> Self {
        Self {
            playback_status: PlaybackStatus::Playing,
            manually_paused: false,
            has_content: true,
        }
    }

    pub fn auto_paused(has_content: bool) -> Self {
        Self {
            playback_status: PlaybackStatus::Paused,
            manually_paused: false,
            has_content,
        }
    }

    pub fn manually_paused(has_content: bool) -> Self {
        Self {
            playback_status: PlaybackStatus::Paused,
            manually_paused: true,
            has_content,
        }
    }

    pub fn stopped() -> Self {
        Self {
            playback_status: PlaybackStatus::Stopped,
            manually_paused: false,
            has_content: false,
        }
    }
}

/// Authoritative state of every known source.
///
/// Readers get shared access; only the arbitration engine mutates it, through
/// the crate-private primitives below. Each primitive refuses to produce a
/// second `Playing` source.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sources: BTreeMap<SourceId, Source>,
    active_source_id: Option<SourceId>,
    pause_all: bool,
    pause_counter: u64,
}

/// Read-only copy of the registry handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub sources: Vec<Source>,
    pub active_source_id: Option<SourceId>,
    pub pause_all: bool,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id.as_str() == id)
    }

    pub fn active_source(&self) -> Option<&Source> {
        self.active_source_id
            .as_ref()
            .and_then(|id| self.get(id.as_str()))
    }

    pub fn playing_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_playing()).count()
    }

    /// Human readable status, one line per source ordered by priority.
    pub fn status_lines(&self) -> Vec<String> {
        let mut sources: Vec<&Source> = self.sources.iter().collect();
        sources.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        sources.into_iter().map(Source::summary).collect()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn active_source_id(&self) -> Option<&SourceId> {
        self.active_source_id.as_ref()
    }

    pub fn active_source(&self) -> Option<&Source> {
        self.active_source_id
            .as_ref()
            .and_then(|id| self.sources.get(id))
    }

    pub fn is_pause_all(&self) -> bool {
        self.pause_all
    }

    pub fn playing_ids(&self) -> Vec<SourceId> {
        self.sources
            .values()
            .filter(|s| s.is_playing())
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            sources: self.sources.values().cloned().collect(),
            active_source_id: self.active_source_id.clone(),
            pause_all: self.pause_all,
        }
    }

    /// At most one source is Playing, and the active id, when set, names it.
    pub fn check_invariants(&self) -> Result<(), ArbiterError> {
        let playing = self.playing_ids();
        if playing.len() > 1 {
            return Err(ArbiterError::InvariantViolation(format!(
                "{} sources playing at once: {:?}",
                playing.len(),
                playing
            )));
        }

        match (&self.active_source_id, playing.first()) {
            (Some(active), Some(playing)) if active == playing => Ok(()),
            (None, None) => Ok(()),
            (None, Some(_)) => Ok(()),
            (active, playing) => Err(ArbiterError::InvariantViolation(format!(
                "active source {:?} does not match playing source {:?}",
                active, playing
            ))),
        }
    }

    pub(crate) fn insert(&mut self, source: Source) -> Result<(), ArbiterError> {
        if source.is_playing() {
            self.ensure_no_other_playing(&source.id)?;
        }
        self.sources.insert(source.id.clone(), source);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Source> {
        let removed = self.sources.remove(id)?;
        if self.active_source_id.as_ref() == Some(&removed.id) {
            self.active_source_id = None;
        }
        Some(removed)
    }

    /// Replace the status of a named source.
    ///
    /// Leaving `Playing` clears the active id if it pointed at this source.
    /// An auto-pause out of `Playing` is stamped with a fresh pause sequence
    /// number so resume selection can prefer the most recent one.
    pub(crate) fn replace_status(
        &mut self,
        id: &str,
        status: SourceStatus,
    ) -> Result<(), ArbiterError> {
        if !self.sources.contains_key(id) {
            return Err(ArbiterError::SourceNotFound(id.to_string()));
        }
        if status.playback_status == PlaybackStatus::Playing {
            self.ensure_no_other_playing(&SourceId::from(id))?;
        }

        self.pause_counter += 1;
        let seq = self.pause_counter;

        let source = self
            .sources
            .get_mut(id)
            .ok_or_else(|| ArbiterError::SourceNotFound(id.to_string()))?;
        let was_playing = source.is_playing();

        source.playback_status = status.playback_status;
        source.manually_paused = status.manually_paused;
        source.has_content = status.has_content;

        if was_playing
            && status.playback_status == PlaybackStatus::Paused
            && !status.manually_paused
        {
            source.paused_seq = seq;
        }

        if status.playback_status != PlaybackStatus::Playing
            && self.active_source_id.as_ref().map(SourceId::as_str) == Some(id)
        {
            self.active_source_id = None;
        }
        Ok(())
    }

    pub(crate) fn set_active(&mut self, id: Option<SourceId>) -> Result<(), ArbiterError> {
        if let Some(id) = &id {
            let source = self
                .sources
                .get(id)
                .ok_or_else(|| ArbiterError::SourceNotFound(id.to_string()))?;
            if !source.is_playing() {
                return Err(ArbiterError::InvariantViolation(format!(
                    "cannot mark '{}' active while it is {:?}",
                    id, source.playback_status
                )));
            }
        }
        self.active_source_id = id;
        Ok(())
    }

    pub(crate) fn set_pause_all(&mut self, enabled: bool) {
        self.pause_all = enabled;
    }

    pub(crate) fn set_priority(&mut self, id: &str, priority: u32) -> Result<(), ArbiterError> {
        self.source_mut(id)?.priority = priority;
        Ok(())
    }

    pub(crate) fn set_volume(&mut self, id: &str, volume: f64) -> Result<(), ArbiterError> {
        self.source_mut(id)?.volume = Some(volume);
        Ok(())
    }

    /// Refresh the display metadata reported by the backend. Status is not
    /// touched here.
    pub(crate) fn refresh_metadata(
        &mut self,
        id: &str,
        display_name: &str,
        track: Option<TrackInfo>,
    ) -> Result<(), ArbiterError> {
        let source = self.source_mut(id)?;
        source.display_name = display_name.to_string();
        source.track = track;
        source.last_seen = chrono::Utc::now();
        Ok(())
    }

    fn source_mut(&mut self, id: &str) -> Result<&mut Source, ArbiterError> {
        self.sources
            .get_mut(id)
            .ok_or_else(|| ArbiterError::SourceNotFound(id.to_string()))
    }

    fn ensure_no_other_playing(&self, id: &SourceId) -> Result<(), ArbiterError> {
        if let Some(other) = self
            .sources
            .values()
            .find(|s| s.is_playing() && &s.id != id)
        {
            return Err(ArbiterError::InvariantViolation(format!(
                "cannot mark '{}' Playing while '{}' is Playing",
                id, other.id
            )));
        }
        Ok(())
    }
}
