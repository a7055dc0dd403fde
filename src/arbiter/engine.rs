use std::collections::BTreeSet;

use serde::Serialize;

use super::command::{BackendCommand, PlayerCommand};
use super::error::ArbiterError;
use crate::media::BackendSource;
use crate::settings::SourceClass;
use crate::state::registry::{Registry, RegistrySnapshot, SourceStatus};
use crate::state::source::{PlaybackStatus, Source, SourceId};
use crate::utils::logger::log_state_transition;

/// Sources the engine paused to restore the single-player invariant after the
/// backend reported several of them playing at once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvariantRecovery {
    pub kept: SourceId,
    pub paused: Vec<SourceId>,
}

/// Outcome of one arbitration request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub snapshot: RegistrySnapshot,
    /// Pause commands come before play commands.
    pub commands: Vec<BackendCommand>,
    pub previous_active: Option<SourceId>,
    pub recovery: Option<InvariantRecovery>,
}

impl Decision {
    pub fn active_changed(&self) -> bool {
        self.previous_active != self.snapshot.active_source_id
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn command_for(&self, id: &str) -> Option<PlayerCommand> {
        self.commands
            .iter()
            .find(|c| c.source_id.as_str() == id)
            .map(|c| c.command)
    }
}

/// Who asked for a transition. Backend-observed transitions already happened
/// on the player, so the source itself gets no command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Request,
    Backend,
}

impl Origin {
    fn label(&self) -> &'static str {
        match self {
            Origin::Request => "requested",
            Origin::Backend => "observed",
        }
    }
}

/// Staged registry plus the commands accumulated while applying one request.
struct Transaction {
    registry: Registry,
    commands: Vec<BackendCommand>,
    recovery: Option<InvariantRecovery>,
}

impl Transaction {
    fn source(&self, id: &str) -> Result<&Source, ArbiterError> {
        self.registry
            .get(id)
            .ok_or_else(|| ArbiterError::SourceNotFound(id.to_string()))
    }

    fn play(&mut self, id: &str, origin: Origin) -> Result<(), ArbiterError> {
        let (target_id, target_priority, previous) = {
            let target = self.source(id)?;
            (target.id.clone(), target.priority, target.playback_status)
        };

        for other_id in self.registry.playing_ids() {
            if other_id == target_id {
                continue;
            }
            let other_priority = self.source(other_id.as_str())?.priority;
            let reason = if other_priority > target_priority {
                "preempted by higher priority"
            } else {
                "preempted by explicit play"
            };
            self.auto_pause(&other_id, reason)?;
        }

        self.registry.replace_status(id, SourceStatus::playing())?;
        self.registry.set_active(Some(target_id.clone()))?;

        if previous != PlaybackStatus::Playing {
            log_state_transition(id, &format!("{:?}", previous), "Playing", origin.label());
        }
        if origin == Origin::Request {
            self.commands.push(BackendCommand::play(&target_id));
        }
        Ok(())
    }

    fn pause(&mut self, id: &str, origin: Origin, allow_resume: bool) -> Result<(), ArbiterError> {
        let (source_id, previous, has_content) = {
            let source = self.source(id)?;
            (source.id.clone(), source.playback_status, source.has_content)
        };
        let was_active = self.registry.active_source_id() == Some(&source_id);

        self.registry
            .replace_status(id, SourceStatus::manually_paused(has_content))?;
        if previous != PlaybackStatus::Paused {
            let reason = match origin {
                Origin::Request => "manual pause",
                Origin::Backend => "paused outside mediasense",
            };
            log_state_transition(id, &format!("{:?}", previous), "Paused", reason);
        }
        if origin == Origin::Request {
            self.commands.push(BackendCommand::pause(&source_id));
        }

        if was_active && allow_resume {
            self.resume_next()?;
        }
        Ok(())
    }

    fn stop(&mut self, id: &str, allow_resume: bool) -> Result<(), ArbiterError> {
        let (source_id, previous) = {
            let source = self.source(id)?;
            (source.id.clone(), source.playback_status)
        };
        let was_active = self.registry.active_source_id() == Some(&source_id);

        self.registry.replace_status(id, SourceStatus::stopped())?;
        log_state_transition(id, &format!("{:?}", previous), "Stopped", "observed");

        if was_active && allow_resume {
            self.resume_next()?;
        }
        Ok(())
    }

    fn auto_pause(&mut self, id: &SourceId, reason: &str) -> Result<(), ArbiterError> {
        let (previous, has_content) = {
            let source = self.source(id.as_str())?;
            (source.playback_status, source.has_content)
        };
        self.registry.replace_status(
            id.as_str(),
            SourceStatus::auto_paused(has_content || previous == PlaybackStatus::Playing),
        )?;
        log_state_transition(id.as_str(), &format!("{:?}", previous), "Paused", reason);
        self.commands.push(BackendCommand::pause(id));
        Ok(())
    }

    /// Pick the auto-paused source with the highest precedence and start it.
    /// Ties go to the most recently auto-paused source, then to the smallest id.
    fn resume_next(&mut self) -> Result<Option<SourceId>, ArbiterError> {
        if self.registry.is_pause_all() {
            log::debug!("Pause-all is on, skipping auto-resume");
            self.registry.set_active(None)?;
            return Ok(None);
        }
        if !self.registry.playing_ids().is_empty() {
            return Ok(None);
        }

        let candidate = self
            .registry
            .sources()
            .filter(|s| s.is_resume_candidate())
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.paused_seq.cmp(&a.paused_seq))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|s| s.id.clone());

        match candidate {
            Some(id) => {
                self.registry.replace_status(id.as_str(), SourceStatus::playing())?;
                self.registry.set_active(Some(id.clone()))?;
                log_state_transition(id.as_str(), "Paused", "Playing", "auto-resume");
                self.commands.push(BackendCommand::play(&id));
                Ok(Some(id))
            }
            None => {
                log::info!("No auto-resume candidate, nothing is playing now");
                self.registry.set_active(None)?;
                Ok(None)
            }
        }
    }

    fn apply_observed(
        &mut self,
        id: &str,
        observed: PlaybackStatus,
        allow_resume: bool,
    ) -> Result<(), ArbiterError> {
        use PlaybackStatus::*;

        let (current, manually_paused, has_content) = {
            let source = self.source(id)?;
            (source.playback_status, source.manually_paused, source.has_content)
        };

        match (current, observed) {
            (Playing, Playing) | (Paused, Paused) | (Stopped, Stopped) => Ok(()),
            (_, Playing) => self.play(id, Origin::Backend),
            (Playing, Paused) => self.pause(id, Origin::Backend, allow_resume),
            (Stopped, Paused) => {
                self.registry.replace_status(
                    id,
                    SourceStatus {
                        playback_status: Paused,
                        manually_paused,
                        has_content,
                    },
                )?;
                log_state_transition(id, "Stopped", "Paused", "content loaded");
                Ok(())
            }
            (_, Stopped) => self.stop(id, allow_resume),
        }
    }

    fn reconcile(
        &mut self,
        observed: &[BackendSource],
        classify: &dyn Fn(&str) -> SourceClass,
    ) -> Result<(), ArbiterError> {
        let seen: BTreeSet<&str> = observed.iter().map(|o| o.id.as_str()).collect();

        let vanished: Vec<SourceId> = self
            .registry
            .sources()
            .filter(|s| !seen.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect();
        let had_active = self.registry.active_source_id().is_some();
        for id in vanished {
            self.registry.remove(id.as_str());
            log::info!("➖ Source '{}' disappeared", id);
        }

        for obs in observed {
            if self.registry.contains(obs.id.as_str()) {
                self.registry
                    .refresh_metadata(obs.id.as_str(), &obs.display_name, obs.track.clone())?;
            } else {
                let class = classify(&obs.kind);
                let mut source = Source::new(obs.id.clone(), obs.kind.clone(), class.priority);
                source.display_name = obs.display_name.clone();
                source.is_browser = class.is_browser;
                source.track = obs.track.clone();
                self.registry.insert(source)?;
                log::info!(
                    "➕ New source '{}' ({}, priority {})",
                    obs.id,
                    obs.kind,
                    class.priority
                );
            }

            let source = self.source(obs.id.as_str())?;
            if !source.is_playing() && source.has_content != obs.has_content() {
                let status = SourceStatus {
                    playback_status: source.playback_status,
                    manually_paused: source.manually_paused,
                    has_content: obs.has_content(),
                };
                self.registry.replace_status(obs.id.as_str(), status)?;
            }
        }

        let playing: Vec<&BackendSource> = observed
            .iter()
            .filter(|o| o.playback_status == PlaybackStatus::Playing)
            .collect();
        let newly_playing: Vec<&BackendSource> = playing
            .iter()
            .filter(|o| {
                self.registry
                    .get(o.id.as_str())
                    .map_or(true, |s| !s.is_playing())
            })
            .copied()
            .collect();

        // A single newly started player is an explicit play made outside
        // mediasense and wins like any other play request. Several at once
        // cannot be ordered, so keep the highest precedence one.
        let winner = if newly_playing.len() > 1 {
            let kept = self.pick_winner(&playing);
            if let Some(kept) = &kept {
                self.recover_multiple_playing(kept, &playing)?;
            }
            kept
        } else {
            newly_playing
                .first()
                .or_else(|| playing.first())
                .map(|o| o.id.clone())
        };

        // Resume once, after the whole listing is applied, so a source resumed
        // here is not immediately read back as paused from the same listing.
        for obs in observed
            .iter()
            .filter(|o| o.playback_status != PlaybackStatus::Playing)
        {
            self.apply_observed(obs.id.as_str(), obs.playback_status, false)?;
        }

        if let Some(winner) = winner {
            let already_playing = self.source(winner.as_str())?.is_playing();
            if self.registry.is_pause_all() && !already_playing {
                self.auto_pause(&winner, "pause all")?;
            } else {
                self.apply_observed(winner.as_str(), PlaybackStatus::Playing, true)?;
            }
        }

        if had_active && self.registry.active_source_id().is_none() {
            self.resume_next()?;
        }
        Ok(())
    }

    fn recover_multiple_playing(
        &mut self,
        kept: &SourceId,
        playing: &[&BackendSource],
    ) -> Result<(), ArbiterError> {
        let paused: Vec<SourceId> = playing
            .iter()
            .map(|o| o.id.clone())
            .filter(|id| id != kept)
            .collect();
        log::error!(
            "🚨 {}",
            ArbiterError::InvariantViolation(format!(
                "backend reports {} sources playing; keeping '{}', pausing {:?}",
                playing.len(),
                kept,
                paused
            ))
        );
        for id in &paused {
            self.auto_pause(id, "invariant recovery")?;
        }
        self.recovery = Some(InvariantRecovery {
            kept: kept.clone(),
            paused,
        });
        Ok(())
    }

    /// Highest precedence among the observed players; the current active
    /// source wins a priority tie, then the smallest id.
    fn pick_winner(&self, playing: &[&BackendSource]) -> Option<SourceId> {
        let active = self.registry.active_source_id();
        playing
            .iter()
            .filter_map(|o| self.registry.get(o.id.as_str()))
            .min_by(|a, b| {
                let a_inactive = Some(&a.id) != active;
                let b_inactive = Some(&b.id) != active;
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a_inactive.cmp(&b_inactive))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|s| s.id.clone())
    }
}

/// Arbitration engine owning the source registry.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    registry: Registry,
    revision: u64,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine over a pre-populated set of sources. A source inserted
    /// as `Playing` becomes the active one.
    pub fn with_sources(sources: Vec<Source>) -> Result<Self, ArbiterError> {
        let mut registry = Registry::new();
        for source in sources {
            registry.insert(source)?;
        }
        if let Some(id) = registry.playing_ids().into_iter().next() {
            registry.set_active(Some(id))?;
        }
        registry.check_invariants()?;
        Ok(Self {
            registry,
            revision: 0,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Bumped on every committed request.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn unchanged(&self) -> Decision {
        Decision {
            snapshot: self.registry.snapshot(),
            commands: Vec::new(),
            previous_active: self.registry.active_source_id().cloned(),
            recovery: None,
        }
    }

    fn transact<F>(&mut self, apply: F) -> Result<Decision, ArbiterError>
    where
        F: FnOnce(&mut Transaction) -> Result<(), ArbiterError>,
    {
        let previous_active = self.registry.active_source_id().cloned();
        let mut tx = Transaction {
            registry: self.registry.clone(),
            commands: Vec::new(),
            recovery: None,
        };

        apply(&mut tx)?;
        tx.registry.check_invariants()?;

        self.registry = tx.registry;
        self.revision += 1;

        Ok(Decision {
            snapshot: self.registry.snapshot(),
            commands: tx.commands,
            previous_active,
            recovery: tx.recovery,
        })
    }

    /// Start a source. Explicit play requests are never refused: every other
    /// playing source is auto-paused, whatever its priority.
    pub fn request_play(&mut self, id: &str) -> Result<Decision, ArbiterError> {
        self.transact(|tx| tx.play(id, Origin::Request))
    }

    /// Manually pause a source. Pausing the active source resumes the best
    /// auto-paused candidate, if any.
    pub fn request_pause(&mut self, id: &str) -> Result<Decision, ArbiterError> {
        self.transact(|tx| tx.pause(id, Origin::Request, true))
    }

    /// Apply a status change the backend observed outside of mediasense.
    pub fn update_source_status(
        &mut self,
        id: &str,
        status: PlaybackStatus,
    ) -> Result<Decision, ArbiterError> {
        self.transact(|tx| tx.apply_observed(id, status, true))
    }

    /// Bring the registry in line with a full backend listing.
    ///
    /// `since_revision` is the revision read before the listing was taken; if
    /// another request committed in between, the listing is stale and is
    /// skipped. The next poll picks the change up.
    pub fn reconcile<F>(
        &mut self,
        observed: &[BackendSource],
        since_revision: u64,
        classify: F,
    ) -> Result<Decision, ArbiterError>
    where
        F: Fn(&str) -> SourceClass,
    {
        if since_revision != self.revision {
            log::debug!(
                "Registry changed while polling (revision {} -> {}), skipping stale listing",
                since_revision,
                self.revision
            );
            return Ok(self.unchanged());
        }
        self.transact(|tx| tx.reconcile(observed, &classify))
    }

    pub fn add_source(&mut self, source: Source) -> Result<Decision, ArbiterError> {
        self.transact(|tx| {
            let mut source = source;
            let id = source.id.clone();
            if tx.registry.contains(id.as_str()) {
                return Err(ArbiterError::DuplicateSource(id.to_string()));
            }
            let wants_play = source.is_playing();
            if wants_play {
                source.playback_status = PlaybackStatus::Paused;
            }
            tx.registry.insert(source)?;
            if wants_play {
                tx.play(id.as_str(), Origin::Backend)?;
            }
            Ok(())
        })
    }

    pub fn remove_source(&mut self, id: &str) -> Result<Decision, ArbiterError> {
        self.transact(|tx| {
            let was_active = tx.registry.active_source_id().map(SourceId::as_str) == Some(id);
            tx.registry
                .remove(id)
                .ok_or_else(|| ArbiterError::SourceNotFound(id.to_string()))?;
            log::info!("➖ Source '{}' removed", id);
            if was_active {
                tx.resume_next()?;
            }
            Ok(())
        })
    }

    /// Change the priority of a source. Takes effect on the next arbitration;
    /// the current player is not re-evaluated.
    pub fn set_priority(&mut self, id: &str, priority: u32) -> Result<Decision, ArbiterError> {
        if priority == 0 {
            return Err(ArbiterError::InvalidPriority(priority));
        }
        self.transact(|tx| tx.registry.set_priority(id, priority))
    }

    pub fn set_volume(&mut self, id: &str, volume: f64) -> Result<Decision, ArbiterError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(ArbiterError::InvalidVolume(volume));
        }
        self.transact(|tx| {
            tx.registry.set_volume(id, volume)?;
            let source_id = tx.source(id)?.id.clone();
            tx.commands.push(BackendCommand {
                source_id,
                command: PlayerCommand::Volume(volume),
            });
            Ok(())
        })
    }

    /// Global all-stop. Enabling pauses whatever is playing; disabling resumes
    /// nothing.
    pub fn set_pause_all(&mut self, enabled: bool) -> Result<Decision, ArbiterError> {
        self.transact(|tx| {
            tx.registry.set_pause_all(enabled);
            if enabled {
                for id in tx.registry.playing_ids() {
                    tx.auto_pause(&id, "pause all")?;
                }
            }
            Ok(())
        })
    }
}
