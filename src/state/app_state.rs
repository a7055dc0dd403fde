use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};

use crate::arbiter::{Arbiter, ArbiterError, Decision, InvariantRecovery, PlayerCommand};
use crate::media::{BackendSource, PlayerBackend};
use crate::monitor::{Monitor, MonitorHandle};
use crate::settings::{Settings, SettingsError};
use crate::state::registry::RegistrySnapshot;
use crate::state::shared::SharedArbiter;
use crate::state::source::{SourceId, TrackInfo};

const EVENT_CAPACITY: usize = 64;

/// Events published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaEvent {
    StateChanged(RegistrySnapshot),
    NowPlaying {
        source_id: SourceId,
        display_name: String,
        track: Option<TrackInfo>,
    },
    CommandFailed {
        source_id: SourceId,
        command: PlayerCommand,
        reason: String,
    },
    InvariantRecovered(InvariantRecovery),
}

/// Everything the command surface and the monitor share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub arbiter: SharedArbiter,
    pub backend: Arc<dyn PlayerBackend>,
    pub settings: Arc<RwLock<Settings>>,
    pub settings_path: Option<PathBuf>,
    events: broadcast::Sender<MediaEvent>,
    monitor: Arc<Mutex<Option<MonitorHandle>>>,
    /// Held from an engine decision until its commands reached the backend,
    /// and by the monitor from listing until dispatch.
    command_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn PlayerBackend>,
        settings: Settings,
        settings_path: Option<PathBuf>,
    ) -> Self {
        let mut arbiter = Arbiter::new();
        if settings.pause_all_enabled {
            // nothing is registered yet, so this yields no commands
            if let Err(e) = arbiter.set_pause_all(true) {
                log::warn!("Failed to restore pause-all: {}", e);
            }
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            arbiter: SharedArbiter::new(arbiter),
            backend,
            settings: Arc::new(RwLock::new(settings)),
            settings_path,
            events,
            monitor: Arc::new(Mutex::new(None)),
            command_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Serialize a decision and its dispatch against other decisions. A
    /// listing taken while commands are in flight would show the players
    /// before they obeyed.
    pub async fn lock_commands(&self) -> MutexGuard<'_, ()> {
        self.command_gate.lock().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: MediaEvent) {
        // No subscribers is fine; the daemon may run headless.
        if self.events.send(event).is_err() {
            log::trace!("No event subscribers");
        }
    }

    pub fn publish_state(&self, snapshot: RegistrySnapshot) {
        self.emit(MediaEvent::StateChanged(snapshot));
    }

    /// Send a decision's commands to the backend in order. Failures are not
    /// retried and the registry is not rolled back; they come back as
    /// warnings and the next poll reconciles.
    pub async fn dispatch(&self, decision: &Decision) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(recovery) = &decision.recovery {
            self.emit(MediaEvent::InvariantRecovered(recovery.clone()));
        }

        for cmd in &decision.commands {
            if let Err(e) = self.backend.send_command(&cmd.source_id, cmd.command).await {
                let err = ArbiterError::backend_command_failed(
                    cmd.source_id.as_str(),
                    cmd.command,
                    &e.to_string(),
                );
                log::warn!("⚠️ {}", err);
                warnings.push(err.to_string());
                self.emit(MediaEvent::CommandFailed {
                    source_id: cmd.source_id.clone(),
                    command: cmd.command,
                    reason: e.to_string(),
                });
            }
        }

        if decision.active_changed() && self.settings.read().await.notification_enabled {
            if let Some(active) = decision.snapshot.active_source() {
                self.emit(MediaEvent::NowPlaying {
                    source_id: active.id.clone(),
                    display_name: active.display_name.clone(),
                    track: active.track.clone(),
                });
            }
        }

        warnings
    }

    /// Reconcile a backend listing using the current priority settings.
    pub async fn reconcile(
        &self,
        listing: &[BackendSource],
        since_revision: u64,
    ) -> Result<Decision, ArbiterError> {
        let settings = self.settings.read().await.clone();
        self.arbiter
            .reconcile(listing, since_revision, |kind| settings.classify(kind))
    }

    /// Write the current settings to disk, if a settings file is configured.
    pub async fn persist_settings(&self) -> Result<(), SettingsError> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        let settings = self.settings.read().await.clone();
        settings.save_to(path)
    }

    pub async fn start_monitor(&self) {
        let mut slot = self.monitor.lock().await;
        if slot.is_some() {
            log::debug!("Monitor already running");
            return;
        }
        *slot = Some(Monitor::new(self.clone()).start().await);
    }

    pub async fn stop_monitor(&self) {
        let handle = self.monitor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.shutdown().await {
                log::warn!("Monitor task ended abnormally: {}", e);
            }
        }
    }

    pub async fn restart_monitor(&self) {
        self.stop_monitor().await;
        self.start_monitor().await;
    }

    pub async fn is_monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
