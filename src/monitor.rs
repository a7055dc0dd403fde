//! Background poller keeping the registry in line with the players.
//!
//! Each tick lists the backend, reconciles the listing into the registry and
//! sends whatever commands the reconciliation produced. A failed poll backs
//! off before the next tick.

use std::time::Duration;

use thiserror::Error;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::arbiter::{ArbiterError, Decision};
use crate::media::BackendError;
use crate::state::app_state::AppState;
use crate::utils::logger::log_decision;

pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Arbiter(#[from] ArbiterError),
}

/// Handle to control the monitor task
pub struct MonitorHandle {
    join: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl MonitorHandle {
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown_tx.send(());
        self.join.await
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub struct Monitor {
    app: AppState,
    /// Status lines last published; `last_seen` churn alone is not a change
    last_status: Option<Vec<String>>,
    error_backoff: Duration,
}

impl Monitor {
    pub fn new(app: AppState) -> Self {
        Self {
            app,
            last_status: None,
            error_backoff: ERROR_BACKOFF,
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Spawn the poll loop in background and return a handle.
    pub async fn start(mut self) -> MonitorHandle {
        let period = self.app.settings.read().await.check_interval();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        log::info!(
            "👀 Monitor started on {} (every {:?})",
            self.app.backend.name(),
            period
        );
        let join = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        log::info!("Monitor shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_once().await {
                            log::error!("❌ Poll failed: {}", e);
                            select! {
                                biased;
                                _ = &mut shutdown_rx => {
                                    log::info!("Monitor shutdown requested");
                                    break;
                                }
                                _ = sleep(self.error_backoff) => {}
                            }
                        }
                    }
                }
            }
        });

        MonitorHandle { join, shutdown_tx }
    }

    /// List, reconcile and dispatch once. Waits while a command is between
    /// its decision and its dispatch.
    pub async fn poll_once(&mut self) -> Result<Decision, PollError> {
        let decision = {
            let _gate = self.app.lock_commands().await;
            let since_revision = self.app.arbiter.revision();
            let listing = self.app.backend.list_sources().await?;
            let decision = self.app.reconcile(&listing, since_revision).await?;

            log_decision("reconcile", &decision);
            self.app.dispatch(&decision).await;
            decision
        };

        let status = decision.snapshot.status_lines();
        if !decision.is_empty() || self.last_status.as_ref() != Some(&status) {
            log::debug!("Status:\n{}", status.join("\n"));
            self.app.publish_state(decision.snapshot.clone());
            self.last_status = Some(status);
        }
        Ok(decision)
    }
}
