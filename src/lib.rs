//! MediaSense: keeps one media player audible at a time.
//!
//! Players are discovered over MPRIS (through `playerctl`), ranked by
//! configurable priorities and arbitrated so that at most one of them plays.
//! Players paused by the arbiter are resumed when the one that displaced them
//! stops; players the user paused are left alone.

use std::path::PathBuf;
use std::sync::Arc;

pub mod arbiter;
pub mod commands;
pub mod media;
pub mod monitor;
pub mod settings;
pub mod state;
pub mod utils;


pub use arbiter::{Arbiter, ArbiterError, Decision, PlayerCommand};
pub use commands::CommandResponse;
pub use media::{BackendError, BackendSource, PlayerBackend, PlayerctlBackend};
pub use settings::{Settings, SettingsError};
pub use state::app_state::{AppState, MediaEvent};
pub use state::{PlaybackStatus, RegistrySnapshot, SharedArbiter, Source, SourceId};

use monitor::Monitor;
use utils::logger::{default_log_dir, init_logging, log_lifecycle_event};

/// How the binary was asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Poll and arbitrate until interrupted
    Daemon,
    /// Poll once, print the status lines and exit
    Status,
}

impl RunMode {
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut mode = RunMode::Daemon;
        for arg in args {
            match arg.as_str() {
                "--status" | "status" => mode = RunMode::Status,
                "--daemon" | "daemon" => mode = RunMode::Daemon,
                other => return Err(format!("unknown argument '{}'", other)),
            }
        }
        Ok(mode)
    }
}

pub fn run() -> Result<(), String> {
    let mode = RunMode::from_args(std::env::args().skip(1))?;

    dotenv::dotenv().ok();
    let log_path = init_logging(default_log_dir().as_deref());

    let settings_path = match Settings::config_path() {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Settings will not be saved: {}", e);
            None
        }
    };
    let settings = settings_path
        .as_deref()
        .map(Settings::load_or_default)
        .unwrap_or_default();

    log_lifecycle_event(
        "STARTUP",
        Some(&log_context! {
            "mode" => format!("{:?}", mode),
            "config" => format!("{:?}", settings_path),
            "log_file" => format!("{:?}", log_path),
        }),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;

    runtime.block_on(serve(mode, settings, settings_path))
}

async fn serve(
    mode: RunMode,
    settings: Settings,
    settings_path: Option<PathBuf>,
) -> Result<(), String> {
    let backend = Arc::new(PlayerctlBackend::new());
    if !backend.is_available().await {
        let msg = "playerctl is not installed or not working; install it from your distribution's packages";
        log::error!("❌ {}", msg);
        return Err(msg.to_string());
    }

    let arbitration_enabled = settings.arbitration_enabled;
    let state = AppState::new(backend, settings, settings_path);

    if mode == RunMode::Status {
        // Report the listing as-is; nothing is registered or arbitrated.
        let listing = state
            .backend
            .list_sources()
            .await
            .map_err(|e| e.to_string())?;
        let settings = state.settings.read().await.clone();
        for line in listing_status_lines(&listing, &settings) {
            println!("{}", line);
        }
        return Ok(());
    }

    let notifier = tokio::spawn(log_events(state.subscribe()));

    if arbitration_enabled {
        state.start_monitor().await;
    } else {
        log::info!("Arbitration disabled in settings; running one poll only");
        if let Err(e) = Monitor::new(state.clone()).poll_once().await {
            log::warn!("Initial poll failed: {}", e);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to wait for ctrl-c: {}", e))?;

    state.stop_monitor().await;
    notifier.abort();
    log_lifecycle_event("SHUTDOWN", None);
    Ok(())
}

/// Headless stand-in for desktop notifications.
async fn log_events(mut events: tokio::sync::broadcast::Receiver<MediaEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(MediaEvent::NowPlaying {
                display_name, track, ..
            }) => match track {
                Some(track) => log::info!("🎵 Now playing: {} - {}", display_name, track.title),
                None => log::info!("🎵 Now playing: {}", display_name),
            },
            Ok(MediaEvent::InvariantRecovered(recovery)) => {
                log::warn!(
                    "Several players were playing; kept '{}', paused {:?}",
                    recovery.kept,
                    recovery.paused
                );
            }
            Ok(MediaEvent::CommandFailed {
                source_id, reason, ..
            }) => log::warn!("Player '{}' did not respond: {}", source_id, reason),
            Ok(MediaEvent::StateChanged(_)) => {}
            Err(RecvError::Lagged(n)) => log::warn!("Event log lagged by {} messages", n),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Status lines for a raw backend listing, ranked like the registry's.
fn listing_status_lines(listing: &[BackendSource], settings: &Settings) -> Vec<String> {
    let mut sources: Vec<Source> = listing
        .iter()
        .map(|obs| {
            let mut source = Source::new(
                obs.id.clone(),
                obs.kind.clone(),
                settings.classify(&obs.kind).priority,
            )
            .with_status(obs.playback_status);
            source.display_name = obs.display_name.clone();
            source.track = obs.track.clone();
            source
        })
        .collect();
    sources.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    sources.iter().map(Source::observed_summary).collect()
}

#[cfg(test)]
mod run_mode_tests {
    use super::*;

    #[test]
    fn test_run_mode_from_args() {
        assert_eq!(RunMode::from_args(Vec::new()).unwrap(), RunMode::Daemon);
        assert_eq!(
            RunMode::from_args(vec!["--status".to_string()]).unwrap(),
            RunMode::Status
        );
        assert!(RunMode::from_args(vec!["--bogus".to_string()]).is_err());
    }

    #[test]
    fn test_listing_status_lines_show_players_as_listed() {
        let listing = vec![
            BackendSource::new("spotify", "spotify", PlaybackStatus::Playing),
            BackendSource::new("firefox.instance_1_7", "firefox", PlaybackStatus::Playing)
                .with_track(state::TrackInfo {
                    title: "Video".to_string(),
                    artist: None,
                }),
            BackendSource::new("vlc", "vlc", PlaybackStatus::Paused),
        ];

        let lines = listing_status_lines(&listing, &Settings::default());

        assert_eq!(
            lines,
            vec![
                "▶ [P1] Firefox: Video".to_string(),
                "▶ [P2] Spotify: -".to_string(),
                "⏸ [P3] Vlc: -".to_string(),
            ]
        );
    }
}
