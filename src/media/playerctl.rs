//! MPRIS backend driving the `playerctl` command line tool.

use std::io::ErrorKind;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

use super::{BackendError, BackendSource, PlayerBackend};
use crate::arbiter::PlayerCommand;
use crate::state::source::{PlaybackStatus, SourceId, TrackInfo};

const PLAYERCTL: &str = "playerctl";
const LIST_TIMEOUT: Duration = Duration::from_secs(5);
const INSTANCE_TIMEOUT: Duration = Duration::from_secs(2);
const METADATA_FORMAT: &str = "{{title}}\t{{artist}}";

// `spotify`, `firefox.instance_1_84`, `chromium.instance12345`; never a flag
static INSTANCE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<kind>[A-Za-z0-9_][A-Za-z0-9_-]*)(?:\.[A-Za-z0-9_.-]+)?$").expect("valid instance regex")
});

pub struct PlayerctlBackend {
    program: String,
}

impl Default for PlayerctlBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerctlBackend {
    pub fn new() -> Self {
        Self::with_program(PLAYERCTL)
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str], limit: Duration) -> Result<Output, BackendError> {
        if cfg!(not(unix)) {
            return Err(BackendError::Unsupported(
                "playerctl needs an MPRIS session bus".to_string(),
            ));
        }

        log::debug!("Running {} {:?}", self.program, args);
        let mut cmd = Command::new(&self.program);
        cmd.args(args).kill_on_drop(true);

        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| BackendError::Timeout(format!("{} {}", self.program, args.join(" "))))?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    BackendError::Unavailable(format!("'{}' is not installed", self.program))
                }
                _ => BackendError::Spawn {
                    program: self.program.clone(),
                    reason: e.to_string(),
                },
            })?;
        Ok(output)
    }

    async fn query_status(&self, instance: &str) -> Option<PlaybackStatus> {
        match self
            .run(&["--player", instance, "status"], INSTANCE_TIMEOUT)
            .await
        {
            Ok(output) if output.status.success() => {
                let raw = String::from_utf8_lossy(&output.stdout);
                let status = PlaybackStatus::parse(&raw);
                if status.is_none() {
                    log::warn!("Unknown status '{}' from player {}", raw.trim(), instance);
                }
                status
            }
            Ok(output) => {
                log::debug!(
                    "Status query for {} exited with {:?}",
                    instance,
                    output.status.code()
                );
                None
            }
            Err(e) => {
                log::warn!("Error getting status for player {}: {}", instance, e);
                None
            }
        }
    }

    async fn query_track(&self, instance: &str) -> Option<TrackInfo> {
        let args = ["--player", instance, "metadata", "--format", METADATA_FORMAT];
        match self.run(&args, INSTANCE_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                parse_metadata(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(_) => None,
            Err(e) => {
                log::debug!("No metadata for player {}: {}", instance, e);
                None
            }
        }
    }
}

#[async_trait]
impl PlayerBackend for PlayerctlBackend {
    async fn list_sources(&self) -> Result<Vec<BackendSource>, BackendError> {
        let output = self.run(&["--list-all"], LIST_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // playerctl exits non-zero when the bus has no players at all
            if stderr.contains("No players found") {
                return Ok(Vec::new());
            }
            return Err(BackendError::CommandFailed {
                source_id: "--list-all".to_string(),
                reason: format!("exit {:?}: {}", output.status.code(), stderr.trim()),
            });
        }

        let mut sources = Vec::new();
        for (instance, kind) in parse_instances(&String::from_utf8_lossy(&output.stdout)) {
            let Some(status) = self.query_status(&instance).await else {
                continue;
            };
            let mut source = BackendSource::new(instance.as_str(), &kind, status);
            source.track = self.query_track(&instance).await;
            sources.push(source);
        }

        log::debug!("Found {} players", sources.len());
        Ok(sources)
    }

    async fn send_command(&self, id: &SourceId, command: PlayerCommand) -> Result<(), BackendError> {
        if !INSTANCE_NAME.is_match(id.as_str()) {
            return Err(BackendError::CommandFailed {
                source_id: id.to_string(),
                reason: "invalid player name".to_string(),
            });
        }

        let args = command_args(id.as_str(), command);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args, INSTANCE_TIMEOUT).await?;
        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                source_id: id.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        log::info!("🎛️ Sent {:?} to {}", command, id);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        match self.run(&["--version"], INSTANCE_TIMEOUT).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                log::warn!("playerctl not usable: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        PLAYERCTL
    }
}

/// Instance names with their lowercase kind. Malformed lines are skipped.
fn parse_instances(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match INSTANCE_NAME.captures(line) {
            Some(caps) => Some((line.to_string(), caps["kind"].to_lowercase())),
            None => {
                log::warn!("Ignoring unexpected player name '{}'", line);
                None
            }
        })
        .collect()
}

fn parse_metadata(raw: &str) -> Option<TrackInfo> {
    let line = raw.trim_end_matches(['\n', '\r']);
    let mut fields = line.splitn(2, '\t');
    let title = fields.next().unwrap_or_default().trim();
    let artist = fields.next().unwrap_or_default().trim();

    if title.is_empty() {
        return None;
    }
    Some(TrackInfo {
        title: title.to_string(),
        artist: (!artist.is_empty()).then(|| artist.to_string()),
    })
}

fn command_args(instance: &str, command: PlayerCommand) -> Vec<String> {
    let mut args = vec!["--player".to_string(), instance.to_string()];
    match command {
        PlayerCommand::Play => args.push("play".to_string()),
        PlayerCommand::Pause => args.push("pause".to_string()),
        PlayerCommand::Volume(level) => {
            args.push("volume".to_string());
            args.push(format!("{:.2}", level));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_instances() {
        let raw = "spotify\nfirefox.instance_1_84\n\nChromium.instance12345\nnot a player\n--help\n";

        let instances = parse_instances(raw);

        assert_eq!(
            instances,
            vec![
                ("spotify".to_string(), "spotify".to_string()),
                ("firefox.instance_1_84".to_string(), "firefox".to_string()),
                ("Chromium.instance12345".to_string(), "chromium".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_metadata() {
        let track = parse_metadata("Blue in Green\tMiles Davis\n").unwrap();
        assert_eq!(track.title, "Blue in Green");
        assert_eq!(track.artist.as_deref(), Some("Miles Davis"));

        let track = parse_metadata("Some video\t\n").unwrap();
        assert_eq!(track.artist, None);

        assert!(parse_metadata("\t\n").is_none());
        assert!(parse_metadata("").is_none());
    }

    #[test]
    fn test_command_args() {
        assert_eq!(
            command_args("vlc", PlayerCommand::Pause),
            vec!["--player", "vlc", "pause"]
        );
        assert_eq!(
            command_args("spotify", PlayerCommand::Volume(0.5)),
            vec!["--player", "spotify", "volume", "0.50"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let backend = PlayerctlBackend::with_program("/nonexistent/playerctl-mediasense");

        assert!(!backend.is_available().await);
        let result = backend.list_sources().await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_send_command_rejects_bad_names() {
        let backend = PlayerctlBackend::with_program("/nonexistent/playerctl-mediasense");
        let result = backend
            .send_command(&SourceId::from("--list-all; rm"), PlayerCommand::Play)
            .await;
        assert!(matches!(result, Err(BackendError::CommandFailed { .. })));

        for flag in ["--help", "-a", "-.instance1"] {
            let result = backend
                .send_command(&SourceId::from(flag), PlayerCommand::Play)
                .await;
            assert!(
                matches!(result, Err(BackendError::CommandFailed { ref reason, .. }) if reason == "invalid player name"),
                "{} accepted",
                flag
            );
        }
    }

    #[cfg(unix)]
    fn fake_playerctl(dir: &tempfile::TempDir) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = r#"#!/bin/sh
if [ "$1" = "--list-all" ]; then
    printf 'spotify\nfirefox.instance_1_42\nvlc\n'
    exit 0
fi
case "$2:$3" in
    spotify:status) echo Playing ;;
    firefox.instance_1_42:status) echo Paused ;;
    vlc:status) echo "No player could handle this command" >&2; exit 1 ;;
    spotify:metadata) printf 'Song\tBand\n' ;;
    firefox.instance_1_42:metadata) printf '\t\n' ;;
    spotify:pause) exit 0 ;;
    *) echo "unexpected $*" >&2; exit 1 ;;
esac
"#;
        let path = dir.path().join("playerctl");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_list_sources_with_fake_playerctl() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = PlayerctlBackend::with_program(fake_playerctl(&dir));

        let sources = backend.list_sources().await.unwrap();

        // vlc fails its status query and is left out
        assert_eq!(sources.len(), 2);
        let spotify = &sources[0];
        assert_eq!(spotify.kind, "spotify");
        assert_eq!(spotify.playback_status, PlaybackStatus::Playing);
        assert_eq!(spotify.track.as_ref().unwrap().title, "Song");

        let firefox = &sources[1];
        assert_eq!(firefox.kind, "firefox");
        assert_eq!(firefox.display_name, "Firefox");
        assert!(firefox.track.is_none());
        assert!(!firefox.has_content());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_send_command_with_fake_playerctl() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = PlayerctlBackend::with_program(fake_playerctl(&dir));

        backend
            .send_command(&SourceId::from("spotify"), PlayerCommand::Pause)
            .await
            .unwrap();

        let err = backend
            .send_command(&SourceId::from("spotify"), PlayerCommand::Play)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected"));
    }
}
