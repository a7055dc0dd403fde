use std::fmt;

use serde::Serialize;

use crate::state::source::SourceId;

/// Command sent to the player backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PlayerCommand {
    Play,
    Pause,
    /// Passthrough volume in `0.0..=1.0`
    Volume(f64),
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerCommand::Play => f.write_str("play"),
            PlayerCommand::Pause => f.write_str("pause"),
            PlayerCommand::Volume(volume) => write!(f, "set volume {:.2} on", volume),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendCommand {
    pub source_id: SourceId,
    pub command: PlayerCommand,
}

impl BackendCommand {
    pub fn play(source_id: &SourceId) -> Self {
        Self {
            source_id: source_id.clone(),
            command: PlayerCommand::Play,
        }
    }

    pub fn pause(source_id: &SourceId) -> Self {
        Self {
            source_id: source_id.clone(),
            command: PlayerCommand::Pause,
        }
    }
}
