use thiserror::Error;

use super::command::PlayerCommand;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArbiterError {
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("backend failed to {command} '{source_id}': {reason}")]
    BackendCommandFailed {
        source_id: String,
        command: PlayerCommand,
        reason: String,
    },
    #[error("source already registered: {0}")]
    DuplicateSource(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("invalid priority {0}: priorities start at 1")]
    InvalidPriority(u32),
    #[error("invalid volume {0}: expected a value between 0.0 and 1.0")]
    InvalidVolume(f64),
}

impl ArbiterError {
    pub fn backend_command_failed(source_id: &str, command: PlayerCommand, reason: &str) -> Self {
        ArbiterError::BackendCommandFailed {
            source_id: source_id.to_string(),
            command,
            reason: reason.to_string(),
        }
    }
}
