//! Logging utilities for MediaSense
//!
//! Everything goes through the `log` facade. `init_logging` wires up
//! `env_logger` writing to `<data_local_dir>/mediasense/mediasense.log`
//! (default filter `info`, override with `RUST_LOG`). Arbitration decisions
//! are always logged at info level; poll reconciliation noise stays at debug.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use env_logger::{Env, Target};

use crate::arbiter::Decision;

pub const LOG_FILE_NAME: &str = "mediasense.log";

/// Default log directory: `~/.local/share/mediasense`
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("mediasense"))
}

/// Initialise `env_logger`. Falls back to stderr when the log file cannot be
/// opened. Calling it twice is harmless.
pub fn init_logging(log_dir: Option<&Path>) -> Option<PathBuf> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();

    let mut log_path = None;
    if let Some(dir) = log_dir {
        let path = dir.join(LOG_FILE_NAME);
        let opened = std::fs::create_dir_all(dir).and_then(|_| {
            OpenOptions::new().create(true).append(true).open(&path)
        });
        match opened {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
                log_path = Some(path);
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path.display(), e);
            }
        }
    }

    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }
    log_path
}

/// Log a source state transition
pub fn log_state_transition(source: &str, from_state: &str, to_state: &str, reason: &str) {
    log::info!("🔄 STATE [{}]: {} → {} ({})", source, from_state, to_state, reason);
}

/// Log the commands an arbitration decision produced
pub fn log_decision(operation: &str, decision: &Decision) {
    if decision.commands.is_empty() {
        log::debug!("⚖️ {} produced no commands", operation);
        return;
    }

    let commands: Vec<String> = decision
        .commands
        .iter()
        .map(|c| format!("{} {}", c.command, c.source_id))
        .collect();
    log::info!("⚖️ {}: {}", operation, commands.join(", "));

    if decision.active_changed() {
        match &decision.snapshot.active_source_id {
            Some(active) => log::info!("🎵 Active source is now '{}'", active),
            None => log::info!("🔇 No active source"),
        }
    }
}

/// Log operation failure with context
pub fn log_operation_failed(operation: &str, error: &str, context: &HashMap<String, String>) {
    log::error!("❌ {} FAILED: {}", operation, error);
    if !context.is_empty() {
        log::error!("   📋 Context: {:?}", context);
    }
}

/// Log application lifecycle events
pub fn log_lifecycle_event(event: &str, context: Option<&HashMap<String, String>>) {
    log::info!(
        "🚀 LIFECYCLE {} - Version: {}",
        event,
        env!("CARGO_PKG_VERSION")
    );

    if let Some(ctx) = context {
        if !ctx.is_empty() {
            log::info!("   📋 Context: {:?}", ctx);
        }
    }
}

/// Quick context creation; allocates only when debug logging is enabled
#[macro_export]
macro_rules! log_context {
    ($($key:expr => $value:expr),* $(,)?) => {
        {
            if log::log_enabled!(log::Level::Debug) {
                let mut context = std::collections::HashMap::new();
                $(
                    context.insert($key.to_string(), $value.to_string());
                )*
                context
            } else {
                std::collections::HashMap::new()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_macro() {
        let context = log_context! {
            "source" => "spotify",
            "command" => "pause",
        };

        if log::log_enabled!(log::Level::Debug) {
            assert_eq!(context.len(), 2);
            assert_eq!(context.get("source"), Some(&"spotify".to_string()));
        } else {
            assert_eq!(context.len(), 0);
        }
    }

    #[test]
    fn test_init_logging_creates_log_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_dir = dir.path().join("nested");

        let path = init_logging(Some(&log_dir));

        // Another test may have initialised the global logger first; the file
        // is still created.
        assert!(log_dir.join(LOG_FILE_NAME).exists());
        if let Some(path) = path {
            assert!(path.ends_with(LOG_FILE_NAME));
        }
    }
}
