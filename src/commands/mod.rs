//! Presentation layer command surface.
//!
//! Every command takes the shared [`AppState`] and returns `Result<_, String>`
//! so a front end (tray, CLI, IPC bridge) can surface errors verbatim.

pub mod playback;
pub mod settings;

use serde::Serialize;

use crate::arbiter::{ArbiterError, Decision};
use crate::log_context;
use crate::state::app_state::AppState;
use crate::state::registry::RegistrySnapshot;
use crate::utils::logger::{log_decision, log_operation_failed};

/// State after a command plus any backend command failures. A warning does
/// not undo the decision; the next poll reconciles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub state: RegistrySnapshot,
    pub warnings: Vec<String>,
}

/// Run an engine operation, dispatch its commands, publish the new state and
/// build the response. The command gate is held until the backend has seen
/// the commands so a concurrent poll cannot list the players mid-change.
/// Engine errors are logged and returned as strings.
pub(crate) async fn respond<F>(
    state: &AppState,
    operation: &str,
    decide: F,
) -> Result<CommandResponse, String>
where
    F: FnOnce() -> Result<Decision, ArbiterError>,
{
    let _gate = state.lock_commands().await;
    let decision = match decide() {
        Ok(decision) => decision,
        Err(e) => {
            log_operation_failed(operation, &e.to_string(), &log_context! {
                "operation" => operation,
            });
            return Err(e.to_string());
        }
    };

    log_decision(operation, &decision);
    let warnings = state.dispatch(&decision).await;
    state.publish_state(decision.snapshot.clone());

    Ok(CommandResponse {
        state: decision.snapshot,
        warnings,
    })
}
