use super::{respond, CommandResponse};
use crate::state::app_state::AppState;
use crate::state::registry::RegistrySnapshot;

pub async fn get_state(state: &AppState) -> Result<RegistrySnapshot, String> {
    Ok(state.arbiter.snapshot())
}

pub async fn request_play(state: &AppState, source_id: &str) -> Result<CommandResponse, String> {
    log::info!("▶️ Play requested for '{}'", source_id);
    respond(state, "request_play", || state.arbiter.request_play(source_id)).await
}

pub async fn request_pause(state: &AppState, source_id: &str) -> Result<CommandResponse, String> {
    log::info!("⏸️ Pause requested for '{}'", source_id);
    respond(state, "request_pause", || state.arbiter.request_pause(source_id)).await
}

/// Change a source's priority and remember it for its kind, so players of
/// the same kind get it when they show up again.
pub async fn set_priority(
    state: &AppState,
    source_id: &str,
    priority: u32,
) -> Result<CommandResponse, String> {
    let mut kind = None;
    let mut response = respond(state, "set_priority", || {
        let result = state.arbiter.set_priority(source_id, priority);
        if result.is_ok() {
            kind = state.arbiter.source_kind(source_id);
        }
        result
    })
    .await?;

    if let Some(kind) = kind {
        state.settings.write().await.set_kind_priority(&kind, priority);
        if let Err(e) = state.persist_settings().await {
            log::warn!("Failed to save priority for '{}': {}", kind, e);
            response.warnings.push(format!("priority not saved: {}", e));
        }
    }
    Ok(response)
}

pub async fn set_volume(
    state: &AppState,
    source_id: &str,
    volume: f64,
) -> Result<CommandResponse, String> {
    respond(state, "set_volume", || state.arbiter.set_volume(source_id, volume)).await
}

pub async fn set_pause_all(state: &AppState, enabled: bool) -> Result<CommandResponse, String> {
    log::info!("⏯️ Pause all {}", if enabled { "enabled" } else { "disabled" });
    let mut response =
        respond(state, "set_pause_all", || state.arbiter.set_pause_all(enabled)).await?;

    state.settings.write().await.pause_all_enabled = enabled;
    if let Err(e) = state.persist_settings().await {
        log::warn!("Failed to save pause-all setting: {}", e);
        response.warnings.push(format!("setting not saved: {}", e));
    }
    Ok(response)
}

/// Start or stop background arbitration. Explicit commands keep working
/// while it is off.
pub async fn set_arbitration_enabled(state: &AppState, enabled: bool) -> Result<(), String> {
    state.settings.write().await.arbitration_enabled = enabled;
    if enabled {
        state.start_monitor().await;
    } else {
        state.stop_monitor().await;
    }
    log::info!(
        "⚖️ Arbitration {}",
        if enabled { "enabled" } else { "disabled" }
    );

    state.persist_settings().await.map_err(|e| e.to_string())
}
