use super::respond;
use crate::settings::Settings;
use crate::state::app_state::AppState;
use crate::state::source::Source;

pub async fn get_settings(state: &AppState) -> Result<Settings, String> {
    Ok(state.settings.read().await.clone())
}

/// Validate, store and apply new settings. Priorities of known sources are
/// re-resolved; a changed poll interval restarts the monitor. Sources that
/// could not take their new priority come back as warnings.
pub async fn save_settings(state: &AppState, settings: Settings) -> Result<Vec<String>, String> {
    settings.validate().map_err(|e| e.to_string())?;

    let previous = {
        let mut current = state.settings.write().await;
        std::mem::replace(&mut *current, settings.clone())
    };
    state.persist_settings().await.map_err(|e| e.to_string())?;
    log::info!("💾 Settings saved");

    let mut warnings = {
        let _gate = state.lock_commands().await;
        reprioritize(state, &state.arbiter.snapshot().sources, &settings)
    };

    if previous.pause_all_enabled != settings.pause_all_enabled {
        let response = respond(state, "save_settings", || {
            state.arbiter.set_pause_all(settings.pause_all_enabled)
        })
        .await?;
        warnings.extend(response.warnings);
    }

    if !settings.arbitration_enabled {
        state.stop_monitor().await;
    } else if !previous.arbitration_enabled {
        state.start_monitor().await;
    } else if previous.check_interval() != settings.check_interval() {
        state.restart_monitor().await;
    }
    Ok(warnings)
}

/// Give each listed source the priority `settings` resolve for its kind.
pub(crate) fn reprioritize(
    state: &AppState,
    sources: &[Source],
    settings: &Settings,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for source in sources {
        let priority = settings.classify(&source.kind).priority;
        if priority == source.priority {
            continue;
        }
        log::info!(
            "Priority of '{}' changes {} → {}",
            source.id,
            source.priority,
            priority
        );
        if let Err(e) = state.arbiter.set_priority(source.id.as_str(), priority) {
            log::warn!("Failed to update priority of '{}': {}", source.id, e);
            warnings.push(format!("priority of '{}' not updated: {}", source.id, e));
        }
    }
    warnings
}
