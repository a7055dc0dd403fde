use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "MEDIASENSE_CONFIG";

const DEFAULT_CHECK_INTERVAL_SECS: f64 = 1.0;
const MIN_CHECK_INTERVAL_SECS: f64 = 0.1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no configuration directory available on this system")]
    NoConfigDir,
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Priority and browser flag resolved for a source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceClass {
    pub priority: u32,
    pub is_browser: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Source-kind pattern -> priority (1 = highest)
    pub priorities: BTreeMap<String, u32>,
    pub default_priority: u32,
    /// Unmapped browsers get priority 1
    pub browser_priority: bool,
    pub browser_patterns: Vec<String>,
    pub arbitration_enabled: bool,
    pub pause_all_enabled: bool,
    pub notification_enabled: bool,
    pub check_interval_secs: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let priorities = [
            ("firefox", 1),
            ("chromium", 1),
            ("chrome", 1),
            ("spotify", 2),
            ("vlc", 3),
            ("rhythmbox", 4),
            ("audacious", 5),
        ]
        .into_iter()
        .map(|(name, priority)| (name.to_string(), priority))
        .collect();

        Self {
            priorities,
            default_priority: 10,
            browser_priority: true,
            browser_patterns: ["firefox", "chromium", "chrome", "brave"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            arbitration_enabled: true,
            pause_all_enabled: false,
            notification_enabled: true,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
        }
    }
}

impl Settings {
    /// `$MEDIASENSE_CONFIG`, else `<config_dir>/mediasense/config.json`
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("mediasense").join("config.json"))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Load settings, writing the defaults out when the file does not exist.
    /// Keys missing from the file take their default values.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::info!("No config at {}, writing defaults", path.display());
            let settings = Settings::default();
            settings.save_to(path)?;
            return Ok(settings);
        }

        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`Settings::load_from`] but never fails: errors are logged and the
    /// defaults are used.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("Error loading config {}: {}", path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.default_priority == 0 {
            return Err(SettingsError::Invalid(
                "default_priority must be at least 1".to_string(),
            ));
        }
        if let Some((pattern, _)) = self.priorities.iter().find(|(_, p)| **p == 0) {
            return Err(SettingsError::Invalid(format!(
                "priority for '{}' must be at least 1",
                pattern
            )));
        }
        if !self.check_interval_secs.is_finite() || self.check_interval_secs <= 0.0 {
            return Err(SettingsError::Invalid(format!(
                "check_interval_secs must be positive, got {}",
                self.check_interval_secs
            )));
        }
        Ok(())
    }

    /// Poll interval, clamped to at least 100ms
    pub fn check_interval(&self) -> Duration {
        let secs = if self.check_interval_secs.is_finite() {
            self.check_interval_secs.max(MIN_CHECK_INTERVAL_SECS)
        } else {
            DEFAULT_CHECK_INTERVAL_SECS
        };
        Duration::from_secs_f64(secs)
    }

    pub fn is_browser(&self, kind: &str) -> bool {
        let kind = kind.to_lowercase();
        self.browser_patterns
            .iter()
            .any(|pattern| kind.contains(&pattern.to_lowercase()))
    }

    /// Configured priority for a kind: an exact key wins, otherwise the
    /// lowest priority among the patterns matching the kind.
    pub fn priority_for(&self, kind: &str) -> Option<u32> {
        let kind = kind.to_lowercase();
        if let Some(priority) = self
            .priorities
            .iter()
            .find(|(pattern, _)| pattern.to_lowercase() == kind)
            .map(|(_, p)| *p)
        {
            return Some(priority);
        }

        self.priorities
            .iter()
            .filter(|(pattern, _)| pattern_matches(pattern, &kind))
            .map(|(_, p)| *p)
            .min()
    }

    pub fn classify(&self, kind: &str) -> SourceClass {
        let is_browser = self.is_browser(kind);
        let priority = self
            .priority_for(kind)
            .or(if self.browser_priority && is_browser {
                Some(1)
            } else {
                None
            })
            .unwrap_or(self.default_priority);

        SourceClass {
            priority,
            is_browser,
        }
    }

    /// Remember a priority for a kind, as set from the presentation layer
    pub fn set_kind_priority(&mut self, kind: &str, priority: u32) {
        self.priorities.insert(kind.to_lowercase(), priority);
    }
}

fn pattern_matches(pattern: &str, kind: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(kind),
        Err(e) => {
            log::warn!("Invalid priority pattern '{}': {}; matching literally", pattern, e);
            kind.contains(&pattern.to_lowercase())
        }
    }
}
