//! Contract constants and the optional JSON config that overrides them.

use crate::error::SuggesterError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Constants
// ============================================================================

/// Qualifying sessions in a row needed before a session arms the check
pub const CONSECUTIVE_SESSIONS_THRESHOLD: u32 = 2;

/// Delay after session start before the suggestion check runs
pub const SUGGEST_DELAY_MS: u64 = 5000;

/// Sessions shorter than this never count toward the streak
pub const MIN_SESSION_DURATION_MS: u64 = SUGGEST_DELAY_MS / 2;

/// Config directory name under the user config dir
const CONFIG_DIR: &str = "diagnostic-suggester";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Config
// ============================================================================

/// Tunables for the tracker. Defaults are the contract values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuggesterConfig {
    /// Streak length that arms the delayed check
    pub consecutive_sessions: u32,

    /// Milliseconds after session start before the check fires
    pub suggest_delay_ms: u64,
}

impl Default for SuggesterConfig {
    fn default() -> Self {
        Self {
            consecutive_sessions: CONSECUTIVE_SESSIONS_THRESHOLD,
            suggest_delay_ms: SUGGEST_DELAY_MS,
        }
    }
}

impl SuggesterConfig {
    pub fn suggest_delay(&self) -> Duration {
        Duration::from_millis(self.suggest_delay_ms)
    }

    /// Minimum session length that may count toward the streak (half the delay)
    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.suggest_delay_ms / 2)
    }

    /// Load config from an explicit path, or from the user config dir.
    ///
    /// An explicit path must exist. The default location is optional and
    /// falls back to the contract defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self, SuggesterError> {
        if let Some(path) = path {
            return read_config(path);
        }

        let Some(default_path) = default_config_path() else {
            debug!("No config directory, using defaults");
            return Ok(Self::default());
        };

        match read_config(&default_path) {
            Err(SuggesterError::ConfigNotFound(path)) => {
                debug!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            other => other,
        }
    }
}

/// Get the path to the default config file
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

fn read_config(path: &Path) -> Result<SuggesterConfig, SuggesterError> {
    if !path.exists() {
        return Err(SuggesterError::ConfigNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| SuggesterError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: SuggesterConfig =
        serde_json::from_str(&content).map_err(|e| SuggesterError::ConfigParse(e.to_string()))?;

    debug!("Loaded config from {:?}: {:?}", path, config);
    Ok(config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "dsg-config-{}-{}.json",
            name,
            std::process::id()
        ));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_match_contract() {
        let config = SuggesterConfig::default();
        assert_eq!(config.consecutive_sessions, 2);
        assert_eq!(config.suggest_delay(), Duration::from_millis(5000));
        assert_eq!(config.min_duration(), Duration::from_millis(2500));
        assert_eq!(MIN_SESSION_DURATION_MS, 2500);
    }

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(2500)), 2500);
        assert_eq!(saturating_millis(Duration::from_micros(1999)), 1);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let path = temp_config("partial", r#"{"suggestDelayMs": 1000}"#);
        let config = SuggesterConfig::load(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.suggest_delay_ms, 1000);
        assert_eq!(config.min_duration(), Duration::from_millis(500));
        assert_eq!(config.consecutive_sessions, CONSECUTIVE_SESSIONS_THRESHOLD);
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let path = std::env::temp_dir().join("dsg-config-does-not-exist.json");
        let err = SuggesterConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, SuggesterError::ConfigNotFound(_)));
    }

    #[test]
    fn test_malformed_config_is_error() {
        let path = temp_config("malformed", "{ not json");
        let err = SuggesterConfig::load(Some(&path)).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, SuggesterError::ConfigParse(_)));
    }
}
