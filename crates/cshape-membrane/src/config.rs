//! Runtime membrane configuration.
//!
//! Settings are read from the environment once and cached:
//! - `CSHAPE_LEAK_CHECK`: `report` (default) snapshots every still-live handle
//!   at a leak checkpoint; `off` turns checkpoints into no-ops.
//! - `CSHAPE_RELEASE_HISTORY`: number of released handle records retained so
//!   that double-release and use-after-release diagnostics can name the
//!   resource class and address (default 256).

use std::sync::OnceLock;

/// Default number of released records retained for diagnostics.
pub const DEFAULT_RELEASE_HISTORY: usize = 256;

/// Leak checkpoint behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeakCheck {
    /// Checkpoints return every live handle as a potential leak.
    #[default]
    Report,
    /// Checkpoints return an empty report.
    Off,
}

impl LeakCheck {
    /// Parse from string (case-insensitive). Unknown values keep reporting on.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" | "0" | "false" => Self::Off,
            _ => Self::Report,
        }
    }

    /// Returns true if checkpoints should snapshot live handles.
    #[must_use]
    pub const fn enabled(self) -> bool {
        matches!(self, Self::Report)
    }
}

/// Tracker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembraneConfig {
    pub leak_check: LeakCheck,
    pub release_history: usize,
}

impl Default for MembraneConfig {
    fn default() -> Self {
        Self {
            leak_check: LeakCheck::Report,
            release_history: DEFAULT_RELEASE_HISTORY,
        }
    }
}

impl MembraneConfig {
    /// Build a configuration from raw variable values.
    #[must_use]
    pub fn from_values(leak_check: Option<&str>, release_history: Option<&str>) -> Self {
        let defaults = Self::default();
        Self {
            leak_check: leak_check
                .map(LeakCheck::from_str_loose)
                .unwrap_or(defaults.leak_check),
            release_history: release_history
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .unwrap_or(defaults.release_history),
        }
    }

    /// Read the configuration from `CSHAPE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let leak_check = std::env::var("CSHAPE_LEAK_CHECK").ok();
        let history = std::env::var("CSHAPE_RELEASE_HISTORY").ok();
        Self::from_values(leak_check.as_deref(), history.as_deref())
    }
}

static GLOBAL_CONFIG: OnceLock<MembraneConfig> = OnceLock::new();

/// Process-wide configuration (reads the environment on first call).
#[must_use]
pub fn membrane_config() -> MembraneConfig {
    *GLOBAL_CONFIG.get_or_init(MembraneConfig::from_env)
}
