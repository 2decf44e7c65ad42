use std::time::Duration;

use serde::{Deserialize, Serialize};
use sts_core_types::SystemId;
use sts_registry::RegistryConfig;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/sts/";

/// Settings of the monitor binary, read from YAML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Roster endpoint; detail urls without a roster-provided `url` are
    /// resolved against it.
    pub base_url: String,
    pub roster_interval_ms: u64,
    pub detail_interval_ms: u64,
    pub poll_roster: bool,
    pub request_timeout_ms: u64,
    /// System to show once the roster lists it.
    pub initial_system: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            roster_interval_ms: 30_000,
            detail_interval_ms: 5_000,
            poll_roster: true,
            request_timeout_ms: 10_000,
            initial_system: None,
        }
    }
}

/// Command line values that win over the file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub system: Option<String>,
    pub roster_interval_ms: Option<u64>,
    pub detail_interval_ms: Option<u64>,
}

impl MonitorConfig {
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(system) = overrides.system {
            self.initial_system = Some(system);
        }
        if let Some(ms) = overrides.roster_interval_ms {
            self.roster_interval_ms = ms;
        }
        if let Some(ms) = overrides.detail_interval_ms {
            self.detail_interval_ms = ms;
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            poll: self.poll_roster,
            roster_interval: Duration::from_millis(self.roster_interval_ms),
            detail_interval: Duration::from_millis(self.detail_interval_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn initial_system(&self) -> Option<SystemId> {
        self.initial_system.as_deref().map(SystemId::from)
    }
}
