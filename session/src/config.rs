//! Service tuning knobs.
//!
//! Everything has a production default; deployments override individual
//! fields through whatever config file the host binary loads. Durations
//! are plain millisecond counts so the struct stays trivially
//! deserializable.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Receives one subdirectory per installed pyright version.
    pub install_root: PathBuf,
    /// npm registry base for version lookups and installs.
    pub registry_base_url: String,
    /// Binary that runs the language-server entry point.
    pub node_command: String,
    /// Binary used to install pyright versions.
    pub npm_command: String,
    /// Bound on the inactive session pool; the oldest entry is evicted
    /// beyond this.
    pub max_inactive_sessions: usize,
    /// An active session idle longer than this is recycled by the sweep.
    pub max_session_idle_ms: u64,
    /// How often the sweep scans for idle sessions.
    pub sweep_interval_ms: u64,
    /// How long a resolved "latest" version stays fresh.
    pub latest_version_ttl_ms: u64,
    /// Cap on the supported-version list returned to callers.
    pub max_listed_versions: usize,
    /// `pythonVersion` written to the config file when the caller omits it.
    pub default_python_version: String,
    /// `pythonPlatform` written to the config file when the caller omits it.
    pub default_python_platform: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("pyright_local"),
            registry_base_url: "https://registry.npmjs.org".to_string(),
            node_command: "node".to_string(),
            npm_command: "npm".to_string(),
            max_inactive_sessions: 64,
            max_session_idle_ms: 60 * 1000,
            sweep_interval_ms: 60 * 1000,
            latest_version_ttl_ms: 60 * 60 * 1000,
            max_listed_versions: 50,
            default_python_version: "3.12".to_string(),
            default_python_platform: "All".to_string(),
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn max_session_idle(&self) -> Duration {
        Duration::from_millis(self.max_session_idle_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    #[must_use]
    pub fn latest_version_ttl(&self) -> Duration {
        Duration::from_millis(self.latest_version_ttl_ms)
    }
}
