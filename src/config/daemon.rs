//! Daemon process configuration
//!
//! Where the Tor executable lives, where instance state goes, and the
//! timings of the start and stop sequences.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time allowed for a daemon to bootstrap, in milliseconds
fn default_startup_timeout_ms() -> u64 {
    120_000
}

/// Default settle time after bootstrap before connecting the control channel
fn default_bootstrap_grace_ms() -> u64 {
    2_000
}

/// Default time between graceful and forced termination
fn default_stop_grace_ms() -> u64 {
    1_000
}

/// Daemon process configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Explicit path to the Tor executable; searched for when absent
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Directory holding the per-instance data directories
    #[serde(default)]
    pub data_root: Option<PathBuf>,

    /// Bootstrap timeout in milliseconds
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Delay after bootstrap before the control channel is opened
    #[serde(default = "default_bootstrap_grace_ms")]
    pub bootstrap_grace_ms: u64,

    /// Delay between SIGTERM and SIGKILL on stop
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            executable: None,
            data_root: None,
            startup_timeout_ms: default_startup_timeout_ms(),
            bootstrap_grace_ms: default_bootstrap_grace_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl DaemonConfig {
    /// Bootstrap timeout
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Settle time after bootstrap
    pub fn bootstrap_grace(&self) -> Duration {
        Duration::from_millis(self.bootstrap_grace_ms)
    }

    /// Graceful termination window
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Root for instance data directories, the system temp dir by default
    pub fn data_root(&self) -> PathBuf {
        self.data_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Data directory for the instance with the given id
    pub fn data_dir_for(&self, id: &str) -> PathBuf {
        instance_data_dir(&self.data_root(), id)
    }

    /// Validate the daemon configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.startup_timeout_ms == 0 {
            return Err("startup_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// `<root>/tor-<id>`
pub(crate) fn instance_data_dir(root: &Path, id: &str) -> PathBuf {
    root.join(format!("tor-{}", id))
}
