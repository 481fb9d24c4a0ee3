//! Configuration module for Torpool
//!
//! This module provides configuration types and TOML parsing for the pool,
//! the supervised daemons and their control channels.

mod control;
mod daemon;
mod pool;

pub use control::ControlConfig;
pub use daemon::DaemonConfig;
pub use pool::PoolConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Pool sizing and port allocation
    #[serde(default)]
    pub pool: PoolConfig,

    /// Daemon process settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Control channel settings
    #[serde(default)]
    pub control: ControlConfig,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.pool
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [pool] section: {}", e))?;
        self.daemon
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [daemon] section: {}", e))?;
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_parse_empty_config() {
        let config = parse_config("").unwrap();
        assert_eq!(config.pool.size, 5);
        assert_eq!(config.pool.start_port, 9050);
        assert!(config.daemon.executable.is_none());
        assert_eq!(config.control.password, "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[pool]
size = 3
start_port = 9100

[daemon]
executable = "/usr/local/bin/tor"
data_root = "/var/lib/torpool"
startup_timeout_ms = 60000
bootstrap_grace_ms = 500
stop_grace_ms = 250

[control]
password = "secret"
connect_timeout_ms = 2000
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.pool.size, 3);
        assert_eq!(config.pool.start_port, 9100);
        assert_eq!(
            config.daemon.executable,
            Some(PathBuf::from("/usr/local/bin/tor"))
        );
        assert_eq!(
            config.daemon.data_root,
            Some(PathBuf::from("/var/lib/torpool"))
        );
        assert_eq!(config.daemon.startup_timeout(), Duration::from_secs(60));
        assert_eq!(config.daemon.bootstrap_grace(), Duration::from_millis(500));
        assert_eq!(config.daemon.stop_grace(), Duration::from_millis(250));
        assert_eq!(config.control.password, "secret");
        assert_eq!(config.control.connect_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_invalid_config() {
        assert!(parse_config("[pool]\nsize = \"many\"").is_err());
    }

    #[test]
    fn test_validate_rejects_port_overflow() {
        let config = parse_config("[pool]\nsize = 10\nstart_port = 65530").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[pool]"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/torpool.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torpool.toml");
        std::fs::write(&path, "[pool]\nsize = 2\nstart_port = 9070\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.start_port, 9070);
    }
}
