//! Control channel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default control connection timeout in milliseconds
fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Control channel configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControlConfig {
    /// Password sent with AUTHENTICATE; the daemons are started with an
    /// empty hashed password so the default is empty too
    #[serde(default)]
    pub password: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            password: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ControlConfig {
    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_config_default() {
        let config = ControlConfig::default();
        assert_eq!(config.password, "");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }
}
