//! Pool configuration
//!
//! Defines how many daemons the pool runs and where their ports start.

use serde::{Deserialize, Serialize};

/// Default number of daemons in a pool
fn default_size() -> usize {
    5
}

/// Default base port
fn default_start_port() -> u16 {
    9050
}

/// Pool configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    /// Number of daemons to run
    #[serde(default = "default_size")]
    pub size: usize,

    /// First SOCKS port; each instance takes two consecutive ports
    #[serde(default = "default_start_port")]
    pub start_port: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            size: default_size(),
            start_port: default_start_port(),
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration
    pub fn new(size: usize, start_port: u16) -> Self {
        PoolConfig { size, start_port }
    }

    /// Port pair for the instance at `index` (0-based)
    ///
    /// Returns `None` when the pair does not fit in the port range.
    pub fn ports_for(&self, index: usize) -> Option<(u16, u16)> {
        let offset = u32::try_from(index).ok()?.checked_mul(2)?;
        let socks = u32::from(self.start_port).checked_add(offset)?;
        let control = socks + 1;
        if control > u32::from(u16::MAX) {
            return None;
        }
        Some((socks as u16, control as u16))
    }

    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.size == 0 {
            return Err("size must be greater than 0".to_string());
        }
        if self.start_port == 0 {
            return Err("start_port must be greater than 0".to_string());
        }
        if self.ports_for(self.size - 1).is_none() {
            return Err(format!(
                "{} instances starting at port {} exceed the port range",
                self.size, self.start_port
            ));
        }
        Ok(())
    }
}
