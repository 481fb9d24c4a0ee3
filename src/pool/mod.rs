//! Pool module for Torpool
//!
//! This module manages a fixed set of proxy instances as a unit: all-or-nothing
//! initialization, concurrent identity rotation with per-instance results,
//! and concurrent teardown.

mod proxy_pool;

pub use proxy_pool::ProxyPool;

use crate::config::Config;
use anyhow::{Context, Result};

/// Validate the configuration and create an empty pool from it
pub fn create_pool(config: &Config) -> Result<ProxyPool> {
    config.validate().context("Invalid configuration")?;
    Ok(ProxyPool::from_config(config))
}
