//! Helper utilities for Torpool
//!
//! Shared constants and small filesystem helpers used by instances and the pool.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Host every SOCKS and control port is bound to
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// SOCKS port used by an instance created without explicit ports
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Control port used by an instance created without explicit ports
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Generate an instance id from the wall clock, unique within this process
pub fn default_instance_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

    if seq == 0 {
        millis.to_string()
    } else {
        format!("{}-{}", millis, seq)
    }
}

/// Recursively remove a directory if it exists
///
/// Returns `Ok(false)` when there was nothing to remove.
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
