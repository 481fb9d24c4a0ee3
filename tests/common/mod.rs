//! Test utilities and mocks for Torpool
//!
//! Fake daemons are small shell scripts that print what Tor would print;
//! the mock connector hands out control sessions whose behaviour can be
//! changed per port while a test runs.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use torpool::config::DaemonConfig;
use torpool::control::{ControlConnector, ControlSession};
use torpool::error::{Result, TorPoolError};
use torpool::{InstanceState, ProxyInstance};

/// Bootstraps immediately and then idles
pub const READY_DAEMON: &str = r#"echo "[notice] Bootstrapped 0% (starting): Starting"
echo "[notice] Bootstrapped 100% (done): Done"
exec sleep 60"#;

/// Never bootstraps
pub const SILENT_DAEMON: &str = "echo \"[notice] Tor starting\"\nexec sleep 60";

/// Fails to bind its SOCKS port
pub const PORT_IN_USE_DAEMON: &str = r#"echo "[warn] Could not bind to 127.0.0.1:$2: Address already in use" >&2
exec sleep 60"#;

/// Exits before bootstrapping
pub const EXITING_DAEMON: &str = "echo \"[err] Reading config failed\"\nexit 1";

/// Prints invalid UTF-8 before bootstrapping
pub const GARBLED_DAEMON: &str = r#"printf '\377\376 garbage\n'
echo "[notice] Bootstrapped 100% (done): Done"
exec sleep 60"#;

/// Fails with a port conflict after `delay_secs` on `socks_port`, immediately
/// elsewhere, and ignores SIGTERM so teardown has to force-kill it
pub fn stubborn_conflict_daemon(socks_port: u16, delay_secs: &str) -> String {
    format!(
        r#"trap '' TERM
if [ "$2" = "{}" ]; then sleep {}; fi
echo "[warn] Could not bind to 127.0.0.1:$2: Address already in use" >&2
while true; do sleep 1; done"#,
        socks_port, delay_secs
    )
}

/// Fails with a port conflict (ignoring SIGTERM) on its first run in `dir`,
/// bootstraps on every later run
pub fn fail_once_daemon(dir: &Path) -> String {
    format!(
        r#"if [ ! -f "{0}/failed-once" ]; then
  touch "{0}/failed-once"
  trap '' TERM
  echo "[warn] Could not bind to 127.0.0.1:$2: Address already in use" >&2
  while true; do sleep 1; done
fi
echo "[notice] Bootstrapped 100% (done): Done"
exec sleep 60"#,
        dir.display()
    )
}

/// Bootstraps only if its data directory (8th argument) exists, and records
/// its arguments next to the script
pub fn recording_daemon(dir: &Path) -> String {
    format!(
        r#"printf '%s\n' "$@" > "{}/args-$2.txt"
[ -d "$8" ] || exit 3
echo "[notice] Bootstrapped 100% (done): Done"
exec sleep 60"#,
        dir.display()
    )
}

/// Fails with a port conflict when started on `socks_port`, bootstraps otherwise
pub fn conflicting_daemon(socks_port: u16) -> String {
    format!(
        r#"if [ "$2" = "{}" ]; then
  echo "[warn] Could not bind to 127.0.0.1:$2: Address already in use" >&2
  exec sleep 60
fi
echo "[notice] Bootstrapped 100% (done): Done"
exec sleep 60"#,
        socks_port
    )
}

/// Write an executable shell script and return its path
pub fn write_daemon(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Daemon settings for tests: short grace periods, private data root
pub fn daemon_config(executable: &Path, data_root: &Path) -> DaemonConfig {
    DaemonConfig {
        executable: Some(executable.to_path_buf()),
        data_root: Some(data_root.to_path_buf()),
        startup_timeout_ms: 10_000,
        bootstrap_grace_ms: 10,
        stop_grace_ms: 500,
    }
}

/// Poll until the instance reaches `state`
pub async fn wait_for_state(instance: &ProxyInstance, state: InstanceState) {
    for _ in 0..250 {
        if instance.state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("instance {} never reached {}", instance.id(), state);
}

#[derive(Debug, Default)]
struct MockState {
    /// Ports whose sessions fail and whose connects are refused
    broken_ports: Mutex<HashSet<u16>>,
    /// Sessions created before this epoch fail their next signal
    epoch: AtomicU64,
    /// How long each signal takes
    signal_delay: Mutex<Duration>,
    connects: AtomicUsize,
    signals: AtomicUsize,
    quits: AtomicUsize,
}

/// Control connector whose sessions can be broken per port
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Create a connector where every port works
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connects and fail signals on `port`
    pub fn break_port(&self, port: u16) {
        self.state.broken_ports.lock().unwrap().insert(port);
    }

    /// Make every existing session fail; new sessions work
    pub fn drop_sessions(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Make every signal take `delay`
    pub fn set_signal_delay(&self, delay: Duration) {
        *self.state.signal_delay.lock().unwrap() = delay;
    }

    /// Number of connect attempts
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of accepted signals
    pub fn signals(&self) -> usize {
        self.state.signals.load(Ordering::SeqCst)
    }

    /// Number of quit calls
    pub fn quits(&self) -> usize {
        self.state.quits.load(Ordering::SeqCst)
    }

    fn is_broken(&self, port: u16) -> bool {
        self.state.broken_ports.lock().unwrap().contains(&port)
    }
}

#[async_trait]
impl ControlConnector for MockConnector {
    async fn connect(&self, port: u16, _password: &str) -> Result<Box<dyn ControlSession>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.is_broken(port) {
            return Err(TorPoolError::Control(format!(
                "Failed to connect to control port {}: Connection refused",
                port
            )));
        }
        Ok(Box::new(MockSession {
            port,
            epoch: self.state.epoch.load(Ordering::SeqCst),
            connector: self.clone(),
        }))
    }
}

#[derive(Debug)]
struct MockSession {
    port: u16,
    epoch: u64,
    connector: MockConnector,
}

#[async_trait]
impl ControlSession for MockSession {
    async fn signal(&mut self, name: &str) -> Result<()> {
        let delay = *self.connector.state.signal_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let current = self.connector.state.epoch.load(Ordering::SeqCst);
        if self.connector.is_broken(self.port) || self.epoch != current {
            return Err(TorPoolError::Control("Control connection closed".to_string()));
        }
        assert_eq!(name, "NEWNYM");
        self.connector.state.signals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        self.connector.state.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
