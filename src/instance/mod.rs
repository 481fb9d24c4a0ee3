//! Supervised proxy instance
//!
//! A [`ProxyInstance`] owns one Tor process, its private data directory and
//! one control session. All three live behind a single lock; a start only
//! holds it while spawning and while publishing its result, so a concurrent
//! [`ProxyInstance::stop`] can abort a start that hangs in bootstrap.
//!
//! Every start carries a generation number. A start that finds the instance
//! torn down or restarted under it (different generation, or no longer
//! awaiting bootstrap) gives up instead of re-populating cleared handles.
//!
//! Teardown runs outside the instance lock with the state held at
//! `Stopping`. The teardown lock is held for exactly that window, so a
//! second stop can wait for the first one to finish.

mod state;

pub use state::{InstanceState, ProxyInfo};

use crate::config::{ControlConfig, DaemonConfig};
use crate::control::{ControlConnector, ControlSession, TorControlConnector, SIGNAL_NEWNYM};
use crate::daemon::{
    daemon_args, locate_executable, wait_for_bootstrap, DaemonProcess, SpawnedDaemon,
    EXECUTABLE_NAME,
};
use crate::error::{Result, TorPoolError};
use crate::helper::{
    default_instance_id, remove_dir_if_exists, DEFAULT_CONTROL_PORT, DEFAULT_SOCKS_PORT,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Handles guarded by the instance lock
struct Inner {
    state: InstanceState,
    generation: u64,
    process: Option<DaemonProcess>,
    session: Option<Box<dyn ControlSession>>,
    /// Set once a start has created (or adopted) the data directory
    owns_data_dir: bool,
}

impl Inner {
    fn take_resources(&mut self) -> Resources {
        Resources {
            process: self.process.take(),
            session: self.session.take(),
            owns_data_dir: std::mem::take(&mut self.owns_data_dir),
        }
    }
}

/// Resources detached from an instance for teardown outside the lock
struct Resources {
    process: Option<DaemonProcess>,
    session: Option<Box<dyn ControlSession>>,
    owns_data_dir: bool,
}

/// One supervised Tor daemon
pub struct ProxyInstance {
    id: String,
    socks_port: u16,
    control_port: u16,
    data_dir: Option<PathBuf>,
    daemon: DaemonConfig,
    password: String,
    connector: Arc<dyn ControlConnector>,
    inner: Mutex<Inner>,
    /// Held while detached resources are torn down
    teardown_lock: Mutex<()>,
    /// Serializes identity rotations
    rotation_lock: Mutex<()>,
}

impl fmt::Debug for ProxyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyInstance")
            .field("id", &self.id)
            .field("socks_port", &self.socks_port)
            .field("control_port", &self.control_port)
            .field("data_dir", &self.data_dir())
            .finish_non_exhaustive()
    }
}

impl Default for ProxyInstance {
    fn default() -> Self {
        Self::new(default_instance_id(), DEFAULT_SOCKS_PORT, DEFAULT_CONTROL_PORT)
    }
}

impl ProxyInstance {
    /// Create an idle instance with default daemon and control settings
    pub fn new(id: impl Into<String>, socks_port: u16, control_port: u16) -> Self {
        ProxyInstance {
            id: id.into(),
            socks_port,
            control_port,
            data_dir: None,
            daemon: DaemonConfig::default(),
            password: String::new(),
            connector: Arc::new(TorControlConnector::default()),
            inner: Mutex::new(Inner {
                state: InstanceState::Idle,
                generation: 0,
                process: None,
                session: None,
                owns_data_dir: false,
            }),
            teardown_lock: Mutex::new(()),
            rotation_lock: Mutex::new(()),
        }
    }

    /// Use the given daemon settings
    pub fn with_daemon_config(mut self, daemon: DaemonConfig) -> Self {
        self.daemon = daemon;
        self
    }

    /// Use the given control settings with the Tor control client
    pub fn with_control_config(mut self, control: &ControlConfig) -> Self {
        self.password = control.password.clone();
        self.connector = Arc::new(TorControlConnector::from_config(control));
        self
    }

    /// Use a specific control connector
    pub fn with_connector(mut self, connector: Arc<dyn ControlConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Set the control password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Use an explicit data directory instead of `<data_root>/tor-<id>`
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Instance id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// SOCKS port
    pub fn socks_port(&self) -> u16 {
        self.socks_port
    }

    /// Control port
    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// Data directory owned by this instance
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir_for(&self.id))
    }

    /// Endpoint record for this instance
    pub fn info(&self) -> ProxyInfo {
        ProxyInfo::new(self.id.clone(), self.socks_port, self.control_port)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> InstanceState {
        self.inner.lock().await.state
    }

    /// Whether a daemon process is attached
    pub async fn has_process(&self) -> bool {
        self.inner.lock().await.process.is_some()
    }

    /// Whether a control session is attached
    pub async fn has_control_session(&self) -> bool {
        self.inner.lock().await.session.is_some()
    }

    /// Start the daemon and wait up to `timeout` for it to bootstrap
    ///
    /// On any failure the process is stopped and the data directory removed
    /// before the error is returned. A control channel that cannot be opened
    /// after bootstrap is logged and leaves the instance ready without
    /// rotation.
    pub async fn start(&self, timeout: Duration) -> Result<ProxyInfo> {
        let data_dir = self.data_dir();
        let executable = self.executable().await;

        let (generation, mut output, mut status) = {
            let mut inner = self.inner.lock().await;
            if !inner.state.can_start() {
                return Err(TorPoolError::InvalidState(format!(
                    "Tor {} cannot start while {}",
                    self.id, inner.state
                )));
            }
            inner.state = InstanceState::Starting;
            inner.generation += 1;
            inner.owns_data_dir = true;
            let generation = inner.generation;

            match self.spawn_daemon(&executable, &data_dir).await {
                Ok(SpawnedDaemon { process, output }) => {
                    let status = process.status_watcher();
                    inner.process = Some(process);
                    inner.state = InstanceState::AwaitingBootstrap;
                    (generation, output, status)
                }
                Err(e) => {
                    let (resources, guard) = self.begin_teardown(&mut inner).await;
                    drop(inner);
                    error!("Failed to start Tor {}: {}", self.id, e);
                    self.finish_teardown(resources, guard, InstanceState::Failed)
                        .await;
                    return Err(e);
                }
            }
        };

        debug!(
            "Tor {} waiting up to {:?} for bootstrap",
            self.id, timeout
        );

        if let Err(e) = wait_for_bootstrap(&mut output, &mut status, timeout).await {
            error!("Failed to start Tor {}: {}", self.id, e);
            self.abort_start(generation).await;
            return Err(e);
        }
        drop(output);

        info!("Tor {} bootstrapped on SOCKS port {}", self.id, self.socks_port);
        tokio::time::sleep(self.daemon.bootstrap_grace()).await;

        let session = match self.connector.connect(self.control_port, &self.password).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(
                    "Failed to connect control channel for Tor {}: {}; identity rotation unavailable",
                    self.id, e
                );
                None
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != InstanceState::AwaitingBootstrap {
            drop(inner);
            if let Some(session) = session {
                self.close_session(session).await;
            }
            return Err(TorPoolError::InvalidState(format!(
                "Tor {} was stopped while starting",
                self.id
            )));
        }
        inner.session = session;
        inner.state = InstanceState::Ready;

        Ok(self.info())
    }

    /// Ask the daemon for a new identity
    ///
    /// Returns `false` without a control session. A failed signal is retried
    /// once over a fresh session; the fresh session replaces the old one.
    /// The instance lock is not held during control I/O.
    pub async fn get_new_identity(&self) -> bool {
        let _rotation = self.rotation_lock.lock().await;

        let (generation, session) = {
            let mut inner = self.inner.lock().await;
            match inner.session.take() {
                Some(session) => (inner.generation, session),
                None => {
                    debug!("Tor {} has no control session, skipping rotation", self.id);
                    return false;
                }
            }
        };

        let (session, rotated) = self.rotate(session).await;
        self.reattach_session(generation, session).await;
        rotated
    }

    /// Stop the daemon and remove its data directory
    ///
    /// Safe from any state and concurrently with an in-flight start. Returns
    /// whether a process was attached at call time. A stop that finds another
    /// teardown in progress waits for it and returns `false`.
    pub async fn stop(&self) -> bool {
        let (resources, guard) = {
            let mut inner = self.inner.lock().await;
            if inner.state == InstanceState::Stopping {
                drop(inner);
                debug!("Tor {} is already stopping, waiting for teardown", self.id);
                self.wait_for_teardown().await;

                let mut inner = self.inner.lock().await;
                if inner.state == InstanceState::Failed {
                    inner.state = InstanceState::Idle;
                }
                return false;
            }
            self.begin_teardown(&mut inner).await
        };

        let was_running = resources.process.is_some();
        if was_running {
            info!("Stopping Tor {}", self.id);
        }
        self.finish_teardown(resources, guard, InstanceState::Idle)
            .await;
        was_running
    }

    /// Release every resource; same as [`stop`](Self::stop) without the result
    pub async fn cleanup(&self) {
        self.stop().await;
    }

    async fn executable(&self) -> PathBuf {
        if let Some(path) = &self.daemon.executable {
            return path.clone();
        }
        locate_executable().await.unwrap_or_else(|e| {
            warn!("{}", e);
            PathBuf::from(EXECUTABLE_NAME)
        })
    }

    async fn spawn_daemon(&self, executable: &Path, data_dir: &Path) -> Result<SpawnedDaemon> {
        tokio::fs::create_dir_all(data_dir).await?;

        info!(
            "Starting Tor {} ({}) on SOCKS port {}, control port {}",
            self.id,
            executable.display(),
            self.socks_port,
            self.control_port
        );

        let args = daemon_args(self.socks_port, self.control_port, data_dir);
        DaemonProcess::spawn(executable, &args, &self.id)
    }

    /// Signal NEWNYM, reconnecting once on failure
    ///
    /// Returns the session to keep: the fresh one if a reconnect succeeded,
    /// the old one otherwise.
    async fn rotate(&self, mut session: Box<dyn ControlSession>) -> (Box<dyn ControlSession>, bool) {
        match session.signal(SIGNAL_NEWNYM).await {
            Ok(()) => {
                debug!("Tor {} switched to a new identity", self.id);
                return (session, true);
            }
            Err(e) => {
                warn!("Failed to change identity for Tor {}: {}", self.id, e);
            }
        }

        let mut fresh = match self.connector.connect(self.control_port, &self.password).await {
            Ok(fresh) => fresh,
            Err(e) => {
                error!("Could not reconnect control channel for Tor {}: {}", self.id, e);
                return (session, false);
            }
        };

        match fresh.signal(SIGNAL_NEWNYM).await {
            Ok(()) => {
                info!("Tor {} switched to a new identity after reconnecting", self.id);
                (fresh, true)
            }
            Err(e) => {
                error!(
                    "Failed to change identity for Tor {} after reconnecting: {}",
                    self.id, e
                );
                (fresh, false)
            }
        }
    }

    /// Put a session back unless the instance was stopped or restarted meanwhile
    async fn reattach_session(&self, generation: u64, session: Box<dyn ControlSession>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation
                && inner.state == InstanceState::Ready
                && inner.session.is_none()
            {
                inner.session = Some(session);
                return;
            }
        }

        debug!("Tor {} stopped during rotation, closing its session", self.id);
        self.close_session(session).await;
    }

    async fn close_session(&self, mut session: Box<dyn ControlSession>) {
        if let Err(e) = session.quit().await {
            warn!("Failed to close control channel for Tor {}: {}", self.id, e);
        }
    }

    /// Tear down after a failed bootstrap unless a stop already does
    async fn abort_start(&self, generation: u64) {
        let (resources, guard) = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || !inner.state.is_starting() {
                let stopping = inner.state == InstanceState::Stopping;
                drop(inner);
                debug!("Tor {} was already torn down", self.id);
                if stopping {
                    self.wait_for_teardown().await;
                }
                return;
            }
            self.begin_teardown(&mut inner).await
        };
        self.finish_teardown(resources, guard, InstanceState::Failed)
            .await;
    }

    /// Enter `Stopping` and detach every resource
    ///
    /// The teardown lock is only held while the state is `Stopping`, which
    /// the caller has just ruled out, so acquiring it here never waits.
    async fn begin_teardown(&self, inner: &mut Inner) -> (Resources, MutexGuard<'_, ()>) {
        inner.state = InstanceState::Stopping;
        let guard = self.teardown_lock.lock().await;
        (inner.take_resources(), guard)
    }

    /// Release detached resources, then leave `Stopping` for `next`
    async fn finish_teardown(
        &self,
        resources: Resources,
        guard: MutexGuard<'_, ()>,
        next: InstanceState,
    ) {
        self.teardown(resources).await;

        let mut inner = self.inner.lock().await;
        if inner.state == InstanceState::Stopping {
            inner.state = next;
        }
        drop(guard);
    }

    async fn wait_for_teardown(&self) {
        let _guard = self.teardown_lock.lock().await;
    }

    /// Run each teardown step; failures are logged and never stop later steps
    async fn teardown(&self, resources: Resources) {
        let Resources {
            process,
            session,
            owns_data_dir,
        } = resources;

        if let Some(session) = session {
            self.close_session(session).await;
        }

        if let Some(process) = process {
            let status = process.shutdown(self.daemon.stop_grace(), &self.id).await;
            debug!("Tor {} process finished: {}", self.id, status);
        }

        if owns_data_dir {
            let data_dir = self.data_dir();
            match remove_dir_if_exists(&data_dir).await {
                Ok(true) => debug!("Removed data directory {}", data_dir.display()),
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Failed to remove data directory {} of Tor {}: {}",
                        data_dir.display(),
                        self.id,
                        e
                    );
                    self.inner.lock().await.owns_data_dir = true;
                }
            }
        }
    }
}
