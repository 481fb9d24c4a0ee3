//! Fixed-size pool of proxy instances
//!
//! Instance `i` (0-based) gets id `i + 1`, SOCKS port `start_port + 2i` and
//! control port `start_port + 2i + 1`.

use crate::config::{Config, ControlConfig, DaemonConfig, PoolConfig};
use crate::control::{ControlConnector, TorControlConnector};
use crate::error::{Result, TorPoolError};
use crate::instance::{ProxyInfo, ProxyInstance};
use futures::future;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// A pool of homogeneous Tor daemons managed as a unit
pub struct ProxyPool {
    config: PoolConfig,
    daemon: DaemonConfig,
    password: String,
    connector: Arc<dyn ControlConnector>,
    proxies: RwLock<BTreeMap<u32, Arc<ProxyInstance>>>,
}

impl fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPool")
            .field("size", &self.config.size)
            .field("start_port", &self.config.start_port)
            .finish_non_exhaustive()
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::from_pool_config(PoolConfig::default())
    }
}

impl ProxyPool {
    /// Create an empty pool of `size` instances starting at `start_port`
    pub fn new(size: usize, start_port: u16) -> Self {
        Self::from_pool_config(PoolConfig::new(size, start_port))
    }

    /// Create an empty pool from the full configuration
    pub fn from_config(config: &Config) -> Self {
        Self::from_pool_config(config.pool.clone())
            .with_daemon_config(config.daemon.clone())
            .with_control_config(&config.control)
    }

    fn from_pool_config(config: PoolConfig) -> Self {
        ProxyPool {
            config,
            daemon: DaemonConfig::default(),
            password: String::new(),
            connector: Arc::new(TorControlConnector::default()),
            proxies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Daemon settings applied to every instance
    pub fn with_daemon_config(mut self, daemon: DaemonConfig) -> Self {
        self.daemon = daemon;
        self
    }

    /// Control settings applied to every instance
    pub fn with_control_config(mut self, control: &ControlConfig) -> Self {
        self.password = control.password.clone();
        self.connector = Arc::new(TorControlConnector::from_config(control));
        self
    }

    /// Control connector shared by every instance
    pub fn with_connector(mut self, connector: Arc<dyn ControlConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Target number of instances
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// First SOCKS port
    pub fn start_port(&self) -> u16 {
        self.config.start_port
    }

    /// Number of instances currently in the pool
    pub async fn len(&self) -> usize {
        self.proxies.read().await.len()
    }

    /// Whether the pool currently holds no instances
    pub async fn is_empty(&self) -> bool {
        self.proxies.read().await.is_empty()
    }

    /// Create and start every instance
    ///
    /// Instances are registered before they start and are started
    /// concurrently. The first failure stops every member, which aborts the
    /// starts still waiting for bootstrap. Every start runs to completion,
    /// including its own teardown, before the pool is cleaned up and the
    /// first error is returned.
    pub async fn initialize(&self) -> Result<Vec<ProxyInfo>> {
        self.config.validate().map_err(TorPoolError::Config)?;

        let instances = {
            let mut proxies = self.proxies.write().await;
            if !proxies.is_empty() {
                return Err(TorPoolError::Pool(format!(
                    "pool already holds {} instances; call cleanup first",
                    proxies.len()
                )));
            }

            let mut instances = Vec::with_capacity(self.config.size);
            for index in 0..self.config.size {
                let instance = Arc::new(self.build_instance(index)?);
                let id = index as u32 + 1;
                proxies.insert(id, Arc::clone(&instance));
                instances.push(instance);
            }
            instances
        };

        info!(
            "Starting {} Tor instances from port {}",
            instances.len(),
            self.config.start_port
        );

        let timeout = self.daemon.startup_timeout();
        let members = &instances;
        let results = future::join_all(members.iter().map(|instance| async move {
            let result = instance.start(timeout).await;
            if result.is_err() {
                // Abort siblings still waiting for bootstrap
                future::join_all(members.iter().map(|member| member.stop())).await;
            }
            result
        }))
        .await;

        let mut infos = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(info) => infos.push(info),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        debug!("Additional start failure: {}", e);
                    }
                }
            }
        }

        match first_error {
            None => {
                info!("Pool ready with {} instances", infos.len());
                Ok(infos)
            }
            Some(e) => {
                error!("Pool initialization failed: {}", e);
                self.cleanup().await;
                Err(e)
            }
        }
    }

    /// Look up an instance by id
    pub async fn get_proxy(&self, id: u32) -> Option<Arc<ProxyInstance>> {
        self.proxies.read().await.get(&id).cloned()
    }

    /// Snapshot of every instance in id order
    pub async fn proxies(&self) -> Vec<Arc<ProxyInstance>> {
        self.proxies.read().await.values().cloned().collect()
    }

    /// Endpoint records of every instance in id order
    pub async fn infos(&self) -> Vec<ProxyInfo> {
        self.proxies
            .read()
            .await
            .values()
            .map(|instance| instance.info())
            .collect()
    }

    /// Rotate the identity of every instance concurrently
    ///
    /// Returns one flag per instance, in id order.
    pub async fn rotate_identities(&self) -> Vec<bool> {
        let instances = self.proxies().await;
        let results =
            future::join_all(instances.iter().map(|instance| instance.get_new_identity())).await;

        let rotated = results.iter().filter(|ok| **ok).count();
        info!("Rotated {}/{} identities", rotated, results.len());
        results
    }

    /// Stop every instance concurrently, then empty the pool
    pub async fn cleanup(&self) {
        let instances = self.proxies().await;
        let results = future::join_all(instances.iter().map(|instance| instance.stop())).await;

        self.proxies.write().await.clear();

        let stopped = results.iter().filter(|running| **running).count();
        info!("Pool cleaned up, {} running instances stopped", stopped);
    }

    fn build_instance(&self, index: usize) -> Result<ProxyInstance> {
        let (socks_port, control_port) = self.config.ports_for(index).ok_or_else(|| {
            TorPoolError::Config(format!(
                "no port pair available for instance {} from {}",
                index + 1,
                self.config.start_port
            ))
        })?;

        Ok(
            ProxyInstance::new((index + 1).to_string(), socks_port, control_port)
                .with_daemon_config(self.daemon.clone())
                .with_password(self.password.clone())
                .with_connector(Arc::clone(&self.connector)),
        )
    }
}
