//! Configuration types and sources for shepherd-dns.
//!
//! The cluster consumes configuration through the [`ConfigProvider`] trait.
//! [`FileConfigProvider`] is the standard implementation: a TOML file (with
//! `SHEPHERD_DNS__`-prefixed environment overrides) polled for modification
//! every five seconds; any change fires the registered
//! [`ConfigListener`]s, which the cluster uses to restart itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClusterError;

/// How often the configuration file is checked for updates.
const FILE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster topology and resources.
    pub cluster: ClusterConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Cluster-wide configuration: nodes and resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// When false, every node and resource is treated as disabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Display name for this cluster.
    pub display: String,

    /// Participating nodes.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Operated resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Configuration of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier.
    pub id: String,

    /// Whether this node participates.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Display name; must be unique across nodes.
    pub display: String,

    /// Hostname of the machine running this node; must be unique across
    /// nodes. Matched against the local hostname to identify the local node.
    pub hostname: String,

    /// Username the coordinator runs as on this node; matched against the
    /// process's username to identify the local node.
    pub username: String,

    /// Nameservers local to this node.
    #[serde(default)]
    pub nameservers: Vec<NameserverConfig>,
}

/// Configuration of one nameserver of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameserverConfig {
    /// Hostname of the nameserver.
    pub hostname: String,

    /// When true, master record TTLs must equal the configured TTL exactly;
    /// otherwise any TTL in `1..=configured` is accepted.
    #[serde(default)]
    pub strict_ttl: bool,
}

/// Configuration of one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Unique resource identifier.
    pub id: String,

    /// Whether this resource is operated.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Display name; must be unique across resources.
    pub display: String,

    /// Replication type (selects the synchronizer implementation, e.g.
    /// "rsync" or "csync2").
    #[serde(rename = "type")]
    pub rtype: String,

    /// DNS records advertising the current master.
    pub master_records: Vec<String>,

    /// Expected TTL of the master records, in seconds.
    #[serde(default = "default_master_records_ttl")]
    pub master_records_ttl: u32,

    /// Whether master records may resolve to multiple addresses.
    #[serde(default)]
    pub allow_multi_master: bool,

    /// Seconds before a synchronization run times out.
    #[serde(default = "default_synchronize_timeout")]
    pub synchronize_timeout: u64,

    /// Seconds before a test run times out.
    #[serde(default = "default_test_timeout")]
    pub test_timeout: u64,

    /// Cron expression (minute hour day-of-month month day-of-week) for
    /// synchronization runs.
    pub synchronize_schedule: String,

    /// Cron expression for test runs.
    pub test_schedule: String,

    /// Per-node record sets.
    pub nodes: Vec<ResourceNodeConfig>,
}

/// Configuration of one node's participation in a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNodeConfig {
    /// Id of the participating node.
    pub node_id: String,

    /// DNS records identifying this node for this resource. Must not overlap
    /// the resource's master records nor any other node's records.
    pub node_records: Vec<String>,

    /// Optional schedule override used when this node is the remote side.
    #[serde(default)]
    pub synchronize_schedule: Option<String>,

    /// Optional test schedule override used when this node is the remote side.
    #[serde(default)]
    pub test_schedule: Option<String>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "shepherd_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<std::net::SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_master_records_ttl() -> u32 {
    300
}

fn default_synchronize_timeout() -> u64 {
    3600
}

fn default_test_timeout() -> u64 {
    1200
}

/// Notified when the configuration source detects a change.
pub trait ConfigListener: Send + Sync {
    /// Called after the new configuration has been loaded.
    fn on_configuration_changed(&self);
}

/// A source of cluster configuration.
pub trait ConfigProvider: Send + Sync {
    /// Whether the cluster is enabled.
    fn is_enabled(&self) -> Result<bool, ClusterError>;

    /// Cluster display name.
    fn display(&self) -> Result<String, ClusterError>;

    /// Node configurations.
    fn node_configs(&self) -> Result<Vec<NodeConfig>, ClusterError>;

    /// Resource configurations.
    fn resource_configs(&self) -> Result<Vec<ResourceConfig>, ClusterError>;

    /// Starts the provider (loads the initial configuration, begins change
    /// detection). Must be called from within a tokio runtime.
    fn start(self: Arc<Self>) -> Result<(), ClusterError>;

    /// Stops change detection.
    fn stop(&self);

    /// Registers a change listener.
    fn add_listener(&self, listener: Arc<dyn ConfigListener>);

    /// Removes a previously registered change listener.
    fn remove_listener(&self, listener: &Arc<dyn ConfigListener>);
}

struct FileProviderInner {
    current: Option<ClusterConfig>,
    last_modified: Option<SystemTime>,
    watcher: Option<(CancellationToken, JoinHandle<()>)>,
}

/// Configuration provider backed by a TOML file with environment overrides.
pub struct FileConfigProvider {
    path: PathBuf,
    env_prefix: String,
    inner: Mutex<FileProviderInner>,
    listeners: Mutex<Vec<Arc<dyn ConfigListener>>>,
}

impl FileConfigProvider {
    /// Creates a provider for the given file, using the default
    /// `SHEPHERD_DNS` environment prefix.
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Self::with_env_prefix(path, "SHEPHERD_DNS")
    }

    /// Creates a provider with a custom environment-variable prefix.
    pub fn with_env_prefix(path: impl Into<PathBuf>, env_prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            env_prefix: env_prefix.to_string(),
            inner: Mutex::new(FileProviderInner {
                current: None,
                last_modified: None,
                watcher: None,
            }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn load(&self) -> Result<ClusterConfig, ClusterError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from(self.path.clone()))
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config.cluster)
    }

    fn snapshot(&self) -> Result<ClusterConfig, ClusterError> {
        if let Some(current) = self.inner.lock().current.clone() {
            return Ok(current);
        }
        // Not started; load on demand without caching.
        self.load()
    }

    fn modified_time(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn notify_listeners(&self) {
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_configuration_changed();
        }
    }

    fn watch_loop(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(path = %self.path.display(), "configuration watcher stopping");
                        return;
                    }
                    _ = tokio::time::sleep(FILE_CHECK_INTERVAL) => {}
                }

                let modified = self.modified_time();
                let changed = {
                    let inner = self.inner.lock();
                    inner.watcher.is_some() && modified != inner.last_modified
                };
                if !changed {
                    continue;
                }

                match self.load() {
                    Ok(new_config) => {
                        {
                            let mut inner = self.inner.lock();
                            if inner.watcher.is_none() {
                                return;
                            }
                            inner.last_modified = modified;
                            inner.current = Some(new_config);
                        }
                        info!(path = %self.path.display(), "configuration file changed, reloading");
                        self.notify_listeners();
                    }
                    Err(e) => {
                        // Keep the previous configuration; remember the mtime
                        // so a broken file is not re-parsed every pass.
                        self.inner.lock().last_modified = modified;
                        warn!(path = %self.path.display(), error = %e,
                            "failed to reload configuration, keeping previous");
                    }
                }
            }
        })
    }
}

impl ConfigProvider for FileConfigProvider {
    fn is_enabled(&self) -> Result<bool, ClusterError> {
        Ok(self.snapshot()?.enabled)
    }

    fn display(&self) -> Result<String, ClusterError> {
        Ok(self.snapshot()?.display)
    }

    fn node_configs(&self) -> Result<Vec<NodeConfig>, ClusterError> {
        Ok(self.snapshot()?.nodes)
    }

    fn resource_configs(&self) -> Result<Vec<ResourceConfig>, ClusterError> {
        Ok(self.snapshot()?.resources)
    }

    fn start(self: Arc<Self>) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock();
        if inner.watcher.is_some() {
            return Ok(());
        }
        inner.current = Some(self.load()?);
        inner.last_modified = self.modified_time();

        let token = CancellationToken::new();
        let handle = Arc::clone(&self).watch_loop(token.clone());
        inner.watcher = Some((token, handle));
        Ok(())
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some((token, _)) = inner.watcher.take() {
            token.cancel();
        }
        inner.current = None;
        inner.last_modified = None;
    }

    fn add_listener(&self, listener: Arc<dyn ConfigListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn remove_listener(&self, listener: &Arc<dyn ConfigListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }
}

/// Configuration provider holding a fixed in-memory configuration. Changes
/// are never detected; useful for embedding and tests.
pub struct MemoryConfigProvider {
    config: Mutex<ClusterConfig>,
    listeners: Mutex<Vec<Arc<dyn ConfigListener>>>,
}

impl MemoryConfigProvider {
    /// Wraps a fixed configuration.
    pub fn new(config: ClusterConfig) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Replaces the configuration and fires the registered listeners, as a
    /// file change would.
    pub fn replace(&self, config: ClusterConfig) {
        *self.config.lock() = config;
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_configuration_changed();
        }
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn is_enabled(&self) -> Result<bool, ClusterError> {
        Ok(self.config.lock().enabled)
    }

    fn display(&self) -> Result<String, ClusterError> {
        Ok(self.config.lock().display.clone())
    }

    fn node_configs(&self) -> Result<Vec<NodeConfig>, ClusterError> {
        Ok(self.config.lock().nodes.clone())
    }

    fn resource_configs(&self) -> Result<Vec<ResourceConfig>, ClusterError> {
        Ok(self.config.lock().resources.clone())
    }

    fn start(self: Arc<Self>) -> Result<(), ClusterError> {
        Ok(())
    }

    fn stop(&self) {}

    fn add_listener(&self, listener: Arc<dyn ConfigListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn remove_listener(&self, listener: &Arc<dyn ConfigListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [cluster]
        display = "Test Cluster"

        [[cluster.nodes]]
        id = "alpha"
        display = "Alpha"
        hostname = "alpha.example.com"
        username = "appsync"

        [[cluster.nodes.nameservers]]
        hostname = "ns1.example.com"
        strict_ttl = true

        [[cluster.resources]]
        id = "web"
        display = "Web content"
        type = "rsync"
        master_records = ["www.example.com"]
        synchronize_schedule = "11 */4 * * *"
        test_schedule = "41 1 * * *"

        [[cluster.resources.nodes]]
        node_id = "alpha"
        node_records = ["www-alpha.example.com"]
    "#;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_parse_sample_config() {
        let config = parse(SAMPLE);
        assert!(config.cluster.enabled);
        assert_eq!(config.cluster.display, "Test Cluster");
        assert_eq!(config.cluster.nodes.len(), 1);
        assert!(config.cluster.nodes[0].nameservers[0].strict_ttl);
        let resource = &config.cluster.resources[0];
        assert_eq!(resource.rtype, "rsync");
        assert_eq!(resource.master_records_ttl, 300);
        assert_eq!(resource.synchronize_timeout, 3600);
        assert_eq!(resource.test_timeout, 1200);
        assert!(!resource.allow_multi_master);
    }

    #[test]
    fn test_defaults_for_telemetry() {
        let config = parse(SAMPLE);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.telemetry.prometheus_addr.is_none());
    }

    #[test]
    fn test_schedule_override_fields() {
        let toml = SAMPLE.replace(
            "node_records = [\"www-alpha.example.com\"]",
            "node_records = [\"www-alpha.example.com\"]\nsynchronize_schedule = \"0 2 * * *\"",
        );
        let config = parse(&toml);
        let rn = &config.cluster.resources[0].nodes[0];
        assert_eq!(rn.synchronize_schedule.as_deref(), Some("0 2 * * *"));
        assert!(rn.test_schedule.is_none());
    }
}
