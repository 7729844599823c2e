//! Cluster lifecycle orchestration.
//!
//! The [`Cluster`] owns the full runtime: it identifies the local node,
//! validates and materializes the configured topology, starts one DNS
//! monitor per resource and one synchronizer scheduler per (local, remote)
//! pair, and tears everything down in reverse on stop. A configuration
//! change detected by the provider restarts the whole runtime under the
//! started lock.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hickory_resolver::Name;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::{ConfigListener, ConfigProvider, NodeConfig, ResourceConfig};
use crate::error::ClusterError;
use crate::listener::{Notifier, ResourceListener};
use crate::lookup::{RecordSource, ResolverPool};
use crate::metrics;
use crate::monitor::ResourceDnsMonitor;
use crate::results::lookup_for;
use crate::status::ResourceStatus;
use crate::sync::{CronSynchronizer, SynchronizerRegistry};
use crate::topology::{parse_name, Nameserver, Node, Resource};

/// The running pieces of one resource: its monitor and its schedulers.
pub struct ResourceRuntime {
    resource: Arc<Resource>,
    monitor: Arc<ResourceDnsMonitor>,
    synchronizers: Vec<Arc<CronSynchronizer>>,
}

impl ResourceRuntime {
    /// The resource itself.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// The resource's DNS monitor.
    pub fn monitor(&self) -> &Arc<ResourceDnsMonitor> {
        &self.monitor
    }

    /// The schedulers towards each remote node. Empty when the local node
    /// does not participate in the resource or no factory covers its type.
    pub fn synchronizers(&self) -> &[Arc<CronSynchronizer>] {
        &self.synchronizers
    }

    /// Status rollup for this resource at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> ResourceStatus {
        let mut status = ResourceStatus::Unknown;
        if !self.resource.is_enabled() {
            status = status.max(ResourceStatus::Disabled);
        }
        status = status.max(self.monitor.last_result().resource_status(now));
        for synchronizer in &self.synchronizers {
            status = status.max(synchronizer.state().resource_status());
            status = status.max(synchronizer.result_status());
        }
        status
    }
}

struct ClusterInner {
    started: bool,
    started_time: Option<DateTime<Utc>>,
    enabled: bool,
    display: Option<String>,
    nodes: Vec<Arc<Node>>,
    local_hostname: Option<Name>,
    local_username: Option<String>,
    local_node: Option<Arc<Node>>,
    runtimes: Vec<Arc<ResourceRuntime>>,
    notifier: Option<Arc<Notifier>>,
}

/// The cluster coordinator.
pub struct Cluster {
    provider: Arc<dyn ConfigProvider>,
    registry: SynchronizerRegistry,
    record_source: Mutex<Option<Arc<dyn RecordSource>>>,
    local_identity: Mutex<Option<(String, String)>>,
    listeners: Mutex<Vec<Arc<dyn ResourceListener>>>,
    reload_listener: Mutex<Option<Arc<dyn ConfigListener>>>,
    inner: Mutex<ClusterInner>,
}

/// The canonical host name of this machine: the OS hostname resolved to an
/// address, then reverse-resolved to its canonical DNS name. Node configs
/// carry fully qualified hostnames, and the bare OS hostname is often a
/// short name, so the comparison against [`Node::hostname`] must use the
/// canonical form. Falls back to the raw OS hostname when either lookup
/// fails (no address, no PTR record).
fn canonical_local_hostname() -> String {
    let raw = gethostname::gethostname().to_string_lossy().to_string();
    let addresses = dns_lookup::lookup_host(&raw).unwrap_or_default();
    addresses
        .iter()
        .find(|address| !address.is_loopback())
        .or_else(|| addresses.first())
        .and_then(|address| dns_lookup::lookup_addr(address).ok())
        .unwrap_or(raw)
}

struct ReloadListener(Weak<Cluster>);

impl ConfigListener for ReloadListener {
    fn on_configuration_changed(&self) {
        if let Some(cluster) = self.0.upgrade() {
            cluster.reload();
        }
    }
}

impl Cluster {
    /// Creates a cluster around a configuration provider and a registry of
    /// synchronizer factories. The cluster is not started until
    /// [`Cluster::start`] is called.
    pub fn new(provider: Arc<dyn ConfigProvider>, registry: SynchronizerRegistry) -> Arc<Self> {
        Arc::new(Self {
            provider,
            registry,
            record_source: Mutex::new(None),
            local_identity: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            reload_listener: Mutex::new(None),
            inner: Mutex::new(ClusterInner {
                started: false,
                started_time: None,
                enabled: false,
                display: None,
                nodes: Vec::new(),
                local_hostname: None,
                local_username: None,
                local_node: None,
                runtimes: Vec::new(),
                notifier: None,
            }),
        })
    }

    /// Replaces the DNS record source used by monitors. Intended for tests
    /// and embedders; the default is a fresh [`ResolverPool`] per start.
    pub fn set_record_source(&self, source: Arc<dyn RecordSource>) {
        *self.record_source.lock() = Some(source);
    }

    /// Overrides the (hostname, username) pair used to identify the local
    /// node. Intended for tests and embedders; the default is this machine's
    /// canonical host name and the process's username.
    pub fn set_local_identity(&self, hostname: impl Into<String>, username: impl Into<String>) {
        *self.local_identity.lock() = Some((hostname.into(), username.into()));
    }

    /// Registers a listener for DNS and synchronization results.
    pub fn add_resource_listener(&self, listener: Arc<dyn ResourceListener>) {
        self.listeners.lock().push(listener.clone());
        if let Some(notifier) = &self.inner.lock().notifier {
            notifier.add_listener(listener);
        }
    }

    /// Removes a previously registered listener.
    pub fn remove_resource_listener(&self, listener: &Arc<dyn ResourceListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
        if let Some(notifier) = &self.inner.lock().notifier {
            notifier.remove_listener(listener);
        }
    }

    /// Whether the cluster is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().started
    }

    /// Whether the cluster is enabled; a stopped cluster counts as disabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// When the cluster was started, or `None` if not running.
    pub fn started_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().started_time
    }

    /// Display name, or `None` if not started.
    pub fn display(&self) -> Option<String> {
        self.inner.lock().display.clone()
    }

    /// All nodes, or empty if not started.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.lock().nodes.clone()
    }

    /// A node by id.
    pub fn node(&self, id: &str) -> Option<Arc<Node>> {
        self.inner.lock().nodes.iter().find(|n| n.id() == id).cloned()
    }

    /// The hostname used for local-node identification, once started.
    pub fn local_hostname(&self) -> Option<Name> {
        self.inner.lock().local_hostname.clone()
    }

    /// The username used for local-node identification, once started.
    pub fn local_username(&self) -> Option<String> {
        self.inner.lock().local_username.clone()
    }

    /// The node this process represents, or `None` when this machine is not
    /// one of the configured nodes (observer mode).
    pub fn local_node(&self) -> Option<Arc<Node>> {
        self.inner.lock().local_node.clone()
    }

    /// The running resources, or empty if not started.
    pub fn resources(&self) -> Vec<Arc<ResourceRuntime>> {
        self.inner.lock().runtimes.clone()
    }

    /// Starts the cluster: starts the configuration provider, registers for
    /// reloads, and brings up the whole topology.
    pub fn start(self: &Arc<Self>) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock();
        if inner.started {
            return Ok(());
        }
        Arc::clone(&self.provider).start()?;
        info!(display = %self.provider.display().unwrap_or_default(), "starting cluster");

        let reload: Arc<dyn ConfigListener> = Arc::new(ReloadListener(Arc::downgrade(self)));
        self.provider.add_listener(reload.clone());
        *self.reload_listener.lock() = Some(reload);

        inner.started = true;
        inner.started_time = Some(Utc::now());
        self.start_up(&mut inner)
    }

    /// Stops the cluster and the configuration provider.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.started {
            return;
        }
        info!(display = inner.display.as_deref().unwrap_or(""), "stopping cluster");
        self.shutdown(&mut inner);
        inner.started = false;
        inner.started_time = None;
        if let Some(reload) = self.reload_listener.lock().take() {
            self.provider.remove_listener(&reload);
        }
        self.provider.stop();
    }

    /// Restarts the runtime after a configuration change.
    fn reload(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if !inner.started {
            return;
        }
        info!("configuration changed, restarting cluster");
        self.shutdown(&mut inner);
        if let Err(e) = self.start_up(&mut inner) {
            error!(error = %e, "failed to restart cluster after configuration change");
        }
    }

    fn start_up(self: &Arc<Self>, inner: &mut ClusterInner) -> Result<(), ClusterError> {
        // Identify this machine.
        let (hostname, username) = match self.local_identity.lock().clone() {
            Some((hostname, username)) => (hostname, Some(username)),
            None => (
                canonical_local_hostname(),
                std::env::var("USER")
                    .or_else(|_| std::env::var("USERNAME"))
                    .ok(),
            ),
        };
        inner.local_hostname = parse_name(&hostname).ok();
        inner.local_username = username;

        let enabled = self.provider.is_enabled()?;
        let display = self.provider.display()?;
        let node_configs = self.provider.node_configs()?;
        let resource_configs = self.provider.resource_configs()?;

        check_configuration(&node_configs, &resource_configs)?;

        let mut nodes = Vec::with_capacity(node_configs.len());
        for config in &node_configs {
            nodes.push(Arc::new(Node::from_config(enabled, config)?));
        }

        let local_node = nodes
            .iter()
            .find(|node| {
                Some(node.hostname()) == inner.local_hostname.as_ref()
                    && Some(node.username()) == inner.local_username.as_deref()
            })
            .cloned();
        match &local_node {
            Some(node) => info!(node = node.id(), hostname = %hostname, "identified local node"),
            None => info!(
                hostname = %hostname,
                "this machine is not a cluster node, monitoring only"
            ),
        }

        let notifier = match &inner.notifier {
            Some(notifier) => notifier.clone(),
            None => {
                let notifier = Notifier::new();
                for listener in self.listeners.lock().iter() {
                    notifier.add_listener(listener.clone());
                }
                inner.notifier = Some(notifier.clone());
                notifier
            }
        };

        let source: Arc<dyn RecordSource> = self
            .record_source
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::new(ResolverPool::new()));

        let mut runtimes = Vec::with_capacity(resource_configs.len());
        let mut synchronizer_count = 0;
        for config in &resource_configs {
            let resource = Resource::from_config(enabled, config, |id| {
                nodes.iter().find(|n| n.id() == id).cloned()
            })?;
            let monitor =
                ResourceDnsMonitor::new(resource.clone(), enabled, source.clone(), notifier.clone());

            let mut synchronizers = Vec::new();
            if let Some(local_node) = &local_node {
                let local_rn = resource
                    .resource_nodes()
                    .iter()
                    .find(|rn| rn.node() == local_node)
                    .cloned();
                if let (Some(local_rn), Some(factory)) =
                    (local_rn, self.registry.get(resource.rtype()))
                {
                    for remote_rn in resource.resource_nodes() {
                        if remote_rn.node() == local_node {
                            continue;
                        }
                        if let Some(protocol) =
                            factory.new_synchronizer(&local_rn, remote_rn, config)
                        {
                            synchronizers.push(CronSynchronizer::new(
                                resource.clone(),
                                local_rn.clone(),
                                remote_rn.clone(),
                                monitor.clone(),
                                protocol,
                                notifier.clone(),
                                enabled,
                            ));
                        }
                    }
                }
            }
            synchronizer_count += synchronizers.len();

            monitor.start();
            for synchronizer in &synchronizers {
                synchronizer.start();
            }
            runtimes.push(Arc::new(ResourceRuntime {
                resource,
                monitor,
                synchronizers,
            }));
        }

        metrics::record_topology(nodes.len(), runtimes.len(), synchronizer_count);
        inner.enabled = enabled;
        inner.display = Some(display);
        inner.nodes = nodes;
        inner.local_node = local_node;
        inner.runtimes = runtimes;
        Ok(())
    }

    fn shutdown(&self, inner: &mut ClusterInner) {
        for runtime in &inner.runtimes {
            for synchronizer in &runtime.synchronizers {
                synchronizer.stop();
            }
            runtime.monitor.stop();
        }
        inner.runtimes.clear();
        inner.nodes.clear();
        inner.local_node = None;
        inner.local_hostname = None;
        inner.local_username = None;
        inner.enabled = false;
        inner.display = None;
    }

    /// Overall cluster status at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> ResourceStatus {
        let inner = self.inner.lock();
        let mut status = ResourceStatus::Unknown;
        if !inner.started {
            status = status.max(ResourceStatus::Stopped);
        }
        if !inner.enabled {
            status = status.max(ResourceStatus::Disabled);
        }
        for runtime in &inner.runtimes {
            status = status.max(runtime.status(now));
        }
        status
    }

    /// Status rollup of one node across all resources it participates in.
    pub fn node_status(&self, node: &Arc<Node>) -> ResourceStatus {
        let inner = self.inner.lock();
        let mut status = ResourceStatus::Unknown;
        if !node.is_enabled() {
            status = status.max(ResourceStatus::Disabled);
        }
        for runtime in &inner.runtimes {
            let result = runtime.monitor.last_result();
            if let Some(node_result) = result.node_result(node) {
                status = status.max(node_result.node_status().resource_status());
                if let Some(lookups) = node_result.node_record_lookups() {
                    for (_, per_ns) in lookups {
                        for (_, lookup) in per_ns {
                            status = status.max(lookup.status().resource_status());
                        }
                    }
                }
            }
            for synchronizer in &runtime.synchronizers {
                if synchronizer.remote_resource_node().node() == node {
                    status = status.max(synchronizer.result_status());
                }
            }
        }
        status
    }

    /// Status rollup of one nameserver across every lookup that used it.
    pub fn nameserver_status(&self, nameserver: &Nameserver) -> ResourceStatus {
        let inner = self.inner.lock();
        let mut status = ResourceStatus::Unknown;
        for runtime in &inner.runtimes {
            let result = runtime.monitor.last_result();
            if let Some(lookups) = result.master_record_lookups() {
                for (_, per_ns) in lookups {
                    if let Some(lookup) = lookup_for(per_ns, nameserver) {
                        status = status.max(lookup.status().resource_status());
                    }
                }
            }
            for node_result in result.node_results() {
                if let Some(lookups) = node_result.node_record_lookups() {
                    for (_, per_ns) in lookups {
                        if let Some(lookup) = lookup_for(per_ns, nameserver) {
                            status = status.max(lookup.status().resource_status());
                        }
                    }
                }
            }
        }
        status
    }
}

/// Validates a configuration before the cluster is built from it:
/// node displays and hostnames unique, resource displays unique, node
/// records disjoint from master records and from each other.
pub fn check_configuration(
    node_configs: &[NodeConfig],
    resource_configs: &[ResourceConfig],
) -> Result<(), ClusterError> {
    let mut displays = HashSet::new();
    for node in node_configs {
        if !displays.insert(node.display.as_str()) {
            return Err(ClusterError::config(format!(
                "duplicate node display: {}",
                node.display
            )));
        }
    }

    let mut hostnames = HashSet::new();
    for node in node_configs {
        let hostname = parse_name(&node.hostname)?;
        if !hostnames.insert(hostname.clone()) {
            return Err(ClusterError::config(format!(
                "duplicate node hostname: {hostname}"
            )));
        }
    }

    let mut resource_displays = HashSet::new();
    for resource in resource_configs {
        if !resource_displays.insert(resource.display.as_str()) {
            return Err(ClusterError::config(format!(
                "duplicate resource display: {}",
                resource.display
            )));
        }
    }

    for resource in resource_configs {
        let mut master_records = HashSet::new();
        for record in &resource.master_records {
            master_records.insert(parse_name(record)?);
        }
        let mut seen_node_records: HashSet<Name> = HashSet::new();
        for rn in &resource.nodes {
            for record in &rn.node_records {
                let name = parse_name(record)?;
                if master_records.contains(&name) {
                    return Err(ClusterError::config(format!(
                        "resource {}: node record {name} duplicates a master record",
                        resource.id
                    )));
                }
                if !seen_node_records.insert(name.clone()) {
                    return Err(ClusterError::config(format!(
                        "resource {}: node record {name} used by more than one node",
                        resource.id
                    )));
                }
            }
        }
    }

    Ok(())
}
