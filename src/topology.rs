//! Runtime cluster topology built from configuration.
//!
//! Nodes, nameservers, resources and resource-nodes are immutable after
//! construction; the cluster rebuilds the whole topology on configuration
//! reload rather than mutating it in place.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cron::Schedule;
use hickory_resolver::Name;

use crate::config::{NodeConfig, ResourceConfig};
use crate::error::ClusterError;

/// A nameserver queried by one or more nodes.
///
/// Identity (equality and hashing) is by hostname only; `strict_ttl` is a
/// per-nameserver policy knob, not part of the identity.
#[derive(Debug, Clone)]
pub struct Nameserver {
    hostname: Name,
    strict_ttl: bool,
}

impl Nameserver {
    /// Creates a nameserver entry.
    pub fn new(hostname: Name, strict_ttl: bool) -> Self {
        Self { hostname, strict_ttl }
    }

    /// Hostname of the nameserver.
    pub fn hostname(&self) -> &Name {
        &self.hostname
    }

    /// When set, A records for master records must carry exactly the
    /// configured TTL; otherwise any TTL in `1..=configured` is accepted.
    pub fn strict_ttl(&self) -> bool {
        self.strict_ttl
    }
}

impl PartialEq for Nameserver {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname
    }
}

impl Eq for Nameserver {}

impl std::hash::Hash for Nameserver {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
    }
}

impl fmt::Display for Nameserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hostname)
    }
}

/// One node within the cluster.
#[derive(Debug)]
pub struct Node {
    id: String,
    enabled: bool,
    display: String,
    hostname: Name,
    username: String,
    nameservers: Vec<Nameserver>,
}

impl Node {
    /// Builds a node from its configuration. `cluster_enabled` is ANDed in:
    /// a disabled cluster disables every node.
    pub fn from_config(cluster_enabled: bool, config: &NodeConfig) -> Result<Self, ClusterError> {
        let hostname = parse_name(&config.hostname)?;
        let mut nameservers = Vec::with_capacity(config.nameservers.len());
        for ns in &config.nameservers {
            let nameserver = Nameserver::new(parse_name(&ns.hostname)?, ns.strict_ttl);
            if !nameservers.contains(&nameserver) {
                nameservers.push(nameserver);
            }
        }
        Ok(Self {
            id: config.id.clone(),
            enabled: cluster_enabled && config.enabled,
            display: config.display.clone(),
            hostname,
            username: config.username.clone(),
            nameservers,
        })
    }

    /// Unique identifier of this node.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether both the cluster and this node are enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Display name of this node.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Hostname of the machine that runs this node.
    pub fn hostname(&self) -> &Name {
        &self.hostname
    }

    /// Username the coordinator must run as on that machine. This must match
    /// the process's username for the node to be considered local.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Nameservers local to this node, in configuration order.
    pub fn nameservers(&self) -> &[Nameserver] {
        &self.nameservers
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// The per-resource settings of one node: which DNS records identify it.
#[derive(Debug)]
pub struct ResourceNode {
    node: Arc<Node>,
    node_records: Vec<Name>,
}

impl ResourceNode {
    /// Creates a resource-node binding.
    pub fn new(node: Arc<Node>, node_records: Vec<Name>) -> Self {
        Self { node, node_records }
    }

    /// The node this binding refers to.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// The DNS records that must all resolve to this node's address. A node
    /// is master when these addresses are covered by the master records.
    pub fn node_records(&self) -> &[Name] {
        &self.node_records
    }
}

impl PartialEq for ResourceNode {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.node_records == other.node_records
    }
}

impl Eq for ResourceNode {}

impl fmt::Display for ResourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node)
    }
}

/// Cron-driven synchronization settings of a resource.
#[derive(Debug, Clone)]
pub struct CronSettings {
    synchronize_timeout: Duration,
    test_timeout: Duration,
    synchronize_schedule: Schedule,
    test_schedule: Schedule,
    /// Per-remote-node schedule overrides, keyed by node id.
    overrides: Vec<(String, Option<Schedule>, Option<Schedule>)>,
}

impl CronSettings {
    /// Timeout for one synchronization run.
    pub fn synchronize_timeout(&self) -> Duration {
        self.synchronize_timeout
    }

    /// Timeout for one test run.
    pub fn test_timeout(&self) -> Duration {
        self.test_timeout
    }

    /// Synchronization schedule towards the given remote node.
    pub fn synchronize_schedule(&self, remote_node_id: &str) -> &Schedule {
        self.overrides
            .iter()
            .find(|(id, _, _)| id == remote_node_id)
            .and_then(|(_, sync, _)| sync.as_ref())
            .unwrap_or(&self.synchronize_schedule)
    }

    /// Test schedule towards the given remote node.
    pub fn test_schedule(&self, remote_node_id: &str) -> &Schedule {
        self.overrides
            .iter()
            .find(|(id, _, _)| id == remote_node_id)
            .and_then(|(_, _, test)| test.as_ref())
            .unwrap_or(&self.test_schedule)
    }
}

/// One resource operated by the cluster: a set of master records, an
/// expected TTL, and the participating nodes.
#[derive(Debug)]
pub struct Resource {
    id: String,
    enabled: bool,
    display: String,
    rtype: String,
    master_records: Vec<Name>,
    master_records_ttl: u32,
    allow_multi_master: bool,
    resource_nodes: Vec<Arc<ResourceNode>>,
    enabled_nameservers: Vec<Nameserver>,
    cron: CronSettings,
}

impl Resource {
    /// Builds a resource from its configuration and the already-built nodes.
    /// `resolve_node` maps a node id to the node, or `None` if unknown.
    pub fn from_config(
        cluster_enabled: bool,
        config: &ResourceConfig,
        resolve_node: impl Fn(&str) -> Option<Arc<Node>>,
    ) -> Result<Arc<Self>, ClusterError> {
        let mut master_records = Vec::with_capacity(config.master_records.len());
        for record in &config.master_records {
            let name = parse_name(record)?;
            if !master_records.contains(&name) {
                master_records.push(name);
            }
        }
        if master_records.is_empty() {
            return Err(ClusterError::config(format!(
                "resource {} has no master records",
                config.id
            )));
        }

        let mut resource_nodes = Vec::with_capacity(config.nodes.len());
        let mut overrides = Vec::new();
        for rn in &config.nodes {
            let node = resolve_node(&rn.node_id).ok_or_else(|| {
                ClusterError::config(format!(
                    "resource {} references unknown node {}",
                    config.id, rn.node_id
                ))
            })?;
            let mut node_records = Vec::with_capacity(rn.node_records.len());
            for record in &rn.node_records {
                let name = parse_name(record)?;
                if !node_records.contains(&name) {
                    node_records.push(name);
                }
            }
            let sync_override = rn
                .synchronize_schedule
                .as_deref()
                .map(parse_schedule)
                .transpose()?;
            let test_override = rn.test_schedule.as_deref().map(parse_schedule).transpose()?;
            if sync_override.is_some() || test_override.is_some() {
                overrides.push((rn.node_id.clone(), sync_override, test_override));
            }
            resource_nodes.push(Arc::new(ResourceNode::new(node, node_records)));
        }

        // Union of nameservers across enabled nodes, in configuration order.
        let mut enabled_nameservers: Vec<Nameserver> = Vec::new();
        for rn in &resource_nodes {
            if rn.node().is_enabled() {
                for ns in rn.node().nameservers() {
                    if !enabled_nameservers.contains(ns) {
                        enabled_nameservers.push(ns.clone());
                    }
                }
            }
        }

        let cron = CronSettings {
            synchronize_timeout: Duration::from_secs(config.synchronize_timeout),
            test_timeout: Duration::from_secs(config.test_timeout),
            synchronize_schedule: parse_schedule(&config.synchronize_schedule)?,
            test_schedule: parse_schedule(&config.test_schedule)?,
            overrides,
        };

        Ok(Arc::new(Self {
            id: config.id.clone(),
            enabled: cluster_enabled && config.enabled,
            display: config.display.clone(),
            rtype: config.rtype.clone(),
            master_records,
            master_records_ttl: config.master_records_ttl,
            allow_multi_master: config.allow_multi_master,
            resource_nodes,
            enabled_nameservers,
            cron,
        }))
    }

    /// Unique identifier of this resource.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether both the cluster and this resource are enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Display name of this resource.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Replication type of this resource (selects the synchronizer factory).
    pub fn rtype(&self) -> &str {
        &self.rtype
    }

    /// Master records, in configuration order. All of them must agree for
    /// the resource to be consistent.
    pub fn master_records(&self) -> &[Name] {
        &self.master_records
    }

    /// Expected TTL of the master records.
    pub fn master_records_ttl(&self) -> u32 {
        self.master_records_ttl
    }

    /// Whether a master record may resolve to more than one address.
    pub fn allow_multi_master(&self) -> bool {
        self.allow_multi_master
    }

    /// Participating nodes, in configuration order.
    pub fn resource_nodes(&self) -> &[Arc<ResourceNode>] {
        &self.resource_nodes
    }

    /// Union of the nameservers of all enabled nodes, in configuration order.
    pub fn enabled_nameservers(&self) -> &[Nameserver] {
        &self.enabled_nameservers
    }

    /// Cron-driven synchronization settings.
    pub fn cron(&self) -> &CronSettings {
        &self.cron
    }

    /// All record names queried during one monitoring pass: master records
    /// plus the node records of every enabled node, deduplicated in order.
    pub fn monitored_records(&self) -> Vec<Name> {
        let mut records = self.master_records.clone();
        let mut seen: HashSet<&Name> = self.master_records.iter().collect();
        let mut extra = Vec::new();
        for rn in &self.resource_nodes {
            if rn.node().is_enabled() {
                for record in rn.node_records() {
                    if seen.insert(record) {
                        extra.push(record.clone());
                    }
                }
            }
        }
        records.extend(extra);
        records
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Resource {}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Parses a DNS name from configuration, forcing it fully qualified.
pub(crate) fn parse_name(input: &str) -> Result<Name, ClusterError> {
    let mut name = Name::from_ascii(input).map_err(|e| ClusterError::InvalidName {
        name: input.to_string(),
        reason: e.to_string(),
    })?;
    if !name.is_fqdn() {
        name.set_fqdn(true);
    }
    Ok(name)
}

/// Parses a 5-field cron expression (minute hour day-of-month month
/// day-of-week); the seconds field is pinned to zero since schedules are
/// evaluated at minute granularity.
pub(crate) fn parse_schedule(expression: &str) -> Result<Schedule, ClusterError> {
    let with_seconds = format!("0 {}", expression.trim());
    Schedule::from_str(&with_seconds).map_err(|e| ClusterError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}
