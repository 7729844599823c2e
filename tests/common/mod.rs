//! Shared test infrastructure: a scriptable record source, a recording
//! listener, and topology builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::Name;

use shepherd_dns::config::{
    NameserverConfig, NodeConfig, ResourceConfig, ResourceNodeConfig,
};
use shepherd_dns::lookup::{ARecord, QueryError, RecordSource};
use shepherd_dns::{
    Nameserver, Node, Resource, ResourceDnsMonitor, ResourceDnsResult, ResourceListener,
    SyncResult,
};

pub const NS1: &str = "ns1.example.com";
pub const NS2: &str = "ns2.example.com";

// --- ScriptedRecordSource ---

/// Record source answering from a script. Answers can be set per record
/// (applying to every nameserver) or per (record, nameserver) pair; records
/// without an answer resolve as host-not-found.
pub struct ScriptedRecordSource {
    by_pair: Mutex<HashMap<(String, String), Result<Vec<ARecord>, QueryError>>>,
    by_record: Mutex<HashMap<String, Result<Vec<ARecord>, QueryError>>>,
}

fn key(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

impl ScriptedRecordSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            by_pair: Mutex::new(HashMap::new()),
            by_record: Mutex::new(HashMap::new()),
        })
    }

    /// Sets the answer for `record` on every nameserver.
    pub fn answer(&self, record: &str, addresses: &[(&str, u32)]) {
        self.by_record.lock().unwrap().insert(
            key(record),
            Ok(addresses
                .iter()
                .map(|(address, ttl)| ARecord {
                    address: address.parse().unwrap(),
                    ttl: *ttl,
                })
                .collect()),
        );
    }

    /// Sets the answer for `record` on one specific nameserver.
    pub fn answer_at(&self, record: &str, nameserver: &str, addresses: &[(&str, u32)]) {
        self.by_pair.lock().unwrap().insert(
            (key(record), key(nameserver)),
            Ok(addresses
                .iter()
                .map(|(address, ttl)| ARecord {
                    address: address.parse().unwrap(),
                    ttl: *ttl,
                })
                .collect()),
        );
    }

    /// Makes `record` fail on every nameserver.
    pub fn fail(&self, record: &str, error: QueryError) {
        self.by_record.lock().unwrap().insert(key(record), Err(error));
    }
}

#[async_trait]
impl RecordSource for ScriptedRecordSource {
    async fn query_a(
        &self,
        name: &Name,
        nameserver: &Nameserver,
    ) -> Result<Vec<ARecord>, QueryError> {
        let record = key(&name.to_string());
        let ns = key(&nameserver.hostname().to_string());
        if let Some(outcome) = self.by_pair.lock().unwrap().get(&(record.clone(), ns)) {
            return outcome.clone();
        }
        if let Some(outcome) = self.by_record.lock().unwrap().get(&record) {
            return outcome.clone();
        }
        Err(QueryError::HostNotFound)
    }
}

// --- RecordingListener ---

/// Counts notifications and remembers details needed by assertions.
pub struct RecordingListener {
    pub dns_pass_count: AtomicUsize,
    pub sync_count: AtomicUsize,
    pub last_sync_old_was_none: Mutex<Option<bool>>,
    pub last_sync_mode: Mutex<Option<shepherd_dns::SyncMode>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dns_pass_count: AtomicUsize::new(0),
            sync_count: AtomicUsize::new(0),
            last_sync_old_was_none: Mutex::new(None),
            last_sync_mode: Mutex::new(None),
        })
    }

    pub fn dns_passes(&self) -> usize {
        self.dns_pass_count.load(Ordering::SeqCst)
    }

    pub fn sync_results(&self) -> usize {
        self.sync_count.load(Ordering::SeqCst)
    }
}

impl ResourceListener for RecordingListener {
    fn on_resource_dns_result(&self, _old: &ResourceDnsResult, new: &ResourceDnsResult) {
        // Only count real passes, not lifecycle placeholders.
        if new.master_record_lookups().is_some() {
            self.dns_pass_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_resource_synchronization_result(&self, old: Option<&SyncResult>, new: &SyncResult) {
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        *self.last_sync_old_was_none.lock().unwrap() = Some(old.is_none());
        *self.last_sync_mode.lock().unwrap() = Some(new.mode());
    }
}

// --- Topology builders ---

pub fn make_node_config(id: &str, nameservers: &[(&str, bool)]) -> NodeConfig {
    NodeConfig {
        id: id.to_string(),
        enabled: true,
        display: format!("Node {id}"),
        hostname: format!("{id}.example.com"),
        username: "appsync".to_string(),
        nameservers: nameservers
            .iter()
            .map(|(hostname, strict_ttl)| NameserverConfig {
                hostname: hostname.to_string(),
                strict_ttl: *strict_ttl,
            })
            .collect(),
    }
}

pub fn make_resource_config(allow_multi_master: bool) -> ResourceConfig {
    ResourceConfig {
        id: "web".to_string(),
        enabled: true,
        display: "Web content".to_string(),
        rtype: "rsync".to_string(),
        master_records: vec!["m.x".to_string()],
        master_records_ttl: 300,
        allow_multi_master,
        synchronize_timeout: 60,
        test_timeout: 60,
        // Far-off schedule: test runs are driven through synchronize_now.
        synchronize_schedule: "59 23 31 12 *".to_string(),
        test_schedule: "59 23 31 12 *".to_string(),
        nodes: vec![
            ResourceNodeConfig {
                node_id: "alpha".to_string(),
                node_records: vec!["a.x".to_string()],
                synchronize_schedule: None,
                test_schedule: None,
            },
            ResourceNodeConfig {
                node_id: "beta".to_string(),
                node_records: vec!["b.x".to_string()],
                synchronize_schedule: None,
                test_schedule: None,
            },
        ],
    }
}

/// Builds the standard two-node resource: nodes alpha/beta, master `m.x`,
/// node records `a.x`/`b.x`, nameservers per `nameservers`.
pub fn make_resource(nameservers: &[(&str, bool)], allow_multi_master: bool) -> Arc<Resource> {
    let alpha = Arc::new(Node::from_config(true, &make_node_config("alpha", nameservers)).unwrap());
    let beta = Arc::new(Node::from_config(true, &make_node_config("beta", nameservers)).unwrap());
    Resource::from_config(true, &make_resource_config(allow_multi_master), |id| {
        match id {
            "alpha" => Some(alpha.clone()),
            "beta" => Some(beta.clone()),
            _ => None,
        }
    })
    .unwrap()
}

/// Waits until the monitor has published a pass with lookups.
pub async fn await_first_pass(monitor: &Arc<ResourceDnsMonitor>) -> Arc<ResourceDnsResult> {
    for _ in 0..200 {
        let result = monitor.last_result();
        if result.master_record_lookups().is_some() {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("monitor did not publish a pass in time");
}

/// Finds the node result for `node_id`.
pub fn node_status_of(
    result: &ResourceDnsResult,
    node_id: &str,
) -> shepherd_dns::NodeDnsStatus {
    result
        .node_results()
        .iter()
        .find(|r| r.resource_node().node().id() == node_id)
        .unwrap_or_else(|| panic!("no result for node {node_id}"))
        .node_status()
}
