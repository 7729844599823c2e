//! Periodic DNS monitoring of one resource.
//!
//! Each resource owns one monitor. While running, the monitor fans out one
//! lookup per (record, nameserver) pair every [`DNS_CHECK_INTERVAL`],
//! resolves the results into master/node roles, and publishes a new
//! [`ResourceDnsResult`] atomically under its lock. Listeners receive the
//! (old, new) pair for every publish, including the synthetic stopped,
//! disabled and starting results around the lifecycle edges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hickory_resolver::Name;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::listener::Notifier;
use crate::lookup::{self, RecordSource};
use crate::metrics;
use crate::results::{DnsLookupResult, ResourceDnsResult, ResourceNodeDnsResult};
use crate::roles;
use crate::status::{MasterDnsStatus, NodeDnsStatus};
use crate::topology::{Nameserver, Resource};

/// How often the DNS settings are checked.
pub const DNS_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Number of attempts per lookup; only transient failures are retried.
pub const DNS_ATTEMPTS: usize = 2;

/// Per-attempt resolver timeout.
pub const DNS_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

struct MonitorInner {
    last_result: Arc<ResourceDnsResult>,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

/// Monitors the DNS role of one resource: which nodes are masters, which
/// are slaves, and whether the published records are consistent.
pub struct ResourceDnsMonitor {
    resource: Arc<Resource>,
    cluster_enabled: bool,
    source: Arc<dyn RecordSource>,
    notifier: Arc<Notifier>,
    inner: Mutex<MonitorInner>,
}

impl ResourceDnsMonitor {
    /// Creates a monitor in the stopped state.
    pub fn new(
        resource: Arc<Resource>,
        cluster_enabled: bool,
        source: Arc<dyn RecordSource>,
        notifier: Arc<Notifier>,
    ) -> Arc<Self> {
        let initial = Arc::new(uniform_result(
            &resource,
            MasterDnsStatus::Stopped,
            NodeDnsStatus::Stopped,
            None,
        ));
        Arc::new(Self {
            resource,
            cluster_enabled,
            source,
            notifier,
            inner: Mutex::new(MonitorInner {
                last_result: initial,
                worker: None,
            }),
        })
    }

    /// The resource this monitor watches.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// The most recently published result.
    pub fn last_result(&self) -> Arc<ResourceDnsResult> {
        self.inner.lock().last_result.clone()
    }

    fn publish(&self, inner: &mut MonitorInner, new: Arc<ResourceDnsResult>) {
        let old = std::mem::replace(&mut inner.last_result, new.clone());
        self.notifier.notify_dns(old, new);
    }

    /// Starts monitoring if both the cluster and the resource are enabled;
    /// otherwise publishes a disabled result.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if !self.cluster_enabled {
            let result = uniform_result(
                &self.resource,
                MasterDnsStatus::Disabled,
                NodeDnsStatus::Disabled,
                Some("cluster is disabled".to_string()),
            );
            self.publish(&mut inner, Arc::new(result));
            return;
        }
        if !self.resource.is_enabled() {
            let result = uniform_result(
                &self.resource,
                MasterDnsStatus::Disabled,
                NodeDnsStatus::Disabled,
                Some("resource is disabled".to_string()),
            );
            self.publish(&mut inner, Arc::new(result));
            return;
        }
        if inner.worker.is_some() {
            return;
        }

        self.publish(&mut inner, Arc::new(starting_result(&self.resource)));

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(token.clone()));
        inner.worker = Some((token, handle));
    }

    /// Stops monitoring and publishes a stopped result.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some((token, _)) = inner.worker.take() {
            token.cancel();
        }
        let result = uniform_result(
            &self.resource,
            MasterDnsStatus::Stopped,
            NodeDnsStatus::Stopped,
            None,
        );
        self.publish(&mut inner, Arc::new(result));
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let records = self.resource.monitored_records();
        let nameservers: Vec<Nameserver> = self.resource.enabled_nameservers().to_vec();
        debug!(
            resource = self.resource.id(),
            records = records.len(),
            nameservers = nameservers.len(),
            "dns monitor running"
        );

        loop {
            if token.is_cancelled() {
                return;
            }

            let start_time = Utc::now();
            let timer = metrics::Timer::start();

            // One concurrent lookup per (record, nameserver) pair.
            let mut tasks = Vec::with_capacity(records.len() * nameservers.len());
            for record in &records {
                let master_ttl = self
                    .resource
                    .master_records()
                    .contains(record)
                    .then(|| self.resource.master_records_ttl());
                for nameserver in &nameservers {
                    let source = self.source.clone();
                    let record = record.clone();
                    let nameserver = nameserver.clone();
                    tasks.push(tokio::spawn(async move {
                        let result =
                            lookup::lookup(source.as_ref(), &record, &nameserver, master_ttl).await;
                        (record, nameserver, result)
                    }));
                }
            }

            let mut grid: HashMap<Name, HashMap<Nameserver, DnsLookupResult>> = HashMap::new();
            for joined in futures::future::join_all(tasks).await {
                match joined {
                    Ok((record, nameserver, result)) => {
                        metrics::record_lookup(result.status());
                        grid.entry(record).or_default().insert(nameserver, result);
                    }
                    Err(e) => {
                        // The missing grid entry surfaces as an unrecoverable
                        // lookup during role resolution.
                        warn!(resource = self.resource.id(), error = %e, "lookup task failed");
                    }
                }
            }

            let resolution = roles::resolve(&self.resource, &grid);
            let result = Arc::new(ResourceDnsResult::new(
                self.resource.clone(),
                start_time,
                Utc::now(),
                Some(resolution.master_record_lookups),
                resolution.master_status,
                resolution.master_status_messages,
                resolution.node_results,
            ));
            metrics::record_dns_pass(
                self.resource.id(),
                result.resource_status(Utc::now()),
                timer.elapsed(),
            );

            {
                let mut inner = self.inner.lock();
                // stop() may have replaced this pass while lookups ran; its
                // stopped result must win.
                if token.is_cancelled() {
                    return;
                }
                self.publish(&mut inner, result);
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(DNS_CHECK_INTERVAL) => {}
            }
        }
    }
}

/// A lookup-less result with one status for the master and all nodes.
fn uniform_result(
    resource: &Arc<Resource>,
    master_status: MasterDnsStatus,
    node_status: NodeDnsStatus,
    message: Option<String>,
) -> ResourceDnsResult {
    let now = Utc::now();
    let messages: Vec<String> = message.into_iter().collect();
    let node_results = resource
        .resource_nodes()
        .iter()
        .map(|rn| {
            ResourceNodeDnsResult::new(rn.clone(), None, node_status, messages.clone())
        })
        .collect();
    ResourceDnsResult::new(
        resource.clone(),
        now,
        now,
        None,
        master_status,
        messages,
        node_results,
    )
}

/// The result published when monitoring starts: enabled nodes are starting,
/// disabled nodes stay disabled.
fn starting_result(resource: &Arc<Resource>) -> ResourceDnsResult {
    let now = Utc::now();
    let starting_message = "monitoring started, waiting for first pass".to_string();
    let node_results = resource
        .resource_nodes()
        .iter()
        .map(|rn| {
            if rn.node().is_enabled() {
                ResourceNodeDnsResult::new(
                    rn.clone(),
                    None,
                    NodeDnsStatus::Starting,
                    [starting_message.clone()],
                )
            } else {
                ResourceNodeDnsResult::new(
                    rn.clone(),
                    None,
                    NodeDnsStatus::Disabled,
                    ["node is disabled".to_string()],
                )
            }
        })
        .collect();
    ResourceDnsResult::new(
        resource.clone(),
        now,
        now,
        None,
        MasterDnsStatus::Starting,
        [starting_message],
        node_results,
    )
}
