//! Listener interfaces and ordered notification delivery.
//!
//! Monitors and synchronizers publish results through a [`Notifier`], which
//! fans them out to registered [`ResourceListener`]s. Each category (DNS
//! results, synchronization results) is drained by a single consumer task,
//! so listeners observe results in exactly the order they were published
//! within a category.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn, Level};

use crate::results::{lookup_for, lookups_for, ResourceDnsResult, SyncResult};

/// Notified when a resource's DNS or synchronization results change.
pub trait ResourceListener: Send + Sync {
    /// Called for every published DNS result. `old` is never absent: an
    /// initial stopped result exists from monitor construction.
    fn on_resource_dns_result(&self, old: &ResourceDnsResult, new: &ResourceDnsResult);

    /// Called for every synchronization result. `old` is `None` on the
    /// first run after a start.
    fn on_resource_synchronization_result(&self, old: Option<&SyncResult>, new: &SyncResult);
}

type DnsEvent = (Arc<ResourceDnsResult>, Arc<ResourceDnsResult>);
type SyncEvent = (Option<Arc<SyncResult>>, Arc<SyncResult>);

/// Ordered, per-category fan-out of results to listeners.
pub struct Notifier {
    listeners: RwLock<Vec<Arc<dyn ResourceListener>>>,
    dns_tx: mpsc::UnboundedSender<DnsEvent>,
    sync_tx: mpsc::UnboundedSender<SyncEvent>,
}

impl Notifier {
    /// Creates a notifier and spawns its two consumer tasks. Must be called
    /// from within a tokio runtime. The consumers exit when the notifier is
    /// dropped and their queues drain.
    pub fn new() -> Arc<Self> {
        let (dns_tx, mut dns_rx) = mpsc::unbounded_channel::<DnsEvent>();
        let (sync_tx, mut sync_rx) = mpsc::unbounded_channel::<SyncEvent>();

        let notifier = Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
            dns_tx,
            sync_tx,
        });

        let weak: Weak<Notifier> = Arc::downgrade(&notifier);
        tokio::spawn(async move {
            while let Some((old, new)) = dns_rx.recv().await {
                let Some(notifier) = weak.upgrade() else { return };
                // Snapshot so a listener may (un)register more listeners.
                let listeners: Vec<_> = notifier.listeners.read().clone();
                for listener in listeners {
                    let call = AssertUnwindSafe(|| listener.on_resource_dns_result(&old, &new));
                    if catch_unwind(call).is_err() {
                        error!(resource = new.resource().id(), "resource listener panicked");
                    }
                }
            }
        });

        let weak: Weak<Notifier> = Arc::downgrade(&notifier);
        tokio::spawn(async move {
            while let Some((old, new)) = sync_rx.recv().await {
                let Some(notifier) = weak.upgrade() else { return };
                let listeners: Vec<_> = notifier.listeners.read().clone();
                for listener in listeners {
                    let call = AssertUnwindSafe(|| {
                        listener.on_resource_synchronization_result(old.as_deref(), &new)
                    });
                    if catch_unwind(call).is_err() {
                        error!("resource listener panicked");
                    }
                }
            }
        });

        notifier
    }

    /// Registers a listener; no-op if already registered.
    pub fn add_listener(&self, listener: Arc<dyn ResourceListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Removes a listener.
    pub fn remove_listener(&self, listener: &Arc<dyn ResourceListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Enqueues a DNS result notification.
    pub(crate) fn notify_dns(&self, old: Arc<ResourceDnsResult>, new: Arc<ResourceDnsResult>) {
        // Send failures only happen during shutdown; drop silently.
        let _ = self.dns_tx.send((old, new));
    }

    /// Enqueues a synchronization result notification.
    pub(crate) fn notify_sync(&self, old: Option<Arc<SyncResult>>, new: Arc<SyncResult>) {
        let _ = self.sync_tx.send((old, new));
    }
}

fn log_at(level: Level, message: &str) {
    match level {
        Level::ERROR => error!("{message}"),
        Level::WARN => warn!("{message}"),
        Level::INFO => info!("{message}"),
        Level::DEBUG => debug!("{message}"),
        Level::TRACE => trace!("{message}"),
    }
}

/// Logs every observable change between consecutive results.
pub struct LogResourceListener;

impl ResourceListener for LogResourceListener {
    fn on_resource_dns_result(&self, old: &ResourceDnsResult, new: &ResourceDnsResult) {
        let resource = new.resource();
        debug!(
            resource = resource.id(),
            millis = (new.end_time() - new.start_time()).num_milliseconds(),
            "dns pass finished"
        );

        // Per-lookup address and message changes for master records.
        if let Some(new_lookups) = new.master_record_lookups() {
            let old_lookups = old.master_record_lookups();
            for (record, per_ns) in new_lookups {
                let old_per_ns = old_lookups.and_then(|l| lookups_for(l, record));
                for (nameserver, new_lookup) in per_ns {
                    let level = new_lookup.status().resource_status().log_level();
                    let old_lookup = old_per_ns.and_then(|l| lookup_for(l, nameserver));
                    let old_addresses = old_lookup.map(|l| l.addresses());
                    if old_addresses != Some(new_lookup.addresses()) {
                        log_at(
                            level,
                            &format!(
                                "{resource}: master record {record} at {nameserver}: addresses \
                                 now {:?}",
                                new_lookup.addresses()
                            ),
                        );
                    }
                    if old_lookup.map(|l| l.status_messages()) != Some(new_lookup.status_messages())
                    {
                        for message in new_lookup.status_messages() {
                            log_at(
                                level,
                                &format!(
                                    "{resource}: master record {record} at {nameserver}: {message}"
                                ),
                            );
                        }
                    }
                }
            }
        }

        let level = new.master_status().resource_status().log_level();
        if new.master_status() != old.master_status() {
            log_at(
                level,
                &format!(
                    "{resource}: master status {} -> {}",
                    old.master_status(),
                    new.master_status()
                ),
            );
        }
        if new.master_status_messages() != old.master_status_messages() {
            for message in new.master_status_messages() {
                log_at(level, &format!("{resource}: {message}"));
            }
        }

        for new_node in new.node_results() {
            let node = new_node.resource_node().node();
            let old_node = old.node_result(node);

            if let Some(new_lookups) = new_node.node_record_lookups() {
                let old_lookups = old_node.and_then(|n| n.node_record_lookups());
                for (record, per_ns) in new_lookups {
                    let old_per_ns = old_lookups.and_then(|l| lookups_for(l, record));
                    for (nameserver, new_lookup) in per_ns {
                        let level = new_lookup.status().resource_status().log_level();
                        let old_lookup = old_per_ns.and_then(|l| lookup_for(l, nameserver));
                        if old_lookup.map(|l| l.addresses()) != Some(new_lookup.addresses()) {
                            log_at(
                                level,
                                &format!(
                                    "{resource}: node {node} record {record} at {nameserver}: \
                                     addresses now {:?}",
                                    new_lookup.addresses()
                                ),
                            );
                        }
                    }
                }
            }

            let level = new_node.node_status().resource_status().log_level();
            if old_node.map(|n| n.node_status()) != Some(new_node.node_status()) {
                log_at(
                    level,
                    &format!(
                        "{resource}: node {node} status {} -> {}",
                        old_node
                            .map(|n| n.node_status().to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        new_node.node_status()
                    ),
                );
            }
            if old_node.map(|n| n.node_status_messages()) != Some(new_node.node_status_messages()) {
                for message in new_node.node_status_messages() {
                    log_at(level, &format!("{resource}: node {node}: {message}"));
                }
            }
        }
    }

    fn on_resource_synchronization_result(&self, _old: Option<&SyncResult>, new: &SyncResult) {
        let status = new.resource_status();
        let level = status.log_level();
        log_at(
            level,
            &format!(
                "{} -> {}: {} finished with status {status}",
                new.local_resource_node().node(),
                new.remote_resource_node().node(),
                new.mode()
            ),
        );
        for step in new.steps() {
            for warning in step.warnings() {
                warn!(step = step.description(), "{warning}");
            }
            for error in step.errors() {
                error!(step = step.description(), "{error}");
            }
        }
    }
}
