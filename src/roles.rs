//! Role resolution: from raw lookup results to master/node statuses.
//!
//! This is a pure function over one pass's lookup results. Iteration always
//! follows configuration order (master records, then each node's records,
//! nameservers within each record), which makes escalation deterministic:
//! the first successful lookup fixes the reference addresses that later
//! lookups are compared against, and mismatch messages cite that pair.
//!
//! Severity only ever escalates here; no path lowers a status once raised.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use hickory_resolver::Name;

use crate::results::{
    DnsLookupResult, NameserverLookups, RecordLookups, ResourceNodeDnsResult,
};
use crate::status::{DnsLookupStatus, MasterDnsStatus, NodeDnsStatus};
use crate::topology::{Nameserver, Resource, ResourceNode};

/// The outcome of resolving one pass.
pub(crate) struct RoleResolution {
    pub master_record_lookups: RecordLookups,
    pub master_status: MasterDnsStatus,
    pub master_status_messages: Vec<String>,
    pub node_results: Vec<ResourceNodeDnsResult>,
}

/// Working state for one enabled node while the pass is being resolved.
/// Kept mutable so a later node finding a duplicate address can rewrite an
/// earlier node's pending result before anything is published.
struct NodeWork {
    resource_node: Arc<ResourceNode>,
    record_lookups: Option<RecordLookups>,
    status: NodeDnsStatus,
    messages: Vec<String>,
    first_addresses: Option<BTreeSet<String>>,
}

impl NodeWork {
    fn contains_address(&self, address: &str) -> bool {
        self.record_lookups
            .iter()
            .flatten()
            .flat_map(|(_, per_ns)| per_ns.iter())
            .any(|(_, result)| result.addresses().contains(address))
    }
}

fn join(addresses: &BTreeSet<String>) -> String {
    addresses.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Fetches the lookup result for `(record, nameserver)`; a missing entry is
/// treated as an unrecoverable lookup failure so the published result still
/// covers the full record × nameserver grid.
fn lookup_result(
    lookups: &HashMap<Name, HashMap<Nameserver, DnsLookupResult>>,
    record: &Name,
    nameserver: &Nameserver,
) -> DnsLookupResult {
    lookups
        .get(record)
        .and_then(|per_ns| per_ns.get(nameserver))
        .cloned()
        .unwrap_or_else(|| {
            DnsLookupResult::new(
                record.clone(),
                DnsLookupStatus::Unrecoverable,
                [format!("no lookup result for {record} at {nameserver}")],
                [],
            )
        })
}

/// Resolves one pass worth of lookups into master and node statuses.
pub(crate) fn resolve(
    resource: &Arc<Resource>,
    lookups: &HashMap<Name, HashMap<Nameserver, DnsLookupResult>>,
) -> RoleResolution {
    let nameservers = resource.enabled_nameservers();

    // Master records: every record must have at least one successful answer,
    // and every successful answer must agree with the first one seen.
    let mut master_record_lookups: RecordLookups = Vec::new();
    let mut master_status = MasterDnsStatus::Consistent;
    let mut master_messages: Vec<String> = Vec::new();
    let mut first_master: Option<(Nameserver, Name, BTreeSet<String>)> = None;

    for record in resource.master_records() {
        let mut per_ns: NameserverLookups = Vec::with_capacity(nameservers.len());
        let mut found_successful = false;
        for nameserver in nameservers {
            let result = lookup_result(lookups, record, nameserver);
            if result.status().is_successful() {
                if result.status() == DnsLookupStatus::Warning {
                    master_status = master_status.max(MasterDnsStatus::Warning);
                }
                found_successful = true;
                let addresses = result.addresses();
                if addresses.len() > 1 && !resource.allow_multi_master() {
                    master_status = master_status.max(MasterDnsStatus::Inconsistent);
                    master_messages.push(format!(
                        "multi-master not allowed, {nameserver} returned multiple addresses \
                         for {record}: {}",
                        join(addresses)
                    ));
                }
                match &first_master {
                    None => {
                        first_master =
                            Some((nameserver.clone(), record.clone(), addresses.clone()));
                    }
                    Some((first_ns, first_record, first_addresses)) => {
                        if first_addresses != addresses {
                            master_status = master_status.max(MasterDnsStatus::Inconsistent);
                            master_messages.push(format!(
                                "master records mismatch: {first_ns} returned {} for \
                                 {first_record} but {nameserver} returned {} for {record}",
                                join(first_addresses),
                                join(addresses)
                            ));
                        }
                    }
                }
            }
            per_ns.push((nameserver.clone(), result));
        }
        if !found_successful {
            master_status = master_status.max(MasterDnsStatus::Inconsistent);
            master_messages.push(format!("master record missing: {record}"));
        }
        master_record_lookups.push((record.clone(), per_ns));
    }

    // Node records: each enabled node must resolve to exactly one address per
    // record, the same across records and nameservers, and no two nodes may
    // share an address.
    let mut works: Vec<NodeWork> = Vec::with_capacity(resource.resource_nodes().len());
    let mut all_node_addresses: HashSet<String> = HashSet::new();

    for resource_node in resource.resource_nodes() {
        if !resource_node.node().is_enabled() {
            works.push(NodeWork {
                resource_node: resource_node.clone(),
                record_lookups: None,
                status: NodeDnsStatus::Disabled,
                messages: vec!["node is disabled".to_string()],
                first_addresses: None,
            });
            continue;
        }

        let mut record_lookups: RecordLookups =
            Vec::with_capacity(resource_node.node_records().len());
        let mut status = NodeDnsStatus::Slave;
        let mut messages: Vec<String> = Vec::new();
        let mut first_node: Option<(Nameserver, Name, BTreeSet<String>)> = None;

        for record in resource_node.node_records() {
            let mut per_ns: NameserverLookups = Vec::with_capacity(nameservers.len());
            let mut found_successful = false;
            for nameserver in nameservers {
                let result = lookup_result(lookups, record, nameserver);
                if result.status().is_successful() {
                    found_successful = true;
                    let addresses = result.addresses();
                    all_node_addresses.extend(addresses.iter().cloned());
                    if addresses.len() > 1 {
                        status = NodeDnsStatus::Inconsistent;
                        messages.push(format!(
                            "only one A record allowed for {record}: {}",
                            join(addresses)
                        ));
                    } else {
                        let address = addresses.iter().next().expect("successful lookup");
                        // No two nodes may share an address: check every node
                        // already processed, and rewrite its pending result
                        // when a collision is found.
                        for previous in works.iter_mut() {
                            if previous.contains_address(address) {
                                status = NodeDnsStatus::Inconsistent;
                                messages.push(format!(
                                    "duplicate A record {address} for {record}, also held \
                                     by node {}",
                                    previous.resource_node.node()
                                ));
                                previous.status = NodeDnsStatus::Inconsistent;
                                previous.messages.push(format!(
                                    "duplicate A record {address}, also held by node {} \
                                     ({record})",
                                    resource_node.node()
                                ));
                            }
                        }
                    }
                    match &first_node {
                        None => {
                            first_node =
                                Some((nameserver.clone(), record.clone(), addresses.clone()));
                        }
                        Some((first_ns, first_record, first_addresses)) => {
                            if first_addresses != addresses {
                                status = NodeDnsStatus::Inconsistent;
                                messages.push(format!(
                                    "node records mismatch: {first_ns} returned {} for \
                                     {first_record} but {nameserver} returned {} for {record}",
                                    join(first_addresses),
                                    join(addresses)
                                ));
                            }
                        }
                    }
                }
                per_ns.push((nameserver.clone(), result));
            }
            if !found_successful {
                status = NodeDnsStatus::Inconsistent;
                messages.push(format!("node record missing: {record}"));
            }
            record_lookups.push((record.clone(), per_ns));
        }

        works.push(NodeWork {
            resource_node: resource_node.clone(),
            record_lookups: Some(record_lookups),
            status,
            messages,
            first_addresses: first_node.map(|(_, _, addresses)| addresses),
        });
    }

    // Every master address must belong to some node; an address outside the
    // cluster means DNS points at a machine we do not operate.
    for (record, per_ns) in &master_record_lookups {
        for (_, result) in per_ns {
            for address in result.addresses() {
                if !all_node_addresses.contains(address) {
                    master_status = master_status.max(MasterDnsStatus::Inconsistent);
                    master_messages.push(format!(
                        "master record {record} address {address} does not match any node"
                    ));
                }
            }
        }
    }

    // Promotion runs last so a node is only called master under a master
    // status that survived every check above.
    if matches!(
        master_status,
        MasterDnsStatus::Consistent | MasterDnsStatus::Warning
    ) {
        if let Some((_, _, first_master_addresses)) = &first_master {
            for work in &mut works {
                if work.status == NodeDnsStatus::Slave {
                    if let Some(first_addresses) = &work.first_addresses {
                        if first_addresses.is_subset(first_master_addresses) {
                            work.status = NodeDnsStatus::Master;
                        }
                    }
                }
            }
        }
    }

    let node_results = works
        .into_iter()
        .map(|work| {
            ResourceNodeDnsResult::new(
                work.resource_node,
                work.record_lookups,
                work.status,
                work.messages,
            )
        })
        .collect();

    RoleResolution {
        master_record_lookups,
        master_status,
        master_status_messages: master_messages,
        node_results,
    }
}
