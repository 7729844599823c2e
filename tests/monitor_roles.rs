//! End-to-end monitoring scenarios: scripted nameserver answers in, role
//! classification out, through a running monitor.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use shepherd_dns::{
    MasterDnsStatus, NodeDnsStatus, Notifier, ResourceDnsMonitor, ResourceStatus,
};

#[tokio::test]
async fn clean_master_and_slave() {
    let source = ScriptedRecordSource::new();
    source.answer("m.x", &[("10.0.0.1", 300)]);
    source.answer("a.x", &[("10.0.0.1", 300)]);
    source.answer("b.x", &[("10.0.0.2", 300)]);

    let resource = make_resource(&[(NS1, false), (NS2, false)], false);
    let notifier = Notifier::new();
    let listener = RecordingListener::new();
    notifier.add_listener(listener.clone());

    let monitor = ResourceDnsMonitor::new(resource, true, source, notifier);
    monitor.start();
    let result = await_first_pass(&monitor).await;

    assert_eq!(result.master_status(), MasterDnsStatus::Consistent);
    assert!(result.master_status_messages().is_empty());
    assert_eq!(node_status_of(&result, "alpha"), NodeDnsStatus::Master);
    assert_eq!(node_status_of(&result, "beta"), NodeDnsStatus::Slave);
    for node_result in result.node_results() {
        assert!(node_result.node_status_messages().is_empty());
    }
    assert_eq!(result.resource_status(Utc::now()), ResourceStatus::Healthy);

    // Every (record, nameserver) pair has exactly one lookup.
    let lookups = result.master_record_lookups().unwrap();
    assert_eq!(lookups.len(), 1);
    assert_eq!(lookups[0].1.len(), 2);
    for node_result in result.node_results() {
        let lookups = node_result.node_record_lookups().unwrap();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].1.len(), 2);
    }

    // The listener saw the pass, delivered off the publish path.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(listener.dns_passes() >= 1);

    monitor.stop();
}

#[tokio::test]
async fn strict_ttl_mismatch_warns_but_promotes() {
    let source = ScriptedRecordSource::new();
    // ns1 is strict and serves a TTL below the configured 300.
    source.answer_at("m.x", NS1, &[("10.0.0.1", 299)]);
    source.answer_at("m.x", NS2, &[("10.0.0.1", 300)]);
    source.answer("a.x", &[("10.0.0.1", 300)]);
    source.answer("b.x", &[("10.0.0.2", 300)]);

    let resource = make_resource(&[(NS1, true), (NS2, false)], false);
    let monitor = ResourceDnsMonitor::new(resource, true, source, Notifier::new());
    monitor.start();
    let result = await_first_pass(&monitor).await;

    assert_eq!(result.master_status(), MasterDnsStatus::Warning);
    assert_eq!(node_status_of(&result, "alpha"), NodeDnsStatus::Master);

    let lookups = result.master_record_lookups().unwrap();
    let ttl_messages: Vec<&String> = lookups[0]
        .1
        .iter()
        .flat_map(|(_, lookup)| lookup.status_messages())
        .collect();
    assert_eq!(ttl_messages.len(), 1);
    assert!(ttl_messages[0].contains("299") && ttl_messages[0].contains("300"));

    monitor.stop();
}

#[tokio::test]
async fn forbidden_multi_master_is_inconsistent() {
    let source = ScriptedRecordSource::new();
    source.answer("m.x", &[("10.0.0.1", 300), ("10.0.0.2", 300)]);
    source.answer("a.x", &[("10.0.0.1", 300)]);
    source.answer("b.x", &[("10.0.0.2", 300)]);

    let resource = make_resource(&[(NS1, false)], false);
    let monitor = ResourceDnsMonitor::new(resource, true, source, Notifier::new());
    monitor.start();
    let result = await_first_pass(&monitor).await;

    assert_eq!(result.master_status(), MasterDnsStatus::Inconsistent);
    assert!(result
        .master_status_messages()
        .iter()
        .any(|m| m.contains("multi-master not allowed")));
    assert_eq!(node_status_of(&result, "alpha"), NodeDnsStatus::Slave);
    assert_eq!(node_status_of(&result, "beta"), NodeDnsStatus::Slave);
    assert_eq!(
        result.resource_status(Utc::now()),
        ResourceStatus::Inconsistent
    );

    monitor.stop();
}

#[tokio::test]
async fn duplicate_node_address_flags_both_nodes() {
    let source = ScriptedRecordSource::new();
    source.answer("m.x", &[("10.0.0.1", 300)]);
    source.answer("a.x", &[("10.0.0.1", 300)]);
    source.answer("b.x", &[("10.0.0.1", 300)]);

    let resource = make_resource(&[(NS1, false)], false);
    let monitor = ResourceDnsMonitor::new(resource, true, source, Notifier::new());
    monitor.start();
    let result = await_first_pass(&monitor).await;

    assert_eq!(node_status_of(&result, "alpha"), NodeDnsStatus::Inconsistent);
    assert_eq!(node_status_of(&result, "beta"), NodeDnsStatus::Inconsistent);

    // The rewrite of the earlier node is visible in the published result:
    // each message cites the other node.
    let messages_of = |node_id: &str| {
        result
            .node_results()
            .iter()
            .find(|r| r.resource_node().node().id() == node_id)
            .unwrap()
            .node_status_messages()
            .clone()
    };
    assert!(messages_of("alpha")
        .iter()
        .any(|m| m.contains("duplicate A record") && m.contains("Node beta")));
    assert!(messages_of("beta")
        .iter()
        .any(|m| m.contains("duplicate A record") && m.contains("Node alpha")));

    monitor.stop();
}

#[tokio::test]
async fn master_address_outside_cluster_is_inconsistent() {
    let source = ScriptedRecordSource::new();
    source.answer("m.x", &[("10.0.0.9", 300)]);
    source.answer("a.x", &[("10.0.0.1", 300)]);
    source.answer("b.x", &[("10.0.0.2", 300)]);

    let resource = make_resource(&[(NS1, false)], false);
    let monitor = ResourceDnsMonitor::new(resource, true, source, Notifier::new());
    monitor.start();
    let result = await_first_pass(&monitor).await;

    assert_eq!(result.master_status(), MasterDnsStatus::Inconsistent);
    assert!(result
        .master_status_messages()
        .iter()
        .any(|m| m.contains("10.0.0.9") && m.contains("does not match any node")));
    assert_eq!(node_status_of(&result, "alpha"), NodeDnsStatus::Slave);
    assert_eq!(node_status_of(&result, "beta"), NodeDnsStatus::Slave);

    monitor.stop();
}

#[tokio::test]
async fn stop_wins_over_in_flight_pass() {
    let source = ScriptedRecordSource::new();
    source.answer("m.x", &[("10.0.0.1", 300)]);
    source.answer("a.x", &[("10.0.0.1", 300)]);
    source.answer("b.x", &[("10.0.0.2", 300)]);

    let resource = make_resource(&[(NS1, false)], false);
    let monitor = ResourceDnsMonitor::new(resource, true, source, Notifier::new());
    monitor.start();
    await_first_pass(&monitor).await;
    monitor.stop();

    let result = monitor.last_result();
    assert_eq!(result.master_status(), MasterDnsStatus::Stopped);
    assert!(result.master_record_lookups().is_none());

    // No later pass replaces the stopped result.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(monitor.last_result().master_status(), MasterDnsStatus::Stopped);
}
