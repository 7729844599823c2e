//! Cron-scheduled synchronization between the local node and remote nodes.
//!
//! One [`CronSynchronizer`] exists per (resource, local node, remote node).
//! A tick task wakes at every minute boundary; when the synchronize or test
//! schedule matches (or a forced run was requested), the scheduler consults
//! the monitor's latest DNS result and the [`Synchronizer`] plugin to decide
//! whether to run. Synchronization wins ties over testing, so a
//! synchronization run must check at least as much as a test would.
//!
//! Missed ticks are never caught up: if a run overlaps the next scheduled
//! minute, that minute simply does not fire.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Timelike, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ResourceConfig;
use crate::listener::Notifier;
use crate::metrics;
use crate::monitor::ResourceDnsMonitor;
use crate::results::{ResourceNodeDnsResult, SyncResult, SyncStep};
use crate::status::{ResourceStatus, SyncMode, SynchronizerState};
use crate::topology::{Resource, ResourceNode};

/// A synchronization implementation for one resource type (rsync, csync2,
/// ...). Decides whether a run is currently possible and performs it.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// Whether a run in `mode` is possible given the current DNS view of
    /// both sides. Called with the monitor's latest node results.
    fn can_synchronize(
        &self,
        mode: SyncMode,
        local: &ResourceNodeDnsResult,
        remote: &ResourceNodeDnsResult,
    ) -> bool;

    /// Performs the run and reports what happened.
    async fn synchronize(
        &self,
        mode: SyncMode,
        local: ResourceNodeDnsResult,
        remote: ResourceNodeDnsResult,
    ) -> SyncResult;
}

/// Builds synchronizers for one resource type.
pub trait SynchronizerFactory: Send + Sync {
    /// Creates the synchronizer for a (local, remote) pair, or `None` when
    /// this pair never synchronizes.
    fn new_synchronizer(
        &self,
        local: &Arc<ResourceNode>,
        remote: &Arc<ResourceNode>,
        config: &ResourceConfig,
    ) -> Option<Arc<dyn Synchronizer>>;
}

/// Registry of synchronizer factories keyed by resource type.
#[derive(Default)]
pub struct SynchronizerRegistry {
    factories: HashMap<String, Arc<dyn SynchronizerFactory>>,
}

impl SynchronizerRegistry {
    /// Creates an empty registry; resources whose type has no factory run
    /// in observer mode (monitoring only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for a resource type.
    pub fn register(&mut self, rtype: impl Into<String>, factory: Arc<dyn SynchronizerFactory>) {
        self.factories.insert(rtype.into(), factory);
    }

    /// Looks up the factory for a resource type.
    pub fn get(&self, rtype: &str) -> Option<&Arc<dyn SynchronizerFactory>> {
        self.factories.get(rtype)
    }
}

struct SyncInner {
    state: SynchronizerState,
    state_message: Option<String>,
    forced_mode: Option<SyncMode>,
    last_result: Option<Arc<SyncResult>>,
    job: Option<(CancellationToken, JoinHandle<()>)>,
    nudge: Option<tokio::sync::mpsc::UnboundedSender<()>>,
}

/// Cron-driven scheduler for one (resource, local node, remote node) pair.
pub struct CronSynchronizer {
    resource: Arc<Resource>,
    local: Arc<ResourceNode>,
    remote: Arc<ResourceNode>,
    monitor: Arc<ResourceDnsMonitor>,
    protocol: Arc<dyn Synchronizer>,
    notifier: Arc<Notifier>,
    cluster_enabled: bool,
    synchronize_schedule: Schedule,
    test_schedule: Schedule,
    inner: Mutex<SyncInner>,
}

impl CronSynchronizer {
    /// Creates a scheduler in the stopped state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resource: Arc<Resource>,
        local: Arc<ResourceNode>,
        remote: Arc<ResourceNode>,
        monitor: Arc<ResourceDnsMonitor>,
        protocol: Arc<dyn Synchronizer>,
        notifier: Arc<Notifier>,
        cluster_enabled: bool,
    ) -> Arc<Self> {
        let remote_id = remote.node().id().to_string();
        let synchronize_schedule = resource.cron().synchronize_schedule(&remote_id).clone();
        let test_schedule = resource.cron().test_schedule(&remote_id).clone();
        Arc::new(Self {
            resource,
            local,
            remote,
            monitor,
            protocol,
            notifier,
            cluster_enabled,
            synchronize_schedule,
            test_schedule,
            inner: Mutex::new(SyncInner {
                state: SynchronizerState::Stopped,
                state_message: None,
                forced_mode: None,
                last_result: None,
                job: None,
                nudge: None,
            }),
        })
    }

    /// The local side of this scheduler.
    pub fn local_resource_node(&self) -> &Arc<ResourceNode> {
        &self.local
    }

    /// The remote side of this scheduler.
    pub fn remote_resource_node(&self) -> &Arc<ResourceNode> {
        &self.remote
    }

    /// Current scheduler state.
    pub fn state(&self) -> SynchronizerState {
        self.inner.lock().state
    }

    /// Description of the current state, if any (e.g. which side is disabled).
    pub fn state_message(&self) -> Option<String> {
        self.inner.lock().state_message.clone()
    }

    /// The last run's result, or `None` if no run has completed since start.
    pub fn last_result(&self) -> Option<Arc<SyncResult>> {
        self.inner.lock().last_result.clone()
    }

    /// The resource status contributed by this scheduler's results: the last
    /// result's status, or starting/stopped/disabled from the state alone.
    pub fn result_status(&self) -> ResourceStatus {
        let inner = self.inner.lock();
        if let Some(result) = &inner.last_result {
            return result.resource_status();
        }
        let status = inner.state.resource_status();
        if status == ResourceStatus::Healthy {
            ResourceStatus::Starting
        } else {
            status
        }
    }

    /// Whether a run in `mode` could start right now: the scheduler must be
    /// sleeping, the resource consistent, and the plugin willing.
    pub fn can_synchronize_now(&self, mode: SyncMode) -> bool {
        {
            let inner = self.inner.lock();
            if inner.job.is_none() || inner.state != SynchronizerState::Sleeping {
                return false;
            }
        }
        let dns = self.monitor.last_result();
        if dns.resource_status(Utc::now()) == ResourceStatus::Inconsistent {
            return false;
        }
        let (Some(local), Some(remote)) = (
            dns.node_result(self.local.node()),
            dns.node_result(self.remote.node()),
        ) else {
            return false;
        };
        self.protocol.can_synchronize(mode, local, remote)
    }

    /// Requests an immediate run in `mode` at the next possible moment.
    /// Dropped unless the scheduler is currently sleeping.
    pub fn synchronize_now(&self, mode: SyncMode) {
        let mut inner = self.inner.lock();
        if inner.job.is_some() && inner.state == SynchronizerState::Sleeping {
            // The tick consumes the forced mode even when gating rejects it.
            inner.forced_mode = Some(mode);
            if let Some(nudge) = &inner.nudge {
                let _ = nudge.send(());
            }
        }
    }

    /// Starts the scheduler: disabled when any participant is disabled,
    /// sleeping otherwise.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        let disabled_reason = if !self.cluster_enabled {
            Some("cluster is disabled")
        } else if !self.resource.is_enabled() {
            Some("resource is disabled")
        } else if !self.local.node().is_enabled() {
            Some("local node is disabled")
        } else if !self.remote.node().is_enabled() {
            Some("remote node is disabled")
        } else {
            None
        };
        if let Some(reason) = disabled_reason {
            inner.state = SynchronizerState::Disabled;
            inner.state_message = Some(reason.to_string());
            inner.forced_mode = None;
            inner.last_result = None;
            return;
        }
        if inner.job.is_some() {
            return;
        }
        inner.state = SynchronizerState::Sleeping;
        inner.state_message = None;
        inner.forced_mode = None;
        inner.last_result = self.load_last_result();

        let (nudge_tx, nudge_rx) = tokio::sync::mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(token.clone(), nudge_rx));
        inner.nudge = Some(nudge_tx);
        inner.job = Some((token, handle));
    }

    /// Stops the scheduler. A run in flight is left to finish or time out;
    /// its result is discarded.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some((token, _)) = inner.job.take() {
            token.cancel();
        }
        inner.nudge = None;
        inner.state = SynchronizerState::Stopped;
        inner.state_message = None;
        inner.forced_mode = None;
        inner.last_result = None;
    }

    async fn run(
        self: Arc<Self>,
        token: CancellationToken,
        mut nudge: tokio::sync::mpsc::UnboundedReceiver<()>,
    ) {
        debug!(
            resource = self.resource.id(),
            local = self.local.node().id(),
            remote = self.remote.node().id(),
            "synchronizer scheduler running"
        );
        loop {
            let now = Local::now();
            let next_minute = next_minute(now);
            let wait = (next_minute - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));

            tokio::select! {
                _ = token.cancelled() => return,
                _ = nudge.recv() => {
                    // Forced run: tick immediately at the current minute.
                    self.tick(truncate_to_minute(Local::now()), &token).await;
                }
                _ = tokio::time::sleep(wait) => {
                    let tick_time = next_minute;
                    if self.synchronize_schedule.includes(tick_time)
                        || self.test_schedule.includes(tick_time)
                    {
                        self.tick(tick_time, &token).await;
                    }
                }
            }
        }
    }

    /// One scheduler tick: consume any forced mode, gate on the DNS view,
    /// and run at most one of synchronize/test, preferring synchronize.
    async fn tick(self: &Arc<Self>, tick_time: DateTime<Local>, token: &CancellationToken) {
        let forced = {
            let mut inner = self.inner.lock();
            if token.is_cancelled() {
                return;
            }
            inner.forced_mode.take()
        };

        // Never synchronize or test an inconsistent resource.
        let dns = self.monitor.last_result();
        if dns.resource_status(Utc::now()) == ResourceStatus::Inconsistent {
            debug!(
                resource = self.resource.id(),
                "skipping tick, resource is inconsistent"
            );
            return;
        }
        let (Some(local_dns), Some(remote_dns)) = (
            dns.node_result(self.local.node()).cloned(),
            dns.node_result(self.remote.node()).cloned(),
        ) else {
            return;
        };

        let synchronize_due = forced == Some(SyncMode::Synchronize)
            || (forced.is_none() && self.synchronize_schedule.includes(tick_time));
        let test_due = forced == Some(SyncMode::TestOnly)
            || (forced.is_none() && self.test_schedule.includes(tick_time));

        if synchronize_due
            && self
                .protocol
                .can_synchronize(SyncMode::Synchronize, &local_dns, &remote_dns)
        {
            self.run_work(SyncMode::Synchronize, local_dns, remote_dns, token)
                .await;
        } else if test_due
            && self
                .protocol
                .can_synchronize(SyncMode::TestOnly, &local_dns, &remote_dns)
        {
            self.run_work(SyncMode::TestOnly, local_dns, remote_dns, token)
                .await;
        }
    }

    async fn run_work(
        self: &Arc<Self>,
        mode: SyncMode,
        local_dns: ResourceNodeDnsResult,
        remote_dns: ResourceNodeDnsResult,
        token: &CancellationToken,
    ) {
        {
            let mut inner = self.inner.lock();
            if token.is_cancelled() {
                return;
            }
            inner.state = match mode {
                SyncMode::Synchronize => SynchronizerState::Synchronizing,
                SyncMode::TestOnly => SynchronizerState::Testing,
            };
            inner.state_message = None;
        }

        let timeout = match mode {
            SyncMode::Synchronize => self.resource.cron().synchronize_timeout(),
            SyncMode::TestOnly => self.resource.cron().test_timeout(),
        };
        let start_time = Utc::now();
        let timer = metrics::Timer::start();

        let protocol = self.protocol.clone();
        let work =
            tokio::spawn(async move { protocol.synchronize(mode, local_dns, remote_dns).await });

        let result = match tokio::time::timeout(timeout, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => self.error_result(mode, start_time, join_error.to_string()),
            Err(_elapsed) => {
                warn!(
                    resource = self.resource.id(),
                    remote = self.remote.node().id(),
                    %mode,
                    timeout_secs = timeout.as_secs(),
                    "synchronization timed out"
                );
                self.error_result(
                    mode,
                    start_time,
                    format!("timed out after {} seconds", timeout.as_secs()),
                )
            }
        };
        metrics::record_sync_run(
            self.resource.id(),
            mode,
            result.resource_status(),
            timer.elapsed(),
        );

        let mut inner = self.inner.lock();
        if token.is_cancelled() {
            return;
        }
        inner.state = SynchronizerState::Sleeping;
        inner.state_message = None;
        let new = Arc::new(result);
        let old = inner.last_result.replace(new.clone());
        self.save_last_result(&new);
        self.notifier.notify_sync(old, new);
    }

    /// Restores a previously saved result. Results currently live in memory
    /// only, so there is nothing to restore.
    fn load_last_result(&self) -> Option<Arc<SyncResult>> {
        None
    }

    /// Saves the last result for restoration after a restart. Reserved; not
    /// yet implemented.
    fn save_last_result(&self, _result: &SyncResult) {}

    /// The single-step error result used for timeouts and panics of the
    /// underlying synchronizer.
    fn error_result(&self, mode: SyncMode, start_time: DateTime<Utc>, error: String) -> SyncResult {
        SyncResult::new(
            self.local.clone(),
            self.remote.clone(),
            mode,
            vec![SyncStep::new(
                start_time,
                Utc::now(),
                ResourceStatus::Error,
                "future.get",
                vec![],
                vec![],
                vec![error],
            )],
        )
    }
}

fn truncate_to_minute(time: DateTime<Local>) -> DateTime<Local> {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .expect("0 is a valid second")
}

fn next_minute(now: DateTime<Local>) -> DateTime<Local> {
    truncate_to_minute(now + TimeDelta::minutes(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hickory_resolver::Name;

    use crate::config::{NameserverConfig, NodeConfig, ResourceNodeConfig};
    use crate::lookup::{ARecord, QueryError, RecordSource};
    use crate::topology::{Nameserver, Node};

    const NS1: &str = "ns1.example.com";

    /// Scripted record source keyed by record name.
    struct ScriptedSource {
        records: HashMap<String, Vec<ARecord>>,
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn query_a(
            &self,
            name: &Name,
            _nameserver: &Nameserver,
        ) -> Result<Vec<ARecord>, QueryError> {
            match self.records.get(&name.to_string()) {
                Some(records) => Ok(records.clone()),
                None => Err(QueryError::HostNotFound),
            }
        }
    }

    fn a(address: &str) -> ARecord {
        ARecord {
            address: address.parse().unwrap(),
            ttl: 300,
        }
    }

    /// Mock synchronizer recording the modes it was asked to run.
    struct MockSynchronizer {
        can: bool,
        calls: Mutex<Vec<SyncMode>>,
        delay: Option<std::time::Duration>,
    }

    impl MockSynchronizer {
        fn new(can: bool) -> Arc<Self> {
            Arc::new(Self {
                can,
                calls: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn slow(delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                can: true,
                calls: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl Synchronizer for MockSynchronizer {
        fn can_synchronize(
            &self,
            _mode: SyncMode,
            _local: &ResourceNodeDnsResult,
            _remote: &ResourceNodeDnsResult,
        ) -> bool {
            self.can
        }

        async fn synchronize(
            &self,
            mode: SyncMode,
            local: ResourceNodeDnsResult,
            remote: ResourceNodeDnsResult,
        ) -> SyncResult {
            self.calls.lock().push(mode);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let now = Utc::now();
            SyncResult::new(
                local.resource_node().clone(),
                remote.resource_node().clone(),
                mode,
                vec![SyncStep::new(
                    now,
                    now,
                    ResourceStatus::Healthy,
                    "mock run",
                    vec!["ok".to_string()],
                    vec![],
                    vec![],
                )],
            )
        }
    }

    struct Fixture {
        monitor: Arc<ResourceDnsMonitor>,
        resource: Arc<Resource>,
    }

    /// Cron expression that never fires during a test run.
    const NEVER: &str = "59 23 31 12 *";

    fn make_fixture(
        master_addresses: &[&str],
        remote_enabled: bool,
        sync_timeout: u64,
        schedule: &str,
    ) -> Fixture {
        let alpha = Arc::new(
            Node::from_config(
                true,
                &NodeConfig {
                    id: "alpha".to_string(),
                    enabled: true,
                    display: "Alpha".to_string(),
                    hostname: "alpha.example.com".to_string(),
                    username: "appsync".to_string(),
                    nameservers: vec![NameserverConfig {
                        hostname: NS1.to_string(),
                        strict_ttl: false,
                    }],
                },
            )
            .unwrap(),
        );
        let beta = Arc::new(
            Node::from_config(
                true,
                &NodeConfig {
                    id: "beta".to_string(),
                    enabled: remote_enabled,
                    display: "Beta".to_string(),
                    hostname: "beta.example.com".to_string(),
                    username: "appsync".to_string(),
                    nameservers: vec![NameserverConfig {
                        hostname: NS1.to_string(),
                        strict_ttl: false,
                    }],
                },
            )
            .unwrap(),
        );
        let resource = Resource::from_config(
            true,
            &ResourceConfig {
                id: "web".to_string(),
                enabled: true,
                display: "Web content".to_string(),
                rtype: "rsync".to_string(),
                master_records: vec!["m.x".to_string()],
                master_records_ttl: 300,
                allow_multi_master: false,
                synchronize_timeout: sync_timeout,
                test_timeout: sync_timeout,
                synchronize_schedule: schedule.to_string(),
                test_schedule: schedule.to_string(),
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
            },
            |id| match id {
                "alpha" => Some(alpha.clone()),
                "beta" => Some(beta.clone()),
                _ => None,
            },
        )
        .unwrap();

        let mut records = HashMap::new();
        records.insert(
            "m.x.".to_string(),
            master_addresses.iter().map(|addr| a(addr)).collect(),
        );
        records.insert("a.x.".to_string(), vec![a("10.0.0.1")]);
        records.insert("b.x.".to_string(), vec![a("10.0.0.2")]);

        let monitor = ResourceDnsMonitor::new(
            resource.clone(),
            true,
            Arc::new(ScriptedSource { records }),
            Notifier::new(),
        );
        Fixture { monitor, resource }
    }

    impl Fixture {
        fn scheduler(&self, protocol: Arc<dyn Synchronizer>) -> Arc<CronSynchronizer> {
            CronSynchronizer::new(
                self.resource.clone(),
                self.resource.resource_nodes()[0].clone(),
                self.resource.resource_nodes()[1].clone(),
                self.monitor.clone(),
                protocol,
                Notifier::new(),
                true,
            )
        }

        /// Runs the monitor until a real pass (with lookups) is published.
        async fn run_first_pass(&self) {
            self.monitor.start();
            for _ in 0..100 {
                if self.monitor.last_result().master_record_lookups().is_some() {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            panic!("monitor did not publish a pass in time");
        }
    }

    fn test_token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_tick_prefers_synchronize_over_test() {
        let fixture = make_fixture(&["10.0.0.1"], true, 60, "* * * * *");
        fixture.run_first_pass().await;
        let protocol = MockSynchronizer::new(true);
        let scheduler = fixture.scheduler(protocol.clone());

        // Both schedules are "* * * * *": both would fire on this tick. The
        // tick is driven directly so no background loop competes with it.
        scheduler
            .tick(truncate_to_minute(Local::now()), &test_token())
            .await;

        assert_eq!(*protocol.calls.lock(), vec![SyncMode::Synchronize]);
        assert_eq!(scheduler.state(), SynchronizerState::Sleeping);
        let result = scheduler.last_result().expect("a result was recorded");
        assert_eq!(result.mode(), SyncMode::Synchronize);
        assert_eq!(result.resource_status(), ResourceStatus::Healthy);
        fixture.monitor.stop();
    }

    #[tokio::test]
    async fn test_inconsistent_resource_blocks_tick() {
        // Multi-master with allow_multi_master = false: INCONSISTENT.
        let fixture = make_fixture(&["10.0.0.1", "10.0.0.2"], true, 60, "* * * * *");
        fixture.run_first_pass().await;
        assert_eq!(
            fixture.monitor.last_result().resource_status(Utc::now()),
            ResourceStatus::Inconsistent
        );

        let protocol = MockSynchronizer::new(true);
        let scheduler = fixture.scheduler(protocol.clone());

        scheduler
            .tick(truncate_to_minute(Local::now()), &test_token())
            .await;

        // No work was submitted, no result recorded.
        assert!(protocol.calls.lock().is_empty());
        assert!(scheduler.last_result().is_none());
        fixture.monitor.stop();
    }

    #[tokio::test]
    async fn test_plugin_veto_falls_back_to_nothing() {
        let fixture = make_fixture(&["10.0.0.1"], true, 60, "* * * * *");
        fixture.run_first_pass().await;
        let protocol = MockSynchronizer::new(false);
        let scheduler = fixture.scheduler(protocol.clone());

        scheduler
            .tick(truncate_to_minute(Local::now()), &test_token())
            .await;

        assert!(protocol.calls.lock().is_empty());
        assert!(scheduler.last_result().is_none());
        fixture.monitor.stop();
    }

    #[tokio::test]
    async fn test_forced_test_only_overrides_schedule() {
        // Schedules never fire: only the forced mode can trigger a run, and
        // a forced test must not turn into a synchronization.
        let fixture = make_fixture(&["10.0.0.1"], true, 60, NEVER);
        fixture.run_first_pass().await;
        let protocol = MockSynchronizer::new(true);
        let scheduler = fixture.scheduler(protocol.clone());

        scheduler.inner.lock().forced_mode = Some(SyncMode::TestOnly);
        scheduler
            .tick(truncate_to_minute(Local::now()), &test_token())
            .await;

        assert_eq!(*protocol.calls.lock(), vec![SyncMode::TestOnly]);
        // Forced mode is consumed by the tick.
        assert!(scheduler.inner.lock().forced_mode.is_none());
        fixture.monitor.stop();
    }

    #[tokio::test]
    async fn test_timeout_produces_error_result() {
        let fixture = make_fixture(&["10.0.0.1"], true, 0, "* * * * *");
        fixture.run_first_pass().await;
        let protocol = MockSynchronizer::slow(std::time::Duration::from_secs(600));
        let scheduler = fixture.scheduler(protocol);

        scheduler
            .tick(truncate_to_minute(Local::now()), &test_token())
            .await;

        let result = scheduler.last_result().expect("error result recorded");
        assert_eq!(result.resource_status(), ResourceStatus::Error);
        assert_eq!(result.steps().len(), 1);
        assert_eq!(result.steps()[0].description(), "future.get");
        assert!(!result.steps()[0].errors().is_empty());
        // The scheduler went back to sleeping despite the failure.
        assert_eq!(scheduler.state(), SynchronizerState::Sleeping);
        fixture.monitor.stop();
    }

    #[tokio::test]
    async fn test_start_with_disabled_remote_is_disabled() {
        let fixture = make_fixture(&["10.0.0.1"], false, 60, NEVER);
        let scheduler = fixture.scheduler(MockSynchronizer::new(true));
        scheduler.start();

        assert_eq!(scheduler.state(), SynchronizerState::Disabled);
        assert_eq!(
            scheduler.state_message().as_deref(),
            Some("remote node is disabled")
        );
        assert_eq!(scheduler.result_status(), ResourceStatus::Disabled);
    }

    #[tokio::test]
    async fn test_stop_clears_state_and_ignores_late_ticks() {
        let fixture = make_fixture(&["10.0.0.1"], true, 60, NEVER);
        fixture.run_first_pass().await;
        let protocol = MockSynchronizer::new(true);
        let scheduler = fixture.scheduler(protocol.clone());
        scheduler.start();
        let token = scheduler.inner.lock().job.as_ref().unwrap().0.clone();
        scheduler.stop();

        assert_eq!(scheduler.state(), SynchronizerState::Stopped);
        assert!(scheduler.last_result().is_none());

        // A tick racing with stop sees the cancelled token and does nothing,
        // even when forced.
        scheduler.inner.lock().forced_mode = Some(SyncMode::Synchronize);
        scheduler
            .tick(truncate_to_minute(Local::now()), &token)
            .await;
        assert!(protocol.calls.lock().is_empty());
        assert_eq!(scheduler.state(), SynchronizerState::Stopped);
        fixture.monitor.stop();
    }

    #[tokio::test]
    async fn test_result_status_is_starting_while_sleeping_without_result() {
        let fixture = make_fixture(&["10.0.0.1"], true, 60, NEVER);
        let scheduler = fixture.scheduler(MockSynchronizer::new(true));
        scheduler.start();
        assert_eq!(scheduler.result_status(), ResourceStatus::Starting);
        scheduler.stop();
        assert_eq!(scheduler.result_status(), ResourceStatus::Stopped);
    }

    #[test]
    fn test_minute_truncation() {
        let now = Local::now();
        let truncated = truncate_to_minute(now);
        assert_eq!(truncated.second(), 0);
        assert_eq!(truncated.nanosecond(), 0);
        let next = next_minute(now);
        assert!(next > now);
        assert_eq!(next.second(), 0);
    }
}
