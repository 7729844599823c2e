//! shepherd-dns - An application-level cluster coordinator driven by DNS.
//!
//! Several machines ("nodes") each run the coordinator and cooperate to
//! operate a set of "resources" whose active master is advertised via
//! public DNS A records. The coordinator never changes DNS itself: it
//! observes the records from every participating node's nameservers,
//! decides which node is currently master for each resource, flags
//! inconsistent states, and drives scheduled synchronization and test runs
//! between the local node and every remote node.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          shepherd-dns                             │
//! │                                                                   │
//! │  ┌───────────────┐ reload  ┌─────────┐                            │
//! │  │ ConfigProvider│────────▶│ Cluster │ builds nodes + resources   │
//! │  └───────────────┘         └────┬────┘                            │
//! │                                 │ per resource                    │
//! │                ┌────────────────┴──────────────┐                  │
//! │                ▼                               ▼                  │
//! │     ┌────────────────────┐        ┌─────────────────────────┐     │
//! │     │ ResourceDnsMonitor │───────▶│ CronSynchronizer (per   │     │
//! │     │ (30 s DNS passes)  │ latest │ remote node, cron ticks)│     │
//! │     └─────────┬──────────┘ result └───────────┬─────────────┘     │
//! │               │ A queries                     │ runs              │
//! │               ▼                               ▼                   │
//! │        nameservers (UDP/TCP)        Synchronizer plugin           │
//! │                                     (rsync, csync2, ...)          │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Role resolution
//!
//! ```text
//! master record m.x ──▶ [10.0.0.1]        (same on every nameserver)
//! node record  a.x ──▶ [10.0.0.1]  ⊆ master addresses  →  MASTER
//! node record  b.x ──▶ [10.0.0.2]  ⊄ master addresses  →  SLAVE
//! ```
//!
//! Disagreement between nameservers, duplicate node addresses, forbidden
//! multi-master answers, or master addresses pointing outside the cluster
//! all escalate to an inconsistent status, which blocks synchronization
//! until DNS settles.

#![warn(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod listener;
pub mod lookup;
pub mod metrics;
pub mod monitor;
pub mod results;
mod roles;
pub mod status;
pub mod sync;
pub mod telemetry;
pub mod topology;

// Re-export main types
pub use cluster::{Cluster, ResourceRuntime};
pub use config::{Config, ConfigProvider, FileConfigProvider, MemoryConfigProvider};
pub use error::ClusterError;
pub use listener::{LogResourceListener, Notifier, ResourceListener};
pub use lookup::{RecordSource, ResolverPool};
pub use monitor::ResourceDnsMonitor;
pub use results::{DnsLookupResult, ResourceDnsResult, ResourceNodeDnsResult, SyncResult, SyncStep};
pub use status::{
    DnsLookupStatus, MasterDnsStatus, NodeDnsStatus, ResourceStatus, SyncMode, SynchronizerState,
};
pub use sync::{CronSynchronizer, Synchronizer, SynchronizerFactory, SynchronizerRegistry};
pub use topology::{Nameserver, Node, Resource, ResourceNode};
