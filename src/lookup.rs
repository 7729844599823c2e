//! Single-shot A-record lookups against explicit nameservers.
//!
//! The resolver side is abstracted behind [`RecordSource`] so the monitor
//! can be driven by a scripted source in tests. The production source,
//! [`ResolverPool`], keeps one hickory resolver per nameserver with caching
//! disabled and no search path, so every query reflects what that
//! nameserver currently serves.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::{Name, TokioAsyncResolver};
use tracing::{debug, trace};

use crate::monitor::{DNS_ATTEMPTS, DNS_CHECK_TIMEOUT};
use crate::results::DnsLookupResult;
use crate::status::DnsLookupStatus;
use crate::topology::Nameserver;

/// One A record as returned by a nameserver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ARecord {
    /// The address.
    pub address: Ipv4Addr,
    /// The record's TTL in seconds.
    pub ttl: u32,
}

/// Raw failure of one query attempt, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The name does not exist (NXDOMAIN).
    HostNotFound,
    /// The name exists but carries no A records.
    TypeNotFound,
    /// Transient failure; the attempt may be retried.
    TryAgain,
    /// Permanent server or network failure.
    Unrecoverable(String),
    /// Anything else.
    Other(String),
}

/// Issues raw A-record queries against a specific nameserver.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Queries the A records of `name` at `nameserver`. An empty vector
    /// means the query succeeded but returned no records.
    async fn query_a(&self, name: &Name, nameserver: &Nameserver)
        -> Result<Vec<ARecord>, QueryError>;
}

/// Performs one classified lookup: up to [`DNS_ATTEMPTS`] attempts,
/// retrying only on transient failures, then maps the outcome to a
/// [`DnsLookupResult`].
///
/// `master_ttl` is `Some` when `name` is a master record of the resource;
/// TTL checking only applies then. With `strict_ttl` on the nameserver the
/// TTL must match exactly, otherwise it must be in `1..=master_ttl`.
/// Unexpected TTLs downgrade the result to a warning but keep the
/// addresses.
pub async fn lookup(
    source: &dyn RecordSource,
    name: &Name,
    nameserver: &Nameserver,
    master_ttl: Option<u32>,
) -> DnsLookupResult {
    for _attempt in 0..DNS_ATTEMPTS {
        let outcome = source.query_a(name, nameserver).await;
        trace!(record = %name, nameserver = %nameserver, ?outcome, "dns lookup attempt");
        match outcome {
            Ok(records) => return classify_records(name, nameserver, &records, master_ttl),
            Err(QueryError::TryAgain) => continue,
            Err(QueryError::HostNotFound) => {
                return DnsLookupResult::new(name.clone(), DnsLookupStatus::HostNotFound, [], [])
            }
            Err(QueryError::TypeNotFound) => {
                return DnsLookupResult::new(name.clone(), DnsLookupStatus::TypeNotFound, [], [])
            }
            Err(QueryError::Unrecoverable(message)) => {
                return DnsLookupResult::new(
                    name.clone(),
                    DnsLookupStatus::Unrecoverable,
                    [message],
                    [],
                )
            }
            Err(QueryError::Other(message)) => {
                return DnsLookupResult::new(name.clone(), DnsLookupStatus::Error, [message], [])
            }
        }
    }
    DnsLookupResult::new(name.clone(), DnsLookupStatus::TryAgain, [], [])
}

/// Classifies a successful query, applying the master-record TTL policy.
fn classify_records(
    name: &Name,
    nameserver: &Nameserver,
    records: &[ARecord],
    master_ttl: Option<u32>,
) -> DnsLookupResult {
    if records.is_empty() {
        return DnsLookupResult::new(name.clone(), DnsLookupStatus::HostNotFound, [], []);
    }

    let mut messages = Vec::new();
    let mut addresses = Vec::with_capacity(records.len());
    for record in records {
        if let Some(expected) = master_ttl {
            if nameserver.strict_ttl() {
                if record.ttl != expected {
                    messages.push(format!(
                        "unexpected TTL {}, expected exactly {expected}",
                        record.ttl
                    ));
                }
            } else if record.ttl == 0 || record.ttl > expected {
                messages.push(format!(
                    "unexpected TTL {}, expected 1..={expected}",
                    record.ttl
                ));
            }
        }
        addresses.push(record.address.to_string());
    }

    let status = if messages.is_empty() {
        DnsLookupStatus::Successful
    } else {
        DnsLookupStatus::Warning
    };
    DnsLookupResult::new(name.clone(), status, messages, addresses)
}

/// Production [`RecordSource`]: one memoized hickory resolver per
/// nameserver. Owned by the cluster and rebuilt on every (re)start.
pub struct ResolverPool {
    resolvers: tokio::sync::Mutex<HashMap<Name, Arc<TokioAsyncResolver>>>,
}

impl ResolverPool {
    /// Creates an empty pool; resolvers are built lazily per nameserver.
    pub fn new() -> Self {
        Self {
            resolvers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn resolver_for(&self, nameserver: &Nameserver) -> Result<Arc<TokioAsyncResolver>, QueryError> {
        let mut resolvers = self.resolvers.lock().await;
        if let Some(resolver) = resolvers.get(nameserver.hostname()) {
            return Ok(resolver.clone());
        }

        // The nameserver itself is named by hostname; resolve it through the
        // system resolver once, then pin the pool resolver to that address.
        let target = format!("{}:53", nameserver.hostname().to_utf8().trim_end_matches('.'));
        let address: SocketAddr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| QueryError::Unrecoverable(format!("cannot resolve nameserver {target}: {e}")))?
            .find(|addr| matches!(addr.ip(), IpAddr::V4(_)))
            .ok_or_else(|| {
                QueryError::Unrecoverable(format!("no IPv4 address for nameserver {target}"))
            })?;

        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(address, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        opts.timeout = DNS_CHECK_TIMEOUT;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;
        opts.try_tcp_on_error = true;

        let resolver = Arc::new(TokioAsyncResolver::tokio(config, opts));
        debug!(nameserver = %nameserver, address = %address, "created resolver");
        resolvers.insert(nameserver.hostname().clone(), resolver.clone());
        Ok(resolver)
    }
}

impl Default for ResolverPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordSource for ResolverPool {
    async fn query_a(
        &self,
        name: &Name,
        nameserver: &Nameserver,
    ) -> Result<Vec<ARecord>, QueryError> {
        let resolver = self.resolver_for(nameserver).await?;
        match resolver.lookup(name.clone(), RecordType::A).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter_map(|record| match record.data() {
                    Some(RData::A(a)) => Some(ARecord {
                        address: a.0,
                        ttl: record.ttl(),
                    }),
                    _ => None,
                })
                .collect()),
            Err(e) => Err(match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. } => match response_code {
                    ResponseCode::NXDomain => QueryError::HostNotFound,
                    ResponseCode::NoError => QueryError::TypeNotFound,
                    ResponseCode::ServFail => QueryError::Unrecoverable(e.to_string()),
                    _ => QueryError::Unrecoverable(e.to_string()),
                },
                ResolveErrorKind::Timeout | ResolveErrorKind::NoConnections => QueryError::TryAgain,
                _ => QueryError::Other(e.to_string()),
            }),
        }
    }
}
