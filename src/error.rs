//! Error types for shepherd-dns.

use thiserror::Error;

/// Errors that can occur while configuring or running a cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Invalid or inconsistent configuration. Raised from `start()` and
    /// configuration reloads; the cluster refuses to (re)start until fixed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read or parsed.
    #[error("configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// A DNS record name in the configuration failed to parse.
    #[error("invalid DNS name {name:?}: {reason}")]
    InvalidName {
        /// The offending name as written in the configuration.
        name: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A cron expression in the configuration failed to parse.
    #[error("invalid schedule {expression:?}: {reason}")]
    InvalidSchedule {
        /// The offending cron expression.
        expression: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// IO error (file watching, socket setup).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Shorthand for a [`ClusterError::Config`] with a formatted message.
    pub fn config(message: impl Into<String>) -> Self {
        ClusterError::Config(message.into())
    }
}
