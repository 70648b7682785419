use std::io;

use thiserror::Error;

use lattice_broker::InvalidEndpoint;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no cluster endpoints could be resolved from any configured source")]
    /// Every endpoint source (explicit list, environment, provider URL,
    /// host/port pair, default) came up empty. A failover policy is never
    /// allowed to exist without endpoints.
    NoEndpoints,

    #[error(transparent)]
    /// An endpoint string failed to parse as `host:port`.
    InvalidEndpoint(#[from] InvalidEndpoint),

    #[error("failed to acquire membership signal for `{member}`: {reason}")]
    /// The membership service refused to hand over a signal.
    SignalAcquire { member: String, reason: String },

    #[error("{0}")]
    /// An IO error has occurred.
    Io(#[from] io::Error),
}
