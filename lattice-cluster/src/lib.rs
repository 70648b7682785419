mod bridge;
mod directory;
mod error;
mod failover;
mod member;

pub use bridge::{
    spawn_signal_drainer,
    GroupView,
    MemberSignal,
    MembershipBridge,
    MembershipObserver,
    Signal,
    SignalKind,
    StandaloneBridge,
};
pub use directory::{ClusterDirectory, StaticClusterDirectory};
pub use error::ClusterError;
pub use failover::{
    expand_host_ports,
    parse_locator_endpoints,
    EndpointSources,
    FailoverPolicy,
    LoadBalancingMode,
    DEFAULT_WEIGHT,
    ENDPOINTS_ENV,
    LB_POLICY_ENV,
};
pub use member::{ClusterMember, EndpointSet};
