use lattice_broker::{EndpointKind, InvalidEndpoint, SocketEndpoint};
use smallvec::SmallVec;

/// Endpoint list of a member; most machines expose one or two listeners.
pub type EndpointSet = SmallVec<[SocketEndpoint; 2]>;

#[derive(Clone, Debug, Eq, PartialEq)]
/// A cluster member as advertised to failover clients.
///
/// Identity is the `name`. Members are rebuilt wholesale on every membership
/// change or configuration parse and never mutated in place. The endpoint
/// list is ordered and supports multi-homed machines.
pub struct ClusterMember {
    pub name: String,
    /// Relative failover preference, `>= 0`.
    pub weight: u32,
    pub endpoints: EndpointSet,
}

impl ClusterMember {
    pub fn new(
        name: impl Into<String>,
        weight: u32,
        endpoints: impl IntoIterator<Item = SocketEndpoint>,
    ) -> Self {
        Self {
            name: name.into(),
            weight,
            endpoints: endpoints.into_iter().collect(),
        }
    }

    /// A single-endpoint bootstrap member parsed from `host:port`.
    ///
    /// Bootstrap members carry an empty name and a clear-text endpoint; the
    /// first membership update replaces them with full records.
    pub fn from_host_port(raw: &str, weight: u32) -> Result<Self, InvalidEndpoint> {
        let endpoint = SocketEndpoint::parse_clear_text(raw)?;
        Ok(Self::new("", weight, [endpoint]))
    }

    /// The member's clear-text endpoints, in advertised order.
    pub fn clear_text_endpoints(&self) -> impl Iterator<Item = &SocketEndpoint> {
        self.endpoints
            .iter()
            .filter(|ep| ep.kind == EndpointKind::ClearText)
    }

    /// Whether any clear-text endpoint matches the given address.
    pub fn has_clear_text_address(&self, host: &str, port: u16) -> bool {
        self.clear_text_endpoints()
            .any(|ep| ep.matches_address(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_member() {
        let member = ClusterMember::from_host_port("node-a:4700", 10).unwrap();
        assert_eq!(member.name, "");
        assert_eq!(member.weight, 10);
        assert!(member.has_clear_text_address("node-a", 4700));
        assert!(!member.has_clear_text_address("node-a", 4701));
    }

    #[test]
    fn test_clear_text_filtering() {
        let member = ClusterMember::new(
            "a",
            10,
            [
                SocketEndpoint::new(EndpointKind::Ssl, "node-a", 4801),
                SocketEndpoint::new(EndpointKind::ClearText, "node-a", 4700),
            ],
        );
        let clear: Vec<_> = member.clear_text_endpoints().collect();
        assert_eq!(clear.len(), 1);
        assert_eq!(clear[0].port, 4700);
        assert!(!member.has_clear_text_address("node-a", 4801));
    }
}
