use std::net::ToSocketAddrs;

use lattice_broker::SocketEndpoint;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use tracing::{debug, warn};

use crate::bridge::MembershipObserver;
use crate::error::ClusterError;
use crate::member::ClusterMember;

/// Weight assumed for every endpoint known only by address.
///
/// Bootstrap members and statically configured endpoints start at this
/// weight; membership updates carry the real per-member weights.
pub const DEFAULT_WEIGHT: u32 = 10;

/// Environment override for the bootstrap endpoint list, comma-separated
/// `host:port` tokens.
pub const ENDPOINTS_ENV: &str = "LATTICE_ENDPOINTS";

/// Environment toggle for the load-balancing mode, `weighted` or
/// `unweighted`.
pub const LB_POLICY_ENV: &str = "LATTICE_LB_POLICY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Whether membership updates keep their advertised weights or collapse to
/// plain round robin.
pub enum LoadBalancingMode {
    Weighted,
    /// Every member is forced to [`DEFAULT_WEIGHT`], making the rotation a
    /// uniform round robin.
    Unweighted,
}

impl LoadBalancingMode {
    /// Reads the mode from [`LB_POLICY_ENV`] once. The value is passed to
    /// the policy constructor explicitly; nothing is written back to the
    /// environment.
    pub fn from_env() -> Self {
        match std::env::var(LB_POLICY_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("weighted") => {
                LoadBalancingMode::Weighted
            },
            _ => LoadBalancingMode::Unweighted,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Where bootstrap endpoints may come from, in precedence order: explicit
/// runtime list, environment override, provider URL, host/port pair, hard
/// default.
pub struct EndpointSources {
    pub explicit: Vec<String>,
    pub env: Option<String>,
    pub provider_url: Option<String>,
    pub host_port: Option<(String, u16)>,
    /// Whether the hard default (`DEFAULT_HOST:DEFAULT_PORT`) backstops the
    /// chain.
    pub use_default: bool,
}

impl EndpointSources {
    /// Sources seeded from the process environment.
    pub fn from_env() -> Self {
        Self {
            env: std::env::var(ENDPOINTS_ENV).ok(),
            use_default: true,
            ..Self::default()
        }
    }

    pub fn with_explicit(mut self, endpoints: impl IntoIterator<Item = String>) -> Self {
        self.explicit = endpoints.into_iter().collect();
        self
    }

    /// Walks the precedence chain and returns the first non-empty endpoint
    /// list. All sources empty is fatal.
    pub fn resolve(&self) -> Result<Vec<String>, ClusterError> {
        if !self.explicit.is_empty() {
            return Ok(self.explicit.clone());
        }

        if let Some(env) = self.env.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(env
                .split(',')
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
                .collect());
        }

        if let Some(url) = &self.provider_url {
            let endpoints = parse_locator_endpoints(url);
            if !endpoints.is_empty() {
                warn!(url = %url, "No endpoints configured, falling back to the provider URL.");
                return Ok(endpoints);
            }
        }

        if let Some((host, port)) = &self.host_port {
            let endpoints = expand_host_ports(host, *port);
            if !endpoints.is_empty() {
                return Ok(endpoints);
            }
        }

        if self.use_default {
            return Ok(vec![format!(
                "{}:{}",
                lattice_broker::DEFAULT_HOST,
                lattice_broker::DEFAULT_PORT
            )]);
        }

        Err(ClusterError::NoEndpoints)
    }
}

/// Extracts `host:port` tokens from a locator-style provider URL and
/// expands each host to all of its addresses.
///
/// Accepts both the full `locator:lrpc:1.0@host:port/Service` form and a
/// bare scheme-prefixed endpoint list.
pub fn parse_locator_endpoints(url: &str) -> Vec<String> {
    let trimmed = url.strip_prefix("locator:").unwrap_or(url);
    let trimmed = trimmed.rsplit_once('/').map(|(head, _)| head).unwrap_or(trimmed);

    let mut endpoints = Vec::new();
    for token in trimmed.split(',') {
        let address = token.rsplit_once('@').map(|(_, tail)| tail).unwrap_or(token);
        let address = address.trim();
        if address.is_empty() {
            continue;
        }

        match SocketEndpoint::parse_clear_text(address) {
            Ok(ep) => endpoints.extend(expand_host_ports(&ep.host, ep.port)),
            Err(e) => warn!(url = %url, error = %e, "Skipping malformed provider URL token."),
        }
    }
    endpoints
}

/// All `ip:port` addresses a hostname resolves to, for multi-homed hosts.
pub fn expand_host_ports(host: &str, port: u16) -> Vec<String> {
    match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.map(|addr| addr.to_string()).collect(),
        Err(e) => {
            warn!(host = %host, error = %e, "Unknown host, no endpoints resolved.");
            Vec::new()
        },
    }
}

struct FailoverState {
    members: Vec<ClusterMember>,
    total_weight: u64,
    /// Admin-configured endpoints that survive membership churn.
    static_endpoints: Vec<SocketEndpoint>,
}

/// Client-side weighted round robin over the known cluster endpoints.
///
/// Selection and updates serialize on one mutex per policy instance, so a
/// `select` always observes a fully-applied prior update. The policy is
/// stateful: each selection commits its rotation as the new member order.
pub struct FailoverPolicy {
    mode: LoadBalancingMode,
    state: Mutex<FailoverState>,
}

impl FailoverPolicy {
    /// Builds the policy from the resolved bootstrap endpoints.
    ///
    /// The resolved list is permuted once so clients do not all favor
    /// configuration order; every endpoint starts at [`DEFAULT_WEIGHT`].
    /// Endpoints supplied here are regarded as a permanent part of the
    /// cluster.
    pub fn new(
        sources: &EndpointSources,
        mode: LoadBalancingMode,
    ) -> Result<Self, ClusterError> {
        let mut resolved = sources.resolve()?;
        if resolved.is_empty() {
            return Err(ClusterError::NoEndpoints);
        }
        resolved.shuffle(&mut thread_rng());
        debug!(endpoints = ?resolved, "Seeded failover policy.");

        let mut static_endpoints = Vec::with_capacity(resolved.len());
        for raw in &resolved {
            static_endpoints.push(SocketEndpoint::parse_clear_text(raw)?);
        }

        let members: Vec<ClusterMember> = static_endpoints
            .iter()
            .map(|ep| ClusterMember::new("", DEFAULT_WEIGHT, [ep.clone()]))
            .collect();
        let total_weight = members.iter().map(|m| m.weight as u64).sum();

        Ok(Self {
            mode,
            state: Mutex::new(FailoverState {
                members,
                total_weight,
                static_endpoints,
            }),
        })
    }

    #[inline]
    pub fn mode(&self) -> LoadBalancingMode {
        self.mode
    }

    /// The permanent bootstrap endpoints, post-permutation.
    pub fn resolved_endpoints(&self) -> Vec<String> {
        let state = self.state.lock();
        state.static_endpoints.iter().map(|ep| ep.address()).collect()
    }

    /// The current member order, for introspection.
    pub fn snapshot(&self) -> Vec<ClusterMember> {
        self.state.lock().members.clone()
    }

    pub fn total_weight(&self) -> u64 {
        self.state.lock().total_weight
    }

    /// Picks a member by weighted draw and returns the full endpoint set
    /// rotated so the chosen member leads.
    ///
    /// The draw is `r` uniform in `(0, total_weight]`; member `i` wins iff
    /// `lower < r <= lower + weight(i)`, so boundary ties resolve upward
    /// consistently. The rotation `members[i..] + members[..i]` is committed
    /// back so the round robin continues from the new head. Only clear-text
    /// endpoints appear in the result; secure endpoints are not part of the
    /// bootstrap rediscovery channel.
    pub fn select(&self) -> Vec<String> {
        let mut state = self.state.lock();
        if state.members.is_empty() {
            return Vec::new();
        }

        let chosen = if state.total_weight == 0 {
            // All-zero weights would make the interval walk undrawable;
            // degrade to a uniform pick.
            thread_rng().gen_range(0..state.members.len())
        } else {
            let r = thread_rng().gen_range(1..=state.total_weight);
            let mut lower = 0u64;
            let mut chosen = state.members.len() - 1;
            for (i, member) in state.members.iter().enumerate() {
                let upper = lower + member.weight as u64;
                if lower < r && r <= upper {
                    chosen = i;
                    break;
                }
                lower = upper;
            }
            chosen
        };

        state.members.rotate_left(chosen);

        let mut rotation = Vec::new();
        for member in &state.members {
            for endpoint in member.clear_text_endpoints() {
                let address = endpoint.address();
                if !rotation.contains(&address) {
                    rotation.push(address);
                }
            }
        }
        rotation
    }

    /// Replaces the member list from a membership update.
    ///
    /// Weights are kept or collapsed per the configured mode, then the
    /// permanent static endpoints are merged back in: any static address not
    /// already present among the new members' clear-text endpoints is
    /// appended as a default-weight single-endpoint member. The total weight
    /// is recomputed over the merged list.
    pub fn set_members(&self, new_members: Vec<ClusterMember>) {
        let mut merged: Vec<ClusterMember> = new_members
            .into_iter()
            .map(|member| {
                let weight = match self.mode {
                    LoadBalancingMode::Weighted => member.weight,
                    LoadBalancingMode::Unweighted => DEFAULT_WEIGHT,
                };
                ClusterMember { weight, ..member }
            })
            .collect();

        let mut state = self.state.lock();
        for endpoint in &state.static_endpoints {
            let present = merged
                .iter()
                .any(|m| m.has_clear_text_address(&endpoint.host, endpoint.port));
            if !present {
                merged.push(ClusterMember::new(
                    "",
                    DEFAULT_WEIGHT,
                    [endpoint.clone()],
                ));
            }
        }

        state.total_weight = merged.iter().map(|m| m.weight as u64).sum();
        debug!(
            num_members = merged.len(),
            total_weight = state.total_weight,
            "Applied membership update."
        );
        state.members = merged;
    }
}

impl MembershipObserver for FailoverPolicy {
    fn on_membership_change(&self, members: Vec<ClusterMember>) {
        self.set_members(members);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use lattice_broker::{EndpointKind, SocketEndpoint};

    use super::*;

    fn explicit(endpoints: &[&str]) -> EndpointSources {
        EndpointSources::default()
            .with_explicit(endpoints.iter().map(|s| s.to_string()))
    }

    fn policy(endpoints: &[&str], mode: LoadBalancingMode) -> FailoverPolicy {
        FailoverPolicy::new(&explicit(endpoints), mode).expect("Construction OK")
    }

    fn addresses(members: &[ClusterMember]) -> Vec<String> {
        members
            .iter()
            .flat_map(|m| m.clear_text_endpoints().map(|ep| ep.address()))
            .collect()
    }

    #[test]
    fn test_no_endpoints_anywhere_is_fatal() {
        let err = FailoverPolicy::new(
            &EndpointSources::default(),
            LoadBalancingMode::Unweighted,
        )
        .map(|_| ())
        .unwrap_err();
        assert!(matches!(err, ClusterError::NoEndpoints));
    }

    #[test]
    fn test_source_precedence() {
        let mut sources = explicit(&["a:1"]);
        sources.env = Some("b:2".to_string());
        assert_eq!(sources.resolve().unwrap(), vec!["a:1"]);

        sources.explicit.clear();
        assert_eq!(sources.resolve().unwrap(), vec!["b:2"]);

        sources.env = None;
        sources.host_port = Some(("localhost".to_string(), 4700));
        let resolved = sources.resolve().unwrap();
        assert!(resolved.iter().all(|ep| ep.ends_with(":4700")));

        sources.host_port = None;
        sources.use_default = true;
        assert_eq!(
            sources.resolve().unwrap(),
            vec![format!(
                "{}:{}",
                lattice_broker::DEFAULT_HOST,
                lattice_broker::DEFAULT_PORT
            )],
        );
    }

    #[test]
    fn test_env_list_is_split_and_trimmed() {
        let sources = EndpointSources {
            env: Some(" a:1 , b:2 ,".to_string()),
            ..EndpointSources::default()
        };
        assert_eq!(sources.resolve().unwrap(), vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_provider_url_parsing() {
        let endpoints =
            parse_locator_endpoints("locator:lrpc:1.0@localhost:4700/Directory");
        assert!(!endpoints.is_empty());
        assert!(endpoints.iter().all(|ep| ep.ends_with(":4700")));

        assert!(parse_locator_endpoints("locator:/Directory").is_empty());
    }

    #[test]
    fn test_construction_permutes_but_preserves_set() {
        let endpoints = ["a:1", "b:2", "c:3", "d:4"];
        let policy = policy(&endpoints, LoadBalancingMode::Unweighted);

        let resolved: BTreeSet<String> =
            policy.resolved_endpoints().into_iter().collect();
        let expected: BTreeSet<String> =
            endpoints.iter().map(|s| s.to_string()).collect();
        assert_eq!(resolved, expected);
        assert_eq!(policy.total_weight(), 4 * DEFAULT_WEIGHT as u64);
    }

    #[test]
    fn test_select_returns_committed_rotation() {
        let policy = policy(&["a:1", "b:2", "c:3"], LoadBalancingMode::Unweighted);

        for _ in 0..10 {
            let before = addresses(&policy.snapshot());
            let rotation = policy.select();

            assert_eq!(rotation.len(), before.len());
            let pivot = before
                .iter()
                .position(|addr| addr == &rotation[0])
                .expect("Chosen member is a known member");
            let mut expected = before[pivot..].to_vec();
            expected.extend_from_slice(&before[..pivot]);
            assert_eq!(rotation, expected);

            // The rotation is committed as the new order.
            assert_eq!(addresses(&policy.snapshot()), rotation);
        }
    }

    #[test]
    fn test_equal_weights_split_roughly_evenly() {
        let policy = policy(&["a:1000", "b:1001"], LoadBalancingMode::Unweighted);

        let mut first_count = 0;
        for _ in 0..1000 {
            let rotation = policy.select();
            if rotation[0] == "a:1000" {
                first_count += 1;
            }
        }

        assert!(
            (450..=550).contains(&first_count),
            "expected ~50% split, got {first_count}/1000",
        );
    }

    #[test]
    fn test_weighted_draw_follows_weights() {
        let policy = policy(&["seed:1"], LoadBalancingMode::Weighted);
        policy.set_members(vec![
            ClusterMember::new(
                "light",
                10,
                [SocketEndpoint::new(EndpointKind::ClearText, "light", 1)],
            ),
            ClusterMember::new(
                "heavy",
                30,
                [SocketEndpoint::new(EndpointKind::ClearText, "heavy", 2)],
            ),
        ]);

        let trials = 2000;
        let mut heavy_first = 0;
        for _ in 0..trials {
            if policy.select()[0] == "heavy:2" {
                heavy_first += 1;
            }
        }

        // heavy carries 30 of 50 total weight (the seed endpoint keeps its
        // default 10), expect ~60% of draws.
        let share = heavy_first as f64 / trials as f64;
        assert!(
            (0.52..=0.68).contains(&share),
            "expected ~0.60 share, got {share}",
        );
    }

    #[test]
    fn test_unweighted_mode_flattens_weights() {
        let policy = policy(&["seed:1"], LoadBalancingMode::Unweighted);
        policy.set_members(vec![ClusterMember::new(
            "a",
            99,
            [SocketEndpoint::new(EndpointKind::ClearText, "a", 1)],
        )]);

        let snapshot = policy.snapshot();
        assert!(snapshot.iter().all(|m| m.weight == DEFAULT_WEIGHT));
        assert_eq!(policy.total_weight(), snapshot.len() as u64 * 10);
    }

    #[test]
    fn test_static_endpoints_survive_churn() {
        let policy = policy(&["static:9"], LoadBalancingMode::Weighted);
        policy.set_members(vec![ClusterMember::new(
            "a",
            5,
            [SocketEndpoint::new(EndpointKind::ClearText, "a", 1)],
        )]);

        let rotation = policy.select();
        assert!(rotation.contains(&"a:1".to_string()));
        assert!(rotation.contains(&"static:9".to_string()));

        // Total weight covers the merged-in static member too.
        assert_eq!(policy.total_weight(), 5 + DEFAULT_WEIGHT as u64);
    }

    #[test]
    fn test_static_endpoint_not_duplicated_when_advertised() {
        let policy = policy(&["a:1"], LoadBalancingMode::Weighted);
        policy.set_members(vec![ClusterMember::new(
            "a",
            20,
            [SocketEndpoint::new(EndpointKind::ClearText, "a", 1)],
        )]);

        let snapshot = policy.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].weight, 20);
        assert_eq!(policy.total_weight(), 20);
    }

    #[test]
    fn test_update_is_idempotent() {
        let policy = policy(&["static:9"], LoadBalancingMode::Weighted);
        let update = vec![
            ClusterMember::new(
                "a",
                5,
                [SocketEndpoint::new(EndpointKind::ClearText, "a", 1)],
            ),
            ClusterMember::new(
                "b",
                15,
                [SocketEndpoint::new(EndpointKind::ClearText, "b", 2)],
            ),
        ];

        policy.set_members(update.clone());
        let first: BTreeSet<String> = addresses(&policy.snapshot()).into_iter().collect();
        let first_total = policy.total_weight();

        policy.set_members(update);
        let second: BTreeSet<String> =
            addresses(&policy.snapshot()).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first_total, policy.total_weight());
    }

    #[test]
    fn test_secure_endpoints_excluded_from_rotation() {
        let policy = policy(&["seed:1"], LoadBalancingMode::Weighted);
        policy.set_members(vec![
            ClusterMember::new(
                "mixed",
                10,
                [
                    SocketEndpoint::new(EndpointKind::Ssl, "mixed", 443),
                    SocketEndpoint::new(EndpointKind::ClearText, "mixed", 80),
                ],
            ),
            ClusterMember::new(
                "secure-only",
                10,
                [SocketEndpoint::new(EndpointKind::SslMutualAuth, "vault", 443)],
            ),
        ]);

        let rotation = policy.select();
        assert!(rotation.contains(&"mixed:80".to_string()));
        assert!(!rotation.iter().any(|ep| ep.contains("443")));
        assert!(!rotation.iter().any(|ep| ep.starts_with("vault")));
    }

    #[test]
    fn test_all_zero_weights_still_rotate() {
        let policy = policy(&["seed:1"], LoadBalancingMode::Weighted);
        policy.set_members(vec![ClusterMember::new(
            "a",
            0,
            [SocketEndpoint::new(EndpointKind::ClearText, "a", 1)],
        )]);
        // The static seed is merged back with its default weight; force the
        // degenerate case by replacing it too.
        {
            let mut members = policy.snapshot();
            for member in &mut members {
                member.weight = 0;
            }
            policy.set_members(members);
        }

        assert_eq!(policy.total_weight(), 0);
        let rotation = policy.select();
        assert_eq!(rotation.len(), 2);
    }
}
