use std::collections::BTreeMap;

use crate::member::ClusterMember;

/// Read-only lookup of statically configured cluster members.
///
/// Join signals only carry a member name; the full endpoint/weight record is
/// resolved by cross-referencing the admin-supplied cluster configuration.
pub trait ClusterDirectory: Send + Sync {
    /// The configured record for a member name, if one exists.
    fn member_info(&self, name: &str) -> Option<ClusterMember>;

    /// Every configured member assumed reachable at startup.
    fn initial_members(&self) -> Vec<ClusterMember>;
}

#[derive(Debug, Default)]
/// A fixed member table parsed from configuration at startup.
pub struct StaticClusterDirectory {
    members: BTreeMap<String, ClusterMember>,
}

impl StaticClusterDirectory {
    pub fn new(members: impl IntoIterator<Item = ClusterMember>) -> Self {
        Self {
            members: members
                .into_iter()
                .map(|m| (m.name.clone(), m))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl ClusterDirectory for StaticClusterDirectory {
    fn member_info(&self, name: &str) -> Option<ClusterMember> {
        self.members.get(name).cloned()
    }

    fn initial_members(&self) -> Vec<ClusterMember> {
        self.members.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let directory = StaticClusterDirectory::new([
            ClusterMember::from_host_port("node-a:4700", 10).unwrap(),
            ClusterMember::new("b", 20, []),
        ]);

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.member_info("b").unwrap().weight, 20);
        assert!(directory.member_info("missing").is_none());
        assert_eq!(directory.initial_members().len(), 2);
    }
}
