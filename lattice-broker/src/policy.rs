#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How invocation arguments travel between collocated caller and target.
pub enum CopySemantics {
    ByValue,
    ByReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single invocation policy attached to a reference factory.
///
/// Policies are plain values composed into an ordered list, there is no
/// runtime type scanning involved in discovering them.
pub enum Policy {
    /// Adapt inbound calls to the transaction machinery.
    Transaction,
    /// Establish the security context of the owning type for each call.
    SecurityContext { owner_type_id: u64 },
    /// Funnel this type's calls onto a dedicated worker pool.
    ThreadPoolAffinity { pool_id: u16 },
    /// Argument copy semantics for collocated dispatch.
    CopySemantics(CopySemantics),
    /// Force the clear-text port of issued references to 0 because the type
    /// only permits secured access paths.
    ZeroClearTextPort,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// The ordered, immutable policy list assigned at factory creation.
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    pub fn push(&mut self, policy: Policy) {
        self.policies.push(policy);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Whether issued references must have their clear-text port zeroed.
    pub fn requires_zero_port(&self) -> bool {
        self.policies
            .iter()
            .any(|p| matches!(p, Policy::ZeroClearTextPort))
    }

    /// The numeric worker-pool id, if an affinity policy is present.
    pub fn thread_pool(&self) -> Option<u16> {
        self.policies.iter().find_map(|p| match p {
            Policy::ThreadPoolAffinity { pool_id } => Some(*pool_id),
            _ => None,
        })
    }

    /// Copy semantics for collocated calls, pass-by-value unless overridden.
    pub fn copy_semantics(&self) -> CopySemantics {
        self.policies
            .iter()
            .find_map(|p| match p {
                Policy::CopySemantics(semantics) => Some(*semantics),
                _ => None,
            })
            .unwrap_or(CopySemantics::ByValue)
    }
}

impl FromIterator<Policy> for PolicySet {
    fn from_iter<I: IntoIterator<Item = Policy>>(iter: I) -> Self {
        Self {
            policies: iter.into_iter().collect(),
        }
    }
}
