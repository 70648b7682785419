use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::broker::BrokerHandle;
use crate::endpoint::{EndpointKind, SocketEndpoint};
use crate::error::CallError;
use crate::object_key::ObjectKey;
use crate::policy::{CopySemantics, Policy, PolicySet};

/// Maximum servant-location attempts before the call fails.
pub const LOCATE_RETRY_LIMIT: u32 = 40;
/// Base delay between location attempts; backoff grows linearly from here.
pub const LOCATE_RETRY_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
/// Read-only description of a remote object type, produced by descriptor
/// processing upstream.
pub struct TypeDescriptor {
    /// Unique id of the owning type, embedded in every object key.
    pub type_id: u64,
    pub type_name: String,
    /// Named worker pool this type's calls should be funneled to.
    pub thread_pool: Option<String>,
    /// Pass arguments by reference for collocated calls.
    pub pass_by_reference: bool,
    /// Every access path of this type mandates TLS.
    pub all_access_requires_tls: bool,
}

#[derive(Debug, Default)]
/// Maps worker-pool names to the numeric ids used by affinity policies.
pub struct ThreadPoolRegistry {
    pools: HashMap<String, u16>,
}

impl ThreadPoolRegistry {
    pub fn register(&mut self, name: impl Into<String>, id: u16) {
        self.pools.insert(name.into(), id);
    }

    pub fn numeric_id(&self, name: &str) -> Option<u16> {
        self.pools.get(name).copied()
    }
}

#[async_trait]
/// The owning container's view of live target objects.
///
/// `locate` may transiently return `Ok(None)` for certain stateful object
/// kinds while the container settles; the factory retries within a bounded
/// budget.
pub trait TargetResolver: Send + Sync {
    type Target: Send;

    async fn locate(
        &self,
        instance_key: &[u8],
    ) -> Result<Option<Self::Target>, anyhow::Error>;

    /// Releases a previously located target. Called exactly once per located
    /// target, regardless of how the call turned out.
    fn release(&self, target: Self::Target);
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A minted remote object reference.
pub struct RemoteRef {
    /// Adapter the reference was minted under.
    pub adapter_id: String,
    pub key: ObjectKey,
    /// Endpoint profile of the issuing broker. Clear-text ports are zeroed
    /// when the owning type permits secured access only.
    pub endpoints: Vec<SocketEndpoint>,
}

impl RemoteRef {
    /// The wire form of the embedded object key.
    pub fn encoded_key(&self) -> Vec<u8> {
        self.key.encode()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a `destroy` call.
pub enum DestroyStatus {
    Destroyed,
    AlreadyDestroyed,
}

/// Guard around a located target for the duration of one call.
///
/// Dropping the handle always releases the target back to the resolver, no
/// matter how the dispatch ended.
pub struct DispatchHandle<'a, R: TargetResolver> {
    resolver: &'a R,
    target: Option<R::Target>,
}

impl<'a, R: TargetResolver> DispatchHandle<'a, R> {
    pub fn target(&self) -> &R::Target {
        self.target.as_ref().expect("target released")
    }

    pub fn target_mut(&mut self) -> &mut R::Target {
        self.target.as_mut().expect("target released")
    }
}

impl<'a, R: TargetResolver> Drop for DispatchHandle<'a, R> {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            self.resolver.release(target);
        }
    }
}

// Each factory mints through two underlying adapters, one for object
// references and one for home references.
#[derive(Debug, Clone)]
struct ReferenceMinter {
    adapter_id: String,
    endpoints: Vec<SocketEndpoint>,
}

impl ReferenceMinter {
    fn mint(&self, key: ObjectKey) -> RemoteRef {
        RemoteRef {
            adapter_id: self.adapter_id.clone(),
            key,
            endpoints: self.endpoints.clone(),
        }
    }
}

/// Mints and resolves remote references for a single object type.
///
/// One instance exists per remote type, created at type registration and
/// destroyed exactly once at container shutdown. The policy set is fixed at
/// construction. References are minted against the transport context
/// captured from the broker handle at creation time, not the caller's.
pub struct ReferenceFactory<R: TargetResolver> {
    descriptor: TypeDescriptor,
    policies: PolicySet,
    resolver: Arc<R>,
    object_minter: ReferenceMinter,
    home_minter: ReferenceMinter,
    destroyed: AtomicBool,
}

impl<R: TargetResolver> ReferenceFactory<R> {
    pub fn new(
        broker: &BrokerHandle,
        descriptor: TypeDescriptor,
        resolver: Arc<R>,
        pools: &ThreadPoolRegistry,
    ) -> Self {
        let policies = assemble_policies(&descriptor, pools);

        let mut endpoints = broker.listener_endpoints();
        if policies.requires_zero_port() {
            for ep in endpoints
                .iter_mut()
                .filter(|ep| ep.kind == EndpointKind::ClearText)
            {
                ep.port = 0;
            }
        }

        debug!(
            type_name = %descriptor.type_name,
            type_id = descriptor.type_id,
            num_policies = policies.len(),
            "Created reference factory."
        );

        Self {
            object_minter: ReferenceMinter {
                adapter_id: format!("{}-Object", descriptor.type_name),
                endpoints: endpoints.clone(),
            },
            home_minter: ReferenceMinter {
                adapter_id: format!("{}-Home", descriptor.type_name),
                endpoints,
            },
            descriptor,
            policies,
            resolver,
            destroyed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn type_id(&self) -> u64 {
        self.descriptor.type_id
    }

    #[inline]
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Mints a reference to an object instance.
    pub fn create_reference(&self, instance_key: &[u8]) -> Result<RemoteRef, CallError> {
        self.ensure_live()?;
        let key = ObjectKey::new(self.descriptor.type_id, instance_key.to_vec());
        Ok(self.object_minter.mint(key))
    }

    /// Mints a reference to the type's home interface.
    pub fn create_home_reference(
        &self,
        instance_key: &[u8],
    ) -> Result<RemoteRef, CallError> {
        self.ensure_live()?;
        let key = ObjectKey::new(self.descriptor.type_id, instance_key.to_vec());
        Ok(self.home_minter.mint(key))
    }

    /// Locates the live target for an inbound call.
    ///
    /// Decodes the raw object key and polls the owning container until a
    /// target appears, with linear backoff and a bounded attempt budget.
    /// Decode failures, destroyed-factory use and resolver errors all
    /// surface as the per-call "target not found" taxonomy, distinct from
    /// business errors raised by the target itself.
    pub async fn locate(&self, raw_key: &[u8]) -> Result<DispatchHandle<'_, R>, CallError> {
        self.ensure_live()?;

        let key = ObjectKey::decode(raw_key)?;
        if key.type_id != self.descriptor.type_id {
            debug!(
                expected = self.descriptor.type_id,
                got = key.type_id,
                "Object key addressed to a different type."
            );
            return Err(CallError::TargetNotFound);
        }

        for attempt in 0..LOCATE_RETRY_LIMIT {
            match self.resolver.locate(&key.instance_key).await {
                Ok(Some(target)) => {
                    return Ok(DispatchHandle {
                        resolver: &*self.resolver,
                        target: Some(target),
                    });
                },
                Ok(None) => {
                    sleep(LOCATE_RETRY_DELAY * (attempt + 1)).await;
                },
                Err(e) => {
                    error!(
                        type_name = %self.descriptor.type_name,
                        error = ?e,
                        "Servant location failed."
                    );
                    return Err(CallError::TargetNotFound);
                },
            }
        }

        warn!(
            type_name = %self.descriptor.type_name,
            attempts = LOCATE_RETRY_LIMIT,
            "Target did not appear within the retry budget."
        );
        Err(CallError::TargetNotFound)
    }

    /// Whether a raw object key was minted by this factory's type.
    ///
    /// Malformed keys classify as "not same container" rather than erroring.
    pub fn has_same_container_id(&self, raw_key: &[u8]) -> bool {
        ObjectKey::matches_type(raw_key, self.descriptor.type_id)
    }

    /// Releases both underlying minting adapters.
    ///
    /// Idempotent: the first call destroys, later calls report
    /// [`DestroyStatus::AlreadyDestroyed`] and do nothing.
    pub fn destroy(&self) -> DestroyStatus {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            DestroyStatus::AlreadyDestroyed
        } else {
            debug!(type_name = %self.descriptor.type_name, "Reference factory destroyed.");
            DestroyStatus::Destroyed
        }
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), CallError> {
        if self.is_destroyed() {
            Err(CallError::FactoryDestroyed)
        } else {
            Ok(())
        }
    }
}

fn assemble_policies(
    descriptor: &TypeDescriptor,
    pools: &ThreadPoolRegistry,
) -> PolicySet {
    let mut policies = PolicySet::default();

    policies.push(Policy::Transaction);
    policies.push(Policy::SecurityContext {
        owner_type_id: descriptor.type_id,
    });

    if descriptor.pass_by_reference {
        policies.push(Policy::CopySemantics(CopySemantics::ByReference));
    }

    if let Some(name) = &descriptor.thread_pool {
        match pools.numeric_id(name) {
            Some(pool_id) => policies.push(Policy::ThreadPoolAffinity { pool_id }),
            None => {
                // Affinity is best effort; the type still dispatches on the
                // shared pool.
                warn!(
                    type_name = %descriptor.type_name,
                    pool = %name,
                    "Worker pool not found, continuing without affinity."
                );
            },
        }
    }

    if descriptor.all_access_requires_tls {
        policies.push(Policy::ZeroClearTextPort);
    }

    policies
}
