use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

use crate::directory::ClusterDirectory;
use crate::error::ClusterError;
use crate::member::ClusterMember;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The membership transitions delivered by the external group service.
pub enum SignalKind {
    /// A member finished starting and is ready to serve.
    JoinedAndReady,
    /// A member announced an orderly departure.
    PlannedShutdown,
    /// The failure detector declared a member dead.
    Failure,
}

/// A membership signal handed over by the external service.
///
/// The underlying library expects explicit acquire/release bracketing around
/// processing; the bridge guarantees release on every exit path.
pub trait Signal: Send + Sync {
    fn kind(&self) -> SignalKind;
    fn member_name(&self) -> &str;
    fn acquire(&mut self) -> Result<(), ClusterError>;
    fn release(&mut self);
}

#[derive(Debug, Clone)]
/// A plain signal with a no-op lease, for services delivering in-process.
pub struct MemberSignal {
    kind: SignalKind,
    member: String,
}

impl MemberSignal {
    pub fn new(kind: SignalKind, member: impl Into<String>) -> Self {
        Self {
            kind,
            member: member.into(),
        }
    }
}

impl Signal for MemberSignal {
    fn kind(&self) -> SignalKind {
        self.kind
    }

    fn member_name(&self) -> &str {
        &self.member
    }

    fn acquire(&mut self) -> Result<(), ClusterError> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// Receives the authoritative cluster view whenever it changes.
pub trait MembershipObserver: Send + Sync {
    fn on_membership_change(&self, members: Vec<ClusterMember>);
}

/// Uniform read surface over clustered and standalone membership sources.
pub trait GroupView: Send + Sync {
    fn current_members(&self) -> Vec<ClusterMember>;
    fn add_observer(&self, observer: Arc<dyn MembershipObserver>);
}

// Releases the signal when processing ends, crash or not.
struct SignalLease<'a> {
    signal: &'a mut dyn Signal,
}

impl<'a> SignalLease<'a> {
    fn acquire(signal: &'a mut dyn Signal) -> Result<Self, ClusterError> {
        signal.acquire()?;
        Ok(Self { signal })
    }
}

impl Drop for SignalLease<'_> {
    fn drop(&mut self) {
        self.signal.release();
    }
}

struct BridgeState {
    current: BTreeMap<String, ClusterMember>,
    observers: Vec<Arc<dyn MembershipObserver>>,
}

/// Translates external membership signals into endpoint-list updates.
///
/// Keeps the authoritative name → member map, re-publishing it to registered
/// observers (typically a failover policy's update hook) and over a watch
/// channel whenever it changes. Signal processing is strictly sequential per
/// bridge; mutation and notification for one signal share a single critical
/// section.
pub struct MembershipBridge {
    directory: Arc<dyn ClusterDirectory>,
    state: Mutex<BridgeState>,
    view_tx: watch::Sender<Vec<ClusterMember>>,
    view_rx: watch::Receiver<Vec<ClusterMember>>,
}

impl MembershipBridge {
    /// Seeds the member map from the static cluster configuration.
    pub fn new(directory: Arc<dyn ClusterDirectory>) -> Self {
        let current: BTreeMap<String, ClusterMember> = directory
            .initial_members()
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        info!(num_members = current.len(), "Membership bridge initialized.");

        let (view_tx, view_rx) = watch::channel(current.values().cloned().collect());
        Self {
            directory,
            state: Mutex::new(BridgeState {
                current,
                observers: Vec::new(),
            }),
            view_tx,
            view_rx,
        }
    }

    /// Return a [WatchStream] for monitoring changes of the cluster view.
    pub fn member_change_watcher(&self) -> WatchStream<Vec<ClusterMember>> {
        WatchStream::new(self.view_rx.clone())
    }

    /// Processes one signal, bracketed by the signal's acquire/release.
    ///
    /// Signals are handled in delivery order; the caller (or the drainer
    /// task) must not interleave calls for one bridge.
    pub fn process_signal(&self, signal: &mut dyn Signal) {
        let kind = signal.kind();
        let member = signal.member_name().to_string();
        info!(member = %member, kind = ?kind, "Processing membership signal.");

        let _lease = match SignalLease::acquire(signal) {
            Ok(lease) => lease,
            Err(e) => {
                error!(member = %member, error = %e, "Could not acquire signal, dropping it.");
                return;
            },
        };

        match kind {
            SignalKind::PlannedShutdown | SignalKind::Failure => {
                self.remove_member(&member)
            },
            SignalKind::JoinedAndReady => self.add_member(&member),
        }
    }

    fn remove_member(&self, name: &str) {
        let mut state = self.state.lock();
        if state.current.remove(name).is_some() {
            debug!(member = %name, "Member removed, notifying observers.");
            self.notify_locked(&state);
        } else {
            debug!(member = %name, "Member not present, no action.");
        }
    }

    fn add_member(&self, name: &str) {
        let mut state = self.state.lock();
        if state.current.contains_key(name) {
            debug!(member = %name, "Member already present, no action.");
            return;
        }

        match self.directory.member_info(name) {
            Some(member) => {
                state.current.insert(member.name.clone(), member);
                debug!(member = %name, "Member added, notifying observers.");
                self.notify_locked(&state);
            },
            None => {
                warn!(
                    member = %name,
                    "Joined member is not in the cluster configuration, ignoring."
                );
            },
        }
    }

    /// Convenience method for testing that waits for the predicate to hold
    /// true for the published cluster view.
    pub async fn wait_for_view<F>(
        &self,
        mut predicate: F,
        timeout_after: std::time::Duration,
    ) -> Result<(), anyhow::Error>
    where
        F: FnMut(&[ClusterMember]) -> bool,
    {
        use tokio::time::timeout;
        use tokio_stream::StreamExt;

        timeout(
            timeout_after,
            self.member_change_watcher()
                .skip_while(|view| !predicate(view))
                .next(),
        )
        .await?;
        Ok(())
    }

    fn notify_locked(&self, state: &BridgeState) {
        let view: Vec<ClusterMember> = state.current.values().cloned().collect();
        for observer in &state.observers {
            observer.on_membership_change(view.clone());
        }
        let _ = self.view_tx.send(view);
    }
}

impl GroupView for MembershipBridge {
    fn current_members(&self) -> Vec<ClusterMember> {
        self.state.lock().current.values().cloned().collect()
    }

    fn add_observer(&self, observer: Arc<dyn MembershipObserver>) {
        self.state.lock().observers.push(observer);
    }
}

/// Drains signals strictly sequentially, in delivery order.
///
/// The external service may deliver from arbitrary threads; funneling
/// through the channel serializes processing per bridge.
pub fn spawn_signal_drainer(
    bridge: Arc<MembershipBridge>,
    signals: flume::Receiver<Box<dyn Signal>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(mut signal) = signals.recv_async().await {
            bridge.process_signal(signal.as_mut());
        }
        debug!("Signal channel closed, drainer stopping.");
    })
}

/// The membership source of a process that is not a cluster member.
///
/// Exists purely to keep call sites uniform: reads return the fixed initial
/// view, while the mutating surface must never be reached and fails fatally
/// if it is.
pub struct StandaloneBridge {
    members: Vec<ClusterMember>,
}

impl StandaloneBridge {
    pub fn new(members: impl IntoIterator<Item = ClusterMember>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }
}

impl GroupView for StandaloneBridge {
    fn current_members(&self) -> Vec<ClusterMember> {
        self.members.clone()
    }

    fn add_observer(&self, _observer: Arc<dyn MembershipObserver>) {
        panic!("standalone membership source must never register observers");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::directory::StaticClusterDirectory;

    struct CountingObserver {
        notifications: AtomicUsize,
        last_size: AtomicUsize,
    }

    impl CountingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                notifications: AtomicUsize::new(0),
                last_size: AtomicUsize::new(0),
            })
        }
    }

    impl MembershipObserver for CountingObserver {
        fn on_membership_change(&self, members: Vec<ClusterMember>) {
            self.notifications.fetch_add(1, Ordering::SeqCst);
            self.last_size.store(members.len(), Ordering::SeqCst);
        }
    }

    fn directory(names: &[&str]) -> Arc<StaticClusterDirectory> {
        Arc::new(StaticClusterDirectory::new(
            names
                .iter()
                .map(|name| ClusterMember::new(*name, 10, [])),
        ))
    }

    fn bridge_with(names: &[&str]) -> (MembershipBridge, Arc<CountingObserver>) {
        let bridge = MembershipBridge::new(directory(names));
        let observer = CountingObserver::new();
        bridge.add_observer(observer.clone());
        (bridge, observer)
    }

    #[test]
    fn test_leave_for_absent_member_is_silent() {
        let (bridge, observer) = bridge_with(&["a", "b"]);

        let mut signal = MemberSignal::new(SignalKind::Failure, "ghost");
        bridge.process_signal(&mut signal);

        assert_eq!(observer.notifications.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.current_members().len(), 2);
    }

    #[test]
    fn test_leave_removes_exactly_that_member_once() {
        let (bridge, observer) = bridge_with(&["a", "b"]);

        let mut signal = MemberSignal::new(SignalKind::PlannedShutdown, "a");
        bridge.process_signal(&mut signal);

        assert_eq!(observer.notifications.load(Ordering::SeqCst), 1);
        let names: Vec<String> = bridge
            .current_members()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["b"]);

        // Replaying the same signal is idempotent.
        let mut signal = MemberSignal::new(SignalKind::PlannedShutdown, "a");
        bridge.process_signal(&mut signal);
        assert_eq!(observer.notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_join_resolves_through_directory() {
        let directory = directory(&["a", "b"]);
        let bridge = MembershipBridge::new(directory);
        let observer = CountingObserver::new();
        bridge.add_observer(observer.clone());

        let mut leave = MemberSignal::new(SignalKind::Failure, "b");
        bridge.process_signal(&mut leave);
        assert_eq!(bridge.current_members().len(), 1);

        let mut join = MemberSignal::new(SignalKind::JoinedAndReady, "b");
        bridge.process_signal(&mut join);
        assert_eq!(bridge.current_members().len(), 2);
        assert_eq!(observer.notifications.load(Ordering::SeqCst), 2);

        // Already present: no extra notification.
        let mut join = MemberSignal::new(SignalKind::JoinedAndReady, "b");
        bridge.process_signal(&mut join);
        assert_eq!(observer.notifications.load(Ordering::SeqCst), 2);

        // Unknown to the configuration: ignored.
        let mut join = MemberSignal::new(SignalKind::JoinedAndReady, "mystery");
        bridge.process_signal(&mut join);
        assert_eq!(observer.notifications.load(Ordering::SeqCst), 2);
        assert_eq!(observer.last_size.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lease_released_even_when_acquire_fails() {
        struct FailingSignal {
            released: bool,
            acquired: bool,
        }

        impl Signal for FailingSignal {
            fn kind(&self) -> SignalKind {
                SignalKind::Failure
            }

            fn member_name(&self) -> &str {
                "a"
            }

            fn acquire(&mut self) -> Result<(), ClusterError> {
                self.acquired = true;
                Err(ClusterError::SignalAcquire {
                    member: "a".to_string(),
                    reason: "busy".to_string(),
                })
            }

            fn release(&mut self) {
                self.released = true;
            }
        }

        let (bridge, observer) = bridge_with(&["a"]);
        let mut signal = FailingSignal {
            released: false,
            acquired: false,
        };
        bridge.process_signal(&mut signal);

        assert!(signal.acquired);
        // Acquire never succeeded, so there is nothing to release and no
        // membership change either.
        assert!(!signal.released);
        assert_eq!(observer.notifications.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.current_members().len(), 1);
    }

    #[test]
    fn test_release_happens_after_successful_processing() {
        struct TrackingSignal {
            released: bool,
        }

        impl Signal for TrackingSignal {
            fn kind(&self) -> SignalKind {
                SignalKind::Failure
            }

            fn member_name(&self) -> &str {
                "a"
            }

            fn acquire(&mut self) -> Result<(), ClusterError> {
                Ok(())
            }

            fn release(&mut self) {
                self.released = true;
            }
        }

        let (bridge, _observer) = bridge_with(&["a"]);
        let mut signal = TrackingSignal { released: false };
        bridge.process_signal(&mut signal);
        assert!(signal.released);
        assert!(bridge.current_members().is_empty());
    }

    #[test]
    #[should_panic(expected = "must never register observers")]
    fn test_standalone_bridge_rejects_observers() {
        let standalone = StandaloneBridge::new([ClusterMember::new("only", 10, [])]);
        assert_eq!(standalone.current_members().len(), 1);
        standalone.add_observer(CountingObserver::new());
    }
}
