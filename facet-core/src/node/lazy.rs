//! Lazy Node
//!
//! The build state embedded in every feature.
//!
//! # How Materialization Works
//!
//! 1. A pending cancellation for the build is consumed first, even when the
//!    node is already valid, so a request never lingers to cancel a later,
//!    unrelated build.
//!
//! 2. A valid node returns immediately.
//!
//! 3. Otherwise the caller takes the node's build lock, re-checks validity
//!    (another thread may have finished the build while we waited), moves the
//!    node from `Invalid` to `Building` and runs the recompute hook.
//!
//! 4. On success the node becomes `Valid`. On failure it goes back to
//!    `Invalid`, so the next access retries.
//!
//! # Thread Safety
//!
//! The state is an atomic, transitioned with compare-and-swap. Builders are
//! serialized by a per-node mutex, which gives one hook invocation per
//! invalid-to-valid transition no matter how many threads ask at once. The
//! hook runs with that mutex held; a feature that re-enters its own build on
//! the same thread is reported as a cycle instead of deadlocking.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use super::cancel::BuildContext;
use super::stack::BuildStack;
use crate::error::{BuildError, MaterializeError};
use crate::hash::{Fingerprint, HashAccumulator};

/// Build state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    /// The derived value does not reflect the current inputs.
    Invalid = 0,

    /// The recompute hook is running on some thread.
    Building = 1,

    /// The derived value is up-to-date.
    Valid = 2,
}

impl NodeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => NodeState::Building,
            2 => NodeState::Valid,
            _ => NodeState::Invalid,
        }
    }
}

/// Validity flag, memoized fingerprint and build serialization for one
/// feature.
pub struct LazyNode {
    state: AtomicU8,
    fingerprint: RwLock<Option<Fingerprint>>,

    /// Bumped by every `invalidate`; a fingerprint computed across a bump is
    /// not memoized.
    generation: AtomicU64,

    /// Held for the whole duration of a build.
    build_lock: Mutex<()>,

    /// Thread currently running the recompute hook.
    builder: Mutex<Option<ThreadId>>,
}

impl LazyNode {
    /// Create a node in the `Invalid` state.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(NodeState::Invalid as u8),
            fingerprint: RwLock::new(None),
            generation: AtomicU64::new(0),
            build_lock: Mutex::new(()),
            builder: Mutex::new(None),
        }
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_valid(&self) -> bool {
        self.state() == NodeState::Valid
    }

    pub fn is_building(&self) -> bool {
        self.state() == NodeState::Building
    }

    /// The memoized fingerprint, if it has been computed.
    pub fn cached_fingerprint(&self) -> Option<Fingerprint> {
        *self.fingerprint.read()
    }

    /// Make sure the node is valid, running `recompute` if it is not.
    ///
    /// `label` names the node in logs and cycle reports; it is only evaluated
    /// when a build actually happens.
    pub fn materialize<L, F>(
        &self,
        ctx: &BuildContext,
        label: L,
        recompute: F,
    ) -> Result<(), MaterializeError>
    where
        L: FnOnce() -> String,
        F: FnOnce() -> Result<(), BuildError>,
    {
        if ctx.check_cancelled() {
            let node = label();
            tracing::debug!(%node, "rebuild cancelled");
            return Err(MaterializeError::Cancelled { node });
        }

        if self.is_valid() {
            return Ok(());
        }

        let me = thread::current().id();
        // `builder` stays set for the whole hook, even if the node is
        // invalidated from inside it.
        if *self.builder.lock() == Some(me) {
            let mut path = BuildStack::path();
            path.push(label());
            return Err(MaterializeError::Cycle { path });
        }

        let _build = self.build_lock.lock();

        if self.is_valid() {
            tracing::trace!("built by another thread while waiting");
            return Ok(());
        }

        if self
            .state
            .compare_exchange(
                NodeState::Invalid as u8,
                NodeState::Building as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Only holders of the build lock enter `Building`.
            return Ok(());
        }

        let label = label();
        let mut guard = BuildingGuard::new(self, me);
        let _stack = BuildStack::enter(&label);
        tracing::debug!(node = %label, depth = BuildStack::depth(), "rebuilding");

        match recompute() {
            Ok(()) => {
                guard.succeed();
                Ok(())
            }
            Err(err) => {
                tracing::debug!(node = %label, error = %err, "rebuild failed");
                Err(err.into())
            }
        }
    }

    /// Return the memoized fingerprint, computing it with `contribute` on
    /// first use.
    ///
    /// Does not materialize the node.
    pub fn fingerprint_with<F>(&self, contribute: F) -> Fingerprint
    where
        F: FnOnce(&mut HashAccumulator),
    {
        if let Some(fingerprint) = *self.fingerprint.read() {
            return fingerprint;
        }

        // Computed without the lock held: `contribute` fingerprints upstream
        // nodes. Concurrent callers compute the same value.
        let generation = self.generation.load(Ordering::Acquire);
        let mut acc = HashAccumulator::new();
        contribute(&mut acc);
        let fingerprint = acc.finish();

        let mut slot = self.fingerprint.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *slot = Some(fingerprint);
        } else {
            tracing::trace!(%fingerprint, "invalidated while fingerprinting, not memoized");
        }
        fingerprint
    }

    /// Mark the node as stale and forget its fingerprint.
    ///
    /// A build running concurrently finishes but leaves the node `Invalid`.
    pub fn invalidate(&self) {
        self.state.store(NodeState::Invalid as u8, Ordering::Release);
        let mut slot = self.fingerprint.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
    }
}

impl Default for LazyNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for LazyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyNode")
            .field("state", &self.state())
            .field("fingerprint", &self.cached_fingerprint())
            .finish()
    }
}

/// Owns the `Building` state for the duration of a hook call.
///
/// Unless [`succeed`](Self::succeed) is called the node returns to `Invalid`
/// on drop, which covers both hook errors and panics.
struct BuildingGuard<'a> {
    node: &'a LazyNode,
    succeeded: bool,
}

impl<'a> BuildingGuard<'a> {
    fn new(node: &'a LazyNode, builder: ThreadId) -> Self {
        *node.builder.lock() = Some(builder);
        Self {
            node,
            succeeded: false,
        }
    }

    fn succeed(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for BuildingGuard<'_> {
    fn drop(&mut self) {
        *self.node.builder.lock() = None;
        let next = if self.succeeded {
            NodeState::Valid
        } else {
            NodeState::Invalid
        };
        // Fails if the node was invalidated mid-build; it then stays Invalid.
        let _ = self.node.state.compare_exchange(
            NodeState::Building as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::cancel::{CancelToken, CancellationRegistry};
    use std::sync::atomic::{AtomicI32, AtomicUsize};
    use std::sync::{Arc, Barrier};

    fn label() -> String {
        "test-node".to_string()
    }

    #[test]
    fn node_starts_invalid() {
        let node = LazyNode::new();
        assert_eq!(node.state(), NodeState::Invalid);
        assert!(!node.is_valid());
        assert!(!node.is_building());
        assert!(node.cached_fingerprint().is_none());
    }

    #[test]
    fn materialize_runs_hook_once() {
        let node = LazyNode::new();
        let ctx = BuildContext::new();
        let calls = AtomicI32::new(0);

        for _ in 0..3 {
            node.materialize(&ctx, label, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(node.state(), NodeState::Valid);
    }

    #[test]
    fn node_is_building_during_hook() {
        let node = LazyNode::new();
        let mut observed = None;

        node.materialize(&BuildContext::new(), label, || {
            observed = Some(node.state());
            Ok(())
        })
        .unwrap();

        assert_eq!(observed, Some(NodeState::Building));
        assert!(!node.is_building());
    }

    #[test]
    fn failed_build_stays_invalid_and_retries() {
        let node = LazyNode::new();
        let ctx = BuildContext::new();

        let err = node
            .materialize(&ctx, label, || Err(BuildError::new("disk full")))
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(node.state(), NodeState::Invalid);

        node.materialize(&ctx, label, || Ok(())).unwrap();
        assert_eq!(node.state(), NodeState::Valid);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let node = LazyNode::new();
        let ctx = BuildContext::new();
        let calls = AtomicI32::new(0);
        let hook = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        node.materialize(&ctx, label, hook).unwrap();
        node.invalidate();
        assert_eq!(node.state(), NodeState::Invalid);
        node.materialize(&ctx, label, hook).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_during_build_leaves_node_invalid() {
        let node = LazyNode::new();

        node.materialize(&BuildContext::new(), label, || {
            node.invalidate();
            Ok(())
        })
        .unwrap();

        assert_eq!(node.state(), NodeState::Invalid);
    }

    #[test]
    fn cancellation_is_checked_even_when_valid() {
        let node = LazyNode::new();
        let token = CancelToken::new();
        let ctx = BuildContext::with_token(token.clone());

        node.materialize(&ctx, label, || Ok(())).unwrap();
        token.request_cancel();

        let err = node.materialize(&ctx, label, || Ok(())).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!token.is_pending());

        node.materialize(&ctx, label, || Ok(())).unwrap();
    }

    #[test]
    fn thread_cancellation_is_one_shot() {
        let node = LazyNode::new();
        let ctx = BuildContext::new();
        let calls = AtomicI32::new(0);
        let hook = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        CancellationRegistry::global().request_cancel(thread::current().id());

        let err = node.materialize(&ctx, label, hook).unwrap_err();
        assert!(matches!(err, MaterializeError::Cancelled { ref node } if node.as_str() == "test-node"));
        assert_eq!(node.state(), NodeState::Invalid);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        node.materialize(&ctx, label, hook).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_build_reports_cycle() {
        let node = LazyNode::new();
        let ctx = BuildContext::new();

        let err = node
            .materialize(&ctx, label, || {
                match node.materialize(&ctx, label, || Ok(())) {
                    Err(MaterializeError::Cycle { path }) => {
                        assert_eq!(path, vec!["test-node", "test-node"]);
                        Err(BuildError::new("cycle"))
                    }
                    other => panic!("expected cycle, got {other:?}"),
                }
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "cycle");
        assert_eq!(node.state(), NodeState::Invalid);
    }

    #[test]
    fn reentry_after_self_invalidation_reports_cycle() {
        let node = LazyNode::new();
        let ctx = BuildContext::new();

        let result = node
            .materialize(&ctx, label, || {
                node.invalidate();
                match node.materialize(&ctx, label, || Ok(())) {
                    Err(MaterializeError::Cycle { path }) => {
                        assert_eq!(path, vec!["test-node", "test-node"]);
                        Ok(())
                    }
                    other => panic!("expected cycle, got {other:?}"),
                }
            });

        assert!(result.is_ok());
        assert_eq!(node.state(), NodeState::Invalid);
        node.materialize(&ctx, label, || Ok(())).unwrap();
        assert!(node.is_valid());
    }

    #[test]
    fn panicking_hook_leaves_node_invalid() {
        let node = Arc::new(LazyNode::new());

        let worker = Arc::clone(&node);
        let result = thread::spawn(move || {
            worker.materialize(&BuildContext::new(), label, || panic!("kernel crashed"))
        })
        .join();

        assert!(result.is_err());
        assert_eq!(node.state(), NodeState::Invalid);
        node.materialize(&BuildContext::new(), label, || Ok(())).unwrap();
        assert!(node.is_valid());
    }

    #[test]
    fn concurrent_callers_build_once() {
        let node = Arc::new(LazyNode::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let node = Arc::clone(&node);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    node.materialize(&BuildContext::new(), label, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        Ok(())
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(node.is_valid());
    }

    #[test]
    fn fingerprint_is_memoized_until_invalidated() {
        let node = LazyNode::new();
        let calls = AtomicI32::new(0);
        let contribute = |acc: &mut HashAccumulator| {
            calls.fetch_add(1, Ordering::SeqCst);
            acc.combine("Sphere").combine_f64(2.0);
        };

        let first = node.fingerprint_with(contribute);
        let second = node.fingerprint_with(contribute);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(node.cached_fingerprint(), Some(first));

        // Fingerprinting does not build.
        assert_eq!(node.state(), NodeState::Invalid);

        node.invalidate();
        assert!(node.cached_fingerprint().is_none());
        assert_eq!(node.fingerprint_with(contribute), first);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fingerprint_invalidated_mid_computation_is_not_memoized() {
        let node = LazyNode::new();

        let stale = node.fingerprint_with(|acc| {
            acc.combine("Sphere").combine_f64(1.0);
            node.invalidate();
        });
        assert!(node.cached_fingerprint().is_none());

        let fresh = node.fingerprint_with(|acc| {
            acc.combine("Sphere").combine_f64(2.0);
        });
        assert_ne!(fresh, stale);
        assert_eq!(node.cached_fingerprint(), Some(fresh));
    }
}
