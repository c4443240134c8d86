//! Build Cancellation
//!
//! Cancellation is cooperative and poll-based. A controller files a request;
//! the building side only notices it at its next `ensure_materialized` entry
//! point and fails with [`MaterializeError::Cancelled`](crate::MaterializeError).
//! Requests are one-shot: the first check that observes a request consumes it.
//!
//! There are two ways to target a build:
//!
//! - [`CancelToken`]: an explicit flag carried by the [`BuildContext`] that is
//!   passed down through every recompute hook.
//! - [`CancellationRegistry`]: a process-wide set of thread IDs, for a
//!   controller that only knows which worker thread runs the build.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use dashmap::DashSet;

/// Process-wide table of threads with a pending cancellation request.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    pending: DashSet<ThreadId>,
}

static REGISTRY: OnceLock<CancellationRegistry> = OnceLock::new();

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            pending: DashSet::new(),
        }
    }

    /// The registry consulted by every [`BuildContext`].
    pub fn global() -> &'static CancellationRegistry {
        REGISTRY.get_or_init(CancellationRegistry::new)
    }

    /// Ask the next build check on `thread` to abort. Idempotent.
    pub fn request_cancel(&self, thread: ThreadId) {
        tracing::debug!(?thread, "cancellation requested");
        self.pending.insert(thread);
    }

    /// Remove a pending request for `thread`, returning whether there was one.
    pub fn check_and_consume(&self, thread: ThreadId) -> bool {
        self.pending.remove(&thread).is_some()
    }

    pub fn is_pending(&self, thread: ThreadId) -> bool {
        self.pending.contains(&thread)
    }
}

/// One-shot cancellation flag shared between a controller and a build.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Clear a pending request, returning whether there was one.
    pub fn check_and_consume(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Per-build state handed to every recompute hook.
///
/// Hooks pass the same context on when they materialize upstream features,
/// so a cancellation reaches the whole build.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    token: Option<CancelToken>,
}

impl BuildContext {
    /// A context that only honours thread-targeted requests.
    pub fn new() -> Self {
        Self { token: None }
    }

    /// A context that honours `token` as well as thread-targeted requests.
    pub fn with_token(token: CancelToken) -> Self {
        Self { token: Some(token) }
    }

    pub fn token(&self) -> Option<&CancelToken> {
        self.token.as_ref()
    }

    /// Consume a pending cancellation for this build, if any.
    pub fn check_cancelled(&self) -> bool {
        if let Some(token) = &self.token {
            if token.check_and_consume() {
                return true;
            }
        }
        CancellationRegistry::global().check_and_consume(thread::current().id())
    }
}
