//! Lazy Feature Nodes
//!
//! This module implements the build-once machinery behind every feature of a
//! model: deciding whether a feature's shape is stale, rebuilding it exactly
//! once, and letting a controller cancel a long build.
//!
//! # Concepts
//!
//! ## Materialization
//!
//! A feature's shape is derived from its upstream features and parameters and
//! is only computed when first accessed. Accessors call
//! [`Feature::ensure_materialized`], which runs the feature's recompute hook
//! if, and only if, the feature is not valid yet. The hook materializes the
//! upstream features it needs through the same call, so the dependency graph
//! is traversed by recursion through this module rather than by a separate
//! traversal engine.
//!
//! ## Fingerprints
//!
//! [`Feature::fingerprint`] is computed from declared inputs only and never
//! triggers a build, so a caller can probe the content cache before doing any
//! expensive work.
//!
//! ## Cancellation
//!
//! Cancellation is cooperative: a request is noticed at the next
//! `ensure_materialized` entry point of the targeted build, never in the
//! middle of a recompute hook.

mod cancel;
mod feature;
mod lazy;
mod stack;

pub use cancel::{BuildContext, CancelToken, CancellationRegistry};
pub use feature::Feature;
pub use lazy::{LazyNode, NodeState};
pub use stack::BuildStack;
