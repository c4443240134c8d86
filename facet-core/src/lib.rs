//! Facet Core
//!
//! This crate provides the evaluation core of the Facet parametric CAD
//! modeller. Every feature of a model (a sphere, an extrusion, a boolean
//! union, ...) is a node in a dependency graph whose shape is derived lazily
//! from other features and parameters. The crate implements:
//!
//! - Build-once materialization with cooperative cancellation
//! - Structural fingerprints of features, computed from their inputs
//! - A process-wide content-addressed cache of built features
//!
//! The geometry kernel, the script parser and the viewer are not part of this
//! crate; they plug in through the [`Feature`] trait.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `hash`: Fingerprints, the hash accumulator and hashable geometric primitives
//! - `node`: Lazy nodes, the `Feature` trait and build cancellation
//! - `cache`: The content-addressed feature cache
//! - `config`: Cache settings
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use facet_core::{
//!     BuildContext, BuildError, ContentCache, Feature, HashAccumulator, LazyNode,
//! };
//!
//! struct Sphere {
//!     radius: f64,
//!     node: LazyNode,
//! }
//!
//! impl Feature for Sphere {
//!     fn type_name(&self) -> &'static str {
//!         "Sphere"
//!     }
//!
//!     fn lazy(&self) -> &LazyNode {
//!         &self.node
//!     }
//!
//!     fn recompute(&self, _ctx: &BuildContext) -> Result<(), BuildError> {
//!         // Call into the geometry kernel here.
//!         Ok(())
//!     }
//!
//!     fn hash_contribution(&self, acc: &mut HashAccumulator) {
//!         acc.combine_f64(self.radius);
//!     }
//! }
//!
//! let cache = ContentCache::default();
//! let ctx = BuildContext::new();
//!
//! let a = cache.resolve(Arc::new(Sphere { radius: 2.0, node: LazyNode::new() }), &ctx)?;
//! let b = cache.resolve(Arc::new(Sphere { radius: 2.0, node: LazyNode::new() }), &ctx)?;
//!
//! // The second sphere was structurally identical, so the first one is reused.
//! assert!(Arc::ptr_eq(&a, &b));
//! # Ok::<(), facet_core::ResolveError>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod hash;
pub mod node;

pub use cache::{ContentCache, EntryInfo, RebuildReport, SweepSummary};
pub use config::CacheConfig;
pub use error::{
    BuildError, CacheError, ConfigError, DuplicateInsert, MaterializeError, ResolveError,
};
pub use hash::{Fingerprint, HashAccumulator, Point3, Scalar, Transform};
pub use node::{
    BuildContext, BuildStack, CancelToken, CancellationRegistry, Feature, LazyNode, NodeState,
};
