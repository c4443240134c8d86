//! The `Feature` trait: the seam between this crate and the geometry layer.
//!
//! A concrete feature (sphere, extrusion, boolean union, ...) embeds a
//! [`LazyNode`] and supplies two hooks: `recompute`, which builds its derived
//! shape, and `hash_contribution`, which folds its parameters and upstream
//! fingerprints into an accumulator. Everything else is provided.

use std::any::Any;

use super::cancel::BuildContext;
use super::lazy::LazyNode;
use crate::error::{BuildError, MaterializeError};
use crate::hash::{Fingerprint, HashAccumulator};

/// A node of the feature graph.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use parking_lot::RwLock;
/// use facet_core::{BuildContext, BuildError, Feature, HashAccumulator, LazyNode};
///
/// struct Offset {
///     base: Arc<dyn Feature>,
///     distance: f64,
///     node: LazyNode,
///     shape: RwLock<Option<String>>,
/// }
///
/// impl Feature for Offset {
///     fn type_name(&self) -> &'static str {
///         "Offset"
///     }
///
///     fn lazy(&self) -> &LazyNode {
///         &self.node
///     }
///
///     fn recompute(&self, ctx: &BuildContext) -> Result<(), BuildError> {
///         self.base.ensure_materialized(ctx)?;
///         *self.shape.write() = Some(format!("offset by {}", self.distance));
///         Ok(())
///     }
///
///     fn hash_contribution(&self, acc: &mut HashAccumulator) {
///         acc.combine_fingerprint(self.base.fingerprint())
///             .combine_f64(self.distance);
///     }
/// }
/// ```
pub trait Feature: Any + Send + Sync {
    /// Discriminator of the concrete feature type. Always folded first into
    /// the fingerprint.
    fn type_name(&self) -> &'static str;

    /// Symbol the feature is bound to in the model script, if any.
    fn symbol_name(&self) -> Option<&str> {
        None
    }

    /// The embedded build state.
    fn lazy(&self) -> &LazyNode;

    /// Build the derived shape. May materialize upstream features with `ctx`;
    /// their errors convert into [`BuildError`] with `?`.
    fn recompute(&self, ctx: &BuildContext) -> Result<(), BuildError>;

    /// Fold parameters and upstream fingerprints, in a fixed order.
    fn hash_contribution(&self, acc: &mut HashAccumulator);

    /// Symbol name, or `anonymous_<type>` for unnamed features.
    fn display_name(&self) -> String {
        match self.symbol_name() {
            Some(symbol) => symbol.to_owned(),
            None => format!("anonymous_{}", self.type_name()),
        }
    }

    /// Build the feature if it is not valid yet.
    ///
    /// Must be called by every accessor before it reads derived state.
    fn ensure_materialized(&self, ctx: &BuildContext) -> Result<(), MaterializeError> {
        self.lazy()
            .materialize(ctx, || self.display_name(), || self.recompute(ctx))
    }

    /// Structural fingerprint, memoized until [`invalidate`](Self::invalidate).
    fn fingerprint(&self) -> Fingerprint {
        self.lazy().fingerprint_with(|acc| {
            acc.combine(self.type_name());
            self.hash_contribution(acc);
        })
    }

    /// Mark the feature stale after one of its inputs changed.
    fn invalidate(&self) {
        self.lazy().invalidate()
    }

    fn is_valid(&self) -> bool {
        self.lazy().is_valid()
    }
}
