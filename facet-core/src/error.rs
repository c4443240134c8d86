//! Error types for materialization, cache access and configuration.

use std::fmt;

use thiserror::Error;

use crate::cache::EntryInfo;
use crate::hash::Fingerprint;

/// Error raised by a feature's recompute hook.
///
/// The core treats this as opaque and hands it back to the caller unchanged.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BuildError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The upstream materialization failure this error wraps, if any.
    pub fn upstream(&self) -> Option<&MaterializeError> {
        self.source.as_deref()?.downcast_ref::<MaterializeError>()
    }
}

/// Lets a recompute hook `?` the materialization of its upstream features.
impl From<MaterializeError> for BuildError {
    fn from(err: MaterializeError) -> Self {
        BuildError::with_source("upstream feature failed", err)
    }
}

/// Failure of `ensure_materialized`. The node stays invalid in every case.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// A pending cancellation for this build was consumed.
    #[error("rebuild of {node} cancelled")]
    Cancelled { node: String },

    /// The recompute hook failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// A feature was asked to materialize itself while its own build was
    /// running on the same thread.
    #[error("dependency cycle while building: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

impl MaterializeError {
    /// Whether this build, or an upstream build it waited on, was cancelled.
    pub fn is_cancelled(&self) -> bool {
        match self {
            MaterializeError::Cancelled { .. } => true,
            MaterializeError::Build(err) => err.upstream().is_some_and(|e| e.is_cancelled()),
            MaterializeError::Cycle { .. } => false,
        }
    }
}

/// Both sides of a fingerprint collision between two live features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateInsert {
    pub inserted: EntryInfo,
    pub existing: EntryInfo,
}

impl fmt::Display for DuplicateInsert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "feature {} has the same fingerprint as live cached feature {}",
            self.inserted, self.existing
        )
    }
}

/// Errors from the content cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("no cache entry for fingerprint {0}")]
    NotFound(Fingerprint),

    /// The entry exists but its feature has been dropped.
    #[error("cache entry for fingerprint {0} has expired")]
    Expired(Fingerprint),

    #[error("cache entry {fingerprint} is a {found}, not a {expected}")]
    TypeMismatch {
        fingerprint: Fingerprint,
        expected: &'static str,
        found: &'static str,
    },

    /// Two distinct live features share one fingerprint. This is an
    /// internal-consistency violation, not a runtime condition to recover from.
    #[error("duplicate cache insert: {0}")]
    DuplicateInsert(Box<DuplicateInsert>),
}

impl CacheError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::DuplicateInsert(_))
    }

    /// Whether the caller may fall back to building a fresh feature.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Failure of [`ContentCache::resolve`](crate::cache::ContentCache::resolve).
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid cache configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn build_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = BuildError::with_source("could not write shape", io);
        assert_eq!(err.to_string(), "could not write shape");
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk full".to_string()));
    }

    #[test]
    fn build_error_passes_through_unchanged() {
        let err: MaterializeError = BuildError::new("disk full").into();
        assert_eq!(err.to_string(), "disk full");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn upstream_cancellation_is_visible_through_build_error() {
        let cancelled = MaterializeError::Cancelled {
            node: "sphere".into(),
        };
        let wrapped: BuildError = cancelled.into();
        assert_eq!(wrapped.message(), "upstream feature failed");
        assert!(wrapped.upstream().is_some());

        let outer = MaterializeError::Build(wrapped);
        assert!(outer.is_cancelled());
        assert!(!MaterializeError::Build(BuildError::new("x")).is_cancelled());
    }

    #[test]
    fn cycle_message_lists_path() {
        let err = MaterializeError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle while building: a -> b -> a");
    }

    #[test]
    fn only_duplicate_insert_is_fatal() {
        let fp = Fingerprint::from_raw(1);
        let info = EntryInfo {
            fingerprint: fp,
            type_name: "Sphere",
            symbol: "s1".into(),
        };
        let dup = CacheError::DuplicateInsert(Box::new(DuplicateInsert {
            inserted: info.clone(),
            existing: EntryInfo {
                symbol: "s2".into(),
                ..info
            },
        }));

        assert!(dup.is_fatal());
        assert!(CacheError::NotFound(fp).is_recoverable());
        assert!(CacheError::Expired(fp).is_recoverable());
        assert!(dup.to_string().contains("s1 (Sphere)"));
        assert!(dup.to_string().contains("s2 (Sphere)"));
    }
}
