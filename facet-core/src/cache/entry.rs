//! Cache entries and the reports produced by maintenance operations.

use std::any::Any;
use std::fmt;
use std::sync::Weak;

use serde::Serialize;

use crate::hash::Fingerprint;

/// Human-readable identity of a cached feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub fingerprint: Fingerprint,
    pub type_name: &'static str,
    pub symbol: String,
}

impl fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]", self.symbol, self.type_name, self.fingerprint)
    }
}

/// A weak reference to a cached feature plus its description.
///
/// The description is captured at insert time so it is still available
/// after the feature has been dropped.
pub(crate) struct CacheEntry {
    pub(crate) node: Weak<dyn Any + Send + Sync>,
    pub(crate) info: EntryInfo,

    /// Short Rust type name of the feature, compared against lookups.
    pub(crate) rust_type: &'static str,
}

impl CacheEntry {
    pub(crate) fn is_expired(&self) -> bool {
        self.node.strong_count() == 0
    }
}

/// Result of [`ContentCache::sweep`](super::ContentCache::sweep).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Expired entries that were removed.
    pub removed: usize,

    /// Entries left in the cache, in insertion order.
    pub remaining: Vec<EntryInfo>,
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "feature cache: {} expired entries removed, {} remaining",
            self.removed,
            self.remaining.len()
        )?;
        for info in &self.remaining {
            writeln!(f, "  {info}")?;
        }
        Ok(())
    }
}

/// Result of [`ContentCache::finish_rebuild`](super::ContentCache::finish_rebuild).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Distinct fingerprints inserted or reused during the rebuild.
    pub used: usize,

    /// Retained features released because the rebuild did not use them.
    pub released: usize,

    /// Present when the cache is configured to sweep after each rebuild.
    pub sweep: Option<SweepSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn info(symbol: &str, raw: u64) -> EntryInfo {
        EntryInfo {
            fingerprint: Fingerprint::from_raw(raw),
            type_name: "Sphere",
            symbol: symbol.to_string(),
        }
    }

    #[test]
    fn entry_expires_with_its_feature() {
        let feature: Arc<dyn Any + Send + Sync> = Arc::new(5_u32);
        let entry = CacheEntry {
            node: Arc::downgrade(&feature),
            info: info("s", 1),
            rust_type: "u32",
        };

        assert!(!entry.is_expired());
        drop(feature);
        assert!(entry.is_expired());
    }

    #[test]
    fn summary_lists_remaining_entries() {
        let summary = SweepSummary {
            removed: 2,
            remaining: vec![info("ball", 0xff)],
        };

        let text = summary.to_string();
        assert!(text.starts_with("feature cache: 2 expired entries removed, 1 remaining\n"));
        assert!(text.contains("  ball (Sphere) [00000000000000ff]"));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = RebuildReport {
            used: 1,
            released: 0,
            sweep: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["used"], 1);
        assert!(json["sweep"].is_null());
    }
}
