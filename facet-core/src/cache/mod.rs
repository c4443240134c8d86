//! Content-Addressed Feature Cache
//!
//! The cache maps a [`Fingerprint`] to a weak reference to the feature that
//! was built for it, so that a structurally identical feature met later (in
//! the same model or after a script edit) can reuse the existing shape
//! instead of rebuilding it.
//!
//! # Ownership
//!
//! The cache never owns what it indexes. The model graph holds the strong
//! references; when the last one is dropped the entry expires. Expired entries
//! stay in the table until [`ContentCache::sweep`] removes them, and
//! [`ContentCache::lookup`] reports them as [`CacheError::Expired`] rather than
//! pretending they were never there.
//!
//! The one exception is retention: with `keep_last_instances = n` the cache
//! also keeps the last `n` inserted features alive itself, so results survive
//! between two rebuilds of a model. Retained features the next rebuild does
//! not use are released when that rebuild finishes.
//!
//! # Thread Safety
//!
//! One `RwLock` guards the table. Lookups run under the read lock, and the
//! weak reference is upgraded before the lock is released. Inserts, sweeps and
//! session bookkeeping take the write lock. Feature hooks (fingerprinting,
//! recompute) never run while the lock is held.

mod entry;

pub use entry::{EntryInfo, RebuildReport, SweepSummary};

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use entry::CacheEntry;
use crate::config::CacheConfig;
use crate::error::{CacheError, DuplicateInsert, ResolveError};
use crate::hash::Fingerprint;
use crate::node::{BuildContext, Feature};

struct CacheTable {
    entries: IndexMap<Fingerprint, CacheEntry>,
    retained: VecDeque<(Fingerprint, Arc<dyn Any + Send + Sync>)>,
}

/// Registry of previously built features, keyed by fingerprint.
pub struct ContentCache {
    table: RwLock<CacheTable>,

    /// Fingerprints used since `begin_rebuild`, if a rebuild is in progress.
    session: Mutex<Option<HashSet<Fingerprint>>>,

    config: CacheConfig,
}

static GLOBAL: OnceLock<ContentCache> = OnceLock::new();

/// `Face` rather than `my_crate::features::Face`.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let path_end = full.find('<').unwrap_or(full.len());
    match full[..path_end].rfind("::") {
        Some(i) => &full[i + 2..],
        None => full,
    }
}

impl ContentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            table: RwLock::new(CacheTable {
                entries: IndexMap::new(),
                retained: VecDeque::new(),
            }),
            session: Mutex::new(None),
            config,
        }
    }

    /// The process-wide cache, created with default settings on first use
    /// unless [`init_global`](Self::init_global) ran before.
    pub fn global() -> &'static ContentCache {
        GLOBAL.get_or_init(ContentCache::default)
    }

    /// Install the process-wide cache with `config`.
    ///
    /// Fails, handing the config back, if the global cache already exists.
    pub fn init_global(config: CacheConfig) -> Result<(), CacheConfig> {
        GLOBAL
            .set(ContentCache::new(config))
            .map_err(|cache| cache.config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Register a built feature under its fingerprint.
    ///
    /// Inserting the same object twice is a no-op. Inserting a different
    /// object whose fingerprint already has a live entry fails with
    /// [`CacheError::DuplicateInsert`]; an expired entry is overwritten.
    pub fn insert<T: Feature>(&self, node: &Arc<T>) -> Result<Fingerprint, CacheError> {
        let fingerprint = node.fingerprint();
        let info = EntryInfo {
            fingerprint,
            type_name: node.type_name(),
            symbol: node.display_name(),
        };
        let any: Arc<dyn Any + Send + Sync> = node.clone();

        let mut table = self.table.write();

        if let Some(existing) = table.entries.get(&fingerprint) {
            if let Some(live) = existing.node.upgrade() {
                if Arc::as_ptr(&live) as *const () == Arc::as_ptr(&any) as *const () {
                    self.record_use(fingerprint);
                    return Ok(fingerprint);
                }

                let duplicate = DuplicateInsert {
                    inserted: info,
                    existing: existing.info.clone(),
                };
                tracing::error!(%duplicate, "duplicate cache insert");
                return Err(CacheError::DuplicateInsert(Box::new(duplicate)));
            }
        }

        tracing::debug!(
            feature = %info.symbol,
            kind = info.type_name,
            %fingerprint,
            "added to feature cache"
        );
        table.entries.insert(
            fingerprint,
            CacheEntry {
                node: Arc::downgrade(&any),
                info,
                rust_type: short_type_name::<T>(),
            },
        );

        let keep = self.config.keep_last_instances;
        if keep > 0 {
            table.retained.push_back((fingerprint, any));
            while table.retained.len() > keep {
                table.retained.pop_front();
            }
        }

        drop(table);
        self.record_use(fingerprint);
        Ok(fingerprint)
    }

    /// Whether an entry exists for `fingerprint`, expired or not.
    ///
    /// For diagnostics; use [`lookup`](Self::lookup) to decide whether to
    /// rebuild.
    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.table.read().entries.contains_key(&fingerprint)
    }

    /// Fetch the live feature cached under `fingerprint` as a `T`.
    pub fn lookup<T: Feature>(&self, fingerprint: Fingerprint) -> Result<Arc<T>, CacheError> {
        let table = self.table.read();

        let entry = table
            .entries
            .get(&fingerprint)
            .ok_or(CacheError::NotFound(fingerprint))?;

        let Some(node) = entry.node.upgrade() else {
            tracing::warn!(feature = %entry.info, "lookup of expired cache entry");
            return Err(CacheError::Expired(fingerprint));
        };

        let found = entry.rust_type;
        node.downcast::<T>().map_err(|_| CacheError::TypeMismatch {
            fingerprint,
            expected: short_type_name::<T>(),
            found,
        })
    }

    /// [`lookup`](Self::lookup), recording the fingerprint as used by the
    /// rebuild in progress.
    pub fn mark_as_used<T: Feature>(&self, fingerprint: Fingerprint) -> Result<Arc<T>, CacheError> {
        let node = self.lookup::<T>(fingerprint)?;
        self.record_use(fingerprint);
        tracing::trace!(%fingerprint, "restored from feature cache");
        Ok(node)
    }

    /// Return the cached equivalent of `candidate`, or build and cache it.
    ///
    /// On a hit the candidate is dropped unbuilt. On a miss, or if the cached
    /// feature has expired, the candidate is materialized and inserted.
    pub fn resolve<T: Feature>(
        &self,
        candidate: Arc<T>,
        ctx: &BuildContext,
    ) -> Result<Arc<T>, ResolveError> {
        let fingerprint = candidate.fingerprint();

        match self.mark_as_used::<T>(fingerprint) {
            Ok(cached) => {
                cached.ensure_materialized(ctx)?;
                return Ok(cached);
            }
            Err(CacheError::NotFound(_)) | Err(CacheError::Expired(_)) => {}
            Err(err) => return Err(err.into()),
        }

        candidate.ensure_materialized(ctx)?;

        match self.insert(&candidate) {
            Ok(_) => Ok(candidate),
            Err(CacheError::DuplicateInsert(duplicate)) => {
                // Another thread resolved an identical feature first.
                tracing::debug!(%duplicate, "lost insert race, using cached feature");
                Ok(self.mark_as_used::<T>(fingerprint)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove every expired entry.
    pub fn sweep(&self) -> SweepSummary {
        let mut table = self.table.write();

        let before = table.entries.len();
        table.entries.retain(|_, entry| !entry.is_expired());

        let summary = SweepSummary {
            removed: before - table.entries.len(),
            remaining: table.entries.values().map(|e| e.info.clone()).collect(),
        };
        tracing::debug!(
            removed = summary.removed,
            remaining = summary.remaining.len(),
            "swept feature cache"
        );
        summary
    }

    /// Start recording which fingerprints a model rebuild uses.
    pub fn begin_rebuild(&self) {
        let mut session = self.session.lock();
        if session.is_some() {
            tracing::warn!("rebuild started while another was in progress; restarting session");
        }
        *session = Some(HashSet::new());
    }

    /// End the rebuild session started by [`begin_rebuild`](Self::begin_rebuild).
    ///
    /// Retained features the rebuild did not use are released, then the
    /// cache is swept if configured to.
    pub fn finish_rebuild(&self) -> RebuildReport {
        let used = match self.session.lock().take() {
            Some(used) => used,
            None => {
                tracing::warn!("finish_rebuild called without begin_rebuild");
                HashSet::new()
            }
        };

        let released = {
            let mut table = self.table.write();
            let before = table.retained.len();
            table.retained.retain(|(fingerprint, _)| used.contains(fingerprint));
            before - table.retained.len()
        };

        let sweep = self.config.sweep_on_finish.then(|| self.sweep());

        tracing::debug!(used = used.len(), released, "rebuild finished");
        RebuildReport {
            used: used.len(),
            released,
            sweep,
        }
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    /// Number of features the cache currently keeps alive itself.
    pub fn retained_len(&self) -> usize {
        self.table.read().retained.len()
    }

    /// Drop every strong reference held for retention.
    pub fn clear_retained(&self) {
        self.table.write().retained.clear();
    }

    fn record_use(&self, fingerprint: Fingerprint) {
        if let Some(used) = self.session.lock().as_mut() {
            used.insert(fingerprint);
        }
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
