//! PrincipalCache - owner of all principal entries
//!
//! The cache is the only writer of [`PrincipalEntry`] values:
//! - Loads documents from a [`PrincipalStore`] and builds entries
//! - Publishes entries to consumers as refcounted [`PrincipalHandle`]s
//! - Invalidates entries when policy changes
//! - Publishes successor entries for lazily probed legacy principals
//!
//! All reference count changes happen while the table mutex is held. The
//! mutex is never held across an await point and never while a handle is
//! cloned or dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info, warn};

use ac_config::{AppConfig, CacheConfig};

use crate::entry::PrincipalEntry;
use crate::error::CacheError;
use crate::store::{InMemoryPrincipalStore, PrincipalDocument, PrincipalStore};
use crate::types::{Privilege, PrincipalName, SchemaVersion};
use crate::Result;

struct CacheState {
    entries: HashMap<PrincipalName, Arc<PrincipalEntry>>,

    /// Bumped whenever an entry is published, replaced or invalidated. A load
    /// or probe that started under an older generation is discarded.
    generation: u64,
}

struct CacheInner {
    store: Arc<dyn PrincipalStore>,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

/// Shared, refcounted cache of principal access snapshots
#[derive(Clone)]
pub struct PrincipalCache {
    inner: Arc<CacheInner>,
}

impl PrincipalCache {
    pub fn new(store: Arc<dyn PrincipalStore>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                config,
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    generation: 0,
                }),
            }),
        }
    }

    pub fn from_config(store: Arc<dyn PrincipalStore>, config: &AppConfig) -> Self {
        Self::new(store, config.cache.clone())
    }

    /// Build a cache over an in-memory store, seeded from `store.documents_path` when set
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let store = match config.store.documents_path() {
            Some(path) => InMemoryPrincipalStore::load_json_file(path).await?,
            None => InMemoryPrincipalStore::new(),
        };
        Ok(Self::from_config(Arc::new(store), config))
    }

    /// Get a handle to the current entry for `name`, loading it on a miss
    pub async fn acquire(&self, name: &PrincipalName) -> Result<PrincipalHandle> {
        loop {
            let generation = match self.inner.lookup(name) {
                Ok(handle) => {
                    debug!(principal = %name, "Principal cache hit");
                    metrics::counter!("access_cache.hits_total").increment(1);
                    return Ok(handle);
                }
                Err(generation) => generation,
            };

            debug!(principal = %name, "Principal cache miss");
            metrics::counter!("access_cache.misses_total").increment(1);

            let entry = self.load(name).await?;
            match self.inner.install_loaded(entry, generation) {
                Some(handle) => return Ok(handle),
                None => {
                    warn!(principal = %name, "Cache changed while loading principal, reloading");
                }
            }
        }
    }

    /// Mark the entry for `name` stale and drop it from the table.
    /// Returns false if nothing was cached for it.
    pub fn invalidate(&self, name: &PrincipalName) -> bool {
        let mut state = self.inner.state.lock();
        state.generation += 1;

        let removed = state.entries.remove(name);
        record_size(&state);
        drop(state);

        match removed {
            Some(entry) => {
                retire(&entry);
                info!(principal = %name, "Invalidated principal");
                true
            }
            None => false,
        }
    }

    /// Mark every cached entry stale and empty the table
    pub fn invalidate_all(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;

        let removed: Vec<_> = state.entries.drain().map(|(_, entry)| entry).collect();
        record_size(&state);
        drop(state);

        for entry in &removed {
            entry.invalidate();
        }
        info!(count = removed.len(), "Invalidated all principals");
        metrics::counter!("access_cache.invalidations_total").increment(removed.len() as u64);
    }

    /// Reload `name` from the store.
    ///
    /// Unreferenced entries are updated in place; referenced ones are
    /// invalidated and replaced so current holders keep a consistent view.
    /// If anything was published for the cache while the document was being
    /// loaded, the load is discarded and repeated, so the entry left behind
    /// always comes from the most recent load.
    pub async fn refresh(&self, name: &PrincipalName) -> Result<()> {
        loop {
            let generation = self.generation();

            let fresh = match self.load(name).await {
                Ok(entry) => entry,
                Err(err @ CacheError::PrincipalNotFound { .. }) => {
                    self.invalidate(name);
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            if self.inner.install_refreshed(fresh, generation) {
                return Ok(());
            }
            warn!(principal = %name, "Cache changed while refreshing principal, reloading");
        }
    }

    /// Make sure legacy privileges for `database` are part of the principal's entry.
    ///
    /// Current-schema entries and databases that were already probed come
    /// back as another handle to the same entry. Otherwise the store resolves
    /// the database's privileges and a successor entry replaces the old one,
    /// which is invalidated.
    ///
    /// Privileges resolved for an entry that was replaced or invalidated
    /// while the store was queried are thrown away and resolved again
    /// against the current entry. If the principal is no longer cached at
    /// all, the (stale) handle comes back unchanged.
    pub async fn probe_legacy(
        &self,
        handle: &PrincipalHandle,
        database: &str,
    ) -> Result<PrincipalHandle> {
        let mut current = handle.clone();

        loop {
            let settled = current.schema_version() != SchemaVersion::V1
                || current.has_probed_legacy(database);
            if settled {
                return Ok(current);
            }

            let generation = self.generation();
            let privileges = self
                .inner
                .store
                .legacy_privileges(current.name(), database)
                .await?;

            debug!(
                principal = %current.name(),
                database,
                count = privileges.len(),
                "Probed legacy privileges"
            );

            match self.inner.install_probed(&current, database, privileges, generation) {
                ProbeInstall::Published(successor) => return Ok(successor),
                ProbeInstall::Superseded(latest) => {
                    debug!(
                        principal = %current.name(),
                        database,
                        "Principal changed while probing, probing current entry"
                    );
                    current = latest;
                }
                ProbeInstall::Evicted => return Ok(current),
            }
        }
    }

    /// Number of live handles on the cached entry for `name`
    pub fn ref_count(&self, name: &PrincipalName) -> Option<u32> {
        let state = self.inner.state.lock();
        state.entries.get(name).map(|entry| entry.ref_count())
    }

    pub fn contains(&self, name: &PrincipalName) -> bool {
        self.inner.state.lock().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    async fn load(&self, name: &PrincipalName) -> Result<PrincipalEntry> {
        let document = self
            .inner
            .store
            .find_principal(name)
            .await?
            .ok_or_else(|| CacheError::not_found(name))?;

        self.build_entry(name, document)
    }

    fn build_entry(
        &self,
        name: &PrincipalName,
        document: PrincipalDocument,
    ) -> Result<PrincipalEntry> {
        if document.schema_version == SchemaVersion::V1 && !self.inner.config.accept_legacy_schema {
            return Err(CacheError::UnsupportedSchema {
                name: name.clone(),
                version: document.schema_version,
            });
        }

        if &document.name != name {
            warn!(
                requested = %name,
                stored = %document.name,
                "Store returned a document under another name"
            );
        }

        let mut entry = PrincipalEntry::new(name.clone());
        entry.set_credentials(document.credentials);
        entry.add_roles(document.roles);
        entry.add_privileges(document.privileges);
        if document.schema_version == SchemaVersion::V1 {
            entry.set_schema_version_1();
        }
        Ok(entry)
    }
}

impl fmt::Debug for PrincipalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PrincipalCache")
            .field("entries", &state.entries.len())
            .field("generation", &state.generation)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Outcome of publishing a probed successor
enum ProbeInstall {
    /// Successor published, predecessor invalidated
    Published(PrincipalHandle),
    /// The probed entry is no longer current; holds the entry that is
    Superseded(PrincipalHandle),
    /// Nothing is cached for the principal anymore
    Evicted,
}

impl CacheInner {
    /// Hand out a new reference. Taking the state proves the table lock is held.
    fn checkout(
        self: &Arc<Self>,
        _locked: &CacheState,
        entry: &Arc<PrincipalEntry>,
    ) -> PrincipalHandle {
        entry.increment_ref_count();
        PrincipalHandle {
            entry: Arc::clone(entry),
            cache: Arc::clone(self),
        }
    }

    /// Handle for a cached entry, or the current generation on a miss
    fn lookup(self: &Arc<Self>, name: &PrincipalName) -> std::result::Result<PrincipalHandle, u64> {
        let state = self.state.lock();
        match state.entries.get(name) {
            Some(entry) => Ok(self.checkout(&state, entry)),
            None => Err(state.generation),
        }
    }

    fn install_loaded(
        self: &Arc<Self>,
        entry: PrincipalEntry,
        generation: u64,
    ) -> Option<PrincipalHandle> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }

        // Another task may have published the same principal while we were loading
        let published = Arc::clone(
            state
                .entries
                .entry(entry.name().clone())
                .or_insert_with(|| Arc::new(entry)),
        );
        state.generation += 1;
        record_size(&state);

        Some(self.checkout(&state, &published))
    }

    /// Returns false, leaving the table alone, if the generation moved on
    fn install_refreshed(&self, fresh: PrincipalEntry, generation: u64) -> bool {
        let name = fresh.name().clone();
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(principal = %name, "Discarding refresh that raced with a table change");
            return false;
        }

        let replaced = match state.entries.get_mut(&name) {
            Some(current) => match Arc::get_mut(current) {
                Some(entry) => {
                    entry.copy_from(&fresh);
                    debug!(principal = %name, "Refreshed principal in place");
                    None
                }
                None => {
                    debug!(principal = %name, "Principal in use, publishing refreshed entry");
                    Some(std::mem::replace(current, Arc::new(fresh)))
                }
            },
            None => {
                state.entries.insert(name, Arc::new(fresh));
                None
            }
        };
        state.generation += 1;
        record_size(&state);
        drop(state);

        if let Some(old) = replaced {
            retire(&old);
        }
        true
    }

    /// Publish a successor of `probed` holding `privileges`, provided
    /// `probed` is still the current entry and nothing changed since
    /// `generation`. Privileges resolved against anything else are dropped.
    fn install_probed(
        self: &Arc<Self>,
        probed: &PrincipalHandle,
        database: &str,
        privileges: Vec<Privilege>,
        generation: u64,
    ) -> ProbeInstall {
        let mut state = self.state.lock();

        let current = match state.entries.get(probed.name()) {
            Some(current) => Arc::clone(current),
            None => return ProbeInstall::Evicted,
        };

        if state.generation != generation || !Arc::ptr_eq(&current, &probed.entry) {
            return ProbeInstall::Superseded(self.checkout(&state, &current));
        }

        let mut successor = PrincipalEntry::new(current.name().clone());
        successor.copy_from(&current);
        successor.add_privileges(privileges);
        successor.mark_probed_legacy(database);

        let successor = Arc::new(successor);
        state
            .entries
            .insert(successor.name().clone(), Arc::clone(&successor));
        state.generation += 1;
        retire(&current);

        ProbeInstall::Published(self.checkout(&state, &successor))
    }

    fn release(&self, entry: &Arc<PrincipalEntry>) {
        let mut state = self.state.lock();
        entry.decrement_ref_count();

        if entry.ref_count() > 0 || self.config.retain_released {
            return;
        }

        let is_current = state
            .entries
            .get(entry.name())
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if is_current {
            state.entries.remove(entry.name());
            record_size(&state);
            debug!(principal = %entry.name(), "Released last reference, dropped from cache");
        }
    }
}

/// Invalidate an entry that left the table
fn retire(entry: &PrincipalEntry) {
    entry.invalidate();
    metrics::counter!("access_cache.invalidations_total").increment(1);
}

fn record_size(state: &CacheState) {
    metrics::gauge!("access_cache.entries").set(state.entries.len() as f64);
}

/// Read-only, refcounted view of a principal's entry.
///
/// Dropping the handle releases the reference. Check
/// [`is_valid`](PrincipalEntry::is_valid) before trusting the data for new
/// work; stale handles should be dropped and re-acquired.
pub struct PrincipalHandle {
    entry: Arc<PrincipalEntry>,
    cache: Arc<CacheInner>,
}

impl PrincipalHandle {
    /// Whether both handles point at the same entry instance
    pub fn ptr_eq(&self, other: &PrincipalHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Deref for PrincipalHandle {
    type Target = PrincipalEntry;

    fn deref(&self) -> &PrincipalEntry {
        &self.entry
    }
}

impl Clone for PrincipalHandle {
    fn clone(&self) -> Self {
        let state = self.cache.state.lock();
        self.cache.checkout(&state, &self.entry)
    }
}

impl Drop for PrincipalHandle {
    fn drop(&mut self) {
        self.cache.release(&self.entry);
    }
}

impl fmt::Debug for PrincipalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrincipalHandle").field(&*self.entry).finish()
    }
}
