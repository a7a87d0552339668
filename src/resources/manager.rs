//! Keyed resource cache
//!
//! A [`ResourceManager`] maps a resource key (usually a path) to a weak
//! handle so that identical resources are loaded once and reclaimed once
//! nobody holds them any more.
//!
//! # Loading
//!
//! Concurrent `get_or_load` calls for the same missing key are gated: the
//! first caller runs the loader while the others wait for it, then share the
//! winner's slot. Loaders never run while the cache or registry lock is held,
//! so different keys load in parallel.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;

use super::handle::{Handle, WeakHandle};
use super::registry::{Registry, RegistryError};

type DestroyFn<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Errors from [`ResourceManager::get_or_load`]
#[derive(Debug)]
pub enum LoadError<E> {
    /// The loader failed; the cache was left untouched
    Loader(E),
    /// The registry refused the loaded payload
    Registry(RegistryError),
}

impl<E: fmt::Display> fmt::Display for LoadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loader(e) => write!(f, "Loader error: {e}"),
            Self::Registry(e) => write!(f, "Registry error: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for LoadError<E> {}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerStats {
    /// Requests served from a live cache row
    pub hits: u64,
    /// Requests that found no live cache row
    pub misses: u64,
    /// Loader executions that succeeded
    pub loads: u64,
    /// Loader executions that failed
    pub load_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type GateMap<K> = Mutex<FxHashMap<K, Arc<Mutex<()>>>>;

/// A caller's share of the per-key loading gate.
///
/// Dropping it (also while unwinding out of a panicking loader) removes the
/// gate from the map once no other caller holds it.
struct InFlightGate<'a, K: Eq + Hash> {
    map: &'a GateMap<K>,
    key: &'a K,
    gate: Option<Arc<Mutex<()>>>,
}

impl<'a, K: Eq + Hash + Clone> InFlightGate<'a, K> {
    fn enter(map: &'a GateMap<K>, key: &'a K) -> Self {
        let gate = Arc::clone(map.lock().entry(key.clone()).or_default());
        Self {
            map,
            key,
            gate: Some(gate),
        }
    }

    /// Block until no other caller is loading this key
    fn wait(&self) -> Option<MutexGuard<'_, ()>> {
        self.gate.as_deref().map(|gate| gate.lock())
    }
}

impl<K: Eq + Hash> Drop for InFlightGate<'_, K> {
    fn drop(&mut self) {
        // Shares are taken and released under the map lock, so the last
        // caller out sees the map as the only holder
        let mut map = self.map.lock();
        drop(self.gate.take());
        if map
            .get(self.key)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            map.remove(self.key);
        }
    }
}

/// Deduplicating cache from keys to payloads of type `T`.
///
/// The cache only holds weak handles; it never keeps a payload alive on its
/// own. Expired rows linger until [`ResourceManager::purge_expired`] or the
/// next load for the same key replaces them.
pub struct ResourceManager<K, T> {
    registry: Arc<Registry>,
    cache: Mutex<FxHashMap<K, WeakHandle<T>>>,
    /// Per-key gates held while a loader runs
    in_flight: GateMap<K>,
    destroy: DestroyFn<T>,
    counters: Counters,
}

impl<K, T> ResourceManager<K, T>
where
    K: Eq + Hash + Clone,
    T: Send + Sync + 'static,
{
    /// Create a manager whose payloads are simply dropped when unreferenced
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_destroy(registry, drop)
    }

    /// Create a manager that tears payloads down with `destroy`
    #[must_use]
    pub fn with_destroy(registry: Arc<Registry>, destroy: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            registry,
            cache: Mutex::new(FxHashMap::default()),
            in_flight: Mutex::new(FxHashMap::default()),
            destroy: Arc::new(destroy),
            counters: Counters::default(),
        }
    }

    /// Registry payloads are registered with
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Return the cached payload for `key`, loading it on a miss.
    ///
    /// The loader may use this manager for other keys, but must not request
    /// `key` itself.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Loader`] with the loader's own error, or
    /// [`LoadError::Registry`] if the registry is full. No cache row is
    /// written in either case.
    pub fn get_or_load<E>(
        &self,
        key: impl Into<K>,
        loader: impl FnOnce() -> Result<T, E>,
    ) -> Result<Handle<T>, LoadError<E>> {
        let key = key.into();
        if let Some(handle) = self.lookup(&key) {
            Counters::bump(&self.counters.hits);
            return Ok(handle);
        }

        let gate = InFlightGate::enter(&self.in_flight, &key);
        let _loading = gate.wait();

        // Another caller may have published while we waited on the gate
        if let Some(handle) = self.lookup(&key) {
            Counters::bump(&self.counters.hits);
            return Ok(handle);
        }
        Counters::bump(&self.counters.misses);
        self.load(&key, loader)
    }

    fn load<E>(&self, key: &K, loader: impl FnOnce() -> Result<T, E>) -> Result<Handle<T>, LoadError<E>> {
        let payload = match loader() {
            Ok(payload) => payload,
            Err(err) => {
                Counters::bump(&self.counters.load_failures);
                log::warn!("Resource loader failed, cache left untouched");
                return Err(LoadError::Loader(err));
            }
        };

        let destroy = Arc::clone(&self.destroy);
        let handle = self
            .registry
            .register(payload, move |payload| destroy(payload))
            .map_err(LoadError::Registry)?;
        Counters::bump(&self.counters.loads);

        let stale = self.cache.lock().insert(key.clone(), handle.downgrade());
        drop(stale);
        log::debug!("Loaded resource into slot {:?}", handle.slot());

        Ok(handle)
    }

    /// Upgrade the cached row for `key`.
    ///
    /// The upgraded handle leaves the lock scope before anything else can be
    /// dropped, so no destroy callback runs under the cache lock.
    fn lookup<Q>(&self, key: &Q) -> Option<Handle<T>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.cache.lock().get(key).and_then(WeakHandle::upgrade)
    }

    /// Get the cached payload for `key` without loading
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<Handle<T>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let handle = self.lookup(key);
        if handle.is_some() {
            Counters::bump(&self.counters.hits);
        } else {
            Counters::bump(&self.counters.misses);
        }
        handle
    }

    /// Cache an already-loaded payload under `key`.
    ///
    /// If a live payload is cached for `key` it is returned instead and
    /// `payload` is handed to the destroy callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is full.
    pub fn insert(&self, key: impl Into<K>, payload: T) -> Result<Handle<T>, RegistryError> {
        let mut spare = Some(payload);
        let result = self.get_or_load(key, || spare.take().ok_or(()));
        if let Some(unused) = spare {
            (self.destroy)(unused);
        }

        match result {
            Ok(handle) => Ok(handle),
            Err(LoadError::Registry(err)) => Err(err),
            Err(LoadError::Loader(())) => unreachable!("payload is taken at most once"),
        }
    }

    /// Check if a live payload is cached for `key`
    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.cache.lock().get(key).is_some_and(WeakHandle::is_alive)
    }

    /// Remove the row for `key`.
    ///
    /// Outstanding strong handles keep the payload alive. Returns true if a
    /// row was removed.
    pub fn evict<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let removed = self.cache.lock().remove(key);
        removed.is_some()
    }

    /// Remove every row whose payload has been destroyed.
    ///
    /// Returns the number of rows removed.
    pub fn purge_expired(&self) -> usize {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, weak| weak.is_alive());
        let purged = before - cache.len();
        drop(cache);

        if purged > 0 {
            log::debug!("Purged {purged} expired cache rows");
        }
        purged
    }

    /// Remove all rows
    pub fn clear(&self) {
        let rows = std::mem::take(&mut *self.cache.lock());
        drop(rows);
    }

    /// Number of rows, including expired ones not yet purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Check if the cache has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Keys whose payloads are currently alive
    #[must_use]
    pub fn live_keys(&self) -> Vec<K> {
        self.cache
            .lock()
            .iter()
            .filter(|(_, weak)| weak.is_alive())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Snapshot of the cache counters
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
        }
    }
}

impl<K, T> fmt::Debug for ResourceManager<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("rows", &self.cache.lock().len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}
