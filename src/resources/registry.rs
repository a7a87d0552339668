//! Process-wide slot registry
//!
//! The registry owns the bookkeeping for every shared resource: a strong
//! count, a weak count and a type-erased destroy callback per slot. It is
//! the only place that decides when a payload is destroyed.
//!
//! # Locking
//!
//! A single mutex serializes every register/retain/release/lock operation.
//! Destroy callbacks run after the lock has been released, so a callback is
//! free to drop or copy other handles, including handles of this registry.
//!
//! # Cycles
//!
//! Counting is purely explicit. Two payloads that hold strong handles to
//! each other are never destroyed; such a cycle leaks.

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::handle::Handle;
use super::slot::{SlotId, SlotTable};
use crate::core::RegistryConfig;

/// Lazily created process-wide registry. Never torn down.
static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

// ============================================================================
// Type-erased payload
// ============================================================================

/// Heap payload plus the callback that tears it down.
struct Payload {
    ptr: NonNull<()>,
    teardown: Box<dyn FnOnce(NonNull<()>) + Send>,
}

// SAFETY: `ptr` is the sole owner of a boxed `T: Send` that is only reclaimed
// by `teardown`, and shared access to it is gated on `T: Sync` by the handles.
unsafe impl Send for Payload {}

impl Payload {
    fn new<T, D>(value: T, destroy: D) -> Self
    where
        T: Send + Sync + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        let ptr = NonNull::from(Box::leak(Box::new(value))).cast::<()>();
        let teardown = Box::new(move |ptr: NonNull<()>| {
            // SAFETY: `ptr` came from `Box::leak` above and `teardown` is an
            // `FnOnce` consumed by `destroy`, so the box is reclaimed once.
            let value = unsafe { Box::from_raw(ptr.cast::<T>().as_ptr()) };
            destroy(*value);
        });

        Self { ptr, teardown }
    }

    fn destroy(self) {
        (self.teardown)(self.ptr);
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Bookkeeping for one slot.
///
/// `payload` is `None` once the payload has been destroyed; the entry then
/// stays behind as a tombstone until the last weak observer lets go.
struct Entry {
    strong: usize,
    weak: usize,
    payload: Option<Payload>,
}

struct Table {
    slots: SlotTable<Entry>,
    registered: u64,
    destroyed: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by registry operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The slot has no entry, or no strong owner to release (bookkeeping bug)
    UnknownSlot(SlotId),
    /// The slot's payload has already been destroyed
    Expired(SlotId),
    /// The registry is bounded and full
    OutOfCapacity {
        /// Configured maximum number of entries
        capacity: usize,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSlot(slot) => write!(f, "unknown slot {slot}"),
            Self::Expired(slot) => write!(f, "slot {slot} has expired"),
            Self::OutOfCapacity { capacity } => {
                write!(f, "registry is full ({capacity} slots)")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of registry occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Entries whose payload is alive
    pub live: usize,
    /// Entries whose payload is destroyed but which still have weak observers
    pub tombstones: usize,
    /// Total payloads ever registered
    pub registered: u64,
    /// Total payloads ever destroyed
    pub destroyed: u64,
    /// Configured entry limit
    pub capacity: Option<usize>,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live: {} | tombstones: {} | registered: {} | destroyed: {}",
            self.live, self.tombstones, self.registered, self.destroyed
        )?;
        if let Some(capacity) = self.capacity {
            write!(f, " | capacity: {capacity}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Table of slot bookkeeping and sole authority over payload destruction.
pub struct Registry {
    table: Mutex<Table>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a standalone registry
    #[must_use]
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(Table {
                slots: SlotTable::with_capacity(config.reserved_capacity()),
                registered: 0,
                destroyed: 0,
            }),
            config,
        })
    }

    /// The process-wide registry, created with the default configuration on
    /// first use unless [`Registry::init_global`] ran first.
    pub fn global() -> &'static Arc<Self> {
        GLOBAL.get_or_init(|| Self::new(RegistryConfig::default()))
    }

    /// Install the configuration of the process-wide registry.
    ///
    /// Returns `false` if the global registry already exists, in which case
    /// `config` is ignored.
    pub fn init_global(config: RegistryConfig) -> bool {
        let mut installed = false;
        GLOBAL.get_or_init(|| {
            installed = true;
            Self::new(config)
        });
        installed
    }

    /// Configuration this registry was created with
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a payload and return the first strong handle to it.
    ///
    /// `destroy` receives the payload exactly once, on whichever thread drops
    /// the last strong handle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::OutOfCapacity`] if the registry is bounded and
    /// full. The payload is passed to `destroy` before returning.
    pub fn register<T, D>(self: &Arc<Self>, payload: T, destroy: D) -> Result<Handle<T>, RegistryError>
    where
        T: Send + Sync + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        let payload = Payload::new(payload, destroy);
        let ptr = payload.ptr.cast::<T>();
        let slot = self.insert(payload)?;

        // SAFETY: `slot` was just created with a strong count of one that now
        // belongs to this handle, and `ptr` is that slot's `T` payload.
        Ok(unsafe { Handle::from_raw_parts(Arc::clone(self), slot, ptr) })
    }

    /// Register a payload that is simply dropped when the last handle goes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::OutOfCapacity`] if the registry is full.
    pub fn register_default<T>(self: &Arc<Self>, payload: T) -> Result<Handle<T>, RegistryError>
    where
        T: Send + Sync + 'static,
    {
        self.register(payload, drop)
    }

    fn insert(&self, payload: Payload) -> Result<SlotId, RegistryError> {
        let mut guard = self.table.lock();

        if let Some(capacity) = self.config.max_slots
            && guard.slots.len() >= capacity
        {
            drop(guard);
            log::warn!("Registry full ({capacity} slots), rejecting payload");
            payload.destroy();
            return Err(RegistryError::OutOfCapacity { capacity });
        }

        let slot = guard.slots.insert(Entry {
            strong: 1,
            weak: 0,
            payload: Some(payload),
        });
        guard.registered += 1;
        drop(guard);

        log::trace!("Registered slot {slot}");
        Ok(slot)
    }

    pub(crate) fn retain_strong(&self, slot: SlotId) -> Result<(), RegistryError> {
        let mut guard = self.table.lock();
        let entry = guard
            .slots
            .get_mut(slot)
            .ok_or(RegistryError::UnknownSlot(slot))?;
        if entry.strong == 0 {
            return Err(RegistryError::Expired(slot));
        }
        entry.strong += 1;
        Ok(())
    }

    pub(crate) fn release_strong(&self, slot: SlotId) -> Result<(), RegistryError> {
        let doomed = {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let entry = table
                .slots
                .get_mut(slot)
                .ok_or(RegistryError::UnknownSlot(slot))?;
            if entry.strong == 0 {
                return Err(RegistryError::UnknownSlot(slot));
            }

            entry.strong -= 1;
            if entry.strong > 0 {
                return Ok(());
            }

            let payload = entry.payload.take();
            if entry.weak == 0 {
                table.slots.remove(slot);
            }
            table.destroyed += 1;
            payload
        };

        log::trace!("Destroying payload of slot {slot}");
        if let Some(payload) = doomed {
            payload.destroy();
        }
        Ok(())
    }

    pub(crate) fn retain_weak(&self, slot: SlotId) -> Result<(), RegistryError> {
        let mut guard = self.table.lock();
        let entry = guard
            .slots
            .get_mut(slot)
            .ok_or(RegistryError::UnknownSlot(slot))?;
        entry.weak += 1;
        Ok(())
    }

    pub(crate) fn release_weak(&self, slot: SlotId) -> Result<(), RegistryError> {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        let entry = table
            .slots
            .get_mut(slot)
            .ok_or(RegistryError::UnknownSlot(slot))?;
        if entry.weak == 0 {
            return Err(RegistryError::UnknownSlot(slot));
        }

        entry.weak -= 1;
        if entry.weak == 0 && entry.strong == 0 {
            table.slots.remove(slot);
            log::trace!("Removed tombstone for slot {slot}");
        }
        Ok(())
    }

    /// Check for a live payload and take a strong reference in one step.
    pub(crate) fn try_lock(&self, slot: SlotId) -> Result<NonNull<()>, RegistryError> {
        let mut guard = self.table.lock();
        let entry = guard
            .slots
            .get_mut(slot)
            .ok_or(RegistryError::UnknownSlot(slot))?;
        let ptr = match &entry.payload {
            Some(payload) if entry.strong > 0 => payload.ptr,
            _ => return Err(RegistryError::Expired(slot)),
        };
        entry.strong += 1;
        Ok(ptr)
    }

    /// Strong count of a slot, `None` if the slot has no entry
    #[must_use]
    pub fn strong_count(&self, slot: SlotId) -> Option<usize> {
        self.table.lock().slots.get(slot).map(|entry| entry.strong)
    }

    /// Weak count of a slot, `None` if the slot has no entry
    #[must_use]
    pub fn weak_count(&self, slot: SlotId) -> Option<usize> {
        self.table.lock().slots.get(slot).map(|entry| entry.weak)
    }

    /// Whether the slot's payload is gone (or the slot never existed)
    #[must_use]
    pub fn is_expired(&self, slot: SlotId) -> bool {
        self.strong_count(slot).is_none_or(|strong| strong == 0)
    }

    /// Whether the registry still has an entry (live or tombstone) for `slot`
    #[must_use]
    pub fn contains(&self, slot: SlotId) -> bool {
        self.table.lock().slots.get(slot).is_some()
    }

    /// Number of entries, including tombstones
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().slots.len()
    }

    /// Check if the registry has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take a snapshot of the registry's counters
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let table = self.table.lock();
        let live = table.slots.iter().filter(|entry| entry.strong > 0).count();

        RegistryStats {
            live,
            tombstones: table.slots.len() - live,
            registered: table.registered,
            destroyed: table.destroyed,
            capacity: self.config.max_slots,
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_destroy(counter: &Arc<AtomicUsize>) -> impl FnOnce(u32) + Send + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_starts_with_one_strong() {
        let registry = Registry::new(RegistryConfig::default());
        let handle = registry.register_default(7_u32).unwrap();
        let slot = handle.slot().unwrap();

        assert_eq!(registry.strong_count(slot), Some(1));
        assert_eq!(registry.weak_count(slot), Some(0));
        assert!(!registry.is_expired(slot));
    }

    #[test]
    fn test_release_destroys_once_and_removes_entry() {
        let registry = Registry::new(RegistryConfig::default());
        let destroyed = Arc::new(AtomicUsize::new(0));
        let handle = registry.register(5_u32, counting_destroy(&destroyed)).unwrap();
        let slot = handle.slot().unwrap();

        drop(handle);

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(!registry.contains(slot));
        assert!(registry.is_expired(slot));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_tombstone_survives_until_last_weak() {
        let registry = Registry::new(RegistryConfig::default());
        let handle = registry.register_default(1_u32).unwrap();
        let slot = handle.slot().unwrap();
        let weak = handle.downgrade();

        drop(handle);
        assert!(registry.contains(slot), "weak observer keeps a tombstone");
        assert_eq!(registry.strong_count(slot), Some(0));
        assert_eq!(registry.stats().tombstones, 1);

        drop(weak);
        assert!(!registry.contains(slot));
    }

    #[test]
    fn test_try_lock_on_tombstone_is_expired() {
        let registry = Registry::new(RegistryConfig::default());
        let handle = registry.register_default(1_u32).unwrap();
        let slot = handle.slot().unwrap();
        let _weak = handle.downgrade();
        drop(handle);

        assert_eq!(registry.try_lock(slot), Err(RegistryError::Expired(slot)));
    }

    #[test]
    fn test_unknown_slot_is_rejected() {
        let registry = Registry::new(RegistryConfig::default());
        let handle = registry.register_default(1_u32).unwrap();
        let slot = handle.slot().unwrap();
        drop(handle);

        assert_eq!(registry.retain_strong(slot), Err(RegistryError::UnknownSlot(slot)));
        assert_eq!(registry.release_weak(slot), Err(RegistryError::UnknownSlot(slot)));
        assert_eq!(registry.try_lock(slot), Err(RegistryError::UnknownSlot(slot)));
    }

    #[test]
    fn test_stale_slot_does_not_alias_reused_slot() {
        let registry = Registry::new(RegistryConfig::default());
        let first = registry.register_default(1_u32).unwrap();
        let stale = first.slot().unwrap();
        drop(first);

        let second = registry.register_default(2_u32).unwrap();
        let fresh = second.slot().unwrap();
        assert_eq!(stale.index(), fresh.index());
        assert_ne!(stale, fresh);
        assert!(registry.strong_count(stale).is_none());
        assert_eq!(registry.strong_count(fresh), Some(1));
    }

    #[test]
    fn test_capacity_bound() {
        let registry = Registry::new(RegistryConfig::default().with_max_slots(1));
        let destroyed = Arc::new(AtomicUsize::new(0));

        let first = registry.register_default(1_u32).unwrap();
        let rejected = registry.register(2_u32, counting_destroy(&destroyed));

        assert!(matches!(
            rejected,
            Err(RegistryError::OutOfCapacity { capacity: 1 })
        ));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1, "rejected payload is handed back");
        assert_eq!(registry.len(), 1);

        drop(first);
        assert!(registry.register_default(3_u32).is_ok());
    }

    #[test]
    fn test_oversized_initial_capacity_is_clamped() {
        let registry =
            Registry::new(RegistryConfig::default().with_initial_capacity(usize::MAX));
        let handle = registry.register_default(1_u32).unwrap();

        assert_eq!(*handle, 1);
        assert_eq!(registry.config().initial_capacity, usize::MAX);
    }

    #[test]
    fn test_tombstones_count_against_capacity() {
        let registry = Registry::new(RegistryConfig::default().with_max_slots(1));
        let handle = registry.register_default(1_u32).unwrap();
        let weak = handle.downgrade();
        drop(handle);

        assert!(registry.register_default(2_u32).is_err());
        drop(weak);
        assert!(registry.register_default(2_u32).is_ok());
    }

    #[test]
    fn test_destroy_may_reenter_registry() {
        let registry = Registry::new(RegistryConfig::default());
        let destroyed = Arc::new(AtomicUsize::new(0));

        let inner = registry.register(1_u32, counting_destroy(&destroyed)).unwrap();
        let outer = registry
            .register(inner, |inner: Handle<u32>| drop(inner))
            .unwrap();

        drop(outer);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stats() {
        let registry = Registry::new(RegistryConfig::default().with_max_slots(8));
        let a = registry.register_default(1_u32).unwrap();
        let b = registry.register_default(2_u32).unwrap();
        let _weak = b.downgrade();
        drop(b);

        let stats = registry.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.destroyed, 1);
        assert!(stats.to_string().contains("capacity: 8"));
        drop(a);
    }

    #[test]
    fn test_global_is_shared() {
        let a = Registry::global();
        let b = Registry::global();
        assert!(Arc::ptr_eq(a, b));
        assert!(!Registry::init_global(RegistryConfig::default()));
    }
}
