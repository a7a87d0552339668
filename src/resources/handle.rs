//! Resource handle implementation
//!
//! Provides strong and weak handles to payloads owned by a [`Registry`].
//! The payload type never needs to know it is being counted: all counting
//! lives in the registry entry for the handle's slot.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use super::registry::{Registry, RegistryError};
use super::slot::SlotId;

/// Errors from handle access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// Dereferenced an empty handle
    NullAccess,
    /// The payload has already been destroyed
    Expired,
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullAccess => write!(f, "access through an empty resource handle"),
            Self::Expired => write!(f, "resource has expired"),
        }
    }
}

impl std::error::Error for HandleError {}

// ============================================================================
// Strong handle
// ============================================================================

struct StrongRef<T> {
    registry: Arc<Registry>,
    slot: SlotId,
    ptr: NonNull<T>,
}

/// A strong handle to a payload of type `T`.
///
/// The payload stays alive as long as at least one non-empty `Handle`
/// refers to its slot. Cloning retains, dropping releases, and a plain Rust
/// move transfers the reference without touching the registry.
pub struct Handle<T> {
    strong: Option<StrongRef<T>>,
    /// The last handle may destroy a `T`
    _owns: PhantomData<T>,
}

// SAFETY: handles share `&T` across threads (needs `T: Sync`) and whichever
// thread drops the last one destroys the `T` (needs `T: Send`), as with `Arc`.
unsafe impl<T: Send + Sync> Send for Handle<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for Handle<T> {}

impl<T> Handle<T> {
    /// Wrap a strong reference that the caller already counted.
    ///
    /// # Safety
    ///
    /// `slot` must have a strong count in `registry` that is owned by the
    /// returned handle, and `ptr` must be that slot's payload of type `T`.
    pub(crate) unsafe fn from_raw_parts(
        registry: Arc<Registry>,
        slot: SlotId,
        ptr: NonNull<T>,
    ) -> Self {
        Self {
            strong: Some(StrongRef {
                registry,
                slot,
                ptr,
            }),
            _owns: PhantomData,
        }
    }

    /// Create a handle that refers to nothing
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            strong: None,
            _owns: PhantomData,
        }
    }

    /// Check if this handle refers to nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.strong.is_none()
    }

    /// Slot this handle refers to
    #[must_use]
    pub fn slot(&self) -> Option<SlotId> {
        self.strong.as_ref().map(|strong| strong.slot)
    }

    /// Get a reference to the payload, `None` for an empty handle
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.strong.as_ref().map(|strong| {
            // SAFETY: this handle owns one strong count, so the registry has
            // not destroyed the payload and will not until the count is given
            // back, which needs `&mut self`. Nothing hands out `&mut T`.
            unsafe { strong.ptr.as_ref() }
        })
    }

    /// Get a reference to the payload.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::NullAccess`] for an empty handle.
    #[inline]
    pub fn try_get(&self) -> Result<&T, HandleError> {
        self.get().ok_or(HandleError::NullAccess)
    }

    /// Number of strong handles to this slot (0 for an empty handle)
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.strong
            .as_ref()
            .and_then(|strong| strong.registry.strong_count(strong.slot))
            .unwrap_or(0)
    }

    /// Number of weak handles to this slot (0 for an empty handle)
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.strong
            .as_ref()
            .and_then(|strong| strong.registry.weak_count(strong.slot))
            .unwrap_or(0)
    }

    /// Create a weak handle that doesn't keep the payload alive
    #[must_use]
    pub fn downgrade(&self) -> WeakHandle<T> {
        let Some(strong) = &self.strong else {
            return WeakHandle::empty();
        };
        if let Err(err) = strong.registry.retain_weak(strong.slot) {
            panic!("cannot downgrade resource handle {}: {err}", strong.slot);
        }

        WeakHandle {
            weak: Some(WeakRef {
                registry: Arc::clone(&strong.registry),
                slot: strong.slot,
            }),
            _marker: PhantomData,
        }
    }

    /// Release this handle's reference and leave it empty.
    ///
    /// Releasing an empty handle does nothing.
    pub fn reset(&mut self) {
        let Some(strong) = self.strong.take() else {
            return;
        };
        if let Err(err) = strong.registry.release_strong(strong.slot) {
            log::error!("Failed to release resource handle {}: {err}", strong.slot);
            debug_assert!(false, "failed to release resource handle: {err}");
        }
    }

    /// Move the reference out, leaving this handle empty
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Whether two handles refer to the same slot of the same registry
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.identity() == b.identity()
    }

    fn identity(&self) -> Option<(*const Registry, SlotId)> {
        self.strong
            .as_ref()
            .map(|strong| (Arc::as_ptr(&strong.registry), strong.slot))
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        let Some(strong) = &self.strong else {
            return Self::empty();
        };
        if let Err(err) = strong.registry.retain_strong(strong.slot) {
            panic!("cannot copy resource handle {}: {err}", strong.slot);
        }

        // SAFETY: the strong count taken above belongs to the new handle.
        unsafe { Self::from_raw_parts(Arc::clone(&strong.registry), strong.slot, strong.ptr) }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics with [`HandleError::NullAccess`] if the handle is empty.
    fn deref(&self) -> &Self::Target {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("slot", &self.slot()).finish()
    }
}

// ============================================================================
// Weak handle
// ============================================================================

struct WeakRef {
    registry: Arc<Registry>,
    slot: SlotId,
}

/// A weak handle that observes a payload without keeping it alive.
///
/// Use [`WeakHandle::lock`] to attempt to get a strong handle.
pub struct WeakHandle<T> {
    weak: Option<WeakRef>,
    _marker: PhantomData<*const T>,
}

// SAFETY: a weak handle can be locked into a `Handle<T>` on any thread.
unsafe impl<T: Send + Sync> Send for WeakHandle<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for WeakHandle<T> {}

impl<T> WeakHandle<T> {
    /// Create a weak handle that observes nothing
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            weak: None,
            _marker: PhantomData,
        }
    }

    /// Slot this handle observes
    #[must_use]
    pub fn slot(&self) -> Option<SlotId> {
        self.weak.as_ref().map(|weak| weak.slot)
    }

    /// Attempt to get a strong handle.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Expired`] if the payload has been destroyed or
    /// this weak handle is empty.
    pub fn lock(&self) -> Result<Handle<T>, HandleError> {
        let weak = self.weak.as_ref().ok_or(HandleError::Expired)?;
        match weak.registry.try_lock(weak.slot) {
            // SAFETY: `try_lock` took a strong count for the new handle, and
            // this slot was created from a `Handle<T>`, so its payload is a `T`.
            Ok(ptr) => Ok(unsafe {
                Handle::from_raw_parts(Arc::clone(&weak.registry), weak.slot, ptr.cast::<T>())
            }),
            Err(RegistryError::Expired(_)) => Err(HandleError::Expired),
            Err(err) => panic!("weak resource handle {} is corrupt: {err}", weak.slot),
        }
    }

    /// Attempt to upgrade to a strong handle.
    ///
    /// Returns `None` if the payload has been destroyed.
    #[must_use]
    pub fn upgrade(&self) -> Option<Handle<T>> {
        self.lock().ok()
    }

    /// Check if the payload has been destroyed (always true when empty)
    #[must_use]
    pub fn expired(&self) -> bool {
        self.weak
            .as_ref()
            .is_none_or(|weak| weak.registry.is_expired(weak.slot))
    }

    /// Check if the payload is still alive
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.expired()
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        let Some(weak) = &self.weak else {
            return Self::empty();
        };
        if let Err(err) = weak.registry.retain_weak(weak.slot) {
            panic!("cannot copy weak resource handle {}: {err}", weak.slot);
        }

        Self {
            weak: Some(WeakRef {
                registry: Arc::clone(&weak.registry),
                slot: weak.slot,
            }),
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        let Some(weak) = self.weak.take() else {
            return;
        };
        if let Err(err) = weak.registry.release_weak(weak.slot) {
            log::error!("Failed to release weak resource handle {}: {err}", weak.slot);
            debug_assert!(false, "failed to release weak resource handle: {err}");
        }
    }
}

impl<T> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> PartialEq for WeakHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        let identity = |handle: &Self| {
            handle
                .weak
                .as_ref()
                .map(|weak| (Arc::as_ptr(&weak.registry), weak.slot))
        };
        identity(self) == identity(other)
    }
}

impl<T> Eq for WeakHandle<T> {}

impl<T> Hash for WeakHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.weak
            .as_ref()
            .map(|weak| (Arc::as_ptr(&weak.registry), weak.slot))
            .hash(state);
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("slot", &self.slot())
            .field("expired", &self.expired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RegistryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn registry() -> Arc<Registry> {
        Registry::new(RegistryConfig::default())
    }

    fn tracked(registry: &Arc<Registry>, value: u32) -> (Handle<u32>, Arc<AtomicUsize>) {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let handle = registry
            .register(value, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (handle, destroyed)
    }

    #[test]
    fn test_handle_creation() {
        let registry = registry();
        let handle = registry.register_default(42_i32).unwrap();
        assert_eq!(*handle, 42);
        assert_eq!(handle.get(), Some(&42));
    }

    #[test]
    fn test_handle_clone() {
        let registry = registry();
        let (h1, destroyed) = tracked(&registry, 1);
        let h2 = h1.clone();

        assert_eq!(h1, h2);
        assert_eq!(h1.strong_count(), 2);

        drop(h1);
        assert_eq!(h2.strong_count(), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        drop(h2);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_move_does_not_touch_counts() {
        let registry = registry();
        let mut source = registry.register_default("texture".to_string()).unwrap();
        let moved = source.take();

        assert!(source.is_empty());
        assert_eq!(moved.strong_count(), 1);
        assert_eq!(moved.as_str(), "texture");
    }

    #[test]
    fn test_reset_is_idempotent() {
        let registry = registry();
        let (mut handle, destroyed) = tracked(&registry, 3);

        handle.reset();
        handle.reset();
        drop(handle);

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_handle_access() {
        let handle: Handle<u32> = Handle::default();
        assert!(handle.is_empty());
        assert_eq!(handle.try_get(), Err(HandleError::NullAccess));
        assert_eq!(handle.strong_count(), 0);
        assert!(handle.downgrade().expired());
        assert!(handle.clone().is_empty());
    }

    #[test]
    #[should_panic(expected = "empty resource handle")]
    fn test_empty_handle_deref_panics() {
        let handle: Handle<u32> = Handle::empty();
        let _value: u32 = *handle;
    }

    #[test]
    fn test_weak_upgrade() {
        let registry = registry();
        let (strong, destroyed) = tracked(&registry, 100);
        let weak = strong.downgrade();

        assert!(weak.is_alive());
        let upgraded = weak.lock().unwrap();
        assert_eq!(strong.strong_count(), 2);
        assert_eq!(strong.weak_count(), 1);

        drop(strong);
        drop(upgraded);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(weak.expired());
        assert_eq!(weak.lock(), Err(HandleError::Expired));
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_weak_clone_counts() {
        let registry = registry();
        let strong = registry.register_default(1_u8).unwrap();
        let weak = strong.downgrade();
        let weak2 = weak.clone();

        assert_eq!(strong.weak_count(), 2);
        assert_eq!(weak, weak2);
        drop(weak2);
        assert_eq!(strong.weak_count(), 1);
    }

    #[test]
    fn test_empty_weak_is_expired() {
        let weak: WeakHandle<u32> = WeakHandle::default();
        assert!(weak.expired());
        assert_eq!(weak.lock(), Err(HandleError::Expired));
    }

    #[test]
    fn test_round_trip_release_then_lock() {
        let registry = registry();
        let (handle, destroyed) = tracked(&registry, 9);
        let weak = handle.downgrade();

        drop(handle);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(weak.lock(), Err(HandleError::Expired));
    }

    #[test]
    fn test_handles_from_different_registries_differ() {
        let a = registry();
        let b = registry();
        let ha = a.register_default(1_u32).unwrap();
        let hb = b.register_default(1_u32).unwrap();

        assert_eq!(ha.slot(), hb.slot());
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_concurrent_clone_and_drop() {
        let registry = registry();
        let (handle, destroyed) = tracked(&registry, 5);
        let barrier = Arc::new(Barrier::new(4));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..1_000 {
                        let copy = handle.clone();
                        assert_eq!(*copy, 5);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(handle.strong_count(), 1);
        drop(handle);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_lock_against_last_release() {
        for _ in 0..50 {
            let registry = registry();
            let (handle, destroyed) = tracked(&registry, 11);
            let weak = handle.downgrade();

            let locker = thread::spawn(move || {
                for _ in 0..100 {
                    match weak.lock() {
                        Ok(strong) => assert_eq!(*strong, 11),
                        Err(err) => {
                            assert_eq!(err, HandleError::Expired);
                            assert!(weak.expired());
                        }
                    }
                }
            });
            drop(handle);
            locker.join().unwrap();

            assert_eq!(destroyed.load(Ordering::SeqCst), 1);
            assert!(registry.is_empty());
        }
    }
}
