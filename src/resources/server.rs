//! Type-keyed collection of resource managers
//!
//! One [`ResourceManager`] per payload type, all keyed by resource path and
//! all sharing one registry.

use std::any::{Any, TypeId};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::manager::ResourceManager;
use super::registry::Registry;
use crate::core::ResourceConfig;

/// Path-keyed manager for payloads of type `T`
pub type PathManager<T> = ResourceManager<String, T>;

/// Type-erased sweep over one manager
trait ExpirySweep: Send + Sync {
    fn purge_expired(&self) -> usize;
}

impl<T: Send + Sync + 'static> ExpirySweep for PathManager<T> {
    fn purge_expired(&self) -> usize {
        ResourceManager::purge_expired(self)
    }
}

struct ManagerEntry {
    manager: Arc<dyn Any + Send + Sync>,
    sweep: Arc<dyn ExpirySweep>,
}

/// Owner of every per-type cache
pub struct ResourceServer {
    registry: Arc<Registry>,
    managers: FxHashMap<TypeId, ManagerEntry>,
    purge_interval_frames: u32,
    frame: u64,
}

impl ResourceServer {
    /// Create a server with its own registry
    #[must_use]
    pub fn new(config: &ResourceConfig) -> Self {
        Self::with_registry(Registry::new(config.registry.clone()), config)
    }

    /// Create a server on top of an existing registry
    #[must_use]
    pub fn with_registry(registry: Arc<Registry>, config: &ResourceConfig) -> Self {
        Self {
            registry,
            managers: FxHashMap::default(),
            purge_interval_frames: config.purge_interval_frames,
            frame: 0,
        }
    }

    /// Registry shared by every manager
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get or create the manager for payloads of type `T`
    pub fn manager<T: Send + Sync + 'static>(&mut self) -> Arc<PathManager<T>> {
        self.manager_with(PathManager::new)
    }

    /// Get the manager for `T`, creating it with `make` on first use
    pub fn manager_with<T: Send + Sync + 'static>(
        &mut self,
        make: impl FnOnce(Arc<Registry>) -> PathManager<T>,
    ) -> Arc<PathManager<T>> {
        let registry = &self.registry;
        let entry = self.managers.entry(TypeId::of::<T>()).or_insert_with(|| {
            let manager = Arc::new(make(Arc::clone(registry)));
            ManagerEntry {
                manager: Arc::clone(&manager) as Arc<dyn Any + Send + Sync>,
                sweep: manager,
            }
        });

        Arc::clone(&entry.manager)
            .downcast::<PathManager<T>>()
            .unwrap_or_else(|_| unreachable!("managers are keyed by payload type"))
    }

    /// Check if a manager exists for `T`
    #[must_use]
    pub fn has_manager<T: 'static>(&self) -> bool {
        self.managers.contains_key(&TypeId::of::<T>())
    }

    /// Number of per-type managers
    #[must_use]
    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    /// Sweep expired rows from every manager.
    ///
    /// Returns the number of rows removed.
    pub fn purge_expired(&self) -> usize {
        self.managers
            .values()
            .map(|entry| entry.sweep.purge_expired())
            .sum()
    }

    /// Advance the frame counter, sweeping on the configured interval.
    ///
    /// Returns the number of rows removed this frame.
    pub fn end_frame(&mut self) -> usize {
        self.frame += 1;
        if self.purge_interval_frames == 0
            || self.frame % u64::from(self.purge_interval_frames) != 0
        {
            return 0;
        }

        let purged = self.purge_expired();
        log::debug!("Frame {}: {}", self.frame, self.registry.stats());
        purged
    }
}

impl std::fmt::Debug for ResourceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceServer")
            .field("managers", &self.managers.len())
            .field("frame", &self.frame)
            .field("registry", &self.registry)
            .finish()
    }
}
