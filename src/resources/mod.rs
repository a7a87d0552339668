//! Shared resource ownership
//!
//! Provides handle-based resource management with:
//! - A slot registry that counts strong and weak references
//! - Strong and weak handles that never touch the payload's layout
//! - Keyed caches that load each resource once
//! - Deferred destruction for thread-bound teardown

mod deferred;
mod handle;
mod manager;
mod registry;
mod server;
mod slot;

pub use deferred::DeferredQueue;
pub use handle::{Handle, HandleError, WeakHandle};
pub use manager::{LoadError, ManagerStats, ResourceManager};
pub use registry::{Registry, RegistryError, RegistryStats};
pub use server::{PathManager, ResourceServer};
pub use slot::SlotId;
