//! Shared resource handles for a game engine
//!
//! This crate provides:
//! - Non-intrusive reference counting through a process-wide slot registry
//! - Strong and weak resource handles usable across threads
//! - Deduplicating per-type resource caches
//! - Asset sources and texture decoding for loaders

pub mod assets;
pub mod core;
pub mod resources;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::assets::{AssetError, AssetSource, DirectoryAssetSource, TextureData};
    pub use crate::core::{RegistryConfig, ResourceConfig};
    pub use crate::resources::{
        DeferredQueue, Handle, LoadError, Registry, ResourceManager, ResourceServer, WeakHandle,
    };
}
