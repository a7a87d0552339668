//! Asset loading collaborators
//!
//! Provides the byte sources and decoders that resource loaders use:
//! - Directory and in-memory asset sources
//! - Texture decoding

mod source;
mod texture;

pub use source::{AssetError, AssetSource, DirectoryAssetSource, MemoryAssetSource};
pub use texture::TextureData;
