//! Asset byte sources
//!
//! Loaders read raw asset bytes through an [`AssetSource`], either from a
//! directory on disk or from an in-memory table.

use std::fs;
use std::path::{Component, Path, PathBuf};

use rustc_hash::FxHashMap;

/// Errors that can occur while reading or decoding assets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    /// No asset exists at the path
    NotFound(String),
    /// The path escapes the source root or is absolute
    InvalidPath(String),
    /// IO error
    IoError(String),
    /// Error decoding asset data
    DecodeError(String),
}

impl std::fmt::Display for AssetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "Asset not found: {path}"),
            Self::InvalidPath(path) => write!(f, "Invalid asset path: {path}"),
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::DecodeError(e) => write!(f, "Decode error: {e}"),
        }
    }
}

impl std::error::Error for AssetError {}

/// Somewhere asset bytes can be read from
pub trait AssetSource: Send + Sync {
    /// Read the whole asset at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the asset does not exist or cannot be read
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError>;

    /// Check if an asset exists at `path`
    fn exists(&self, path: &str) -> bool;
}

/// Reads assets relative to a root directory
#[derive(Debug, Clone)]
pub struct DirectoryAssetSource {
    root: PathBuf,
}

impl DirectoryAssetSource {
    /// Create a source rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of this source
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` below the root, rejecting anything that could escape it
    fn resolve(&self, path: &str) -> Result<PathBuf, AssetError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(AssetError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetSource for DirectoryAssetSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        let full_path = self.resolve(path)?;
        fs::read(&full_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AssetError::NotFound(path.to_string()),
            _ => AssetError::IoError(e.to_string()),
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|full_path| full_path.is_file())
    }
}

/// In-memory asset table
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetSource {
    assets: FxHashMap<String, Vec<u8>>,
}

impl MemoryAssetSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an asset
    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.assets.insert(path.into(), bytes.into());
    }

    /// Builder-style [`MemoryAssetSource::insert`]
    #[must_use]
    pub fn with_asset(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    /// Number of stored assets
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Check if the source is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl AssetSource for MemoryAssetSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        self.assets
            .get(path)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }
}
