//! Resource system configuration
//!
//! Supports loading configuration from RON (Rusty Object Notation) or JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of entries (live + tombstoned), `None` for unbounded
    pub max_slots: Option<usize>,
    /// Number of slots to reserve up front
    pub initial_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_slots: None,
            initial_capacity: 256,
        }
    }
}

impl RegistryConfig {
    /// Largest number of slots that may be reserved up front
    pub const MAX_INITIAL_CAPACITY: usize = 1 << 20;

    /// Bound the registry to `max_slots` entries
    #[must_use]
    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = Some(max_slots);
        self
    }

    /// Set the number of slots reserved up front
    #[must_use]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Slots to actually reserve, bounded by `max_slots` and
    /// [`RegistryConfig::MAX_INITIAL_CAPACITY`]
    #[must_use]
    pub fn reserved_capacity(&self) -> usize {
        self.initial_capacity
            .min(self.max_slots.unwrap_or(usize::MAX))
            .min(Self::MAX_INITIAL_CAPACITY)
    }
}

/// Top-level resource configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Registry settings
    pub registry: RegistryConfig,
    /// Sweep expired cache rows every N frames (0 disables the sweep)
    pub purge_interval_frames: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            purge_interval_frames: 300,
        }
    }
}

impl ResourceConfig {
    /// Replace the registry settings
    #[must_use]
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the cache sweep interval in frames
    #[must_use]
    pub fn with_purge_interval(mut self, frames: u32) -> Self {
        self.purge_interval_frames = frames;
        self
    }

    /// Parse a configuration from a RON string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid configuration
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            ron::from_str(source).map_err(|e| ConfigError::DeserializeError(e.to_string()))?;
        config.validate()
    }

    /// Parse a configuration from a JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid configuration
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)
            .map_err(|e| ConfigError::DeserializeError(e.to_string()))?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let capacity = self.registry.initial_capacity;
        if capacity > RegistryConfig::MAX_INITIAL_CAPACITY {
            return Err(ConfigError::InvalidValue(format!(
                "initial_capacity {capacity} exceeds {}",
                RegistryConfig::MAX_INITIAL_CAPACITY
            )));
        }
        Ok(self)
    }

    /// Load a configuration from a RON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or deserialization fails
    pub fn load_ron(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_ron_str(&content)
    }

    /// Load a configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or deserialization fails
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json_str(&content)
    }

    /// Load a configuration, picking the format from the file extension
    ///
    /// Files ending in `.json` are read as JSON, everything else as RON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or deserialization fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::load_json(path),
            _ => Self::load_ron(path),
        }
    }

    /// Save the configuration to a RON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialization fails
    pub fn save_ron(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        fs::write(path, ron_string).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// IO error
    IoError(String),
    /// Serialization error
    SerializeError(String),
    /// Deserialization error
    DeserializeError(String),
    /// A field holds a value the resource system cannot use
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::SerializeError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializeError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidValue(e) => write!(f, "Invalid value: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
