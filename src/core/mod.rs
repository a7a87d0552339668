//! Core configuration module
//!
//! Contains the resource system configuration and its loaders

mod config;

pub use config::{ConfigError, RegistryConfig, ResourceConfig};
