//! Platform registry for looking up dialects by name.

use std::collections::HashMap;

use super::definition::PlatformDefinition;
use super::vendors;
use crate::error::{ChannelError, ConfigError, Result};

/// Registry of platform definitions.
///
/// Owned by whoever builds chains; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct PlatformRegistry {
    platforms: HashMap<String, PlatformDefinition>,
}

impl PlatformRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            platforms: HashMap::new(),
        }
    }

    /// Registry holding every built-in dialect.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        for platform in [
            vendors::cisco_ios::platform(),
            vendors::arista::platform(),
            vendors::juniper::platform(),
        ] {
            registry.register(platform.map_err(ChannelError::InvalidPattern)?);
        }
        Ok(registry)
    }

    /// Register a platform definition, replacing any with the same name.
    pub fn register(&mut self, platform: PlatformDefinition) {
        self.platforms.insert(platform.name.clone(), platform);
    }

    /// Get a platform by name.
    pub fn get(&self, name: &str) -> Option<&PlatformDefinition> {
        self.platforms.get(name)
    }

    /// Get a platform by name, as a configuration error if missing.
    pub fn resolve(&self, name: &str) -> Result<&PlatformDefinition> {
        self.get(name).ok_or_else(|| {
            ConfigError::UnknownDialect {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Check if a platform is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.platforms.contains_key(name)
    }

    /// List all registered platform names.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.platforms.keys()
    }
}
