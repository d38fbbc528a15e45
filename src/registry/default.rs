//! Default (embedded) registry
//!
//! Provides founder-curated tools embedded in the binary.

use super::*;
use crate::Result;

/// Default registry with embedded tools
pub struct DefaultRegistry {
    registry_name: String,
}

impl DefaultRegistry {
    /// Create a new default registry
    pub fn new() -> Self {
        Self {
            registry_name: "default".to_string(),
        }
    }

    /// List all servers from default registry
    pub async fn list_servers(&self) -> Result<Vec<RegistryEntry>> {
        // Load embedded default.json
        let data = include_str!("default.json");
        let mut entries: Vec<RegistryEntry> = serde_json::from_str(data)?;

        // Label all entries with default registry
        for entry in &mut entries {
            entry.registry = Some(self.registry_name.clone());
        }

        Ok(entries)
    }

    /// Get a specific server by name
    pub async fn get_server(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let entries = self.list_servers().await?;
        Ok(entries.into_iter().find(|e| e.name == name))
    }
}

impl Default for DefaultRegistry {
    fn default() -> Self {
        Self::new()
    }
}
