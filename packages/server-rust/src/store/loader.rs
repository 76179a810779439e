//! JSON file format for seeding a [`MemoryDefinitionStore`].

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use servicer_core::{Server, ServiceDefinition};

use super::memory::MemoryDefinitionStore;

/// Cluster definition document: service definitions plus per-host overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFile {
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
    #[serde(default)]
    pub servers: Vec<Server>,
}

impl ClusterFile {
    /// Reads and parses a cluster definition file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading cluster file {}", path.display()))?;
        let file: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing cluster file {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            services = file.services.len(),
            servers = file.servers.len(),
            "loaded cluster file"
        );
        Ok(file)
    }

    #[must_use]
    pub fn into_store(self) -> MemoryDefinitionStore {
        MemoryDefinitionStore::with_contents(self.services, self.servers)
    }
}
