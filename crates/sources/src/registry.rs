//! Registry of source adapters.
//!
//! Built once at startup and handed to the cache orchestrator and the
//! ingestion manager.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gridfeed_core::{Error, Result};
use tracing::{info, warn};

use crate::adapter::SourceAdapter;
use crate::capability::{SourceCapability, SourceMetadata};

/// Adapters keyed by source name.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn SourceAdapter>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn register(&self, adapter: Arc<dyn SourceAdapter>) -> Option<Arc<dyn SourceAdapter>> {
        let name = adapter.name().to_ascii_lowercase();
        let display_name = adapter.metadata().display_name.clone();
        let previous = self.write().insert(name.clone(), adapter);
        if previous.is_some() {
            warn!(source = %name, "source already registered, replacing");
        }
        info!(source = %name, display_name = %display_name, "registered source");
        previous
    }

    /// Remove an adapter.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        let removed = self.write().remove(&name.to_ascii_lowercase());
        if removed.is_some() {
            info!(source = %name, "unregistered source");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.read().get(&name.to_ascii_lowercase()).cloned()
    }

    /// Like [`get`](Self::get), failing with [`Error::UnknownSource`].
    pub fn require(&self, name: &str) -> Result<Arc<dyn SourceAdapter>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Metadata of every registered source, sorted by name.
    pub fn metadata(&self) -> Vec<SourceMetadata> {
        let mut all: Vec<SourceMetadata> = self
            .read()
            .values()
            .map(|a| a.metadata().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn capability(&self, name: &str) -> Option<SourceCapability> {
        self.get(name).map(|a| a.capability().clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn SourceAdapter>>> {
        self.adapters.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn SourceAdapter>>> {
        self.adapters.write().unwrap_or_else(|e| e.into_inner())
    }
}
