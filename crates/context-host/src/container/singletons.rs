//! Process-wide registry of named configuration containers
//!
//! Passed explicitly to every component that needs to look a container up by
//! name, instead of living in global state.

use std::sync::Arc;

use dashmap::DashMap;

use super::ConfigContainer;

/// Registry of named top-level containers plus the process root container
pub struct SingletonRegistry {
    root: Arc<ConfigContainer>,
    containers: DashMap<String, Arc<ConfigContainer>>,
}

impl SingletonRegistry {
    /// Create a registry around a fresh root container
    pub fn new() -> Self {
        Self::with_root(Arc::new(ConfigContainer::root()))
    }

    pub fn with_root(root: Arc<ConfigContainer>) -> Self {
        Self {
            root,
            containers: DashMap::new(),
        }
    }

    /// The process root container
    pub fn root(&self) -> &Arc<ConfigContainer> {
        &self.root
    }

    /// Register a container under a name, returning the one it replaced
    pub fn register(
        &self,
        name: impl Into<String>,
        container: Arc<ConfigContainer>,
    ) -> Option<Arc<ConfigContainer>> {
        let name = name.into();
        tracing::debug!(container = %name, "Registering singleton container");
        self.containers.insert(name, container)
    }

    /// Look a container up by name
    pub fn get(&self, name: &str) -> Option<Arc<ConfigContainer>> {
        self.containers.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.contains_key(name)
    }

    /// Remove a registration
    pub fn remove(&self, name: &str) -> Option<Arc<ConfigContainer>> {
        self.containers.remove(name).map(|(_, c)| c)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("root", &self.root.name())
            .field("containers", &self.names())
            .finish()
    }
}
