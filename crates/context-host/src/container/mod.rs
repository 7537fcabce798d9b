//! Configuration containers
//!
//! A configuration container is a named scope of component definitions loaded
//! from one or more YAML sources. Containers form a tree: a child resolves a
//! name locally first and falls back to its parent, never the other way round.
//!
//! - [`manifest`]: the deployment manifest (`name=source` lines)
//! - [`source`]: container source files with environment expansion
//! - [`singletons`]: the process-wide registry of named containers
//! - [`loader`]: builds the named top-level containers from the manifest

pub mod loader;
pub mod manifest;
pub mod singletons;
pub mod source;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use loader::{HierarchyLoader, LoadReport};
pub use manifest::{DeploymentManifest, ManifestEntry};
pub use singletons::SingletonRegistry;
pub use source::ContainerSource;

/// Name of the process root container
pub const ROOT_CONTAINER_NAME: &str = "root";

/// Errors raised while loading or resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Malformed manifest line {line}: {content}")]
    ManifestSyntax { line: usize, content: String },

    #[error("Duplicate manifest key: {0}")]
    DuplicateManifestKey(String),

    #[error("Import cycle through {0:?}")]
    ImportCycle(PathBuf),

    #[error("Component not found: {0}")]
    UnknownComponent(String),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Component '{component}' needs symbol '{symbol}' which no code boundary provides")]
    MissingEntry { component: String, symbol: String },

    #[error("Container '{name}' failed to load: {source}")]
    Entry {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },
}

/// Looks up entry symbols on behalf of a container.
///
/// Implemented by the code-loading boundaries so that resolving a component
/// can check that the code it names is actually reachable.
pub trait SymbolResolver: Send + Sync + 'static {
    /// Whether the symbol can be resolved through this boundary
    fn contains_symbol(&self, symbol: &str) -> bool;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// A component definition as written in a container source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    /// Free-form component kind
    #[serde(default)]
    pub kind: String,

    /// Native entry symbol the component is constructed from
    #[serde(default)]
    pub entry: Option<String>,

    /// Components that must be resolved first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Component properties
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// A resolved component singleton
#[derive(Debug)]
pub struct Component {
    pub name: String,
    pub kind: String,
    /// Name of the container that defined it
    pub container: String,
    pub entry: Option<String>,
    pub properties: BTreeMap<String, Value>,
    pub dependencies: Vec<Arc<Component>>,
}

impl Component {
    /// Get a property by name
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Get a property and try to convert it to the specified type
    pub fn property_as<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Option<T> {
        self.properties
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A named, parent-linked scope of component definitions
pub struct ConfigContainer {
    name: String,
    parent: Option<Arc<ConfigContainer>>,
    sources: Vec<PathBuf>,
    definitions: BTreeMap<String, ComponentDefinition>,
    instances: Mutex<HashMap<String, Arc<Component>>>,
    boundary: Option<Arc<dyn SymbolResolver>>,
}

impl ConfigContainer {
    /// Create the process root container
    pub fn root() -> Self {
        Self::from_definitions(ROOT_CONTAINER_NAME, None, BTreeMap::new())
    }

    /// Create a container from in-memory definitions
    pub fn from_definitions(
        name: impl Into<String>,
        parent: Option<Arc<ConfigContainer>>,
        definitions: BTreeMap<String, ComponentDefinition>,
    ) -> Self {
        Self {
            name: name.into(),
            parent,
            sources: Vec::new(),
            definitions,
            instances: Mutex::new(HashMap::new()),
            boundary: None,
        }
    }

    /// Load a container from source files; later sources override earlier ones.
    ///
    /// Nothing is resolved yet, call [`ConfigContainer::refresh`] for that.
    pub fn load(
        name: impl Into<String>,
        sources: &[PathBuf],
        parent: Option<Arc<ConfigContainer>>,
        boundary: Option<Arc<dyn SymbolResolver>>,
    ) -> Result<Self, ConfigError> {
        let mut definitions = BTreeMap::new();
        for path in sources {
            definitions.extend(ContainerSource::load(path)?);
        }

        let mut container = Self::from_definitions(name, parent, definitions);
        container.sources = sources.to_vec();
        container.boundary = boundary;
        Ok(container)
    }

    /// Builder pattern: attach a code-loading boundary
    pub fn with_boundary(mut self, boundary: Arc<dyn SymbolResolver>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ConfigContainer>> {
        self.parent.as_ref()
    }

    /// Source files the definitions were loaded from
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Names defined directly in this container
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Whether the name is defined here or in an ancestor
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
            || self.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    /// Whether the name is defined in this container itself
    pub fn contains_local(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Resolve a component, instantiating it (and its dependencies) on first use
    pub fn component(&self, name: &str) -> Result<Arc<Component>, ConfigError> {
        self.resolve(name, &mut Vec::new())
    }

    /// Eagerly resolve every local definition, returning how many were resolved
    pub fn refresh(&self) -> Result<usize, ConfigError> {
        for name in self.definitions.keys() {
            self.component(name)?;
        }
        tracing::debug!(
            container = %self.name,
            components = self.definitions.len(),
            "Container refreshed"
        );
        Ok(self.definitions.len())
    }

    /// Number of singletons instantiated so far in this container
    pub fn instantiated_count(&self) -> usize {
        self.instances.lock().len()
    }

    fn resolve(&self, name: &str, stack: &mut Vec<String>) -> Result<Arc<Component>, ConfigError> {
        let Some(definition) = self.definitions.get(name) else {
            return match &self.parent {
                Some(parent) => parent.resolve(name, stack),
                None => Err(ConfigError::UnknownComponent(name.to_string())),
            };
        };

        if let Some(existing) = self.instances.lock().get(name) {
            return Ok(Arc::clone(existing));
        }

        if stack.iter().any(|s| s == name) {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(ConfigError::DependencyCycle(chain.join(" -> ")));
        }

        stack.push(name.to_string());
        let mut dependencies = Vec::with_capacity(definition.depends_on.len());
        for dependency in &definition.depends_on {
            dependencies.push(self.resolve(dependency, stack)?);
        }
        stack.pop();

        if let Some(symbol) = &definition.entry {
            if !self.symbol_reachable(symbol) {
                return Err(ConfigError::MissingEntry {
                    component: name.to_string(),
                    symbol: symbol.clone(),
                });
            }
        }

        let component = Arc::new(Component {
            name: name.to_string(),
            kind: definition.kind.clone(),
            container: self.name.clone(),
            entry: definition.entry.clone(),
            properties: definition.properties.clone(),
            dependencies,
        });

        // Another thread may have won the race; keep the first instance.
        let mut instances = self.instances.lock();
        let instance = instances
            .entry(name.to_string())
            .or_insert(component);
        Ok(Arc::clone(instance))
    }

    fn symbol_reachable(&self, symbol: &str) -> bool {
        match &self.boundary {
            Some(boundary) => boundary.contains_symbol(symbol),
            None => self
                .parent
                .as_ref()
                .is_some_and(|p| p.symbol_reachable(symbol)),
        }
    }
}

impl fmt::Debug for ConfigContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigContainer")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.as_str()))
            .field("sources", &self.sources)
            .field("definitions", &self.definitions.len())
            .field(
                "boundary",
                &self.boundary.as_ref().map(|b| b.describe()),
            )
            .finish()
    }
}
