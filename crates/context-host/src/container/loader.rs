//! Configuration hierarchy loader
//!
//! Builds one top-level container per manifest entry, parented to the process
//! root container, and registers each under its name in the
//! [`SingletonRegistry`].
//!
//! Loading is all-or-nothing: every entry is loaded and refreshed before any
//! of them is registered, so a bad source never leaves half a hierarchy behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ConfigContainer, ConfigError, DeploymentManifest, SingletonRegistry, SymbolResolver};

/// Outcome of a hierarchy load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// The manifest did not exist, nothing was loaded
    pub skipped: bool,

    /// Names registered, in manifest order
    pub loaded: Vec<String>,
}

impl LoadReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            loaded: Vec::new(),
        }
    }
}

/// Loads the named top-level containers listed in a deployment manifest
pub struct HierarchyLoader {
    singletons: Arc<SingletonRegistry>,
    boundary: Option<Arc<dyn SymbolResolver>>,
}

impl HierarchyLoader {
    pub fn new(singletons: Arc<SingletonRegistry>) -> Self {
        Self {
            singletons,
            boundary: None,
        }
    }

    /// Builder pattern: resolve entry symbols through the given boundary
    pub fn with_boundary(mut self, boundary: Arc<dyn SymbolResolver>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Load every container named in the manifest.
    ///
    /// A missing manifest is logged and skipped. Relative sources are resolved
    /// against the manifest's directory.
    pub fn load(&self, manifest_path: &Path) -> Result<LoadReport, ConfigError> {
        if !manifest_path.exists() {
            tracing::error!("Contexts manifest not found: {:?}", manifest_path);
            return Ok(LoadReport::skipped());
        }

        let manifest = DeploymentManifest::load(manifest_path)?;
        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));

        let mut staged = Vec::with_capacity(manifest.len());
        for entry in &manifest.entries {
            let source = resolve_source(base, &entry.source);
            tracing::debug!("Loading: {} = {:?}", entry.name, source);

            let container = self
                .load_entry(&entry.name, source)
                .map_err(|e| ConfigError::Entry {
                    name: entry.name.clone(),
                    source: Box::new(e),
                })?;
            staged.push((entry.name.clone(), container));
        }

        let mut report = LoadReport::default();
        for (name, container) in staged {
            if self.singletons.register(name.clone(), container).is_some() {
                tracing::warn!(container = %name, "Replaced an existing singleton container");
            }
            report.loaded.push(name);
        }

        tracing::info!(
            containers = report.loaded.len(),
            "Configuration hierarchy loaded from {:?}",
            manifest_path
        );
        Ok(report)
    }

    fn load_entry(&self, name: &str, source: PathBuf) -> Result<Arc<ConfigContainer>, ConfigError> {
        let container = ConfigContainer::load(
            name,
            &[source],
            Some(Arc::clone(self.singletons.root())),
            self.boundary.clone(),
        )?;
        container.refresh()?;
        Ok(Arc::new(container))
    }
}

fn resolve_source(base: &Path, source: &Path) -> PathBuf {
    if source.is_absolute() {
        source.to_path_buf()
    } else {
        base.join(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_manifest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let singletons = Arc::new(SingletonRegistry::new());
        let loader = HierarchyLoader::new(Arc::clone(&singletons));

        let report = loader.load(&dir.path().join("missing.properties")).unwrap();
        assert!(report.skipped);
        assert!(singletons.is_empty());
    }

    #[test]
    fn test_core_entry_is_parented_to_root() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cfg/core.yaml", "components:\n  transport.server: { kind: transport }\n");
        let manifest = write(dir.path(), "contexts.properties", "core=cfg/core.yaml\n");

        let singletons = Arc::new(SingletonRegistry::new());
        let report = HierarchyLoader::new(Arc::clone(&singletons))
            .load(&manifest)
            .unwrap();

        assert_eq!(report.loaded, vec!["core".to_string()]);
        let core = singletons.get("core").expect("core registered");
        assert!(Arc::ptr_eq(core.parent().unwrap(), singletons.root()));
        assert!(core.contains_local("transport.server"));
        assert_eq!(core.instantiated_count(), 1);
    }

    #[test]
    fn test_bad_entry_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.yaml", "components:\n  a: { kind: x }\n");
        write(dir.path(), "bad.yaml", "components:\n  b: { depends_on: [nowhere] }\n");
        let manifest = write(
            dir.path(),
            "contexts.properties",
            "good=good.yaml\nbad=bad.yaml\n",
        );

        let singletons = Arc::new(SingletonRegistry::new());
        let result = HierarchyLoader::new(Arc::clone(&singletons)).load(&manifest);

        match result {
            Err(ConfigError::Entry { name, source }) => {
                assert_eq!(name, "bad");
                assert!(matches!(*source, ConfigError::UnknownComponent(_)));
            }
            other => panic!("expected entry error, got {:?}", other),
        }
        assert!(singletons.is_empty());
    }

    #[test]
    fn test_absolute_sources_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let source = write(dir.path(), "abs/default.yaml", "");
        let manifest = write(
            dir.path(),
            "conf/contexts.properties",
            &format!("default.context={}\n", source.display()),
        );

        let singletons = Arc::new(SingletonRegistry::new());
        HierarchyLoader::new(Arc::clone(&singletons))
            .load(&manifest)
            .unwrap();
        assert_eq!(singletons.get("default.context").unwrap().sources(), &[source]);
    }
}
