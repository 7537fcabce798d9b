//! Execution context factory
//!
//! Creates contexts through the host runtime and keeps the context registry
//! and the application side table in step with it. Binding happens in two
//! phases: the unit boundary is attached right after creation, and the
//! context-local configuration container is built once the runtime has
//! started the context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use context_host_sdk::MountPath;

use super::boundary::{BoundarySlot, SharedBoundary, UnitBoundary};
use super::context::{ContextError, ContextState, ExecutionContext, ROOT_CONFIG_ATTRIBUTE};
use super::registry::{ApplicationHandle, ApplicationTable, ContextRegistry};
use crate::config::DEFAULT_PARENT_CONTAINER;
use crate::container::{ConfigContainer, ConfigError, SingletonRegistry, SymbolResolver};
use crate::engine::HostRuntime;

/// Directory under a doc base holding the unit's configuration sources
pub const CONF_DIR: &str = "conf";

/// Naming attribute carrying the context name
pub const NAMING_CONTEXT_NAME: &str = "logging/context-name";

/// Naming attribute carrying the context's logging resource
pub const NAMING_CONFIGURATION_RESOURCE: &str = "logging/configuration-resource";

/// What a removal actually removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// A context was mounted in the host runtime and has been unmounted
    pub host_removed: bool,

    /// An application handle was published and has been removed
    pub handle_removed: bool,
}

impl RemovalOutcome {
    pub fn removed(&self) -> bool {
        self.handle_removed
    }
}

/// Creates, binds and removes execution contexts
pub struct ContextFactory {
    runtime: Arc<dyn HostRuntime>,
    registry: Arc<ContextRegistry>,
    handles: Arc<ApplicationTable>,
    singletons: Arc<SingletonRegistry>,
    shared: Arc<SharedBoundary>,
    parent_container: String,
    use_naming: bool,
}

impl ContextFactory {
    pub fn new(
        runtime: Arc<dyn HostRuntime>,
        registry: Arc<ContextRegistry>,
        handles: Arc<ApplicationTable>,
        singletons: Arc<SingletonRegistry>,
    ) -> Self {
        Self {
            runtime,
            registry,
            handles,
            singletons,
            shared: Arc::new(SharedBoundary::empty()),
            parent_container: DEFAULT_PARENT_CONTAINER.to_string(),
            use_naming: false,
        }
    }

    /// Builder pattern: boundary unit boundaries fall back to
    pub fn with_shared_boundary(mut self, shared: Arc<SharedBoundary>) -> Self {
        self.shared = shared;
        self
    }

    /// Builder pattern: top-level container per-unit containers are parented to
    pub fn with_parent_container(mut self, name: impl Into<String>) -> Self {
        self.parent_container = name.into();
        self
    }

    /// Builder pattern: publish naming attributes on bound contexts
    pub fn with_naming(mut self, enabled: bool) -> Self {
        self.use_naming = enabled;
        self
    }

    /// Create a context and mount it in the host runtime
    pub fn create(
        &self,
        mount_path: &MountPath,
        doc_base: &Path,
    ) -> Result<Arc<ExecutionContext>, ContextError> {
        let context = self.runtime.create_context(mount_path, doc_base);
        self.runtime.add_child(&context)?;

        self.registry.add(Arc::clone(&context));
        self.handles.publish(ApplicationHandle::new(&context));

        tracing::info!(
            mount_path = %mount_path,
            doc_base = ?doc_base,
            "Context created"
        );
        Ok(context)
    }

    /// Stop and unmount the context at `mount_path`. Never fails; what was
    /// actually removed is reported.
    pub fn remove(&self, mount_path: &MountPath) -> RemovalOutcome {
        let mut outcome = RemovalOutcome::default();

        for child in self.runtime.children() {
            if child.mount_path() != mount_path {
                continue;
            }
            if child.state() != ContextState::Stopped {
                if let Err(e) = child.stop() {
                    tracing::warn!(mount_path = %mount_path, "Context did not stop: {}", e);
                }
            }
            outcome.host_removed = self.runtime.remove_child(mount_path);
        }

        self.registry.remove(mount_path);

        match self.handles.remove(mount_path) {
            Some(handle) => {
                if let Err(e) = handle.stop() {
                    tracing::warn!(mount_path = %mount_path, "Application did not stop: {}", e);
                }
                outcome.handle_removed = true;
            }
            None => tracing::warn!("No application published at {}", mount_path),
        }

        tracing::debug!(mount_path = %mount_path, ?outcome, "Context removal finished");
        outcome
    }

    /// Give the context its own code-loading boundary.
    ///
    /// A context already holding a unit boundary keeps it; one on the host's
    /// shared boundary gets a unit boundary layered over that.
    pub fn bind_boundary(&self, context: &ExecutionContext) -> Result<Arc<UnitBoundary>, ContextError> {
        let parent = match context.boundary() {
            BoundarySlot::Isolated(existing) => return Ok(existing),
            BoundarySlot::Shared(shared) => shared,
            BoundarySlot::Unassigned => Arc::clone(&self.shared),
        };

        let unit = Arc::new(UnitBoundary::open(
            context.mount_path().clone(),
            context.doc_base(),
            parent,
        )?);
        let previous = context.set_boundary(BoundarySlot::Isolated(Arc::clone(&unit)));

        tracing::debug!(
            mount_path = %context.mount_path(),
            replaced = previous.kind(),
            libraries = unit.library_count(),
            "Unit boundary attached"
        );
        Ok(unit)
    }

    /// Build and resolve the context-local configuration container of a
    /// running context.
    ///
    /// On failure the container is detached again, leaving the context
    /// running without configuration.
    pub fn bind_context(&self, context: &ExecutionContext) -> Result<Arc<ConfigContainer>, ContextError> {
        let mount_path = context.mount_path();
        if !context.is_running() {
            return Err(ContextError::NotRunning(mount_path.clone()));
        }

        let boundary: Arc<dyn SymbolResolver> = self.bind_boundary(context)?;
        let sources = unit_sources(&context.doc_base().join(CONF_DIR))?;
        let container = Arc::new(ConfigContainer::load(
            format!("context:{}", mount_path),
            &sources,
            Some(self.parent_container()),
            Some(boundary),
        )?);

        context.set_config(Some(Arc::clone(&container)));
        context.set_attribute(ROOT_CONFIG_ATTRIBUTE, Arc::clone(&container));

        let resolved = match container.refresh() {
            Ok(resolved) => resolved,
            Err(e) => {
                context.set_config(None);
                context.remove_attribute(ROOT_CONFIG_ATTRIBUTE);
                return Err(e.into());
            }
        };

        self.publish_naming(context);

        tracing::info!(
            mount_path = %mount_path,
            sources = sources.len(),
            components = resolved,
            "Context configuration bound"
        );
        Ok(container)
    }

    fn parent_container(&self) -> Arc<ConfigContainer> {
        match self.singletons.get(&self.parent_container) {
            Some(container) => container,
            None => {
                tracing::debug!(
                    "Container '{}' is not registered, parenting to the root container",
                    self.parent_container
                );
                Arc::clone(self.singletons.root())
            }
        }
    }

    fn publish_naming(&self, context: &ExecutionContext) {
        if !self.use_naming {
            tracing::debug!(mount_path = %context.mount_path(), "Naming is not enabled");
            return;
        }

        let name = context.mount_path().context_name();
        context.set_attribute(
            NAMING_CONFIGURATION_RESOURCE,
            Arc::new(format!("logging-{}.yaml", name)),
        );
        context.set_attribute(NAMING_CONTEXT_NAME, Arc::new(name));
    }
}

/// `unit-*.yaml` / `unit-*.yml` files in `conf_dir`, ordered by file name
fn unit_sources(conf_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = match std::fs::read_dir(conf_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: conf_dir.to_path_buf(),
                source,
            })
        }
    };

    let mut sources: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("unit-") && (n.ends_with(".yaml") || n.ends_with(".yml")))
        })
        .collect();
    sources.sort();
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ComponentDefinition;
    use crate::engine::EmbeddedRuntime;
    use std::collections::BTreeMap;

    struct Fixture {
        runtime: Arc<EmbeddedRuntime>,
        registry: Arc<ContextRegistry>,
        handles: Arc<ApplicationTable>,
        singletons: Arc<SingletonRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let runtime = Arc::new(EmbeddedRuntime::new("testEngine", "localhost"));
            runtime.init().unwrap();
            Self {
                runtime,
                registry: Arc::new(ContextRegistry::new()),
                handles: Arc::new(ApplicationTable::new()),
                singletons: Arc::new(SingletonRegistry::new()),
            }
        }

        fn factory(&self) -> ContextFactory {
            ContextFactory::new(
                self.runtime.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.handles),
                Arc::clone(&self.singletons),
            )
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_create_registers_everywhere() {
        let fixture = Fixture::new();
        let factory = fixture.factory();
        let path = MountPath::parse("/app1").unwrap();

        let context = factory.create(&path, Path::new("/srv/app1")).unwrap();
        assert!(fixture.registry.contains(&path));
        assert!(fixture.handles.get(&path).is_some());
        assert!(Arc::ptr_eq(&fixture.runtime.find_child(&path).unwrap(), &context));
    }

    #[test]
    fn test_remove_then_create_gives_fresh_context() {
        let fixture = Fixture::new();
        let factory = fixture.factory();
        let path = MountPath::parse("/app1").unwrap();

        let first = factory.create(&path, Path::new("/srv/app1")).unwrap();
        first.start().unwrap();

        let outcome = factory.remove(&path);
        assert!(outcome.removed());
        assert!(outcome.host_removed);
        assert_eq!(first.state(), ContextState::Stopped);
        assert!(!fixture.registry.contains(&path));

        let second = factory.create(&path, Path::new("/srv/app1")).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.state(), ContextState::Created);
    }

    #[test]
    fn test_remove_unknown_path_is_noop() {
        let fixture = Fixture::new();
        let factory = fixture.factory();
        let kept = factory.create(&MountPath::parse("/kept").unwrap(), Path::new("/srv/kept")).unwrap();

        let outcome = factory.remove(&MountPath::parse("/nope").unwrap());
        assert_eq!(outcome, RemovalOutcome::default());
        assert!(!outcome.removed());
        assert_eq!(fixture.registry.len(), 1);
        assert_eq!(kept.state(), ContextState::Created);
    }

    #[test]
    fn test_bind_boundary_phases() {
        let fixture = Fixture::new();
        let factory = fixture.factory();
        let dir = tempfile::tempdir().unwrap();

        let unassigned = factory.create(&MountPath::parse("/a").unwrap(), dir.path()).unwrap();
        assert_eq!(unassigned.boundary().kind(), "unassigned");
        let unit = factory.bind_boundary(&unassigned).unwrap();
        assert!(unassigned.boundary().is_isolated());

        // Binding again keeps the same unit boundary
        let again = factory.bind_boundary(&unassigned).unwrap();
        assert!(Arc::ptr_eq(&unit, &again));

        fixture.runtime.set_default_boundary(Arc::new(SharedBoundary::empty()));
        let shared = factory.create(&MountPath::parse("/b").unwrap(), dir.path()).unwrap();
        assert_eq!(shared.boundary().kind(), "shared");
        factory.bind_boundary(&shared).unwrap();
        assert!(shared.boundary().is_isolated());
    }

    #[test]
    fn test_bind_context_requires_running() {
        let fixture = Fixture::new();
        let factory = fixture.factory();
        let context = factory.create(&MountPath::root(), Path::new("/srv/ROOT")).unwrap();

        assert!(matches!(
            factory.bind_context(&context),
            Err(ContextError::NotRunning(_))
        ));
    }

    #[test]
    fn test_bind_context_loads_unit_sources() {
        let fixture = Fixture::new();
        let mut defaults = BTreeMap::new();
        defaults.insert(
            "shared.pool".to_string(),
            ComponentDefinition {
                kind: "pool".to_string(),
                ..Default::default()
            },
        );
        fixture.singletons.register(
            DEFAULT_PARENT_CONTAINER,
            Arc::new(ConfigContainer::from_definitions(
                DEFAULT_PARENT_CONTAINER,
                Some(Arc::clone(fixture.singletons.root())),
                defaults,
            )),
        );

        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("conf/unit-b.yaml"),
            "components:\n  stream.service:\n    kind: service\n    depends_on: [shared.pool]\n",
        );
        write(
            &dir.path().join("conf/unit-a.yaml"),
            "components:\n  stream.service:\n    kind: overridden\n",
        );
        write(&dir.path().join("conf/other.yaml"), "not: [valid");

        let factory = fixture.factory().with_naming(true);
        let context = factory.create(&MountPath::parse("/live").unwrap(), dir.path()).unwrap();
        context.start().unwrap();

        let container = factory.bind_context(&context).unwrap();
        assert_eq!(container.name(), "context:/live");
        assert_eq!(container.sources().len(), 2);
        assert_eq!(container.parent().unwrap().name(), DEFAULT_PARENT_CONTAINER);

        // unit-b.yaml sorts last and wins
        let service = container.component("stream.service").unwrap();
        assert_eq!(service.kind, "service");

        let published = context.attribute::<ConfigContainer>(ROOT_CONFIG_ATTRIBUTE).unwrap();
        assert!(Arc::ptr_eq(&published, &container));
        assert!(context.boundary().is_isolated());

        let name = context.attribute::<String>(NAMING_CONTEXT_NAME).unwrap();
        assert_eq!(name.as_str(), "live");
        let resource = context.attribute::<String>(NAMING_CONFIGURATION_RESOURCE).unwrap();
        assert_eq!(resource.as_str(), "logging-live.yaml");
    }

    #[test]
    fn test_bind_context_falls_back_to_root_parent() {
        let fixture = Fixture::new();
        let factory = fixture.factory();
        let dir = tempfile::tempdir().unwrap();

        let context = factory.create(&MountPath::root(), dir.path()).unwrap();
        context.start().unwrap();

        let container = factory.bind_context(&context).unwrap();
        assert_eq!(container.parent().unwrap().name(), crate::container::ROOT_CONTAINER_NAME);
        assert!(context.attribute::<String>(NAMING_CONTEXT_NAME).is_none());
    }

    #[test]
    fn test_failed_binding_detaches_container() {
        let fixture = Fixture::new();
        let factory = fixture.factory();
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("conf/unit-broken.yaml"),
            "components:\n  a:\n    kind: x\n    depends_on: [missing]\n",
        );

        let context = factory.create(&MountPath::parse("/broken").unwrap(), dir.path()).unwrap();
        context.start().unwrap();

        let err = factory.bind_context(&context).unwrap_err();
        assert!(matches!(err, ContextError::Config(ConfigError::UnknownComponent(_))));
        assert!(context.config().is_none());
        assert!(context.attribute::<ConfigContainer>(ROOT_CONFIG_ATTRIBUTE).is_none());
        assert!(context.is_running());
    }
}
