//! Lifecycle orchestrator
//!
//! Drives host startup as an ordered state machine:
//!
//! ```text
//! Uninitialized -> InfraReady -> UnitsDiscovered -> ContextsCreated
//!   -> RuntimeStarted -> ContextsBound -> ServicesResolved -> Running
//! ```
//!
//! A runtime that fails to start leaves the host `Degraded`: binding and
//! service resolution are skipped, management registration still happens.
//! Failures of a single unit are logged and never abort its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use context_host_sdk::{Managed, ManagementRegistry, MountPath, Realm, Valve};

use super::boundary::SharedBoundary;
use super::context::{ContextError, ExecutionContext};
use super::factory::{ContextFactory, RemovalOutcome};
use super::registry::{ApplicationTable, ContextRegistry};
use super::scanner::{DirectoryScanner, UnitDir};
use crate::config::HostConfig;
use crate::container::{Component, ConfigContainer, HierarchyLoader, SingletonRegistry};
use crate::engine::{AccessLogValve, ConnectorConfig, HostError, HostRuntime, MemoryRealm};

/// Name the host registers itself under with the management registry
pub const MANAGEMENT_NAME: &str = "context-host:type=Loader";

/// Startup state of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    InfraReady,
    UnitsDiscovered,
    ContextsCreated,
    RuntimeStarted,
    ContextsBound,
    ServicesResolved,
    Running,
    Degraded,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::InfraReady => "infra_ready",
            LifecycleState::UnitsDiscovered => "units_discovered",
            LifecycleState::ContextsCreated => "contexts_created",
            LifecycleState::RuntimeStarted => "runtime_started",
            LifecycleState::ContextsBound => "contexts_bound",
            LifecycleState::ServicesResolved => "services_resolved",
            LifecycleState::Running => "running",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that stop the orchestrator itself
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Host runtime could not be initialised: {0}")]
    Infrastructure(#[from] HostError),

    #[error("Cannot {operation} while {actual}, expected {expected}")]
    InvalidState {
        operation: &'static str,
        expected: LifecycleState,
        actual: LifecycleState,
    },

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Names of the optional services looked up in the core container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNames {
    pub transport: String,
    pub secure_transport: String,
}

impl Default for ServiceNames {
    fn default() -> Self {
        Self {
            transport: "transport.server".to_string(),
            secure_transport: "transport.secure.server".to_string(),
        }
    }
}

/// Services found in the core container
#[derive(Debug, Clone, Default)]
pub struct ResolvedServices {
    pub core: Option<Arc<ConfigContainer>>,
    pub transport: Option<Arc<Component>>,
    pub secure_transport: Option<Arc<Component>>,
}

/// Outcome of binding every running context
#[derive(Debug, Clone, Default)]
pub struct BindReport {
    pub bound: Vec<MountPath>,
    pub failed: Vec<(MountPath, String)>,
}

/// Result of a shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownStatus {
    /// Why stopping the runtime failed, if it did
    pub error: Option<String>,
}

impl ShutdownStatus {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    /// Process exit code: 0 on a clean shutdown, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

/// Status view registered with the management registry
struct LoaderStatus {
    state: Arc<RwLock<LifecycleState>>,
    engine_name: String,
    registry: Arc<ContextRegistry>,
}

impl Managed for LoaderStatus {
    fn management_interface(&self) -> &'static str {
        "ContextLoader"
    }

    fn attributes(&self) -> Value {
        let snapshot = self.registry.snapshot();
        let mut contexts: Vec<&Arc<ExecutionContext>> = snapshot.values().collect();
        contexts.sort_by(|a, b| a.mount_path().cmp(b.mount_path()));
        let contexts: Vec<Value> = contexts.iter().map(|c| c.summary()).collect();
        json!({
            "state": *self.state.read(),
            "engine": self.engine_name,
            "contexts": contexts,
        })
    }
}

/// Sequences host startup and shutdown
pub struct Orchestrator {
    config: HostConfig,
    runtime: Arc<dyn HostRuntime>,
    management: Arc<dyn ManagementRegistry>,
    singletons: Arc<SingletonRegistry>,
    registry: Arc<ContextRegistry>,
    handles: Arc<ApplicationTable>,
    realm: Option<Arc<dyn Realm>>,
    valves: Vec<Arc<dyn Valve>>,
    service_names: ServiceNames,
    state: Arc<RwLock<LifecycleState>>,
    factory: Option<ContextFactory>,
    discovered: Vec<UnitDir>,
    bind_report: BindReport,
    services: ResolvedServices,
    registered: bool,
}

impl Orchestrator {
    pub fn new(
        config: HostConfig,
        runtime: Arc<dyn HostRuntime>,
        management: Arc<dyn ManagementRegistry>,
    ) -> Self {
        Self {
            config,
            runtime,
            management,
            singletons: Arc::new(SingletonRegistry::new()),
            registry: Arc::new(ContextRegistry::new()),
            handles: Arc::new(ApplicationTable::new()),
            realm: None,
            valves: Vec::new(),
            service_names: ServiceNames::default(),
            state: Arc::new(RwLock::new(LifecycleState::Uninitialized)),
            factory: None,
            discovered: Vec::new(),
            bind_report: BindReport::default(),
            services: ResolvedServices::default(),
            registered: false,
        }
    }

    /// Builder pattern: use an existing singleton registry
    pub fn with_singletons(mut self, singletons: Arc<SingletonRegistry>) -> Self {
        self.singletons = singletons;
        self
    }

    /// Builder pattern: realm applied before start (default: empty [`MemoryRealm`])
    pub fn with_realm(mut self, realm: Arc<dyn Realm>) -> Self {
        self.realm = Some(realm);
        self
    }

    /// Builder pattern: add a host valve
    pub fn with_valve(mut self, valve: Arc<dyn Valve>) -> Self {
        self.valves.push(valve);
        self
    }

    /// Builder pattern: override the optional service names
    pub fn with_service_names(mut self, names: ServiceNames) -> Self {
        self.service_names = names;
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn HostRuntime> {
        &self.runtime
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    pub fn handles(&self) -> &Arc<ApplicationTable> {
        &self.handles
    }

    pub fn singletons(&self) -> &Arc<SingletonRegistry> {
        &self.singletons
    }

    /// Units found by the last scan
    pub fn discovered(&self) -> &[UnitDir] {
        &self.discovered
    }

    pub fn bind_report(&self) -> &BindReport {
        &self.bind_report
    }

    pub fn services(&self) -> &ResolvedServices {
        &self.services
    }

    /// Run the whole startup sequence, returning the state reached
    /// (`Running` or `Degraded`).
    pub fn start(&mut self) -> Result<LifecycleState, LifecycleError> {
        self.init_infrastructure()?;
        self.discover_units()?;
        self.create_contexts()?;

        if self.start_runtime()? == LifecycleState::RuntimeStarted {
            self.bind_contexts()?;
            self.resolve_services()?;
        }
        self.register_management();

        let state = self.state();
        tracing::info!(state = %state, contexts = self.registry.len(), "Host startup finished");
        Ok(state)
    }

    /// Initialise the runtime, open the shared boundary and load the
    /// configuration hierarchy
    pub fn init_infrastructure(&mut self) -> Result<(), LifecycleError> {
        self.expect_state("initialise infrastructure", LifecycleState::Uninitialized)?;

        self.runtime.init()?;

        let shared = Arc::new(SharedBoundary::open(&self.config.shared_lib_dir()));
        self.runtime.set_default_boundary(Arc::clone(&shared));
        tracing::debug!(libraries = shared.library_count(), "Shared boundary bound");

        let loader = HierarchyLoader::new(Arc::clone(&self.singletons)).with_boundary(shared.clone());
        if let Err(e) = loader.load(&self.config.manifest_path) {
            tracing::error!("Configuration hierarchy not loaded: {}", e);
        }

        self.factory = Some(
            ContextFactory::new(
                Arc::clone(&self.runtime),
                Arc::clone(&self.registry),
                Arc::clone(&self.handles),
                Arc::clone(&self.singletons),
            )
            .with_shared_boundary(shared)
            .with_parent_container(self.config.parent_container.clone())
            .with_naming(self.config.use_naming),
        );

        self.transition(LifecycleState::InfraReady);
        Ok(())
    }

    /// Scan the units root
    pub fn discover_units(&mut self) -> Result<usize, LifecycleError> {
        self.expect_state("discover units", LifecycleState::InfraReady)?;

        let scanner = DirectoryScanner::new(&self.config.units_dir);
        self.discovered = scanner.scan().collect();
        for unit in &self.discovered {
            tracing::debug!("Found unit {} at {:?}", unit.name, unit.path);
        }

        self.transition(LifecycleState::UnitsDiscovered);
        Ok(self.discovered.len())
    }

    /// Create a context for every discovered unit and extra context that is
    /// not mapped yet. Returns how many were created.
    pub fn create_contexts(&mut self) -> Result<usize, LifecycleError> {
        self.expect_state("create contexts", LifecycleState::UnitsDiscovered)?;

        let wanted = self.wanted_units();

        let mut created = 0;
        if let Some(factory) = &self.factory {
            for (mount_path, doc_base) in wanted {
                if self.registry.contains(&mount_path) {
                    tracing::debug!(mount_path = %mount_path, "Context already mapped, skipping");
                    continue;
                }
                if create_unit(factory, &mount_path, &doc_base).is_some() {
                    created += 1;
                }
            }
        }

        for child in self.runtime.children() {
            tracing::debug!("Context child: {}", child.summary());
        }

        self.transition(LifecycleState::ContextsCreated);
        Ok(created)
    }

    /// Scan the units root again while running and mount every unit that is
    /// not mapped yet. Units already in the registry are left alone, so
    /// scanning an unchanged tree changes nothing. Returns the new mount paths.
    pub fn rescan(&mut self) -> Result<Vec<MountPath>, LifecycleError> {
        self.expect_state("rescan units", LifecycleState::Running)?;

        self.discovered = DirectoryScanner::new(&self.config.units_dir).scan().collect();
        let wanted = self.wanted_units();

        let mut added = Vec::new();
        if let Some(factory) = &self.factory {
            for (mount_path, doc_base) in wanted {
                if self.registry.contains(&mount_path) {
                    continue;
                }
                let Some(context) = create_unit(factory, &mount_path, &doc_base) else {
                    continue;
                };
                if context.is_running() {
                    match factory.bind_context(&context) {
                        Ok(_) => self.bind_report.bound.push(mount_path.clone()),
                        Err(e) => {
                            tracing::error!(mount_path = %mount_path, "Context binding failed: {}", e);
                            self.bind_report.failed.push((mount_path.clone(), e.to_string()));
                        }
                    }
                }
                added.push(mount_path);
            }
        }

        tracing::info!(
            units = self.discovered.len(),
            added = added.len(),
            "Units rescanned"
        );
        Ok(added)
    }

    /// Apply the realm, valves and connector, then start the runtime.
    /// A failed start leaves the host `Degraded`.
    pub fn start_runtime(&mut self) -> Result<LifecycleState, LifecycleError> {
        self.expect_state("start the runtime", LifecycleState::ContextsCreated)?;

        let realm = self
            .realm
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryRealm::new()));
        self.runtime.set_realm(realm);

        if self.config.access_log {
            self.runtime.add_valve(Arc::new(AccessLogValve::new()));
        }
        for valve in &self.valves {
            self.runtime.add_valve(Arc::clone(valve));
        }

        let mut connector = ConnectorConfig::new(self.config.bind_addr);
        for (key, value) in &self.config.connector_properties {
            if !connector.set_property(key, value) {
                tracing::warn!("Ignoring invalid connector property {}={}", key, value);
            }
        }
        self.runtime.add_connector(connector.clone());
        // Extra connectors take the shared properties but keep their own address
        for addr in &self.config.extra_binds {
            self.runtime.add_connector(ConnectorConfig {
                addr: *addr,
                ..connector.clone()
            });
        }

        let state = match self.runtime.start() {
            Ok(()) => LifecycleState::RuntimeStarted,
            Err(e) => {
                tracing::error!("Host runtime failed to start: {}", e);
                LifecycleState::Degraded
            }
        };
        self.transition(state);
        Ok(state)
    }

    /// Bind the configuration of every running context
    pub fn bind_contexts(&mut self) -> Result<&BindReport, LifecycleError> {
        self.expect_state("bind contexts", LifecycleState::RuntimeStarted)?;

        let mut report = BindReport::default();
        if let Some(factory) = &self.factory {
            for child in self.runtime.children() {
                if !child.is_running() {
                    tracing::debug!(mount_path = %child.mount_path(), "Context not running, not binding");
                    continue;
                }
                match factory.bind_context(&child) {
                    Ok(_) => report.bound.push(child.mount_path().clone()),
                    Err(e) => {
                        tracing::error!(mount_path = %child.mount_path(), "Context binding failed: {}", e);
                        report.failed.push((child.mount_path().clone(), e.to_string()));
                    }
                }
            }
        }

        self.bind_report = report;
        self.transition(LifecycleState::ContextsBound);
        Ok(&self.bind_report)
    }

    /// Look up the core container and the optional transport services
    pub fn resolve_services(&mut self) -> Result<&ResolvedServices, LifecycleError> {
        self.expect_state("resolve services", LifecycleState::ContextsBound)?;

        let mut services = ResolvedServices::default();
        match self.singletons.get(&self.config.core_container) {
            Some(core) => {
                services.transport = optional_service(&core, &self.service_names.transport);
                services.secure_transport =
                    optional_service(&core, &self.service_names.secure_transport);
                services.core = Some(core);
            }
            None => tracing::info!(
                "Core container '{}' is not registered",
                self.config.core_container
            ),
        }

        self.services = services;
        self.transition(LifecycleState::ServicesResolved);
        Ok(&self.services)
    }

    /// Register with the management registry. Registration failures are
    /// logged only.
    pub fn register_management(&mut self) {
        let status = Arc::new(LoaderStatus {
            state: Arc::clone(&self.state),
            engine_name: self.runtime.engine_name().to_string(),
            registry: Arc::clone(&self.registry),
        });

        match self.management.register(MANAGEMENT_NAME, status) {
            Ok(()) => self.registered = true,
            Err(e) => tracing::warn!("Management registration failed: {}", e),
        }

        if self.state() == LifecycleState::ServicesResolved {
            self.transition(LifecycleState::Running);
        }
    }

    /// Mount a unit while the host is up. On a started runtime the context is
    /// bound right away.
    pub fn add_application(
        &self,
        mount_path: &MountPath,
        doc_base: &Path,
    ) -> Result<Arc<ExecutionContext>, LifecycleError> {
        let factory = self.factory.as_ref().ok_or(LifecycleError::InvalidState {
            operation: "add an application",
            expected: LifecycleState::InfraReady,
            actual: self.state(),
        })?;

        let context = factory.create(mount_path, doc_base)?;
        let bound = factory.bind_boundary(&context).and_then(|_| {
            if context.is_running() {
                factory.bind_context(&context).map(|_| ())
            } else {
                Ok(())
            }
        });

        // A unit that cannot be bound is unmounted again so it can be retried
        if let Err(e) = bound {
            let outcome = factory.remove(mount_path);
            tracing::warn!(mount_path = %mount_path, ?outcome, "Application not added: {}", e);
            return Err(e.into());
        }
        Ok(context)
    }

    /// Stop and unmount a unit. Unknown paths are a no-op.
    pub fn remove_application(&self, mount_path: &MountPath) -> RemovalOutcome {
        match &self.factory {
            Some(factory) => factory.remove(mount_path),
            None => RemovalOutcome::default(),
        }
    }

    /// Unregister from management and stop the runtime
    pub fn shutdown(&mut self) -> ShutdownStatus {
        if self.state() == LifecycleState::Stopped {
            return ShutdownStatus::default();
        }
        tracing::info!("Shutting down host");

        if self.registered {
            self.management.unregister(MANAGEMENT_NAME);
            self.registered = false;
        }

        let mut status = ShutdownStatus::default();
        if self.runtime.is_started() {
            if let Err(e) = self.runtime.stop() {
                tracing::error!("Host runtime failed to stop: {}", e);
                status.error = Some(e.to_string());
            }
        } else {
            tracing::debug!("Host runtime was not started");
        }

        self.transition(LifecycleState::Stopped);
        status
    }

    /// Scanned units plus the statically configured extra contexts
    fn wanted_units(&self) -> Vec<(MountPath, PathBuf)> {
        let mut wanted: Vec<(MountPath, PathBuf)> = self
            .discovered
            .iter()
            .map(|unit| (unit.mount_path(), unit.path.clone()))
            .collect();
        for (mount_path, dir) in &self.config.extra_contexts {
            wanted.push((mount_path.clone(), self.config.units_dir.join(dir)));
        }
        wanted
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let actual = self.state();
        if actual != expected {
            return Err(LifecycleError::InvalidState {
                operation,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = self.state.write();
        let previous = *state;
        tracing::info!(from = %previous, to = %next, "Lifecycle transition");
        *state = next;
    }
}

/// Create one unit's context and its boundary, logging failures
fn create_unit(
    factory: &ContextFactory,
    mount_path: &MountPath,
    doc_base: &Path,
) -> Option<Arc<ExecutionContext>> {
    let context = match factory.create(mount_path, doc_base) {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(mount_path = %mount_path, "Context creation failed: {}", e);
            return None;
        }
    };

    if let Err(e) = factory.bind_boundary(&context) {
        tracing::error!(mount_path = %mount_path, "Unit boundary failed: {}", e);
    }
    Some(context)
}

fn optional_service(core: &ConfigContainer, name: &str) -> Option<Arc<Component>> {
    if !core.contains(name) {
        tracing::info!("Service '{}' is not configured", name);
        return None;
    }
    match core.component(name) {
        Ok(component) => {
            tracing::info!(kind = %component.kind, "Service '{}' resolved", name);
            Some(component)
        }
        Err(e) => {
            tracing::warn!("Service '{}' could not be resolved: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_exit_codes() {
        assert_eq!(ShutdownStatus::default().exit_code(), 0);
        let failed = ShutdownStatus {
            error: Some("boom".to_string()),
        };
        assert!(!failed.is_clean());
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(LifecycleState::InfraReady.to_string(), "infra_ready");
        assert_eq!(
            serde_json::to_value(LifecycleState::ServicesResolved).unwrap(),
            json!("services_resolved")
        );
    }

    #[test]
    fn test_default_service_names() {
        let names = ServiceNames::default();
        assert_eq!(names.transport, "transport.server");
        assert_eq!(names.secure_transport, "transport.secure.server");
    }
}
