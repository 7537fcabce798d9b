//! Host runtime boundary and the embedded engine
//!
//! The lifecycle core only ever talks to a [`HostRuntime`]: it creates and
//! mounts contexts, attaches valves, a realm and connectors, and starts and
//! stops the runtime. [`EmbeddedRuntime`] is the engine shipped with the host;
//! it serves each mounted context's document base over HTTP.

pub mod realm;
pub mod serve;
pub mod valve;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use context_host_sdk::{MountPath, Realm, Valve};

use crate::runtime::boundary::{BoundarySlot, SharedBoundary};
use crate::runtime::context::{ContextState, ExecutionContext};

pub use realm::MemoryRealm;
pub use valve::AccessLogValve;

/// Errors raised by the host runtime
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Engine has not been initialised")]
    NotInitialized,

    #[error("Engine is already started")]
    AlreadyStarted,

    #[error("Engine is not started")]
    NotStarted,

    #[error("Engine was stopped and cannot be restarted")]
    Stopped,

    #[error("A context is already mounted at {0}")]
    DuplicateChild(MountPath),

    #[error("Failed to bind connector on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("No async runtime available to run connectors")]
    NoAsyncRuntime,
}

/// A listening endpoint of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub addr: SocketAddr,

    /// Properties that are not understood by the engine itself
    pub properties: BTreeMap<String, String>,
}

impl ConnectorConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            properties: BTreeMap::new(),
        }
    }

    /// Set a connector property. `port` and `address` change the listen
    /// address; anything else is kept as-is. Returns false for an unparsable
    /// `port` or `address` value.
    pub fn set_property(&mut self, key: &str, value: &str) -> bool {
        match key {
            "port" => match value.parse() {
                Ok(port) => self.addr.set_port(port),
                Err(_) => return false,
            },
            "address" => match value.parse() {
                Ok(ip) => self.addr.set_ip(ip),
                Err(_) => return false,
            },
            _ => {
                self.properties.insert(key.to_string(), value.to_string());
            }
        }
        true
    }
}

/// What the lifecycle core needs from a host runtime
pub trait HostRuntime: Send + Sync + 'static {
    /// Name of the engine
    fn engine_name(&self) -> &str;

    /// Construct the engine and its base host
    fn init(&self) -> Result<(), HostError>;

    /// Boundary handed to every context created from now on
    fn set_default_boundary(&self, boundary: Arc<SharedBoundary>);

    /// Create (but do not mount) a context
    fn create_context(&self, mount_path: &MountPath, doc_base: &Path) -> Arc<ExecutionContext>;

    /// Mount a context on the base host. The runtime keeps a weak reference only.
    fn add_child(&self, context: &Arc<ExecutionContext>) -> Result<(), HostError>;

    fn find_child(&self, mount_path: &MountPath) -> Option<Arc<ExecutionContext>>;

    /// Live mounted contexts, ordered by mount path
    fn children(&self) -> Vec<Arc<ExecutionContext>>;

    /// Unmount a context, returning whether one was mounted at the path
    fn remove_child(&self, mount_path: &MountPath) -> bool;

    fn set_realm(&self, realm: Arc<dyn Realm>);

    fn add_valve(&self, valve: Arc<dyn Valve>);

    fn add_connector(&self, connector: ConnectorConfig);

    fn start(&self) -> Result<(), HostError>;

    fn stop(&self) -> Result<(), HostError>;

    fn is_started(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineLifecycle {
    New,
    Initialized,
    Started,
    Stopped,
}

/// State shared between the engine and its connector tasks
#[derive(Default)]
pub(crate) struct EngineShared {
    children: RwLock<BTreeMap<MountPath, Weak<ExecutionContext>>>,
    valves: RwLock<Vec<Arc<dyn Valve>>>,
}

impl EngineShared {
    /// Longest mount path matching the request path
    pub(crate) fn route(&self, request_path: &str) -> Option<Arc<ExecutionContext>> {
        self.children
            .read()
            .iter()
            .filter(|(mount, _)| mount.matches(request_path))
            .max_by_key(|(mount, _)| mount.as_str().len())
            .and_then(|(_, context)| context.upgrade())
    }

    pub(crate) fn valves(&self) -> Vec<Arc<dyn Valve>> {
        self.valves.read().clone()
    }
}

struct RunningConnector {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The embedded engine
pub struct EmbeddedRuntime {
    engine_name: String,
    host_name: String,
    shared: Arc<EngineShared>,
    default_boundary: RwLock<Option<Arc<SharedBoundary>>>,
    realm: RwLock<Option<Arc<dyn Realm>>>,
    connectors: Mutex<Vec<ConnectorConfig>>,
    running: Mutex<Vec<RunningConnector>>,
    draining: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: Mutex<EngineLifecycle>,
}

impl EmbeddedRuntime {
    pub fn new(engine_name: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            engine_name: engine_name.into(),
            host_name: host_name.into(),
            shared: Arc::new(EngineShared::default()),
            default_boundary: RwLock::new(None),
            realm: RwLock::new(None),
            connectors: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
            draining: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(EngineLifecycle::New),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Addresses the started connectors are actually bound to
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.running.lock().iter().map(|c| c.addr).collect()
    }

    /// Wait for stopped connectors to finish their in-flight requests.
    /// Returns false if they were still busy when `timeout` ran out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let tasks: Vec<JoinHandle<()>> = self.draining.lock().drain(..).collect();
        let pending = tasks.len();
        let finished = tokio::time::timeout(timeout, async move {
            for task in tasks {
                let _ = task.await;
            }
        })
        .await
        .is_ok();

        if !finished {
            tracing::warn!(connectors = pending, "Connectors still busy after {:?}", timeout);
        }
        finished
    }

    pub fn realm_name(&self) -> Option<String> {
        self.realm.read().as_ref().map(|r| r.name().to_string())
    }

    pub fn valve_names(&self) -> Vec<String> {
        self.shared
            .valves()
            .iter()
            .map(|v| v.name().to_string())
            .collect()
    }

    fn spawn_connector(
        &self,
        handle: &tokio::runtime::Handle,
        connector: &ConnectorConfig,
    ) -> Result<RunningConnector, HostError> {
        let bind_error = |source| HostError::Bind {
            addr: connector.addr,
            source,
        };

        let listener = std::net::TcpListener::bind(connector.addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let _enter = handle.enter();
        let listener = tokio::net::TcpListener::from_std(listener).map_err(bind_error)?;

        let (shutdown, signal) = oneshot::channel::<()>();
        let app = serve::router(Arc::clone(&self.shared));
        let task = handle.spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = signal.await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!("Connector {} exited: {}", addr, e);
            }
        });

        for (key, value) in &connector.properties {
            tracing::debug!(connector = %addr, "Connector property {} = {}", key, value);
        }
        tracing::info!("Connector listening on {}", addr);

        Ok(RunningConnector {
            addr,
            shutdown,
            task,
        })
    }
}

impl HostRuntime for EmbeddedRuntime {
    fn engine_name(&self) -> &str {
        &self.engine_name
    }

    fn init(&self) -> Result<(), HostError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            EngineLifecycle::New => {
                *lifecycle = EngineLifecycle::Initialized;
                tracing::info!(
                    engine = %self.engine_name,
                    host = %self.host_name,
                    "Engine initialised"
                );
                Ok(())
            }
            EngineLifecycle::Initialized => Ok(()),
            EngineLifecycle::Started => Err(HostError::AlreadyStarted),
            EngineLifecycle::Stopped => Err(HostError::Stopped),
        }
    }

    fn set_default_boundary(&self, boundary: Arc<SharedBoundary>) {
        *self.default_boundary.write() = Some(boundary);
    }

    fn create_context(&self, mount_path: &MountPath, doc_base: &Path) -> Arc<ExecutionContext> {
        let slot = match self.default_boundary.read().as_ref() {
            Some(boundary) => BoundarySlot::Shared(Arc::clone(boundary)),
            None => BoundarySlot::Unassigned,
        };
        Arc::new(ExecutionContext::new(mount_path.clone(), doc_base).with_boundary(slot))
    }

    fn add_child(&self, context: &Arc<ExecutionContext>) -> Result<(), HostError> {
        {
            let mut children = self.shared.children.write();
            let mount_path = context.mount_path();
            if children.get(mount_path).and_then(Weak::upgrade).is_some() {
                return Err(HostError::DuplicateChild(mount_path.clone()));
            }
            children.retain(|_, child| child.strong_count() > 0);
            children.insert(mount_path.clone(), Arc::downgrade(context));
        }

        // Children mounted into a running engine start immediately
        if self.is_started() {
            if let Err(e) = context.start() {
                tracing::warn!("Mounted context did not start: {}", e);
            }
        }
        Ok(())
    }

    fn find_child(&self, mount_path: &MountPath) -> Option<Arc<ExecutionContext>> {
        self.shared
            .children
            .read()
            .get(mount_path)
            .and_then(Weak::upgrade)
    }

    fn children(&self) -> Vec<Arc<ExecutionContext>> {
        self.shared
            .children
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn remove_child(&self, mount_path: &MountPath) -> bool {
        self.shared.children.write().remove(mount_path).is_some()
    }

    fn set_realm(&self, realm: Arc<dyn Realm>) {
        tracing::info!("Setting realm: {}", realm.name());
        *self.realm.write() = Some(realm);
    }

    fn add_valve(&self, valve: Arc<dyn Valve>) {
        tracing::debug!("Adding host valve: {}", valve.name());
        self.shared.valves.write().push(valve);
    }

    fn add_connector(&self, connector: ConnectorConfig) {
        self.connectors.lock().push(connector);
    }

    fn start(&self) -> Result<(), HostError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            EngineLifecycle::New => return Err(HostError::NotInitialized),
            EngineLifecycle::Started => return Err(HostError::AlreadyStarted),
            EngineLifecycle::Stopped => return Err(HostError::Stopped),
            EngineLifecycle::Initialized => {}
        }

        let connectors = self.connectors.lock().clone();
        let mut running = Vec::with_capacity(connectors.len());
        if !connectors.is_empty() {
            let handle =
                tokio::runtime::Handle::try_current().map_err(|_| HostError::NoAsyncRuntime)?;
            for connector in &connectors {
                match self.spawn_connector(&handle, connector) {
                    Ok(started) => running.push(started),
                    Err(e) => {
                        for started in running {
                            let _ = started.shutdown.send(());
                        }
                        return Err(e);
                    }
                }
            }
        }

        for child in self.children() {
            if let Err(e) = child.start() {
                tracing::warn!("Context did not start: {}", e);
            }
        }

        *self.running.lock() = running;
        *lifecycle = EngineLifecycle::Started;
        tracing::info!(engine = %self.engine_name, "Engine started");
        Ok(())
    }

    fn stop(&self) -> Result<(), HostError> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle != EngineLifecycle::Started {
            return Err(HostError::NotStarted);
        }

        let mut draining = self.draining.lock();
        for connector in self.running.lock().drain(..) {
            tracing::debug!("Stopping connector on {}", connector.addr);
            let _ = connector.shutdown.send(());
            draining.push(connector.task);
        }
        drop(draining);

        for child in self.children() {
            if child.state() != ContextState::Stopped {
                if let Err(e) = child.stop() {
                    tracing::warn!("Context did not stop cleanly: {}", e);
                }
            }
        }

        *lifecycle = EngineLifecycle::Stopped;
        tracing::info!(engine = %self.engine_name, "Engine stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        *self.lifecycle.lock() == EngineLifecycle::Started
    }
}

impl std::fmt::Debug for EmbeddedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedRuntime")
            .field("engine_name", &self.engine_name)
            .field("host_name", &self.host_name)
            .field("lifecycle", &*self.lifecycle.lock())
            .field("children", &self.shared.children.read().len())
            .finish()
    }
}
