//! Context Host - application context registry and lifecycle manager
//!
//! Discovers deployable units under a directory, gives each one an isolated
//! execution context with its own code-loading boundary, wires every context
//! into a hierarchy of configuration containers and drives the ordered
//! startup and shutdown of the host runtime serving them.

pub mod config;
pub mod container;
pub mod engine;
pub mod management;
pub mod runtime;

pub use config::HostConfig;
pub use container::{ConfigContainer, ConfigError, HierarchyLoader, SingletonRegistry};
pub use engine::{EmbeddedRuntime, HostError, HostRuntime};
pub use management::LocalManagement;
pub use runtime::{
    ContextFactory, ContextRegistry, ExecutionContext, LifecycleError, LifecycleState,
    Orchestrator, ShutdownStatus,
};
