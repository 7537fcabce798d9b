//! Context runtime
//!
//! Everything between the units on disk and the host runtime:
//! - Unit discovery
//! - Execution contexts and their code-loading boundaries
//! - The context registry and application side table
//! - The context factory and the lifecycle orchestrator

pub mod boundary;
pub mod context;
pub mod factory;
pub mod lifecycle;
pub mod registry;
pub mod scanner;

pub use boundary::{BoundarySlot, SharedBoundary, UnitBoundary};
pub use context::{ContextError, ContextState, ExecutionContext};
pub use factory::{ContextFactory, RemovalOutcome};
pub use lifecycle::{LifecycleError, LifecycleState, Orchestrator, ShutdownStatus};
pub use registry::{ApplicationHandle, ApplicationTable, ContextRegistry};
pub use scanner::{DirectoryScanner, UnitDir};
