//! Management registry contract
//!
//! Components register under a name so operators can inspect them. From the
//! host's point of view registration is fire-and-forget: failures are logged
//! by the caller, never propagated into the lifecycle.

use std::sync::Arc;

use serde_json::Value;

use crate::error::ManagementError;

/// A component that exposes management attributes
pub trait Managed: Send + Sync + 'static {
    /// Name of the management interface this component implements
    fn management_interface(&self) -> &'static str;

    /// Current attribute snapshot
    fn attributes(&self) -> Value;
}

/// Registry of managed components
pub trait ManagementRegistry: Send + Sync + 'static {
    /// Register a component under a name
    fn register(&self, name: &str, component: Arc<dyn Managed>) -> Result<(), ManagementError>;

    /// Remove a component, returning whether it was registered
    fn unregister(&self, name: &str) -> bool;

    /// Shut the registry down, dropping every registration
    fn shutdown(&self);
}
