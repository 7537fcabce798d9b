//! Context Host SDK - extension contracts for the application context host
//!
//! This crate holds the types that code plugged into the host shares with it:
//! mount paths, request valves, realms and the management registry contract.
//! The host crate provides the default implementations.

pub mod error;
pub mod management;
pub mod mount;
pub mod realm;
pub mod valve;

pub mod prelude {
    //! Common imports for host extensions
    pub use crate::error::{ManagementError, MountPathError};
    pub use crate::management::{Managed, ManagementRegistry};
    pub use crate::mount::MountPath;
    pub use crate::realm::Realm;
    pub use crate::valve::{RequestInfo, Valve, ValveDecision};
    pub use serde_json::{json, Value as JsonValue};
}

// Re-export key types at crate root
pub use error::{ManagementError, MountPathError};
pub use management::{Managed, ManagementRegistry};
pub use mount::MountPath;
pub use realm::Realm;
pub use valve::{RequestInfo, Valve, ValveDecision};
