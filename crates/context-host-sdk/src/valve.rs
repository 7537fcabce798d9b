//! Request valves
//!
//! Valves are cross-cutting filters attached to the base host. The engine runs
//! them in registration order before a request reaches a mounted context; the
//! first valve that denies a request ends the chain.

use std::fmt;

/// Request metadata visible to valves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,

    /// Request path (without query string)
    pub path: String,

    /// Remote peer address, when known
    pub remote_addr: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            remote_addr: None,
        }
    }

    /// Builder pattern: set the remote address
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

/// Outcome of a valve invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValveDecision {
    /// Pass the request on to the next valve
    Continue,

    /// Reject the request with the given reason
    Deny(String),
}

impl ValveDecision {
    pub fn is_continue(&self) -> bool {
        matches!(self, ValveDecision::Continue)
    }
}

/// A request-handling filter attached to the base host
pub trait Valve: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Inspect a request before it is dispatched to a context
    fn invoke(&self, request: &RequestInfo) -> ValveDecision;
}

impl fmt::Debug for dyn Valve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Valve").field("name", &self.name()).finish()
    }
}
