//! Host valves shipped with the engine

use context_host_sdk::{RequestInfo, Valve, ValveDecision};

/// Logs every request that reaches the base host
#[derive(Debug, Default)]
pub struct AccessLogValve;

impl AccessLogValve {
    pub fn new() -> Self {
        Self
    }
}

impl Valve for AccessLogValve {
    fn name(&self) -> &str {
        "access-log"
    }

    fn invoke(&self, request: &RequestInfo) -> ValveDecision {
        tracing::info!(
            target: "context_host::access",
            method = %request.method,
            path = %request.path,
            remote = request.remote_addr.as_deref().unwrap_or("-"),
            "request"
        );
        ValveDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_log_never_denies() {
        let valve = AccessLogValve::new();
        let request = RequestInfo::new("GET", "/app/index.html").with_remote_addr("127.0.0.1:4000");
        assert!(valve.invoke(&request).is_continue());
        assert_eq!(valve.name(), "access-log");
    }
}
