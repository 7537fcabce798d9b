//! In-process management registry

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use context_host_sdk::{Managed, ManagementError, ManagementRegistry};

/// Management registry that keeps registrations in memory
#[derive(Default)]
pub struct LocalManagement {
    components: DashMap<String, Arc<dyn Managed>>,
}

impl LocalManagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Managed>> {
        self.components.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Attributes of a registered component
    pub fn attributes(&self, name: &str) -> Option<Value> {
        self.lookup(name).map(|c| c.attributes())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl ManagementRegistry for LocalManagement {
    fn register(&self, name: &str, component: Arc<dyn Managed>) -> Result<(), ManagementError> {
        match self.components.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ManagementError::AlreadyRegistered(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(
                    interface = component.management_interface(),
                    "Registered management component {}",
                    name
                );
                slot.insert(component);
                Ok(())
            }
        }
    }

    fn unregister(&self, name: &str) -> bool {
        self.components.remove(name).is_some()
    }

    fn shutdown(&self) {
        self.components.clear();
        tracing::debug!("Management registry shut down");
    }
}

impl std::fmt::Debug for LocalManagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalManagement")
            .field("components", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe;

    impl Managed for Probe {
        fn management_interface(&self) -> &'static str {
            "Probe"
        }

        fn attributes(&self) -> Value {
            json!({ "ok": true })
        }
    }

    #[test]
    fn test_register_once() {
        let management = LocalManagement::new();
        management.register("probe", Arc::new(Probe)).unwrap();
        assert!(matches!(
            management.register("probe", Arc::new(Probe)),
            Err(ManagementError::AlreadyRegistered(_))
        ));
        assert_eq!(management.attributes("probe"), Some(json!({ "ok": true })));
    }

    #[test]
    fn test_unregister_and_shutdown() {
        let management = LocalManagement::new();
        management.register("a", Arc::new(Probe)).unwrap();
        management.register("b", Arc::new(Probe)).unwrap();
        assert_eq!(management.names(), vec!["a", "b"]);

        assert!(management.unregister("a"));
        assert!(!management.unregister("a"));

        management.shutdown();
        assert!(management.names().is_empty());
    }
}
