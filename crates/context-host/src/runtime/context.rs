//! Execution contexts
//!
//! An execution context is one isolated deployable unit mounted at a path.
//! It carries its document base, its code-loading boundary, a
//! running/stopped flag, an optional context-local configuration container
//! and an attribute space downstream code uses to find per-context objects.
//!
//! Contexts are one-shot: once stopped, a context cannot be started again;
//! mounting the same path again creates a fresh instance.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use context_host_sdk::MountPath;

use super::boundary::{BoundaryError, BoundarySlot};
use crate::container::{ConfigContainer, ConfigError};
use crate::engine::HostError;

/// Attribute under which the context-local configuration container is published
pub const ROOT_CONFIG_ATTRIBUTE: &str = "context.root.config";

/// Unique identifier of a context instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random context ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Created,
    Running,
    Stopped,
}

/// Errors related to a single context
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context {0} is stopped and cannot be restarted")]
    AlreadyStopped(MountPath),

    #[error("Context {0} is not running")]
    NotRunning(MountPath),

    #[error("Host runtime error: {0}")]
    Host(#[from] HostError),

    #[error("Code boundary error: {0}")]
    Boundary(#[from] BoundaryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// One isolated deployable unit
pub struct ExecutionContext {
    id: ContextId,
    mount_path: MountPath,
    doc_base: PathBuf,
    created_at: DateTime<Utc>,
    state: Mutex<ContextState>,
    boundary: RwLock<BoundarySlot>,
    config: RwLock<Option<Arc<ConfigContainer>>>,
    attributes: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    /// Create a context with no boundary assigned
    pub fn new(mount_path: MountPath, doc_base: impl Into<PathBuf>) -> Self {
        Self {
            id: ContextId::new(),
            mount_path,
            doc_base: doc_base.into(),
            created_at: Utc::now(),
            state: Mutex::new(ContextState::Created),
            boundary: RwLock::new(BoundarySlot::Unassigned),
            config: RwLock::new(None),
            attributes: DashMap::new(),
        }
    }

    /// Builder pattern: start with the given boundary
    pub fn with_boundary(self, slot: BoundarySlot) -> Self {
        *self.boundary.write() = slot;
        self
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn mount_path(&self) -> &MountPath {
        &self.mount_path
    }

    pub fn doc_base(&self) -> &Path {
        &self.doc_base
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ContextState::Running
    }

    /// Start the context. Starting a running context is a no-op.
    pub fn start(&self) -> Result<(), ContextError> {
        let mut state = self.state.lock();
        match *state {
            ContextState::Stopped => Err(ContextError::AlreadyStopped(self.mount_path.clone())),
            ContextState::Running => Ok(()),
            ContextState::Created => {
                *state = ContextState::Running;
                tracing::debug!(mount_path = %self.mount_path, "Context started");
                Ok(())
            }
        }
    }

    /// Stop the context and drop its configuration container
    pub fn stop(&self) -> Result<(), ContextError> {
        {
            let mut state = self.state.lock();
            if *state == ContextState::Stopped {
                return Err(ContextError::AlreadyStopped(self.mount_path.clone()));
            }
            *state = ContextState::Stopped;
        }

        self.config.write().take();
        self.attributes.clear();
        tracing::debug!(mount_path = %self.mount_path, "Context stopped");
        Ok(())
    }

    /// Current code-loading boundary
    pub fn boundary(&self) -> BoundarySlot {
        self.boundary.read().clone()
    }

    /// Replace the code-loading boundary, returning the previous one
    pub fn set_boundary(&self, slot: BoundarySlot) -> BoundarySlot {
        std::mem::replace(&mut *self.boundary.write(), slot)
    }

    /// Context-local configuration container, once bound
    pub fn config(&self) -> Option<Arc<ConfigContainer>> {
        self.config.read().clone()
    }

    pub fn set_config(&self, container: Option<Arc<ConfigContainer>>) {
        *self.config.write() = container;
    }

    /// Publish an attribute
    pub fn set_attribute<T: Any + Send + Sync>(&self, name: impl Into<String>, value: Arc<T>) {
        self.attributes.insert(name.into(), value);
    }

    /// Get an attribute of the given type
    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let value = self.attributes.get(name).map(|v| Arc::clone(v.value()))?;
        value.downcast::<T>().ok()
    }

    pub fn remove_attribute(&self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    /// Attribute names, sorted
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Summary used by management views
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "path": self.mount_path.as_str(),
            "docBase": self.doc_base.display().to_string(),
            "state": self.state(),
            "boundary": self.boundary().kind(),
            "configured": self.config().is_some(),
            "createdAt": self.created_at.to_rfc3339(),
        })
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("mount_path", &self.mount_path)
            .field("doc_base", &self.doc_base)
            .field("state", &self.state())
            .field("boundary", &self.boundary().kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::new(MountPath::parse("/app").unwrap(), "/srv/webapps/app")
    }

    #[test]
    fn test_context_ids_are_unique() {
        assert_ne!(context().id(), context().id());
    }

    #[test]
    fn test_start_stop_is_one_shot() {
        let ctx = context();
        assert_eq!(ctx.state(), ContextState::Created);

        ctx.start().unwrap();
        ctx.start().unwrap();
        assert!(ctx.is_running());

        ctx.stop().unwrap();
        assert_eq!(ctx.state(), ContextState::Stopped);
        assert!(matches!(ctx.start(), Err(ContextError::AlreadyStopped(_))));
        assert!(matches!(ctx.stop(), Err(ContextError::AlreadyStopped(_))));
    }

    #[test]
    fn test_stop_drops_configuration() {
        let ctx = context();
        ctx.start().unwrap();
        let container = Arc::new(ConfigContainer::root());
        ctx.set_config(Some(Arc::clone(&container)));
        ctx.set_attribute(ROOT_CONFIG_ATTRIBUTE, container);
        assert!(ctx.config().is_some());

        ctx.stop().unwrap();
        assert!(ctx.config().is_none());
        assert!(ctx.attribute::<ConfigContainer>(ROOT_CONFIG_ATTRIBUTE).is_none());
    }

    #[test]
    fn test_typed_attributes() {
        let ctx = context();
        ctx.set_attribute("logging/context-name", Arc::new("app".to_string()));

        let name = ctx.attribute::<String>("logging/context-name").unwrap();
        assert_eq!(name.as_str(), "app");
        assert!(ctx.attribute::<u32>("logging/context-name").is_none());
        assert_eq!(ctx.attribute_names(), vec!["logging/context-name".to_string()]);

        assert!(ctx.remove_attribute("logging/context-name"));
        assert!(!ctx.remove_attribute("logging/context-name"));
    }

    #[test]
    fn test_boundary_swap_returns_previous() {
        let ctx = context();
        assert!(matches!(ctx.boundary(), BoundarySlot::Unassigned));

        let shared = Arc::new(super::super::boundary::SharedBoundary::empty());
        let previous = ctx.set_boundary(BoundarySlot::Shared(shared));
        assert!(matches!(previous, BoundarySlot::Unassigned));
        assert_eq!(ctx.boundary().kind(), "shared");
    }
}
