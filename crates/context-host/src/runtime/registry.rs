//! Context registry and application handle table
//!
//! The [`ContextRegistry`] owns every mounted [`ExecutionContext`], keyed by
//! mount path. Writers serialize on a single mutex and publish a new immutable
//! snapshot; readers load the current snapshot without taking any lock, so
//! lookups from request handling never wait on a mount or unmount.
//!
//! The [`ApplicationTable`] is the side table of external-facing
//! [`ApplicationHandle`]s other subsystems use to find "the thing serving this
//! path" without going through the host runtime.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use context_host_sdk::MountPath;

use super::context::{ContextError, ContextState, ExecutionContext};

pub type ContextMap = HashMap<MountPath, Arc<ExecutionContext>>;

/// Process-wide mapping from mount path to execution context
pub struct ContextRegistry {
    contexts: ArcSwap<ContextMap>,
    write_lock: Mutex<()>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            contexts: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Add or replace the context for its mount path, returning the replaced one
    pub fn add(&self, context: Arc<ExecutionContext>) -> Option<Arc<ExecutionContext>> {
        let _guard = self.write_lock.lock();
        let mut next = ContextMap::clone(&self.contexts.load());
        let previous = next.insert(context.mount_path().clone(), context);
        self.contexts.store(Arc::new(next));

        if let Some(previous) = &previous {
            tracing::warn!(mount_path = %previous.mount_path(), "Replaced registered context");
        }
        previous
    }

    /// Drop the mapping for a mount path. Stopping the context is the caller's job.
    pub fn remove(&self, mount_path: &MountPath) -> Option<Arc<ExecutionContext>> {
        let _guard = self.write_lock.lock();
        let current = self.contexts.load();
        if !current.contains_key(mount_path) {
            return None;
        }

        let mut next = ContextMap::clone(&current);
        let removed = next.remove(mount_path);
        self.contexts.store(Arc::new(next));
        removed
    }

    /// Look up a context; an unmapped path is simply `None`
    pub fn get(&self, mount_path: &MountPath) -> Option<Arc<ExecutionContext>> {
        self.contexts.load().get(mount_path).cloned()
    }

    pub fn contains(&self, mount_path: &MountPath) -> bool {
        self.contexts.load().contains_key(mount_path)
    }

    /// Immutable view of every registered context
    pub fn snapshot(&self) -> Arc<ContextMap> {
        self.contexts.load_full()
    }

    /// Registered mount paths, sorted
    pub fn mount_paths(&self) -> Vec<MountPath> {
        let mut paths: Vec<MountPath> = self.contexts.load().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.contexts.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.load().is_empty()
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("mount_paths", &self.mount_paths())
            .finish()
    }
}

/// External-facing handle on a mounted context
#[derive(Debug)]
pub struct ApplicationHandle {
    mount_path: MountPath,
    context: Weak<ExecutionContext>,
    published_at: DateTime<Utc>,
}

impl ApplicationHandle {
    pub fn new(context: &Arc<ExecutionContext>) -> Self {
        Self {
            mount_path: context.mount_path().clone(),
            context: Arc::downgrade(context),
            published_at: Utc::now(),
        }
    }

    pub fn mount_path(&self) -> &MountPath {
        &self.mount_path
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// The context behind this handle, if it is still alive
    pub fn context(&self) -> Option<Arc<ExecutionContext>> {
        self.context.upgrade()
    }

    pub fn is_running(&self) -> bool {
        self.context().is_some_and(|c| c.is_running())
    }

    /// Stop the context if it is still live. A stopped or dropped context is fine.
    pub fn stop(&self) -> Result<(), ContextError> {
        match self.context() {
            Some(context) if context.state() != ContextState::Stopped => context.stop(),
            _ => Ok(()),
        }
    }
}

/// Side table of application handles keyed by mount path
#[derive(Debug, Default)]
pub struct ApplicationTable {
    handles: DashMap<MountPath, Arc<ApplicationHandle>>,
}

impl ApplicationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a handle, replacing any handle for the same path
    pub fn publish(&self, handle: ApplicationHandle) -> Arc<ApplicationHandle> {
        let handle = Arc::new(handle);
        self.handles
            .insert(handle.mount_path().clone(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, mount_path: &MountPath) -> Option<Arc<ApplicationHandle>> {
        self.handles.get(mount_path).map(|h| Arc::clone(h.value()))
    }

    pub fn remove(&self, mount_path: &MountPath) -> Option<Arc<ApplicationHandle>> {
        self.handles.remove(mount_path).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
