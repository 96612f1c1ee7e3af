//! The active-workflow set.
//!
//! Written by the routing path, presence-checked by the watchers. Removal is
//! the only cancellation mechanism and whoever removes a workflow owns its
//! terminal user message.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{Workflow, WorkflowId};

#[derive(Clone, Default)]
pub struct WorkflowTable {
    inner: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl WorkflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a workflow. Returns false (and keeps the existing record) when
    /// the id is already active.
    pub async fn insert(&self, workflow: Workflow) -> bool {
        let mut map = self.inner.write().await;
        if map.contains_key(&workflow.id) {
            return false;
        }
        map.insert(workflow.id.clone(), workflow);
        true
    }

    pub async fn contains(&self, id: &WorkflowId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Runs `f` against a workflow while holding the write lock.
    pub async fn update<R>(&self, id: &WorkflowId, f: impl FnOnce(&mut Workflow) -> R) -> Option<R> {
        self.inner.write().await.get_mut(id).map(f)
    }

    /// Runs `f` against a workflow while holding the read lock.
    pub async fn read<R>(&self, id: &WorkflowId, f: impl FnOnce(&Workflow) -> R) -> Option<R> {
        self.inner.read().await.get(id).map(f)
    }

    /// Removes a workflow, handing ownership to the caller.
    pub async fn remove(&self, id: &WorkflowId) -> Option<Workflow> {
        self.inner.write().await.remove(id)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<_> = self.inner.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
