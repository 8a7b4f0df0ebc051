//! Persistence ports and in-memory reference implementations.
//!
//! The engine only needs load-by-id and save; storage schema and query
//! mechanics belong to the surrounding service layer.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use maestro_core::WorkflowId;

use crate::workflow::{Checkpoint, Workflow};
use crate::Result;

/// Durable workflow storage.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load(&self, id: WorkflowId) -> Result<Option<Workflow>>;
    async fn save(&self, workflow: &Workflow) -> Result<()>;
}

/// Append-only checkpoint storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn append(&self, checkpoint: Checkpoint) -> Result<()>;
    /// Most recent checkpoint for a workflow.
    async fn latest(&self, workflow_id: WorkflowId) -> Result<Option<Checkpoint>>;
    /// Admin-only purge. Returns how many checkpoints were removed.
    async fn purge(&self, workflow_id: WorkflowId) -> Result<usize>;
}

/// In-memory workflow store for tests and embedded deployments.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.workflows.read().await.len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load(&self, id: WorkflowId) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }
}

/// In-memory checkpoint store for tests and embedded deployments.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<WorkflowId, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, workflow_id: WorkflowId) -> usize {
        self.checkpoints
            .read()
            .await
            .get(&workflow_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(&self, checkpoint: Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .entry(checkpoint.workflow_id)
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn latest(&self, workflow_id: WorkflowId) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(&workflow_id)
            .and_then(|c| c.last())
            .cloned())
    }

    async fn purge(&self, workflow_id: WorkflowId) -> Result<usize> {
        Ok(self
            .checkpoints
            .write()
            .await
            .remove(&workflow_id)
            .map(|c| c.len())
            .unwrap_or(0))
    }
}
