//! Workflow orchestration core for Maestro.
//!
//! This crate drives ordered sequences of AI-persona invocations that
//! collaboratively produce project artifacts. It provides:
//! - A persisted workflow state machine with pause/resume, cancellation,
//!   checkpointing, and explicit recovery
//! - Sequential step execution with a persistence boundary after every step
//! - Per-step agent execution: template resolution, elicitation, and
//!   throttled provider calls
//! - A dependency-injected process-root registry with explicit shutdown

pub mod agent_executor;
pub mod executor;
pub mod lifecycle;
pub mod registry;
pub mod store;
pub mod workflow;

pub use agent_executor::{AgentExecutor, AgentResult};
pub use executor::{DriveOutcome, StepExecutor, StepOutcome};
pub use lifecycle::{StartConfig, WorkflowLifecycleManager, WorkflowReceipt};
pub use registry::{EngineRegistry, EngineRegistryBuilder};
pub use store::{CheckpointStore, InMemoryCheckpointStore, InMemoryWorkflowStore, WorkflowStore};
pub use workflow::{Artifact, Checkpoint, Step, Workflow, WorkflowStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid step sequence: {0}")]
    InvalidSequence(String),

    #[error("Invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Workflow not running: {0}")]
    NotRunning(String),

    #[error("Missing required artifact: {0}")]
    MissingArtifact(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Agent error: {0}")]
    Agent(#[from] maestro_agents::AgentError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] maestro_core::AppError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
