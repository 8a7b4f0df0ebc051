//! Workflow domain model and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use maestro_core::{ErrorEntry, TenantId, WorkflowId, WorkflowMessage};

use crate::{EngineError, Result};

/// Status of a workflow.
///
/// `Completed`, `Error`, and `Cancelled` are terminal; a terminal workflow
/// is immutable except for audit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Persisted, execution not yet started
    Initializing,
    /// Steps are executing
    Running,
    /// A step is waiting for human input
    PausedForElicitation,
    /// Sequence exhausted successfully
    Completed,
    /// A step failed; explicit operator action required
    Error,
    /// Explicitly cancelled
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Error | WorkflowStatus::Cancelled
        )
    }

    /// Whether the state machine admits `self -> next`.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (WorkflowStatus::Initializing, WorkflowStatus::Running) => true,
            (WorkflowStatus::Running, WorkflowStatus::PausedForElicitation) => true,
            (WorkflowStatus::PausedForElicitation, WorkflowStatus::Running) => true,
            (WorkflowStatus::Running, WorkflowStatus::Completed) => true,
            (_, WorkflowStatus::Error) => true,
            (_, WorkflowStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Initializing => write!(f, "initializing"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::PausedForElicitation => write!(f, "paused_for_elicitation"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Error => write!(f, "error"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One unit of work in a workflow's sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Agent bound to this step
    pub agent: String,
    /// What the step does
    pub action: String,
    /// Artifact id this step produces
    #[serde(default)]
    pub creates: Option<String>,
    /// Artifact ids that must already exist
    #[serde(default)]
    pub requires: Vec<String>,
    /// Free-form notes; may embed a template/task reference
    #[serde(default)]
    pub notes: Option<String>,
}

impl Step {
    pub fn new(agent: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
            creates: None,
            requires: Vec::new(),
            notes: None,
        }
    }

    pub fn creates(mut self, artifact_id: impl Into<String>) -> Self {
        self.creates = Some(artifact_id.into());
        self
    }

    pub fn requires(mut self, artifact_id: impl Into<String>) -> Self {
        self.requires.push(artifact_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A produced document or data object, immutable once created.
///
/// A later step that "replaces" an artifact records new content under the
/// same id with a fresh timestamp; the message log keeps the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    /// Artifact type (e.g., "document", "response")
    pub kind: String,
    pub content: String,
    /// Agent that produced the artifact
    pub produced_by: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        content: impl Into<String>,
        produced_by: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            content: content.into(),
            produced_by: produced_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// A durable, ordered execution of steps with persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub tenant: TenantId,
    pub name: String,
    /// Fixed once running
    pub sequence: Vec<Step>,
    /// Monotonic except explicit admin reset; never exceeds `sequence.len()`
    pub current_step: usize,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Bumped on every mutation; recovery uses it to detect staleness
    pub updated_at: DateTime<Utc>,
    /// Key-value bag supplied at start (initiating user, hints, ...)
    pub context: HashMap<String, serde_json::Value>,
    /// Artifact id -> artifact
    pub artifacts: HashMap<String, Artifact>,
    /// Append-only message log
    pub messages: Vec<WorkflowMessage>,
    /// Append-only error log
    pub errors: Vec<ErrorEntry>,
    pub checkpoints_enabled: bool,
}

impl Workflow {
    pub fn new(
        tenant: TenantId,
        name: impl Into<String>,
        sequence: Vec<Step>,
        context: HashMap<String, serde_json::Value>,
        checkpoints_enabled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            tenant,
            name: name.into(),
            sequence,
            current_step: 0,
            status: WorkflowStatus::Initializing,
            started_at: now,
            ended_at: None,
            updated_at: now,
            context,
            artifacts: HashMap::new(),
            messages: Vec::new(),
            errors: Vec::new(),
            checkpoints_enabled,
        }
    }

    /// Validate that every step's `requires` is satisfiable by some earlier
    /// step's `creates`.
    pub fn validate_sequence(&self) -> Result<()> {
        if self.sequence.is_empty() {
            return Err(EngineError::InvalidSequence(
                "workflow has no steps".to_string(),
            ));
        }

        let mut available: HashSet<&str> = HashSet::new();
        for (index, step) in self.sequence.iter().enumerate() {
            for required in &step.requires {
                if !available.contains(required.as_str()) {
                    return Err(EngineError::InvalidSequence(format!(
                        "step {} requires artifact '{}' which no earlier step creates",
                        index, required
                    )));
                }
            }
            if let Some(creates) = &step.creates {
                available.insert(creates);
            }
        }
        Ok(())
    }

    /// Apply a state-machine transition, or fail with `InvalidTransition`.
    pub fn transition_to(&mut self, next: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// The step at the current index, `None` once the sequence is exhausted.
    pub fn next_step(&self) -> Option<&Step> {
        self.sequence.get(self.current_step)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_step >= self.sequence.len()
    }

    /// Advance past the current step. The index never exceeds the sequence
    /// length.
    pub fn advance(&mut self) {
        if self.current_step < self.sequence.len() {
            self.current_step += 1;
        }
        self.touch();
    }

    /// Whether every artifact a step requires already exists.
    pub fn requires_satisfied(&self, step: &Step) -> bool {
        step.requires.iter().all(|id| self.artifacts.contains_key(id))
    }

    pub fn record_artifact(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.id.clone(), artifact);
        self.touch();
    }

    pub fn record_error(&mut self, entry: ErrorEntry) {
        self.errors.push(entry);
        self.touch();
    }

    pub fn log_message(&mut self, message: WorkflowMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Append-only snapshot of workflow state, used only for explicit recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: WorkflowId,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub state: Workflow,
}

impl Checkpoint {
    pub fn new(label: impl Into<String>, workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id,
            label: label.into(),
            created_at: Utc::now(),
            state: workflow.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_workflow() -> Workflow {
        Workflow::new(
            TenantId::new(),
            "greenfield",
            vec![
                Step::new("pm", "draft").creates("brief"),
                Step::new("architect", "design").requires("brief").creates("arch"),
            ],
            HashMap::new(),
            true,
        )
    }

    #[test]
    fn test_validate_sequence_ok() {
        assert!(two_step_workflow().validate_sequence().is_ok());
    }

    #[test]
    fn test_validate_sequence_forward_reference() {
        let workflow = Workflow::new(
            TenantId::new(),
            "broken",
            vec![
                Step::new("architect", "design").requires("brief").creates("arch"),
                Step::new("pm", "draft").creates("brief"),
            ],
            HashMap::new(),
            false,
        );

        assert!(matches!(
            workflow.validate_sequence(),
            Err(EngineError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_validate_empty_sequence() {
        let workflow = Workflow::new(TenantId::new(), "empty", vec![], HashMap::new(), false);
        assert!(matches!(
            workflow.validate_sequence(),
            Err(EngineError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut workflow = two_step_workflow();

        workflow.transition_to(WorkflowStatus::Running).unwrap();
        workflow
            .transition_to(WorkflowStatus::PausedForElicitation)
            .unwrap();
        workflow.transition_to(WorkflowStatus::Running).unwrap();
        workflow.transition_to(WorkflowStatus::Completed).unwrap();

        assert!(workflow.status.is_terminal());
        assert!(workflow.ended_at.is_some());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut workflow = two_step_workflow();

        // Cannot pause before running.
        assert!(matches!(
            workflow.transition_to(WorkflowStatus::PausedForElicitation),
            Err(EngineError::InvalidTransition { .. })
        ));

        workflow.transition_to(WorkflowStatus::Cancelled).unwrap();

        // Terminal states admit nothing.
        assert!(matches!(
            workflow.transition_to(WorkflowStatus::Running),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_error_reachable_from_any_non_terminal() {
        for status in [
            WorkflowStatus::Initializing,
            WorkflowStatus::Running,
            WorkflowStatus::PausedForElicitation,
        ] {
            assert!(status.can_transition_to(WorkflowStatus::Error));
        }
        assert!(!WorkflowStatus::Completed.can_transition_to(WorkflowStatus::Error));
    }

    #[test]
    fn test_advance_and_requires() {
        let mut workflow = two_step_workflow();
        workflow.transition_to(WorkflowStatus::Running).unwrap();

        let second = workflow.sequence[1].clone();
        assert!(!workflow.requires_satisfied(&second));

        workflow.record_artifact(Artifact::new("brief", "document", "...", "pm"));
        assert!(workflow.requires_satisfied(&second));

        workflow.advance();
        assert_eq!(workflow.current_step, 1);

        workflow.advance();
        workflow.advance(); // capped at sequence length
        assert_eq!(workflow.current_step, 2);
        assert!(workflow.is_exhausted());
    }

    #[test]
    fn test_checkpoint_snapshots_state() {
        let mut workflow = two_step_workflow();
        workflow.record_artifact(Artifact::new("brief", "document", "v1", "pm"));

        let checkpoint = Checkpoint::new("init", &workflow);
        workflow.record_artifact(Artifact::new("arch", "document", "v1", "architect"));

        assert_eq!(checkpoint.state.artifacts.len(), 1);
        assert_eq!(workflow.artifacts.len(), 2);
    }
}
