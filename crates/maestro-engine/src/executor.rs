//! Sequential step execution with a persistence boundary after every step.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use maestro_core::{Event, NotificationPort, WorkflowId, WorkflowMessage};

use crate::agent_executor::{AgentExecutor, AgentResult};
use crate::store::WorkflowStore;
use crate::workflow::{Workflow, WorkflowStatus};
use crate::{EngineError, Result};

/// What happened to a single step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The step succeeded; the index advanced and state was persisted
    Advanced(AgentResult),
    /// The step is waiting for human input; status is persisted as paused
    Paused { questions: Vec<String> },
    /// The step failed; status is persisted as error
    Failed { message: String },
    /// A concurrent pause/cancel won; the step's result was discarded
    Superseded(WorkflowStatus),
}

/// Why a drive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Sequence exhausted
    Completed,
    /// Paused for elicitation at the given step
    Paused { step_index: usize },
    /// Step failure put the workflow into `Error`
    Failed { step_index: usize },
    /// Cancellation observed at a step boundary
    Cancelled,
}

/// Walks a workflow's step sequence, invoking the agent executor per step.
pub struct StepExecutor {
    store: Arc<dyn WorkflowStore>,
    agent_executor: Arc<AgentExecutor>,
    notifier: Arc<dyn NotificationPort>,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        agent_executor: Arc<AgentExecutor>,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            store,
            agent_executor,
            notifier,
        }
    }

    /// Execute steps from the current index until the workflow pauses,
    /// fails, is cancelled, or exhausts its sequence.
    ///
    /// After each successful step the workflow is persisted before the next
    /// step starts; on process restart a running workflow re-enters at the
    /// first step past the last persisted index.
    pub async fn drive(&self, id: WorkflowId, cancel: Arc<RwLock<bool>>) -> Result<DriveOutcome> {
        loop {
            let mut workflow = self
                .store
                .load(id)
                .await?
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

            if *cancel.read().await || workflow.status == WorkflowStatus::Cancelled {
                debug!(workflow_id = %id, "Cancellation observed at step boundary");
                return Ok(DriveOutcome::Cancelled);
            }
            if workflow.status != WorkflowStatus::Running {
                return Ok(DriveOutcome::Paused {
                    step_index: workflow.current_step,
                });
            }
            if workflow.is_exhausted() {
                return Ok(DriveOutcome::Completed);
            }

            match self.run_step(&mut workflow).await? {
                StepOutcome::Advanced(_) => continue,
                StepOutcome::Paused { .. } => {
                    return Ok(DriveOutcome::Paused {
                        step_index: workflow.current_step,
                    })
                }
                StepOutcome::Failed { .. } => {
                    return Ok(DriveOutcome::Failed {
                        step_index: workflow.current_step,
                    })
                }
                StepOutcome::Superseded(WorkflowStatus::Cancelled) => {
                    return Ok(DriveOutcome::Cancelled)
                }
                StepOutcome::Superseded(_) => {
                    return Ok(DriveOutcome::Paused {
                        step_index: workflow.current_step,
                    })
                }
            }
        }
    }

    /// Execute exactly one step of a running workflow, apply its result,
    /// and persist.
    pub async fn run_step(&self, workflow: &mut Workflow) -> Result<StepOutcome> {
        let step_index = workflow.current_step;
        let step = workflow
            .next_step()
            .cloned()
            .ok_or_else(|| EngineError::NotRunning(workflow.id.to_string()))?;

        // The requires invariant: a step may not execute until every
        // artifact it lists already exists.
        if !workflow.requires_satisfied(&step) {
            let missing: Vec<_> = step
                .requires
                .iter()
                .filter(|id| !workflow.artifacts.contains_key(*id))
                .cloned()
                .collect();
            return self
                .fail_step(
                    workflow,
                    step_index,
                    &step.agent,
                    format!("missing required artifacts: {}", missing.join(", ")),
                )
                .await;
        }

        debug!(
            workflow_id = %workflow.id,
            step_index,
            agent = %step.agent,
            action = %step.action,
            "Executing step"
        );

        let result = self
            .agent_executor
            .execute(workflow, &step, step_index)
            .await;

        // A concurrent pause/cancel wins over an in-flight step: the call
        // was allowed to finish, its result is discarded.
        if let Some(current) = self.store.load(workflow.id).await? {
            if current.status != WorkflowStatus::Running {
                info!(
                    workflow_id = %workflow.id,
                    status = %current.status,
                    "Workflow superseded mid-step; discarding result"
                );
                return Ok(StepOutcome::Superseded(current.status));
            }
        }

        match result {
            AgentResult::Document { artifact } => {
                workflow.log_message(WorkflowMessage::system(format!(
                    "{} produced artifact \"{}\"",
                    step.agent, artifact.id
                )));
                workflow.record_artifact(artifact.clone());
                workflow.advance();
                self.persist(workflow).await?;
                self.notify_step_completed(workflow, step_index, &step.agent)
                    .await;
                Ok(StepOutcome::Advanced(AgentResult::Document { artifact }))
            }
            AgentResult::Response { content } => {
                workflow.log_message(WorkflowMessage::agent(content.clone()));
                workflow.advance();
                self.persist(workflow).await?;
                self.notify_step_completed(workflow, step_index, &step.agent)
                    .await;
                Ok(StepOutcome::Advanced(AgentResult::Response { content }))
            }
            AgentResult::Elicitation { questions, .. } => {
                workflow.transition_to(WorkflowStatus::PausedForElicitation)?;
                self.persist(workflow).await?;
                self.publish(
                    workflow,
                    Event::new(
                        "workflow.paused",
                        serde_json::json!({
                            "workflow_id": workflow.id.to_string(),
                            "step_index": step_index,
                            "questions": questions,
                        }),
                    ),
                )
                .await;
                Ok(StepOutcome::Paused { questions })
            }
            AgentResult::Failed { message } => {
                self.fail_step(workflow, step_index, &step.agent, message).await
            }
        }
    }

    async fn fail_step(
        &self,
        workflow: &mut Workflow,
        step_index: usize,
        agent_id: &str,
        message: String,
    ) -> Result<StepOutcome> {
        warn!(
            workflow_id = %workflow.id,
            step_index,
            agent = %agent_id,
            error = %message,
            "Step failed"
        );
        workflow.record_error(maestro_core::ErrorEntry::new(
            step_index,
            agent_id.to_string(),
            message.clone(),
        ));
        workflow.transition_to(WorkflowStatus::Error)?;
        self.persist(workflow).await?;
        self.publish(
            workflow,
            Event::new(
                "workflow.failed",
                serde_json::json!({
                    "workflow_id": workflow.id.to_string(),
                    "step_index": step_index,
                    "message": message,
                }),
            ),
        )
        .await;
        Ok(StepOutcome::Failed { message })
    }

    async fn persist(&self, workflow: &Workflow) -> Result<()> {
        self.store.save(workflow).await
    }

    async fn notify_step_completed(&self, workflow: &Workflow, step_index: usize, agent: &str) {
        self.publish(
            workflow,
            Event::new(
                "workflow.step.completed",
                serde_json::json!({
                    "workflow_id": workflow.id.to_string(),
                    "step_index": step_index,
                    "agent": agent,
                    "current_step": workflow.current_step,
                }),
            ),
        )
        .await;
    }

    async fn publish(&self, workflow: &Workflow, event: Event) {
        // Notification failures must never affect workflow progress.
        if let Err(e) = self
            .notifier
            .publish(&workflow.id.to_string(), &event)
            .await
        {
            warn!(workflow_id = %workflow.id, error = %e, "Failed to publish notification");
        }
    }
}
