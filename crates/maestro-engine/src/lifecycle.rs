//! Workflow lifecycle: creation, start, pause, resume, cancel, completion,
//! checkpointing, and explicit recovery.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use maestro_agents::DocumentTemplate;
use maestro_core::{Event, TenantId, WorkflowId, WorkflowMessage};

use crate::agent_executor::{session_key, AgentExecutor, AgentResult};
use crate::executor::{DriveOutcome, StepExecutor, StepOutcome};
use crate::registry::EngineRegistry;
use crate::workflow::{Checkpoint, Step, Workflow, WorkflowStatus};
use crate::{EngineError, Result};

/// Configuration for starting a workflow: either an explicit step sequence
/// or a document template whose sections become steps.
#[derive(Debug, Clone)]
pub struct StartConfig {
    pub name: String,
    pub tenant: TenantId,
    pub steps: Vec<Step>,
    pub template: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
    /// Overrides the engine-wide checkpoint setting when present
    pub checkpoints: Option<bool>,
}

impl StartConfig {
    /// Start from an explicit step sequence.
    pub fn sequence(name: impl Into<String>, tenant: TenantId, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            tenant,
            steps,
            template: None,
            context: HashMap::new(),
            checkpoints: None,
        }
    }

    /// Start from a named document template; each section becomes a step
    /// owned by the section's agent.
    pub fn from_template(
        name: impl Into<String>,
        tenant: TenantId,
        template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tenant,
            steps: Vec::new(),
            template: Some(template.into()),
            context: HashMap::new(),
            checkpoints: None,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints = Some(enabled);
        self
    }
}

/// What lifecycle operations hand back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReceipt {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
}

/// Owns the workflow state machine and drives execution asynchronously.
#[derive(Clone)]
pub struct WorkflowLifecycleManager {
    registry: EngineRegistry,
    executor: Arc<StepExecutor>,
    /// Completed workflows, kept for quick history queries
    history: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
    cancel_flags: Arc<DashMap<WorkflowId, Arc<RwLock<bool>>>>,
}

impl WorkflowLifecycleManager {
    pub fn new(registry: EngineRegistry) -> Self {
        let agent_executor = Arc::new(AgentExecutor::new(
            registry.loader(),
            registry.resolver(),
            registry.elicitation(),
            registry.throttler(),
            registry.provider(),
            registry.sessions(),
            registry.agents(),
        ));
        let executor = Arc::new(StepExecutor::new(
            registry.store(),
            agent_executor,
            registry.notifier(),
        ));

        Self {
            registry,
            executor,
            history: Arc::new(RwLock::new(HashMap::new())),
            cancel_flags: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Build, validate, and persist a workflow, then schedule execution
    /// without blocking the caller.
    ///
    /// Validation failures are reported synchronously and nothing is
    /// persisted; execution failures after this call returns surface only
    /// through persisted state and notifications.
    pub async fn start(&self, config: StartConfig) -> Result<WorkflowReceipt> {
        let steps = match &config.template {
            Some(template_name) => {
                let template = self
                    .registry
                    .loader()
                    .load_template(template_name)
                    .await
                    .map_err(EngineError::Agent)?
                    .ok_or_else(|| {
                        EngineError::InvalidSequence(format!(
                            "template '{}' not found",
                            template_name
                        ))
                    })?;
                steps_from_template(&template, &self.registry.engine_config().default_agent)
            }
            None => config.steps.clone(),
        };

        let checkpoints_enabled = config
            .checkpoints
            .unwrap_or(self.registry.engine_config().checkpoints_enabled);
        let workflow = Workflow::new(
            config.tenant,
            config.name,
            steps,
            config.context,
            checkpoints_enabled,
        );
        workflow.validate_sequence()?;

        self.registry.store().save(&workflow).await?;
        if workflow.checkpoints_enabled {
            self.registry
                .checkpoints()
                .append(Checkpoint::new("init", &workflow))
                .await?;
        }
        self.publish(
            &workflow,
            Event::new(
                "workflow.started",
                serde_json::json!({
                    "workflow_id": workflow.id.to_string(),
                    "name": workflow.name,
                    "steps": workflow.sequence.len(),
                }),
            ),
        )
        .await;

        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            step_count = workflow.sequence.len(),
            "Workflow created"
        );

        let receipt = WorkflowReceipt {
            workflow_id: workflow.id,
            status: workflow.status,
        };
        self.spawn_run(workflow.id);
        Ok(receipt)
    }

    /// Pause a running workflow. Legal only from `Running`.
    pub async fn pause(&self, id: WorkflowId) -> Result<WorkflowReceipt> {
        let mut workflow = self.load_required(id).await?;
        workflow.transition_to(WorkflowStatus::PausedForElicitation)?;
        self.registry.store().save(&workflow).await?;

        info!(workflow_id = %id, "Workflow paused");
        Ok(WorkflowReceipt {
            workflow_id: id,
            status: workflow.status,
        })
    }

    /// Resume a paused workflow. Legal only from `PausedForElicitation`.
    pub async fn resume(&self, id: WorkflowId) -> Result<WorkflowReceipt> {
        let mut workflow = self.load_required(id).await?;
        workflow.transition_to(WorkflowStatus::Running)?;
        self.registry.store().save(&workflow).await?;
        self.publish(
            &workflow,
            Event::new(
                "workflow.resumed",
                serde_json::json!({ "workflow_id": id.to_string() }),
            ),
        )
        .await;

        info!(workflow_id = %id, "Workflow resumed");
        let receipt = WorkflowReceipt {
            workflow_id: id,
            status: workflow.status,
        };
        self.spawn_continue(id);
        Ok(receipt)
    }

    /// Cancel a workflow from any non-terminal status. Artifacts already
    /// produced are preserved; an in-flight provider call finishes and its
    /// result is discarded at the next step boundary.
    pub async fn cancel(&self, id: WorkflowId) -> Result<WorkflowReceipt> {
        let flag = self.cancel_flag(id);
        *flag.write().await = true;

        let mut workflow = self.load_required(id).await?;
        workflow.transition_to(WorkflowStatus::Cancelled)?;
        self.registry.store().save(&workflow).await?;
        self.publish(
            &workflow,
            Event::new(
                "workflow.cancelled",
                serde_json::json!({
                    "workflow_id": id.to_string(),
                    "artifacts": workflow.artifacts.len(),
                }),
            ),
        )
        .await;

        info!(workflow_id = %id, "Workflow cancelled");
        Ok(WorkflowReceipt {
            workflow_id: id,
            status: workflow.status,
        })
    }

    /// Finish a workflow whose sequence is exhausted: persist final state,
    /// checkpoint, notify, move it into execution history, and release the
    /// tenant's throttling reservations.
    pub async fn complete(&self, id: WorkflowId) -> Result<()> {
        let mut workflow = self.load_required(id).await?;
        workflow.transition_to(WorkflowStatus::Completed)?;
        self.registry.store().save(&workflow).await?;
        if workflow.checkpoints_enabled {
            self.registry
                .checkpoints()
                .append(Checkpoint::new("complete", &workflow))
                .await?;
        }

        let mut artifact_ids: Vec<_> = workflow.artifacts.keys().cloned().collect();
        artifact_ids.sort();
        self.publish(
            &workflow,
            Event::new(
                "workflow.completed",
                serde_json::json!({
                    "workflow_id": id.to_string(),
                    "artifacts": artifact_ids,
                }),
            ),
        )
        .await;

        self.history.write().await.insert(id, workflow.clone());
        if let Err(e) = self
            .registry
            .throttler()
            .release_tenant(&workflow.tenant)
            .await
        {
            warn!(workflow_id = %id, error = %e, "Failed to release throttling reservations");
        }
        self.cancel_flags.remove(&id);

        info!(
            workflow_id = %id,
            artifacts = workflow.artifacts.len(),
            "Workflow completed"
        );
        Ok(())
    }

    /// Record answers for a paused step's elicitation session. Once every
    /// question is answered the step resumes and produces its result on the
    /// same index.
    pub async fn submit_elicitation_answers(
        &self,
        id: WorkflowId,
        step_index: usize,
        answers: HashMap<usize, String>,
    ) -> Result<AgentResult> {
        let sessions = self.registry.sessions();
        let key = session_key(id, step_index);
        let mut session = sessions.get(&key).ok_or_else(|| {
            EngineError::NotFound(format!(
                "no elicitation session for workflow {} step {}",
                id, step_index
            ))
        })?;

        let mut workflow = self.load_required(id).await?;
        if workflow.current_step != step_index {
            return Err(EngineError::NotRunning(format!(
                "workflow {} is not waiting at step {}",
                id, step_index
            )));
        }

        for (index, answer) in &answers {
            session.record_answer(*index, answer.clone());
            workflow.log_message(WorkflowMessage::user(answer.clone()));
        }
        sessions.insert(key, session.clone());

        if !session.is_satisfied() {
            self.registry.store().save(&workflow).await?;
            return Ok(AgentResult::Elicitation {
                questions: session.outstanding(),
                complete: false,
            });
        }

        // All questions answered: resume and re-enter the paused step.
        workflow.transition_to(WorkflowStatus::Running)?;
        self.registry.store().save(&workflow).await?;

        match self.executor.run_step(&mut workflow).await? {
            StepOutcome::Advanced(result) => {
                self.spawn_continue(id);
                Ok(result)
            }
            StepOutcome::Paused { questions } => Ok(AgentResult::Elicitation {
                questions,
                complete: false,
            }),
            StepOutcome::Failed { message } => Ok(AgentResult::Failed { message }),
            StepOutcome::Superseded(status) => Err(EngineError::NotRunning(format!(
                "workflow {} moved to {}",
                id, status
            ))),
        }
    }

    /// Explicit recovery: restore a workflow stuck in `Running` past the
    /// staleness threshold from its latest checkpoint. Checkpoints are
    /// never consulted automatically.
    pub async fn recover(&self, id: WorkflowId) -> Result<Workflow> {
        let workflow = self.load_required(id).await?;
        if workflow.status != WorkflowStatus::Running {
            return Err(EngineError::Recovery(format!(
                "workflow {} is {} and does not need recovery",
                id, workflow.status
            )));
        }

        let stale_after = chrono::Duration::from_std(self.registry.engine_config().stale_running())
            .map_err(|e| EngineError::Recovery(e.to_string()))?;
        if Utc::now().signed_duration_since(workflow.updated_at) < stale_after {
            return Err(EngineError::Recovery(format!(
                "workflow {} is not stale",
                id
            )));
        }

        let checkpoint = self
            .registry
            .checkpoints()
            .latest(id)
            .await?
            .ok_or_else(|| {
                EngineError::Recovery(format!("no checkpoint recorded for workflow {}", id))
            })?;

        let mut restored = checkpoint.state;
        restored.touch();
        self.registry.store().save(&restored).await?;

        info!(
            workflow_id = %id,
            label = %checkpoint.label,
            "Workflow restored from checkpoint"
        );
        Ok(restored)
    }

    /// Current state, falling back to execution history.
    pub async fn get_state(&self, id: WorkflowId) -> Result<Option<Workflow>> {
        if let Some(workflow) = self.registry.store().load(id).await? {
            return Ok(Some(workflow));
        }
        Ok(self.history.read().await.get(&id).cloned())
    }

    /// Completed workflows this process has seen.
    pub async fn history(&self) -> Vec<Workflow> {
        self.history.read().await.values().cloned().collect()
    }

    fn spawn_run(&self, id: WorkflowId) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.run(id).await {
                error!(workflow_id = %id, error = %e, "Workflow execution failed");
            }
        });
    }

    fn spawn_continue(&self, id: WorkflowId) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.drive_to_rest(id).await {
                error!(workflow_id = %id, error = %e, "Workflow execution failed");
            }
        });
    }

    async fn run(&self, id: WorkflowId) -> Result<()> {
        {
            let mut workflow = self.load_required(id).await?;
            if workflow.status == WorkflowStatus::Initializing {
                workflow.transition_to(WorkflowStatus::Running)?;
                self.registry.store().save(&workflow).await?;
            }
        }
        self.drive_to_rest(id).await
    }

    async fn drive_to_rest(&self, id: WorkflowId) -> Result<()> {
        let cancel = self.cancel_flag(id);
        match self.executor.drive(id, cancel).await? {
            DriveOutcome::Completed => self.complete(id).await,
            DriveOutcome::Paused { .. }
            | DriveOutcome::Failed { .. }
            | DriveOutcome::Cancelled => Ok(()),
        }
    }

    fn cancel_flag(&self, id: WorkflowId) -> Arc<RwLock<bool>> {
        self.cancel_flags
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(false)))
            .clone()
    }

    async fn load_required(&self, id: WorkflowId) -> Result<Workflow> {
        self.registry
            .store()
            .load(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn publish(&self, workflow: &Workflow, event: Event) {
        if let Err(e) = self
            .registry
            .notifier()
            .publish(&workflow.id.to_string(), &event)
            .await
        {
            warn!(workflow_id = %workflow.id, error = %e, "Failed to publish notification");
        }
    }
}

/// Map template sections onto steps: the section owner becomes the agent,
/// the section id becomes the produced artifact, and the template reference
/// travels in the step notes for the resolver.
fn steps_from_template(template: &DocumentTemplate, default_agent: &str) -> Vec<Step> {
    template
        .sections
        .iter()
        .map(|section| Step {
            agent: section
                .owner
                .clone()
                .unwrap_or_else(|| default_agent.to_string()),
            action: format!("Draft the \"{}\" section: {}", section.title, section.instruction),
            creates: Some(section.id.clone()),
            requires: Vec::new(),
            notes: Some(format!("template: {}", template.name)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_agents::TemplateSection;

    #[test]
    fn test_steps_from_template() {
        let template = DocumentTemplate {
            name: "prd".to_string(),
            title: "PRD".to_string(),
            output_artifact: Some("prd".to_string()),
            sections: vec![
                TemplateSection {
                    id: "goals".to_string(),
                    title: "Goals".to_string(),
                    instruction: "Summarize goals.".to_string(),
                    elicit: false,
                    owner: Some("analyst".to_string()),
                    prompts: vec![],
                },
                TemplateSection {
                    id: "requirements".to_string(),
                    title: "Requirements".to_string(),
                    instruction: "List requirements.".to_string(),
                    elicit: false,
                    owner: None,
                    prompts: vec![],
                },
            ],
        };

        let steps = steps_from_template(&template, "pm");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].agent, "analyst");
        assert_eq!(steps[0].creates.as_deref(), Some("goals"));
        assert_eq!(steps[1].agent, "pm");
        assert!(steps[1].notes.as_deref().unwrap().contains("template: prd"));
    }

    #[test]
    fn test_start_config_builders() {
        let config = StartConfig::from_template("greenfield", TenantId::new(), "prd")
            .with_context("user", serde_json::json!("mary"))
            .with_checkpoints(false);

        assert_eq!(config.template.as_deref(), Some("prd"));
        assert_eq!(config.checkpoints, Some(false));
        assert!(config.steps.is_empty());
    }
}
