//! Per-step agent execution.
//!
//! Resolves how a step should execute (templated, conversational, or
//! generic persona-driven), runs the elicitation protocol, and submits the
//! built prompt to the AI provider through the request throttler.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use maestro_agents::{
    AgentDefinition, AgentLoader, AgentRef, DocumentTemplate, ElicitationManager,
    ElicitationSession, ResolutionContext, ResolvedDefinition, TemplateResolver,
};
use maestro_core::{CompletionRequest, ErrorEntry, LlmProvider, WorkflowId};
use maestro_infra::{AiRequestThrottler, ResourceCache};

use crate::workflow::{Artifact, Step, Workflow};

/// Outcome of executing one step for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResult {
    /// A document artifact was produced
    Document { artifact: Artifact },
    /// The step needs human input before it can proceed
    Elicitation { questions: Vec<String>, complete: bool },
    /// A conversational answer with no artifact
    Response { content: String },
    /// The step cannot execute (agent or definition unavailable)
    Failed { message: String },
}

/// Executes one step for one agent.
pub struct AgentExecutor {
    loader: Arc<dyn AgentLoader>,
    resolver: Arc<TemplateResolver>,
    elicitation: Arc<ElicitationManager>,
    throttler: Arc<AiRequestThrottler>,
    provider: Arc<dyn LlmProvider>,
    /// Step-scoped elicitation sessions, reclaimed by sweep when abandoned
    sessions: Arc<ResourceCache<ElicitationSession>>,
    /// Hydrated agent definitions, reclaimed by sweep when idle
    agents: Arc<ResourceCache<AgentDefinition>>,
}

impl AgentExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        loader: Arc<dyn AgentLoader>,
        resolver: Arc<TemplateResolver>,
        elicitation: Arc<ElicitationManager>,
        throttler: Arc<AiRequestThrottler>,
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<ResourceCache<ElicitationSession>>,
        agents: Arc<ResourceCache<AgentDefinition>>,
    ) -> Self {
        Self {
            loader,
            resolver,
            elicitation,
            throttler,
            provider,
            sessions,
            agents,
        }
    }

    /// Execute the step at `step_index`.
    ///
    /// Provider failures are converted into an apologetic response and an
    /// error-log entry so a single bad call does not abort the workflow.
    /// Missing agents or definitions fail the step via `Failed`.
    pub async fn execute(
        &self,
        workflow: &mut Workflow,
        step: &Step,
        step_index: usize,
    ) -> AgentResult {
        let agent = match self.hydrate_agent(&step.agent).await {
            Ok(agent) => agent,
            Err(e) => {
                return AgentResult::Failed {
                    message: format!("agent '{}' unavailable: {}", step.agent, e),
                }
            }
        };

        let session_key = session_key(workflow.id, step_index);

        // A step already inside an elicitation session continues that
        // session rather than re-resolving intent.
        if let Some(session) = self.sessions.get(&session_key) {
            if !session.is_satisfied() {
                return AgentResult::Elicitation {
                    questions: session.outstanding(),
                    complete: false,
                };
            }
            let request = self.resume_request(&agent, step, workflow, &session);
            let result = self.submit(workflow, step, step_index, &agent, request).await;
            if !matches!(result, AgentResult::Failed { .. }) {
                // The session is spent once the step produced its output.
                self.sessions.invalidate(&session_key);
            }
            return result;
        }

        let context = resolution_context(workflow);
        let resolved = match self
            .resolver
            .resolve(&step.action, step.notes.as_deref(), &context, &agent)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                return AgentResult::Failed {
                    message: format!("definition resolution failed: {}", e),
                }
            }
        };

        let request = match resolved {
            Some(definition) => {
                let definition = narrow_to_section(definition, step);
                if let Some(session) =
                    self.elicitation
                        .open_session(workflow.id, step_index, &definition)
                {
                    let questions = session.outstanding();
                    debug!(
                        workflow_id = %workflow.id,
                        step_index,
                        count = questions.len(),
                        "Step requires elicitation"
                    );
                    self.sessions.insert(session_key, session);
                    return AgentResult::Elicitation {
                        questions,
                        complete: false,
                    };
                }
                self.definition_request(&agent, step, workflow, &definition)
            }
            None if context.conversational => self.conversational_request(&agent, step, workflow),
            None => self.generic_request(&agent, step),
        };

        self.submit(workflow, step, step_index, &agent, request).await
    }

    async fn hydrate_agent(&self, agent_id: &str) -> maestro_agents::Result<AgentDefinition> {
        let loader = Arc::clone(&self.loader);
        let id = agent_id.to_string();
        self.agents
            .get_or_load(agent_id, || async move {
                AgentRef::Summary {
                    id: id.clone(),
                    name: id,
                }
                .hydrate(loader.as_ref())
                .await
            })
            .await
    }

    /// Call the provider through the throttler and map the raw response.
    async fn submit(
        &self,
        workflow: &mut Workflow,
        step: &Step,
        step_index: usize,
        agent: &AgentDefinition,
        request: CompletionRequest,
    ) -> AgentResult {
        let provider = Arc::clone(&self.provider);
        let outcome = self
            .throttler
            .enqueue(&workflow.tenant, || async move {
                provider.complete(&request).await
            })
            .await;

        let completion = match outcome {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                warn!(
                    workflow_id = %workflow.id,
                    step_index,
                    error = %e,
                    "Provider call failed; substituting apology"
                );
                workflow.record_error(ErrorEntry::new(step_index, step.agent.clone(), e.to_string()));
                return AgentResult::Response {
                    content: apology(&step.action),
                };
            }
            Err(e) => {
                warn!(
                    workflow_id = %workflow.id,
                    step_index,
                    error = %e,
                    "Throttled dispatch failed; substituting apology"
                );
                workflow.record_error(ErrorEntry::new(step_index, step.agent.clone(), e.to_string()));
                return AgentResult::Response {
                    content: apology(&step.action),
                };
            }
        };

        match &step.creates {
            Some(artifact_id) => AgentResult::Document {
                artifact: Artifact::new(
                    artifact_id.clone(),
                    "document",
                    completion.content,
                    agent.id.clone(),
                ),
            },
            None => AgentResult::Response {
                content: completion.content,
            },
        }
    }

    fn definition_request(
        &self,
        agent: &AgentDefinition,
        step: &Step,
        workflow: &Workflow,
        definition: &ResolvedDefinition,
    ) -> CompletionRequest {
        let mut prompt = match definition {
            ResolvedDefinition::Template(template) => {
                format!(
                    "Produce the following deliverable for step \"{}\".\n\n{}",
                    step.action,
                    template.outline()
                )
            }
            ResolvedDefinition::Task(task) => {
                let mut text = format!(
                    "Carry out the task \"{}\" for step \"{}\".\nPurpose: {}\n",
                    task.title, step.action, task.purpose
                );
                for (i, instruction) in task.steps.iter().enumerate() {
                    text.push_str(&format!("{}. {}\n", i + 1, instruction));
                }
                text
            }
        };
        push_required_artifacts(&mut prompt, step, workflow);

        CompletionRequest::new(prompt)
            .with_system(agent.persona.system_prompt())
            .with_metadata("workflow_id", workflow.id.to_string())
            .with_metadata("definition", definition.name())
    }

    /// Prompt for a step resuming after its elicitation was satisfied.
    fn resume_request(
        &self,
        agent: &AgentDefinition,
        step: &Step,
        workflow: &Workflow,
        session: &ElicitationSession,
    ) -> CompletionRequest {
        let mut prompt = format!(
            "Produce the deliverable for step \"{}\" using the answers collected from the user:\n",
            step.action
        );
        for (question, answer) in session.answers() {
            prompt.push_str(&format!("Q: {}\nA: {}\n", question, answer));
        }
        push_required_artifacts(&mut prompt, step, workflow);

        CompletionRequest::new(prompt)
            .with_system(agent.persona.system_prompt())
            .with_metadata("workflow_id", workflow.id.to_string())
            .with_metadata("definition", session.definition.clone())
    }

    fn conversational_request(
        &self,
        agent: &AgentDefinition,
        step: &Step,
        workflow: &Workflow,
    ) -> CompletionRequest {
        let message = workflow
            .context
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or(&step.action);

        CompletionRequest::new(message.to_string())
            .with_system(agent.persona.system_prompt())
            .with_metadata("workflow_id", workflow.id.to_string())
            .with_metadata("mode", "conversation")
    }

    /// Generic persona-driven prompt when nothing else applies.
    fn generic_request(&self, agent: &AgentDefinition, step: &Step) -> CompletionRequest {
        let prompt = format!(
            "Acting as {} ({}), {}.",
            agent.persona.role, agent.persona.focus, step.action
        );
        CompletionRequest::new(prompt)
            .with_system(agent.persona.system_prompt())
            .with_metadata("mode", "generic")
    }
}

pub(crate) fn session_key(workflow_id: WorkflowId, step_index: usize) -> String {
    format!("session:{}:{}", workflow_id, step_index)
}

fn apology(action: &str) -> String {
    format!(
        "I apologize - I was unable to reach the AI provider while working on \"{}\". \
         The workflow will continue; please revisit this step if its output matters.",
        action
    )
}

/// Distill resolver hints from the workflow context.
fn resolution_context(workflow: &Workflow) -> ResolutionContext {
    let mut context = ResolutionContext::default();
    if let Some(name) = workflow.context.get("template").and_then(|v| v.as_str()) {
        context.template = Some(name.to_string());
    }
    if let Some(name) = workflow.context.get("task").and_then(|v| v.as_str()) {
        context.task = Some(name.to_string());
    }
    let conversational = workflow
        .context
        .get("interaction")
        .and_then(|v| v.as_str())
        == Some("conversation")
        || workflow.context.contains_key("message");
    if conversational {
        context.conversational = true;
    }
    context
}

/// When a step was generated from one template section (its `creates` is a
/// section id), elicitation and prompting apply to that section only.
fn narrow_to_section(definition: ResolvedDefinition, step: &Step) -> ResolvedDefinition {
    match definition {
        ResolvedDefinition::Template(template) => {
            let section = step
                .creates
                .as_ref()
                .and_then(|id| template.sections.iter().find(|s| &s.id == id).cloned());
            match section {
                Some(section) => ResolvedDefinition::Template(DocumentTemplate {
                    name: template.name,
                    title: template.title,
                    output_artifact: template.output_artifact,
                    sections: vec![section],
                }),
                None => ResolvedDefinition::Template(template),
            }
        }
        other => other,
    }
}

fn push_required_artifacts(prompt: &mut String, step: &Step, workflow: &Workflow) {
    for required in &step.requires {
        if let Some(artifact) = workflow.artifacts.get(required) {
            prompt.push_str(&format!(
                "\nExisting artifact \"{}\" (by {}):\n{}\n",
                artifact.id, artifact.produced_by, artifact.content
            ));
        }
    }
}
