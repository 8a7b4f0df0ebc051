//! End-to-end scenarios for the orchestration core, driven through the
//! lifecycle manager with in-memory ports.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use maestro_agents::{
    AgentCommand, AgentDefinition, AgentDependencies, DocumentTemplate, Persona,
    StaticAgentLoader, TaskDefinition, TemplateSection,
};
use maestro_core::config::ThrottleConfig;
use maestro_core::{Completion, CompletionRequest, InMemoryNotifier, LlmError, LlmProvider, NotificationPort, TenantId, WorkflowId};
use maestro_engine::{
    AgentResult, Checkpoint, CheckpointStore, EngineError, EngineRegistry, InMemoryWorkflowStore,
    StartConfig, Step, Workflow, WorkflowLifecycleManager, WorkflowStatus, WorkflowStore,
};

struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Completion, LlmError>>>,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<Completion, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            delay,
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Completion::new("generated content", "test-model")))
    }
}

fn agent(id: &str, role: &str, tasks: Vec<String>) -> AgentDefinition {
    AgentDefinition {
        id: id.to_string(),
        name: id.to_string(),
        title: role.to_string(),
        persona: Persona {
            role: role.to_string(),
            style: "direct".to_string(),
            identity: format!("a {}", role),
            focus: "project artifacts".to_string(),
            principles: vec![],
        },
        commands: vec![AgentCommand {
            name: format!("create-{}", id),
            description: "Create the owned document".to_string(),
            template: None,
            task: None,
        }],
        dependencies: AgentDependencies {
            templates: vec![],
            tasks,
        },
    }
}

fn loader() -> StaticAgentLoader {
    StaticAgentLoader::new()
        .with_agent(agent("pm", "Product Manager", vec!["discovery".to_string()]))
        .with_agent(agent("architect", "Architect", vec![]))
        .with_task(TaskDefinition {
            name: "discovery".to_string(),
            title: "Discovery".to_string(),
            purpose: "Collect the facts before drafting.".to_string(),
            steps: vec![
                "What problem does this project solve?".to_string(),
                "Who are the primary users?".to_string(),
                "What does success look like?".to_string(),
            ],
            elicit: true,
        })
        .with_template(DocumentTemplate {
            name: "prd".to_string(),
            title: "Product Requirements Document".to_string(),
            output_artifact: Some("prd".to_string()),
            sections: vec![
                TemplateSection {
                    id: "goals".to_string(),
                    title: "Goals".to_string(),
                    instruction: "Summarize the goals.".to_string(),
                    elicit: true,
                    owner: Some("pm".to_string()),
                    prompts: vec![
                        "What problem does this solve?".to_string(),
                        "Who asked for it?".to_string(),
                    ],
                },
                TemplateSection {
                    id: "requirements".to_string(),
                    title: "Requirements".to_string(),
                    instruction: "List the requirements.".to_string(),
                    elicit: false,
                    owner: Some("pm".to_string()),
                    prompts: vec![],
                },
            ],
        })
}

struct Harness {
    manager: WorkflowLifecycleManager,
    notifier: Arc<InMemoryNotifier>,
    store: Arc<InMemoryWorkflowStore>,
}

fn harness(provider: Arc<dyn LlmProvider>) -> Harness {
    let notifier = Arc::new(InMemoryNotifier::new());
    let store = Arc::new(InMemoryWorkflowStore::new());
    let registry = EngineRegistry::builder()
        .agent_loader(Arc::new(loader()))
        .llm_provider(provider)
        .notification_port(Arc::clone(&notifier) as Arc<dyn NotificationPort>)
        .workflow_store(Arc::clone(&store) as Arc<dyn WorkflowStore>)
        .throttle_config(ThrottleConfig {
            min_interval_ms: 0,
            lease_ttl_secs: 30,
            max_lease_attempts: 20,
        })
        .build()
        .unwrap();

    Harness {
        manager: WorkflowLifecycleManager::new(registry),
        notifier,
        store,
    }
}

async fn wait_for_status(
    manager: &WorkflowLifecycleManager,
    id: WorkflowId,
    status: WorkflowStatus,
) -> Workflow {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(workflow) = manager.get_state(id).await.unwrap() {
            if workflow.status == status {
                return workflow;
            }
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for status {:?}", status);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_artifact(
    manager: &WorkflowLifecycleManager,
    id: WorkflowId,
    artifact_id: &str,
) -> Workflow {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(workflow) = manager.get_state(id).await.unwrap() {
            if workflow.artifacts.contains_key(artifact_id) {
                return workflow;
            }
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for artifact {}", artifact_id);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn two_step_sequence_completes_with_ordered_artifacts() {
    let harness = harness(ScriptedProvider::new(vec![
        Ok(Completion::new("the brief", "test-model")),
        Ok(Completion::new("the architecture", "test-model")),
    ]));

    let receipt = harness
        .manager
        .start(StartConfig::sequence(
            "greenfield",
            TenantId::new(),
            vec![
                Step::new("pm", "draft").creates("brief"),
                Step::new("architect", "design").requires("brief").creates("arch"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(receipt.status, WorkflowStatus::Initializing);

    let workflow = wait_for_status(&harness.manager, receipt.workflow_id, WorkflowStatus::Completed).await;

    assert_eq!(workflow.artifacts.len(), 2);
    let brief = &workflow.artifacts["brief"];
    let arch = &workflow.artifacts["arch"];
    assert_eq!(brief.content, "the brief");
    assert_eq!(arch.content, "the architecture");
    assert!(brief.created_at <= arch.created_at);

    // The index equals the number of steps whose artifact exists.
    assert_eq!(workflow.current_step, 2);
    assert_eq!(workflow.current_step, workflow.artifacts.len());

    assert_eq!(harness.notifier.events_matching("workflow.completed").len(), 1);
    assert_eq!(
        harness.notifier.events_matching("workflow.step.completed").len(),
        2
    );
}

#[tokio::test]
async fn forward_reference_fails_start_without_persisting() {
    let harness = harness(ScriptedProvider::new(vec![]));

    let result = harness
        .manager
        .start(StartConfig::sequence(
            "broken",
            TenantId::new(),
            vec![
                Step::new("architect", "design").requires("brief").creates("arch"),
                Step::new("pm", "draft").creates("brief"),
            ],
        ))
        .await;

    assert!(matches!(result, Err(EngineError::InvalidSequence(_))));
    assert_eq!(harness.store.len().await, 0);
}

#[tokio::test]
async fn elicitation_pauses_until_all_answers_then_produces_on_same_index() {
    let harness = harness(ScriptedProvider::new(vec![Ok(Completion::new(
        "discovery notes",
        "test-model",
    ))]));

    let receipt = harness
        .manager
        .start(StartConfig::sequence(
            "discovery-run",
            TenantId::new(),
            vec![Step::new("pm", "run discovery").creates("notes")],
        ))
        .await
        .unwrap();
    let id = receipt.workflow_id;

    let paused = wait_for_status(&harness.manager, id, WorkflowStatus::PausedForElicitation).await;
    assert_eq!(paused.current_step, 0);
    assert!(paused.artifacts.is_empty());

    // Partial answers keep the step pending.
    let result = harness
        .manager
        .submit_elicitation_answers(id, 0, HashMap::from([(0, "Slow reporting".to_string())]))
        .await
        .unwrap();
    match result {
        AgentResult::Elicitation {
            questions,
            complete,
        } => {
            assert!(!complete);
            assert_eq!(questions.len(), 2);
        }
        other => panic!("expected pending elicitation, got {:?}", other),
    }

    // The rest of the answers complete the step on the same index.
    let result = harness
        .manager
        .submit_elicitation_answers(
            id,
            0,
            HashMap::from([
                (1, "Data analysts".to_string()),
                (2, "Reports in under a minute".to_string()),
            ]),
        )
        .await
        .unwrap();
    match result {
        AgentResult::Document { artifact } => {
            assert_eq!(artifact.id, "notes");
            assert_eq!(artifact.content, "discovery notes");
        }
        other => panic!("expected document, got {:?}", other),
    }

    let workflow = wait_for_status(&harness.manager, id, WorkflowStatus::Completed).await;
    assert_eq!(workflow.current_step, 1);
    assert!(workflow.artifacts.contains_key("notes"));
}

#[tokio::test]
async fn pause_resume_without_input_is_a_noop() {
    let harness = harness(ScriptedProvider::new(vec![]));

    let receipt = harness
        .manager
        .start(StartConfig::sequence(
            "discovery-run",
            TenantId::new(),
            vec![Step::new("pm", "run discovery").creates("notes")],
        ))
        .await
        .unwrap();
    let id = receipt.workflow_id;

    let before = wait_for_status(&harness.manager, id, WorkflowStatus::PausedForElicitation).await;

    harness.manager.resume(id).await.unwrap();
    let after = wait_for_status(&harness.manager, id, WorkflowStatus::PausedForElicitation).await;

    assert_eq!(after.current_step, before.current_step);
    assert_eq!(after.artifacts.len(), before.artifacts.len());
}

#[tokio::test]
async fn provider_failure_becomes_apology_and_workflow_continues() {
    let harness = harness(ScriptedProvider::new(vec![
        Err(LlmError::Timeout),
        Ok(Completion::new("the architecture", "test-model")),
    ]));

    let receipt = harness
        .manager
        .start(StartConfig::sequence(
            "flaky-provider",
            TenantId::new(),
            vec![
                Step::new("pm", "draft").creates("brief"),
                Step::new("architect", "design").creates("arch"),
            ],
        ))
        .await
        .unwrap();

    let workflow =
        wait_for_status(&harness.manager, receipt.workflow_id, WorkflowStatus::Completed).await;

    // The failed call produced an apology, not an artifact, and exactly one
    // error-log entry referencing the step.
    assert_eq!(workflow.errors.len(), 1);
    assert_eq!(workflow.errors[0].step_index, 0);
    assert!(!workflow.artifacts.contains_key("brief"));
    assert!(workflow.artifacts.contains_key("arch"));
    assert!(workflow
        .messages
        .iter()
        .any(|m| m.content.contains("apologize")));
}

#[tokio::test]
async fn cancel_preserves_artifacts_and_blocks_resume() {
    let harness = harness(ScriptedProvider::slow(Duration::from_millis(50)));

    let receipt = harness
        .manager
        .start(StartConfig::sequence(
            "long-run",
            TenantId::new(),
            vec![
                Step::new("pm", "draft").creates("a1"),
                Step::new("pm", "expand").creates("a2"),
                Step::new("pm", "finish").creates("a3"),
            ],
        ))
        .await
        .unwrap();
    let id = receipt.workflow_id;

    // Cancel while the second step's provider call is in flight.
    wait_for_artifact(&harness.manager, id, "a1").await;
    harness.manager.cancel(id).await.unwrap();

    let workflow = wait_for_status(&harness.manager, id, WorkflowStatus::Cancelled).await;
    assert!(workflow.artifacts.contains_key("a1"));
    assert!(!workflow.artifacts.contains_key("a3"));

    // Give any in-flight call time to finish; its result must be discarded.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let workflow = harness.manager.get_state(id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Cancelled);

    let result = harness.manager.resume(id).await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn template_sections_become_steps_with_section_scoped_elicitation() {
    let harness = harness(ScriptedProvider::new(vec![
        Ok(Completion::new("goal section", "test-model")),
        Ok(Completion::new("requirement section", "test-model")),
    ]));

    let receipt = harness
        .manager
        .start(StartConfig::from_template(
            "prd-run",
            TenantId::new(),
            "prd",
        ))
        .await
        .unwrap();
    let id = receipt.workflow_id;

    // The first section elicits its own two prompts only.
    wait_for_status(&harness.manager, id, WorkflowStatus::PausedForElicitation).await;
    let paused_events = harness.notifier.events_matching("workflow.paused");
    assert_eq!(paused_events.len(), 1);
    let questions = paused_events[0].payload["questions"].as_array().unwrap().len();
    assert_eq!(questions, 2);

    let result = harness
        .manager
        .submit_elicitation_answers(
            id,
            0,
            HashMap::from([
                (0, "Manual reporting is slow".to_string()),
                (1, "The analytics team".to_string()),
            ]),
        )
        .await
        .unwrap();
    assert!(matches!(result, AgentResult::Document { .. }));

    // The remaining section needs no input and completes the workflow.
    let workflow = wait_for_status(&harness.manager, id, WorkflowStatus::Completed).await;
    assert_eq!(workflow.artifacts.len(), 2);
    assert!(workflow.artifacts.contains_key("goals"));
    assert!(workflow.artifacts.contains_key("requirements"));
    assert_eq!(workflow.current_step, 2);
}

#[tokio::test]
async fn recover_restores_stale_running_workflow_from_checkpoint() {
    let notifier = Arc::new(InMemoryNotifier::new());
    let store = Arc::new(InMemoryWorkflowStore::new());
    let registry = EngineRegistry::builder()
        .agent_loader(Arc::new(loader()))
        .llm_provider(ScriptedProvider::new(vec![]))
        .notification_port(Arc::clone(&notifier) as Arc<dyn NotificationPort>)
        .workflow_store(Arc::clone(&store) as Arc<dyn WorkflowStore>)
        .engine_config(maestro_core::config::EngineConfig {
            stale_running_secs: 0,
            ..Default::default()
        })
        .build()
        .unwrap();
    let manager = WorkflowLifecycleManager::new(registry);

    // A workflow stuck in RUNNING, checkpointed before the bad state.
    let mut workflow = Workflow::new(
        TenantId::new(),
        "stuck",
        vec![Step::new("pm", "draft").creates("brief")],
        HashMap::new(),
        true,
    );
    workflow.transition_to(WorkflowStatus::Running).unwrap();
    manager
        .registry()
        .checkpoints()
        .append(Checkpoint::new("init", &workflow))
        .await
        .unwrap();

    workflow.advance(); // index moved past an artifact that never appeared
    store.save(&workflow).await.unwrap();

    let restored = manager.recover(workflow.id).await.unwrap();
    assert_eq!(restored.current_step, 0);
    assert_eq!(restored.status, WorkflowStatus::Running);
}

#[tokio::test]
async fn recover_refuses_fresh_running_workflow() {
    // Default staleness threshold (15 minutes) makes a fresh workflow
    // ineligible for recovery.
    let harness = harness(ScriptedProvider::new(vec![]));

    let mut workflow = Workflow::new(
        TenantId::new(),
        "fresh",
        vec![Step::new("pm", "draft").creates("brief")],
        HashMap::new(),
        true,
    );
    workflow.transition_to(WorkflowStatus::Running).unwrap();
    harness.store.save(&workflow).await.unwrap();

    let result = harness.manager.recover(workflow.id).await;
    assert!(matches!(result, Err(EngineError::Recovery(_))));
}

#[tokio::test]
async fn completed_workflow_appears_in_history() {
    let harness = harness(ScriptedProvider::new(vec![Ok(Completion::new(
        "the brief",
        "test-model",
    ))]));

    let receipt = harness
        .manager
        .start(StartConfig::sequence(
            "short",
            TenantId::new(),
            vec![Step::new("pm", "draft").creates("brief")],
        ))
        .await
        .unwrap();

    wait_for_status(&harness.manager, receipt.workflow_id, WorkflowStatus::Completed).await;

    let history = harness.manager.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, receipt.workflow_id);
}
