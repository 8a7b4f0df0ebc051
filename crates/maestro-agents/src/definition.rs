//! Agent definitions and the loader port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::template::{DocumentTemplate, TaskDefinition};
use crate::{AgentError, Result};

/// The persona an agent adopts when prompting the AI provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Professional role (e.g., "Product Manager")
    pub role: String,
    /// Communication style (e.g., "analytical, inquisitive")
    pub style: String,
    /// Self-description used in system prompts
    pub identity: String,
    /// What the agent concentrates on
    pub focus: String,
    /// Operating principles, in priority order
    #[serde(default)]
    pub principles: Vec<String>,
}

impl Persona {
    /// Render the persona as a system-prompt preamble.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}. Role: {}. Style: {}. Focus: {}.",
            self.identity, self.role, self.style, self.focus
        );
        if !self.principles.is_empty() {
            prompt.push_str("\nPrinciples:\n");
            for principle in &self.principles {
                prompt.push_str(&format!("- {}\n", principle));
            }
        }
        prompt
    }
}

/// A command an agent declares it can perform, optionally bound to a
/// template or task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommand {
    pub name: String,
    pub description: String,
    /// Template this command produces a document from
    #[serde(default)]
    pub template: Option<String>,
    /// Task this command follows
    #[serde(default)]
    pub task: Option<String>,
}

/// Definition references an agent may use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDependencies {
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// A named AI persona with declared capabilities.
///
/// Supplied by an external loader; the engine treats it as read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub title: String,
    pub persona: Persona,
    #[serde(default)]
    pub commands: Vec<AgentCommand>,
    #[serde(default)]
    pub dependencies: AgentDependencies,
}

impl AgentDefinition {
    /// Parse an agent definition from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Find a declared command whose template or task matches the name.
    pub fn command_for(&self, name: &str) -> Option<&AgentCommand> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// Reference to an agent, either fully loaded or a cached summary.
///
/// A `Summary` must be hydrated into `Full` before execution; there is no
/// ad hoc shape-checking anywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentRef {
    Full(AgentDefinition),
    Summary { id: String, name: String },
}

impl AgentRef {
    pub fn id(&self) -> &str {
        match self {
            AgentRef::Full(def) => &def.id,
            AgentRef::Summary { id, .. } => id,
        }
    }

    /// Upgrade a `Summary` to `Full` through the loader. A `Full` ref is
    /// returned unchanged without consulting the loader.
    pub async fn hydrate(self, loader: &dyn AgentLoader) -> Result<AgentDefinition> {
        match self {
            AgentRef::Full(def) => Ok(def),
            AgentRef::Summary { id, .. } => {
                debug!(agent_id = %id, "Hydrating agent summary");
                loader
                    .load_agent(&id)
                    .await?
                    .ok_or(AgentError::AgentNotFound(id))
            }
        }
    }
}

/// External loader for agent, template, and task definitions.
#[async_trait]
pub trait AgentLoader: Send + Sync {
    async fn load_agent(&self, id: &str) -> Result<Option<AgentDefinition>>;
    async fn load_template(&self, name: &str) -> Result<Option<DocumentTemplate>>;
    async fn load_task(&self, name: &str) -> Result<Option<TaskDefinition>>;
}

/// In-memory loader for tests and embedded deployments.
#[derive(Debug, Default)]
pub struct StaticAgentLoader {
    agents: HashMap<String, AgentDefinition>,
    templates: HashMap<String, DocumentTemplate>,
    tasks: HashMap<String, TaskDefinition>,
}

impl StaticAgentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.insert(agent.id.clone(), agent);
        self
    }

    pub fn with_template(mut self, template: DocumentTemplate) -> Self {
        self.templates.insert(template.name.clone(), template);
        self
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.insert(task.name.clone(), task);
        self
    }

    pub fn into_shared(self) -> Arc<dyn AgentLoader> {
        Arc::new(self)
    }
}

#[async_trait]
impl AgentLoader for StaticAgentLoader {
    async fn load_agent(&self, id: &str) -> Result<Option<AgentDefinition>> {
        Ok(self.agents.get(id).cloned())
    }

    async fn load_template(&self, name: &str) -> Result<Option<DocumentTemplate>> {
        Ok(self.templates.get(name).cloned())
    }

    async fn load_task(&self, name: &str) -> Result<Option<TaskDefinition>> {
        Ok(self.tasks.get(name).cloned())
    }
}
