//! Document template and task definitions.
//!
//! Templates describe the structure of a document an agent produces section
//! by section; tasks describe a discrete procedure an agent follows. Both
//! may carry elicitation prompts that pause a step for human input.

use serde::{Deserialize, Serialize};

use crate::Result;

/// One named section of a document template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSection {
    /// Stable section id; doubles as the artifact id when sections map to steps
    pub id: String,
    /// Section heading
    pub title: String,
    /// Instruction for the producing agent
    pub instruction: String,
    /// Whether this section requires human elicitation before generation
    #[serde(default)]
    pub elicit: bool,
    /// Agent that owns this section
    #[serde(default)]
    pub owner: Option<String>,
    /// Elicitation prompts shown to the user
    #[serde(default)]
    pub prompts: Vec<String>,
}

/// A document skeleton with named sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTemplate {
    pub name: String,
    pub title: String,
    /// Artifact id the finished document is stored under
    #[serde(default)]
    pub output_artifact: Option<String>,
    pub sections: Vec<TemplateSection>,
}

impl DocumentTemplate {
    /// Parse a template definition from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Sections that require elicitation, in document order.
    pub fn elicited_sections(&self) -> Vec<&TemplateSection> {
        self.sections.iter().filter(|s| s.elicit).collect()
    }

    /// Render the skeleton as prompt scaffolding for the provider.
    pub fn outline(&self) -> String {
        let mut outline = format!("# {}\n", self.title);
        for section in &self.sections {
            outline.push_str(&format!("## {}\n{}\n", section.title, section.instruction));
        }
        outline
    }
}

/// A discrete procedure an agent follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub title: String,
    /// What the task accomplishes
    pub purpose: String,
    /// Ordered instructions
    #[serde(default)]
    pub steps: Vec<String>,
    /// Whether the task expects human input before executing
    #[serde(default)]
    pub elicit: bool,
}

impl TaskDefinition {
    /// Parse a task definition from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Concatenated text the question extractor scans.
    pub fn elicitation_text(&self) -> String {
        let mut text = self.purpose.clone();
        for step in &self.steps {
            text.push('\n');
            text.push_str(step);
        }
        text
    }
}

/// What the resolver hands the agent executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedDefinition {
    Template(DocumentTemplate),
    Task(TaskDefinition),
}

impl ResolvedDefinition {
    pub fn name(&self) -> &str {
        match self {
            ResolvedDefinition::Template(t) => &t.name,
            ResolvedDefinition::Task(t) => &t.name,
        }
    }
}
