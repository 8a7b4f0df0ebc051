//! Agent definitions and step-intent resolution for the Maestro engine.
//!
//! This crate provides:
//! - Agent personas and their declared capabilities
//! - Document template and task definitions (YAML-backed)
//! - Template resolution: mapping a workflow step to the definition that
//!   governs how it should execute
//! - Elicitation: extracting candidate questions from a definition and
//!   tracking which have been answered

pub mod definition;
pub mod elicitation;
pub mod resolver;
pub mod template;

pub use definition::{
    AgentCommand, AgentDefinition, AgentDependencies, AgentLoader, AgentRef, Persona,
    StaticAgentLoader,
};
pub use elicitation::{
    ElicitationManager, ElicitationQuestion, ElicitationSession, PatternQuestionExtractor,
    QuestionExtractor,
};
pub use resolver::{ResolutionContext, TemplateResolver};
pub use template::{DocumentTemplate, ResolvedDefinition, TaskDefinition, TemplateSection};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Definition parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Loader error: {0}")]
    Loader(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
