//! Template resolution: deciding what definition governs a step.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::definition::{AgentDefinition, AgentLoader};
use crate::template::ResolvedDefinition;
use crate::{AgentError, Result};

lazy_static! {
    /// Embedded references in step notes, e.g. "template: prd" or "task: correct-course".
    static ref NOTE_TEMPLATE_RE: Regex =
        Regex::new(r"(?i)\btemplate\s*:\s*([A-Za-z0-9_-]+)").unwrap();
    static ref NOTE_TASK_RE: Regex = Regex::new(r"(?i)\btask\s*:\s*([A-Za-z0-9_-]+)").unwrap();
}

/// Step-scoped hints the resolver consults, distilled from the workflow
/// context by the engine.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Explicit template name supplied at start or by a prior elicitation turn
    pub template: Option<String>,
    /// Explicit task name
    pub task: Option<String>,
    /// Whether the step is a conversational interaction
    pub conversational: bool,
}

impl ResolutionContext {
    pub fn with_template(mut self, name: impl Into<String>) -> Self {
        self.template = Some(name.into());
        self
    }

    pub fn with_task(mut self, name: impl Into<String>) -> Self {
        self.task = Some(name.into());
        self
    }

    pub fn conversational(mut self) -> Self {
        self.conversational = true;
        self
    }
}

/// Locates and loads the template or task definition for a step.
///
/// Resolution order: explicit name in the context, a command-derived mapping,
/// an embedded reference in step notes, then heuristic inference from the
/// step action against the agent's declared dependencies. `None` means the
/// caller falls back to conversational or generic mode.
///
/// Loaded definitions are cached by name; definitions rarely change at
/// runtime, so entries have no automatic expiry and are invalidated only by
/// an explicit reload.
pub struct TemplateResolver {
    loader: Arc<dyn AgentLoader>,
    cache: RwLock<HashMap<String, ResolvedDefinition>>,
}

impl TemplateResolver {
    pub fn new(loader: Arc<dyn AgentLoader>) -> Self {
        Self {
            loader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the definition governing a step, or `None` if nothing applies.
    pub async fn resolve(
        &self,
        action: &str,
        notes: Option<&str>,
        context: &ResolutionContext,
        agent: &AgentDefinition,
    ) -> Result<Option<ResolvedDefinition>> {
        // 1. Explicit name in the context. A name that fails to load is an
        //    error, not a fallthrough: the caller asked for it by name.
        if let Some(name) = &context.template {
            return self.load_template(name).await.map(Some);
        }
        if let Some(name) = &context.task {
            return self.load_task(name).await.map(Some);
        }

        let action_lower = action.to_lowercase();

        // 2. Command-derived mapping: an agent command referenced by the
        //    action carries a template or task.
        for command in &agent.commands {
            if !action_lower.contains(&command.name.to_lowercase()) {
                continue;
            }
            if let Some(template) = &command.template {
                debug!(command = %command.name, template = %template, "Resolved via agent command");
                return self.load_template(template).await.map(Some);
            }
            if let Some(task) = &command.task {
                debug!(command = %command.name, task = %task, "Resolved via agent command");
                return self.load_task(task).await.map(Some);
            }
        }

        // 3. Embedded reference in step notes.
        if let Some(notes) = notes {
            if let Some(caps) = NOTE_TEMPLATE_RE.captures(notes) {
                return self.load_template(&caps[1]).await.map(Some);
            }
            if let Some(caps) = NOTE_TASK_RE.captures(notes) {
                return self.load_task(&caps[1]).await.map(Some);
            }
        }

        // 4. Heuristic inference from the action text against declared
        //    dependencies.
        for name in &agent.dependencies.templates {
            if action_lower.contains(&name.to_lowercase()) {
                debug!(template = %name, "Resolved via action-text heuristic");
                return self.load_template(name).await.map(Some);
            }
        }
        for name in &agent.dependencies.tasks {
            if action_lower.contains(&name.to_lowercase()) {
                debug!(task = %name, "Resolved via action-text heuristic");
                return self.load_task(name).await.map(Some);
            }
        }

        debug!(action = %action, agent = %agent.id, "No definition resolved for step");
        Ok(None)
    }

    /// Drop a cached definition so the next resolve reloads it.
    pub fn reload(&self, name: &str) {
        let mut cache = self.cache.write();
        cache.remove(&template_key(name));
        cache.remove(&task_key(name));
    }

    /// Drop all cached definitions.
    pub fn reload_all(&self) {
        self.cache.write().clear();
    }

    async fn load_template(&self, name: &str) -> Result<ResolvedDefinition> {
        let key = template_key(name);
        if let Some(cached) = self.cache.read().get(&key) {
            debug!(template = %name, "Definition cache hit");
            return Ok(cached.clone());
        }

        let template = self
            .loader
            .load_template(name)
            .await?
            .ok_or_else(|| AgentError::TemplateNotFound(name.to_string()))?;
        let resolved = ResolvedDefinition::Template(template);
        self.cache.write().insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn load_task(&self, name: &str) -> Result<ResolvedDefinition> {
        let key = task_key(name);
        if let Some(cached) = self.cache.read().get(&key) {
            debug!(task = %name, "Definition cache hit");
            return Ok(cached.clone());
        }

        let task = self
            .loader
            .load_task(name)
            .await?
            .ok_or_else(|| AgentError::TemplateNotFound(name.to_string()))?;
        let resolved = ResolvedDefinition::Task(task);
        self.cache.write().insert(key, resolved.clone());
        Ok(resolved)
    }
}

fn template_key(name: &str) -> String {
    format!("template:{}", name)
}

fn task_key(name: &str) -> String {
    format!("task:{}", name)
}
