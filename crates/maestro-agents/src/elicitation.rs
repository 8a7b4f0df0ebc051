//! Elicitation: extracting questions from definitions and tracking answers.
//!
//! Question extraction is a best-effort natural-language heuristic, not a
//! guarantee of semantic completeness. `is_satisfied` is advisory; the
//! engine keeps a human override path (submitting answers directly) rather
//! than trying to perfect the heuristic.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use maestro_core::WorkflowId;

use crate::template::ResolvedDefinition;

/// Pluggable question-extraction strategy.
///
/// The default implementation is regex-based; a structured-elicitation
/// format can replace it without touching the engine's state machine.
pub trait QuestionExtractor: Send + Sync {
    /// Extract candidate questions from free-form definition text, ordered
    /// as encountered.
    fn extract(&self, text: &str) -> Vec<String>;
}

lazy_static! {
    /// Explicit markers: "Question: ..." / "Ask: ..."
    static ref MARKER_RE: Regex =
        Regex::new(r"(?im)^\s*(?:question|ask)\s*[:\-]\s*(.+?)\s*$").unwrap();
    /// Bulleted or numbered lines ending in a question mark
    static ref BULLET_QUESTION_RE: Regex =
        Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s*(.+\?)\s*$").unwrap();
    /// Plain lines ending in a question mark
    static ref PLAIN_QUESTION_RE: Regex = Regex::new(r"(?m)^\s*([A-Z][^?\n]*\?)\s*$").unwrap();
    /// Imperative leads, used only when no question-shaped line was found
    static ref IMPERATIVE_RE: Regex = Regex::new(
        r"(?im)^\s*(?:[-*•]\s*)?((?:describe|list|provide|specify|identify|explain|define|outline)\b[^\n]+?)\s*$"
    )
    .unwrap();
}

/// Regex-based question extraction over definition text.
#[derive(Debug, Clone, Default)]
pub struct PatternQuestionExtractor;

impl PatternQuestionExtractor {
    pub fn new() -> Self {
        Self
    }

    fn push_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, candidate: &str) {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return;
        }
        let key = trimmed.to_lowercase();
        if seen.insert(key) {
            out.push(trimmed.to_string());
        }
    }
}

impl QuestionExtractor for PatternQuestionExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut questions = Vec::new();
        let mut seen = HashSet::new();

        // First matching rule wins per line, preserving document order.
        for line in text.lines() {
            if let Some(caps) = MARKER_RE.captures(line) {
                Self::push_unique(&mut questions, &mut seen, &caps[1]);
            } else if let Some(caps) = BULLET_QUESTION_RE.captures(line) {
                Self::push_unique(&mut questions, &mut seen, &caps[1]);
            } else if let Some(caps) = PLAIN_QUESTION_RE.captures(line) {
                Self::push_unique(&mut questions, &mut seen, &caps[1]);
            }
        }

        // Imperative statements only as a fallback, so that a definition
        // mixing real questions with instructions does not balloon.
        if questions.is_empty() {
            for line in text.lines() {
                if let Some(caps) = IMPERATIVE_RE.captures(line) {
                    Self::push_unique(&mut questions, &mut seen, &caps[1]);
                }
            }
        }

        questions
    }
}

/// One elicitation question and its recorded answer, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationQuestion {
    pub prompt: String,
    pub answer: Option<String>,
}

impl ElicitationQuestion {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            answer: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.answer
            .as_ref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Step-scoped elicitation state.
///
/// Created when a step enters elicitation, discarded when the step
/// completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationSession {
    pub workflow_id: WorkflowId,
    pub step_index: usize,
    /// Name of the definition the questions came from
    pub definition: String,
    pub questions: Vec<ElicitationQuestion>,
    pub created_at: DateTime<Utc>,
}

impl ElicitationSession {
    pub fn new(
        workflow_id: WorkflowId,
        step_index: usize,
        definition: impl Into<String>,
        prompts: Vec<String>,
    ) -> Self {
        Self {
            workflow_id,
            step_index,
            definition: definition.into(),
            questions: prompts.into_iter().map(ElicitationQuestion::new).collect(),
            created_at: Utc::now(),
        }
    }

    /// Record an answer by question index. Out-of-range indices are ignored.
    pub fn record_answer(&mut self, index: usize, answer: impl Into<String>) {
        if let Some(question) = self.questions.get_mut(index) {
            question.answer = Some(answer.into());
        }
    }

    /// Prompts that still lack a non-empty answer, in order.
    pub fn outstanding(&self) -> Vec<String> {
        self.questions
            .iter()
            .filter(|q| !q.is_answered())
            .map(|q| q.prompt.clone())
            .collect()
    }

    /// True once every question has a recorded, non-empty answer.
    pub fn is_satisfied(&self) -> bool {
        self.questions.iter().all(|q| q.is_answered())
    }

    /// Answered (prompt, answer) pairs for prompt building.
    pub fn answers(&self) -> Vec<(String, String)> {
        self.questions
            .iter()
            .filter_map(|q| q.answer.as_ref().map(|a| (q.prompt.clone(), a.clone())))
            .collect()
    }
}

/// Extracts questions from resolved definitions and opens sessions.
pub struct ElicitationManager {
    extractor: Arc<dyn QuestionExtractor>,
    /// Cap on questions per step, to avoid overwhelming the user
    max_questions: usize,
}

impl ElicitationManager {
    pub fn new(max_questions: usize) -> Self {
        Self {
            extractor: Arc::new(PatternQuestionExtractor::new()),
            max_questions,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn QuestionExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Ordered questions a definition wants answered before generation.
    ///
    /// Template sections marked `elicit` contribute their explicit prompts
    /// first; sections without prompts fall back to extraction from their
    /// instruction text. Tasks contribute extraction over their full text
    /// when they declare elicitation.
    pub fn questions_for(&self, definition: &ResolvedDefinition) -> Vec<String> {
        let mut questions = Vec::new();
        let mut seen = HashSet::new();

        match definition {
            ResolvedDefinition::Template(template) => {
                for section in template.elicited_sections() {
                    if section.prompts.is_empty() {
                        for q in self.extractor.extract(&section.instruction) {
                            push_capped(&mut questions, &mut seen, q, self.max_questions);
                        }
                    } else {
                        for q in &section.prompts {
                            push_capped(&mut questions, &mut seen, q.clone(), self.max_questions);
                        }
                    }
                }
            }
            ResolvedDefinition::Task(task) => {
                if task.elicit {
                    for q in self.extractor.extract(&task.elicitation_text()) {
                        push_capped(&mut questions, &mut seen, q, self.max_questions);
                    }
                }
            }
        }

        debug!(
            definition = %definition.name(),
            count = questions.len(),
            "Extracted elicitation questions"
        );
        questions
    }

    /// Open a session for a step, or `None` when the definition needs no
    /// human input.
    pub fn open_session(
        &self,
        workflow_id: WorkflowId,
        step_index: usize,
        definition: &ResolvedDefinition,
    ) -> Option<ElicitationSession> {
        let questions = self.questions_for(definition);
        if questions.is_empty() {
            return None;
        }
        Some(ElicitationSession::new(
            workflow_id,
            step_index,
            definition.name(),
            questions,
        ))
    }

    /// Advisory completeness check; the human override path always wins.
    pub fn is_satisfied(&self, session: &ElicitationSession) -> bool {
        session.is_satisfied()
    }
}

fn push_capped(out: &mut Vec<String>, seen: &mut HashSet<String>, candidate: String, cap: usize) {
    if out.len() >= cap {
        return;
    }
    let key = candidate.trim().to_lowercase();
    if !key.is_empty() && seen.insert(key) {
        out.push(candidate.trim().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{DocumentTemplate, TaskDefinition, TemplateSection};

    #[test]
    fn test_extract_explicit_markers() {
        let extractor = PatternQuestionExtractor::new();
        let text = "Question: What is the target launch date?\nAsk: Who signs off on scope?";

        let questions = extractor.extract(text);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0], "What is the target launch date?");
    }

    #[test]
    fn test_extract_bulleted_questions() {
        let extractor = PatternQuestionExtractor::new();
        let text = "- What problem does this solve?\n2) Which users are affected?\n- Not a question";

        let questions = extractor.extract(text);
        assert_eq!(questions.len(), 2);
        assert!(questions[1].contains("users"));
    }

    #[test]
    fn test_imperative_fallback_only_when_no_questions() {
        let extractor = PatternQuestionExtractor::new();

        let with_question = "What is the scope?\nDescribe the main users.";
        assert_eq!(extractor.extract(with_question).len(), 1);

        let imperative_only = "Describe the main users.\nList the key constraints.";
        let questions = extractor.extract(imperative_only);
        assert_eq!(questions.len(), 2);
        assert!(questions[0].starts_with("Describe"));
    }

    #[test]
    fn test_extract_dedup() {
        let extractor = PatternQuestionExtractor::new();
        let text = "What is the scope?\nWhat is the scope?";
        assert_eq!(extractor.extract(text).len(), 1);
    }

    fn elicited_template() -> ResolvedDefinition {
        ResolvedDefinition::Template(DocumentTemplate {
            name: "prd".to_string(),
            title: "PRD".to_string(),
            output_artifact: Some("prd".to_string()),
            sections: vec![
                TemplateSection {
                    id: "goals".to_string(),
                    title: "Goals".to_string(),
                    instruction: "Summarize goals.".to_string(),
                    elicit: true,
                    owner: None,
                    prompts: vec![
                        "What problem does this solve?".to_string(),
                        "Who is the primary user?".to_string(),
                        "What does success look like?".to_string(),
                    ],
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
        })
    }

    #[test]
    fn test_questions_for_template_uses_prompts() {
        let manager = ElicitationManager::new(5);
        let questions = manager.questions_for(&elicited_template());

        assert_eq!(questions.len(), 3);
        assert_eq!(questions[0], "What problem does this solve?");
    }

    #[test]
    fn test_questions_capped() {
        let manager = ElicitationManager::new(2);
        let questions = manager.questions_for(&elicited_template());
        assert_eq!(questions.len(), 2);
    }

    #[test]
    fn test_non_elicit_task_yields_no_questions() {
        let manager = ElicitationManager::new(5);
        let task = ResolvedDefinition::Task(TaskDefinition {
            name: "summarize".to_string(),
            title: "Summarize".to_string(),
            purpose: "What should we do?".to_string(),
            steps: vec![],
            elicit: false,
        });

        assert!(manager.questions_for(&task).is_empty());
        assert!(manager
            .open_session(WorkflowId::new(), 0, &task)
            .is_none());
    }

    #[test]
    fn test_session_satisfaction() {
        let manager = ElicitationManager::new(5);
        let mut session = manager
            .open_session(WorkflowId::new(), 1, &elicited_template())
            .unwrap();

        assert!(!session.is_satisfied());
        assert_eq!(session.outstanding().len(), 3);

        session.record_answer(0, "Slow reporting pipeline");
        session.record_answer(1, "Data analysts");
        assert!(!session.is_satisfied());

        // Whitespace-only answers do not count.
        session.record_answer(2, "   ");
        assert!(!session.is_satisfied());

        session.record_answer(2, "Reports in under a minute");
        assert!(session.is_satisfied());
        assert!(manager.is_satisfied(&session));
        assert_eq!(session.answers().len(), 3);
    }
}
