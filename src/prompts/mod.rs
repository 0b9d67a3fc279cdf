//! Prompt template engine.
//!
//! Rendering is a pure function from a named template and a variable map to
//! prompt text. Unresolved `{{placeholder}}` markers are left verbatim so
//! callers can detect incomplete context instead of crashing. A length
//! optimization pass strips filler phrases and, when a prompt still exceeds
//! the model budget, keeps only the sections tagged as essential.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-zA-Z_][a-zA-Z0-9_]*)\}\}").expect("placeholder regex"));

/// Filler phrases removed by the length optimization pass.
static FILLER_PHRASES: &[&str] = &[
    "Please note that ",
    "It is important to note that ",
    "As previously mentioned, ",
    "In order to ",
    "Keep in mind that ",
];

/// Section headings kept when a prompt must be cut down to budget.
static ESSENTIAL_HEADINGS: &[&str] = &["TASK:", "REQUIREMENTS:", "CONTEXT:"];

/// The named templates the engine ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    /// First turn of a specialist conversation.
    ConversationOpening,
    /// Subsequent turns, with condensed history and missing elements.
    ConversationContinuation,
    /// Focused prompt for one sub-task.
    SubTask,
    /// Decompose a composite request into sub-tasks.
    Decomposition,
    /// Backend-assisted agent selection.
    AgentSelection,
    /// Friendly reply for casual conversation.
    CasualReply,
}

impl Template {
    fn text(&self) -> &'static str {
        match self {
            Self::ConversationOpening => {
                "You are a {{specialization}} working on a software design task.\n\
                 \n\
                 TASK: {{task}}\n\
                 \n\
                 CONTEXT: {{context}}\n\
                 \n\
                 Provide a thorough, structured answer covering your specialty. Use headings, \
                 lists, and code blocks where they help. When a change to the design canvas is \
                 warranted, emit it inline as \
                 ACTION: {\"type\": \"<directive>\", \"data\": {...}}."
            }
            Self::ConversationContinuation => {
                "You are a {{specialization}} continuing a design conversation.\n\
                 \n\
                 TASK: {{task}}\n\
                 \n\
                 CONVERSATION SO FAR:\n{{history}}\n\
                 \n\
                 REQUIREMENTS: Address the missing elements: {{missing}}. Deepen the answer \
                 rather than repeating previous turns."
            }
            Self::SubTask => {
                "You are a {{specialization}}.\n\
                 \n\
                 TASK: {{subtask_title}} — {{subtask_description}}\n\
                 \n\
                 CONTEXT: This is part of the larger request: {{task}}\n\
                 \n\
                 Produce a complete, actionable answer for this sub-task only."
            }
            Self::Decomposition => {
                "Break this technical request into at most {{max_subtasks}} ordered sub-tasks.\n\
                 \n\
                 TASK: {{task}}\n\
                 \n\
                 CONTEXT: intent={{intent}}, domains={{domains}}\n\
                 \n\
                 Reply with only a JSON object of the form:\n\
                 {\"subTasks\": [{\"id\": \"task_1\", \"title\": \"...\", \
                 \"description\": \"...\", \"agent\": \"...\", \"priority\": 1, \
                 \"dependencies\": []}]}\n\
                 Agent must be one of: {{agents}}."
            }
            Self::AgentSelection => {
                "Choose the specialists needed for this task.\n\
                 \n\
                 TASK: {{task}}\n\
                 \n\
                 Available agents:\n{{agent_list}}\n\
                 \n\
                 Reply with only a JSON array of agent names ordered by priority, \
                 e.g. [\"projectManager\", \"architectureDesigner\"]."
            }
            Self::CasualReply => {
                "You are a friendly assistant for a software design studio. The user said:\n\
                 \n\
                 TASK: {{task}}\n\
                 \n\
                 Reply conversationally and briefly. If they hint at technical work, offer to \
                 help with design or architecture."
            }
        }
    }
}

/// Renders templates and enforces the prompt length budget.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    max_prompt_chars: usize,
}

impl TemplateEngine {
    pub fn new(max_prompt_chars: usize) -> Self {
        Self { max_prompt_chars }
    }

    /// Render `template` with `variables`, then apply the length pass.
    ///
    /// Placeholders without a matching variable stay verbatim in the output.
    pub fn render(&self, template: Template, variables: &HashMap<&str, String>) -> String {
        let rendered = substitute(template.text(), variables);
        self.optimize_length(&rendered)
    }

    /// Strip filler; if the text still exceeds the budget, keep essential
    /// sections only, then hard-truncate at a character boundary.
    pub fn optimize_length(&self, text: &str) -> String {
        let mut out = text.to_string();
        for filler in FILLER_PHRASES {
            out = out.replace(filler, "");
        }

        if out.chars().count() <= self.max_prompt_chars {
            return out;
        }

        let essential = keep_essential_sections(&out);
        let out = if essential.is_empty() { out } else { essential };

        if out.chars().count() <= self.max_prompt_chars {
            return out;
        }
        out.chars().take(self.max_prompt_chars).collect()
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(8000)
    }
}

/// Replace every `{{name}}` that has a value; leave the rest untouched.
fn substitute(text: &str, variables: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Keep only paragraphs that start with an essential heading.
fn keep_essential_sections(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut keeping = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        let is_heading = trimmed.contains(':')
            && trimmed
                .split(':')
                .next()
                .map(|head| head.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_whitespace()))
                .unwrap_or(false)
            && !trimmed.is_empty();
        if is_heading {
            keeping = ESSENTIAL_HEADINGS
                .iter()
                .any(|h| trimmed.to_ascii_uppercase().starts_with(h));
        }
        if keeping {
            kept.push(line);
        }
    }
    kept.join("\n")
}

/// Build a variable map from (name, value) pairs.
pub fn vars<const N: usize>(pairs: [(&'static str, String); N]) -> HashMap<&'static str, String> {
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_fills_known_placeholders() {
        let engine = TemplateEngine::default();
        let rendered = engine.render(
            Template::CasualReply,
            &vars([("task", "hello there".to_string())]),
        );
        assert!(rendered.contains("hello there"));
        assert!(!rendered.contains("{{task}}"));
    }

    #[test]
    fn test_unresolved_placeholders_stay_verbatim() {
        let engine = TemplateEngine::default();
        let rendered = engine.render(Template::ConversationOpening, &HashMap::new());
        assert!(rendered.contains("{{specialization}}"));
        assert!(rendered.contains("{{task}}"));
    }

    #[test]
    fn test_filler_phrases_are_stripped() {
        let engine = TemplateEngine::new(1000);
        let out = engine.optimize_length("Please note that the cache is shared.");
        assert_eq!(out, "the cache is shared.");
    }

    #[test]
    fn test_over_budget_keeps_essential_sections() {
        let engine = TemplateEngine::new(60);
        let text = "PREAMBLE: chatter that can go\n\
                    TASK: build the thing\n\
                    TRIVIA: more chatter\n\
                    REQUIREMENTS: fast and small";
        let out = engine.optimize_length(text);
        assert!(out.contains("TASK: build the thing"));
        assert!(out.contains("REQUIREMENTS"));
        assert!(!out.contains("TRIVIA"));
    }

    #[test]
    fn test_hard_truncation_respects_char_boundary() {
        let engine = TemplateEngine::new(5);
        let out = engine.optimize_length("héllo wörld");
        assert_eq!(out.chars().count(), 5);
    }

    #[test]
    fn test_rendering_is_pure() {
        let engine = TemplateEngine::default();
        let variables = vars([("task", "x".to_string())]);
        let a = engine.render(Template::CasualReply, &variables);
        let b = engine.render(Template::CasualReply, &variables);
        assert_eq!(a, b);
    }
}
