//! The converse-until-complete execution loop.
//!
//! An agent invocation is a bounded conversation with the generative
//! backend: each turn renders a prompt (the opening, then continuations
//! carrying condensed history and the elements still missing), scans the
//! response for directives, executes them, and scores completeness. The
//! loop stops at the completion threshold or the turn cap, whichever comes
//! first. A backend failure after at least one good turn degrades to the
//! best partial answer instead of failing the invocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{progress, AgentRole};
use crate::backend::BackendClient;
use crate::config::OrchestratorConfig;
use crate::directives::{DirectiveExecutor, DirectiveOutcome, DirectiveScanner};
use crate::error::OrchestratorError;
use crate::events::{EventSink, TaskEvent};
use crate::prompts::{vars, Template, TemplateEngine};

/// One completed conversation turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    /// 1-based turn number.
    pub turn: usize,
    /// The prompt sent this turn.
    pub prompt: String,
    /// The response with directives removed.
    pub response: String,
    pub completion_score: f64,
    pub missing_elements: Vec<String>,
    /// Directives extracted from this turn's response.
    pub extracted_actions: usize,
    pub timestamp: DateTime<Utc>,
}

/// The result of one agent invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationOutcome {
    pub agent: AgentRole,
    /// The best response seen across all turns.
    pub response: String,
    /// Turns actually taken.
    pub turns: usize,
    /// Score of the best response.
    pub completion_score: f64,
    pub history: Vec<ConversationTurn>,
    /// True when the backend failed mid-conversation and the best partial
    /// answer was returned instead.
    pub fallback: bool,
    pub directive_outcomes: Vec<DirectiveOutcome>,
}

/// Runs the turn loop for one agent role.
pub struct ConversationalAgent {
    client: Arc<BackendClient>,
    engine: TemplateEngine,
    completion_threshold: f64,
    max_turns: u32,
    history_turns: usize,
    history_char_cap: usize,
}

impl ConversationalAgent {
    pub fn new(client: Arc<BackendClient>, config: &OrchestratorConfig) -> Self {
        Self {
            client,
            engine: TemplateEngine::new(config.max_prompt_chars),
            completion_threshold: config.completion_threshold,
            max_turns: config.max_turns,
            history_turns: config.history_turns,
            history_char_cap: config.history_char_cap,
        }
    }

    /// Run a full conversation for `task`.
    pub async fn converse(
        &self,
        role: AgentRole,
        task: &str,
        context: &str,
        executor: Option<&DirectiveExecutor>,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<ConversationOutcome, OrchestratorError> {
        let opening = self.engine.render(
            Template::ConversationOpening,
            &vars([
                ("specialization", role.specialization().to_string()),
                ("task", task.to_string()),
                ("context", context.to_string()),
            ]),
        );
        self.run(role, task, opening, self.max_turns, executor, sink, cancel)
            .await
    }

    /// Run a focused conversation for one sub-task. Sub-tasks get half the
    /// turn budget since they are narrower than a full task.
    pub async fn converse_subtask(
        &self,
        role: AgentRole,
        title: &str,
        description: &str,
        parent_task: &str,
        executor: Option<&DirectiveExecutor>,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<ConversationOutcome, OrchestratorError> {
        let opening = self.engine.render(
            Template::SubTask,
            &vars([
                ("specialization", role.specialization().to_string()),
                ("subtask_title", title.to_string()),
                ("subtask_description", description.to_string()),
                ("task", parent_task.to_string()),
            ]),
        );
        let budget = (self.max_turns / 2).max(1);
        self.run(role, title, opening, budget, executor, sink, cancel)
            .await
    }

    async fn run(
        &self,
        role: AgentRole,
        task: &str,
        opening: String,
        max_turns: u32,
        executor: Option<&DirectiveExecutor>,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<ConversationOutcome, OrchestratorError> {
        let mut history: Vec<ConversationTurn> = Vec::new();
        let mut directive_outcomes: Vec<DirectiveOutcome> = Vec::new();
        let mut best: Option<(String, f64)> = None;
        let mut missing: Vec<String> = Vec::new();
        let mut fallback = false;

        for turn in 1..=max_turns as usize {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Canceled);
            }

            let prompt = if turn == 1 {
                opening.clone()
            } else {
                self.engine.render(
                    Template::ConversationContinuation,
                    &vars([
                        ("specialization", role.specialization().to_string()),
                        ("task", task.to_string()),
                        ("history", self.condensed_history(&history)),
                        ("missing", missing.join(", ")),
                    ]),
                )
            };

            // The client rotates credentials internally; one failed turn
            // here means both credentials are exhausted or the backend is
            // down, so we fall back rather than burning the remaining turns.
            let raw = match self.client.generate_text(&prompt).await {
                Ok(raw) => raw,
                Err(err) if !history.is_empty() => {
                    warn!(agent = role.name(), turn, %err, "backend failed, keeping best partial");
                    fallback = true;
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            let mut scanner = DirectiveScanner::new();
            let output = scanner.scan_all(&raw);
            let clean = output.text.trim().to_string();

            if let Some(executor) = executor {
                let outcomes = executor.execute_all(&output.directives).await;
                if let Some(sink) = sink {
                    for outcome in &outcomes {
                        sink.emit(TaskEvent::Action {
                            agent: role.name().to_string(),
                            outcome: outcome.clone(),
                        });
                    }
                }
                directive_outcomes.extend(outcomes);
            }

            let analysis = progress::analyze(&clean, role, turn);
            debug!(
                agent = role.name(),
                turn,
                score = analysis.completion_score,
                "turn finished"
            );

            if let Some(sink) = sink {
                sink.emit(TaskEvent::Message {
                    agent: role.name().to_string(),
                    turn,
                    content: clean.clone(),
                });
            }

            let improved = best
                .as_ref()
                .map(|(_, score)| analysis.completion_score > *score)
                .unwrap_or(true);
            if improved {
                best = Some((clean.clone(), analysis.completion_score));
            }
            missing = analysis.missing_elements.clone();

            history.push(ConversationTurn {
                turn,
                prompt,
                response: clean,
                completion_score: analysis.completion_score,
                missing_elements: analysis.missing_elements,
                extracted_actions: output.directives.len(),
                timestamp: Utc::now(),
            });

            if analysis.completion_score >= self.completion_threshold {
                break;
            }
        }

        let (response, completion_score) = best.unwrap_or_default();
        info!(
            agent = role.name(),
            turns = history.len(),
            completion_score,
            fallback,
            "conversation finished"
        );

        Ok(ConversationOutcome {
            agent: role,
            response,
            turns: history.len(),
            completion_score,
            history,
            fallback,
            directive_outcomes,
        })
    }

    /// Condense recent turns into a continuation-prompt block, keeping the
    /// most recent text when the character cap bites.
    fn condensed_history(&self, history: &[ConversationTurn]) -> String {
        let start = history.len().saturating_sub(self.history_turns);
        let joined = history[start..]
            .iter()
            .map(|t| format!("Turn {}: {}", t.turn, t.response))
            .collect::<Vec<_>>()
            .join("\n\n");

        let total = joined.chars().count();
        if total <= self.history_char_cap {
            joined
        } else {
            joined.chars().skip(total - self.history_char_cap).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{client_with, ScriptedBackend};
    use crate::canvas::{InMemoryCanvas, SharedCanvas};
    use crate::error::BackendError;

    fn agent(backend: ScriptedBackend) -> ConversationalAgent {
        ConversationalAgent::new(
            Arc::new(client_with(backend)),
            &OrchestratorConfig::default(),
        )
    }

    fn thorough_response() -> String {
        format!(
            "## Architecture\n\
             1. Components: gateway, auth, orders\n\
             - Data flow: through the gateway\n\
             - Technology stack: Rust and Postgres\n\
             - Scalability: horizontal scaling\n\
             ```\nsvc\n```\n{}",
            "More detail on every component and its failure modes. ".repeat(30)
        )
    }

    #[tokio::test]
    async fn test_conversation_stops_once_complete() {
        let agent = agent(ScriptedBackend::always(&thorough_response()));
        let outcome = agent
            .converse(
                AgentRole::ArchitectureDesigner,
                "Design the architecture",
                "",
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.turns, 1);
        assert!(outcome.completion_score >= 0.8);
        assert!(!outcome.fallback);
    }

    #[tokio::test]
    async fn test_turn_cap_bounds_the_loop() {
        let agent = agent(ScriptedBackend::always("ok"));
        let outcome = agent
            .converse(
                AgentRole::TechLead,
                "Review everything",
                "",
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.turns, 10);
        assert!(outcome.completion_score < 0.8);
        assert!(!outcome.fallback);
    }

    #[tokio::test]
    async fn test_subtasks_use_half_the_turn_budget() {
        let agent = agent(ScriptedBackend::always("ok"));
        let outcome = agent
            .converse_subtask(
                AgentRole::CodeGenerator,
                "Write the parser",
                "Parse the input format",
                "Build the pipeline",
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.turns, 5);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_best_partial() {
        let agent = agent(ScriptedBackend::new(vec![
            ScriptedBackend::ok("A decent partial answer about the review standards."),
            Err(BackendError::Unavailable("down".into())),
        ]));
        let outcome = agent
            .converse(
                AgentRole::TechLead,
                "Review the design",
                "",
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.fallback);
        assert_eq!(outcome.turns, 1);
        assert!(outcome.response.contains("decent partial answer"));
    }

    #[tokio::test]
    async fn test_rotation_does_not_duplicate_a_turn() {
        // The quota failure is absorbed inside the client by rotating to the
        // second credential; the conversation sees exactly one turn.
        let agent = agent(ScriptedBackend::new(vec![
            Err(BackendError::QuotaExceeded),
            ScriptedBackend::ok(&thorough_response()),
        ]));
        let outcome = agent
            .converse(
                AgentRole::ArchitectureDesigner,
                "Design the architecture",
                "",
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.turns, 1);
        assert!(!outcome.fallback);
    }

    #[tokio::test]
    async fn test_first_turn_failure_surfaces() {
        let agent = agent(ScriptedBackend::new(vec![Err(BackendError::Unavailable(
            "down".into(),
        ))]));
        let err = agent
            .converse(
                AgentRole::TechLead,
                "Review",
                "",
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Backend(_)));
    }

    #[tokio::test]
    async fn test_cancellation_is_checked_each_turn() {
        let agent = agent(ScriptedBackend::always("ok"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agent
            .converse(AgentRole::TechLead, "Review", "", None, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Canceled));
    }

    #[tokio::test]
    async fn test_directives_are_executed_and_stripped() {
        let response = format!(
            "{}\nACTION: {{\"type\":\"add_component\",\"data\":{{\"name\":\"Cache\"}}}}",
            thorough_response()
        );
        let agent = agent(ScriptedBackend::always(&response));
        let canvas: SharedCanvas = Arc::new(InMemoryCanvas::new());
        let executor = DirectiveExecutor::new(Arc::clone(&canvas), "c1");

        let outcome = agent
            .converse(
                AgentRole::ArchitectureDesigner,
                "Design it",
                "",
                Some(&executor),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.directive_outcomes.len(), 1);
        assert!(outcome.directive_outcomes[0].success);
        assert!(!outcome.response.contains("ACTION:"));
        let state = canvas.get_state("c1").await.unwrap().unwrap();
        assert_eq!(state.components.len(), 1);
    }

    #[tokio::test]
    async fn test_early_directive_survives_an_exhausted_loop() {
        // The first turn commits a canvas mutation; later turns never reach
        // the threshold, but the mutation stays committed.
        let agent = agent(ScriptedBackend::new(vec![ScriptedBackend::ok(
            "ACTION: {\"type\":\"add_component\",\"data\":{\"name\":\"Gateway\"}}",
        )]));
        let canvas: SharedCanvas = Arc::new(InMemoryCanvas::new());
        let executor = DirectiveExecutor::new(Arc::clone(&canvas), "c1");

        let outcome = agent
            .converse(
                AgentRole::ArchitectureDesigner,
                "Design it",
                "",
                Some(&executor),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.turns, 10);
        assert!(outcome.completion_score < 0.8);
        let state = canvas.get_state("c1").await.unwrap().unwrap();
        assert_eq!(state.components.len(), 1);
        assert_eq!(state.components[0].name, "Gateway");
    }

    #[tokio::test]
    async fn test_turn_events_are_emitted() {
        let agent = agent(ScriptedBackend::always(&thorough_response()));
        let (sink, mut stream) = crate::events::channel();

        agent
            .converse(
                AgentRole::ArchitectureDesigner,
                "Design it",
                "",
                None,
                Some(&sink),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = stream.drain_ready();
        assert!(events.iter().any(|e| e.event.name() == "message"));
    }
}
