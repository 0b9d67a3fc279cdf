//! Agent selection and routing strategy.
//!
//! Selection is similarity-first: every registered role is scored against
//! the classified domains and the task text, and the backend is consulted
//! only when the best local score is below the configured confidence
//! threshold. Escalation answers are validated name by name; a selection is
//! never empty and never contains a name outside the registry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::{registry, AgentRole};
use crate::backend::BackendClient;
use crate::classifier::Classification;
use crate::config::OrchestratorConfig;
use crate::heuristics;
use crate::prompts::{vars, Template, TemplateEngine};

/// How the chosen agents will be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// One agent answers directly.
    Simple,
    /// The task is decomposed and agents run in dependency order.
    Coordinated,
}

/// Which backend capability tier the task warrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTier {
    /// Low-complexity work goes to the fast tier.
    Fast,
    /// Complex work gets the full model.
    Full,
}

/// The result of one selection pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionOutcome {
    /// Chosen roles, best match first. Never empty.
    pub agents: Vec<AgentRole>,
    pub strategy: RoutingStrategy,
    pub tier: BackendTier,
    /// Similarity score of the best local match, `[0, 1]`.
    pub confidence: f64,
    /// Whether the backend was consulted.
    pub escalated: bool,
}

/// Scores roles locally and escalates to the backend when unsure.
pub struct AgentSelector {
    client: Arc<BackendClient>,
    engine: TemplateEngine,
    confidence_threshold: f64,
    routing_threshold: f64,
}

impl AgentSelector {
    pub fn new(client: Arc<BackendClient>, config: &OrchestratorConfig) -> Self {
        Self {
            client,
            engine: TemplateEngine::new(config.max_prompt_chars),
            confidence_threshold: config.selection_confidence_threshold,
            routing_threshold: config.routing_threshold,
        }
    }

    /// Choose the agents for `task` given its classification.
    pub async fn select(&self, task: &str, classification: &Classification) -> SelectionOutcome {
        let scored = score_roles(task, classification);
        let confidence = scored.first().map(|(_, s)| *s).unwrap_or(0.0);

        let (mut agents, escalated) = if confidence >= self.confidence_threshold {
            let picks: Vec<AgentRole> = scored
                .iter()
                .filter(|(_, score)| *score > 0.0)
                .map(|(role, _)| *role)
                .collect();
            (picks, false)
        } else {
            debug!(confidence, "local match weak, escalating selection");
            match self.escalate(task).await {
                Some(picks) => (picks, true),
                None => (heuristics::roles_from_classification(classification), true),
            }
        };

        if agents.is_empty() {
            agents = heuristics::roles_from_classification(classification);
        }

        let strategy = if classification.complexity >= self.routing_threshold {
            RoutingStrategy::Coordinated
        } else {
            RoutingStrategy::Simple
        };
        if strategy == RoutingStrategy::Simple {
            agents.truncate(1);
        }

        let tier = if classification.complexity >= self.routing_threshold {
            BackendTier::Full
        } else {
            BackendTier::Fast
        };

        SelectionOutcome {
            agents,
            strategy,
            tier,
            confidence,
            escalated,
        }
    }

    /// Ask the backend for a prioritized agent list. Invalid names are
    /// dropped; an unusable answer yields `None`.
    async fn escalate(&self, task: &str) -> Option<Vec<AgentRole>> {
        let agent_list = registry()
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = self.engine.render(
            Template::AgentSelection,
            &vars([("task", task.to_string()), ("agent_list", agent_list)]),
        );

        let text = match self.client.generate_text(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "selection escalation failed");
                return None;
            }
        };

        let names = extract_json_array(&text)?;
        let mut picks = Vec::new();
        for name in names {
            match name.parse::<AgentRole>() {
                Ok(role) if !picks.contains(&role) => picks.push(role),
                Ok(_) => {}
                Err(err) => warn!(%err, "dropping invalid agent from escalation answer"),
            }
        }
        if picks.is_empty() {
            None
        } else {
            Some(picks)
        }
    }
}

/// Score every role against the classified domains and the task text.
/// Returns (role, score) pairs sorted best first, ties in registry order.
fn score_roles(task: &str, classification: &Classification) -> Vec<(AgentRole, f64)> {
    let lower = task.to_lowercase();
    let mut scored: Vec<(AgentRole, f64)> = AgentRole::ALL
        .iter()
        .map(|role| {
            let skills = role.skills();
            let hits = skills
                .iter()
                .filter(|skill| {
                    lower.contains(*skill)
                        || classification
                            .domains
                            .iter()
                            .any(|d| d.contains(*skill) || skill.contains(d.as_str()))
                })
                .count();
            (*role, hits as f64 / skills.len() as f64)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Pull the first JSON string array out of possibly chatty model output.
fn extract_json_array(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&text[start..=end]).ok()
}
