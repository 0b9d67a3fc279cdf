//! Response completeness scoring.
//!
//! The conversational loop keeps going until a response looks done. "Done"
//! is estimated from four signals: sheer length, structural markers, how
//! many of the role's expected elements the text covers, and a small bonus
//! for depth accumulated over turns. The score is capped below 1.0 because
//! a heuristic can never certify completeness.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::AgentRole;

/// Ceiling on the heuristic score.
const SCORE_CAP: f64 = 0.95;

static NUMBERED_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s").expect("regex"));
static BULLET_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*]\s").expect("regex"));
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(#{1,6}\s|[A-Z][A-Z ]{2,}:|\*\*[^*]+\*\*)").expect("regex"));
static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").expect("regex"));

/// (expected element, synonyms that count as covering it)
type ElementTable = &'static [(&'static str, &'static [&'static str])];

/// One completeness estimate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAnalysis {
    /// Estimated completion in `[0, 0.95]`.
    pub completion_score: f64,
    /// Up to three expected elements the response has not covered yet.
    pub missing_elements: Vec<String>,
}

/// Score `response` as produced by `role` on 1-based `turn`.
pub fn analyze(response: &str, role: AgentRole, turn: usize) -> ProgressAnalysis {
    let length_score = (response.chars().count() as f64 / 1500.0).min(0.3);
    let structure_score = structure_fraction(response) * 0.2;

    let elements = expected_elements(role);
    let lower = response.to_lowercase();
    let covered = elements
        .iter()
        .filter(|(element, synonyms)| is_covered(&lower, element, synonyms))
        .count();
    let content_score = if elements.is_empty() {
        0.3
    } else {
        covered as f64 / elements.len() as f64 * 0.3
    };

    let turn_bonus = (turn as f64 * 0.05).min(0.2);

    let missing_elements = elements
        .iter()
        .filter(|(element, synonyms)| !is_covered(&lower, element, synonyms))
        .map(|(element, _)| element.to_string())
        .take(3)
        .collect();

    ProgressAnalysis {
        completion_score: (length_score + structure_score + content_score + turn_bonus)
            .min(SCORE_CAP),
        missing_elements,
    }
}

/// Fraction of the four structural markers present.
fn structure_fraction(response: &str) -> f64 {
    let features = [
        NUMBERED_LIST.is_match(response),
        BULLET_LIST.is_match(response),
        HEADING.is_match(response),
        CODE_BLOCK.is_match(response),
    ];
    features.iter().filter(|f| **f).count() as f64 / features.len() as f64
}

fn is_covered(lower: &str, element: &str, synonyms: &[&str]) -> bool {
    lower.contains(element) || synonyms.iter().any(|s| lower.contains(s))
}

/// Elements a complete answer from each role is expected to touch.
fn expected_elements(role: AgentRole) -> ElementTable {
    match role {
        AgentRole::ProjectManager => &[
            ("timeline", &["schedule", "phases", "roadmap"]),
            ("milestones", &["deliverables", "checkpoints"]),
            ("resources", &["team", "staffing", "budget"]),
            ("risks", &["risk", "mitigation", "contingency"]),
        ],
        AgentRole::ArchitectureDesigner => &[
            ("components", &["component", "services", "modules"]),
            ("data flow", &["dataflow", "flow of data", "communication"]),
            ("technology stack", &["tech stack", "technologies", "stack"]),
            ("scalability", &["scaling", "scale", "load"]),
        ],
        AgentRole::DatabaseDesigner => &[
            ("tables", &["table", "collections", "entities"]),
            ("relationships", &["relations", "foreign key", "references"]),
            ("indexes", &["index", "indexing"]),
            ("constraints", &["constraint", "validation", "integrity"]),
        ],
        AgentRole::ApiDesigner => &[
            ("endpoints", &["endpoint", "routes", "paths"]),
            ("methods", &["get", "post", "put", "delete"]),
            ("authentication", &["auth", "authorization", "tokens"]),
            ("error handling", &["errors", "status codes", "failure"]),
        ],
        AgentRole::CodeGenerator => &[
            ("implementation", &["implement", "code"]),
            ("tests", &["testing", "test cases", "unit test"]),
            ("error handling", &["errors", "exception", "failure"]),
            ("dependencies", &["dependency", "libraries", "packages"]),
        ],
        AgentRole::TechLead => &[
            ("standards", &["conventions", "guidelines", "best practices"]),
            ("review", &["code review", "feedback"]),
            ("architecture", &["design", "structure"]),
            ("recommendations", &["recommend", "suggestions", "next steps"]),
        ],
    }
}
