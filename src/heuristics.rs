//! Shared keyword fallback heuristics.
//!
//! Every place the engine needs a local guess when a model is unavailable
//! (classification, agent selection, subtask role inference) calls into this
//! module, so the keyword tables exist exactly once.

use once_cell::sync::Lazy;

use crate::agents::AgentRole;
use crate::classifier::{
    Classification, ClassificationSource, Intent, FALLBACK_CONFIDENCE_CAP,
};

/// Keywords that raise the complexity estimate.
static COMPLEXITY_KEYWORDS: &[&str] = &[
    "architecture",
    "microservices",
    "distributed",
    "scalable",
    "database",
    "api",
    "security",
    "authentication",
];

/// Greetings and small-talk openers that mark a prompt as casual.
static CASUAL_OPENERS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "good morning", "good evening", "how are you",
];

/// (keyword, domain) pairs for domain detection.
static DOMAIN_KEYWORDS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("frontend", "frontend"),
        ("ui", "frontend"),
        ("backend", "backend"),
        ("api", "api"),
        ("endpoint", "api"),
        ("rest", "api"),
        ("database", "database"),
        ("schema", "database"),
        ("sql", "database"),
        ("data model", "database"),
        ("architecture", "architecture"),
        ("system", "architecture"),
        ("microservice", "architecture"),
        ("scalab", "architecture"),
        ("code", "code"),
        ("implement", "code"),
        ("test", "code"),
        ("security", "security"),
        ("auth", "security"),
    ]
});

/// Deterministic classification from text length and keyword hits.
///
/// The result is always tagged [`ClassificationSource::Fallback`] and its
/// confidence never exceeds [`FALLBACK_CONFIDENCE_CAP`].
pub fn fallback_classification(text: &str) -> Classification {
    let length = text.len();
    let mut complexity: f64 = 0.3;
    if length > 200 {
        complexity += 0.1;
    }
    if length > 500 {
        complexity += 0.1;
    }

    let lower = text.to_lowercase();
    let keyword_hits = COMPLEXITY_KEYWORDS
        .iter()
        .filter(|k| lower.contains(**k))
        .count();
    complexity += keyword_hits as f64 * 0.05;
    complexity = complexity.min(1.0);

    let intent = infer_intent(text);
    let domains = infer_domains(text);

    Classification {
        complexity,
        confidence: FALLBACK_CONFIDENCE_CAP,
        intent,
        domains,
        source: ClassificationSource::Fallback,
    }
}

/// Keyword intent inference.
pub fn infer_intent(text: &str) -> Intent {
    let lower = text.trim().to_lowercase();

    if CASUAL_OPENERS
        .iter()
        .any(|opener| lower.starts_with(opener))
        && lower.len() < 80
    {
        return Intent::Casual;
    }
    if lower.contains("build") || lower.contains("create") || lower.contains("design") {
        return Intent::Creation;
    }
    if lower.contains("analyze") || lower.contains("review") {
        return Intent::Analysis;
    }
    if lower.contains("fix") || lower.contains("debug") {
        return Intent::Debugging;
    }
    Intent::General
}

/// Detect technical domains mentioned in the text, in table order, deduped.
pub fn infer_domains(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut domains: Vec<String> = Vec::new();
    for (keyword, domain) in DOMAIN_KEYWORDS.iter() {
        if lower.contains(keyword) && !domains.iter().any(|d| d == domain) {
            domains.push((*domain).to_string());
        }
    }
    domains
}

/// Infer the best-suited agent role from a subtask description.
pub fn infer_role(description: &str) -> AgentRole {
    let lower = description.to_lowercase();

    if lower.contains("architecture") || lower.contains("system") {
        AgentRole::ArchitectureDesigner
    } else if lower.contains("database") || lower.contains("schema") || lower.contains("data") {
        AgentRole::DatabaseDesigner
    } else if lower.contains("api") || lower.contains("endpoint") {
        AgentRole::ApiDesigner
    } else if lower.contains("code") || lower.contains("implement") {
        AgentRole::CodeGenerator
    } else if lower.contains("review") || lower.contains("quality") {
        AgentRole::TechLead
    } else {
        AgentRole::ProjectManager
    }
}

/// Heuristic multi-agent pick from a classification, used when both the
/// similarity scoring and the backend escalation come up empty.
///
/// Never returns an empty list; the project manager is always appended as
/// coordinator, and a tech lead joins once more than one specialist is in
/// play.
pub fn roles_from_classification(classification: &Classification) -> Vec<AgentRole> {
    let mut roles: Vec<AgentRole> = Vec::new();
    let push = |role: AgentRole, roles: &mut Vec<AgentRole>| {
        if !roles.contains(&role) {
            roles.push(role);
        }
    };

    for domain in &classification.domains {
        match domain.as_str() {
            "architecture" => push(AgentRole::ArchitectureDesigner, &mut roles),
            "database" => push(AgentRole::DatabaseDesigner, &mut roles),
            "api" => push(AgentRole::ApiDesigner, &mut roles),
            "backend" | "frontend" | "code" => push(AgentRole::CodeGenerator, &mut roles),
            _ => {}
        }
    }
    if classification.intent == Intent::Creation && roles.is_empty() {
        push(AgentRole::CodeGenerator, &mut roles);
    }
    if roles.len() > 1 {
        push(AgentRole::TechLead, &mut roles);
    }
    push(AgentRole::ProjectManager, &mut roles);

    roles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_confidence_is_capped() {
        let c = fallback_classification(
            "Design a distributed, scalable microservices architecture with database, \
             api and security layers for a large e-commerce platform",
        );
        assert!(c.confidence <= FALLBACK_CONFIDENCE_CAP);
        assert_eq!(c.source, ClassificationSource::Fallback);
        assert!(c.complexity > 0.4);
    }

    #[test]
    fn test_simple_prompt_scores_low_complexity() {
        let c = fallback_classification("Build a simple web app");
        assert!(c.complexity >= 0.3 && c.complexity <= 0.4);
        assert_eq!(c.intent, Intent::Creation);
    }

    #[test]
    fn test_casual_intent() {
        assert_eq!(infer_intent("Hello there!"), Intent::Casual);
        assert_eq!(infer_intent("hey, how are you"), Intent::Casual);
        // A long prompt starting with a greeting is not small talk.
        let long = format!("hi team, {}", "we need an architecture plan ".repeat(10));
        assert_ne!(infer_intent(&long), Intent::Casual);
    }

    #[test]
    fn test_domain_detection_dedupes() {
        let domains = infer_domains("an API with REST endpoints and an api gateway");
        assert_eq!(domains, vec!["api".to_string()]);
    }

    #[test]
    fn test_role_inference() {
        assert_eq!(infer_role("Design the database schema"), AgentRole::DatabaseDesigner);
        assert_eq!(infer_role("Implement the code"), AgentRole::CodeGenerator);
        assert_eq!(infer_role("Plan the rollout"), AgentRole::ProjectManager);
    }

    #[test]
    fn test_roles_never_empty_and_pm_always_present() {
        let c = fallback_classification("hello");
        let roles = roles_from_classification(&c);
        assert!(!roles.is_empty());
        assert!(roles.contains(&AgentRole::ProjectManager));
    }

    #[test]
    fn test_tech_lead_joins_multi_specialist_teams() {
        let c = fallback_classification(
            "Design the system architecture, the database schema and the REST api",
        );
        let roles = roles_from_classification(&c);
        assert!(roles.contains(&AgentRole::TechLead));
        assert!(roles.len() >= 3);
    }
}
