//! Agent roles, descriptors, and the conversational execution loop.
//!
//! The registry is a fixed table of specialized roles; selection and the
//! turn-based execution loop live in the submodules.

pub mod conversational;
pub mod progress;
pub mod selector;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

pub use conversational::{ConversationOutcome, ConversationTurn, ConversationalAgent};
pub use progress::ProgressAnalysis;
pub use selector::{AgentSelector, BackendTier, RoutingStrategy, SelectionOutcome};

/// The specialized reasoning roles the engine can deploy.
///
/// Roles are a closed set resolved at compile time; a name outside this set
/// is a [`SelectionError::UnknownAgent`], never a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentRole {
    /// General-purpose coordinator; the default when nothing more specific
    /// matches.
    ProjectManager,
    /// System architecture and scalability.
    ArchitectureDesigner,
    /// Schemas, data modeling, indexing.
    DatabaseDesigner,
    /// Endpoints, authentication, integration.
    ApiDesigner,
    /// Implementation and testing.
    CodeGenerator,
    /// Standards, reviews, cross-cutting technical oversight.
    TechLead,
}

impl AgentRole {
    /// Every registered role, in registry order.
    pub const ALL: [AgentRole; 6] = [
        AgentRole::ProjectManager,
        AgentRole::ArchitectureDesigner,
        AgentRole::DatabaseDesigner,
        AgentRole::ApiDesigner,
        AgentRole::CodeGenerator,
        AgentRole::TechLead,
    ];

    /// Registry name, as used on the wire and in backend prompts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProjectManager => "projectManager",
            Self::ArchitectureDesigner => "architectureDesigner",
            Self::DatabaseDesigner => "databaseDesigner",
            Self::ApiDesigner => "apiDesigner",
            Self::CodeGenerator => "codeGenerator",
            Self::TechLead => "techLead",
        }
    }

    /// Human-readable specialization used in prompt text.
    pub fn specialization(&self) -> &'static str {
        match self {
            Self::ProjectManager => "Senior Project Manager",
            Self::ArchitectureDesigner => "Senior System Architect",
            Self::DatabaseDesigner => "Database Architect",
            Self::ApiDesigner => "API Architect",
            Self::CodeGenerator => "Senior Software Engineer",
            Self::TechLead => "Technical Lead",
        }
    }

    /// Skills this role declares, matched against classification domains.
    pub fn skills(&self) -> &'static [&'static str] {
        match self {
            Self::ProjectManager => {
                &["planning", "coordination", "timeline", "resources", "general"]
            }
            Self::ArchitectureDesigner => &[
                "architecture",
                "system",
                "scalability",
                "design patterns",
                "microservices",
            ],
            Self::DatabaseDesigner => &["database", "schema", "data", "indexing", "sql"],
            Self::ApiDesigner => &["api", "endpoint", "rest", "authentication", "integration"],
            Self::CodeGenerator => &[
                "code",
                "implementation",
                "programming",
                "testing",
                "backend",
                "frontend",
            ],
            Self::TechLead => &["review", "standards", "best practices", "quality", "mentoring"],
        }
    }

    /// One-line capability description, used in backend-assisted selection
    /// prompts.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ProjectManager => {
                "Project planning, coordination, timelines, resource allocation"
            }
            Self::ArchitectureDesigner => {
                "System architecture, scalability, design patterns, technical decisions"
            }
            Self::DatabaseDesigner => "Database schema, data modeling, optimization, queries",
            Self::ApiDesigner => "REST APIs, endpoints, authentication, integration",
            Self::CodeGenerator => "Code implementation, programming, testing, debugging",
            Self::TechLead => {
                "Technical leadership, code review, best practices, architecture oversight"
            }
        }
    }

    /// Static descriptor for this role.
    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            name: self.name().to_string(),
            skills: self.skills().iter().map(|s| s.to_string()).collect(),
            description: self.description().to_string(),
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentRole {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "projectManager" => Ok(Self::ProjectManager),
            "architectureDesigner" => Ok(Self::ArchitectureDesigner),
            "databaseDesigner" => Ok(Self::DatabaseDesigner),
            "apiDesigner" => Ok(Self::ApiDesigner),
            "codeGenerator" => Ok(Self::CodeGenerator),
            "techLead" => Ok(Self::TechLead),
            other => Err(SelectionError::UnknownAgent(other.to_string())),
        }
    }
}

/// Read-only registry entry describing one agent role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Registry name.
    pub name: String,
    /// Declared skills.
    pub skills: Vec<String>,
    /// Capability summary.
    pub description: String,
}

/// All registered agent descriptors, in registry order.
pub fn registry() -> Vec<AgentDescriptor> {
    AgentRole::ALL.iter().map(|r| r.descriptor()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_name_round_trip() {
        for role in AgentRole::ALL {
            assert_eq!(AgentRole::from_str(role.name()).unwrap(), role);
        }
    }

    #[test]
    fn test_unknown_agent_is_an_error() {
        let err = AgentRole::from_str("wizard").unwrap_err();
        assert_eq!(err, SelectionError::UnknownAgent("wizard".to_string()));
    }

    #[test]
    fn test_registry_covers_all_roles() {
        let registry = registry();
        assert_eq!(registry.len(), AgentRole::ALL.len());
        assert!(registry.iter().all(|d| !d.skills.is_empty()));
    }
}
