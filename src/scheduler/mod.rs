//! Task decomposition and dependency scheduling.
//!
//! Composite tasks are broken into at most `max_subtasks` sub-tasks by the
//! generative backend; a plain-text list extraction and finally a single
//! wrapping sub-task stand in when the backend answer is unusable, so
//! decomposition is total. Scheduling releases sub-tasks in dependency
//! order, grouping dependency-free sub-tasks into batches that may run
//! concurrently. A dependency cycle degrades to sequential declaration
//! order rather than failing the task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::AgentRole;
use crate::backend::BackendClient;
use crate::classifier::Classification;
use crate::config::OrchestratorConfig;
use crate::heuristics;
use crate::prompts::{vars, Template, TemplateEngine};

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*])\s+(.+)$").expect("list item regex"));

/// Lifecycle of one sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    /// A dependency failed, so this sub-task never ran.
    Blocked,
}

/// One unit of a decomposed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub assigned_role: AgentRole,
    /// Ids of sub-tasks that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: u32,
    pub status: SubTaskStatus,
}

/// Wire shape of the backend's decomposition answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecompositionWire {
    sub_tasks: Vec<SubTaskWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubTaskWire {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    priority: u32,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Decomposes composite tasks via the backend.
pub struct TaskScheduler {
    client: Arc<BackendClient>,
    engine: TemplateEngine,
    max_subtasks: usize,
}

impl TaskScheduler {
    pub fn new(client: Arc<BackendClient>, config: &OrchestratorConfig) -> Self {
        Self {
            client,
            engine: TemplateEngine::new(config.max_prompt_chars),
            max_subtasks: config.max_subtasks,
        }
    }

    /// Break `task` into sub-tasks. Never returns an empty plan: unusable
    /// backend output degrades to list extraction and finally to one
    /// wrapping sub-task for the whole request.
    pub async fn decompose(&self, task: &str, classification: &Classification) -> Vec<SubTask> {
        let prompt = self.engine.render(
            Template::Decomposition,
            &vars([
                ("task", task.to_string()),
                ("max_subtasks", self.max_subtasks.to_string()),
                ("intent", classification.intent.to_string()),
                ("domains", classification.domains.join(", ")),
                (
                    "agents",
                    AgentRole::ALL
                        .iter()
                        .map(|r| r.name())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
            ]),
        );

        let text = match self.client.generate_text(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "decomposition call failed, wrapping task as one sub-task");
                return vec![wrap_whole_task(task)];
            }
        };

        if let Some(plan) = parse_decomposition(&text, self.max_subtasks) {
            debug!(subtasks = plan.len(), "backend decomposition accepted");
            return plan;
        }
        if let Some(plan) = extract_list_plan(&text, self.max_subtasks) {
            warn!("decomposition answer was not JSON, extracted plain list");
            return plan;
        }
        warn!("decomposition answer unusable, wrapping task as one sub-task");
        vec![wrap_whole_task(task)]
    }
}

/// Parse the `{"subTasks": [...]}` answer, tolerating prose around the JSON.
fn parse_decomposition(text: &str, cap: usize) -> Option<Vec<SubTask>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let wire: DecompositionWire = serde_json::from_str(&text[start..=end]).ok()?;
    if wire.sub_tasks.is_empty() {
        return None;
    }

    let subtasks: Vec<SubTask> = wire
        .sub_tasks
        .into_iter()
        .take(cap)
        .enumerate()
        .map(|(i, wire)| {
            let assigned_role = wire
                .agent
                .as_deref()
                .and_then(|name| name.parse::<AgentRole>().ok())
                .unwrap_or_else(|| {
                    heuristics::infer_role(&format!("{} {}", wire.title, wire.description))
                });
            SubTask {
                id: wire.id.unwrap_or_else(|| format!("task_{}", i + 1)),
                title: wire.title,
                description: wire.description,
                assigned_role,
                dependencies: wire.dependencies,
                priority: wire.priority,
                status: SubTaskStatus::Pending,
            }
        })
        .collect();

    // Dependencies on ids outside the plan can never be satisfied; drop
    // them instead of deadlocking the schedule.
    let ids: HashSet<String> = subtasks.iter().map(|s| s.id.clone()).collect();
    let subtasks = subtasks
        .into_iter()
        .map(|mut s| {
            s.dependencies.retain(|d| {
                let known = ids.contains(d);
                if !known {
                    warn!(subtask = %s.id, dependency = %d, "dropping unknown dependency");
                }
                known && *d != s.id
            });
            s
        })
        .collect();
    Some(subtasks)
}

/// Extract numbered or bulleted lines as a sequential plan.
fn extract_list_plan(text: &str, cap: usize) -> Option<Vec<SubTask>> {
    let items: Vec<String> = LIST_ITEM
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .take(cap)
        .collect();
    if items.is_empty() {
        return None;
    }

    Some(
        items
            .into_iter()
            .enumerate()
            .map(|(i, title)| {
                let id = format!("task_{}", i + 1);
                let dependencies = if i == 0 {
                    Vec::new()
                } else {
                    vec![format!("task_{}", i)]
                };
                SubTask {
                    assigned_role: heuristics::infer_role(&title),
                    description: title.clone(),
                    title,
                    id,
                    dependencies,
                    priority: i as u32 + 1,
                    status: SubTaskStatus::Pending,
                }
            })
            .collect(),
    )
}

/// Last-resort plan: the whole task as one sub-task.
fn wrap_whole_task(task: &str) -> SubTask {
    SubTask {
        id: "task_1".to_string(),
        title: truncate_title(task),
        description: task.to_string(),
        assigned_role: heuristics::infer_role(task),
        dependencies: Vec::new(),
        priority: 1,
        status: SubTaskStatus::Pending,
    }
}

fn truncate_title(task: &str) -> String {
    let title: String = task.chars().take(80).collect();
    if title.len() < task.len() {
        format!("{title}…")
    } else {
        title
    }
}

/// Group sub-task ids into batches whose members have all dependencies
/// satisfied by earlier batches. Ties release in declaration order. A cycle
/// degrades to one-per-batch declaration order.
pub fn execution_batches(subtasks: &[SubTask]) -> Vec<Vec<String>> {
    let known: HashSet<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
    let mut placed = vec![false; subtasks.len()];
    let mut done: HashSet<&str> = HashSet::new();
    let mut batches: Vec<Vec<String>> = Vec::new();

    while placed.iter().any(|p| !p) {
        let ready: Vec<usize> = subtasks
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                !placed[*i]
                    && s.dependencies
                        .iter()
                        .all(|d| !known.contains(d.as_str()) || done.contains(d.as_str()))
            })
            .map(|(i, _)| i)
            .collect();

        if ready.is_empty() {
            warn!("dependency cycle detected, scheduling in declaration order");
            for (i, subtask) in subtasks.iter().enumerate() {
                if !placed[i] {
                    batches.push(vec![subtask.id.clone()]);
                    placed[i] = true;
                }
            }
            break;
        }

        batches.push(ready.iter().map(|&i| subtasks[i].id.clone()).collect());
        for &i in &ready {
            placed[i] = true;
            done.insert(subtasks[i].id.as_str());
        }
    }
    batches
}

/// Ids of every sub-task that transitively depends on `failed_id`.
pub fn dependents_of(subtasks: &[SubTask], failed_id: &str) -> Vec<String> {
    let mut blocked: HashSet<String> = HashSet::new();
    blocked.insert(failed_id.to_string());

    // Fixed point over the dependency edges.
    let mut changed = true;
    while changed {
        changed = false;
        for subtask in subtasks {
            if !blocked.contains(&subtask.id)
                && subtask.dependencies.iter().any(|d| blocked.contains(d))
            {
                blocked.insert(subtask.id.clone());
                changed = true;
            }
        }
    }

    let index: HashMap<&str, usize> = subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    let mut ids: Vec<String> = blocked.into_iter().filter(|id| id != failed_id).collect();
    ids.sort_by_key(|id| index.get(id.as_str()).copied().unwrap_or(usize::MAX));
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{client_with, ScriptedBackend};
    use crate::classifier::{ClassificationSource, Intent};
    use crate::error::BackendError;

    fn classification() -> Classification {
        Classification {
            complexity: 0.8,
            confidence: 0.9,
            intent: Intent::Creation,
            domains: vec!["architecture".into(), "database".into()],
            source: ClassificationSource::Model,
        }
    }

    fn scheduler(backend: ScriptedBackend) -> TaskScheduler {
        TaskScheduler::new(
            Arc::new(client_with(backend)),
            &OrchestratorConfig::default(),
        )
    }

    fn subtask(id: &str, deps: &[&str]) -> SubTask {
        SubTask {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            assigned_role: AgentRole::CodeGenerator,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            priority: 1,
            status: SubTaskStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_decompose_accepts_backend_json() {
        let answer = r#"Here is the plan:
        {"subTasks": [
            {"id": "task_1", "title": "Design schema", "description": "Design the database schema", "agent": "databaseDesigner", "priority": 1, "dependencies": []},
            {"id": "task_2", "title": "Build API", "description": "Implement the api endpoints", "agent": "apiDesigner", "priority": 2, "dependencies": ["task_1"]}
        ]}"#;
        let scheduler = scheduler(ScriptedBackend::always(answer));
        let plan = scheduler.decompose("Build the service", &classification()).await;

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].assigned_role, AgentRole::DatabaseDesigner);
        assert_eq!(plan[1].dependencies, vec!["task_1"]);
    }

    #[tokio::test]
    async fn test_invalid_agent_name_is_inferred_from_description() {
        let answer = r#"{"subTasks": [
            {"title": "Schema work", "description": "Design the database schema", "agent": "wizard"}
        ]}"#;
        let scheduler = scheduler(ScriptedBackend::always(answer));
        let plan = scheduler.decompose("t", &classification()).await;
        assert_eq!(plan[0].assigned_role, AgentRole::DatabaseDesigner);
        assert_eq!(plan[0].id, "task_1");
    }

    #[tokio::test]
    async fn test_subtask_cap_is_enforced() {
        let many: Vec<String> = (1..=9)
            .map(|i| format!(r#"{{"title": "Step {i}", "description": "step"}}"#))
            .collect();
        let answer = format!(r#"{{"subTasks": [{}]}}"#, many.join(","));
        let scheduler = scheduler(ScriptedBackend::always(&answer));
        let plan = scheduler.decompose("t", &classification()).await;
        assert_eq!(plan.len(), 5);
    }

    #[tokio::test]
    async fn test_plain_list_answer_is_extracted() {
        let answer = "Sure, here is what I would do:\n\
                      1. Design the database schema\n\
                      2. Implement the code\n\
                      3. Review the result";
        let scheduler = scheduler(ScriptedBackend::always(answer));
        let plan = scheduler.decompose("t", &classification()).await;

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].assigned_role, AgentRole::DatabaseDesigner);
        // The extracted list is sequential.
        assert_eq!(plan[1].dependencies, vec!["task_1"]);
    }

    #[tokio::test]
    async fn test_unusable_answer_wraps_whole_task() {
        let scheduler = scheduler(ScriptedBackend::always("I don't know."));
        let plan = scheduler
            .decompose("Design the database layer", &classification())
            .await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].assigned_role, AgentRole::DatabaseDesigner);
        assert!(plan[0].dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_wraps_whole_task() {
        let scheduler = scheduler(ScriptedBackend::new(vec![Err(BackendError::Unavailable(
            "down".into(),
        ))]));
        let plan = scheduler.decompose("Do the thing", &classification()).await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, "task_1");
    }

    #[tokio::test]
    async fn test_unknown_dependencies_are_dropped() {
        let answer = r#"{"subTasks": [
            {"id": "a", "title": "A", "dependencies": ["ghost", "a"]}
        ]}"#;
        let scheduler = scheduler(ScriptedBackend::always(answer));
        let plan = scheduler.decompose("t", &classification()).await;
        assert!(plan[0].dependencies.is_empty());
    }

    #[test]
    fn test_batches_follow_the_dependency_diamond() {
        let plan = vec![
            subtask("a", &[]),
            subtask("b", &["a"]),
            subtask("c", &["a"]),
            subtask("d", &["b", "c"]),
        ];
        let batches = execution_batches(&plan);
        assert_eq!(
            batches,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn test_cycle_degrades_to_declaration_order() {
        let plan = vec![subtask("a", &["b"]), subtask("b", &["a"]), subtask("c", &[])];
        let batches = execution_batches(&plan);
        // c is dependency-free and releases first; the cycle then unwinds
        // in declaration order.
        assert_eq!(
            batches,
            vec![
                vec!["c".to_string()],
                vec!["a".to_string()],
                vec!["b".to_string()],
            ]
        );
    }

    #[test]
    fn test_dependents_are_transitive_and_ordered() {
        let plan = vec![
            subtask("a", &[]),
            subtask("b", &["a"]),
            subtask("c", &["b"]),
            subtask("d", &[]),
        ];
        assert_eq!(dependents_of(&plan, "a"), vec!["b".to_string(), "c".to_string()]);
        assert!(dependents_of(&plan, "d").is_empty());
    }
}
