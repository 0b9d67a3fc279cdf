//! Task routing and orchestration.
//!
//! [`TaskRouter`] is the entry point: it classifies the request, picks an
//! execution path (casual shortcut, single-agent simple path, or
//! multi-agent coordinated path), drives the agents, and aggregates their
//! results. Partial results always beat total failure: one failed agent
//! marks the outcome partial, and only the combination of degraded
//! classification and zero successful agents is fatal.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{
    AgentRole, AgentSelector, ConversationOutcome, ConversationalAgent, RoutingStrategy,
};
use crate::backend::BackendClient;
use crate::canvas::SharedCanvas;
use crate::classifier::{Classification, ClassificationSource, ClassifierAdapter, Intent};
use crate::config::OrchestratorConfig;
use crate::directives::DirectiveExecutor;
use crate::error::OrchestratorError;
use crate::events::{EventSink, TaskEvent};
use crate::prompts::{vars, Template, TemplateEngine};
use crate::scheduler::{self, SubTask, SubTaskStatus, TaskScheduler};

/// Reply used when the backend cannot even produce small talk.
const CASUAL_FALLBACK_REPLY: &str =
    "Hello! I can help you design software systems, data models, and APIs. \
     What would you like to work on?";

/// One task request as submitted by a caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable task id, generated if the caller does not supply one.
    pub id: String,
    /// The request text.
    pub text: String,
    /// Free-form context forwarded into prompts.
    pub context: String,
    /// Canvas this task may mutate through directives.
    pub canvas_id: Option<String>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            context: String::new(),
            canvas_id: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_canvas(mut self, canvas_id: impl Into<String>) -> Self {
        self.canvas_id = Some(canvas_id.into());
        self
    }
}

/// Which path the router took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Casual,
    Simple,
    Coordinated,
}

/// One agent invocation in the final report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    /// Sub-task id on the coordinated path, absent on the simple path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    pub title: String,
    pub agent: AgentRole,
    pub status: SubTaskStatus,
    pub response: String,
    pub completion_score: f64,
    /// True when this step returned a degraded partial answer.
    pub fallback: bool,
}

impl ExecutionStep {
    fn from_outcome(subtask: Option<&SubTask>, title: &str, outcome: ConversationOutcome) -> Self {
        Self {
            subtask_id: subtask.map(|s| s.id.clone()),
            title: title.to_string(),
            agent: outcome.agent,
            status: SubTaskStatus::Done,
            response: outcome.response,
            completion_score: outcome.completion_score,
            fallback: outcome.fallback,
        }
    }
}

/// Aggregated result of one routed task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task_id: String,
    pub path: ExecutionPath,
    /// Aggregated response text.
    pub response: String,
    pub steps: Vec<ExecutionStep>,
    /// Mean completion score over successful steps.
    pub completion_score: f64,
    /// True when at least one step failed or was blocked.
    pub partial: bool,
}

/// The orchestration entry point.
pub struct TaskRouter {
    config: OrchestratorConfig,
    classifier: ClassifierAdapter,
    client: Arc<BackendClient>,
    selector: AgentSelector,
    scheduler: TaskScheduler,
    agent: ConversationalAgent,
    engine: TemplateEngine,
    canvas: Option<SharedCanvas>,
}

impl TaskRouter {
    /// Build a router against the HTTP services named in `config`.
    pub fn from_config(config: OrchestratorConfig) -> Self {
        let client = Arc::new(BackendClient::from_config(&config));
        Self::with_client(config, client, None)
    }

    /// Build a router over an existing client, optionally wired to a canvas
    /// store. Used by embedders and tests.
    pub fn with_client(
        config: OrchestratorConfig,
        client: Arc<BackendClient>,
        canvas: Option<SharedCanvas>,
    ) -> Self {
        let classifier = ClassifierAdapter::new(
            config.classifier_url.clone(),
            config.request_timeout,
            config.classification_cache_ttl,
        );
        Self {
            classifier,
            selector: AgentSelector::new(Arc::clone(&client), &config),
            scheduler: TaskScheduler::new(Arc::clone(&client), &config),
            agent: ConversationalAgent::new(Arc::clone(&client), &config),
            engine: TemplateEngine::new(config.max_prompt_chars),
            client,
            canvas,
            config,
        }
    }

    /// Route one task, streaming progress into `sink`.
    ///
    /// The stream always ends with exactly one terminal event: `complete`,
    /// `error`, or `canceled`.
    pub async fn route(
        &self,
        task: &Task,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, OrchestratorError> {
        sink.emit(TaskEvent::Connected {
            task_id: task.id.clone(),
        });

        let result = self.route_inner(task, sink, cancel).await;
        match &result {
            Ok(outcome) => {
                sink.finish(TaskEvent::Complete {
                    result: serde_json::to_value(outcome).unwrap_or_default(),
                });
            }
            Err(OrchestratorError::Canceled) => {
                sink.finish(TaskEvent::Canceled {
                    task_id: task.id.clone(),
                });
            }
            Err(err) => {
                sink.finish(TaskEvent::Error {
                    message: err.to_string(),
                });
            }
        }
        result
    }

    async fn route_inner(
        &self,
        task: &Task,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Canceled);
        }

        let classification = self.classifier.classify(&task.text).await;
        sink.emit(TaskEvent::Intent {
            intent: classification.intent.to_string(),
            complexity: classification.complexity,
            confidence: classification.confidence,
            domains: classification.domains.clone(),
        });

        if classification.intent == Intent::Casual {
            return Ok(self.casual_path(task, sink).await);
        }

        let selection = self.selector.select(&task.text, &classification).await;
        info!(
            task_id = %task.id,
            strategy = ?selection.strategy,
            agents = selection.agents.len(),
            escalated = selection.escalated,
            "task routed"
        );

        let lead = selection
            .agents
            .first()
            .copied()
            .unwrap_or(AgentRole::ProjectManager);
        match selection.strategy {
            RoutingStrategy::Simple => {
                self.simple_path(task, &classification, lead, sink, cancel)
                    .await
            }
            RoutingStrategy::Coordinated => {
                self.coordinated_path(task, &classification, sink, cancel)
                    .await
            }
        }
    }

    /// Small talk never reaches selection or decomposition.
    async fn casual_path(&self, task: &Task, sink: &EventSink) -> TaskOutcome {
        let prompt = self.engine.render(
            Template::CasualReply,
            &vars([("task", task.text.clone())]),
        );
        let response = match self.client.generate_text(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "casual reply failed, using canned text");
                CASUAL_FALLBACK_REPLY.to_string()
            }
        };
        sink.emit(TaskEvent::Message {
            agent: AgentRole::ProjectManager.name().to_string(),
            turn: 1,
            content: response.clone(),
        });

        TaskOutcome {
            task_id: task.id.clone(),
            path: ExecutionPath::Casual,
            response,
            steps: Vec::new(),
            completion_score: 1.0,
            partial: false,
        }
    }

    async fn simple_path(
        &self,
        task: &Task,
        classification: &Classification,
        role: AgentRole,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let executor = self.executor_for(task);
        sink.emit(TaskEvent::TaskStart {
            agent: role.name().to_string(),
            title: task.text.clone(),
        });

        match self
            .agent
            .converse(
                role,
                &task.text,
                &task.context,
                executor.as_ref(),
                Some(sink),
                cancel,
            )
            .await
        {
            Ok(outcome) => {
                sink.emit(TaskEvent::TaskComplete {
                    agent: role.name().to_string(),
                    completion_score: outcome.completion_score,
                });
                let step = ExecutionStep::from_outcome(None, &task.text, outcome);
                Ok(TaskOutcome {
                    task_id: task.id.clone(),
                    path: ExecutionPath::Simple,
                    response: step.response.clone(),
                    completion_score: step.completion_score,
                    partial: step.fallback,
                    steps: vec![step],
                })
            }
            Err(OrchestratorError::Canceled) => Err(OrchestratorError::Canceled),
            Err(err) => {
                sink.emit(TaskEvent::TaskError {
                    agent: role.name().to_string(),
                    message: err.to_string(),
                });
                if classification.source == ClassificationSource::Fallback {
                    return Err(OrchestratorError::Fatal(format!(
                        "classification degraded and agent {} failed: {err}",
                        role.name()
                    )));
                }
                Ok(TaskOutcome {
                    task_id: task.id.clone(),
                    path: ExecutionPath::Simple,
                    response: String::new(),
                    completion_score: 0.0,
                    partial: true,
                    steps: vec![ExecutionStep {
                        subtask_id: None,
                        title: task.text.clone(),
                        agent: role,
                        status: SubTaskStatus::Failed,
                        response: String::new(),
                        completion_score: 0.0,
                        fallback: false,
                    }],
                })
            }
        }
    }

    async fn coordinated_path(
        &self,
        task: &Task,
        classification: &Classification,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let subtasks = self.scheduler.decompose(&task.text, classification).await;
        sink.emit(TaskEvent::TaskBreakdown {
            subtasks: subtasks
                .iter()
                .map(|s| serde_json::to_value(s).unwrap_or_default())
                .collect(),
        });

        let executor = self.executor_for(task);
        let batches = scheduler::execution_batches(&subtasks);
        let mut steps: Vec<ExecutionStep> = Vec::new();
        let mut blocked: HashSet<String> = HashSet::new();

        for batch in batches {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Canceled);
            }

            let runnable: Vec<&SubTask> = batch
                .iter()
                .filter_map(|id| subtasks.iter().find(|s| &s.id == id))
                .collect();

            // Sub-tasks downstream of a failure are reported, not run.
            let mut running = Vec::new();
            for subtask in runnable {
                if blocked.contains(&subtask.id) {
                    sink.emit(TaskEvent::TaskError {
                        agent: subtask.assigned_role.name().to_string(),
                        message: format!("'{}' blocked by a failed dependency", subtask.title),
                    });
                    steps.push(ExecutionStep {
                        subtask_id: Some(subtask.id.clone()),
                        title: subtask.title.clone(),
                        agent: subtask.assigned_role,
                        status: SubTaskStatus::Blocked,
                        response: String::new(),
                        completion_score: 0.0,
                        fallback: false,
                    });
                } else {
                    sink.emit(TaskEvent::TaskStart {
                        agent: subtask.assigned_role.name().to_string(),
                        title: subtask.title.clone(),
                    });
                    running.push(subtask);
                }
            }

            let results = futures::future::join_all(running.iter().map(|subtask| async {
                let outcome = self
                    .agent
                    .converse_subtask(
                        subtask.assigned_role,
                        &subtask.title,
                        &subtask.description,
                        &task.text,
                        executor.as_ref(),
                        Some(sink),
                        cancel,
                    )
                    .await;
                (*subtask, outcome)
            }))
            .await;

            for (subtask, result) in results {
                match result {
                    Ok(outcome) => {
                        sink.emit(TaskEvent::TaskComplete {
                            agent: subtask.assigned_role.name().to_string(),
                            completion_score: outcome.completion_score,
                        });
                        steps.push(ExecutionStep::from_outcome(
                            Some(subtask),
                            &subtask.title,
                            outcome,
                        ));
                    }
                    Err(OrchestratorError::Canceled) => return Err(OrchestratorError::Canceled),
                    Err(err) => {
                        warn!(subtask = %subtask.id, %err, "sub-task failed");
                        sink.emit(TaskEvent::TaskError {
                            agent: subtask.assigned_role.name().to_string(),
                            message: err.to_string(),
                        });
                        steps.push(ExecutionStep {
                            subtask_id: Some(subtask.id.clone()),
                            title: subtask.title.clone(),
                            agent: subtask.assigned_role,
                            status: SubTaskStatus::Failed,
                            response: String::new(),
                            completion_score: 0.0,
                            fallback: false,
                        });
                        blocked.extend(scheduler::dependents_of(&subtasks, &subtask.id));
                    }
                }
            }
        }

        let successes: Vec<&ExecutionStep> = steps
            .iter()
            .filter(|s| s.status == SubTaskStatus::Done)
            .collect();

        if successes.is_empty() && classification.source == ClassificationSource::Fallback {
            return Err(OrchestratorError::Fatal(
                "classification degraded and every sub-task failed".to_string(),
            ));
        }

        let response = successes
            .iter()
            .map(|s| format!("## {} ({})\n\n{}", s.title, s.agent.name(), s.response))
            .collect::<Vec<_>>()
            .join("\n\n");
        let completion_score = if successes.is_empty() {
            0.0
        } else {
            successes.iter().map(|s| s.completion_score).sum::<f64>() / successes.len() as f64
        };
        let partial = steps.iter().any(|s| s.status != SubTaskStatus::Done);

        Ok(TaskOutcome {
            task_id: task.id.clone(),
            path: ExecutionPath::Coordinated,
            response,
            steps,
            completion_score,
            partial,
        })
    }

    fn executor_for(&self, task: &Task) -> Option<DirectiveExecutor> {
        match (&self.canvas, &task.canvas_id) {
            (Some(canvas), Some(canvas_id)) => {
                Some(DirectiveExecutor::new(Arc::clone(canvas), canvas_id))
            }
            _ => None,
        }
    }

    /// The configuration this router was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Summary of the router's health-relevant state.
    pub async fn health(&self) -> serde_json::Value {
        let classifier = self.classifier.health().await.is_some();
        json!({
            "classifier": if classifier { "up" } else { "degraded" },
            "usableCredentials": self.client.usable_credentials(),
        })
    }
}
