//! # Atelier
//!
//! A multi-agent task orchestration and conversational execution engine.
//!
//! Atelier routes incoming task requests through a classify → select →
//! execute pipeline: a lightweight classifier (with local keyword fallback)
//! estimates complexity and intent, a selector picks specialized agent
//! roles, and either a single agent or a coordinated team of agents works
//! the task through converse-until-complete loops against a credential-
//! rotating, cached, request-coalescing generative backend. Agents mutate a
//! shared design canvas through inline action directives, and the whole run
//! is observable as an ordered stream of typed events.

pub mod agents;
pub mod backend;
pub mod canvas;
pub mod classifier;
pub mod config;
pub mod directives;
pub mod error;
pub mod events;
pub mod heuristics;
pub mod prompts;
pub mod router;
pub mod scheduler;

// Primary entry points.
pub use config::OrchestratorConfig;
pub use error::{BackendError, CanvasError, OrchestratorError, SelectionError};
pub use events::{channel, EventSink, EventStream, TaskEvent};
pub use router::{ExecutionPath, ExecutionStep, Task, TaskOutcome, TaskRouter};

// Building blocks for embedders that wire their own pipeline.
pub use agents::{AgentRole, AgentSelector, ConversationOutcome, ConversationalAgent};
pub use backend::{BackendClient, GenerativeBackend};
pub use canvas::{CanvasState, CanvasStore, InMemoryCanvas, SharedCanvas};
pub use classifier::{Classification, ClassifierAdapter, Intent};
pub use directives::{ActionDirective, DirectiveExecutor, DirectiveScanner};
pub use scheduler::{SubTask, SubTaskStatus, TaskScheduler};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
