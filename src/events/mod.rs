//! Streaming task events.
//!
//! Orchestration progress is observable as an ordered stream of typed
//! events. The sink end is cheap to clone and safe to share across
//! concurrently running agents; the stream closes exactly once and nothing
//! is emitted after close. An SSE encoding is provided for callers that
//! bridge the stream onto an HTTP response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::directives::DirectiveOutcome;

/// One progress event in a task's lifetime.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Stream opened; always first.
    Connected { task_id: String },
    /// Classification finished.
    Intent {
        intent: String,
        complexity: f64,
        confidence: f64,
        domains: Vec<String>,
    },
    /// Coordinated path: the sub-task plan.
    TaskBreakdown { subtasks: Vec<Value> },
    /// An agent started on a (sub-)task.
    TaskStart { agent: String, title: String },
    /// One conversational turn's visible text.
    Message {
        agent: String,
        turn: usize,
        content: String,
    },
    /// A directive was applied (or rejected).
    Action {
        agent: String,
        outcome: DirectiveOutcome,
    },
    /// An agent finished its (sub-)task.
    TaskComplete {
        agent: String,
        completion_score: f64,
    },
    /// An agent failed; the task may still complete partially.
    TaskError { agent: String, message: String },
    /// Terminal: the task finished (possibly partially).
    Complete { result: Value },
    /// Terminal: the task failed outright.
    Error { message: String },
    /// Terminal: the caller canceled the task.
    Canceled { task_id: String },
}

impl TaskEvent {
    /// The event's wire name, as used in the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Intent { .. } => "intent",
            Self::TaskBreakdown { .. } => "task_breakdown",
            Self::TaskStart { .. } => "task_start",
            Self::Message { .. } => "message",
            Self::Action { .. } => "action",
            Self::TaskComplete { .. } => "task_complete",
            Self::TaskError { .. } => "task_error",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Canceled { .. } => "canceled",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Canceled { .. }
        )
    }
}

/// A timestamped event as delivered to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct StampedEvent {
    #[serde(flatten)]
    pub event: TaskEvent,
    pub timestamp: DateTime<Utc>,
}

/// Producer half of an event stream. Clone freely; all clones share the
/// same closed flag.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StampedEvent>,
    closed: Arc<AtomicBool>,
}

/// Consumer half of an event stream.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StampedEvent>,
}

/// Create a connected sink/stream pair.
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        EventStream { rx },
    )
}

impl EventSink {
    /// Emit an event. Returns `false` if the stream is closed or the
    /// consumer is gone; emission never blocks and never fails the task.
    pub fn emit(&self, event: TaskEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            trace!(event = event.name(), "dropping event after close");
            return false;
        }
        self.tx
            .send(StampedEvent {
                event,
                timestamp: Utc::now(),
            })
            .is_ok()
    }

    /// Emit a terminal event and close. The first close wins; later
    /// terminal events are dropped.
    pub fn finish(&self, event: TaskEvent) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            trace!(event = event.name(), "stream already closed");
            return false;
        }
        self.tx
            .send(StampedEvent {
                event,
                timestamp: Utc::now(),
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl EventStream {
    /// Receive the next event, or `None` when the stream is exhausted.
    pub async fn next(&mut self) -> Option<StampedEvent> {
        self.rx.recv().await
    }

    /// Drain whatever is ready right now (used in tests).
    pub fn drain_ready(&mut self) -> Vec<StampedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Encode one event as a server-sent-events frame.
pub fn sse_encode(event: &StampedEvent) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", event.event.name(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let (sink, mut stream) = channel();
        sink.emit(TaskEvent::Connected {
            task_id: "t1".into(),
        });
        sink.emit(TaskEvent::TaskStart {
            agent: "projectManager".into(),
            title: "plan".into(),
        });
        sink.finish(TaskEvent::Complete {
            result: json!({"ok": true}),
        });

        let names: Vec<&str> = stream
            .drain_ready()
            .iter()
            .map(|e| e.event.name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["connected", "task_start", "complete"]);
    }

    #[tokio::test]
    async fn test_nothing_is_emitted_after_close() {
        let (sink, mut stream) = channel();
        assert!(sink.finish(TaskEvent::Error {
            message: "boom".into()
        }));
        assert!(!sink.finish(TaskEvent::Complete { result: json!({}) }));
        assert!(!sink.emit(TaskEvent::Message {
            agent: "techLead".into(),
            turn: 1,
            content: "late".into()
        }));

        let events = stream.drain_ready();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.name(), "error");
    }

    #[tokio::test]
    async fn test_clones_share_the_closed_flag() {
        let (sink, _stream) = channel();
        let clone = sink.clone();
        sink.finish(TaskEvent::Canceled {
            task_id: "t1".into(),
        });
        assert!(clone.is_closed());
        assert!(!clone.emit(TaskEvent::Message {
            agent: "a".into(),
            turn: 1,
            content: "x".into()
        }));
    }

    #[test]
    fn test_sse_frame_shape() {
        let stamped = StampedEvent {
            event: TaskEvent::Intent {
                intent: "creation".into(),
                complexity: 0.4,
                confidence: 0.9,
                domains: vec!["api".into()],
            },
            timestamp: Utc::now(),
        };
        let frame = sse_encode(&stamped);
        assert!(frame.starts_with("event: intent\ndata: "));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"type\":\"intent\""));
    }

    #[test]
    fn test_emit_without_consumer_does_not_panic() {
        let (sink, stream) = channel();
        drop(stream);
        assert!(!sink.emit(TaskEvent::Connected {
            task_id: "t1".into()
        }));
    }
}
