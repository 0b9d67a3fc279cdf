//! Design canvas collaborator contract.
//!
//! The orchestrator never owns canvas persistence; it talks to whatever
//! stores the canvas through the narrow [`CanvasStore`] trait. An in-memory
//! implementation is provided for tests and for callers that keep canvas
//! state alongside the task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CanvasError;

/// A component placed on the design canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Stable component id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Component kind (service, database, queue, ...). Free-form.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Position on the canvas.
    #[serde(default)]
    pub position: Position,
    /// Arbitrary component properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp, if the component was ever updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Canvas coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A directed connection between two components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Stable connection id.
    pub id: String,
    /// Source component id.
    pub from: String,
    /// Target component id.
    pub to: String,
    /// Optional edge label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Full canvas state as the orchestrator sees it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasState {
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CanvasState {
    /// Find a component by id.
    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }
}

/// External canvas collaborator.
///
/// `apply_update` merges a partial state (any subset of `components`,
/// `connections`, `metadata`) into the stored state and returns the updated
/// whole.
#[async_trait]
pub trait CanvasStore: Send + Sync {
    /// Fetch the current state, or `None` if the canvas does not exist.
    async fn get_state(&self, canvas_id: &str) -> Result<Option<CanvasState>, CanvasError>;

    /// Merge a partial state into the canvas and return the updated state.
    async fn apply_update(
        &self,
        canvas_id: &str,
        partial: Value,
    ) -> Result<CanvasState, CanvasError>;
}

/// In-memory canvas store.
///
/// Canvases are created implicitly on first update. Used in tests and by
/// callers that hold canvas state for the duration of one task.
#[derive(Default)]
pub struct InMemoryCanvas {
    canvases: RwLock<HashMap<String, CanvasState>>,
}

impl InMemoryCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a canvas with an initial state.
    pub fn seed(&self, canvas_id: impl Into<String>, state: CanvasState) {
        self.canvases.write().insert(canvas_id.into(), state);
    }
}

#[async_trait]
impl CanvasStore for InMemoryCanvas {
    async fn get_state(&self, canvas_id: &str) -> Result<Option<CanvasState>, CanvasError> {
        Ok(self.canvases.read().get(canvas_id).cloned())
    }

    async fn apply_update(
        &self,
        canvas_id: &str,
        partial: Value,
    ) -> Result<CanvasState, CanvasError> {
        let partial = match partial {
            Value::Object(map) => map,
            other => {
                return Err(CanvasError::InvalidUpdate(format!(
                    "expected object, got {}",
                    value_kind(&other)
                )))
            }
        };

        let mut canvases = self.canvases.write();
        let state = canvases.entry(canvas_id.to_string()).or_default();
        merge_partial(state, partial)?;
        Ok(state.clone())
    }
}

/// Merge the recognized top-level keys of a partial update into `state`.
/// Unknown keys land in `metadata` so nothing an agent produces is lost.
fn merge_partial(state: &mut CanvasState, partial: Map<String, Value>) -> Result<(), CanvasError> {
    for (key, value) in partial {
        match key.as_str() {
            "components" => {
                state.components = serde_json::from_value(value)
                    .map_err(|e| CanvasError::InvalidUpdate(e.to_string()))?;
            }
            "connections" => {
                state.connections = serde_json::from_value(value)
                    .map_err(|e| CanvasError::InvalidUpdate(e.to_string()))?;
            }
            "metadata" => {
                if let Value::Object(map) = value {
                    state.metadata.extend(map);
                }
            }
            _ => {
                state.metadata.insert(key, value);
            }
        }
    }
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convenience alias used throughout the engine.
pub type SharedCanvas = Arc<dyn CanvasStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_canvas_returns_none() {
        let store = InMemoryCanvas::new();
        assert!(store.get_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_update_creates_and_merges() {
        let store = InMemoryCanvas::new();
        let updated = store
            .apply_update(
                "c1",
                json!({
                    "components": [{
                        "id": "comp-1",
                        "name": "Cache",
                        "type": "cache",
                        "createdAt": Utc::now(),
                    }],
                    "metadata": {"title": "Checkout flow"},
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.components.len(), 1);
        assert_eq!(updated.components[0].name, "Cache");
        assert_eq!(updated.metadata["title"], "Checkout flow");

        // A second partial update leaves existing fields alone.
        let updated = store
            .apply_update("c1", json!({"metadata": {"owner": "alice"}}))
            .await
            .unwrap();
        assert_eq!(updated.components.len(), 1);
        assert_eq!(updated.metadata["title"], "Checkout flow");
        assert_eq!(updated.metadata["owner"], "alice");
    }

    #[tokio::test]
    async fn test_non_object_update_rejected() {
        let store = InMemoryCanvas::new();
        let err = store.apply_update("c1", json!([1, 2, 3])).await.unwrap_err();
        assert!(err.to_string().contains("array"));
    }
}
