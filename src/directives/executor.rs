//! Applies parsed directives to the canvas collaborator.
//!
//! Execution is total: every directive produces a [`DirectiveOutcome`], and a
//! failed or unrecognized directive never aborts the conversation that
//! produced it. Outcomes carry enough detail for the event stream and the
//! final task report.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ActionDirective, DirectiveKind};
use crate::canvas::{Component, Connection, Position, SharedCanvas};
use crate::error::{CanvasError, DirectiveError};

/// Result of applying one directive.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveOutcome {
    /// The directive's type label.
    pub directive_type: String,
    /// Whether the canvas was mutated.
    pub success: bool,
    /// Human-readable result summary.
    pub message: String,
    /// Type-specific detail (created ids, updated state summary).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// When the directive was applied.
    pub timestamp: DateTime<Utc>,
}

impl DirectiveOutcome {
    fn success(kind: &DirectiveKind, message: impl Into<String>, detail: Option<Value>) -> Self {
        Self {
            directive_type: kind.as_str().to_string(),
            success: true,
            message: message.into(),
            detail,
            timestamp: Utc::now(),
        }
    }

    fn failure(kind: &DirectiveKind, message: impl Into<String>) -> Self {
        Self {
            directive_type: kind.as_str().to_string(),
            success: false,
            message: message.into(),
            detail: None,
            timestamp: Utc::now(),
        }
    }
}

/// Executes directives against one canvas.
///
/// One executor is shared by every agent working on a task. Component and
/// connection edits read the current state and write it back, so the write
/// gate holds across that pair; without it, concurrent agents lose updates.
#[derive(Clone)]
pub struct DirectiveExecutor {
    canvas: SharedCanvas,
    canvas_id: String,
    write_gate: Arc<Mutex<()>>,
}

impl DirectiveExecutor {
    pub fn new(canvas: SharedCanvas, canvas_id: impl Into<String>) -> Self {
        Self {
            canvas,
            canvas_id: canvas_id.into(),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    /// Apply every directive in order, collecting one outcome each.
    pub async fn execute_all(&self, directives: &[ActionDirective]) -> Vec<DirectiveOutcome> {
        let mut outcomes = Vec::with_capacity(directives.len());
        for directive in directives {
            outcomes.push(self.execute(directive).await);
        }
        outcomes
    }

    /// Apply one directive. Never returns an error: failures become
    /// unsuccessful outcomes.
    pub async fn execute(&self, directive: &ActionDirective) -> DirectiveOutcome {
        debug!(kind = directive.kind.as_str(), "executing directive");
        // Held across the handler's get_state/apply_update pair.
        let _write = self.write_gate.lock().await;
        let result = match &directive.kind {
            DirectiveKind::CanvasUpdate => self.canvas_update(&directive.data).await,
            DirectiveKind::AddComponent => self.add_component(&directive.data).await,
            DirectiveKind::UpdateComponent => self.update_component(&directive.data).await,
            DirectiveKind::RemoveComponent => self.remove_component(&directive.data).await,
            DirectiveKind::AddConnection => self.add_connection(&directive.data).await,
            DirectiveKind::UpdateMetadata => self.update_metadata(&directive.data).await,
            DirectiveKind::Other(label) => {
                let err = DirectiveError::UnknownType(label.clone());
                warn!(%err, "skipping directive");
                return DirectiveOutcome::failure(&directive.kind, err.to_string());
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = DirectiveError::Canvas(err.to_string());
                warn!(kind = directive.kind.as_str(), %err, "directive failed");
                DirectiveOutcome::failure(&directive.kind, err.to_string())
            }
        }
    }

    async fn canvas_update(
        &self,
        data: &Map<String, Value>,
    ) -> Result<DirectiveOutcome, CanvasError> {
        let state = self
            .canvas
            .apply_update(&self.canvas_id, Value::Object(data.clone()))
            .await?;
        Ok(DirectiveOutcome::success(
            &DirectiveKind::CanvasUpdate,
            "canvas updated",
            Some(json!({
                "components": state.components.len(),
                "connections": state.connections.len(),
            })),
        ))
    }

    async fn add_component(
        &self,
        data: &Map<String, Value>,
    ) -> Result<DirectiveOutcome, CanvasError> {
        let name = string_field(data, "name").unwrap_or_else(|| "Unnamed".to_string());
        let component = Component {
            id: string_field(data, "id").unwrap_or_else(new_id),
            name: name.clone(),
            kind: string_field(data, "type").unwrap_or_default(),
            position: data
                .get("position")
                .and_then(|v| serde_json::from_value::<Position>(v.clone()).ok())
                .unwrap_or_default(),
            properties: data
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            created_at: Utc::now(),
            updated_at: None,
        };
        let id = component.id.clone();

        let mut state = self.current_state().await?;
        state.components.push(component);
        self.canvas
            .apply_update(
                &self.canvas_id,
                json!({"components": state.components}),
            )
            .await?;

        Ok(DirectiveOutcome::success(
            &DirectiveKind::AddComponent,
            format!("added component '{name}'"),
            Some(json!({"id": id})),
        ))
    }

    async fn update_component(
        &self,
        data: &Map<String, Value>,
    ) -> Result<DirectiveOutcome, CanvasError> {
        let id = string_field(data, "id")
            .ok_or_else(|| CanvasError::InvalidUpdate("update_component requires an id".into()))?;

        let mut state = self.current_state().await?;
        let component = state
            .components
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| CanvasError::NotFound(id.clone()))?;

        if let Some(name) = string_field(data, "name") {
            component.name = name;
        }
        if let Some(kind) = string_field(data, "type") {
            component.kind = kind;
        }
        if let Some(position) = data
            .get("position")
            .and_then(|v| serde_json::from_value::<Position>(v.clone()).ok())
        {
            component.position = position;
        }
        if let Some(properties) = data.get("properties").and_then(Value::as_object) {
            component.properties.extend(properties.clone());
        }
        component.updated_at = Some(Utc::now());

        self.canvas
            .apply_update(
                &self.canvas_id,
                json!({"components": state.components}),
            )
            .await?;

        Ok(DirectiveOutcome::success(
            &DirectiveKind::UpdateComponent,
            format!("updated component '{id}'"),
            Some(json!({"id": id})),
        ))
    }

    async fn remove_component(
        &self,
        data: &Map<String, Value>,
    ) -> Result<DirectiveOutcome, CanvasError> {
        let id = string_field(data, "id")
            .ok_or_else(|| CanvasError::InvalidUpdate("remove_component requires an id".into()))?;

        let mut state = self.current_state().await?;
        let before = state.components.len();
        state.components.retain(|c| c.id != id);
        if state.components.len() == before {
            return Err(CanvasError::NotFound(id));
        }
        // Connections touching the removed component go with it.
        state.connections.retain(|c| c.from != id && c.to != id);

        self.canvas
            .apply_update(
                &self.canvas_id,
                json!({
                    "components": state.components,
                    "connections": state.connections,
                }),
            )
            .await?;

        Ok(DirectiveOutcome::success(
            &DirectiveKind::RemoveComponent,
            format!("removed component '{id}'"),
            None,
        ))
    }

    async fn add_connection(
        &self,
        data: &Map<String, Value>,
    ) -> Result<DirectiveOutcome, CanvasError> {
        let from = string_field(data, "from")
            .ok_or_else(|| CanvasError::InvalidUpdate("add_connection requires 'from'".into()))?;
        let to = string_field(data, "to")
            .ok_or_else(|| CanvasError::InvalidUpdate("add_connection requires 'to'".into()))?;

        let connection = Connection {
            id: string_field(data, "id").unwrap_or_else(new_id),
            from: from.clone(),
            to: to.clone(),
            label: string_field(data, "label"),
        };
        let id = connection.id.clone();

        let mut state = self.current_state().await?;
        state.connections.push(connection);
        self.canvas
            .apply_update(
                &self.canvas_id,
                json!({"connections": state.connections}),
            )
            .await?;

        Ok(DirectiveOutcome::success(
            &DirectiveKind::AddConnection,
            format!("connected '{from}' to '{to}'"),
            Some(json!({"id": id})),
        ))
    }

    async fn update_metadata(
        &self,
        data: &Map<String, Value>,
    ) -> Result<DirectiveOutcome, CanvasError> {
        self.canvas
            .apply_update(
                &self.canvas_id,
                json!({"metadata": Value::Object(data.clone())}),
            )
            .await?;
        Ok(DirectiveOutcome::success(
            &DirectiveKind::UpdateMetadata,
            "metadata updated",
            None,
        ))
    }

    async fn current_state(&self) -> Result<crate::canvas::CanvasState, CanvasError> {
        Ok(self
            .canvas
            .get_state(&self.canvas_id)
            .await?
            .unwrap_or_default())
    }
}

fn string_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}
