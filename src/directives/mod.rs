//! Action directives embedded in generated text.
//!
//! Agents mutate the design canvas by emitting `ACTION: {"type": ...,
//! "data": {...}}` objects anywhere in their responses. The [`parser`]
//! recognizes them incrementally across arbitrary chunk boundaries; the
//! [`executor`] applies recognized directives to the canvas collaborator.

pub mod executor;
pub mod parser;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use executor::{DirectiveExecutor, DirectiveOutcome};
pub use parser::{DirectiveScanner, ScanOutput};

/// Marker that introduces a directive in generated text.
pub const DIRECTIVE_MARKER: &str = "ACTION:";

/// The mutation kinds the executor recognizes.
///
/// Unrecognized type strings parse into [`DirectiveKind::Other`]; they are
/// skipped at execution time, never dropped at parse time, so the round-trip
/// through the grammar is lossless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    CanvasUpdate,
    AddComponent,
    UpdateComponent,
    RemoveComponent,
    AddConnection,
    UpdateMetadata,
    #[serde(untagged)]
    Other(String),
}

impl DirectiveKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CanvasUpdate => "canvas_update",
            Self::AddComponent => "add_component",
            Self::UpdateComponent => "update_component",
            Self::RemoveComponent => "remove_component",
            Self::AddConnection => "add_connection",
            Self::UpdateMetadata => "update_metadata",
            Self::Other(s) => s,
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "canvas_update" => Self::CanvasUpdate,
            "add_component" => Self::AddComponent,
            "update_component" => Self::UpdateComponent,
            "remove_component" => Self::RemoveComponent,
            "add_connection" => Self::AddConnection,
            "update_metadata" => Self::UpdateMetadata,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One state-mutation directive extracted from generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDirective {
    /// Directive type.
    #[serde(rename = "type")]
    pub kind: DirectiveKind,
    /// Type-specific payload.
    pub data: Map<String, Value>,
}

impl ActionDirective {
    pub fn new(kind: DirectiveKind, data: Map<String, Value>) -> Self {
        Self { kind, data }
    }

    /// Serialize into the embedded-text grammar.
    pub fn to_grammar(&self) -> String {
        let body = serde_json::json!({
            "type": self.kind.as_str(),
            "data": Value::Object(self.data.clone()),
        });
        format!("{} {}", DIRECTIVE_MARKER, body)
    }

    /// Validate a parsed JSON object as a directive.
    ///
    /// Requires a string `type` and an object `data`; anything else is
    /// rejected so malformed directives are discarded before execution.
    pub fn from_value(value: Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = object.get("type")?.as_str()?;
        let data = object.get("data")?.as_object()?.clone();
        Some(Self {
            kind: DirectiveKind::from_label(kind),
            data,
        })
    }
}
