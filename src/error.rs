//! Error types for the orchestration engine.
//!
//! The failure taxonomy distinguishes errors that are recovered locally
//! (classification falling back to heuristics, directive parse errors) from
//! errors that surface as partial-task failures (backend quota/timeout after
//! one credential rotation) and the single fatal case where classification
//! and every selected agent fail.

use thiserror::Error;

/// Errors surfaced by the generative backend client.
///
/// `QuotaExceeded` and `AuthRejected` are credential errors: the client marks
/// the active credential as cooling down, rotates, and retries once before
/// returning them to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The active credential hit its quota.
    #[error("backend quota exceeded")]
    QuotaExceeded,

    /// The active credential was rejected.
    #[error("backend rejected credential")]
    AuthRejected,

    /// The call did not complete within its timeout.
    #[error("backend call timed out after {0}s")]
    Timeout(u64),

    /// The backend answered but the payload was not usable.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// The backend could not be reached at all.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// No credential is currently usable (all slots cooling down).
    #[error("no usable backend credential")]
    NoCredential,
}

impl BackendError {
    /// Whether rotating to another credential may help.
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::AuthRejected)
    }
}

/// Errors raised while parsing or executing action directives.
///
/// Directive failures are never fatal to the conversation loop; they are
/// logged and recorded in the turn's outcome list.
#[derive(Debug, Clone, Error)]
pub enum DirectiveError {
    /// The embedded JSON object could not be parsed.
    #[error("malformed directive payload: {0}")]
    Parse(String),

    /// The directive type is not one the executor recognizes.
    #[error("unknown directive type: {0}")]
    UnknownType(String),

    /// The canvas collaborator rejected the mutation.
    #[error("canvas update failed: {0}")]
    Canvas(String),
}

/// Errors from the canvas collaborator.
#[derive(Debug, Clone, Error)]
pub enum CanvasError {
    /// No canvas exists under the given id.
    #[error("canvas not found: {0}")]
    NotFound(String),

    /// The partial state could not be merged.
    #[error("invalid canvas update: {0}")]
    InvalidUpdate(String),
}

/// Errors from agent selection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    /// A name that does not map to any registered agent role.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
}

/// Top-level orchestration errors.
///
/// Partial results are always preferred over total failure; `Fatal` is only
/// produced when classification degraded *and* every agent path failed.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Classification and all selected agents failed.
    #[error("orchestration failed: {0}")]
    Fatal(String),

    /// The task was canceled by the caller.
    #[error("task canceled")]
    Canceled,

    /// A backend error that could not be reduced to a partial result.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_are_rotatable() {
        assert!(BackendError::QuotaExceeded.is_credential_error());
        assert!(BackendError::AuthRejected.is_credential_error());
        assert!(!BackendError::Timeout(30).is_credential_error());
        assert!(!BackendError::Unavailable("down".into()).is_credential_error());
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::Timeout(30);
        assert_eq!(err.to_string(), "backend call timed out after 30s");
        let err = SelectionError::UnknownAgent("wizard".into());
        assert_eq!(err.to_string(), "unknown agent: wizard");
    }
}
