// SPDX-License-Identifier: MIT

//! Typed error handling for duraflow-rs
//!
//! Every failure surfaced by the engine carries a stable `kind()` string
//! that the server maps to a status code and the CLI prints on exit.

use thiserror::Error;

use crate::state::{ErrorInfo, FlowStatus};

pub type Result<T> = std::result::Result<T, FlowError>;

/// Top-level error type for duraflow-rs
#[derive(Debug, Error)]
pub enum FlowError {
    /// Input or output value does not match the action's schema
    #[error("validation failed at `{path}`: {message}")]
    Validation { message: String, path: String },

    /// An action with the same (kind, name) identity is already registered
    #[error("action `{kind}/{name}` is already registered")]
    DuplicateAction { kind: String, name: String },

    /// Unknown flow name or run identifier
    #[error("{0} not found")]
    NotFound(String),

    /// Auth policy rejected the invocation before any step ran
    #[error("authorization rejected: {0}")]
    Auth(String),

    /// Resume attempted on a run that already finished
    #[error("run `{run_id}` is already {status}")]
    AlreadyTerminal { run_id: String, status: FlowStatus },

    /// Failure inside a memoized step; never cached, re-attempted on resume
    #[error("step `{name}` failed: {message}")]
    Step { name: String, message: String },

    /// Flow state store failure
    #[error("state store error: {0}")]
    Storage(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper for user-supplied flow bodies
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    /// Stable wire-level kind string for this error
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Validation { .. } => "validation",
            FlowError::DuplicateAction { .. } => "duplicate",
            FlowError::NotFound(_) => "not-found",
            FlowError::Auth(_) => "auth",
            FlowError::AlreadyTerminal { .. } => "already-terminal",
            FlowError::Step { .. } => "step",
            FlowError::Storage(_) => "storage",
            FlowError::Io(_) | FlowError::Json(_) | FlowError::Other(_) => "internal",
        }
    }

    /// Create a validation error rooted at the top of the value
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            path: "$".to_string(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Project this error into the wire-level `ErrorInfo` shape
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind().to_string(),
            message: self.to_string(),
            details: None,
        }
    }
}

impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(anyhow::anyhow!(s.to_string()))
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(anyhow::anyhow!(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(FlowError::validation("bad").kind(), "validation");
        assert_eq!(FlowError::NotFound("flow `x`".into()).kind(), "not-found");
        assert_eq!(FlowError::Auth("denied".into()).kind(), "auth");
        assert_eq!(FlowError::storage("disk gone").kind(), "storage");
        assert_eq!(
            FlowError::Step {
                name: "fetch".into(),
                message: "boom".into()
            }
            .kind(),
            "step"
        );
        assert_eq!(FlowError::from("oops").kind(), "internal");
    }

    #[test]
    fn error_info_carries_kind_and_message() {
        let err = FlowError::AlreadyTerminal {
            run_id: "r1".into(),
            status: FlowStatus::Succeeded,
        };
        let info = err.to_error_info();
        assert_eq!(info.kind, "already-terminal");
        assert!(info.message.contains("r1"));
        assert!(info.message.contains("succeeded"));
    }
}
