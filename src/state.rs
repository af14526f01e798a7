// SPDX-License-Identifier: MIT

//! Durable execution state for flow runs
//!
//! A `FlowState` is the single persisted record for one run identifier.
//! The step cache inside it only ever grows; status transitions are
//! monotonic (`running` can end in `succeeded`, `failed` or `interrupted`,
//! and a terminal status is never left).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{FlowError, Result};

/// Execution status of a flow run
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Running,
    Succeeded,
    Failed,
    Interrupted,
}

impl FlowStatus {
    /// Succeeded and failed runs are finished; interrupted runs can resume
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowStatus::Succeeded | FlowStatus::Failed)
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowStatus::Running => "running",
            FlowStatus::Succeeded => "succeeded",
            FlowStatus::Failed => "failed",
            FlowStatus::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Structured error carried by a failed run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// One memoized step result; insertion order is first-execution order
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub value: Value,
}

/// Persisted state of one flow run lineage
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub run_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub input: Value,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    pub status: FlowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Continuation token recorded when the flow interrupts itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<Value>,
}

impl FlowState {
    pub fn new(run_id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            run_id: run_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            input,
            steps: Vec::new(),
            status: FlowStatus::Running,
            output: None,
            error: None,
            pending: None,
        }
    }

    /// Look up a memoized step result
    pub fn cached(&self, step: &str) -> Option<&Value> {
        self.steps
            .iter()
            .find(|record| record.name == step)
            .map(|record| &record.value)
    }

    /// Record a step result; a name maps to at most one value per lineage
    pub fn record(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        if self.cached(&name).is_some() {
            return Err(FlowError::Validation {
                message: format!("step `{}` already recorded for this run", name),
                path: "$".to_string(),
            });
        }
        self.steps.push(StepRecord { name, value });
        Ok(())
    }

    fn guard_not_terminal(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(FlowError::AlreadyTerminal {
                run_id: self.run_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Transition to `succeeded` with the flow's output
    pub fn finish_success(&mut self, output: Value) -> Result<()> {
        self.guard_not_terminal()?;
        self.status = FlowStatus::Succeeded;
        self.output = Some(output);
        self.pending = None;
        Ok(())
    }

    /// Transition to `failed` with a structured error
    pub fn finish_failure(&mut self, error: ErrorInfo) -> Result<()> {
        self.guard_not_terminal()?;
        self.status = FlowStatus::Failed;
        self.error = Some(error);
        self.pending = None;
        Ok(())
    }

    /// Suspend awaiting external resumption, keeping a continuation token
    pub fn interrupt(&mut self, token: Value) -> Result<()> {
        self.guard_not_terminal()?;
        self.status = FlowStatus::Interrupted;
        self.pending = Some(token);
        Ok(())
    }

    /// Re-enter a suspended or recovered run
    pub fn reopen(&mut self) -> Result<()> {
        self.guard_not_terminal()?;
        self.status = FlowStatus::Running;
        Ok(())
    }

    /// Caller-visible projection; computed fresh on every read
    pub fn operation(&self) -> Operation {
        let mut metadata = HashMap::new();
        metadata.insert("name".to_string(), Value::String(self.name.clone()));
        metadata.insert(
            "status".to_string(),
            Value::String(self.status.to_string()),
        );
        Operation {
            id: self.run_id.clone(),
            done: self.status.is_terminal(),
            result: self.output.clone(),
            error: self.error.clone(),
            metadata,
        }
    }
}

/// Wire-level status/result projection of a flow run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Operation {
    /// Operation shape for an invocation that failed before any state existed
    pub fn from_error(id: impl Into<String>, error: &FlowError) -> Self {
        Self {
            id: id.into(),
            done: true,
            result: None,
            error: Some(error.to_error_info()),
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_cache_grows_and_never_rewrites() {
        let mut state = FlowState::new("r1", "greet", json!("Ada"));
        state.record("build", json!("Hello, Ada")).unwrap();
        assert_eq!(state.cached("build"), Some(&json!("Hello, Ada")));

        // Same name again is rejected; the recorded value is untouched
        let err = state.record("build", json!("other")).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(state.cached("build"), Some(&json!("Hello, Ada")));
        assert_eq!(state.steps.len(), 1);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let mut state = FlowState::new("r1", "greet", json!(null));
        assert_eq!(state.status, FlowStatus::Running);

        state.interrupt(json!({"wait": "approval"})).unwrap();
        assert_eq!(state.status, FlowStatus::Interrupted);
        assert!(!state.status.is_terminal());

        state.reopen().unwrap();
        state.finish_success(json!("done")).unwrap();
        assert!(state.status.is_terminal());

        assert!(state.finish_failure(ErrorInfo {
            kind: "step".into(),
            message: "late".into(),
            details: None,
        })
        .is_err());
        assert!(state.interrupt(json!(null)).is_err());
        assert!(state.reopen().is_err());
        assert_eq!(state.status, FlowStatus::Succeeded);
    }

    #[test]
    fn operation_done_tracks_terminal_status() {
        let mut state = FlowState::new("r1", "greet", json!(null));
        assert!(!state.operation().done);

        state.interrupt(json!("token")).unwrap();
        assert!(!state.operation().done);

        state.reopen().unwrap();
        state.finish_success(json!("out")).unwrap();
        let op = state.operation();
        assert!(op.done);
        assert_eq!(op.result, Some(json!("out")));
        assert_eq!(op.metadata["status"], json!("succeeded"));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = FlowState::new("r1", "greet", json!({"who": "Ada"}));
        state.record("build", json!("Hello")).unwrap();
        state.interrupt(json!({"token": 7})).unwrap();

        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: FlowState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.run_id, "r1");
        assert_eq!(decoded.status, FlowStatus::Interrupted);
        assert_eq!(decoded.cached("build"), Some(&json!("Hello")));
        assert_eq!(decoded.pending, Some(json!({"token": 7})));
    }
}
