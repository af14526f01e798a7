// SPDX-License-Identifier: MIT

//! Action registry
//!
//! Every invokable unit gets a stable `(kind, name)` identity, declared
//! input/output schemas, and a tracing span around each invocation. The
//! registry is append-only after startup; there is no removal.

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Instrument;

use crate::error::{FlowError, Result};
use crate::schema::Schema;

/// Namespace half of an action's identity
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Flow,
    Tool,
    Custom,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Flow => "flow",
            ActionKind::Tool => "tool",
            ActionKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ActionHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A named, schema-typed, traced unit of invokable logic
pub struct Action {
    pub kind: ActionKind,
    pub name: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub metadata: HashMap<String, Value>,
    handler: ActionHandler,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Action {
    pub fn new<F>(
        kind: ActionKind,
        name: impl Into<String>,
        input_schema: Schema,
        output_schema: Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        Self {
            kind,
            name: name.into(),
            input_schema,
            output_schema,
            metadata: HashMap::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate input, run the handler inside a tracing span, validate output.
    ///
    /// The span is emitted whether the handler succeeds or fails.
    pub async fn invoke(&self, input: Value) -> Result<Value> {
        self.input_schema.validate(&input)?;

        let span = tracing::info_span!(
            "action",
            kind = %self.kind,
            name = %self.name,
        );
        let output = async {
            let result = (self.handler)(input).await;
            match &result {
                Ok(_) => tracing::debug!("action completed"),
                Err(e) => tracing::warn!(error = %e, "action failed"),
            }
            result
        }
        .instrument(span)
        .await?;

        self.output_schema.validate(&output)?;
        Ok(output)
    }
}

/// Summary entry returned by `ActionRegistry::list`
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub kind: ActionKind,
    pub name: String,
    pub metadata: HashMap<String, Value>,
}

/// Process-wide mapping from `(kind, name)` to an action.
///
/// Constructed explicitly (one per engine, fresh per test) rather than held
/// as ambient global state.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Arc<RwLock<HashMap<(ActionKind, String), Arc<Action>>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; fails if the `(kind, name)` identity is taken
    pub async fn register(&self, action: Action) -> Result<Arc<Action>> {
        let mut actions = self.actions.write().await;
        let key = (action.kind, action.name.clone());
        if actions.contains_key(&key) {
            return Err(FlowError::DuplicateAction {
                kind: action.kind.to_string(),
                name: action.name,
            });
        }
        let action = Arc::new(action);
        actions.insert(key, action.clone());
        tracing::debug!(kind = %action.kind, name = %action.name, "registered action");
        Ok(action)
    }

    pub async fn lookup(&self, kind: ActionKind, name: &str) -> Option<Arc<Action>> {
        let actions = self.actions.read().await;
        actions.get(&(kind, name.to_string())).cloned()
    }

    pub async fn list(&self) -> Vec<ActionSummary> {
        let actions = self.actions.read().await;
        let mut summaries: Vec<ActionSummary> = actions
            .values()
            .map(|action| ActionSummary {
                kind: action.kind,
                name: action.name.clone(),
                metadata: action.metadata.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| (a.kind.as_str(), &a.name).cmp(&(b.kind.as_str(), &b.name)));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    fn echo_action(name: &str) -> Action {
        Action::new(
            ActionKind::Tool,
            name,
            Schema::string(),
            Schema::string(),
            |input| async move { Ok(input) }.boxed(),
        )
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = ActionRegistry::new();
        registry.register(echo_action("echo")).await.unwrap();

        let action = registry.lookup(ActionKind::Tool, "echo").await;
        assert!(action.is_some());
        assert!(registry.lookup(ActionKind::Tool, "missing").await.is_none());
        // Same name under a different kind is a different identity
        assert!(registry.lookup(ActionKind::Flow, "echo").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = ActionRegistry::new();
        registry.register(echo_action("echo")).await.unwrap();

        let err = registry.register(echo_action("echo")).await.unwrap_err();
        assert_eq!(err.kind(), "duplicate");
    }

    #[tokio::test]
    async fn invoke_validates_input_and_output() {
        let action = echo_action("echo");
        assert_eq!(action.invoke(json!("hi")).await.unwrap(), json!("hi"));

        let err = action.invoke(json!(42)).await.unwrap_err();
        assert_eq!(err.kind(), "validation");

        // Output side is validated symmetrically
        let lying = Action::new(
            ActionKind::Tool,
            "lying",
            Schema::any(),
            Schema::string(),
            |_| async move { Ok(json!(42)) }.boxed(),
        );
        let err = lying.invoke(json!(null)).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let failing = Action::new(
            ActionKind::Tool,
            "failing",
            Schema::any(),
            Schema::any(),
            |_| async move { Err(FlowError::from("boom")) }.boxed(),
        );
        let err = failing.invoke(json!(null)).await.unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[tokio::test]
    async fn list_is_sorted_and_carries_metadata() {
        let registry = ActionRegistry::new();
        registry
            .register(echo_action("b").with_metadata(HashMap::from([(
                "description".to_string(),
                json!("second"),
            )])))
            .await
            .unwrap();
        registry.register(echo_action("a")).await.unwrap();

        let listed = registry.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "a");
        assert_eq!(listed[1].metadata["description"], json!("second"));
    }
}
