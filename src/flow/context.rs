// SPDX-License-Identifier: MIT

//! Per-invocation step executor
//!
//! A `FlowContext` is bound to exactly one run's `FlowState`. Steps run at
//! most once per lineage: a cached name replays without invoking its
//! function, which is what makes resumption safe for side-effecting steps.
//! State is persisted after every recorded step.

use futures::Future;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

use super::FlowEvent;
use crate::auth::AuthContext;
use crate::error::{FlowError, Result};
use crate::registry::Action;
use crate::state::FlowState;
use crate::store::FlowStateStore;

struct ContextInner {
    state: Mutex<FlowState>,
    /// Step names issued during this invocation; reuse is a caller bug
    seen: std::sync::Mutex<HashSet<String>>,
    store: Arc<dyn FlowStateStore>,
    chunks: Option<mpsc::Sender<FlowEvent>>,
    chunk_index: AtomicUsize,
    auth: Option<AuthContext>,
    resume: Option<Value>,
    pending: Option<Value>,
}

/// Handle a flow body uses to run memoized steps and emit stream chunks
#[derive(Clone)]
pub struct FlowContext {
    inner: Arc<ContextInner>,
}

impl FlowContext {
    pub(crate) fn new(
        state: FlowState,
        store: Arc<dyn FlowStateStore>,
        chunks: Option<mpsc::Sender<FlowEvent>>,
        auth: Option<AuthContext>,
        resume: Option<Value>,
    ) -> Self {
        let pending = state.pending.clone();
        Self {
            inner: Arc::new(ContextInner {
                state: Mutex::new(state),
                seen: std::sync::Mutex::new(HashSet::new()),
                store,
                chunks,
                chunk_index: AtomicUsize::new(0),
                auth,
                resume,
                pending,
            }),
        }
    }

    pub async fn run_id(&self) -> String {
        self.inner.state.lock().await.run_id.clone()
    }

    /// Credentials of the current caller; never persisted
    pub fn auth(&self) -> Option<&AuthContext> {
        self.inner.auth.as_ref()
    }

    /// Payload supplied to `resume_flow`, if this invocation is a resume
    pub fn resume_payload(&self) -> Option<&Value> {
        self.inner.resume.as_ref()
    }

    /// Continuation token recorded by a prior interruption
    pub fn pending_token(&self) -> Option<&Value> {
        self.inner.pending.as_ref()
    }

    /// Run a named step at most once per run lineage.
    ///
    /// On a cache hit `f` is not invoked. On a miss the result is recorded
    /// and the state persisted before returning. A failure is not cached, so
    /// a resumed invocation re-attempts exactly the failing step.
    pub async fn run<F, Fut>(&self, name: &str, f: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send,
    {
        {
            let mut seen = self.inner.seen.lock().expect("seen set poisoned");
            if !seen.insert(name.to_string()) {
                return Err(FlowError::Validation {
                    message: format!("step `{}` issued twice in one invocation", name),
                    path: "$".to_string(),
                });
            }
        }

        let replay = {
            let state = self.inner.state.lock().await;
            state.cached(name).cloned()
        };
        if let Some(value) = replay {
            tracing::debug!(step = name, "replaying memoized step");
            return Ok(value);
        }

        let span = tracing::info_span!("step", name = name);
        let value = f().instrument(span).await.map_err(|e| match e {
            // Keep the original failing step's identity on nested failures
            err @ FlowError::Step { .. } => err,
            other => FlowError::Step {
                name: name.to_string(),
                message: other.to_string(),
            },
        })?;

        {
            let mut state = self.inner.state.lock().await;
            state.record(name, value.clone())?;
        }
        self.persist().await?;
        Ok(value)
    }

    /// Memoized invocation of a registered action
    pub async fn run_action(&self, name: &str, action: &Action, input: Value) -> Result<Value> {
        self.run(name, || action.invoke(input)).await
    }

    /// Fan a step out over `items`, one derived step per element (`name[i]`).
    ///
    /// Elements execute concurrently; the merged result preserves input
    /// order. Partially completed fan-outs resume only unfinished elements.
    /// Element identity is positional, so the input order must be stable
    /// across resumptions of the same run.
    pub async fn run_map<F, Fut>(&self, name: &str, items: Vec<Value>, f: F) -> Result<Vec<Value>>
    where
        F: Fn(usize, Value) -> Fut + Sync,
        Fut: Future<Output = Result<Value>> + Send,
    {
        let f = &f;
        let elements = items.into_iter().enumerate().map(|(index, item)| {
            let step = format!("{name}[{index}]");
            async move { self.run(&step, move || f(index, item)).await }
        });
        futures::future::try_join_all(elements).await
    }

    /// Emit a streaming chunk; a no-op when the caller did not open a stream.
    ///
    /// Delivery stops silently once the caller abandons the stream.
    pub async fn emit(&self, content: Value) {
        if let Some(tx) = &self.inner.chunks {
            let index = self.inner.chunk_index.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(FlowEvent::Chunk { index, content }).await;
        }
    }

    pub(crate) async fn with_state<R>(&self, f: impl FnOnce(&mut FlowState) -> R) -> R {
        let mut state = self.inner.state.lock().await;
        f(&mut state)
    }

    /// Whole-state overwrite into the store
    pub(crate) async fn persist(&self) -> Result<()> {
        let snapshot = self.inner.state.lock().await.clone();
        self.inner.store.save(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn context(store: Arc<dyn FlowStateStore>) -> FlowContext {
        let state = FlowState::new("r1", "test", json!(null));
        FlowContext::new(state, store, None, None, None)
    }

    #[tokio::test]
    async fn steps_are_memoized_and_persisted() {
        let store = Arc::new(MemoryStateStore::new());
        let ctx = context(store.clone());

        let calls = AtomicUsize::new(0);
        let value = ctx
            .run("build", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!("made"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!("made"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Persisted after the step
        let saved = store.load("r1").await.unwrap().unwrap();
        assert_eq!(saved.cached("build"), Some(&json!("made")));
    }

    #[tokio::test]
    async fn cached_step_replays_without_invoking() {
        let store = Arc::new(MemoryStateStore::new());
        let mut state = FlowState::new("r1", "test", json!(null));
        state.record("build", json!("earlier")).unwrap();
        let ctx = FlowContext::new(state, store, None, None, None);

        // If the function ran it would fail; the cached value replays instead
        let value = ctx
            .run("build", || async { Err(FlowError::from("must not run")) })
            .await
            .unwrap();
        assert_eq!(value, json!("earlier"));
    }

    #[tokio::test]
    async fn duplicate_step_name_in_one_invocation_is_rejected() {
        let store = Arc::new(MemoryStateStore::new());
        let ctx = context(store);

        ctx.run("once", || async { Ok(json!(1)) }).await.unwrap();
        let err = ctx
            .run("once", || async { Ok(json!(2)) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let store = Arc::new(MemoryStateStore::new());
        let ctx = context(store.clone());

        let err = ctx
            .run("flaky", || async { Err(FlowError::from("transient")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "step");

        let saved = store.load("r1").await.unwrap();
        assert!(saved.is_none() || saved.unwrap().cached("flaky").is_none());
    }

    #[tokio::test]
    async fn run_map_preserves_order_and_memoizes_per_element() {
        let store = Arc::new(MemoryStateStore::new());
        let ctx = context(store.clone());

        let items: Vec<Value> = (0..5).map(|i| json!(i)).collect();
        let doubled = ctx
            .run_map("double", items.clone(), |_, item| async move {
                Ok(json!(item.as_i64().unwrap() * 2))
            })
            .await
            .unwrap();
        assert_eq!(doubled, vec![json!(0), json!(2), json!(4), json!(6), json!(8)]);

        let saved = store.load("r1").await.unwrap().unwrap();
        assert_eq!(saved.cached("double[3]"), Some(&json!(6)));
        assert_eq!(saved.steps.len(), 5);
    }

    #[tokio::test]
    async fn emit_without_stream_is_a_noop() {
        let store = Arc::new(MemoryStateStore::new());
        let ctx = context(store);
        ctx.emit(json!("dropped")).await;
    }
}
