// SPDX-License-Identifier: MIT

//! Durable, resumable flows
//!
//! A flow is an action with durable-state semantics layered on top: every
//! run has persisted state keyed by a run identifier, its steps are
//! memoized, and an interrupted run can be resumed later, possibly from a
//! different process.

mod context;

pub use context::FlowContext;

use futures::future::BoxFuture;
use futures::{Future, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::{AuthContext, AuthPolicy};
use crate::error::{FlowError, Result};
use crate::registry::{Action, ActionKind, ActionRegistry, ActionSummary};
use crate::schema::Schema;
use crate::state::{FlowState, Operation};
use crate::store::{FlowStateStore, ListFilter, ListPage};

/// How a flow body finished one invocation
pub enum FlowOutcome {
    /// The flow produced its output
    Complete(Value),
    /// The flow suspends awaiting external resumption; the token is
    /// persisted and handed back to the body on `resume_flow`
    Pending { token: Value },
}

impl FlowOutcome {
    pub fn complete(value: impl Into<Value>) -> Self {
        Self::Complete(value.into())
    }

    pub fn pending(token: impl Into<Value>) -> Self {
        Self::Pending {
            token: token.into(),
        }
    }
}

/// Frame delivered on a streaming invocation: chunks, then one final
/// operation
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum FlowEvent {
    Chunk { index: usize, content: Value },
    Done(Operation),
}

/// Per-invocation options
#[derive(Clone, Default)]
pub struct FlowInvokeOptions {
    /// Reuse an existing run lineage instead of opening a new one
    pub run_id: Option<String>,
    pub auth: Option<AuthContext>,
}

impl FlowInvokeOptions {
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// Registration-time configuration of a flow
pub struct FlowConfig {
    pub name: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub auth_policy: Option<Arc<dyn AuthPolicy>>,
    pub metadata: HashMap<String, Value>,
}

impl FlowConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_schema: Schema::any(),
            output_schema: Schema::any(),
            auth_policy: None,
            metadata: HashMap::new(),
        }
    }

    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn auth_policy(mut self, policy: impl AuthPolicy + 'static) -> Self {
        self.auth_policy = Some(Arc::new(policy));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FlowError::validation("flow name must not be empty"));
        }
        Ok(())
    }
}

type FlowBody = Arc<dyn Fn(Value, FlowContext) -> BoxFuture<'static, Result<FlowOutcome>> + Send + Sync>;

/// A registered flow: body plus schemas and auth policy
pub struct Flow {
    pub name: String,
    input_schema: Schema,
    output_schema: Schema,
    auth_policy: Option<Arc<dyn AuthPolicy>>,
    body: FlowBody,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Flow {
    /// One durable invocation: resolve the run, enforce auth, execute the
    /// body with a bound step executor, persist the terminal transition.
    async fn execute(
        &self,
        store: Arc<dyn FlowStateStore>,
        input: Value,
        opts: FlowInvokeOptions,
        chunks: Option<mpsc::Sender<FlowEvent>>,
        resume: Option<Value>,
    ) -> Result<Operation> {
        self.input_schema.validate(&input)?;

        // Auth runs before any state is touched and is never retried
        if let Some(policy) = &self.auth_policy {
            policy
                .authorize(opts.auth.as_ref(), &input)
                .map_err(FlowError::Auth)?;
        }

        let run_id = opts
            .run_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let state = match store.load(&run_id).await? {
            Some(existing) => {
                if existing.name != self.name {
                    return Err(FlowError::validation(format!(
                        "run `{}` belongs to flow `{}`",
                        run_id, existing.name
                    )));
                }
                if existing.status.is_terminal() {
                    if resume.is_some() {
                        return Err(FlowError::AlreadyTerminal {
                            run_id,
                            status: existing.status,
                        });
                    }
                    // Re-running a finished run replays its recorded outcome
                    return Ok(existing.operation());
                }
                let mut existing = existing;
                existing.reopen()?;
                existing
            }
            None => FlowState::new(run_id.clone(), self.name.clone(), input.clone()),
        };
        store.save(&state).await?;

        let ctx = FlowContext::new(state, store, chunks, opts.auth, resume);
        let span = tracing::info_span!("flow", name = %self.name, run_id = %run_id);
        let outcome = (self.body)(input, ctx.clone()).instrument(span).await;

        match outcome {
            Ok(FlowOutcome::Complete(output)) => {
                if let Err(invalid) = self.output_schema.validate(&output) {
                    ctx.with_state(|s| s.finish_failure(invalid.to_error_info()))
                        .await?;
                    ctx.persist().await?;
                    return Err(invalid);
                }
                ctx.with_state(|s| s.finish_success(output)).await?;
                ctx.persist().await?;
            }
            Ok(FlowOutcome::Pending { token }) => {
                tracing::info!(name = %self.name, run_id = %run_id, "flow interrupted");
                ctx.with_state(|s| s.interrupt(token)).await?;
                ctx.persist().await?;
            }
            Err(e) => {
                tracing::warn!(name = %self.name, run_id = %run_id, error = %e, "flow failed");
                ctx.with_state(|s| s.finish_failure(e.to_error_info()))
                    .await?;
                ctx.persist().await?;
            }
        }

        Ok(ctx.with_state(|s| s.operation()).await)
    }
}

/// Owns the action registry, the state store and all registered flows
pub struct FlowEngine {
    registry: ActionRegistry,
    store: Arc<dyn FlowStateStore>,
    flows: RwLock<HashMap<String, Arc<Flow>>>,
}

impl FlowEngine {
    pub fn new(store: Arc<dyn FlowStateStore>) -> Self {
        Self {
            registry: ActionRegistry::new(),
            store,
            flows: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn FlowStateStore> {
        self.store.clone()
    }

    /// Register a flow; its identity lands in the action registry under
    /// kind `flow`, so duplicate names fail at registration time.
    pub async fn define_flow<F, Fut>(&self, config: FlowConfig, body: F) -> Result<Arc<Flow>>
    where
        F: Fn(Value, FlowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FlowOutcome>> + Send + 'static,
    {
        config.validate()?;

        let flow = Arc::new(Flow {
            name: config.name.clone(),
            input_schema: config.input_schema.clone(),
            output_schema: config.output_schema.clone(),
            auth_policy: config.auth_policy.clone(),
            body: Arc::new(move |input, ctx| body(input, ctx).boxed()),
        });

        // The registry-facing callable runs a fresh durable invocation, so
        // flows are invokable as ordinary sub-actions of other flows.
        let action_flow = flow.clone();
        let action_store = self.store.clone();
        let action = Action::new(
            ActionKind::Flow,
            &config.name,
            config.input_schema,
            config.output_schema,
            move |input| {
                let flow = action_flow.clone();
                let store = action_store.clone();
                async move {
                    let op = flow
                        .execute(store, input, FlowInvokeOptions::default(), None, None)
                        .await?;
                    operation_output(op)
                }
                .boxed()
            },
        )
        .with_metadata(config.metadata);
        self.registry.register(action).await?;

        let mut flows = self.flows.write().await;
        flows.insert(config.name.clone(), flow.clone());
        Ok(flow)
    }

    async fn get_flow(&self, name: &str) -> Result<Arc<Flow>> {
        let flows = self.flows.read().await;
        flows
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("flow `{name}`")))
    }

    /// Single-result invocation. Flow-body failures come back as a terminal
    /// operation carrying the structured error; pre-flight failures
    /// (validation, auth, unknown name, storage) are `Err`.
    pub async fn run_flow(
        &self,
        name: &str,
        input: Value,
        opts: FlowInvokeOptions,
    ) -> Result<Operation> {
        let flow = self.get_flow(name).await?;
        flow.execute(self.store.clone(), input, opts, None, None)
            .await
    }

    /// Streaming invocation: a finite sequence of chunk frames terminated
    /// by exactly one `Done` frame. The sequence is not restartable; each
    /// call opens a new run unless a run id is supplied.
    pub async fn stream_flow(
        &self,
        name: &str,
        input: Value,
        opts: FlowInvokeOptions,
    ) -> Result<mpsc::Receiver<FlowEvent>> {
        let flow = self.get_flow(name).await?;
        let store = self.store.clone();
        let run_id = opts.run_id.clone().unwrap_or_default();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let done = match flow
                .execute(store, input, opts, Some(tx.clone()), None)
                .await
            {
                Ok(op) => FlowEvent::Done(op),
                Err(e) => FlowEvent::Done(Operation::from_error(run_id, &e)),
            };
            let _ = tx.send(done).await;
        });

        Ok(rx)
    }

    /// Re-enter a previously interrupted (or recovered) run with a payload
    pub async fn resume_flow(
        &self,
        run_id: &str,
        payload: Value,
        auth: Option<AuthContext>,
    ) -> Result<Operation> {
        let state = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("run `{run_id}`")))?;
        if state.status.is_terminal() {
            return Err(FlowError::AlreadyTerminal {
                run_id: run_id.to_string(),
                status: state.status,
            });
        }
        let flow = self.get_flow(&state.name).await?;
        let opts = FlowInvokeOptions {
            run_id: Some(run_id.to_string()),
            auth,
        };
        flow.execute(self.store.clone(), state.input.clone(), opts, None, Some(payload))
            .await
    }

    /// Run a flow over an ordered batch of inputs; results are positional
    /// and one input's failure does not abort its siblings.
    pub async fn run_batch(
        &self,
        name: &str,
        inputs: Vec<Value>,
        opts: FlowInvokeOptions,
    ) -> Result<Vec<Operation>> {
        let flow = self.get_flow(name).await?;
        let mut operations = Vec::with_capacity(inputs.len());
        for input in inputs {
            let per_run = FlowInvokeOptions {
                run_id: None,
                auth: opts.auth.clone(),
            };
            let operation = match flow
                .execute(self.store.clone(), input, per_run, None, None)
                .await
            {
                Ok(op) => op,
                Err(e) => Operation::from_error("", &e),
            };
            operations.push(operation);
        }
        Ok(operations)
    }

    /// Registered flows, for tooling and the server's list endpoint
    pub async fn list_flows(&self) -> Vec<ActionSummary> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|summary| summary.kind == ActionKind::Flow)
            .collect()
    }

    /// Persisted runs, paged; not part of the execution path
    pub async fn list_runs(&self, filter: ListFilter) -> Result<ListPage> {
        self.store.list(filter).await
    }
}

/// Project a finished operation into the value a sub-action call yields
fn operation_output(op: Operation) -> Result<Value> {
    if let Some(error) = op.error {
        return Err(FlowError::Step {
            name: op.id,
            message: format!("{}: {}", error.kind, error.message),
        });
    }
    if !op.done {
        return Err(FlowError::from(format!(
            "flow run `{}` interrupted; resume it to continue",
            op.id
        )));
    }
    Ok(op.result.unwrap_or(Value::Null))
}
