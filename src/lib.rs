// SPDX-License-Identifier: MIT

//! duraflow-rs: durable flow execution engine
//!
//! Flows are named, schema-typed actions whose execution state survives
//! process interruption. Steps inside a flow are memoized per run
//! identifier, so a resumed run replays finished work instead of redoing
//! it; interrupted runs can be resumed with a payload, streamed, invoked
//! over HTTP, or driven from the CLI.

pub mod auth;
pub mod error;
pub mod flow;
pub mod registry;
pub mod schema;
pub mod server;
pub mod state;
pub mod store;

pub use auth::{require_auth, AuthContext, AuthPolicy};
pub use error::{FlowError, Result};
pub use flow::{
    Flow, FlowConfig, FlowContext, FlowEngine, FlowEvent, FlowInvokeOptions, FlowOutcome,
};
pub use registry::{Action, ActionKind, ActionRegistry, ActionSummary};
pub use schema::{Schema, SchemaKind};
pub use state::{ErrorInfo, FlowState, FlowStatus, Operation, StepRecord};
pub use store::{FileStateStore, FlowStateStore, ListFilter, ListPage, MemoryStateStore, StateSummary};
