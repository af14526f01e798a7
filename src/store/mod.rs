// SPDX-License-Identifier: MIT

//! Flow state persistence
//!
//! The engine depends on the narrow `FlowStateStore` contract: whole-state
//! save (last-writer-wins), load by run identifier, and a paged list for
//! tooling. Any backend implementing it is interchangeable. The in-memory
//! store is the reference implementation; `file::FileStateStore` persists
//! one JSON document per run.

pub mod file;

pub use file::FileStateStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{FlowError, Result};
use crate::state::{FlowState, FlowStatus};

/// Filter and paging for `FlowStateStore::list`
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub flow_name: Option<String>,
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}

const DEFAULT_PAGE_SIZE: usize = 100;

/// Listing projection of a persisted run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub run_id: String,
    pub name: String,
    pub status: FlowStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&FlowState> for StateSummary {
    fn from(state: &FlowState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            name: state.name.clone(),
            status: state.status,
            created_at: state.created_at,
        }
    }
}

/// One page of run summaries
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub summaries: Vec<StateSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Narrow persistence contract the flow engine depends on
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    /// Whole-state overwrite; last writer wins
    async fn save(&self, state: &FlowState) -> Result<()>;

    async fn load(&self, run_id: &str) -> Result<Option<FlowState>>;

    /// Paged listing for tooling; not used on the execution path
    async fn list(&self, filter: ListFilter) -> Result<ListPage>;
}

/// Apply filter, ordering and paging to a full snapshot of states.
///
/// Shared by the memory and file backends; the page token is the offset of
/// the next entry in the (created_at, run_id) ordering.
fn paginate(mut states: Vec<FlowState>, filter: &ListFilter) -> Result<ListPage> {
    if let Some(name) = &filter.flow_name {
        states.retain(|s| &s.name == name);
    }
    states.sort_by(|a, b| (a.created_at, &a.run_id).cmp(&(b.created_at, &b.run_id)));

    let offset = match &filter.page_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| FlowError::validation(format!("invalid page token `{}`", token)))?,
        None => 0,
    };
    let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

    let summaries: Vec<StateSummary> = states
        .iter()
        .skip(offset)
        .take(page_size)
        .map(StateSummary::from)
        .collect();
    let next = offset + summaries.len();
    let next_page_token = (next < states.len()).then(|| next.to_string());

    Ok(ListPage {
        summaries,
        next_page_token,
    })
}

/// Reference in-memory state store
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    states: Arc<RwLock<HashMap<String, FlowState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStateStore for MemoryStateStore {
    async fn save(&self, state: &FlowState) -> Result<()> {
        let mut states = self.states.write().await;
        states.insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<FlowState>> {
        let states = self.states.read().await;
        Ok(states.get(run_id).cloned())
    }

    async fn list(&self, filter: ListFilter) -> Result<ListPage> {
        let states = self.states.read().await;
        paginate(states.values().cloned().collect(), &filter)
    }
}
