// SPDX-License-Identifier: MIT

//! File-backed flow state store
//!
//! Persists each run as `<dir>/<run_id>.json`. Suitable for the CLI, where
//! a resume typically happens from a different process than the start.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{paginate, FlowStateStore, ListFilter, ListPage};
use crate::error::{FlowError, Result};
use crate::state::FlowState;

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        // Run ids become file names; reject anything that could escape the dir
        if run_id.is_empty()
            || run_id
                .chars()
                .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
        {
            return Err(FlowError::validation(format!(
                "run id `{}` is not storable",
                run_id
            )));
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

fn storage_err(context: &str, path: &Path, err: impl std::fmt::Display) -> FlowError {
    FlowError::storage(format!("{context} {}: {err}", path.display()))
}

#[async_trait]
impl FlowStateStore for FileStateStore {
    async fn save(&self, state: &FlowState) -> Result<()> {
        let path = self.path_for(&state.run_id)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_err("creating", &self.dir, e))?;
        let encoded = serde_json::to_vec_pretty(state)
            .map_err(|e| storage_err("encoding", &path, e))?;
        fs::write(&path, encoded)
            .await
            .map_err(|e| storage_err("writing", &path, e))?;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<FlowState>> {
        let path = self.path_for(run_id)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err("reading", &path, e)),
        };
        let state = serde_json::from_str(&raw).map_err(|e| storage_err("decoding", &path, e))?;
        Ok(Some(state))
    }

    async fn list(&self, filter: ListFilter) -> Result<ListPage> {
        let mut states = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return paginate(states, &filter)
            }
            Err(e) => return Err(storage_err("listing", &self.dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("listing", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let raw = fs::read_to_string(&path)
                    .await
                    .map_err(|e| storage_err("reading", &path, e))?;
                let state =
                    serde_json::from_str(&raw).map_err(|e| storage_err("decoding", &path, e))?;
                states.push(state);
            }
        }
        paginate(states, &filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FlowStatus;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_state_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut state = FlowState::new("run-1", "greet", json!("Ada"));
        state.record("build", json!("Hello, Ada")).unwrap();
        store.save(&state).await.unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.cached("build"), Some(&json!("Hello, Ada")));
        assert_eq!(loaded.status, FlowStatus::Running);

        assert!(store.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_persisted_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        store
            .save(&FlowState::new("a1", "greet", json!(null)))
            .await
            .unwrap();
        store
            .save(&FlowState::new("b2", "other", json!(null)))
            .await
            .unwrap();

        let page = store.list(ListFilter::default()).await.unwrap();
        assert_eq!(page.summaries.len(), 2);

        let page = store
            .list(ListFilter {
                flow_name: Some("greet".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.summaries.len(), 1);
        assert_eq!(page.summaries[0].run_id, "a1");
    }

    #[tokio::test]
    async fn rejects_path_escaping_run_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let err = store.load("../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
