use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::{encode_namespace, load_namespace, AnswerStore, StoredAnswer};
use crate::error::StoreError;
use crate::models::{AnswerRecord, AnswerValue, UserAnswerSet};

pub const TREE_FILE: &str = "user_answers.json";

const TREE_NAMESPACE: &str = "tree";

type TreeState = BTreeMap<String, UserAnswerSet>;

/// The structured per-user tree: answers, reasons, timestamps, attempts and
/// charts grouped under one entry per username. Authoritative local state.
pub struct TreeStore {
    path: PathBuf,
    max_bytes: Option<usize>,
    state: RwLock<TreeState>,
}

impl TreeStore {
    pub async fn open(path: impl Into<PathBuf>, max_bytes: Option<usize>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let state = load_namespace(&path, TREE_NAMESPACE).await;
        Ok(Self {
            path,
            max_bytes,
            state: RwLock::new(state),
        })
    }

    async fn persist_locked(&self, state: &TreeState) -> Result<(), StoreError> {
        let bytes = encode_namespace(state, TREE_NAMESPACE, self.max_bytes)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }

    /// Snapshot of one user's entry, for export and dashboards.
    pub async fn user_set(&self, username: &str) -> Option<UserAnswerSet> {
        self.state.read().await.get(username).cloned()
    }

    pub async fn remove_user(&self, username: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let removed = state.remove(username).is_some();
        if removed {
            self.persist_locked(&state).await?;
        }
        Ok(removed)
    }

    /// Peer-writer path for direct answer submission: always takes the new
    /// value, stamps it with the caller's logical clock and bumps the attempt
    /// counter. Hydration never goes through here.
    pub async fn record_submission(
        &self,
        username: &str,
        question_id: &str,
        value: &AnswerValue,
        reason: Option<String>,
        timestamp: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let set = state.entry(username.to_string()).or_default();

        set.answers.insert(question_id.to_string(), value.clone());
        set.timestamps.insert(question_id.to_string(), timestamp);
        *set.attempts.entry(question_id.to_string()).or_insert(0) += 1;

        match value {
            AnswerValue::Chart(chart) => {
                set.charts.insert(question_id.to_string(), chart.clone());
            }
            AnswerValue::Plain(_) => {
                set.charts.remove(question_id);
            }
        }
        match reason {
            Some(r) => {
                set.reasons.insert(question_id.to_string(), r);
            }
            None => {
                set.reasons.remove(question_id);
            }
        }

        self.persist_locked(&state).await
    }
}

#[async_trait]
impl AnswerStore for TreeStore {
    fn namespace(&self) -> &'static str {
        TREE_NAMESPACE
    }

    async fn get(&self, username: &str, question_id: &str) -> Option<StoredAnswer> {
        let state = self.state.read().await;
        let set = state.get(username)?;
        let value = set.answers.get(question_id)?.clone();
        let timestamp = *set.timestamps.get(question_id)?;
        Some(StoredAnswer { value, timestamp })
    }

    async fn put(&self, username: &str, record: &AnswerRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let set = state.entry(username.to_string()).or_default();

        set.answers
            .insert(record.question_id.clone(), record.value.clone());
        set.timestamps
            .insert(record.question_id.clone(), record.timestamp);
        // never decrease or overwrite an existing attempt counter
        set.attempts
            .entry(record.question_id.clone())
            .or_insert_with(|| record.attempt_count.max(1));

        match &record.value {
            AnswerValue::Chart(chart) => {
                set.charts.insert(record.question_id.clone(), chart.clone());
            }
            AnswerValue::Plain(_) => {
                // a plain overwrite retires any stale chart for the question
                set.charts.remove(&record.question_id);
            }
        }

        self.persist_locked(&state).await
    }

    async fn list_timestamps(&self, username: &str) -> HashMap<String, i64> {
        self.state
            .read()
            .await
            .get(username)
            .map(|set| set.timestamps.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }
}
