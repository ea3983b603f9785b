use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::{encode_namespace, load_namespace, AnswerStore, StoredAnswer};
use crate::error::StoreError;
use crate::models::{AnswerRecord, LegacyEntry};

pub const LEGACY_FILE: &str = "quiz_answers.json";

const LEGACY_NAMESPACE: &str = "legacy";

type LegacyState = BTreeMap<String, BTreeMap<String, LegacyEntry>>;

/// The legacy flat map kept for backward compatibility:
/// `username → question_id → {answer, timestamp}`. It may lag behind the
/// structured tree after a partial failure, which is why the merge pass
/// re-evaluates the conflict rule against this namespace's own timestamps.
pub struct LegacyStore {
    path: PathBuf,
    max_bytes: Option<usize>,
    state: RwLock<LegacyState>,
}

impl LegacyStore {
    pub async fn open(path: impl Into<PathBuf>, max_bytes: Option<usize>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let state = load_namespace(&path, LEGACY_NAMESPACE).await;
        Ok(Self {
            path,
            max_bytes,
            state: RwLock::new(state),
        })
    }

    async fn persist_locked(&self, state: &LegacyState) -> Result<(), StoreError> {
        let bytes = encode_namespace(state, LEGACY_NAMESPACE, self.max_bytes)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }

    /// Snapshot of one user's flat map.
    pub async fn entries(&self, username: &str) -> BTreeMap<String, LegacyEntry> {
        self.state
            .read()
            .await
            .get(username)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn remove_user(&self, username: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let removed = state.remove(username).is_some();
        if removed {
            self.persist_locked(&state).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl AnswerStore for LegacyStore {
    fn namespace(&self) -> &'static str {
        LEGACY_NAMESPACE
    }

    async fn get(&self, username: &str, question_id: &str) -> Option<StoredAnswer> {
        let state = self.state.read().await;
        let entry = state.get(username)?.get(question_id)?;
        Some(StoredAnswer {
            value: entry.answer.clone(),
            timestamp: entry.timestamp,
        })
    }

    async fn put(&self, username: &str, record: &AnswerRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.entry(username.to_string()).or_default().insert(
            record.question_id.clone(),
            LegacyEntry {
                answer: record.value.clone(),
                timestamp: record.timestamp,
            },
        );
        self.persist_locked(&state).await
    }

    async fn list_timestamps(&self, username: &str) -> HashMap<String, i64> {
        self.state
            .read()
            .await
            .get(username)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.timestamp))
                    .collect()
            })
            .unwrap_or_default()
    }
}
