use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::StoreError;
use crate::models::{AnswerRecord, AnswerValue};

pub mod legacy;
pub mod tree;

pub use legacy::{LegacyStore, LEGACY_FILE};
pub use tree::{TreeStore, TREE_FILE};

/// What a namespace hands back for one question.
#[derive(Debug, Clone)]
pub struct StoredAnswer {
    pub value: AnswerValue,
    pub timestamp: i64,
}

/// Common surface of the two local persistence namespaces. Conflict
/// resolution re-reads timestamps through this interface at apply time, so
/// each namespace answers for its own state.
#[async_trait]
pub trait AnswerStore: Send + Sync {
    /// Short label used in logs, metrics and error reports.
    fn namespace(&self) -> &'static str;

    async fn get(&self, username: &str, question_id: &str) -> Option<StoredAnswer>;

    /// Durable write of one record. In-memory state is updated even when the
    /// durable write is rejected; the error reports the failed flush.
    async fn put(&self, username: &str, record: &AnswerRecord) -> Result<(), StoreError>;

    async fn list_timestamps(&self, username: &str) -> HashMap<String, i64>;
}

/// Loads a namespace file, falling back to an empty state when the file is
/// missing or unreadable. An unreadable namespace starts empty and the next
/// merge pass repopulates it; hydration must never refuse to start.
pub(crate) async fn load_namespace<T>(path: &Path, namespace: &'static str) -> T
where
    T: Default + DeserializeOwned,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    "{} store at {} is unreadable, starting empty: {}",
                    namespace,
                    path.display(),
                    e
                );
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            tracing::warn!(
                "failed to read {} store at {}, starting empty: {}",
                namespace,
                path.display(),
                e
            );
            T::default()
        }
    }
}

/// Serializes a namespace and enforces the optional capacity bound before any
/// bytes hit the disk.
pub(crate) fn encode_namespace<T: Serialize>(
    state: &T,
    namespace: &'static str,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>, StoreError> {
    let bytes = serde_json::to_vec(state)?;
    if let Some(limit) = max_bytes {
        if bytes.len() > limit {
            return Err(StoreError::CapacityExceeded {
                namespace,
                required: bytes.len(),
                limit,
            });
        }
    }
    Ok(bytes)
}
