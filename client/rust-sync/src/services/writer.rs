use std::sync::Arc;

use crate::metrics::record_store_failure;
use crate::models::{AnswerRecord, AnswerValue, MergeReport};
use crate::services::resolver::should_apply;
use crate::stores::{AnswerStore, LegacyStore, TreeStore};

/// One classified remote record, ready for conflict resolution.
#[derive(Debug, Clone)]
pub struct IncomingAnswer {
    pub question_id: String,
    pub value: AnswerValue,
    pub timestamp: i64,
    /// Structured decode failed and the value was kept as plain text.
    pub degraded: bool,
}

/// Applies a classified batch to both persistence namespaces. Each store is
/// judged against its own current timestamp, so a store that missed earlier
/// writes catches up instead of inheriting the other's decision.
pub struct DualStoreWriter {
    tree: Arc<TreeStore>,
    legacy: Arc<LegacyStore>,
}

impl DualStoreWriter {
    pub fn new(tree: Arc<TreeStore>, legacy: Arc<LegacyStore>) -> Self {
        Self { tree, legacy }
    }

    /// Merges `batch` in remote order. A rejected durable write is counted
    /// and logged but never stops the batch; the in-memory state already
    /// carries the record. The report's `merged`/`skipped` counts follow the
    /// structured tree, the authoritative namespace.
    pub async fn apply(&self, username: &str, batch: &[IncomingAnswer]) -> MergeReport {
        let mut report = MergeReport::default();

        for incoming in batch {
            let record = AnswerRecord {
                question_id: incoming.question_id.clone(),
                value: incoming.value.clone(),
                timestamp: incoming.timestamp,
                attempt_count: 1,
            };

            let local = self.tree.get(username, &incoming.question_id).await;
            if should_apply(local.map(|s| s.timestamp), incoming.timestamp) {
                report.merged += 1;
                if incoming.degraded {
                    report.degraded += 1;
                }
                if incoming.value.is_chart() {
                    report.charts += 1;
                }
                if let Err(e) = self.tree.put(username, &record).await {
                    report.store_failures += 1;
                    record_store_failure(self.tree.namespace());
                    tracing::error!(
                        "{} flush failed for {}/{}: {}",
                        self.tree.namespace(),
                        username,
                        incoming.question_id,
                        e
                    );
                }
            } else {
                report.skipped += 1;
            }

            let local = self.legacy.get(username, &incoming.question_id).await;
            if should_apply(local.map(|s| s.timestamp), incoming.timestamp) {
                if let Err(e) = self.legacy.put(username, &record).await {
                    report.store_failures += 1;
                    record_store_failure(self.legacy.namespace());
                    tracing::error!(
                        "{} flush failed for {}/{}: {}",
                        self.legacy.namespace(),
                        username,
                        incoming.question_id,
                        e
                    );
                }
            }
        }

        self.warn_on_divergence(username).await;
        report
    }

    /// The two namespaces should agree on every question they both hold once
    /// a pass finishes. Divergence is survivable but worth a trace.
    async fn warn_on_divergence(&self, username: &str) {
        let tree_stamps = self.tree.list_timestamps(username).await;
        let legacy_stamps = self.legacy.list_timestamps(username).await;

        for (question_id, stamp) in &tree_stamps {
            match legacy_stamps.get(question_id) {
                Some(other) if other == stamp => {}
                Some(other) => tracing::warn!(
                    "stores disagree on {} for {}: tree {} vs legacy {}",
                    question_id,
                    username,
                    stamp,
                    other
                ),
                None => tracing::warn!(
                    "{} for {} is present only in the tree store",
                    question_id,
                    username
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{LEGACY_FILE, TREE_FILE};
    use tempfile::tempdir;

    fn incoming(question_id: &str, answer: &str, timestamp: i64) -> IncomingAnswer {
        IncomingAnswer {
            question_id: question_id.to_string(),
            value: AnswerValue::Plain(answer.to_string()),
            timestamp,
            degraded: false,
        }
    }

    async fn open_writer(
        dir: &std::path::Path,
        max_bytes: Option<usize>,
    ) -> (DualStoreWriter, Arc<TreeStore>, Arc<LegacyStore>) {
        let tree = Arc::new(
            TreeStore::open(dir.join(TREE_FILE), max_bytes)
                .await
                .unwrap(),
        );
        let legacy = Arc::new(
            LegacyStore::open(dir.join(LEGACY_FILE), max_bytes)
                .await
                .unwrap(),
        );
        (
            DualStoreWriter::new(tree.clone(), legacy.clone()),
            tree,
            legacy,
        )
    }

    #[tokio::test]
    async fn fresh_batch_lands_in_both_stores() {
        let dir = tempdir().unwrap();
        let (writer, tree, legacy) = open_writer(dir.path(), None).await;

        let report = writer
            .apply("ada", &[incoming("Q1", "42", 100), incoming("Q2", "7", 110)])
            .await;

        assert_eq!(report.merged, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.store_failures, 0);
        assert_eq!(tree.get("ada", "Q1").await.unwrap().timestamp, 100);
        assert_eq!(legacy.get("ada", "Q1").await.unwrap().timestamp, 100);
    }

    #[tokio::test]
    async fn strictly_newer_local_answer_is_kept() {
        let dir = tempdir().unwrap();
        let (writer, tree, _) = open_writer(dir.path(), None).await;

        tree.record_submission("ada", "Q1", &AnswerValue::Plain("local".to_string()), None, 200)
            .await
            .unwrap();

        let report = writer.apply("ada", &[incoming("Q1", "remote", 150)]).await;

        assert_eq!(report.merged, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            tree.get("ada", "Q1").await.unwrap().value,
            AnswerValue::Plain("local".to_string())
        );
    }

    #[tokio::test]
    async fn equal_timestamps_take_the_remote_value() {
        let dir = tempdir().unwrap();
        let (writer, tree, _) = open_writer(dir.path(), None).await;

        tree.record_submission("ada", "Q1", &AnswerValue::Plain("local".to_string()), None, 150)
            .await
            .unwrap();

        let report = writer.apply("ada", &[incoming("Q1", "remote", 150)]).await;

        assert_eq!(report.merged, 1);
        assert_eq!(
            tree.get("ada", "Q1").await.unwrap().value,
            AnswerValue::Plain("remote".to_string())
        );
    }

    #[tokio::test]
    async fn stale_legacy_entry_is_repaired_independently() {
        let dir = tempdir().unwrap();
        let (writer, tree, legacy) = open_writer(dir.path(), None).await;

        // The tree already carries the newest answer; legacy lags behind.
        tree.record_submission("ada", "Q1", &AnswerValue::Plain("fresh".to_string()), None, 300)
            .await
            .unwrap();
        legacy
            .put(
                "ada",
                &AnswerRecord {
                    question_id: "Q1".to_string(),
                    value: AnswerValue::Plain("old".to_string()),
                    timestamp: 100,
                    attempt_count: 1,
                },
            )
            .await
            .unwrap();

        let report = writer.apply("ada", &[incoming("Q1", "remote", 200)]).await;

        // The tree keeps its newer answer, legacy catches up to the remote.
        assert_eq!(report.merged, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            tree.get("ada", "Q1").await.unwrap().value,
            AnswerValue::Plain("fresh".to_string())
        );
        assert_eq!(legacy.get("ada", "Q1").await.unwrap().timestamp, 200);
    }

    #[tokio::test]
    async fn degraded_records_are_counted_and_still_merged() {
        let dir = tempdir().unwrap();
        let (writer, tree, _) = open_writer(dir.path(), None).await;

        let mut record = incoming("Q1", "{broken chart}", 100);
        record.degraded = true;

        let report = writer.apply("ada", &[record]).await;
        assert_eq!(report.degraded, 1);
        assert_eq!(report.merged, 1);
        assert!(tree.get("ada", "Q1").await.is_some());
    }

    #[tokio::test]
    async fn skipped_degraded_record_does_not_count_as_degraded() {
        let dir = tempdir().unwrap();
        let (writer, tree, _) = open_writer(dir.path(), None).await;

        tree.record_submission("ada", "Q1", &AnswerValue::Plain("local".to_string()), None, 200)
            .await
            .unwrap();

        let mut record = incoming("Q1", "{broken chart}", 100);
        record.degraded = true;

        // the local answer wins, so the degraded decode never reached a store
        let report = writer.apply("ada", &[record]).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.degraded, 0);
        assert_eq!(report.merged, 0);
    }

    #[tokio::test]
    async fn rejected_flush_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        // Tight enough that every durable write is rejected.
        let (writer, tree, _) = open_writer(dir.path(), Some(8)).await;

        let report = writer
            .apply("ada", &[incoming("Q1", "42", 100), incoming("Q2", "7", 110)])
            .await;

        // Both stores reject both records, memory still took all of them.
        assert_eq!(report.merged, 2);
        assert_eq!(report.store_failures, 4);
        assert!(tree.get("ada", "Q2").await.is_some());
    }
}
