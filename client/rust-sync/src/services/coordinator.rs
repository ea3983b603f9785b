use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use crate::config::Config;
use crate::error::{StoreError, SyncError};
use crate::metrics::{record_merged, record_pass_outcome};
use crate::models::{AnswerRecord, AnswerValue, AnswersHydrated, SyncEvent};
use crate::services::classifier::{ChartDecoder, PayloadClassifier};
use crate::services::fetcher::{FetchOutcome, RemoteAnswerFetcher};
use crate::services::writer::{DualStoreWriter, IncomingAnswer};
use crate::stores::{AnswerStore, LegacyStore, TreeStore, LEGACY_FILE, TREE_FILE};
use crate::utils::time::now_millis;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Where user-facing hydration messages go. The host application wires in a
/// toast/snackbar implementation; everything else gets the logging one.
pub trait NotificationSink: Send + Sync {
    fn hydration_success(&self, merged: u32);
    fn hydration_failed(&self, reason: &str);
}

/// Default sink: messages end up in the log stream only.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn hydration_success(&self, merged: u32) {
        tracing::info!("restored {} previously submitted answers", merged);
    }

    fn hydration_failed(&self, reason: &str) {
        tracing::warn!("could not restore previous answers: {}", reason);
    }
}

/// Lifecycle of the surrounding user session. A pass whose fetch completes
/// after the session changed or ended discards its records.
#[derive(Debug, Clone, PartialEq)]
enum SessionState {
    /// No session was ever bound; standalone passes may write.
    Unbound,
    Active(String),
    Ended,
}

/// Holds one username's hydration slot. Dropping it releases the slot, so a
/// pass cancelled mid-fetch cannot block every later pass for that user.
struct InFlightGuard<'a> {
    slots: &'a Mutex<HashSet<String>>,
    username: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_slots(self.slots).remove(&self.username);
    }
}

fn lock_slots<'a>(slots: &'a Mutex<HashSet<String>>) -> MutexGuard<'a, HashSet<String>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives one hydration pass end to end: fetch, classify, reconcile, write,
/// signal. Failures degrade to a no-op pass; the host application keeps
/// running on whatever local state it already has.
pub struct HydrationCoordinator {
    fetcher: RemoteAnswerFetcher,
    classifier: PayloadClassifier,
    writer: DualStoreWriter,
    tree: Arc<TreeStore>,
    legacy: Arc<LegacyStore>,
    notifier: Arc<dyn NotificationSink>,
    events: broadcast::Sender<SyncEvent>,
    in_flight: Mutex<HashSet<String>>,
    session: RwLock<SessionState>,
}

impl HydrationCoordinator {
    pub fn new(
        config: &Config,
        tree: Arc<TreeStore>,
        legacy: Arc<LegacyStore>,
        decoder: Option<Arc<dyn ChartDecoder>>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, SyncError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            fetcher: RemoteAnswerFetcher::new(config)?,
            classifier: PayloadClassifier::new(decoder),
            writer: DualStoreWriter::new(tree.clone(), legacy.clone()),
            tree,
            legacy,
            notifier,
            events,
            in_flight: Mutex::new(HashSet::new()),
            session: RwLock::new(SessionState::Unbound),
        })
    }

    /// Opens both namespaces under `config.data_dir` and wires everything up.
    pub async fn from_config(
        config: &Config,
        decoder: Option<Arc<dyn ChartDecoder>>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, SyncError> {
        let tree = Arc::new(
            TreeStore::open(config.data_dir.join(TREE_FILE), config.max_store_bytes).await?,
        );
        let legacy = Arc::new(
            LegacyStore::open(config.data_dir.join(LEGACY_FILE), config.max_store_bytes).await?,
        );
        Self::new(config, tree, legacy, decoder, notifier)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Marks `username` as the session owner. A pass whose fetch outlives the
    /// session discards its records instead of writing them under the wrong
    /// user.
    pub async fn begin_session(&self, username: &str) {
        *self.session.write().await = SessionState::Active(username.to_string());
    }

    /// Tears the session down. Passes still in flight discard whatever their
    /// fetch returns.
    pub async fn end_session(&self) {
        *self.session.write().await = SessionState::Ended;
    }

    /// Runs one hydration pass for `username`. Returns true only when at
    /// least one remote record was merged; every other outcome, failures
    /// included, is a quiet false. Reentrant calls for the same user are
    /// rejected while a pass is running.
    pub async fn hydrate(&self, username: &str) -> bool {
        if username.trim().is_empty() {
            tracing::debug!("hydration skipped: no username");
            record_pass_outcome("skipped");
            return false;
        }

        let Some(_slot) = self.try_claim(username) else {
            tracing::warn!("hydration already running for {}, rejecting", username);
            record_pass_outcome("rejected");
            return false;
        };

        self.run_pass(username).await
    }

    /// Claims the per-user slot. The guard releases it on drop, which also
    /// covers a pass cancelled at one of its suspension points.
    fn try_claim(&self, username: &str) -> Option<InFlightGuard<'_>> {
        let mut slots = lock_slots(&self.in_flight);
        if slots.insert(username.to_string()) {
            Some(InFlightGuard {
                slots: &self.in_flight,
                username: username.to_string(),
            })
        } else {
            None
        }
    }

    async fn run_pass(&self, username: &str) -> bool {
        let fetched = match self.fetcher.fetch(username).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("hydration fetch failed for {}: {}", username, e);
                record_pass_outcome("failed");
                self.notifier.hydration_failed(&e.to_string());
                return false;
            }
        };

        let answers = match fetched {
            FetchOutcome::Skipped => {
                tracing::debug!("hydration skipped: sync disabled");
                record_pass_outcome("skipped");
                return false;
            }
            FetchOutcome::EndpointAbsent => {
                // not an error: the authority simply has no answer endpoint
                tracing::debug!("remote answer endpoint absent, nothing to hydrate");
                record_pass_outcome("absent");
                return false;
            }
            FetchOutcome::Answers(answers) => answers,
        };

        if answers.is_empty() {
            tracing::debug!("remote holds no answers for {}", username);
            record_pass_outcome("empty");
            return false;
        }

        if !self.session_matches(username).await {
            tracing::warn!(
                "session changed during fetch, discarding {} answers for {}",
                answers.len(),
                username
            );
            record_pass_outcome("stale-session");
            return false;
        }

        let batch: Vec<IncomingAnswer> = answers
            .into_iter()
            .map(|remote| {
                let classified = self.classifier.classify(&remote.answer_value);
                IncomingAnswer {
                    question_id: remote.question_id,
                    value: classified.value,
                    timestamp: remote.timestamp,
                    degraded: classified.degraded,
                }
            })
            .collect();

        let report = self.writer.apply(username, &batch).await;
        tracing::info!(
            "hydration for {}: merged {} ({} charts), skipped {}, degraded {}, flush failures {}",
            username,
            report.merged,
            report.charts,
            report.skipped,
            report.degraded,
            report.store_failures
        );
        record_merged(&report);

        if report.any_merged() {
            record_pass_outcome("merged");
            self.notifier.hydration_success(report.merged);
            // both stores are written by now; nobody listening is fine
            let _ = self.events.send(SyncEvent::AnswersHydrated(AnswersHydrated {
                username: username.to_string(),
                merged_count: report.merged,
                chart_count: report.charts,
                timestamp: Utc::now(),
            }));
            true
        } else {
            record_pass_outcome("no-op");
            false
        }
    }

    async fn session_matches(&self, username: &str) -> bool {
        match &*self.session.read().await {
            SessionState::Unbound => true,
            SessionState::Active(active) => active == username,
            SessionState::Ended => false,
        }
    }

    /// Direct submission path used by the question views. Stamps the record
    /// with the current clock and writes both namespaces; hydration later
    /// treats these timestamps as the local side of the conflict rule.
    pub async fn submit_local_answer(
        &self,
        username: &str,
        question_id: &str,
        value: AnswerValue,
        reason: Option<String>,
    ) -> Result<(), SyncError> {
        if username.trim().is_empty() {
            return Err(SyncError::MissingUsername);
        }

        let timestamp = now_millis();
        self.tree
            .record_submission(username, question_id, &value, reason, timestamp)
            .await?;
        self.legacy
            .put(
                username,
                &AnswerRecord {
                    question_id: question_id.to_string(),
                    value,
                    timestamp,
                    attempt_count: 1,
                },
            )
            .await?;
        Ok(())
    }

    /// Drops one user from both namespaces. Returns whether anything was
    /// actually removed.
    pub async fn clear_user(&self, username: &str) -> Result<bool, SyncError> {
        let tree_removed = self.tree.remove_user(username).await?;
        let legacy_removed = self.legacy.remove_user(username).await?;
        Ok(tree_removed || legacy_removed)
    }

    /// Pretty-printed JSON snapshot of one user's structured entry, or `None`
    /// for a user the tree has never seen.
    pub async fn export_user(&self, username: &str) -> Result<Option<String>, SyncError> {
        match self.tree.user_set(username).await {
            Some(set) => {
                let json = serde_json::to_string_pretty(&set).map_err(StoreError::from)?;
                Ok(Some(json))
            }
            None => Ok(None),
        }
    }

    /// Reachability check against the remote authority, for diagnostics.
    pub async fn probe_health(&self) -> bool {
        self.fetcher.probe_health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn disabled_config(dir: &std::path::Path) -> Config {
        Config {
            sync_enabled: false,
            base_url: None,
            data_dir: dir.to_path_buf(),
            request_timeout_secs: 1,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
            max_store_bytes: None,
        }
    }

    async fn disabled_coordinator(dir: &std::path::Path) -> HydrationCoordinator {
        HydrationCoordinator::from_config(&disabled_config(dir), None, Arc::new(LogNotifier))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn disabled_sync_is_a_quiet_no_op() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;
        assert!(!coordinator.hydrate("ada").await);
        assert!(lock_slots(&coordinator.in_flight).is_empty());
    }

    #[tokio::test]
    async fn blank_username_never_starts_a_pass() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;
        assert!(!coordinator.hydrate("").await);
        assert!(!coordinator.hydrate("   ").await);
    }

    #[tokio::test]
    async fn concurrent_pass_for_same_user_is_rejected() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;

        let slot = coordinator.try_claim("ada").unwrap();
        assert!(!coordinator.hydrate("ada").await);
        // the rejected call must not release the running pass's slot
        assert!(lock_slots(&coordinator.in_flight).contains("ada"));
        drop(slot);
    }

    #[tokio::test]
    async fn dropped_slot_frees_the_user() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;

        let slot = coordinator.try_claim("ada").unwrap();
        assert!(coordinator.try_claim("ada").is_none());
        // distinct users never contend for the same slot
        assert!(coordinator.try_claim("bella").is_some());

        drop(slot);
        assert!(coordinator.try_claim("ada").is_some());
    }

    #[tokio::test]
    async fn ended_session_blocks_late_writes() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;

        assert!(coordinator.session_matches("ada").await);
        coordinator.begin_session("ada").await;
        assert!(coordinator.session_matches("ada").await);
        assert!(!coordinator.session_matches("bella").await);

        coordinator.end_session().await;
        assert!(!coordinator.session_matches("ada").await);
    }

    #[tokio::test]
    async fn submission_reaches_both_namespaces() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;

        coordinator
            .submit_local_answer(
                "ada",
                "Q1",
                AnswerValue::Plain("42".to_string()),
                Some("sample mean".to_string()),
            )
            .await
            .unwrap();

        let set = coordinator.tree.user_set("ada").await.unwrap();
        assert_eq!(set.attempts["Q1"], 1);
        assert_eq!(set.reasons["Q1"], "sample mean");
        assert!(coordinator.legacy.get("ada", "Q1").await.is_some());
    }

    #[tokio::test]
    async fn clear_user_empties_both_namespaces() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;

        coordinator
            .submit_local_answer("ada", "Q1", AnswerValue::Plain("42".to_string()), None)
            .await
            .unwrap();

        assert!(coordinator.clear_user("ada").await.unwrap());
        assert!(coordinator.tree.user_set("ada").await.is_none());
        assert!(!coordinator.clear_user("ada").await.unwrap());
    }

    #[tokio::test]
    async fn export_returns_none_for_unknown_user() {
        let dir = tempdir().unwrap();
        let coordinator = disabled_coordinator(dir.path()).await;

        assert!(coordinator.export_user("nobody").await.unwrap().is_none());

        coordinator
            .submit_local_answer("ada", "Q1", AnswerValue::Plain("42".to_string()), None)
            .await
            .unwrap();
        let json = coordinator.export_user("ada").await.unwrap().unwrap();
        assert!(json.contains("Q1"));
    }
}
