use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use statdrill_sync::config::Config;
use statdrill_sync::services::classifier::ChartDecoder;
use statdrill_sync::stores::{LegacyStore, TreeStore, LEGACY_FILE, TREE_FILE};
use statdrill_sync::{HydrationCoordinator, NotificationSink};

struct StubState {
    hits: AtomicUsize,
    /// Statuses served (and drained) before the steady-state response.
    failures: Mutex<VecDeque<u16>>,
    /// Steady-state answer page; `None` means the endpoint is not deployed.
    answers: Mutex<Option<Vec<Value>>>,
    /// Milliseconds every response is held back, for cancellation tests.
    delay_ms: AtomicU64,
}

/// In-process stand-in for the remote answer authority: an axum server on an
/// ephemeral port with a scriptable answer page and a fetch counter.
pub struct StubAuthority {
    pub base_url: String,
    state: Arc<StubState>,
}

impl StubAuthority {
    pub async fn start() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let state = Arc::new(StubState {
            hits: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            answers: Mutex::new(None),
            delay_ms: AtomicU64::new(0),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/api/user-answers/{username}", get(user_answers))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub authority");
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Serves this answer page on every request from now on.
    pub fn respond_with(&self, answers: Vec<Value>) {
        *self.state.answers.lock().unwrap() = Some(answers);
    }

    /// Serves 404 from now on, as if the endpoint were never deployed.
    pub fn respond_not_found(&self) {
        *self.state.answers.lock().unwrap() = None;
    }

    /// Serves these statuses, one per request, before the steady response.
    pub fn fail_next(&self, statuses: &[u16]) {
        self.state.failures.lock().unwrap().extend(statuses);
    }

    /// Holds every response back by `delay` from now on.
    pub fn delay_responses(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

pub fn remote_answer(question_id: &str, answer_value: &str, timestamp: i64) -> Value {
    json!({
        "question_id": question_id,
        "answer_value": answer_value,
        "timestamp": timestamp
    })
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn user_answers(
    State(state): State<Arc<StubState>>,
    Path(_username): Path<String>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let delay_ms = state.delay_ms.load(Ordering::SeqCst);
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    if let Some(status) = state.failures.lock().unwrap().pop_front() {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, "stubbed failure").into_response();
    }

    match state.answers.lock().unwrap().clone() {
        Some(data) => {
            let page = json!({"count": data.len(), "data": data});
            (StatusCode::OK, Json(page)).into_response()
        }
        None => (StatusCode::NOT_FOUND, "no such endpoint").into_response(),
    }
}

/// Notification sink that records what the coordinator would have shown.
#[derive(Default)]
pub struct RecordingNotifier {
    pub successes: Mutex<Vec<u32>>,
    pub failures: Mutex<Vec<String>>,
}

impl NotificationSink for RecordingNotifier {
    fn hydration_success(&self, merged: u32) {
        self.successes.lock().unwrap().push(merged);
    }

    fn hydration_failed(&self, reason: &str) {
        self.failures.lock().unwrap().push(reason.to_string());
    }
}

/// A fully wired engine over throwaway store files, with direct handles to
/// both namespaces so tests can seed and inspect them.
pub struct TestEngine {
    pub coordinator: HydrationCoordinator,
    pub tree: Arc<TreeStore>,
    pub legacy: Arc<LegacyStore>,
    pub notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

pub fn test_config(base_url: Option<&str>, dir: &std::path::Path) -> Config {
    Config {
        sync_enabled: true,
        base_url: base_url.map(str::to_string),
        data_dir: dir.to_path_buf(),
        request_timeout_secs: 2,
        retry_max_attempts: 3,
        retry_base_delay_ms: 5,
        max_store_bytes: None,
    }
}

pub async fn engine_with_config(
    config: Config,
    dir: TempDir,
    decoder: Option<Arc<dyn ChartDecoder>>,
) -> TestEngine {
    let tree = Arc::new(
        TreeStore::open(config.data_dir.join(TREE_FILE), config.max_store_bytes)
            .await
            .expect("Failed to open tree store"),
    );
    let legacy = Arc::new(
        LegacyStore::open(config.data_dir.join(LEGACY_FILE), config.max_store_bytes)
            .await
            .expect("Failed to open legacy store"),
    );
    let notifier = Arc::new(RecordingNotifier::default());

    let coordinator = HydrationCoordinator::new(
        &config,
        tree.clone(),
        legacy.clone(),
        decoder,
        notifier.clone(),
    )
    .expect("Failed to build coordinator");

    TestEngine {
        coordinator,
        tree,
        legacy,
        notifier,
        _dir: dir,
    }
}

/// Engine pointed at a stub authority, fast retry delays, no decoder.
pub async fn engine_for(authority: &StubAuthority) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(Some(&authority.base_url), dir.path());
    engine_with_config(config, dir, None).await
}
