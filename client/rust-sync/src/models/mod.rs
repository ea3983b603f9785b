use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod chart;
pub mod event;

pub use chart::ChartPayload;
pub use event::{AnswersHydrated, SyncEvent};

/// An answer as the local stores hold it: either plain text or a decoded
/// structured chart payload. Serialized untagged so stored JSON stays exactly
/// the string or the chart object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Chart(ChartPayload),
    Plain(String),
}

impl AnswerValue {
    pub fn is_chart(&self) -> bool {
        matches!(self, AnswerValue::Chart(_))
    }
}

/// One reconciled answer for one question of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub value: AnswerValue,
    /// Logical clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub attempt_count: u32,
}

/// Per-user entry of the structured tree: parallel maps keyed by question id.
/// `attempts` is never decreased by hydration and `charts` only carries the
/// questions whose answer decoded as structured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAnswerSet {
    #[serde(default)]
    pub answers: BTreeMap<String, AnswerValue>,
    #[serde(default)]
    pub reasons: BTreeMap<String, String>,
    #[serde(default)]
    pub timestamps: BTreeMap<String, i64>,
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub charts: BTreeMap<String, ChartPayload>,
}

impl UserAnswerSet {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty() && self.charts.is_empty()
    }
}

/// Entry of the legacy flat map: `question_id → {answer, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyEntry {
    pub answer: AnswerValue,
    pub timestamp: i64,
}

/// Wire shape of one previously submitted answer. `answer_value` may itself
/// be a serialized chart payload; the classifier decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAnswer {
    pub question_id: String,
    pub answer_value: String,
    pub timestamp: i64,
}

/// Wire envelope of `GET /api/user-answers/{username}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAnswerPage {
    pub count: u64,
    pub data: Vec<RemoteAnswer>,
}

/// Counters of one merge pass. `merged`/`charts` feed the completion signal;
/// the rest feed logging and metrics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MergeReport {
    /// Remote records applied to the structured tree (in memory at least).
    pub merged: u32,
    /// Subset of `merged` that decoded as chart payloads.
    pub charts: u32,
    /// Remote records discarded because the local record was strictly newer.
    pub skipped: u32,
    /// Subset of `merged` whose structured decode failed and degraded to
    /// plain text.
    pub degraded: u32,
    /// Durable writes rejected by a namespace during the pass.
    pub store_failures: u32,
}

impl MergeReport {
    pub fn any_merged(&self) -> bool {
        self.merged > 0
    }
}
