use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide signals broadcast by the coordinator so that dashboards and
/// question views can react without knowing who produced the data.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    AnswersHydrated(AnswersHydrated),
}

/// Emitted strictly after both local stores have been written, and only when
/// at least one record was merged.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnswersHydrated {
    pub username: String,
    pub merged_count: u32,
    pub chart_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            SyncEvent::AnswersHydrated(_) => "answers-hydrated",
        }
    }
}
