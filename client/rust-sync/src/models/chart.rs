use serde::{Deserialize, Serialize};

/// Decoded structured answer payload. The engine treats it as opaque beyond
/// the `kind` used for routing into the charts sub-map; the chart registry
/// that understands bins, points and five-number summaries lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPayload {
    pub kind: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ChartPayload {
    pub fn kind(&self) -> &str {
        &self.kind
    }
}
