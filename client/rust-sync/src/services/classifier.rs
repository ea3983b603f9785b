use std::sync::Arc;

use crate::metrics::DECODE_DEGRADED_TOTAL;
use crate::models::{AnswerValue, ChartPayload};

/// Injected capability for decoding structured (chart) answer payloads. The
/// chart registry implements this; the engine never looks past the outcome.
pub trait ChartDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> DecodeOutcome;
}

/// What a decoder reports for one raw value. `error` set means the decoder
/// recognized the value as structured but could not produce a payload.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub structured: bool,
    pub value: AnswerValue,
    pub error: Option<String>,
}

/// Result of classifying one remote value. `degraded` marks a record that
/// failed structured decoding and was kept as plain text instead of dropped.
#[derive(Debug, Clone)]
pub struct Classified {
    pub value: AnswerValue,
    pub degraded: bool,
}

/// Decides, per record, whether a raw remote value is a plain answer or a
/// serialized chart payload. Decoding problems never propagate: the worst
/// case is a plain-text answer, never a lost one.
pub struct PayloadClassifier {
    decoder: Option<Arc<dyn ChartDecoder>>,
}

impl PayloadClassifier {
    pub fn new(decoder: Option<Arc<dyn ChartDecoder>>) -> Self {
        Self { decoder }
    }

    pub fn classify(&self, raw: &str) -> Classified {
        if let Some(decoder) = &self.decoder {
            let outcome = decoder.decode(raw);
            if let Some(error) = outcome.error {
                tracing::debug!("structured decode failed, keeping plain text: {}", error);
                DECODE_DEGRADED_TOTAL.inc();
                return Classified {
                    value: AnswerValue::Plain(raw.to_string()),
                    degraded: true,
                };
            }
            return Classified {
                value: outcome.value,
                degraded: false,
            };
        }

        Self::best_effort(raw)
    }

    /// Fallback when no decoder was injected: a JSON object exposing a string
    /// `kind` field is treated as structured, anything else as plain text.
    fn best_effort(raw: &str) -> Classified {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw)
        {
            if map.get("kind").is_some_and(|k| k.is_string()) {
                match serde_json::from_value::<ChartPayload>(serde_json::Value::Object(map)) {
                    Ok(chart) => {
                        return Classified {
                            value: AnswerValue::Chart(chart),
                            degraded: false,
                        }
                    }
                    Err(e) => {
                        tracing::debug!("chart-shaped value failed to decode: {}", e);
                        DECODE_DEGRADED_TOTAL.inc();
                        return Classified {
                            value: AnswerValue::Plain(raw.to_string()),
                            degraded: true,
                        };
                    }
                }
            }
        }

        Classified {
            value: AnswerValue::Plain(raw.to_string()),
            degraded: false,
        }
    }
}
