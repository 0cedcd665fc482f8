use serde::{Deserialize, Serialize};

/// Body of a `compute_ihc` request. Journeys are serialized as-is, so the
/// caller decides the record shape.
#[derive(Debug, Clone, Serialize)]
pub struct ComputeIhcRequest<'a, T> {
    pub customer_journeys: &'a [T],
}

/// Per-touchpoint attribution returned by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IhcScore {
    pub conversion_id: String,
    pub session_id: String,
    pub initializer: f64,
    pub holder: f64,
    pub closer: f64,
    pub ihc: f64,
}

/// Raw response envelope. Both shapes share one struct because the API does
/// not tag them.
#[derive(Debug, Deserialize)]
pub(crate) struct ResponseEnvelope {
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    pub value: Option<Vec<IhcScore>>,
    #[serde(rename = "partialFailureErrors")]
    pub partial_failure_errors: Option<Vec<serde_json::Value>>,
}

/// Decoded outcome of a scoring call.
#[derive(Debug, Clone, PartialEq)]
pub enum IhcResponse {
    /// Every journey in the request was scored.
    Scored { status_code: u16, scores: Vec<IhcScore> },
    /// The scorer rejected some records. It does not say which of the rest
    /// succeeded, so callers should treat the whole request as unscored.
    PartialFailure { errors: Vec<PartialFailureError> },
}

/// One reason reported in `partialFailureErrors`. The API leaves the
/// structure open; the raw value is kept alongside a printable message.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialFailureError {
    pub message: String,
    pub raw: serde_json::Value,
}

impl From<serde_json::Value> for PartialFailureError {
    fn from(raw: serde_json::Value) -> Self {
        let message = match &raw {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => map
                .get("message")
                .or_else(|| map.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| raw.to_string()),
            other => other.to_string(),
        };
        Self { message, raw }
    }
}
