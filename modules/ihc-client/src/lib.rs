pub mod error;
pub mod types;

pub use error::{IhcError, Result};
pub use types::{ComputeIhcRequest, IhcResponse, IhcScore, PartialFailureError};

use serde::Serialize;
use std::time::Duration;
use types::ResponseEnvelope;

pub const DEFAULT_BASE_URL: &str = "https://api.ihc-attribution.com/v1";

pub struct IhcClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    conv_type_id: String,
}

impl IhcClient {
    pub fn new(base_url: &str, api_key: &str, conv_type_id: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            conv_type_id: conv_type_id.to_string(),
        })
    }

    /// Submit a set of customer journeys for attribution scoring.
    ///
    /// Returns `Ok` for both a full success and a reported partial failure;
    /// everything else (network, non-2xx without a failure report, unknown
    /// body) is an error.
    pub async fn compute_ihc<T: Serialize>(&self, journeys: &[T]) -> Result<IhcResponse> {
        let url = format!("{}/compute_ihc", self.base_url);
        let body = ComputeIhcRequest {
            customer_journeys: journeys,
        };

        tracing::debug!(records = journeys.len(), "Submitting journeys to IHC");

        let resp = self
            .client
            .post(&url)
            .query(&[("conv_type_id", self.conv_type_id.as_str())])
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await?;
        parse_response(status, &text)
    }
}

/// Decode an HTTP status and body into an [`IhcResponse`].
pub fn parse_response(http_status: u16, body: &str) -> Result<IhcResponse> {
    let success = (200..300).contains(&http_status);

    let envelope: ResponseEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !success => {
            return Err(IhcError::Api {
                status: http_status,
                body: body.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(errors) = envelope.partial_failure_errors.filter(|e| !e.is_empty()) {
        return Ok(IhcResponse::PartialFailure {
            errors: errors.into_iter().map(PartialFailureError::from).collect(),
        });
    }

    if !success {
        return Err(IhcError::Api {
            status: http_status,
            body: body.to_string(),
        });
    }

    match (envelope.status_code, envelope.value) {
        (Some(code), Some(scores)) if (200..300).contains(&code) => Ok(IhcResponse::Scored {
            status_code: code,
            scores,
        }),
        (Some(code), _) => Err(IhcError::Protocol(format!(
            "statusCode {code} without a scored value list"
        ))),
        (None, _) => Err(IhcError::Protocol(
            "response has neither statusCode nor partialFailureErrors".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_yields_scores() {
        let body = r#"{
            "statusCode": 200,
            "value": [
                {"conversion_id": "C1", "session_id": "S1", "initializer": 0.5,
                 "holder": 0.2, "closer": 0.3, "ihc": 0.4, "extra": "ignored"}
            ]
        }"#;

        let resp = parse_response(200, body).unwrap();
        match resp {
            IhcResponse::Scored { status_code, scores } => {
                assert_eq!(status_code, 200);
                assert_eq!(scores.len(), 1);
                assert_eq!(scores[0].session_id, "S1");
                assert_eq!(scores[0].ihc, 0.4);
            }
            other => panic!("expected scored response, got {other:?}"),
        }
    }

    #[test]
    fn partial_failure_wins_over_value() {
        let body = r#"{
            "statusCode": 206,
            "value": [],
            "partialFailureErrors": [{"message": "session S9 has no timestamp"}, "bad row"]
        }"#;

        let resp = parse_response(200, body).unwrap();
        let IhcResponse::PartialFailure { errors } = resp else {
            panic!("expected partial failure");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "session S9 has no timestamp");
        assert_eq!(errors[1].message, "bad row");
    }

    #[test]
    fn partial_failure_on_error_status_is_not_an_error() {
        let body = r#"{"partialFailureErrors": [{"error": "invalid channel"}]}"#;
        let resp = parse_response(400, body).unwrap();
        assert!(matches!(resp, IhcResponse::PartialFailure { .. }));
    }

    #[test]
    fn empty_partial_failure_list_is_ignored() {
        let body = r#"{"statusCode": 200, "value": [], "partialFailureErrors": []}"#;
        let resp = parse_response(200, body).unwrap();
        assert!(matches!(resp, IhcResponse::Scored { .. }));
    }

    #[test]
    fn non_json_error_body_is_api_error() {
        let err = parse_response(502, "Bad Gateway").unwrap_err();
        assert!(matches!(err, IhcError::Api { status: 502, .. }));
    }

    #[test]
    fn non_json_success_body_is_parse_error() {
        let err = parse_response(200, "<html>").unwrap_err();
        assert!(matches!(err, IhcError::Parse(_)));
    }

    #[test]
    fn unknown_shape_is_protocol_error() {
        let err = parse_response(200, r#"{"hello": "world"}"#).unwrap_err();
        assert!(matches!(err, IhcError::Protocol(_)));

        let err = parse_response(200, r#"{"statusCode": 500}"#).unwrap_err();
        assert!(matches!(err, IhcError::Protocol(_)));
    }

    #[test]
    fn request_body_wraps_journeys() {
        let journeys = vec![serde_json::json!({"conversion_id": "C1"})];
        let body = serde_json::to_value(ComputeIhcRequest {
            customer_journeys: &journeys,
        })
        .unwrap();
        assert_eq!(body["customer_journeys"][0]["conversion_id"], "C1");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = IhcClient::new(
            "https://scorer.test/v1/",
            "key",
            "conv",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://scorer.test/v1");
    }
}
