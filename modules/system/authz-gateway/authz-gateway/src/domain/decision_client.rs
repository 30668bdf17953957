//! Decision client: one PDP call with bounded retry.
//!
//! Only transport failures are retried. A response that made it back, whatever
//! its status, is final: a non-2xx status means the PDP is reachable but
//! rejected the call, which is not transient.

use std::sync::Arc;
use std::time::Duration;

use authz_gateway_sdk::{DecisionInput, DecisionVerdict, GatewayError};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::transport::{DecisionTransport, TransportResponse};

/// Retry schedule for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (`0` = single attempt).
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Serialize)]
struct DecisionRequest<'a> {
    input: &'a DecisionInput,
}

/// Stateless wrapper around the PDP call.
#[derive(Clone)]
pub struct DecisionClient {
    transport: Arc<dyn DecisionTransport>,
    retry: RetryPolicy,
}

impl DecisionClient {
    pub fn new(transport: Arc<dyn DecisionTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// POST `{"input": input}` to `endpoint` and interpret the verdict.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Transport`] when every attempt failed at the network level
    /// - [`GatewayError::Protocol`] on a non-2xx status or a body that is not a JSON object
    #[tracing::instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn decide(
        &self,
        endpoint: &str,
        input: &DecisionInput,
    ) -> Result<DecisionVerdict, GatewayError> {
        let body = serde_json::to_vec(&DecisionRequest { input })
            .map_err(|e| GatewayError::Protocol(format!("failed to encode decision input: {e}")))?;

        let response = self.send_with_retry(endpoint, Bytes::from(body)).await?;
        if !response.is_success() {
            return Err(GatewayError::Protocol(format!(
                "decision endpoint returned status {}",
                response.status
            )));
        }

        let verdict = parse_verdict(response.body)?;
        debug!(
            allowed = verdict.allowed,
            decision_id = verdict.decision_id.as_deref().unwrap_or(""),
            "Received decision"
        );
        Ok(verdict)
    }

    async fn send_with_retry(
        &self,
        endpoint: &str,
        body: Bytes,
    ) -> Result<TransportResponse, GatewayError> {
        let mut attempt = 0u32;
        let mut delay = self.retry.initial_backoff;

        loop {
            attempt += 1;

            match self.transport.post_json(endpoint, body.clone()).await {
                Ok(response) => return Ok(response),
                Err(failure) => {
                    if attempt > self.retry.max_retries {
                        error!(attempt, error = %failure, "Decision call failed after max retries");
                        return Err(GatewayError::Transport(format!(
                            "{failure} (after {attempt} attempts)"
                        )));
                    }

                    warn!(
                        attempt,
                        error = %failure,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Decision call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

/// Interpret a 2xx PDP body. Only `"result": true` allows; any other value,
/// including a missing field, denies.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] if the body is not a JSON object.
pub fn parse_verdict(raw: Bytes) -> Result<DecisionVerdict, GatewayError> {
    let value: serde_json::Value = serde_json::from_slice(&raw)
        .map_err(|e| GatewayError::Protocol(format!("decision body is not JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| GatewayError::Protocol("decision body is not a JSON object".to_owned()))?;

    let allowed = object.get("result") == Some(&serde_json::Value::Bool(true));
    let decision_id = object
        .get("decision_id")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned);

    Ok(DecisionVerdict {
        allowed,
        decision_id,
        raw,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::transport::TransportFailure;
    use async_trait::async_trait;
    use authz_gateway_sdk::{PeerAddress, RequestInfo};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted outcomes and records when each attempt happened.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<TransportResponse, TransportFailure>>>,
        attempts: Mutex<Vec<Instant>>,
        bodies: Mutex<Vec<Bytes>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<TransportResponse, TransportFailure>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: Mutex::new(Vec::new()),
                bodies: Mutex::new(Vec::new()),
            })
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DecisionTransport for ScriptedTransport {
        async fn post_json(
            &self,
            _endpoint: &str,
            body: Bytes,
        ) -> Result<TransportResponse, TransportFailure> {
            self.attempts.lock().unwrap().push(Instant::now());
            self.bodies.lock().unwrap().push(body);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::Io("script exhausted".to_owned())))
        }
    }

    fn ok(status: u16, body: &str) -> Result<TransportResponse, TransportFailure> {
        Ok(TransportResponse {
            status,
            body: Bytes::from(body.to_owned()),
        })
    }

    fn refused() -> Result<TransportResponse, TransportFailure> {
        Err(TransportFailure::Connect("connection refused".to_owned()))
    }

    fn input() -> DecisionInput {
        DecisionInput {
            request: RequestInfo {
                scheme: "http".to_owned(),
                method: "GET".to_owned(),
                path: "/orders".to_owned(),
                ..RequestInfo::default()
            },
            source: PeerAddress {
                ip_address: "10.0.0.5".to_owned(),
                port: 51000,
            },
            destination: PeerAddress {
                ip_address: "10.0.0.9".to_owned(),
                port: 443,
            },
            cloud: None,
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> DecisionClient {
        DecisionClient::new(transport, RetryPolicy::default())
    }

    const ENDPOINT: &str = "http://localhost:8181/v1/data/authz/allow";

    #[tokio::test(start_paused = true)]
    async fn three_transport_failures_exhaust_two_retries_with_doubling_backoff() {
        let transport = ScriptedTransport::new(vec![refused(), refused(), refused()]);
        let result = client(transport.clone()).decide(ENDPOINT, &input()).await;

        assert!(matches!(result, Err(GatewayError::Transport(_))));
        let attempts = transport.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_millis(250));
        assert_eq!(attempts[2] - attempts[1], Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_retry_succeeds() {
        let transport = ScriptedTransport::new(vec![refused(), ok(200, r#"{"result": true}"#)]);
        let verdict = client(transport.clone())
            .decide(ENDPOINT, &input())
            .await
            .unwrap();

        assert!(verdict.allowed);
        assert_eq!(transport.attempt_count(), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_not_retried() {
        let transport = ScriptedTransport::new(vec![ok(400, r#"{"code": "invalid_parameter"}"#)]);
        let result = client(transport.clone()).decide(ENDPOINT, &input()).await;

        assert!(matches!(result, Err(GatewayError::Protocol(_))));
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test]
    async fn only_literal_true_allows() {
        let cases = [
            (r#"{"decision_id": "d-1", "result": true}"#, true),
            (r#"{"result": false}"#, false),
            (r#"{"result": "true"}"#, false),
            (r#"{"result": {"allow": true}}"#, false),
            (r#"{"decision_id": "d-2"}"#, false),
        ];

        for (body, expected) in cases {
            let transport = ScriptedTransport::new(vec![ok(200, body)]);
            let verdict = client(transport).decide(ENDPOINT, &input()).await.unwrap();
            assert_eq!(verdict.allowed, expected, "body: {body}");
            assert_eq!(verdict.raw, Bytes::from(body.to_owned()));
        }
    }

    #[tokio::test]
    async fn unparsable_body_is_a_protocol_error() {
        for body in ["not json", "[true]", "true"] {
            let transport = ScriptedTransport::new(vec![ok(200, body)]);
            let result = client(transport).decide(ENDPOINT, &input()).await;
            assert!(matches!(result, Err(GatewayError::Protocol(_))), "body: {body}");
        }
    }

    #[tokio::test]
    async fn wraps_input_in_envelope() {
        let transport = ScriptedTransport::new(vec![ok(200, r#"{"result": true}"#)]);
        client(transport.clone())
            .decide(ENDPOINT, &input())
            .await
            .unwrap();

        let body = transport.bodies.lock().unwrap()[0].clone();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["input"]["request"]["path"], "/orders");
        assert_eq!(value["input"]["source"]["ipAddress"], "10.0.0.5");
        assert!(value["input"].get("cloud").is_none());
    }

    #[test]
    fn decision_id_is_extracted_when_string() {
        let verdict = parse_verdict(Bytes::from_static(
            br#"{"decision_id": "4ca636c1", "result": false}"#,
        ))
        .unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.decision_id.as_deref(), Some("4ca636c1"));
    }
}
