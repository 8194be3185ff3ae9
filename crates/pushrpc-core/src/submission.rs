//! Submission client: the short-lived HTTP side of the transport.
//!
//! Each request is a `POST <endpoint>?session_id=<token>` with a JSON-RPC body.
//! The immediate reply is either the answer itself or an acknowledgement that
//! the answer will follow on the event stream:
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `202`  | accepted, answer arrives via the stream |
//! | `200`  | body is the JSON-RPC response |
//! | other  | rejected |

use crate::protocol::{RpcMessage, RpcNotification, RpcRequest};
use crate::session::Session;
use crate::{Result, TransportError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body kept in a `Submission` error.
const MAX_ERROR_BODY_CHARS: usize = 2048;

/// How the server answered a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionReply {
    /// The answer will be delivered on the event stream.
    Accepted,
    /// The answer was included in the HTTP reply.
    Answered(RpcMessage),
}

/// Posts JSON-RPC payloads to a session's submission endpoint.
#[derive(Debug, Clone)]
pub struct SubmissionClient {
    client: Client,
    timeout: Duration,
}

impl SubmissionClient {
    /// Create a submission client sharing `client`'s connection pool.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Submit a request and interpret the immediate reply.
    pub async fn post_request(
        &self,
        session: &Session,
        request: &RpcRequest,
    ) -> Result<SubmissionReply> {
        let response = self.post(session, request).await?;
        let status = response.status();
        let body = response.text().await.map_err(|e| TransportError::Network {
            message: format!("Failed to read submission reply: {}", e),
            source: Some(e),
        })?;

        debug!(
            "Request {} ({}) answered with HTTP {}",
            request.id, request.method, status
        );

        interpret_reply(status, &body)
    }

    /// Submit a notification. The HTTP status is not interpreted.
    pub async fn post_notification(
        &self,
        session: &Session,
        notification: &RpcNotification,
    ) -> Result<()> {
        let response = self.post(session, notification).await?;
        debug!(
            "Notification {} answered with HTTP {}",
            notification.method,
            response.status()
        );
        Ok(())
    }

    async fn post<T: Serialize>(&self, session: &Session, body: &T) -> Result<Response> {
        let url = session.submission_url();

        self.client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network {
                message: format!("POST {} failed: {}", session.submission_endpoint(), e),
                source: Some(e),
            })
    }
}

/// Interpret the status and body of a submission reply.
///
/// A `200` whose body is empty or not a JSON-RPC object is treated like
/// `202`: the answer is still expected on the stream.
pub fn interpret_reply(status: StatusCode, body: &str) -> Result<SubmissionReply> {
    match status {
        StatusCode::ACCEPTED => Ok(SubmissionReply::Accepted),
        StatusCode::OK => {
            if body.trim().is_empty() {
                return Ok(SubmissionReply::Accepted);
            }
            match RpcMessage::parse(body) {
                Ok(message) => Ok(SubmissionReply::Answered(message)),
                Err(e) => {
                    warn!("Ignoring unparseable 200 submission reply: {}", e);
                    Ok(SubmissionReply::Accepted)
                }
            }
        }
        other => Err(TransportError::Submission {
            status: other.as_u16(),
            body: truncate_body(body),
        }),
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}
