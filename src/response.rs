//! Result normalization
//!
//! Folds every transport outcome into a [`RequestResult`] so callers decide
//! success or failure by inspecting `status_code` alone, and guarantees the
//! consumed connection is returned or destroyed exactly once on every path.

use std::time::Duration;

use http_body_util::BodyExt;
use hyper::StatusCode;
use serde::Serialize;
use tracing::error;

use crate::config::TimeoutConfig;
use crate::errors::TransportError;
use crate::request::ExecutionOutcome;
use crate::transport::ResponseBody;

/// Sentinel status: connect-phase timeout, connection refused, or pool-wait
/// timeout.
pub const STATUS_CONNECT_TIMEOUT: i32 = -1;

/// Sentinel status: connection established but no response bytes within the
/// socket timeout.
pub const STATUS_SOCKET_TIMEOUT: i32 = -2;

/// Sentinel status: any other failure (encoding, protocol, unexpected).
pub const STATUS_OTHER: i32 = -9;

/// Normalized outcome of one request.
///
/// `status_code` is a real HTTP status (>= 100) or one of the negative
/// sentinels; `body` is populated only for HTTP 200.
#[derive(Debug, Clone, Serialize)]
pub struct RequestResult {
    pub status_code: i32,
    pub reason_phrase: String,
    pub body: Option<String>,
}

impl RequestResult {
    fn failure(status_code: i32, reason_phrase: String) -> Self {
        Self {
            status_code,
            reason_phrase,
            body: None,
        }
    }

    /// Whether the remote answered HTTP 200.
    pub fn is_success(&self) -> bool {
        self.status_code == StatusCode::OK.as_u16() as i32
    }

    /// Parse the attached body as JSON, when present and well-formed.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

enum BodyReadError {
    TimedOut(Duration),
    Read(String),
}

/// Fold an execution outcome into a result, releasing the connection.
pub(crate) async fn normalize(
    outcome: ExecutionOutcome,
    timeouts: &TimeoutConfig,
) -> RequestResult {
    match outcome {
        ExecutionOutcome::ConnectFailed { reason } => {
            RequestResult::failure(STATUS_CONNECT_TIMEOUT, reason)
        }
        ExecutionOutcome::TimedOut { reason } => {
            RequestResult::failure(STATUS_SOCKET_TIMEOUT, reason)
        }
        ExecutionOutcome::Failed { reason } => RequestResult::failure(STATUS_OTHER, reason),
        ExecutionOutcome::Completed { response, lease } => {
            let status = response.status();
            let reason_phrase = status.canonical_reason().unwrap_or_default().to_string();

            if status == StatusCode::OK {
                match read_body(response.into_body(), timeouts.socket).await {
                    Ok(body) => {
                        lease.finish(true);
                        RequestResult {
                            status_code: status.as_u16() as i32,
                            reason_phrase,
                            body: Some(body),
                        }
                    }
                    Err(BodyReadError::TimedOut(limit)) => {
                        lease.finish(false);
                        RequestResult::failure(
                            STATUS_SOCKET_TIMEOUT,
                            TransportError::ResponseTimedOut(limit).to_string(),
                        )
                    }
                    Err(BodyReadError::Read(message)) => {
                        lease.finish(false);
                        RequestResult::failure(STATUS_OTHER, message)
                    }
                }
            } else {
                let result = RequestResult {
                    status_code: status.as_u16() as i32,
                    reason_phrase,
                    body: None,
                };
                // Drain so the connection can be reused; a failed drain only
                // costs the connection, never the computed result.
                match read_body(response.into_body(), timeouts.socket).await {
                    Ok(_) => lease.finish(true),
                    Err(BodyReadError::TimedOut(limit)) => {
                        error!(status = status.as_u16(), "failed to drain response within {limit:?}");
                        lease.finish(false);
                    }
                    Err(BodyReadError::Read(message)) => {
                        error!(status = status.as_u16(), "failed to drain response: {message}");
                        lease.finish(false);
                    }
                }
                result
            }
        }
    }
}

async fn read_body(
    body: ResponseBody,
    limit: Duration,
) -> std::result::Result<String, BodyReadError> {
    match tokio::time::timeout(limit, body.collect()).await {
        Err(_) => Err(BodyReadError::TimedOut(limit)),
        Ok(Err(error)) => Err(BodyReadError::Read(error.to_string())),
        Ok(Ok(collected)) => Ok(String::from_utf8_lossy(&collected.to_bytes()).into_owned()),
    }
}
