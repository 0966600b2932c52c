//! Request building and execution
//!
//! Builds the wire request (body or query string), checks a connection out
//! of the pool and exchanges the request, classifying what happened into an
//! [`ExecutionOutcome`]. Success/failure semantics are decided downstream by
//! the result normalizer, not here.

use std::time::Instant;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Response, header};
use tracing::info;
use url::Url;
use url::form_urlencoded;

use crate::config::TimeoutConfig;
use crate::errors::{Error, PoolError, Result, TransportError};
use crate::pool::{ConnectionPool, Lease};
use crate::transport::{ResponseBody, Route};

/// Request payload: an already-serialized JSON document, or an ordered form
/// parameter list.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Json(String),
    Form(Vec<(String, String)>),
}

impl Payload {
    fn is_missing(&self) -> bool {
        match self {
            Payload::Json(json) => json.is_empty(),
            Payload::Form(_) => false,
        }
    }

    /// Serialize for the request body (POST) or query string (GET).
    ///
    /// JSON is passed through as-is; form pairs are joined with `&` in
    /// insertion order and percent-escaped per the form media type.
    fn encode(&self) -> String {
        match self {
            Payload::Json(json) => json.clone(),
            Payload::Form(pairs) => {
                let mut serializer = form_urlencoded::Serializer::new(String::new());
                for (key, value) in pairs {
                    serializer.append_pair(key, value);
                }
                serializer.finish()
            }
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            Payload::Json(_) => "application/json; charset=utf-8",
            Payload::Form(_) => "application/x-www-form-urlencoded; charset=utf-8",
        }
    }
}

/// What the transport round trip produced, for the normalizer to interpret.
pub(crate) enum ExecutionOutcome {
    /// The server produced a status line; the body has not been read yet.
    Completed { response: Response<ResponseBody>, lease: Lease },

    /// Connection could not be established (refused, unreachable, connect
    /// timeout) or the pool wait expired.
    ConnectFailed { reason: String },

    /// Connection established but no response within the socket timeout.
    TimedOut { reason: String },

    /// Anything else: bad URL, handshake failure, protocol error.
    Failed { reason: String },
}

/// Splice serialized parameters onto a URL's query string.
pub(crate) fn url_append(url: &str, params: &str) -> String {
    if url.contains('?') {
        format!("{url}&{params}")
    } else {
        format!("{url}?{params}")
    }
}

/// Execute one request through the pool.
///
/// Fails fast with [`Error::InvalidArgument`] when the URL or payload is
/// missing; every later problem is folded into the returned outcome.
pub(crate) async fn execute(
    pool: &ConnectionPool,
    timeouts: &TimeoutConfig,
    method: Method,
    url: &str,
    payload: Payload,
) -> Result<ExecutionOutcome> {
    if url.trim().is_empty() {
        return Err(Error::InvalidArgument("request url"));
    }
    if payload.is_missing() {
        return Err(Error::InvalidArgument("request payload"));
    }
    Ok(execute_checked(pool, timeouts, method, url, payload).await)
}

async fn execute_checked(
    pool: &ConnectionPool,
    timeouts: &TimeoutConfig,
    method: Method,
    url: &str,
    payload: Payload,
) -> ExecutionOutcome {
    let encoded = payload.encode();
    let target = if method == Method::GET {
        url_append(url, &encoded)
    } else {
        url.to_string()
    };

    let parsed = match Url::parse(&target) {
        Ok(parsed) => parsed,
        Err(error) => {
            return ExecutionOutcome::Failed {
                reason: format!("invalid url {target:?}: {error}"),
            };
        }
    };
    let route = match Route::from_url(&parsed) {
        Ok(route) => route,
        Err(reason) => return ExecutionOutcome::Failed { reason },
    };
    let request = match build_request(&method, &parsed, &route, &payload, encoded) {
        Ok(request) => request,
        Err(reason) => return ExecutionOutcome::Failed { reason },
    };

    let started = Instant::now();
    let mut lease = match pool.acquire(&route, timeouts).await {
        Ok(lease) => lease,
        Err(error) => return classify_acquire_failure(error),
    };

    let response = match tokio::time::timeout(timeouts.socket, lease.send(request)).await {
        Err(_) => {
            lease.finish(false);
            return ExecutionOutcome::TimedOut {
                reason: TransportError::ResponseTimedOut(timeouts.socket).to_string(),
            };
        }
        Ok(Err(error)) => {
            lease.finish(false);
            return ExecutionOutcome::Failed {
                reason: error.to_string(),
            };
        }
        Ok(Ok(response)) => response,
    };

    let elapsed = started.elapsed();
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        status = response.status().as_u16(),
        route = %route,
        "request completed"
    );

    ExecutionOutcome::Completed { response, lease }
}

fn classify_acquire_failure(error: PoolError) -> ExecutionOutcome {
    match error {
        PoolError::AcquireTimeout(_) => ExecutionOutcome::ConnectFailed {
            reason: error.to_string(),
        },
        PoolError::Transport(TransportError::ConnectTimedOut(_))
        | PoolError::Transport(TransportError::Connect(_)) => ExecutionOutcome::ConnectFailed {
            reason: error.to_string(),
        },
        PoolError::Transport(_) | PoolError::Closed => ExecutionOutcome::Failed {
            reason: error.to_string(),
        },
    }
}

fn build_request(
    method: &Method,
    url: &Url,
    route: &Route,
    payload: &Payload,
    encoded: String,
) -> std::result::Result<Request<Full<Bytes>>, String> {
    // Origin-form target: the authority travels in the Host header.
    let target = &url[url::Position::BeforePath..];
    let uri: hyper::Uri = target
        .parse()
        .map_err(|error| format!("invalid request target {target:?}: {error}"))?;

    let mut builder = Request::builder()
        .method(method.clone())
        .uri(uri)
        .header(header::HOST, route.authority());

    let body = if *method == Method::POST {
        builder = builder.header(header::CONTENT_TYPE, payload.content_type());
        Bytes::from(encoded)
    } else {
        Bytes::new()
    };

    builder
        .body(Full::new(body))
        .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::transport::Connector;
    use crate::transport::mock::MockConnector;
    use std::sync::Arc;

    #[test]
    fn url_append_uses_question_mark_without_existing_query() {
        assert_eq!(url_append("http://h/a", "k=v"), "http://h/a?k=v");
    }

    #[test]
    fn url_append_uses_ampersand_with_existing_query() {
        assert_eq!(url_append("http://h/a?x=1", "k=v"), "http://h/a?x=1&k=v");
    }

    #[test]
    fn form_pairs_encode_in_order_with_escaping() {
        let payload = Payload::Form(vec![
            ("first".to_string(), "a value".to_string()),
            ("second".to_string(), "x&y=z".to_string()),
        ]);
        assert_eq!(payload.encode(), "first=a+value&second=x%26y%3Dz");
    }

    #[test]
    fn json_payload_passes_through_unchanged() {
        let payload = Payload::Json(r#"{"key":"value"}"#.to_string());
        assert_eq!(payload.encode(), r#"{"key":"value"}"#);
    }

    #[tokio::test]
    async fn missing_url_fails_fast_without_touching_the_transport() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = ConnectionPool::new(
            &PoolConfig::new(),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );

        let outcome = execute(
            &pool,
            &TimeoutConfig::default(),
            Method::POST,
            "",
            Payload::Json("{}".to_string()),
        )
        .await;

        assert!(matches!(outcome, Err(Error::InvalidArgument("request url"))));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn missing_payload_fails_fast_without_touching_the_transport() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = ConnectionPool::new(
            &PoolConfig::new(),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );

        let outcome = execute(
            &pool,
            &TimeoutConfig::default(),
            Method::POST,
            "http://upstream.test/api",
            Payload::Json(String::new()),
        )
        .await;

        assert!(matches!(outcome, Err(Error::InvalidArgument("request payload"))));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn malformed_url_is_an_outcome_not_an_argument_error() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = ConnectionPool::new(
            &PoolConfig::new(),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );

        let outcome = execute(
            &pool,
            &TimeoutConfig::default(),
            Method::POST,
            "not a url",
            Payload::Json("{}".to_string()),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
        assert_eq!(connector.connect_count(), 0);
    }
}
