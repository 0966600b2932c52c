//! Transport layer: route keys and the HTTP/1.1 connector
//!
//! Connections are plain `hyper` HTTP/1.1 channels over TCP (optionally
//! wrapped in TLS), driven by a spawned background task. The pool talks to
//! them through the [`Channel`]/[`Connector`] seam so tests can substitute
//! an in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as TlsClientConfig, RootCertStore};
use tracing::trace;
use url::Url;

use crate::errors::TransportError;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed response body so mock and real transports share one response type.
pub(crate) type ResponseBody = BoxBody<Bytes, BoxError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scheme {
    Http,
    Https,
}

/// The pool's routing key: scheme + host + port.
///
/// Connections are never shared across routes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Route {
    pub(crate) fn from_url(url: &Url) -> std::result::Result<Self, String> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(format!("unsupported scheme: {other}")),
        };
        let host = url
            .host_str()
            .ok_or_else(|| format!("url has no host: {url}"))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("url has no port: {url}"))?;
        Ok(Self { scheme, host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Host header value: the port is elided when it is the scheme default.
    pub(crate) fn authority(&self) -> String {
        let default_port = match self.scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// A live HTTP/1.1 connection held by the pool.
#[async_trait]
pub(crate) trait Channel: Send {
    /// Exchange one request for one response.
    async fn send(
        &mut self,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<Response<ResponseBody>, TransportError>;

    /// Cheap liveness check used before reusing an idle connection.
    fn is_live(&self) -> bool;
}

/// Opens new [`Channel`]s for a route.
#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn connect(
        &self,
        route: &Route,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn Channel>, TransportError>;
}

/// Production connector: TCP connect, optional TLS, HTTP/1.1 handshake.
pub(crate) struct HyperConnector {
    tls: TlsConnector,
}

impl HyperConnector {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = TlsClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }
}

#[async_trait]
impl Connector for HyperConnector {
    async fn connect(
        &self,
        route: &Route,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn Channel>, TransportError> {
        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((route.host(), route.port())),
        )
        .await
        .map_err(|_| TransportError::ConnectTimedOut(timeout))?
        .map_err(|e| TransportError::Connect(e.to_string()))?;
        stream.set_nodelay(true).ok();

        if route.is_tls() {
            let server_name = ServerName::try_from(route.host().to_string())
                .map_err(|_| TransportError::Handshake("invalid dns name".to_string()))?;
            let tls_stream = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            handshake_http1(tls_stream, route).await
        } else {
            handshake_http1(stream, route).await
        }
    }
}

async fn handshake_http1<T>(
    io: T,
    route: &Route,
) -> std::result::Result<Box<dyn Channel>, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    let label = route.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            trace!(route = %label, "connection closed: {e}");
        }
    });

    Ok(Box::new(HyperChannel { sender }))
}

struct HyperChannel {
    sender: http1::SendRequest<Full<Bytes>>,
}

#[async_trait]
impl Channel for HyperChannel {
    async fn send(
        &mut self,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<Response<ResponseBody>, TransportError> {
        let response = self
            .sender
            .send_request(request)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(response.map(|body| body.map_err(|e| Box::new(e) as BoxError).boxed()))
    }

    fn is_live(&self) -> bool {
        !self.sender.is_closed() && self.sender.is_ready()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport used across the crate's tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::{Method, Request, Response};
    use parking_lot::Mutex;

    use super::{Channel, Connector, ResponseBody, Route};
    use crate::errors::TransportError;
    use async_trait::async_trait;

    type Responder =
        Arc<dyn Fn(usize) -> std::result::Result<(u16, String), String> + Send + Sync>;

    /// One request as the transport saw it.
    pub(crate) struct RecordedRequest {
        pub method: Method,
        pub uri: String,
        pub host: Option<String>,
        pub content_type: Option<String>,
        pub body: String,
    }

    pub(crate) struct MockConnector {
        pub connects: AtomicUsize,
        pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
        next_id: AtomicUsize,
        refuse: bool,
        send_delay: Duration,
        live: Arc<AtomicBool>,
        responder: Responder,
    }

    impl MockConnector {
        pub fn with_status(status: u16, body: &str) -> Self {
            let body = body.to_string();
            Self::with_responder(Arc::new(move |_| Ok((status, body.clone()))))
        }

        /// Responds 200 with `conn-<id>` so tests can tell connections apart.
        pub fn echoing_connection_id() -> Self {
            Self::with_responder(Arc::new(|id| Ok((200, format!("conn-{id}")))))
        }

        pub fn with_responder(responder: Responder) -> Self {
            Self {
                connects: AtomicUsize::new(0),
                requests: Arc::new(Mutex::new(Vec::new())),
                next_id: AtomicUsize::new(0),
                refuse: false,
                send_delay: Duration::ZERO,
                live: Arc::new(AtomicBool::new(true)),
                responder,
            }
        }

        pub fn refusing() -> Self {
            let mut connector = Self::with_status(200, "");
            connector.refuse = true;
            connector
        }

        pub fn with_send_delay(mut self, delay: Duration) -> Self {
            self.send_delay = delay;
            self
        }

        /// Shared switch that marks every handed-out connection dead.
        pub fn liveness_switch(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.live)
        }

        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            _route: &Route,
            _timeout: Duration,
        ) -> std::result::Result<Box<dyn Channel>, TransportError> {
            if self.refuse {
                return Err(TransportError::Connect("connection refused".to_string()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockChannel {
                id,
                send_delay: self.send_delay,
                live: Arc::clone(&self.live),
                responder: Arc::clone(&self.responder),
                requests: Arc::clone(&self.requests),
            }))
        }
    }

    struct MockChannel {
        id: usize,
        send_delay: Duration,
        live: Arc<AtomicBool>,
        responder: Responder,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    #[async_trait]
    impl Channel for MockChannel {
        async fn send(
            &mut self,
            request: Request<Full<Bytes>>,
        ) -> std::result::Result<Response<ResponseBody>, TransportError> {
            let (parts, body) = request.into_parts();
            let bytes = body.collect().await.expect("request body").to_bytes();
            self.requests.lock().push(RecordedRequest {
                method: parts.method.clone(),
                uri: parts.uri.to_string(),
                host: header_string(&parts.headers, hyper::header::HOST),
                content_type: header_string(&parts.headers, hyper::header::CONTENT_TYPE),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });

            if !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }

            match (self.responder)(self.id) {
                Ok((status, body)) => Ok(mock_response(status, &body)),
                Err(message) => Err(TransportError::Protocol(message)),
            }
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    fn header_string(
        headers: &hyper::HeaderMap,
        name: hyper::header::HeaderName,
    ) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub(crate) fn mock_response(status: u16, body: &str) -> Response<ResponseBody> {
        Response::builder()
            .status(status)
            .body(
                Full::new(Bytes::from(body.to_string()))
                    .map_err(|never| match never {})
                    .boxed(),
            )
            .expect("mock response")
    }
}
