//! Transport layer: one attempt, one classified outcome.
//!
//! The executor never inspects error message text. Every transport failure
//! carries a `TransportErrorKind`, and only the enumerated transient kinds
//! are eligible for proxy rotation.

use crate::proxy::Proxy;

use async_trait::async_trait;
use http::header::LOCATION;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The per-attempt deadline elapsed.
    Timeout,
    ConnectionRefused,
    /// The peer closed the connection mid-exchange.
    ConnectionClosed,
    /// The attempt was aborted before completing.
    Aborted,
    /// The proxy itself was unusable (bad URL, unreachable endpoint).
    Proxy,
    /// Anything else: DNS, TLS, malformed response, builder failures.
    Other,
}

impl TransportErrorKind {
    /// Transient kinds are retried by rotating proxies; everything else
    /// propagates to the caller untouched.
    pub fn is_retriable(self) -> bool {
        !matches!(self, TransportErrorKind::Other)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::ConnectionClosed => "connection closed",
            TransportErrorKind::Aborted => "aborted",
            TransportErrorKind::Proxy => "proxy",
            TransportErrorKind::Other => "transport",
        };
        f.write_str(s)
    }
}

/// A failed attempt, classified.
#[derive(Debug, Error)]
#[error("{kind} error for {url}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub url: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportErrorKind,
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            url: url.into(),
            source: Some(source.into()),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// One outbound attempt as handed to the transport.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub proxy: Option<Proxy>,
    pub timeout: Duration,
}

/// A completed response. Application-level failures (4xx/5xx) are ordinary
/// responses here; the transport only errors on transport-level conditions.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// URL the response was served from.
    pub url: String,
}

impl TransportResponse {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Redirect statuses the executor follows manually.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status.as_u16(), 301 | 302 | 303 | 307 | 308)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION)?.to_str().ok()
    }
}

/// The seam between the executor and the network. Implemented by
/// `ReqwestTransport` in production and by scripted fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, attempt: &AttemptRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport: a fresh reqwest client per attempt so each attempt
/// can bind a different proxy. Redirects are disabled here; the executor
/// follows them manually to keep proxy and cookie state consistent.
#[derive(Debug, Default)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, attempt: &AttemptRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(attempt.timeout);

        if let Some(proxy) = &attempt.proxy {
            let reqwest_proxy = reqwest::Proxy::all(proxy.url()).map_err(|e| {
                TransportError::with_source(TransportErrorKind::Proxy, &attempt.url, e)
            })?;
            builder = builder.proxy(reqwest_proxy);
        }

        let client = builder.build().map_err(|e| {
            TransportError::with_source(TransportErrorKind::Other, &attempt.url, e)
        })?;

        let mut request = client
            .request(attempt.method.clone(), &attempt.url)
            .headers(attempt.headers.clone());
        if let Some(body) = &attempt.body {
            request = request.body(body.clone());
        }

        // reqwest's own timeout covers the full exchange, but a second race
        // here turns a wedged connect/read into a classified Timeout as well.
        let response = match tokio::time::timeout(attempt.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let kind = classify_reqwest(&e);
                return Err(TransportError::with_source(kind, &attempt.url, e));
            }
            Err(_) => {
                return Err(TransportError::new(TransportErrorKind::Timeout, &attempt.url));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let body = response.bytes().await.map_err(|e| {
            let kind = classify_reqwest(&e);
            TransportError::with_source(kind, &attempt.url, e)
        })?;

        Ok(TransportResponse {
            status,
            headers,
            body: body.to_vec(),
            url,
        })
    }
}

/// Map a reqwest error onto the kind enum by inspecting its flags and any
/// `std::io::Error` in its source chain.
pub(crate) fn classify_reqwest(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    if error.is_connect() {
        return TransportErrorKind::ConnectionRefused;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            return match io.kind() {
                ErrorKind::TimedOut => TransportErrorKind::Timeout,
                ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => TransportErrorKind::ConnectionClosed,
                ErrorKind::Interrupted => TransportErrorKind::Aborted,
                _ => TransportErrorKind::Other,
            };
        }
        source = cause.source();
    }

    TransportErrorKind::Other
}
