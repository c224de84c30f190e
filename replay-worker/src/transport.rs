use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::{Side, TransportError};

/// One of the calculation services under comparison.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub side: Side,
    /// Where calculation requests are POSTed.
    pub calculation_url: Url,
    /// Diagnostic page reporting the installed version.
    pub version_url: Url,
}

impl Endpoint {
    pub fn new(
        side: Side,
        base: &Url,
        calculation_path: &str,
        version_path: &str,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            side,
            calculation_url: base.join(calculation_path)?,
            version_url: base.join(version_path)?,
        })
    }
}

/// Sends a calculation request to an endpoint and returns the raw response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &Endpoint, body: Bytes) -> Result<Bytes, TransportError>;
}

/// A `Transport` over HTTP, sharing one connection pool between both endpoints.
pub struct HttpTransport {
    /// The client used for HTTP requests.
    client: reqwest::Client,
    /// Caps the number of requests, and so connections, in use at any time across both endpoints.
    /// Idle pooled connections are capped separately, see `idle_connections_per_host`.
    connections: Arc<Semaphore>,
}

/// Idle connections kept per endpoint host, so that both endpoints together keep at most
/// `max_connections` idle sockets.
fn idle_connections_per_host(max_connections: usize) -> usize {
    max_connections / 2
}

impl HttpTransport {
    /// Build the HTTP client.
    ///
    /// Certificate verification is skipped when `accept_invalid_certs` is set, as test deployments
    /// of the calculation service commonly run with self-signed certificates.
    pub fn new(
        max_connections: usize,
        request_timeout: time::Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/xml"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Invoice Replay Worker")
            .timeout(request_timeout)
            .pool_max_idle_per_host(idle_connections_per_host(max_connections))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            connections: Arc::new(Semaphore::new(max_connections)),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// POST `body` to the endpoint's calculation URL. Requests are not retried.
    async fn send(&self, endpoint: &Endpoint, body: Bytes) -> Result<Bytes, TransportError> {
        let permit = self
            .connections
            .acquire()
            .await
            .map_err(|_| TransportError::PoolClosedError)?;

        let labels = [("side", endpoint.side.as_str())];
        let now = tokio::time::Instant::now();

        let response = self
            .client
            .post(endpoint.calculation_url.clone())
            .body(body)
            .send()
            .await
            .map_err(TransportError::RequestError)?
            .error_for_status()
            .map_err(TransportError::StatusError)?;

        let body = response.bytes().await.map_err(TransportError::BodyError)?;
        drop(permit);

        metrics::histogram!("replay_request_duration_seconds", &labels)
            .record(now.elapsed().as_secs_f64());

        Ok(body)
    }
}
