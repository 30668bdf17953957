//! HTTP transport used by the decision client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use http::header::{CONTENT_TYPE, HOST};
use http::uri::PathAndQuery;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use tower::ServiceExt;
use tracing::{debug, warn};

use super::error::DomainError;

/// A response that made it back over the wire, whatever its status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-level failure; the only kind of failure that is retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportFailure {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("i/o failure: {0}")]
    Io(String),
}

/// Seam between the decision client and the network.
#[async_trait]
pub trait DecisionTransport: Send + Sync {
    /// POST a JSON body and return the response, whatever its status.
    async fn post_json(
        &self,
        endpoint: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportFailure>;
}

/// `hyper` HTTP/1 transport speaking plain HTTP and HTTPS (platform roots).
///
/// Every attempt has two bounded phases: connection establishment (TCP and
/// TLS) within `connect_timeout`, then request and full response within
/// `read_timeout`.
pub struct HttpTransport {
    connector: HttpsConnector<HttpConnector>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidConfig`] if the TLS configuration cannot be built.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, DomainError> {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(connect_timeout));
        http.enforce_http(false);

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(platform_tls_config()?)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        Ok(Self {
            connector,
            connect_timeout,
            read_timeout,
        })
    }
}

fn platform_tls_config() -> Result<rustls::ClientConfig, DomainError> {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        warn!(error = %err, "Failed to load a platform root certificate");
    }
    let mut roots = rustls::RootCertStore::empty();
    let (_added, ignored) = roots.add_parsable_certificates(loaded.certs);
    if ignored > 0 {
        warn!(ignored, "Ignored unparsable platform root certificates");
    }
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DomainError::InvalidConfig(format!("tls: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

#[async_trait]
impl DecisionTransport for HttpTransport {
    async fn post_json(
        &self,
        endpoint: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportFailure> {
        let uri: Uri = endpoint
            .parse()
            .map_err(|e| TransportFailure::Io(format!("invalid endpoint '{endpoint}': {e}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| TransportFailure::Io(format!("endpoint '{endpoint}' has no host")))?
            .to_string();
        let target = uri
            .path_and_query()
            .map_or("/", PathAndQuery::as_str)
            .to_owned();

        let io = tokio::time::timeout(self.connect_timeout, self.connector.clone().oneshot(uri))
            .await
            .map_err(|_| TransportFailure::Timeout(self.connect_timeout))?
            .map_err(|e| TransportFailure::Connect(e.to_string()))?;

        let request = http::Request::post(target)
            .header(HOST, authority)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(body))
            .map_err(|e| TransportFailure::Io(format!("invalid request: {e}")))?;

        let exchange = async move {
            let (mut sender, connection) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| TransportFailure::Io(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(error = %e, "Decision connection closed with error");
                }
            });

            let response = sender
                .send_request(request)
                .await
                .map_err(|e| TransportFailure::Io(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| TransportFailure::Io(e.to_string()))?
                .to_bytes();
            Ok(TransportResponse { status, body })
        };

        tokio::time::timeout(self.read_timeout, exchange)
            .await
            .map_err(|_| TransportFailure::Timeout(self.read_timeout))?
    }
}
