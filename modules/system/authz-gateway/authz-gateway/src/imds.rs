//! HTTP client for the local instance metadata service.
//!
//! Uses the session-token flow: a `PUT` mints a token, every read presents
//! it. The token is cached until shortly before its TTL and dropped when the
//! service answers `401`.

use std::time::Duration;

use async_trait::async_trait;
use authz_gateway_sdk::{MetadataClient, MetadataError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const TOKEN_PATH: &str = "latest/api/token";
pub const TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
pub const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
pub const SIGNED_DOCUMENT_PATH: &str = "latest/dynamic/instance-identity/pkcs7";

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(21_600);
/// Renew this long before the service would reject the token.
const TOKEN_RENEW_MARGIN: Duration = Duration::from_secs(60);

struct SessionToken {
    value: String,
    renew_at: Instant,
}

pub struct ImdsClient {
    client: Client<HttpConnector, Full<Bytes>>,
    base: String,
    timeout: Duration,
    token_ttl: Duration,
    token: Mutex<Option<SessionToken>>,
}

impl ImdsClient {
    /// `base` is the service root, e.g. `http://169.254.169.254`.
    #[must_use]
    pub fn new(base: &str, timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            base: base.trim_end_matches('/').to_owned(),
            timeout,
            token_ttl: DEFAULT_TOKEN_TTL,
            token: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        path: &str,
        request: http::Request<Full<Bytes>>,
    ) -> Result<(StatusCode, Bytes), MetadataError> {
        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| MetadataError::Unreachable(format!("{path}: {e}")))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| MetadataError::Unreachable(format!("{path}: {e}")))?
                .to_bytes();
            Ok((status, body))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                MetadataError::Unreachable(format!("{path}: timed out after {:?}", self.timeout))
            })?
    }

    async fn session_token(&self) -> Result<String, MetadataError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref()
            && Instant::now() < token.renew_at
        {
            return Ok(token.value.clone());
        }

        let request = http::Request::builder()
            .method(Method::PUT)
            .uri(self.url(TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, self.token_ttl.as_secs().to_string())
            .body(Full::new(Bytes::new()))
            .map_err(|e| MetadataError::Unreachable(format!("{TOKEN_PATH}: {e}")))?;

        let (status, body) = self.send(TOKEN_PATH, request).await?;
        if !status.is_success() {
            return Err(MetadataError::Status {
                path: TOKEN_PATH.to_owned(),
                status: status.as_u16(),
            });
        }
        let value = String::from_utf8(body.to_vec()).map_err(|e| MetadataError::Malformed {
            path: TOKEN_PATH.to_owned(),
            reason: e.to_string(),
        })?;
        let value = value.trim().to_owned();
        debug!("Minted metadata session token");

        *slot = Some(SessionToken {
            value: value.clone(),
            renew_at: Instant::now() + self.token_ttl.saturating_sub(TOKEN_RENEW_MARGIN),
        });
        Ok(value)
    }

    async fn read(&self, path: &str) -> Result<(StatusCode, Bytes), MetadataError> {
        let token = self.session_token().await?;
        let request = http::Request::builder()
            .method(Method::GET)
            .uri(self.url(path))
            .header(TOKEN_HEADER, token)
            .body(Full::new(Bytes::new()))
            .map_err(|e| MetadataError::Unreachable(format!("{path}: {e}")))?;
        self.send(path, request).await
    }
}

#[async_trait]
impl MetadataClient for ImdsClient {
    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Bytes, MetadataError> {
        let (mut status, mut body) = self.read(path).await?;
        if status == StatusCode::UNAUTHORIZED {
            // Token expired server-side; mint a new one and retry once.
            *self.token.lock().await = None;
            (status, body) = self.read(path).await?;
        }
        if !status.is_success() {
            return Err(MetadataError::Status {
                path: path.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(body)
    }

    async fn signed_document(&self) -> Result<Bytes, MetadataError> {
        let text = self.get(SIGNED_DOCUMENT_PATH).await?;
        let compact: Vec<u8> = text
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let der = STANDARD
            .decode(&compact)
            .map_err(|e| MetadataError::Malformed {
                path: SIGNED_DOCUMENT_PATH.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Bytes::from(der))
    }
}
