//! Egress attestation: stamps this instance's signed identity document onto
//! outgoing requests.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use authz_gateway_sdk::{GatewayError, MetadataClient};
use http::{HeaderName, HeaderValue};
use tracing::debug;

use super::error::DomainError;
use super::trust::encode_attestation;

pub struct AttestationSigner {
    metadata: Arc<dyn MetadataClient>,
    header: HeaderName,
    /// `None` disables caching; an empty slot means nothing fetched yet.
    cache: Option<ArcSwapOption<HeaderValue>>,
}

impl AttestationSigner {
    /// Signer that fetches afresh on every call.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidConfig`] if `header` is not a valid header name.
    pub fn new(metadata: Arc<dyn MetadataClient>, header: &str) -> Result<Self, DomainError> {
        let header = HeaderName::try_from(header)
            .map_err(|e| DomainError::InvalidConfig(format!("attestation header '{header}': {e}")))?;
        Ok(Self {
            metadata,
            header,
            cache: None,
        })
    }

    /// Keep the first successfully fetched document for the process lifetime.
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(ArcSwapOption::<HeaderValue>::empty);
        self
    }

    #[must_use]
    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }

    /// Set the attestation header on `request`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Dependency`] if the document cannot be fetched.
    pub async fn attach<B>(
        &self,
        mut request: http::Request<B>,
    ) -> Result<http::Request<B>, GatewayError> {
        let value = self.header_value().await?;
        request.headers_mut().insert(self.header.clone(), value);
        Ok(request)
    }

    /// The encoded attestation, from cache when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Dependency`] if the document cannot be fetched.
    pub async fn header_value(&self) -> Result<HeaderValue, GatewayError> {
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.load_full()) {
            return Ok(HeaderValue::clone(&cached));
        }

        let envelope = self.metadata.signed_document().await?;
        let value = HeaderValue::try_from(encode_attestation(&envelope))
            .map_err(|e| GatewayError::Dependency(format!("unencodable attestation: {e}")))?;
        debug!(bytes = envelope.len(), "Fetched instance attestation");

        if let Some(cache) = &self.cache {
            cache.store(Some(Arc::new(value.clone())));
        }
        Ok(value)
    }
}
