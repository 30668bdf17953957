//! Domain errors for the `AuthZ` gateway.

use authz_gateway_sdk::GatewayError;

/// Internal domain errors.
#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("invalid decision endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<DomainError> for GatewayError {
    fn from(e: DomainError) -> Self {
        match e {
            // An unusable anchor means no identity can be verified.
            DomainError::InvalidTrustAnchor(reason) => Self::Authn(reason),
            DomainError::InvalidEndpoint(reason) | DomainError::InvalidConfig(reason) => {
                Self::Protocol(reason)
            }
            DomainError::Io { .. } => Self::Dependency(e.to_string()),
        }
    }
}
