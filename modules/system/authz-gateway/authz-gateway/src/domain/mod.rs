//! Domain layer for the `AuthZ` gateway.

pub mod context_builder;
pub mod credentials;
pub mod decision_client;
pub mod endpoint;
pub mod error;
pub mod local_client;
pub mod privilege;
pub mod service;
pub mod signer;
pub mod transport;
pub mod trust;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod test_support;

pub use context_builder::RequestContextBuilder;
pub use credentials::{CredentialRotator, CredentialSnapshot, RotatorState};
pub use decision_client::{DecisionClient, RetryPolicy};
pub use endpoint::endpoint;
pub use error::DomainError;
pub use local_client::AuthzGatewayLocalClient;
pub use privilege::PrivilegeResolver;
pub use service::Service;
pub use signer::AttestationSigner;
pub use transport::{DecisionTransport, HttpTransport, TransportFailure, TransportResponse};
pub use trust::{InstanceTrustVerifier, TrustAnchor};
