//! Public API and collaborator traits for the `AuthZ` gateway.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ControlPlaneError, GatewayError, MetadataError};
use crate::models::{
    CredentialState, DecisionVerdict, InboundRequest, InstanceProfileRef, PrivilegeDescriptor,
};

/// Public API trait for the authorization gateway.
///
/// Request-handling code (an HTTP middleware, an RPC interceptor) calls this
/// once per inbound request and only continues the request on `Ok`:
///
/// ```ignore
/// let verdict = gateway.authorize(&request).await?;
/// ```
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// Decide whether the inbound request may proceed.
    ///
    /// # Errors
    ///
    /// - `Authn` if an attestation is present but cannot be verified
    ///   (or is required and missing)
    /// - `Dependency` if privilege resolution or credential refresh fails
    /// - `Transport` if the PDP is unreachable after retries
    /// - `Protocol` if the PDP response is not a verdict
    /// - `Authz` if the PDP did not allow the request
    async fn authorize(&self, request: &InboundRequest) -> Result<DecisionVerdict, GatewayError>;
}

/// Local instance metadata service.
///
/// Reads are idempotent; the service is treated as always available but
/// possibly stale.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Read a metadata path (e.g. `latest/meta-data/iam/security-credentials/`).
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when the service is unreachable or the path is unavailable.
    async fn get(&self, path: &str) -> Result<Bytes, MetadataError>;

    /// Fetch this instance's signed identity document as raw envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when the document cannot be fetched or decoded.
    async fn signed_document(&self) -> Result<Bytes, MetadataError>;
}

/// Region-scoped client for the platform's control-plane API.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Region this client is bound to.
    fn region(&self) -> &str;

    /// Look up the privilege profile attached to a compute instance.
    ///
    /// Returns `Ok(None)` when the instance has no profile attached.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError`] when the lookup cannot be performed.
    async fn instance_profile(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceProfileRef>, ControlPlaneError>;

    /// Resolve a profile reference to its privilege descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError`] when the profile cannot be described.
    async fn describe_profile(
        &self,
        profile: &InstanceProfileRef,
    ) -> Result<PrivilegeDescriptor, ControlPlaneError>;
}

/// Builds region-scoped [`ControlPlaneClient`]s from a credential snapshot.
pub trait ControlPlaneConnector: Send + Sync {
    /// Create a client bound to `credentials.region`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError`] when the client cannot be constructed.
    fn connect(
        &self,
        credentials: &CredentialState,
    ) -> Result<Arc<dyn ControlPlaneClient>, ControlPlaneError>;
}
