//! Domain service for the `AuthZ` gateway.
//!
//! The pipeline is an explicit sequence of stages, each taking and returning
//! plain values: identity (optional), context, decision, verdict.
//! [`Service::authorize`] is the only place the sequence short-circuits.

use std::sync::Arc;

use authz_gateway_sdk::{
    CloudContext, DecisionVerdict, GatewayError, InboundRequest, canonical_header_key,
};
use tracing::debug;

use super::context_builder::RequestContextBuilder;
use super::decision_client::DecisionClient;
use super::privilege::PrivilegeResolver;
use super::trust::InstanceTrustVerifier;

/// Default name of the attestation header.
pub const DEFAULT_ATTESTATION_HEADER: &str = "x-instance-attestation";

struct InstanceIdentity {
    verifier: InstanceTrustVerifier,
    resolver: Arc<PrivilegeResolver>,
}

/// `AuthZ` gateway service.
pub struct Service {
    endpoint: String,
    decisions: DecisionClient,
    context: RequestContextBuilder,
    /// Canonical attestation header name, bare and in CGI form.
    attestation_keys: [String; 2],
    require_attestation: bool,
    identity: Option<InstanceIdentity>,
}

impl Service {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, decisions: DecisionClient) -> Self {
        Self {
            endpoint: endpoint.into(),
            decisions,
            context: RequestContextBuilder::new(),
            attestation_keys: attestation_keys(DEFAULT_ATTESTATION_HEADER),
            require_attestation: false,
            identity: None,
        }
    }

    /// Enable attestation verification and privilege resolution.
    #[must_use]
    pub fn with_instance_identity(
        mut self,
        verifier: InstanceTrustVerifier,
        resolver: Arc<PrivilegeResolver>,
    ) -> Self {
        self.identity = Some(InstanceIdentity { verifier, resolver });
        self
    }

    #[must_use]
    pub fn with_attestation_header(mut self, name: &str) -> Self {
        self.attestation_keys = attestation_keys(name);
        self
    }

    /// Reject requests that carry no attestation.
    #[must_use]
    pub fn require_attestation(mut self, required: bool) -> Self {
        self.require_attestation = required;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run the authorization pipeline for one inbound request.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Authn`] if an attestation is present and does not
    ///   verify, or is required and missing
    /// - [`GatewayError::Dependency`] if privilege resolution fails
    /// - [`GatewayError::Transport`] / [`GatewayError::Protocol`] from the decision call
    /// - [`GatewayError::Authz`] if the PDP did not allow the request
    #[tracing::instrument(
        skip_all,
        fields(method = %request.meta.method, path = %request.meta.path, source = %request.source)
    )]
    pub async fn authorize(
        &self,
        request: &InboundRequest,
    ) -> Result<DecisionVerdict, GatewayError> {
        let cloud = self.cloud_context(request).await?;

        let input = self.context.build(
            &request.meta,
            request.source,
            request.destination,
            cloud,
        );
        let verdict = self.decisions.decide(&self.endpoint, &input).await?;

        if verdict.allowed {
            Ok(verdict)
        } else {
            Err(GatewayError::Authz {
                decision_id: verdict.decision_id,
            })
        }
    }

    async fn cloud_context(
        &self,
        request: &InboundRequest,
    ) -> Result<Option<CloudContext>, GatewayError> {
        let [bare, cgi] = &self.attestation_keys;
        let header = request
            .meta
            .header(bare)
            .or_else(|| request.meta.header(cgi));
        let Some(header) = header else {
            if self.require_attestation {
                return Err(GatewayError::Authn(
                    "instance attestation is required".to_owned(),
                ));
            }
            debug!("No instance attestation, deciding without cloud context");
            return Ok(None);
        };

        // A present attestation is never ignored, even when nothing can check it.
        let identity = self.identity.as_ref().ok_or_else(|| {
            GatewayError::Authn(
                "instance attestation received but no trust anchor is configured".to_owned(),
            )
        })?;

        let claims = identity.verifier.verify_header(header)?;
        let privilege = identity
            .resolver
            .resolve(&claims.instance_id, &claims.region)
            .await?;

        Ok(Some(CloudContext {
            identity: claims,
            privilege,
        }))
    }
}

fn attestation_keys(name: &str) -> [String; 2] {
    let bare = canonical_header_key(name);
    let cgi = format!("HTTP_{bare}");
    [bare, cgi]
}
