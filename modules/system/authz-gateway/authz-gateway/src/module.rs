//! `AuthZ` gateway assembly.

use std::net::SocketAddr;
use std::sync::Arc;

use authz_gateway_sdk::{AuthorizationClient, ControlPlaneConnector, MetadataClient};
use tracing::info;

use crate::config::GatewayConfig;
use crate::domain::{
    AttestationSigner, AuthzGatewayLocalClient, CredentialRotator, DecisionClient, DomainError,
    HttpTransport, InstanceTrustVerifier, PrivilegeResolver, Service, TrustAnchor,
};
use crate::imds::ImdsClient;
use crate::middleware::AuthzState;

/// A fully wired gateway: the ingress client, the egress signer and the
/// credential rotator they share.
///
/// Every component is built once here and shared by all request tasks.
/// The trust anchor is read at this point only; rotating it means
/// building a new gateway.
pub struct AuthzGateway {
    service: Arc<Service>,
    signer: AttestationSigner,
    rotator: Arc<CredentialRotator>,
}

impl AuthzGateway {
    /// Wire the gateway against the metadata service at `cfg.metadata_endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] if the configuration is invalid, the trust
    /// anchor cannot be loaded, or the HTTP client cannot be built.
    pub fn init(
        cfg: &GatewayConfig,
        connector: Arc<dyn ControlPlaneConnector>,
    ) -> Result<Self, DomainError> {
        let metadata = Arc::new(ImdsClient::new(
            &cfg.metadata_endpoint,
            cfg.metadata_timeout(),
        ));
        Self::with_metadata(cfg, metadata, connector)
    }

    /// Wire the gateway against an arbitrary metadata client.
    ///
    /// # Errors
    ///
    /// As [`Self::init`].
    #[tracing::instrument(skip_all)]
    pub fn with_metadata(
        cfg: &GatewayConfig,
        metadata: Arc<dyn MetadataClient>,
        connector: Arc<dyn ControlPlaneConnector>,
    ) -> Result<Self, DomainError> {
        cfg.validate()?;

        let endpoint = cfg.decision_endpoint()?;
        let transport = Arc::new(HttpTransport::new(
            cfg.connect_timeout(),
            cfg.read_timeout(),
        )?);
        let decisions = DecisionClient::new(transport, cfg.retry_policy());
        let rotator = Arc::new(CredentialRotator::new(
            Arc::clone(&metadata),
            connector,
            cfg.credential_refresh_skew(),
        ));

        let mut service = Service::new(endpoint.clone(), decisions)
            .with_attestation_header(&cfg.attestation_header)
            .require_attestation(cfg.require_attestation);

        if let Some(path) = &cfg.trust_anchor_path {
            let anchor = TrustAnchor::load(path)?;
            info!(path = %path.display(), certificates = anchor.len(), "Loaded trust anchor");
            service = service.with_instance_identity(
                InstanceTrustVerifier::new(anchor),
                Arc::new(PrivilegeResolver::new(Arc::clone(&rotator))),
            );
        } else {
            info!("No trust anchor configured; attested requests will be rejected");
        }

        let signer = AttestationSigner::new(metadata, &cfg.attestation_header)?
            .with_cache(cfg.cache_attestation);

        info!(
            endpoint = %endpoint,
            require_attestation = cfg.require_attestation,
            "Initialized authz_gateway"
        );
        Ok(Self {
            service: Arc::new(service),
            signer,
            rotator,
        })
    }

    /// Ingress client for request-handling code.
    #[must_use]
    pub fn client(&self) -> Arc<dyn AuthorizationClient> {
        Arc::new(AuthzGatewayLocalClient::new(Arc::clone(&self.service)))
    }

    /// State for [`crate::middleware::authz_middleware`].
    #[must_use]
    pub fn middleware_state(&self, local_addr: SocketAddr) -> AuthzState {
        AuthzState::new(self.client(), local_addr)
    }

    #[must_use]
    pub fn signer(&self) -> &AttestationSigner {
        &self.signer
    }

    #[must_use]
    pub fn rotator(&self) -> &Arc<CredentialRotator> {
        &self.rotator
    }

    #[must_use]
    pub fn decision_endpoint(&self) -> &str {
        self.service.endpoint()
    }
}
