//! Local (in-process) client for the `AuthZ` gateway.

use std::sync::Arc;

use async_trait::async_trait;
use authz_gateway_sdk::{
    AuthorizationClient, DecisionVerdict, ErrorKind, GatewayError, InboundRequest,
};

use super::Service;

/// Local client wrapping the service.
pub struct AuthzGatewayLocalClient {
    svc: Arc<Service>,
}

impl AuthzGatewayLocalClient {
    #[must_use]
    pub fn new(svc: Arc<Service>) -> Self {
        Self { svc }
    }
}

/// Policy denials are routine; failures to decide are not.
fn log_outcome(e: &GatewayError) {
    match e.kind() {
        ErrorKind::Authz => tracing::debug!(error = %e, "Request denied by policy"),
        ErrorKind::Authn => tracing::warn!(error = %e, "Instance identity rejected"),
        ErrorKind::Dependency | ErrorKind::Transport | ErrorKind::Protocol => {
            tracing::error!(error = %e, kind = ?e.kind(), "authz_gateway could not decide");
        }
    }
}

#[async_trait]
impl AuthorizationClient for AuthzGatewayLocalClient {
    async fn authorize(&self, request: &InboundRequest) -> Result<DecisionVerdict, GatewayError> {
        self.svc.authorize(request).await.inspect_err(log_outcome)
    }
}
