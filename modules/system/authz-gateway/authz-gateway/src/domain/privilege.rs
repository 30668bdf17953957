//! Privilege resolution for verified instance identities.

use std::sync::Arc;

use authz_gateway_sdk::{ControlPlaneClient, ControlPlaneError, GatewayError, PrivilegeDescriptor};
use tracing::{debug, error, warn};

use super::credentials::CredentialRotator;

/// Resolves an instance's attached privilege profile through region-scoped
/// control-plane clients.
pub struct PrivilegeResolver {
    rotator: Arc<CredentialRotator>,
}

impl PrivilegeResolver {
    #[must_use]
    pub fn new(rotator: Arc<CredentialRotator>) -> Self {
        Self { rotator }
    }

    /// `Ok(None)` when the instance has no profile attached.
    ///
    /// An expired-credentials answer triggers one refresh and one retry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Dependency`] when credentials cannot be obtained
    /// or the control plane cannot be used.
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id, region = %region))]
    pub async fn resolve(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<Option<PrivilegeDescriptor>, GatewayError> {
        let snapshot = self.rotator.snapshot_for(region).await?;

        let resolved = match lookup(snapshot.control_plane().as_ref(), instance_id).await {
            Err(ControlPlaneError::CredentialsExpired) => {
                warn!("Control plane rejected credentials, refreshing once");
                let snapshot = self.rotator.refresh_stale(&snapshot).await?;
                lookup(snapshot.control_plane().as_ref(), instance_id).await
            }
            other => other,
        };

        match resolved {
            Ok(privilege) => {
                debug!(
                    profile = privilege.as_ref().map_or("", |p| p.profile_name.as_str()),
                    "Resolved instance privilege"
                );
                Ok(privilege)
            }
            Err(e) => {
                error!(error = %e, "Privilege lookup failed");
                Err(e.into())
            }
        }
    }
}

async fn lookup(
    client: &dyn ControlPlaneClient,
    instance_id: &str,
) -> Result<Option<PrivilegeDescriptor>, ControlPlaneError> {
    let Some(profile) = client.instance_profile(instance_id).await? else {
        return Ok(None);
    };
    client.describe_profile(&profile).await.map(Some)
}
