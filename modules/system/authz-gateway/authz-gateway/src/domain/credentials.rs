//! Credential rotation.
//!
//! The rotator owns the only mutable shared state in the gateway: a snapshot
//! pairing the current credentials with a control-plane client bound to their
//! region. Snapshots are immutable and replaced whole through `ArcSwapOption`,
//! so readers see either the old pair or the new one. Refreshes are
//! serialised by an async mutex and re-checked after acquiring it, which turns
//! a burst of stale readers into a single metadata fetch.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use authz_gateway_sdk::{
    ControlPlaneClient, ControlPlaneConnector, CredentialState, GatewayError, MetadataClient,
};
use secrecy::SecretString;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Lists the role whose credentials the instance carries.
pub const SECURITY_CREDENTIALS_PATH: &str = "latest/meta-data/iam/security-credentials/";
/// Unsigned identity document; only its `region` is read here.
pub const IDENTITY_DOCUMENT_PATH: &str = "latest/dynamic/instance-identity/document";

const SUCCESS_CODE: &str = "Success";

/// Observable rotator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotatorState {
    Uninitialized,
    Valid { region: String },
    /// Past expiry or inside the refresh skew; the next use refreshes.
    Expired { region: String },
}

/// Credentials plus a control-plane client bound to their region.
pub struct CredentialSnapshot {
    credentials: CredentialState,
    control_plane: Arc<dyn ControlPlaneClient>,
}

impl CredentialSnapshot {
    #[must_use]
    pub fn credentials(&self) -> &CredentialState {
        &self.credentials
    }

    #[must_use]
    pub fn control_plane(&self) -> &Arc<dyn ControlPlaneClient> {
        &self.control_plane
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.credentials.region
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataCredentials {
    code: String,
    access_key_id: String,
    secret_access_key: String,
    token: String,
    #[serde(with = "time::serde::rfc3339")]
    expiration: OffsetDateTime,
}

#[derive(Deserialize)]
struct IdentityDocument {
    region: String,
}

pub struct CredentialRotator {
    metadata: Arc<dyn MetadataClient>,
    connector: Arc<dyn ControlPlaneConnector>,
    refresh_skew: Duration,
    snapshot: ArcSwapOption<CredentialSnapshot>,
    refresh_lock: Mutex<()>,
}

impl CredentialRotator {
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataClient>,
        connector: Arc<dyn ControlPlaneConnector>,
        refresh_skew: Duration,
    ) -> Self {
        Self {
            metadata,
            connector,
            refresh_skew,
            snapshot: ArcSwapOption::const_empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> RotatorState {
        match self.snapshot.load_full() {
            None => RotatorState::Uninitialized,
            Some(snapshot) if snapshot.credentials.is_stale(self.refresh_skew) => {
                RotatorState::Expired {
                    region: snapshot.credentials.region.clone(),
                }
            }
            Some(snapshot) => RotatorState::Valid {
                region: snapshot.credentials.region.clone(),
            },
        }
    }

    /// Usable credentials for the currently bound region, refreshing if stale.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Dependency`] if a needed refresh fails.
    pub async fn current_credentials(&self) -> Result<CredentialState, GatewayError> {
        let snapshot = self.ensure(None).await?;
        Ok(snapshot.credentials.clone())
    }

    /// Unconditionally fetch new credentials, optionally rebinding the region.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Dependency`] if the fetch or client construction fails.
    pub async fn refresh(&self, region: Option<&str>) -> Result<CredentialState, GatewayError> {
        let _guard = self.refresh_lock.lock().await;
        let snapshot = self.fetch_and_swap(region).await?;
        Ok(snapshot.credentials.clone())
    }

    /// A snapshot bound to `region` with fresh credentials.
    ///
    /// A region different from the bound one rebuilds both credentials and client.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Dependency`] if a needed refresh fails.
    pub async fn snapshot_for(&self, region: &str) -> Result<Arc<CredentialSnapshot>, GatewayError> {
        self.ensure(Some(region)).await
    }

    /// Replace `seen` after the control plane rejected its credentials.
    ///
    /// If another task already replaced it with a fresh snapshot for the same
    /// region, that snapshot is returned without another fetch. The result is
    /// always bound to `seen`'s region.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Dependency`] if the refresh fails.
    pub async fn refresh_stale(
        &self,
        seen: &Arc<CredentialSnapshot>,
    ) -> Result<Arc<CredentialSnapshot>, GatewayError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.snapshot.load_full()
            && !Arc::ptr_eq(&current, seen)
            && current.region() == seen.region()
            && !current.credentials.is_stale(self.refresh_skew)
        {
            return Ok(current);
        }
        self.fetch_and_swap(Some(seen.region())).await
    }

    async fn ensure(&self, region: Option<&str>) -> Result<Arc<CredentialSnapshot>, GatewayError> {
        if let Some(snapshot) = self.usable(region) {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while we waited.
        if let Some(snapshot) = self.usable(region) {
            return Ok(snapshot);
        }
        self.fetch_and_swap(region).await
    }

    fn usable(&self, region: Option<&str>) -> Option<Arc<CredentialSnapshot>> {
        let snapshot = self.snapshot.load_full()?;
        let region_matches = region.is_none_or(|r| r == snapshot.credentials.region);
        (region_matches && !snapshot.credentials.is_stale(self.refresh_skew)).then_some(snapshot)
    }

    /// Caller must hold `refresh_lock`.
    #[tracing::instrument(skip_all, fields(region = region.unwrap_or("")))]
    async fn fetch_and_swap(
        &self,
        region: Option<&str>,
    ) -> Result<Arc<CredentialSnapshot>, GatewayError> {
        let previous = self.snapshot.load_full();
        let region = match (region, previous.as_deref()) {
            (Some(region), _) => region.to_owned(),
            (None, Some(previous)) => previous.credentials.region.clone(),
            (None, None) => self.default_region().await?,
        };

        let credentials = self.fetch_credentials(region).await.inspect_err(|e| {
            error!(error = %e, "Credential refresh failed");
        })?;
        let control_plane = self.connector.connect(&credentials)?;

        match previous.as_deref() {
            Some(previous) if previous.credentials.region != credentials.region => info!(
                from = %previous.credentials.region,
                to = %credentials.region,
                "Rebound credentials to new region"
            ),
            _ => debug!(
                region = %credentials.region,
                expires_at = %credentials.expires_at,
                "Refreshed credentials"
            ),
        }

        let snapshot = Arc::new(CredentialSnapshot {
            credentials,
            control_plane,
        });
        self.snapshot.store(Some(Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    async fn default_region(&self) -> Result<String, GatewayError> {
        let body = self.metadata.get(IDENTITY_DOCUMENT_PATH).await?;
        let document: IdentityDocument = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::Dependency(format!("unparsable identity document: {e}"))
        })?;
        Ok(document.region)
    }

    async fn fetch_credentials(&self, region: String) -> Result<CredentialState, GatewayError> {
        let listing = self.metadata.get(SECURITY_CREDENTIALS_PATH).await?;
        let listing = String::from_utf8_lossy(&listing);
        let role = listing
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                GatewayError::Dependency("no role attached to this instance".to_owned())
            })?;

        let body = self
            .metadata
            .get(&format!("{SECURITY_CREDENTIALS_PATH}{role}"))
            .await?;
        let fetched: MetadataCredentials = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::Dependency(format!("unparsable credentials for role '{role}': {e}"))
        })?;
        if fetched.code != SUCCESS_CODE {
            return Err(GatewayError::Dependency(format!(
                "credentials for role '{role}' unavailable: {}",
                fetched.code
            )));
        }

        Ok(CredentialState {
            region,
            access_key_id: fetched.access_key_id,
            secret_access_key: SecretString::from(fetched.secret_access_key),
            session_token: SecretString::from(fetched.token),
            expires_at: fetched.expiration,
        })
    }
}
