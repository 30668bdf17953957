//! Configuration for the `AuthZ` gateway.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::domain::decision_client::RetryPolicy;
use crate::domain::endpoint::endpoint;
use crate::domain::error::DomainError;

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "AUTHZ_GATEWAY__";

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// PDP host, optionally with scheme (`https://pdp.internal`).
    pub hostname: String,
    /// PDP port; `8181`, `"8181"` and `":8181"` are all accepted.
    pub port: PortSetting,
    /// Policy document path under `/v1/data/`.
    pub policy_path: String,
    pub read_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    /// Retries after the first attempt, transport failures only.
    pub retry_max_attempts: u32,
    /// First retry delay; doubles on every further retry.
    pub retry_backoff_initial_ms: u64,

    /// Header carrying the base64url-encoded instance attestation (ingress and egress).
    pub attestation_header: String,
    /// Reject requests that carry no attestation header.
    pub require_attestation: bool,
    /// PEM bundle with the platform's published signing certificate(s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_anchor_path: Option<PathBuf>,

    /// Base URL of the local instance metadata service.
    pub metadata_endpoint: String,
    pub metadata_timeout_ms: u64,
    /// Credentials are refreshed this long before they expire.
    pub credential_refresh_skew_secs: u64,
    /// Cache this instance's own signed document for the process lifetime.
    pub cache_attestation: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_owned(),
            port: PortSetting::Number(8181),
            policy_path: "authz/allow".to_owned(),
            read_timeout_ms: 5000,
            connection_timeout_ms: 5000,
            retry_max_attempts: 2,
            retry_backoff_initial_ms: 250,
            attestation_header: "x-instance-attestation".to_owned(),
            require_attestation: false,
            trust_anchor_path: None,
            metadata_endpoint: "http://169.254.169.254".to_owned(),
            metadata_timeout_ms: 1000,
            credential_refresh_skew_secs: 300,
            cache_attestation: true,
        }
    }
}

/// A port given either as a number or as text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PortSetting {
    Number(u16),
    Text(String),
}

impl fmt::Display for PortSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl GatewayConfig {
    /// Load configuration: defaults, then the optional YAML file, then
    /// `AUTHZ_GATEWAY__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails [`Self::validate`].
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let cfg: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the values that cannot be expressed in the type.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidConfig`] or [`DomainError::InvalidEndpoint`].
    pub fn validate(&self) -> Result<(), DomainError> {
        self.decision_endpoint()?;
        http::HeaderName::from_bytes(self.attestation_header.as_bytes()).map_err(|e| {
            DomainError::InvalidConfig(format!(
                "attestation_header '{}' is not a valid header name: {e}",
                self.attestation_header
            ))
        })?;
        if self.read_timeout_ms == 0 || self.connection_timeout_ms == 0 {
            return Err(DomainError::InvalidConfig(
                "timeouts must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Fully assembled decision endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidEndpoint`] if host, port or policy path are unusable.
    pub fn decision_endpoint(&self) -> Result<String, DomainError> {
        endpoint(&self.hostname, &self.port, &self.policy_path)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_max_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_initial_ms),
        }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[must_use]
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    #[must_use]
    pub fn credential_refresh_skew(&self) -> Duration {
        Duration::from_secs(self.credential_refresh_skew_secs)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_surface() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.read_timeout_ms, 5000);
        assert_eq!(cfg.connection_timeout_ms, 5000);
        assert_eq!(cfg.retry_max_attempts, 2);
        assert_eq!(cfg.retry_backoff_initial_ms, 250);
        assert!(!cfg.require_attestation);
        assert_eq!(
            cfg.decision_endpoint().unwrap(),
            "http://localhost:8181/v1/data/authz/allow"
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn yaml_overrides_only_what_it_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "hostname: \"https://pdp.internal/\"\nport: \":9443\"\npolicy_path: \"/svc/orders/allow/\"\nretry_max_attempts: 4\nrequire_attestation: true"
        )
        .unwrap();

        let cfg = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.port, PortSetting::Text(":9443".to_owned()));
        assert_eq!(cfg.retry_max_attempts, 4);
        assert!(cfg.require_attestation);
        assert_eq!(cfg.read_timeout_ms, 5000);
        assert_eq!(
            cfg.decision_endpoint().unwrap(),
            "https://pdp.internal:9443/v1/data/svc/orders/allow"
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hostnme: \"typo\"").unwrap();

        assert!(GatewayConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn invalid_header_name_fails_validation() {
        let cfg = GatewayConfig {
            attestation_header: "bad header".to_owned(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(DomainError::InvalidConfig(_))
        ));
    }

    #[test]
    fn retry_policy_reflects_settings() {
        let cfg = GatewayConfig {
            retry_max_attempts: 3,
            retry_backoff_initial_ms: 100,
            ..GatewayConfig::default()
        };
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
    }
}
