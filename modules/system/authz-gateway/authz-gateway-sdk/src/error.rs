//! Error types for the `AuthZ` gateway module.

use thiserror::Error;

/// Errors surfaced by the authorization gateway.
///
/// Each variant is a distinct failure class. None of them is ever converted
/// into an allow, and only [`GatewayError::Authz`] means "the policy said no";
/// every other kind means "the system could not decide".
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The caller's instance identity could not be cryptographically verified.
    #[error("authentication failed: {0}")]
    Authn(String),

    /// The PDP evaluated the request and did not allow it.
    #[error("access denied by policy")]
    Authz {
        /// Decision identifier reported by the PDP, if any.
        decision_id: Option<String>,
    },

    /// A required external lookup (credentials, privilege resolution) failed.
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// The decision endpoint could not be reached within the retry budget.
    #[error("transport error: {0}")]
    Transport(String),

    /// The decision endpoint answered with something other than a verdict.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Payload-free classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authn,
    Authz,
    Dependency,
    Transport,
    Protocol,
}

impl GatewayError {
    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authn(_) => ErrorKind::Authn,
            Self::Authz { .. } => ErrorKind::Authz,
            Self::Dependency(_) => ErrorKind::Dependency,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Whether this error is a policy decision rather than a system failure.
    #[must_use]
    pub fn is_policy_denial(&self) -> bool {
        self.kind() == ErrorKind::Authz
    }
}

/// Errors returned by a [`crate::MetadataClient`].
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata service could not be reached or timed out.
    #[error("metadata service unreachable: {0}")]
    Unreachable(String),

    /// The metadata service answered with a non-success status.
    #[error("metadata path '{path}' returned status {status}")]
    Status { path: String, status: u16 },

    /// The returned document could not be decoded.
    #[error("malformed metadata document at '{path}': {reason}")]
    Malformed { path: String, reason: String },
}

/// Errors returned by a [`crate::ControlPlaneClient`] or [`crate::ControlPlaneConnector`].
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The credentials bound to the client are no longer accepted.
    #[error("control plane credentials expired")]
    CredentialsExpired,

    /// The looked-up entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other failure reaching or using the control plane.
    #[error("control plane request failed: {0}")]
    Request(String),
}

impl From<MetadataError> for GatewayError {
    fn from(e: MetadataError) -> Self {
        Self::Dependency(e.to_string())
    }
}

impl From<ControlPlaneError> for GatewayError {
    fn from(e: ControlPlaneError) -> Self {
        Self::Dependency(e.to_string())
    }
}
