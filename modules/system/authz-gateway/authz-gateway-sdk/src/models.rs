//! Domain models for the `AuthZ` gateway module.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Transport-level description of an inbound request, before canonicalisation.
///
/// `headers` holds raw `(key, value)` pairs in whatever form the transport
/// delivered them: CGI-style (`HTTP_X_FOO`, `CONTENT_TYPE`) or wire-style
/// (`X-Foo`). Only the context builder interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub scheme: String,
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query_string: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl RequestMeta {
    /// Describe an `http` request in CGI form.
    ///
    /// Every header becomes `HTTP_<NAME>` except `Content-Type` and
    /// `Content-Length`, which become `CONTENT_TYPE` / `CONTENT_LENGTH`.
    /// Values carrying non-ASCII bytes are kept, decoded lossily, so a
    /// malformed header still reaches validation instead of vanishing.
    #[must_use]
    pub fn from_http_parts(parts: &http::request::Parts) -> Self {
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    cgi_header_key(name.as_str()),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Self {
            scheme: parts.uri.scheme_str().unwrap_or("http").to_owned(),
            method: parts.method.as_str().to_owned(),
            path: parts.uri.path().to_owned(),
            query_string: parts.uri.query().map(ToOwned::to_owned),
            headers,
        }
    }

    /// Override the scheme (servers usually see origin-form URIs without one).
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// First raw header value whose key canonicalises to `canonical_key`.
    #[must_use]
    pub fn header(&self, canonical_key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| canonical_header_key(k) == canonical_key)
            .map(|(_, v)| v.as_str())
    }
}

/// Canonical header key: trimmed, ASCII uppercase, `-` replaced by `_`.
#[must_use]
pub fn canonical_header_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
        .collect()
}

fn cgi_header_key(wire_name: &str) -> String {
    let canonical = canonical_header_key(wire_name);
    match canonical.as_str() {
        "CONTENT_TYPE" | "CONTENT_LENGTH" => canonical,
        _ => format!("HTTP_{canonical}"),
    }
}

/// An inbound request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub meta: RequestMeta,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// The document sent to the PDP as `{"input": DecisionInput}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub request: RequestInfo,
    pub source: PeerAddress,
    pub destination: PeerAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudContext>,
}

/// Canonicalised request description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub scheme: String,
    pub method: String,
    pub path: String,
    /// Multimap: keys sorted, values in query-string order.
    pub query: BTreeMap<String, Vec<String>>,
    /// Only authorization-relevant headers, keyed by canonical name.
    pub headers: BTreeMap<String, String>,
}

/// One side of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAddress {
    pub ip_address: String,
    pub port: u16,
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip_address: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Verified cloud identity of the caller plus its resolved privileges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudContext {
    pub identity: AttestationClaims,
    /// `null` when the instance has no privilege profile attached.
    pub privilege: Option<PrivilegeDescriptor>,
}

/// Verdict returned by the PDP for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionVerdict {
    pub allowed: bool,
    pub decision_id: Option<String>,
    /// Response body exactly as received.
    pub raw: Bytes,
}

/// Claims carried inside a signed instance attestation.
///
/// Known fields are typed; every other platform field is preserved verbatim
/// in `extra` so it reaches the PDP unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationClaims {
    pub instance_id: String,
    pub account_id: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Issuance timestamp of the document.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub pending_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Reference to the privilege profile attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProfileRef {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Resolved privilege information for a verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegeDescriptor {
    pub profile_arn: String,
    pub profile_name: String,
    #[serde(default)]
    pub roles: Vec<RoleDescriptor>,
}

/// A role carried by a privilege profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    pub arn: String,
}

/// Cloud credentials bound to a region.
///
/// Secrets are wrapped in `SecretString` so `Debug` redacts them.
#[derive(Debug, Clone)]
pub struct CredentialState {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expires_at: OffsetDateTime,
}

impl CredentialState {
    /// Whether the credentials expire within `skew` of `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
        now + skew >= self.expires_at
    }

    /// Whether the credentials expire within `skew` of the current time.
    #[must_use]
    pub fn is_stale(&self, skew: Duration) -> bool {
        self.is_stale_at(OffsetDateTime::now_utc(), skew)
    }
}
