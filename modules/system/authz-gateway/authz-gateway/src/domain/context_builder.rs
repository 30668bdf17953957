//! Canonical decision-input construction.
//!
//! A pure transform: no I/O and no failure modes. Header keys are first
//! canonicalised (uppercase, `-` to `_`), then filtered by prefix, so the
//! filter never depends on how the transport spelled a key.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use authz_gateway_sdk::{
    CloudContext, DecisionInput, PeerAddress, RequestInfo, RequestMeta, canonical_header_key,
};

/// Canonical key prefixes forwarded to the PDP.
pub const FORWARDED_HEADER_PREFIXES: [&str; 3] = ["HTTP", "CONTENT", "AUTHORIZATION"];

/// Builds [`DecisionInput`] documents. Sole writer of that type.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContextBuilder;

impl RequestContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn build(
        &self,
        meta: &RequestMeta,
        source: SocketAddr,
        destination: SocketAddr,
        cloud: Option<CloudContext>,
    ) -> DecisionInput {
        DecisionInput {
            request: RequestInfo {
                scheme: meta.scheme.clone(),
                method: meta.method.to_ascii_uppercase(),
                path: meta.path.clone(),
                query: parse_query(meta.query_string.as_deref()),
                headers: forwarded_headers(&meta.headers),
            },
            source: PeerAddress::from(source),
            destination: PeerAddress::from(destination),
            cloud,
        }
    }
}

/// Whether a canonical key is forwarded to the PDP.
#[must_use]
pub fn is_forwarded(canonical_key: &str) -> bool {
    FORWARDED_HEADER_PREFIXES
        .iter()
        .any(|prefix| canonical_key.starts_with(prefix))
}

/// Canonicalise keys, keep forwarded ones, join repeats with `", "`.
#[must_use]
pub fn forwarded_headers(raw: &[(String, String)]) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in raw {
        let key = canonical_header_key(key);
        if !is_forwarded(&key) {
            continue;
        }
        headers
            .entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    headers
}

/// Decode a form-encoded query string into a multimap.
#[must_use]
pub fn parse_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(query) = query else {
        return params;
    };
    for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}
