//! Decision endpoint assembly.

use std::fmt::Display;

use url::Url;

use super::error::DomainError;

/// Path prefix under which the PDP serves policy documents.
pub const DATA_API_PREFIX: &str = "/v1/data/";

/// Assemble `scheme://host:port/v1/data/<policy_path>`.
///
/// Tolerant of the usual spellings: the host may carry a scheme and trailing
/// slash, the port may have a leading `:`, and the policy path may have any
/// number of leading or trailing slashes. The scheme defaults to `http`.
///
/// # Errors
///
/// Returns [`DomainError::InvalidEndpoint`] for an unparsable host, a
/// non-numeric or out-of-range port, or an empty policy path.
pub fn endpoint(
    hostname: &str,
    port: impl Display,
    policy_path: &str,
) -> Result<String, DomainError> {
    let hostname = hostname.trim();
    let with_scheme = if hostname.contains("://") {
        hostname.to_owned()
    } else {
        format!("http://{hostname}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| DomainError::InvalidEndpoint(format!("host '{hostname}': {e}")))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DomainError::InvalidEndpoint(format!("host '{hostname}' is empty")))?;

    let port_text = port.to_string();
    let port: u16 = port_text
        .trim()
        .trim_start_matches(':')
        .parse()
        .map_err(|_| DomainError::InvalidEndpoint(format!("port '{port_text}' is not valid")))?;

    let policy_path = policy_path.trim().trim_matches('/');
    if policy_path.is_empty() {
        return Err(DomainError::InvalidEndpoint(
            "policy path is empty".to_owned(),
        ));
    }

    Ok(format!(
        "{}://{host}:{port}{DATA_API_PREFIX}{policy_path}",
        url.scheme()
    ))
}
