//! axum adapter: authorizes each request before it reaches the handler.

use std::net::SocketAddr;
use std::sync::Arc;

use authz_gateway_sdk::{
    AuthorizationClient, ErrorKind, GatewayError, InboundRequest, RequestMeta,
};
use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

/// State for [`authz_middleware`].
#[derive(Clone)]
pub struct AuthzState {
    pub client: Arc<dyn AuthorizationClient>,
    /// Address the server is bound to; reported as the decision destination.
    pub local_addr: SocketAddr,
    /// Scheme the server is reached by (origin-form URIs carry none).
    pub scheme: &'static str,
}

impl AuthzState {
    #[must_use]
    pub fn new(client: Arc<dyn AuthorizationClient>, local_addr: SocketAddr) -> Self {
        Self {
            client,
            local_addr,
            scheme: "http",
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = scheme;
        self
    }
}

/// RFC 9457 problem body.
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_url: &'static str,
    pub title: &'static str,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
}

impl Problem {
    #[must_use]
    pub fn new(status: StatusCode, title: &'static str, detail: impl Into<String>) -> Self {
        Self {
            type_url: "about:blank",
            title,
            status: status.as_u16(),
            detail: detail.into(),
            decision_id: None,
        }
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, axum::Json(self)).into_response();
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// Authorization middleware for `axum::middleware::from_fn_with_state`.
///
/// For each request:
/// 1. Describes it as an [`InboundRequest`] (peer from `ConnectInfo<SocketAddr>`)
/// 2. Calls [`AuthorizationClient::authorize`]
/// 3. On success stores the `DecisionVerdict` in the request extensions and continues
/// 4. Otherwise answers with a problem response matching the error kind
pub async fn authz_middleware(
    axum::extract::State(state): axum::extract::State<AuthzState>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(ConnectInfo(source)) = req.extensions().get::<ConnectInfo<SocketAddr>>().copied()
    else {
        tracing::error!(
            "Peer address unavailable; serve with into_make_service_with_connect_info"
        );
        return Problem::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            "Peer address unavailable",
        )
        .into_response();
    };

    let (parts, body) = req.into_parts();
    let inbound = InboundRequest {
        meta: RequestMeta::from_http_parts(&parts).with_scheme(state.scheme),
        source,
        destination: state.local_addr,
    };

    match state.client.authorize(&inbound).await {
        Ok(verdict) => {
            let mut req = axum::extract::Request::from_parts(parts, body);
            req.extensions_mut().insert(verdict);
            next.run(req).await
        }
        Err(err) => authz_error_to_response(err),
    }
}

/// Convert a [`GatewayError`] to a problem response.
fn authz_error_to_response(err: GatewayError) -> axum::response::Response {
    let (status, title, detail) = match err.kind() {
        ErrorKind::Authn => (
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "Instance identity could not be verified",
        ),
        ErrorKind::Authz => (StatusCode::FORBIDDEN, "Forbidden", "Denied by policy"),
        ErrorKind::Dependency | ErrorKind::Transport => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable",
            "Authorization service unavailable",
        ),
        ErrorKind::Protocol => (
            StatusCode::BAD_GATEWAY,
            "Bad Gateway",
            "Authorization service returned an invalid response",
        ),
    };

    let mut problem = Problem::new(status, title, detail);
    if let GatewayError::Authz { decision_id } = err {
        problem.decision_id = decision_id;
    }
    problem.into_response()
}
