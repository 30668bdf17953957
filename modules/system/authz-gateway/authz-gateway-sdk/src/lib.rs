#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `AuthZ` Gateway SDK
//!
//! This crate provides the public contract of the `authz_gateway` module:
//!
//! - [`AuthorizationClient`] - Public API trait for request-handling code (the PEP side)
//! - [`MetadataClient`] - Local instance metadata service collaborator
//! - [`ControlPlaneClient`], [`ControlPlaneConnector`] - Region-scoped privilege lookups
//! - [`DecisionInput`], [`DecisionVerdict`] - Decision request/response models
//! - [`AttestationClaims`], [`PrivilegeDescriptor`], [`CredentialState`] - Cloud identity models
//! - [`GatewayError`] - The five-kind error taxonomy
//!
//! ## Usage
//!
//! ```ignore
//! use authz_gateway_sdk::{AuthorizationClient, InboundRequest, RequestMeta};
//!
//! let request = InboundRequest {
//!     meta: RequestMeta::from_http_parts(&parts),
//!     source: peer_addr,
//!     destination: local_addr,
//! };
//!
//! match gateway.authorize(&request).await {
//!     Ok(verdict) => { /* continue the request */ }
//!     Err(err) => { /* map err.kind() to a rejection */ }
//! }
//! ```

pub mod api;
pub mod error;
pub mod models;

// Re-export main types at crate root
pub use api::{AuthorizationClient, ControlPlaneClient, ControlPlaneConnector, MetadataClient};
pub use error::{ControlPlaneError, ErrorKind, GatewayError, MetadataError};
pub use models::{
    AttestationClaims, CloudContext, CredentialState, DecisionInput, DecisionVerdict,
    InboundRequest, InstanceProfileRef, PeerAddress, PrivilegeDescriptor, RequestInfo,
    RequestMeta, RoleDescriptor, canonical_header_key,
};
