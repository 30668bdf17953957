//! `AuthZ` Gateway Module
//!
//! Enforces authorization decisions made by an external policy decision
//! point. Each inbound request is described as a canonical decision input,
//! optionally enriched with the caller's verified instance identity and its
//! privilege profile, and sent to the PDP; only an explicit allow lets the
//! request through. Outgoing calls can be stamped with this instance's own
//! signed identity document.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod domain;
pub mod imds;
pub mod middleware;
pub mod module;

pub use config::GatewayConfig;
pub use middleware::{AuthzState, authz_middleware};
pub use module::AuthzGateway;
