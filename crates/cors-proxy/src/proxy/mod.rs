//! Request-relay pipeline: target resolution, access checks, CORS policy,
//! and the outbound relay.

pub mod correlation;
pub mod cors;
pub mod guard;
pub mod query;
pub mod relay;
pub mod target;
