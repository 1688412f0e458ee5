//! Business logic services.

pub mod aggregation;
pub mod auth;
pub mod fingerprint;
pub mod lifecycle;
