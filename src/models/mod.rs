//! Database models and DTOs for all domain entities.

pub mod content;
pub mod finding;
pub mod pagination;
pub mod rule;
pub mod user;
