//! Rule evaluation engine: document model, check registry, rule catalog,
//! evaluator and identity matcher.
//!
//! Everything here is synchronous. A parsed [`Document`] is not `Send`, so
//! async callers move the markup into a blocking task and get owned results
//! back.

pub mod builtin;
pub mod catalog;
pub mod checks;
pub mod document;
pub mod evaluator;
pub mod matcher;
pub mod readability;

use serde::Serialize;

use crate::models::rule::Rule;

pub use catalog::{RegistrationReport, RuleCatalog};
pub use checks::{CheckError, CheckRegistry};
pub use document::Document;
pub use evaluator::{RuleEvaluator, ScanReport};
pub use matcher::{IdentityMatcher, MatchStatus, NormalizedMarkupMatcher};

/// Problems contained to a single rule or element during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    #[error("rule {rule_id} has invalid selector '{selector}': {reason}")]
    InvalidSelector {
        rule_id: String,
        selector: String,
        reason: String,
    },

    #[error("rule {rule_id} references unknown check '{check}'")]
    UnknownCheck { rule_id: String, check: String },

    #[error("check '{check}' failed in rule {rule_id}: {reason}")]
    CheckFailed {
        rule_id: String,
        check: String,
        reason: String,
    },
}

/// Parse markup and run every rule over it.
pub fn scan_markup(markup: &str, rules: &[Rule], checks: &CheckRegistry) -> ScanReport {
    let document = Document::parse(markup);
    RuleEvaluator::new(checks).evaluate(&document, rules)
}
