//! Declarative accessibility rule descriptors.

use serde::{Deserialize, Serialize};

use crate::models::finding::SeverityClass;

/// User impact classification carried as rule metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Critical,
    Serious,
    #[default]
    Moderate,
    Minor,
}

fn default_true() -> bool {
    true
}

/// A rule evaluated against every element its selector matches.
///
/// An element passes when every check in `all` holds, at least one check in
/// `any` holds (or `any` is empty), and no check in `none` holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    /// Unique, stable identifier. Findings are keyed by it.
    pub id: String,

    /// CSS selector enumerating candidate elements.
    pub selector: String,

    /// Name of a registered check used to narrow candidates further.
    #[serde(default)]
    pub matches: Option<String>,

    /// Skip candidates hidden from assistive technology.
    #[serde(default = "default_true")]
    pub exclude_hidden: bool,

    #[serde(default)]
    pub impact: Impact,

    pub severity: SeverityClass,

    #[serde(default)]
    pub help: String,

    #[serde(default)]
    pub help_url: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub all: Vec<String>,

    #[serde(default)]
    pub any: Vec<String>,

    #[serde(default)]
    pub none: Vec<String>,
}

impl Rule {
    /// Minimal rule with empty combinators, for building catalogs in code.
    pub fn new(id: &str, selector: &str, severity: SeverityClass) -> Self {
        Self {
            id: id.to_string(),
            selector: selector.to_string(),
            matches: None,
            exclude_hidden: true,
            impact: Impact::default(),
            severity,
            help: String::new(),
            help_url: None,
            tags: Vec::new(),
            all: Vec::new(),
            any: Vec::new(),
            none: Vec::new(),
        }
    }

    /// Selector-only rules never produce violations.
    pub fn is_informational(&self) -> bool {
        self.all.is_empty() && self.any.is_empty() && self.none.is_empty()
    }

    /// Every check name the rule refers to, refinement predicate included.
    pub fn referenced_checks(&self) -> impl Iterator<Item = &str> {
        self.matches
            .iter()
            .chain(self.all.iter())
            .chain(self.any.iter())
            .chain(self.none.iter())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let rule: Rule = serde_json::from_str(
            r#"{"id":"img_alt_missing","selector":"img","severity":"error","all":["has-alt"]}"#,
        )
        .unwrap();
        assert!(rule.exclude_hidden);
        assert_eq!(rule.impact, Impact::Moderate);
        assert_eq!(rule.all, vec!["has-alt"]);
        assert!(rule.any.is_empty());
        assert!(!rule.is_informational());
    }

    #[test]
    fn referenced_checks_include_refinement() {
        let mut rule = Rule::new("r", "a", SeverityClass::Warning);
        rule.matches = Some("has-text".to_string());
        rule.none = vec!["x".to_string()];
        let names: Vec<&str> = rule.referenced_checks().collect();
        assert_eq!(names, vec!["has-text", "x"]);
    }
}
