//! Process-wide rule catalog: registered at startup, read on every scan.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::engine::document::parse_selector;
use crate::models::rule::Rule;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRule {
    pub id: String,
    pub reason: String,
}

/// Outcome of one `register` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrationReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedRule>,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleFileError {
    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse rule file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Rules keyed by id. Later registrations replace earlier ones.
#[derive(Debug, Default)]
pub struct RuleCatalog {
    rules: RwLock<BTreeMap<String, Rule>>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the given rules.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        let catalog = Self::new();
        catalog.register(rules);
        catalog
    }

    /// Merge rules into the catalog.
    ///
    /// A rule without an id or selector, or whose selector does not parse, is
    /// rejected and any prior definition under that id is kept.
    pub fn register(&self, rules: Vec<Rule>) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        let mut map = self.rules.write().unwrap_or_else(PoisonError::into_inner);

        for rule in rules {
            if let Err(reason) = validate(&rule) {
                tracing::warn!(rule_id = %rule.id, %reason, "Rejected rule registration");
                report.rejected.push(RejectedRule {
                    id: rule.id,
                    reason,
                });
                continue;
            }
            tracing::debug!(rule_id = %rule.id, "Registered rule");
            report.accepted.push(rule.id.clone());
            map.insert(rule.id.clone(), rule);
        }

        report
    }

    /// Resolved rule set in id order, minus `excluded`.
    pub fn all(&self, excluded: &[String]) -> Vec<Rule> {
        let map = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .filter(|rule| !excluded.contains(&rule.id))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Rule> {
        let map = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        map.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Rule> {
        let mut map = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let removed = map.remove(id);
        if removed.is_some() {
            tracing::info!(rule_id = %id, "Removed rule");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register rules from a JSON array on disk.
    pub fn load_file(&self, path: &Path) -> Result<RegistrationReport, RuleFileError> {
        let raw = std::fs::read_to_string(path)?;
        let rules: Vec<Rule> = serde_json::from_str(&raw)?;
        let report = self.register(rules);
        tracing::info!(
            path = %path.display(),
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "Loaded rule file"
        );
        Ok(report)
    }
}

fn validate(rule: &Rule) -> Result<(), String> {
    if rule.id.trim().is_empty() {
        return Err("missing id".to_string());
    }
    if rule.selector.trim().is_empty() {
        return Err("missing selector".to_string());
    }
    parse_selector(&rule.selector).map_err(|e| format!("invalid selector: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::finding::SeverityClass;
    use std::io::Write;

    fn rule(id: &str, selector: &str) -> Rule {
        Rule::new(id, selector, SeverityClass::Error)
    }

    #[test]
    fn last_registration_wins() {
        let catalog = RuleCatalog::new();
        catalog.register(vec![rule("a", "img")]);
        catalog.register(vec![rule("a", "a[href]")]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("a").unwrap().selector, "a[href]");
    }

    #[test]
    fn repeated_registration_is_idempotent() {
        let catalog = RuleCatalog::new();
        catalog.register(vec![rule("a", "img"), rule("b", "p")]);
        let before = catalog.all(&[]);
        catalog.register(vec![rule("a", "img"), rule("b", "p")]);
        assert_eq!(catalog.all(&[]), before);
    }

    #[test]
    fn invalid_rules_are_rejected_and_prior_kept() {
        let catalog = RuleCatalog::new();
        catalog.register(vec![rule("a", "img")]);
        let report = catalog.register(vec![rule("a", "img["), rule("", "p"), rule("c", " ")]);

        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.len(), 3);
        assert_eq!(report.rejected[1].reason, "missing id");
        assert_eq!(report.rejected[2].reason, "missing selector");
        assert_eq!(catalog.get("a").unwrap().selector, "img");
    }

    #[test]
    fn all_is_sorted_and_honours_exclusions() {
        let catalog = RuleCatalog::with_rules(vec![rule("zeta", "p"), rule("alpha", "img"), rule("mid", "a")]);
        let ids: Vec<String> = catalog.all(&["mid".to_string()]).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(catalog.get("mid").is_some());
    }

    #[test]
    fn remove_returns_definition() {
        let catalog = RuleCatalog::with_rules(vec![rule("a", "img")]);
        assert!(catalog.remove("a").is_some());
        assert!(catalog.remove("a").is_none());
        assert!(catalog.is_empty());
    }

    #[test]
    fn loads_rules_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"custom_rule","selector":"video","severity":"warning","all":["has-text"]}}]"#
        )
        .unwrap();

        let catalog = RuleCatalog::new();
        let report = catalog.load_file(file.path()).unwrap();
        assert_eq!(report.accepted, vec!["custom_rule"]);
        assert_eq!(catalog.get("custom_rule").unwrap().severity, SeverityClass::Warning);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let catalog = RuleCatalog::new();
        assert!(matches!(
            catalog.load_file(file.path()),
            Err(RuleFileError::Parse(_))
        ));
    }
}
