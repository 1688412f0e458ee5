//! Applies rules to a parsed document and collects violations.

use scraper::ElementRef;
use serde::Serialize;

use crate::engine::checks::CheckRegistry;
use crate::engine::document::{is_hidden, serialize_element, Document};
use crate::engine::EngineError;
use crate::models::finding::ViolationInput;
use crate::models::rule::Rule;

/// Result of one evaluator pass over one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Violations in rule order, then document order.
    pub violations: Vec<ViolationInput>,
    pub rules_evaluated: usize,
    pub errors: Vec<EngineError>,
}

enum Verdict {
    Pass,
    Fail,
    /// A check errored; no verdict for this element.
    Undetermined,
}

pub struct RuleEvaluator<'r> {
    checks: &'r CheckRegistry,
}

impl<'r> RuleEvaluator<'r> {
    pub fn new(checks: &'r CheckRegistry) -> Self {
        Self { checks }
    }

    pub fn evaluate(&self, document: &Document, rules: &[Rule]) -> ScanReport {
        let mut report = ScanReport::default();

        for rule in rules {
            if let Some(check) = rule
                .referenced_checks()
                .find(|name| !self.checks.contains(name))
            {
                tracing::warn!(rule_id = %rule.id, check, "Skipping rule with unknown check");
                report.errors.push(EngineError::UnknownCheck {
                    rule_id: rule.id.clone(),
                    check: check.to_string(),
                });
                continue;
            }

            let candidates = match document.select(&rule.selector) {
                Ok(candidates) => candidates,
                Err(reason) => {
                    tracing::warn!(rule_id = %rule.id, %reason, "Skipping rule with invalid selector");
                    report.errors.push(EngineError::InvalidSelector {
                        rule_id: rule.id.clone(),
                        selector: rule.selector.clone(),
                        reason,
                    });
                    continue;
                }
            };

            report.rules_evaluated += 1;
            if rule.is_informational() {
                continue;
            }

            for element in candidates {
                if !self.refinement_accepts(rule, element, &mut report.errors) {
                    continue;
                }
                if rule.exclude_hidden && is_hidden(element) {
                    continue;
                }
                if let Verdict::Fail = self.verdict(rule, element, &mut report.errors) {
                    report.violations.push(ViolationInput {
                        rule_id: rule.id.clone(),
                        severity: rule.severity,
                        snapshot: serialize_element(element),
                    });
                }
            }
        }

        tracing::debug!(
            rules = report.rules_evaluated,
            violations = report.violations.len(),
            errors = report.errors.len(),
            "Evaluation pass complete"
        );
        report
    }

    fn refinement_accepts(
        &self,
        rule: &Rule,
        element: ElementRef<'_>,
        errors: &mut Vec<EngineError>,
    ) -> bool {
        let Some(name) = rule.matches.as_deref() else {
            return true;
        };
        match self.run(rule, name, element, errors) {
            Some(accepted) => accepted,
            None => false,
        }
    }

    fn verdict(&self, rule: &Rule, element: ElementRef<'_>, errors: &mut Vec<EngineError>) -> Verdict {
        let mut outcome = |names: &[String]| -> Option<Vec<bool>> {
            names
                .iter()
                .map(|name| self.run(rule, name, element, errors))
                .collect()
        };

        let (Some(all), Some(any), Some(none)) =
            (outcome(&rule.all), outcome(&rule.any), outcome(&rule.none))
        else {
            return Verdict::Undetermined;
        };

        let passes = all.iter().all(|ok| *ok)
            && (any.is_empty() || any.iter().any(|ok| *ok))
            && none.iter().all(|ok| !*ok);

        if passes {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    /// `None` when the check errored; the error is logged and recorded.
    fn run(
        &self,
        rule: &Rule,
        name: &str,
        element: ElementRef<'_>,
        errors: &mut Vec<EngineError>,
    ) -> Option<bool> {
        match self.checks.run(name, element)? {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, check = name, error = %e, "Check failed");
                errors.push(EngineError::CheckFailed {
                    rule_id: rule.id.clone(),
                    check: name.to_string(),
                    reason: e.0,
                });
                None
            }
        }
    }
}
