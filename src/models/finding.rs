//! Finding model: one persisted accessibility violation per (content, rule, element).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// -- Enums matching PostgreSQL --

/// Severity class a rule reports its violations under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "severity_class", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SeverityClass {
    Error,
    Warning,
    /// Colour-contrast failures, reported apart from other errors.
    Contrast,
}

impl SeverityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Contrast => "contrast",
        }
    }
}

impl std::fmt::Display for SeverityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Core Finding --

/// Suppression ("ignore") decision attached to a finding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Suppression {
    #[sqlx(rename = "is_suppressed")]
    pub suppressed: bool,
    #[sqlx(rename = "suppressed_globally")]
    pub global: bool,
    pub suppressed_by: Option<i64>,
    pub suppressed_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "suppression_comment")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Finding {
    pub id: Uuid,
    pub content_id: i64,
    pub site_id: i64,
    pub content_type: String,
    pub rule_id: String,
    pub severity: SeverityClass,
    pub snapshot: String,
    /// SHA-256 of the normalized snapshot; part of the uniqueness key.
    pub snapshot_key: String,
    /// Set when the most recent scan did not reproduce this finding.
    pub is_stale: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(flatten)]
    pub suppression: Suppression,
}

impl Finding {
    /// Counted by aggregation: reproduced by the latest scan and not suppressed.
    pub fn is_active(&self) -> bool {
        !self.is_stale && !self.suppression.suppressed
    }
}

/// One violation as proposed by a scan, before reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ViolationInput {
    #[validate(length(min = 1, max = 255))]
    pub rule_id: String,
    pub severity: SeverityClass,
    #[validate(length(min = 1))]
    pub snapshot: String,
}

/// Manual creation of a finding through the findings collection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateFinding {
    pub content_id: i64,
    pub site_id: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub content_type: String,
    #[validate(length(min = 1, max = 255))]
    pub rule_id: String,
    pub severity: SeverityClass,
    #[validate(length(min = 1))]
    pub snapshot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateFinding {
    pub severity: Option<SeverityClass>,
    pub content_type: Option<String>,
    pub is_stale: Option<bool>,
}

/// Filters for listing findings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FindingFilters {
    pub content_id: Option<i64>,
    pub site_id: Option<i64>,
    pub content_type: Option<String>,
    pub rule_id: Option<String>,
    pub severity: Option<SeverityClass>,
    pub stale: Option<bool>,
    pub suppressed: Option<bool>,
}

impl FindingFilters {
    pub fn for_content(content_id: i64) -> Self {
        Self {
            content_id: Some(content_id),
            ..Default::default()
        }
    }

    /// In-memory evaluation of the same predicate the SQL store applies.
    pub fn matches(&self, finding: &Finding) -> bool {
        self.content_id.map_or(true, |v| finding.content_id == v)
            && self.site_id.map_or(true, |v| finding.site_id == v)
            && self
                .content_type
                .as_ref()
                .map_or(true, |v| &finding.content_type == v)
            && self.rule_id.as_ref().map_or(true, |v| &finding.rule_id == v)
            && self.severity.map_or(true, |v| finding.severity == v)
            && self.stale.map_or(true, |v| finding.is_stale == v)
            && self
                .suppressed
                .map_or(true, |v| finding.suppression.suppressed == v)
    }
}

/// Request body for toggling suppression on a finding.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SuppressionRequest {
    pub suppressed: bool,
    #[serde(default)]
    pub global: bool,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Finding {
        let now = Utc::now();
        Finding {
            id: Uuid::nil(),
            content_id: 42,
            site_id: 1,
            content_type: "post".to_string(),
            rule_id: "img_alt_missing".to_string(),
            severity: SeverityClass::Error,
            snapshot: "<img src=\"x\">".to_string(),
            snapshot_key: "k".to_string(),
            is_stale: false,
            created_by: None,
            created_at: now,
            updated_at: now,
            suppression: Suppression::default(),
        }
    }

    #[test]
    fn severity_serialization() {
        let json = serde_json::to_string(&SeverityClass::Contrast).unwrap();
        assert_eq!(json, "\"contrast\"");
        let parsed: SeverityClass = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(parsed, SeverityClass::Warning);
    }

    #[test]
    fn active_excludes_stale_and_suppressed() {
        let mut finding = sample();
        assert!(finding.is_active());
        finding.is_stale = true;
        assert!(!finding.is_active());
        finding.is_stale = false;
        finding.suppression.suppressed = true;
        assert!(!finding.is_active());
    }

    #[test]
    fn filters_match_all_set_fields() {
        let finding = sample();
        assert!(FindingFilters::default().matches(&finding));
        assert!(FindingFilters::for_content(42).matches(&finding));
        assert!(!FindingFilters::for_content(7).matches(&finding));

        let filters = FindingFilters {
            rule_id: Some("img_alt_missing".to_string()),
            severity: Some(SeverityClass::Warning),
            ..Default::default()
        };
        assert!(!filters.matches(&finding));
    }

    #[test]
    fn finding_serializes_suppression_as_nested_record() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["suppression"]["suppressed"], false);
        assert_eq!(json["severity"], "error");
    }

    #[test]
    fn violation_input_validation() {
        let input = ViolationInput {
            rule_id: String::new(),
            severity: SeverityClass::Error,
            snapshot: "<img>".to_string(),
        };
        assert!(input.validate().is_err());
    }
}
