//! Pagination and ordering primitives shared across list endpoints.

use serde::{Deserialize, Serialize};

/// Sort direction.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Columns a finding list may be ordered by.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FindingOrderBy {
    Id,
    ContentId,
    RuleId,
    Severity,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl FindingOrderBy {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::ContentId => "content_id",
            Self::RuleId => "rule_id",
            Self::Severity => "severity",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// Pagination query parameters.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Explicit row offset; takes precedence over `page`.
    pub offset: Option<i64>,
    pub orderby: Option<FindingOrderBy>,
    pub order: Option<SortOrder>,
}

impl Pagination {
    /// Maximum items per page.
    const MAX_PER_PAGE: i64 = 100;

    /// Default items per page.
    const DEFAULT_PER_PAGE: i64 = 25;

    pub fn limit(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        if let Some(offset) = self.offset {
            return offset.max(0);
        }
        let page = self.page.unwrap_or(1).max(1);
        (page - 1).saturating_mul(self.limit())
    }

    pub fn current_page(&self) -> i64 {
        match self.offset {
            Some(offset) => offset.max(0) / self.limit() + 1,
            None => self.page.unwrap_or(1).max(1),
        }
    }

    pub fn order_by(&self) -> FindingOrderBy {
        self.orderby.unwrap_or_default()
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order.unwrap_or_default()
    }
}

/// Paged result envelope returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T: Serialize> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let per_page = pagination.limit();
        let total_pages = (total + per_page - 1) / per_page;
        Self {
            items,
            total,
            page: pagination.current_page(),
            per_page,
            total_pages,
        }
    }
}
