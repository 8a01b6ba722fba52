//! Listing queries: search, sorting and pagination.

use serde::{Deserialize, Serialize};

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn is_desc(&self) -> bool {
        matches!(self, SortOrder::Desc)
    }
}

/// How a search term is matched against names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Term may appear anywhere.
    #[default]
    Partial,
    /// Name must start with the term.
    Prefix,
}

/// Sortable columns of the product catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSortField {
    #[default]
    ProductId,
    Name,
    Value,
    Weight,
}

impl ProductSortField {
    pub fn column(&self) -> &'static str {
        match self {
            ProductSortField::ProductId => "product_id",
            ProductSortField::Name => "name",
            ProductSortField::Value => "value",
            ProductSortField::Weight => "weight",
        }
    }
}

/// Sortable columns of a user's order history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSortField {
    #[default]
    OrderId,
    ProductName,
    CreatedAt,
    ShippedStatus,
    ArrivedAt,
}

impl OrderSortField {
    pub fn column(&self) -> &'static str {
        match self {
            OrderSortField::OrderId => "o.order_id",
            OrderSortField::ProductName => "p.name",
            OrderSortField::CreatedAt => "o.created_at",
            OrderSortField::ShippedStatus => "o.shipped_status",
            OrderSortField::ArrivedAt => "o.arrived_at",
        }
    }
}

/// A paged listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "F: Deserialize<'de> + Default"))]
pub struct ListQuery<F> {
    /// Free-text search term. Empty means no filtering.
    pub search: Option<String>,

    /// How `search` is matched.
    #[serde(rename = "type")]
    pub match_mode: MatchMode,

    /// Column to sort by.
    pub sort_field: F,

    /// Sort direction.
    pub sort_order: SortOrder,

    /// 1-based page number.
    pub page: u32,

    /// Rows per page.
    pub page_size: u32,
}

impl<F: Default> Default for ListQuery<F> {
    fn default() -> Self {
        Self {
            search: None,
            match_mode: MatchMode::default(),
            sort_field: F::default(),
            sort_order: SortOrder::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl<F> ListQuery<F> {
    /// Search term with surrounding whitespace removed, if any is left.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE) as usize
    }

    /// Number of rows skipped before the requested page.
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn sorted_by(mut self, field: F, order: SortOrder) -> Self {
        self.sort_field = field;
        self.sort_order = order;
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }
}

/// Catalog listing request.
pub type ProductQuery = ListQuery<ProductSortField>;

/// Order history listing request.
pub type OrderQuery = ListQuery<OrderSortField>;

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
        }
    }

    /// Cuts the page described by `query` out of an already filtered and sorted list.
    pub fn slice<F>(all: Vec<T>, query: &ListQuery<F>) -> Self {
        let total = all.len();
        let data = all
            .into_iter()
            .skip(query.offset())
            .take(query.limit())
            .collect();
        Self { data, total }
    }
}
