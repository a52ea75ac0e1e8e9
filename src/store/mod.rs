//! Storage layer
//!
//! Every persistence concern of the storefront sits behind [`Store`]. The
//! Postgres implementation is used in production; the in-memory one backs
//! development runs without `DATABASE_URL` and the router tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{
    Category, CategoryPatch, CategoryWithCount, DeliveryMethod, NewCategory, NewNews, NewProduct, NewReview, News,
    NewsPatch, Order, OrderStatus, PaymentMethod, Product, ProductPatch, Review,
};
use crate::domain::value_objects::{ArticleCode, Slug};

/// Storage-specific errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Unique constraint violated on the named field
    #[error("{field} has already been taken")]
    Conflict { field: &'static str },

    /// Referenced row does not exist
    #[error("referenced {field} does not exist")]
    MissingReference { field: &'static str },

    #[error("invalid data: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page { pub page: u32, pub per_page: u32 }

impl Page {
    pub const MAX_PER_PAGE: u32 = 100;
    pub fn new(page: Option<u32>, per_page: Option<u32>, default_per_page: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(default_per_page).clamp(1, Self::MAX_PER_PAGE),
        }
    }
    pub fn offset(&self) -> i64 { (self.page as i64 - 1) * self.per_page as i64 }
    pub fn limit(&self) -> i64 { self.per_page as i64 }
}

#[derive(Clone, Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Paginated<T> {
    pub fn last_page(&self) -> u32 {
        if self.total <= 0 { 1 } else { ((self.total + self.per_page as i64 - 1) / self.per_page as i64) as u32 }
    }
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated { items: self.items.into_iter().map(f).collect(), total: self.total, page: self.page, per_page: self.per_page }
    }
    pub(crate) fn slice(all: Vec<T>, page: Page) -> Self {
        let total = all.len() as i64;
        let items = all.into_iter().skip(page.offset() as usize).take(page.per_page as usize).collect();
        Self { items, total, page: page.page, per_page: page.per_page }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection { #[default] Asc, Desc }

impl SortDirection {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() { Some("desc") => Self::Desc, _ => Self::Asc }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProductSort {
    #[default]
    Title,
    Price,
    CreatedAt,
    /// Cyrillic titles first, then Latin, digits and the rest; then by title
    Alphabet,
    /// Exact article match first, then biggest discount, then title
    Suggestion { exact_article: String },
}

impl ProductSort {
    /// Whitelisted API sort columns; anything else falls back to title.
    pub fn parse(value: Option<&str>) -> Self {
        match value { Some("price") => Self::Price, Some("created_at") => Self::CreatedAt, _ => Self::Title }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProductQuery {
    pub only_active: bool,
    pub category_id: Option<i64>,
    pub category_slug: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// Every term must match title, article code or slug
    pub terms: Vec<String>,
    pub sort: ProductSort,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, Default)]
pub struct NewsQuery {
    pub only_published: bool,
    pub tag: Option<String>,
    pub terms: Vec<String>,
    /// Also match content and tags, not just title and excerpt
    pub search_body: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CategoryOrder { #[default] Title, MostProducts }

#[derive(Clone, Debug, Default)]
pub struct CategoryQuery { pub only_active: bool, pub order: CategoryOrder }

#[derive(Clone, Debug, Default)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub delivery_method: Option<DeliveryMethod>,
}

/// Product with its category and review aggregates loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductDetails {
    pub product: Product,
    pub category: Option<Category>,
    pub rating_avg: Option<f64>,
    pub reviews_count: i64,
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn list_categories(&self, query: &CategoryQuery, page: Page) -> StorageResult<Paginated<CategoryWithCount>>;
    async fn get_category(&self, id: i64) -> StorageResult<Option<CategoryWithCount>>;
    async fn find_category_by_slug(&self, slug: &str) -> StorageResult<Option<Category>>;
    async fn find_category_by_title(&self, title: &str) -> StorageResult<Option<Category>>;
    async fn category_slug_exists(&self, slug: &Slug) -> StorageResult<bool>;
    async fn create_category(&self, draft: NewCategory) -> StorageResult<Category>;
    async fn update_category(&self, id: i64, patch: CategoryPatch) -> StorageResult<Category>;
    /// Products of a deleted category keep existing without one.
    async fn delete_category(&self, id: i64) -> StorageResult<bool>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn list_products(&self, query: &ProductQuery, page: Page) -> StorageResult<Paginated<ProductDetails>>;
    async fn get_product(&self, id: i64) -> StorageResult<Option<ProductDetails>>;
    async fn get_products(&self, ids: &[i64]) -> StorageResult<Vec<Product>>;
    async fn find_product_by_article(&self, article: &ArticleCode) -> StorageResult<Option<Product>>;
    async fn product_slug_exists(&self, slug: &Slug) -> StorageResult<bool>;
    async fn create_product(&self, draft: NewProduct) -> StorageResult<Product>;
    async fn update_product(&self, id: i64, patch: ProductPatch) -> StorageResult<Product>;
    /// Writes back a product loaded and modified by the caller.
    async fn save_product(&self, product: &Product) -> StorageResult<()>;
    /// Reviews of deleted products are removed with them.
    async fn delete_products(&self, ids: &[i64]) -> StorageResult<u64>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn create_review(&self, draft: NewReview) -> StorageResult<Review>;
    /// Newest first
    async fn list_reviews(&self, product_id: i64) -> StorageResult<Vec<Review>>;
    async fn delete_reviews(&self, ids: &[i64]) -> StorageResult<u64>;
}

#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Ordered by publish date, newest first
    async fn list_news(&self, query: &NewsQuery, page: Page) -> StorageResult<Paginated<News>>;
    async fn get_news(&self, id: i64) -> StorageResult<Option<News>>;
    async fn find_news_by_slug(&self, slug: &str) -> StorageResult<Option<News>>;
    async fn create_news(&self, draft: NewNews) -> StorageResult<News>;
    async fn update_news(&self, id: i64, patch: NewsPatch) -> StorageResult<News>;
    async fn increment_news_views(&self, id: i64) -> StorageResult<Option<News>>;
    async fn delete_news(&self, ids: &[i64]) -> StorageResult<u64>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: &Order) -> StorageResult<()>;
    async fn get_order(&self, id: Uuid) -> StorageResult<Option<Order>>;
    async fn find_order_by_number(&self, number: &str) -> StorageResult<Option<Order>>;
    async fn save_order(&self, order: &Order) -> StorageResult<()>;
    /// Newest first
    async fn list_orders(&self, query: &OrderQuery, page: Page) -> StorageResult<Paginated<Order>>;
    async fn count_orders(&self, status: OrderStatus) -> StorageResult<i64>;
    async fn delete_orders(&self, ids: &[Uuid]) -> StorageResult<u64>;
}

/// Combined storage trait
pub trait Store: CategoryStore + ProductStore + ReviewStore + NewsStore + OrderStore + Send + Sync {}

impl<T> Store for T where T: CategoryStore + ProductStore + ReviewStore + NewsStore + OrderStore + Send + Sync {}

/// Splits a search string into unique terms, comparing case-insensitively.
pub fn search_terms(input: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    input.split_whitespace()
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Escapes `\`, `%` and `_` for a LIKE pattern.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') { out.push('\\'); }
        out.push(ch);
    }
    out
}

/// Script class of the first character, used by the catalog ordering.
pub fn alphabet_rank(title: &str) -> u8 {
    match title.chars().next() {
        Some(c) if matches!(c, 'А'..='я' | 'Ё' | 'ё') => 1,
        Some(c) if c.is_ascii_alphabetic() => 2,
        Some(c) if c.is_ascii_digit() => 3,
        _ => 4,
    }
}
