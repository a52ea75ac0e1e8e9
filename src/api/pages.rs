//! Storefront page props
//!
//! Each page answers with a page object `{component, props, url}` that the
//! frontend renders. Search suggestions are plain JSON.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{views, ApiError, ApiResult, AppState};
use crate::store::{
    search_terms, CategoryOrder, CategoryQuery, NewsQuery, Page, ProductDetails, ProductQuery, ProductSort, SortDirection,
};

const INFO_PAGES: [(&str, &str); 4] = [
    ("/about", "About"),
    ("/services", "Services"),
    ("/payment", "Payment"),
    ("/disclaimer", "Disclaimer"),
];

pub(super) fn routes() -> Router<AppState> {
    let mut router = Router::new()
        .route("/", get(index))
        .route("/catalog", get(catalog))
        .route("/products/:id", get(product))
        .route("/search", get(search))
        .route("/search/suggestions", get(suggestions))
        .route("/news", get(news_index))
        .route("/news/:slug", get(news_show))
        .route("/contacts", get(contacts));
    for (path, component) in INFO_PAGES {
        router = router.route(path, get(move || async move { render(component, json!({}), path) }));
    }
    router
}

pub(super) fn render(component: &str, props: Value, url: &str) -> Json<Value> {
    Json(json!({"component": component, "props": props, "url": url}))
}

fn first_page(per_page: u32) -> Page { Page::new(Some(1), Some(per_page), per_page) }

fn all_active_categories() -> (CategoryQuery, Page) {
    (CategoryQuery { only_active: true, order: CategoryOrder::Title }, first_page(Page::MAX_PER_PAGE))
}

async fn index(State(s): State<AppState>) -> ApiResult<Json<Value>> {
    let products = ProductQuery { only_active: true, sort: ProductSort::CreatedAt, direction: SortDirection::Desc, ..Default::default() };
    let categories = CategoryQuery { only_active: true, order: CategoryOrder::MostProducts };
    let news = NewsQuery { only_published: true, ..Default::default() };

    let (products, categories, news) = tokio::try_join!(
        s.store.list_products(&products, first_page(8)),
        s.store.list_categories(&categories, first_page(6)),
        s.store.list_news(&news, first_page(3)),
    )?;

    let c = &s.config;
    Ok(render("Index", json!({
        "featuredProducts": products.items.iter().map(|d| views::page_product(c, d, &[])).collect::<Vec<_>>(),
        "topCategories": categories.items.iter().map(|cat| views::page_category(c, cat)).collect::<Vec<_>>(),
        "latestNews": news.items.iter().map(|n| views::page_news(c, n)).collect::<Vec<_>>(),
    }), "/"))
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    pub category: Option<String>,
    pub page: Option<u32>,
}

async fn catalog(State(s): State<AppState>, Query(p): Query<CatalogParams>) -> ApiResult<Json<Value>> {
    let slug = p.category.as_deref().map(str::trim).unwrap_or_default().to_string();
    let query = ProductQuery {
        only_active: true,
        category_slug: Some(slug.clone()).filter(|s| !s.is_empty()),
        sort: ProductSort::Alphabet,
        ..Default::default()
    };
    let (category_query, category_page) = all_active_categories();
    let (products, categories) = tokio::try_join!(
        s.store.list_products(&query, Page::new(p.page, Some(12), 12)),
        s.store.list_categories(&category_query, category_page),
    )?;

    let c = &s.config;
    let meta = views::page_meta(c, &products, "/catalog", &[("category", slug.as_str())]);
    let url = views::page_path(c, "/catalog", &[("category", slug.as_str())], p.page.filter(|n| *n > 1));
    Ok(render("Catalog", json!({
        "products": {
            "data": products.items.iter().map(|d| views::page_product(c, d, &[])).collect::<Vec<_>>(),
            "meta": meta,
        },
        "categories": categories.items.iter().map(|cat| views::page_category(c, cat)).collect::<Vec<_>>(),
    }), &url))
}

async fn product(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let details = s.store.get_product(id).await?.ok_or_else(|| ApiError::not_found("product"))?;
    let reviews = s.store.list_reviews(id).await?;
    Ok(render("Product", json!({
        "product": views::page_product(&s.config, &details, &reviews),
    }), &format!("/products/{id}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub page: Option<u32>,
}

impl SearchParams {
    fn query(&self) -> &str { self.q.as_deref().map(str::trim).unwrap_or_default() }
}

async fn search(State(s): State<AppState>, Query(p): Query<SearchParams>) -> ApiResult<Json<Value>> {
    let q = p.query();
    if q.is_empty() {
        return Ok(render("Search", json!({"query": "", "products": [], "news": []}), "/search"));
    }
    let terms = search_terms(q);
    let products = ProductQuery { only_active: true, terms: terms.clone(), ..Default::default() };
    let news = NewsQuery { only_published: true, terms, search_body: true, ..Default::default() };
    // product matches are paged at the largest page size, news is a short list
    let (products, news) = tokio::try_join!(
        s.store.list_products(&products, Page::new(p.page, Some(Page::MAX_PER_PAGE), Page::MAX_PER_PAGE)),
        s.store.list_news(&news, first_page(8)),
    )?;

    let c = &s.config;
    Ok(render("Search", json!({
        "query": q,
        "products": products.items.iter().map(|d| views::page_product(c, d, &[])).collect::<Vec<_>>(),
        "productsMeta": views::page_meta(c, &products, "/search", &[("q", q)]),
        "news": news.items.iter().map(|n| views::page_news(c, n)).collect::<Vec<_>>(),
    }), &views::page_path(c, "/search", &[("q", q)], p.page.filter(|n| *n > 1))))
}

async fn suggestions(State(s): State<AppState>, Query(p): Query<SearchParams>) -> ApiResult<Json<Value>> {
    let q = p.query();
    if q.is_empty() {
        return Ok(Json(json!({"data": []})));
    }
    let query = ProductQuery {
        only_active: true,
        terms: search_terms(q),
        sort: ProductSort::Suggestion { exact_article: q.to_string() },
        ..Default::default()
    };
    let products = s.store.list_products(&query, first_page(8)).await?;
    let data: Vec<Value> = products.items.iter().map(|d: &ProductDetails| views::preview(&s.config, d)).collect();
    Ok(Json(json!({"data": data})))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
}

async fn news_index(State(s): State<AppState>, Query(p): Query<PageParams>) -> ApiResult<Json<Value>> {
    let query = NewsQuery { only_published: true, ..Default::default() };
    let news = s.store.list_news(&query, Page::new(p.page, Some(9), 9)).await?;
    let c = &s.config;
    Ok(render("News", json!({
        "news": {
            "data": news.items.iter().map(|n| views::page_news(c, n)).collect::<Vec<_>>(),
            "meta": views::page_meta(c, &news, "/news", &[]),
        },
    }), "/news"))
}

async fn news_show(State(s): State<AppState>, Path(slug): Path<String>) -> ApiResult<Json<Value>> {
    let mut news = s.store.find_news_by_slug(&slug).await?.ok_or_else(|| ApiError::not_found("news"))?;
    if news.is_published(chrono::Utc::now()) {
        if let Some(updated) = s.store.increment_news_views(news.id).await? {
            news = updated;
        }
    }
    Ok(render("NewsShow", json!({"news": views::page_news(&s.config, &news)}), &format!("/news/{slug}")))
}

async fn contacts(State(s): State<AppState>) -> ApiResult<Json<Value>> {
    let (query, page) = all_active_categories();
    let categories = s.store.list_categories(&query, page).await?;
    Ok(render("Contacts", json!({
        "categories": categories.items.iter().map(|cat| views::page_category(&s.config, cat)).collect::<Vec<_>>(),
    }), "/contacts"))
}
