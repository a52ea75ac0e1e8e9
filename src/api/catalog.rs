//! Category and product resources under `/api/v1`

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::{created, done, flag, ok, paginated, views, ApiError, ApiResult, AppState, FieldErrors, Payload};
use crate::domain::aggregates::{CategoryPatch, Characteristics, NewCategory, NewProduct, ProductPatch};
use crate::domain::value_objects::{ArticleCode, Discount, Money, Slug};
use crate::store::{CategoryOrder, CategoryQuery, Page, ProductQuery, ProductSort, SortDirection};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/:id", get(get_category).put(update_category).patch(update_category).delete(delete_category))
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(get_product).put(update_product).patch(update_product).delete(delete_product))
}

fn slug_field(errors: &mut FieldErrors, field: &str, value: Option<&str>) -> Option<Slug> {
    let value = value?;
    match Slug::new(value) {
        Ok(slug) => Some(slug),
        Err(e) => { errors.add(field, e.to_string()); None }
    }
}

fn image_list(errors: &mut FieldErrors, images: Option<Vec<Option<String>>>) -> Option<Vec<String>> {
    let images = images?;
    for (i, image) in images.iter().enumerate() {
        if image.as_ref().is_some_and(|p| p.chars().count() > 255) {
            errors.add(format!("images.{i}"), "The image path must not be greater than 255 characters.");
        }
    }
    Some(images.into_iter().flatten().filter(|p| !p.trim().is_empty()).collect())
}

// =============================================================================
// Categories
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CategoryListParams {
    pub only_active: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_categories(State(s): State<AppState>, Query(p): Query<CategoryListParams>) -> ApiResult<Json<Value>> {
    let query = CategoryQuery { only_active: flag(p.only_active.as_deref()).unwrap_or(false), order: CategoryOrder::Title };
    let result = s.store.list_categories(&query, Page::new(p.page, p.per_page, 50)).await?;
    Ok(paginated(result.map(|c| views::category(&c)), "Список категорий"))
}

async fn get_category(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let category = s.store.get_category(id).await?.ok_or_else(|| ApiError::not_found("category"))?;
    Ok(ok(views::category(&category), "Категория"))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CategoryRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub slug: Option<String>,
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub image: Option<String>,
    pub is_active: Option<bool>,
}

async fn create_category(State(s): State<AppState>, Payload(r): Payload<CategoryRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut errors = FieldErrors::default();
    errors.absorb("", r.validate());
    let title = r.title.clone().unwrap_or_default();
    if title.trim().is_empty() && !errors.contains("title") { errors.required("title"); }
    // slug defaults to the transliterated title
    let slug = match r.slug.as_deref() {
        Some(raw) => slug_field(&mut errors, "slug", Some(raw)),
        None => Slug::from_title(&title),
    };
    if slug.is_none() && !errors.contains("slug") && !errors.contains("title") { errors.required("slug"); }
    errors.into_result()?;
    let Some(slug) = slug else { return Err(ApiError::BadRequest("slug is required".into())) };

    let category = s.store.create_category(NewCategory {
        title, slug, description: r.description, image: r.image, is_active: r.is_active.unwrap_or(true),
    }).await?;
    tracing::info!(category_id = category.id, slug = %category.slug, "category created");
    let category = s.store.get_category(category.id).await?.ok_or_else(|| ApiError::not_found("category"))?;
    Ok(created(views::category(&category), "Категория создана"))
}

async fn update_category(State(s): State<AppState>, Path(id): Path<i64>, Payload(r): Payload<CategoryRequest>) -> ApiResult<Json<Value>> {
    s.store.get_category(id).await?.ok_or_else(|| ApiError::not_found("category"))?;
    let mut errors = FieldErrors::default();
    errors.absorb("", r.validate());
    let slug = slug_field(&mut errors, "slug", r.slug.as_deref());
    errors.into_result()?;

    s.store.update_category(id, CategoryPatch {
        title: r.title, slug, description: r.description, image: r.image, is_active: r.is_active,
    }).await?;
    let category = s.store.get_category(id).await?.ok_or_else(|| ApiError::not_found("category"))?;
    Ok(ok(views::category(&category), "Категория обновлена"))
}

async fn delete_category(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if !s.store.delete_category(id).await? {
        return Err(ApiError::not_found("category"));
    }
    tracing::info!(category_id = id, "category deleted");
    Ok(done("Категория удалена"))
}

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    pub only_active: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ProductListParams {
    fn query(&self) -> ProductQuery {
        let filled = |v: &Option<String>| v.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        ProductQuery {
            only_active: flag(self.only_active.as_deref()).unwrap_or(false),
            category_slug: filled(&self.category),
            min_price: self.min_price,
            max_price: self.max_price,
            // the whole search string is matched as one phrase
            terms: filled(&self.search).into_iter().collect(),
            sort: ProductSort::parse(self.sort.as_deref()),
            direction: SortDirection::parse(self.direction.as_deref()),
            ..ProductQuery::default()
        }
    }
}

async fn list_products(State(s): State<AppState>, Query(p): Query<ProductListParams>) -> ApiResult<Json<Value>> {
    let result = s.store.list_products(&p.query(), Page::new(p.page, p.per_page, 15)).await?;
    Ok(paginated(result.map(|d| views::product(&d, None)), "Список товаров"))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let details = s.store.get_product(id).await?.ok_or_else(|| ApiError::not_found("product"))?;
    let reviews = s.store.list_reviews(id).await?;
    Ok(ok(views::product(&details, Some(&reviews)), "Информация о товаре"))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub slug: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub article_id: Option<String>,
    pub category_id: Option<i64>,
    pub price: Option<Decimal>,
    #[validate(range(min = 0, max = 90))]
    pub discount: Option<i32>,
    pub description: Option<String>,
    pub characteristics: Option<Characteristics>,
    pub images: Option<Vec<Option<String>>>,
    pub is_active: Option<bool>,
}

/// Checked product fields; every value is `None` when absent from the request.
struct ProductFields {
    slug: Option<Slug>,
    article_id: Option<ArticleCode>,
    price: Option<Money>,
    discount: Option<Discount>,
    images: Option<Vec<String>>,
}

impl ProductRequest {
    fn check(&mut self, errors: &mut FieldErrors) -> ProductFields {
        errors.absorb("", self.validate());
        let slug = slug_field(errors, "slug", self.slug.as_deref());
        let article_id = self.article_id.as_deref().and_then(|a| match ArticleCode::new(a) {
            Ok(code) => Some(code),
            Err(e) => { errors.add("article_id", e.to_string()); None }
        });
        let price = match self.price {
            Some(p) if p.is_sign_negative() => { errors.add("price", "The price field must be at least 0."); None }
            Some(p) if !Money::new(p).fits_column() => {
                errors.add("price", format!("The price field must not be greater than {}.", Money::max_stored().amount()));
                None
            }
            Some(p) => Some(Money::new(p)),
            None => None,
        };
        let discount = self.discount.and_then(|d| Discount::new(d).ok());
        let images = image_list(errors, self.images.take());
        ProductFields { slug, article_id, price, discount, images }
    }
}

async fn create_product(State(s): State<AppState>, Payload(mut r): Payload<ProductRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut errors = FieldErrors::default();
    let fields = r.check(&mut errors);
    for (field, present) in [
        ("title", r.title.is_some()), ("slug", r.slug.is_some()), ("article_id", r.article_id.is_some()),
        ("category_id", r.category_id.is_some()), ("price", r.price.is_some()),
    ] {
        if !present && !errors.contains(field) { errors.required(field); }
    }
    errors.into_result()?;
    let (Some(title), Some(slug), Some(article_id), Some(price)) = (r.title, fields.slug, fields.article_id, fields.price) else {
        return Err(ApiError::BadRequest("incomplete product".into()));
    };

    let product = s.store.create_product(NewProduct {
        title, slug, article_id, category_id: r.category_id, price,
        discount: fields.discount.unwrap_or_default(),
        description: r.description,
        characteristics: r.characteristics.unwrap_or_default(),
        images: fields.images.unwrap_or_default(),
        is_active: r.is_active.unwrap_or(true),
    }).await?;
    tracing::info!(product_id = product.id, article = %product.article_id, "product created");
    let details = s.store.get_product(product.id).await?.ok_or_else(|| ApiError::not_found("product"))?;
    Ok(created(views::product(&details, None), "Товар успешно создан"))
}

async fn update_product(State(s): State<AppState>, Path(id): Path<i64>, Payload(mut r): Payload<ProductRequest>) -> ApiResult<Json<Value>> {
    s.store.get_product(id).await?.ok_or_else(|| ApiError::not_found("product"))?;
    let mut errors = FieldErrors::default();
    let fields = r.check(&mut errors);
    errors.into_result()?;

    s.store.update_product(id, ProductPatch {
        title: r.title, slug: fields.slug, article_id: fields.article_id, category_id: r.category_id,
        price: fields.price, discount: fields.discount, description: r.description,
        characteristics: r.characteristics, images: fields.images, is_active: r.is_active,
    }).await?;
    let details = s.store.get_product(id).await?.ok_or_else(|| ApiError::not_found("product"))?;
    Ok(ok(views::product(&details, None), "Товар обновлён"))
}

async fn delete_product(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if s.store.delete_products(&[id]).await? == 0 {
        return Err(ApiError::not_found("product"));
    }
    tracing::info!(product_id = id, "product deleted");
    Ok(done("Товар удалён"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use axum::http::StatusCode;
    use serde_json::json;

    async fn category(router: &axum::Router, title: &str, slug: &str) -> i64 {
        let (status, body) = json(router, "POST", "/api/v1/categories", json!({"title": title, "slug": slug})).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }

    fn product_body(category_id: i64, article: &str, slug: &str) -> serde_json::Value {
        json!({
            "title": format!("Смеситель {article}"), "slug": slug, "article_id": article,
            "category_id": category_id, "price": 1999.99, "discount": 15,
            "images": ["products/a.jpg"], "characteristics": {"color": "хром"},
        })
    }

    #[tokio::test]
    async fn test_category_crud() {
        let app = app();
        let id = category(&app.router, "Смесители", "smesiteli").await;

        let (status, body) = json(&app.router, "PUT", &format!("/api/v1/categories/{id}"), json!({"is_active": false})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Категория обновлена");
        assert_eq!(body["data"]["is_active"], false);
        assert_eq!(body["data"]["title"], "Смесители");

        let (_, body) = get(&app.router, "/api/v1/categories?only_active=1").await;
        assert_eq!(body["meta"]["total"], 0);

        let (status, body) = json(&app.router, "DELETE", &format!("/api/v1/categories/{id}"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Категория удалена");
        let (status, _) = get(&app.router, &format!("/api/v1/categories/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_category_slug_from_title() {
        let app = app();
        let (status, body) = json(&app.router, "POST", "/api/v1/categories", json!({"title": "Ванны и душ"})).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["slug"], "vanny-i-dush");
        assert_eq!(body["data"]["products_count"], 0);
    }

    #[tokio::test]
    async fn test_product_create_and_show() {
        let app = app();
        let cat = category(&app.router, "Смесители", "smesiteli").await;
        let (status, body) = json(&app.router, "POST", "/api/v1/products", product_body(cat, "GR-1", "gr-1")).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["message"], "Товар успешно создан");
        assert_eq!(body["data"]["final_price"], 1699.99);
        assert_eq!(body["data"]["category"]["slug"], "smesiteli");
        let id = body["data"]["id"].as_i64().unwrap();

        let review = json!({"product_id": id, "author_name": "Ольга", "body": "Отлично", "rating": 5});
        let (status, _) = json(&app.router, "POST", "/api/v1/reviews", review).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = get(&app.router, &format!("/api/v1/products/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Информация о товаре");
        assert_eq!(body["data"]["reviews_count"], 1);
        assert_eq!(body["data"]["rating_avg"], 5.0);
        assert_eq!(body["data"]["reviews"][0]["author_name"], "Ольга");
    }

    #[tokio::test]
    async fn test_product_uniqueness_is_422() {
        let app = app();
        let cat = category(&app.router, "Смесители", "smesiteli").await;
        json(&app.router, "POST", "/api/v1/products", product_body(cat, "GR-1", "gr-1")).await;

        let (status, body) = json(&app.router, "POST", "/api/v1/products", product_body(cat, "GR-1", "gr-2")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert!(body["errors"]["article_id"].is_array());

        let (status, body) = json(&app.router, "POST", "/api/v1/products", product_body(cat, "GR-2", "gr-1")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["slug"].is_array());
    }

    #[tokio::test]
    async fn test_product_validation() {
        let app = app();
        let (status, body) = json(&app.router, "POST", "/api/v1/products", json!({"title": "", "price": -1, "discount": 95, "category_id": 999})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        for field in ["title", "slug", "article_id", "price", "discount"] {
            assert!(body["errors"][field].is_array(), "missing error for {field}: {body}");
        }

        let (status, body) = json(&app.router, "POST", "/api/v1/products", json!({
            "title": "Кран", "slug": "kran", "article_id": "K-1", "category_id": 999, "price": 10,
        })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["category_id"].is_array());
    }

    #[tokio::test]
    async fn test_product_price_upper_bound() {
        let app = app();
        let category_id = category(&app.router, "Котлы", "kotly").await;
        let mut body = product_body(category_id, "K-1", "kotel");
        body["price"] = json!(100_000_000);
        let (status, response) = json(&app.router, "POST", "/api/v1/products", body.clone()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response["errors"]["price"].is_array(), "{response}");

        body["price"] = json!(99_999_999);
        let (status, response) = json(&app.router, "POST", "/api/v1/products", body).await;
        assert_eq!(status, StatusCode::CREATED, "{response}");
        let id = response["data"]["id"].as_i64().unwrap();

        let (status, response) = json(&app.router, "PATCH", &format!("/api/v1/products/{id}"), json!({"price": 1_000_000_000})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response["errors"]["price"].is_array(), "{response}");
    }

    #[tokio::test]
    async fn test_product_list_filters() {
        let app = app();
        let cat = category(&app.router, "Смесители", "smesiteli").await;
        let other = category(&app.router, "Ванны", "vanny").await;
        json(&app.router, "POST", "/api/v1/products", product_body(cat, "GR-1", "gr-1")).await;
        let mut cheap = product_body(other, "VN-1", "vn-1");
        cheap["price"] = json!(500);
        json(&app.router, "POST", "/api/v1/products", cheap).await;

        let (_, body) = get(&app.router, "/api/v1/products?category=vanny").await;
        assert_eq!(body["meta"]["total"], 1);
        assert_eq!(body["data"][0]["article_id"], "VN-1");

        let (_, body) = get(&app.router, "/api/v1/products?sort=price&direction=desc").await;
        assert_eq!(body["data"][0]["article_id"], "GR-1");

        let (_, body) = get(&app.router, "/api/v1/products?min_price=1000").await;
        assert_eq!(body["meta"]["total"], 1);

        let (_, body) = get(&app.router, "/api/v1/products?search=vn-").await;
        assert_eq!(body["data"][0]["article_id"], "VN-1");
        assert_eq!(body["meta"]["per_page"], 15);
    }

    #[tokio::test]
    async fn test_product_update_and_delete() {
        let app = app();
        let cat = category(&app.router, "Смесители", "smesiteli").await;
        let (_, body) = json(&app.router, "POST", "/api/v1/products", product_body(cat, "GR-1", "gr-1")).await;
        let id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = json(&app.router, "PATCH", &format!("/api/v1/products/{id}"), json!({"discount": 0, "price": 100})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["final_price"], 100.0);
        assert_eq!(body["data"]["slug"], "gr-1");

        let (status, body) = json(&app.router, "DELETE", &format!("/api/v1/products/{id}"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Товар удалён");
        let (status, _) = json(&app.router, "DELETE", &format!("/api/v1/products/{id}"), json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
