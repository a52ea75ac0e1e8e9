//! JSON shapes for API resources and page props

use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::domain::aggregates::{Category, CategoryWithCount, News, NewsTag, Order, Review};
use crate::store::{Paginated, ProductDetails};

/// Public URL of a stored file; absolute and protocol-relative values pass through.
pub fn asset_url(config: &AppConfig, path: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    if ["http://", "https://", "//"].iter().any(|p| path.starts_with(p)) {
        return Some(path.to_string());
    }
    Some(config.url(&format!("storage/{}", path.trim_start_matches('/'))))
}

fn asset_urls(config: &AppConfig, paths: &[String]) -> Vec<String> {
    paths.iter().filter_map(|p| asset_url(config, p)).collect()
}

pub fn category(c: &CategoryWithCount) -> Value {
    let cat = &c.category;
    json!({
        "id": cat.id,
        "title": cat.title,
        "slug": cat.slug,
        "description": cat.description,
        "image": cat.image,
        "is_active": cat.is_active,
        "products_count": c.products_count,
        "created_at": cat.created_at,
        "updated_at": cat.updated_at,
    })
}

fn category_brief(c: &Category) -> Value {
    json!({"id": c.id, "title": c.title, "slug": c.slug})
}

pub fn review(r: &Review) -> Value {
    json!({
        "id": r.id,
        "product_id": r.product_id,
        "author_name": r.author_name,
        "author_email": r.author_email,
        "body": r.body,
        "rating": r.rating,
        "created_at": r.created_at,
    })
}

/// API product resource. `reviews` is only present when loaded.
pub fn product(d: &ProductDetails, reviews: Option<&[Review]>) -> Value {
    let p = &d.product;
    let mut value = json!({
        "id": p.id,
        "title": p.title,
        "slug": p.slug,
        "article_id": p.article_id,
        "category_id": p.category_id,
        "price": p.price,
        "discount": p.discount,
        "final_price": p.final_price(),
        "description": p.description,
        "characteristics": p.characteristics,
        "images": p.images,
        "is_active": p.is_active,
        "category": d.category.as_ref().map(category_brief),
        "rating_avg": d.rating_avg,
        "reviews_count": d.reviews_count,
        "created_at": p.created_at,
        "updated_at": p.updated_at,
    });
    if let Some(reviews) = reviews {
        value["reviews"] = reviews.iter().map(review).collect();
    }
    value
}

/// Product as the storefront pages render it, with resolved image URLs.
pub fn page_product(config: &AppConfig, d: &ProductDetails, reviews: &[Review]) -> Value {
    let p = &d.product;
    let category = d.category.as_ref().map(|c| {
        json!({
            "id": c.id,
            "title": c.title,
            "slug": c.slug,
            "description": c.description,
            "image": c.image.as_deref().and_then(|i| asset_url(config, i)),
            "is_active": c.is_active,
        })
    });
    json!({
        "id": p.id,
        "title": p.title,
        "slug": p.slug,
        "article_id": p.article_id,
        "price": p.price,
        "discount": p.discount,
        "final_price": p.final_price(),
        "characteristics": p.characteristics,
        "images": asset_urls(config, &p.images),
        "description": p.description,
        "is_active": p.is_active,
        "rating_avg": d.rating_avg,
        "reviews_count": d.reviews_count,
        "reviews": reviews.iter().map(review).collect::<Vec<_>>(),
        "category": category,
    })
}

/// Compact product for search suggestions.
pub fn preview(config: &AppConfig, d: &ProductDetails) -> Value {
    let p = &d.product;
    let images = asset_urls(config, &p.images);
    json!({
        "id": p.id,
        "title": p.title,
        "slug": p.slug,
        "article_id": p.article_id,
        "price": p.price,
        "final_price": p.final_price(),
        "discount": p.discount,
        "image": images.first(),
        "images": images,
        "category": d.category.as_ref().map(|c| json!({"id": c.id, "title": c.title})),
    })
}

pub fn page_category(config: &AppConfig, c: &CategoryWithCount) -> Value {
    let mut value = category(c);
    value["image"] = json!(c.category.image.as_deref().and_then(|i| asset_url(config, i)));
    value
}

/// API news resource; `content` only when `full`.
pub fn news(n: &News, full: bool) -> Value {
    let mut value = json!({
        "id": n.id,
        "title": n.title,
        "slug": n.slug,
        "excerpt": n.excerpt,
        "image": n.image,
        "tags": n.tags,
        "views": n.views,
        "is_active": n.is_active,
        "published_at": n.published_at,
        "created_at": n.created_at,
        "updated_at": n.updated_at,
    });
    if full {
        value["content"] = json!(n.content);
    }
    value
}

pub fn page_news(config: &AppConfig, n: &News) -> Value {
    json!({
        "id": n.id,
        "title": n.title,
        "slug": n.slug,
        "excerpt": n.excerpt,
        "content": n.content,
        "image": n.image.as_deref().and_then(|i| asset_url(config, i)),
        "tags": n.tags.iter().map(NewsTag::normalize).collect::<Vec<_>>(),
        "views": n.views,
        "is_active": n.is_active,
        "published_at": n.published_at,
    })
}

/// Order as shown on the public tracking page.
pub fn tracking_order(o: &Order) -> Value {
    let items: Vec<Value> = o.products.iter().map(|item| json!({
        "id": item.id,
        "title": item.title,
        "slug": item.slug,
        "image": item.image,
        "quantity": item.quantity,
        "unit_price": item.final_price,
        "total_price": item.total_price,
    })).collect();
    let d = &o.delivery;
    json!({
        "uuid": o.id,
        "number": o.number,
        "status": o.status,
        "status_label": o.status.label(),
        "payment_method": o.payment_method,
        "payment_method_label": o.payment_method.label(),
        "delivery_method": o.delivery_method,
        "delivery_method_label": o.delivery_method.label(),
        "delivery_is_private_house": d.is_private_house,
        "delivery": {
            "city": d.city,
            "street": d.street,
            "house": d.house,
            "apartment": d.apartment,
            "entrance": d.entrance,
            "comment": d.comment,
        },
        "customer": {
            "first_name": o.customer.first_name,
            "last_name": o.customer.last_name,
            "phone": o.customer.phone,
            "email": o.customer.email,
        },
        "items": items,
        "items_count": o.items_count,
        "total_price": o.total_price,
        "created_at": o.created_at,
        "updated_at": o.updated_at,
    })
}

/// Full order for the admin, tracking fields plus payment and comments.
pub fn admin_order(o: &Order) -> Value {
    let mut value = tracking_order(o);
    value["comment"] = json!(o.comment);
    value["agreement"] = json!(o.agreement);
    value["address"] = json!(o.delivery.one_line());
    value["payment"] = json!(o.payment);
    value
}

/// Absolute link to `path` with the non-empty `params` and an optional page number.
fn link(config: &AppConfig, path: &str, params: &[(&str, &str)], page: Option<u32>) -> Option<reqwest::Url> {
    let mut url = reqwest::Url::parse(&config.url(path)).ok()?;
    let pairs: Vec<(&str, String)> = params.iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (*k, v.to_string()))
        .chain(page.map(|n| ("page", n.to_string())))
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Some(url)
}

/// Request path of a page, as echoed back in the page object `url`.
pub fn page_path(config: &AppConfig, path: &str, params: &[(&str, &str)], page: Option<u32>) -> String {
    match link(config, path, params, page) {
        Some(url) => match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        },
        None => path.to_string(),
    }
}

/// Pagination meta for page props, with links to the neighbouring pages.
pub fn page_meta<T>(config: &AppConfig, page: &Paginated<T>, path: &str, params: &[(&str, &str)]) -> Value {
    let to = |n: u32| link(config, path, params, Some(n)).map(|u| u.to_string());
    let last = page.last_page();
    let mut meta = super::meta(page);
    meta["next_page_url"] = json!(if page.page < last { to(page.page + 1) } else { None });
    meta["prev_page_url"] = json!(if page.page > 1 { to(page.page - 1) } else { None });
    meta
}
