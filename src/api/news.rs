use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::{created, done, flag, ok, paginated, parse_datetime, views, ApiError, ApiResult, AppState, FieldErrors, Payload};
use crate::domain::aggregates::{NewNews, NewsPatch, NewsTag};
use crate::domain::value_objects::Slug;
use crate::store::{NewsQuery, Page};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/news", get(list_news).post(create_news))
        .route("/news/:id", get(get_news).put(update_news).patch(update_news).delete(delete_news))
}

#[derive(Debug, Default, Deserialize)]
pub struct NewsListParams {
    pub only_published: Option<String>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub full: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_news(State(s): State<AppState>, Query(p): Query<NewsListParams>) -> ApiResult<Json<Value>> {
    let query = NewsQuery {
        only_published: flag(p.only_published.as_deref()).unwrap_or(true),
        tag: p.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(String::from),
        // the whole search string is matched as one phrase
        terms: p.search.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(String::from).into_iter().collect(),
        search_body: false,
    };
    let full = flag(p.full.as_deref()).unwrap_or(false);
    let result = s.store.list_news(&query, Page::new(p.page, p.per_page, 12)).await?;
    Ok(paginated(result.map(|n| views::news(&n, full)), "Новости"))
}

#[derive(Debug, Default, Deserialize)]
pub struct ShowParams {
    pub increment_views: Option<String>,
}

async fn get_news(State(s): State<AppState>, Path(id): Path<i64>, Query(p): Query<ShowParams>) -> ApiResult<Json<Value>> {
    let news = if flag(p.increment_views.as_deref()).unwrap_or(true) {
        s.store.increment_news_views(id).await?
    } else {
        s.store.get_news(id).await?
    };
    let news = news.ok_or_else(|| ApiError::not_found("news"))?;
    Ok(ok(views::news(&news, true), "Новость"))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct NewsRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub slug: Option<String>,
    #[validate(length(max = 500))]
    pub excerpt: Option<String>,
    #[validate(length(min = 1))]
    pub content: Option<String>,
    #[validate(length(max = 255))]
    pub image: Option<String>,
    pub tags: Option<Vec<Option<String>>>,
    pub is_active: Option<bool>,
    pub published_at: Option<String>,
}

struct NewsFields {
    slug: Option<Slug>,
    tags: Option<Vec<NewsTag>>,
    published_at: Option<DateTime<Utc>>,
}

impl NewsRequest {
    fn check(&self, errors: &mut FieldErrors) -> NewsFields {
        errors.absorb("", self.validate());
        let slug = self.slug.as_deref().and_then(|s| match Slug::new(s) {
            Ok(slug) => Some(slug),
            Err(e) => { errors.add("slug", e.to_string()); None }
        });
        let tags = self.tags.as_ref().map(|tags| {
            tags.iter().enumerate().filter_map(|(i, tag)| {
                let tag = tag.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
                if tag.chars().count() > 50 {
                    errors.add(format!("tags.{i}"), "The tag must not be greater than 50 characters.");
                }
                Some(NewsTag::Plain(tag.to_string()))
            }).collect()
        });
        let published_at = self.published_at.as_deref().filter(|v| !v.trim().is_empty()).and_then(|raw| {
            let parsed = parse_datetime(raw);
            if parsed.is_none() {
                errors.add("published_at", "The published at field must be a valid date.");
            }
            parsed
        });
        NewsFields { slug, tags, published_at }
    }
}

async fn create_news(State(s): State<AppState>, Payload(r): Payload<NewsRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut errors = FieldErrors::default();
    let fields = r.check(&mut errors);
    for (field, present) in [("title", r.title.is_some()), ("slug", r.slug.is_some()), ("content", r.content.is_some())] {
        if !present && !errors.contains(field) { errors.required(field); }
    }
    errors.into_result()?;
    let (Some(title), Some(slug), Some(content)) = (r.title, fields.slug, r.content) else {
        return Err(ApiError::BadRequest("incomplete news".into()));
    };

    let news = s.store.create_news(NewNews {
        title, slug, excerpt: r.excerpt, content, image: r.image,
        tags: fields.tags.unwrap_or_default(),
        is_active: r.is_active.unwrap_or(true),
        published_at: fields.published_at,
    }).await?;
    tracing::info!(news_id = news.id, slug = %news.slug, "news created");
    Ok(created(views::news(&news, true), "Новость создана"))
}

async fn update_news(State(s): State<AppState>, Path(id): Path<i64>, Payload(r): Payload<NewsRequest>) -> ApiResult<Json<Value>> {
    s.store.get_news(id).await?.ok_or_else(|| ApiError::not_found("news"))?;
    let mut errors = FieldErrors::default();
    let fields = r.check(&mut errors);
    errors.into_result()?;

    let news = s.store.update_news(id, NewsPatch {
        title: r.title, slug: fields.slug, excerpt: r.excerpt, content: r.content, image: r.image,
        tags: fields.tags, is_active: r.is_active, published_at: fields.published_at,
    }).await?;
    Ok(ok(views::news(&news, true), "Новость обновлена"))
}

async fn delete_news(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if s.store.delete_news(&[id]).await? == 0 {
        return Err(ApiError::not_found("news"));
    }
    Ok(done("Новость удалена"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use axum::http::StatusCode;
    use serde_json::json;

    async fn publish(router: &axum::Router, slug: &str, published_at: Option<&str>, tags: &[&str]) -> i64 {
        let (status, body) = json(router, "POST", "/api/v1/news", json!({
            "title": format!("Новость {slug}"), "slug": slug, "excerpt": "Кратко",
            "content": "Полный текст", "tags": tags, "published_at": published_at,
        })).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_list_only_published_by_default() {
        let app = app();
        publish(&app.router, "old", Some("2024-01-01"), &["акция"]).await;
        publish(&app.router, "new", Some("2025-01-01T09:00:00Z"), &[]).await;
        publish(&app.router, "draft", None, &[]).await;

        let (status, body) = get(&app.router, "/api/v1/news").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Новости");
        assert_eq!(body["meta"]["total"], 2);
        assert_eq!(body["meta"]["per_page"], 12);
        assert_eq!(body["data"][0]["slug"], "new");
        assert!(body["data"][0].get("content").is_none());

        let (_, body) = get(&app.router, "/api/v1/news?only_published=false&full=true").await;
        assert_eq!(body["meta"]["total"], 3);
        assert_eq!(body["data"][0]["content"], "Полный текст");

        let (_, body) = get(&app.router, "/api/v1/news?tag=%D0%B0%D0%BA%D1%86%D0%B8%D1%8F").await;
        assert_eq!(body["meta"]["total"], 1);
        assert_eq!(body["data"][0]["slug"], "old");
    }

    #[tokio::test]
    async fn test_search_matches_whole_phrase() {
        let app = app();
        let (status, _) = json(&app.router, "POST", "/api/v1/news", json!({
            "title": "Новый летний сезон", "slug": "season", "content": "Текст", "published_at": "2024-01-01",
        })).await;
        assert_eq!(status, StatusCode::CREATED);

        // "Новый сезон"
        let (_, body) = get(&app.router, "/api/v1/news?search=%D0%9D%D0%BE%D0%B2%D1%8B%D0%B9%20%D1%81%D0%B5%D0%B7%D0%BE%D0%BD").await;
        assert_eq!(body["meta"]["total"], 0);

        // "летний сезон"
        let (_, body) = get(&app.router, "/api/v1/news?search=%D0%BB%D0%B5%D1%82%D0%BD%D0%B8%D0%B9%20%D1%81%D0%B5%D0%B7%D0%BE%D0%BD").await;
        assert_eq!(body["meta"]["total"], 1);
        assert_eq!(body["data"][0]["slug"], "season");
    }

    #[tokio::test]
    async fn test_show_increments_views() {
        let app = app();
        let id = publish(&app.router, "views", Some("2024-01-01"), &[]).await;
        let (_, body) = get(&app.router, &format!("/api/v1/news/{id}")).await;
        assert_eq!(body["data"]["views"], 1);
        assert_eq!(body["data"]["content"], "Полный текст");
        let (_, body) = get(&app.router, &format!("/api/v1/news/{id}?increment_views=false")).await;
        assert_eq!(body["data"]["views"], 1);
    }

    #[tokio::test]
    async fn test_news_validation_and_conflict() {
        let app = app();
        publish(&app.router, "dup", None, &[]).await;
        let (status, body) = json(&app.router, "POST", "/api/v1/news", json!({
            "title": "Другая", "slug": "dup", "content": "x",
        })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["slug"].is_array());

        let long_tag = "т".repeat(51);
        let (status, body) = json(&app.router, "POST", "/api/v1/news", json!({
            "title": "x", "slug": "x", "excerpt": "я".repeat(501), "tags": [long_tag], "published_at": "soon",
        })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        for field in ["content", "excerpt", "tags.0", "published_at"] {
            assert!(body["errors"][field].is_array(), "missing error for {field}: {body}");
        }
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let app = app();
        let id = publish(&app.router, "edit", None, &[]).await;
        let (status, body) = json(&app.router, "PUT", &format!("/api/v1/news/{id}"), json!({"title": "Обновлено"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Новость обновлена");
        assert_eq!(body["data"]["title"], "Обновлено");
        assert_eq!(body["data"]["slug"], "edit");

        let (status, body) = json(&app.router, "DELETE", &format!("/api/v1/news/{id}"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Новость удалена");
    }
}
