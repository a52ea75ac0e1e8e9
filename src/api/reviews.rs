use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::{created, done, views, ApiError, ApiResult, AppState, FieldErrors, Payload};
use crate::domain::aggregates::NewReview;
use crate::domain::value_objects::Rating;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/reviews", post(create_review))
        .route("/reviews/:id", delete(delete_review))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ReviewRequest {
    pub product_id: Option<i64>,
    #[validate(length(min = 1, max = 255))]
    pub author_name: String,
    #[validate(email, length(max = 255))]
    pub author_email: Option<String>,
    #[validate(length(min = 1))]
    pub body: String,
    #[validate(range(min = 1, max = 5))]
    pub rating: Option<i32>,
}

async fn create_review(State(s): State<AppState>, Payload(mut r): Payload<ReviewRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    r.author_email = r.author_email.take().filter(|e| !e.trim().is_empty());
    let mut errors = FieldErrors::default();
    errors.absorb("", r.validate());
    if r.product_id.is_none() { errors.required("product_id"); }
    if r.rating.is_none() { errors.required("rating"); }
    errors.into_result()?;
    let (Some(product_id), Some(Ok(rating))) = (r.product_id, r.rating.map(Rating::new)) else {
        return Err(ApiError::BadRequest("incomplete review".into()));
    };

    let review = s.store.create_review(NewReview {
        product_id, author_name: r.author_name, author_email: r.author_email, body: r.body, rating,
    }).await?;
    tracing::info!(review_id = review.id, product_id, "review added");
    Ok(created(views::review(&review), "Отзыв добавлен"))
}

async fn delete_review(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if s.store.delete_reviews(&[id]).await? == 0 {
        return Err(ApiError::not_found("review"));
    }
    Ok(done("Отзыв удалён"))
}
