//! Review Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Rating;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub product_id: i64,
    pub author_name: String,
    pub author_email: Option<String>,
    pub body: String,
    pub rating: Rating,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewReview {
    pub product_id: i64,
    pub author_name: String,
    pub author_email: Option<String>,
    pub body: String,
    pub rating: Rating,
}

impl Review {
    pub fn create(id: i64, draft: NewReview) -> Self {
        Self {
            id, product_id: draft.product_id, author_name: draft.author_name, author_email: draft.author_email,
            body: draft.body, rating: draft.rating, created_at: Utc::now(),
        }
    }
}
