//! Category Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Slug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub title: String,
    pub slug: Slug,
    pub description: Option<String>,
    pub image: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Category as read back with its product count attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryWithCount {
    #[serde(flatten)]
    pub category: Category,
    pub products_count: i64,
}

#[derive(Clone, Debug)]
pub struct NewCategory {
    pub title: String,
    pub slug: Slug,
    pub description: Option<String>,
    pub image: Option<String>,
    pub is_active: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CategoryPatch {
    pub title: Option<String>,
    pub slug: Option<Slug>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub is_active: Option<bool>,
}

impl Category {
    pub fn create(id: i64, draft: NewCategory) -> Self {
        let now = Utc::now();
        Self {
            id, title: draft.title, slug: draft.slug, description: draft.description, image: draft.image,
            is_active: draft.is_active, created_at: now, updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: CategoryPatch) {
        if let Some(title) = patch.title { self.title = title; }
        if let Some(slug) = patch.slug { self.slug = slug; }
        if patch.description.is_some() { self.description = patch.description; }
        if patch.image.is_some() { self.image = patch.image; }
        if let Some(active) = patch.is_active { self.is_active = active; }
        self.updated_at = Utc::now();
    }
}
