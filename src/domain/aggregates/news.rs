//! News Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Slug;

pub const DEFAULT_TAG_COLOR: &str = "#3B82F6";
pub const DEFAULT_TAG_LABEL: &str = "Тег";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct News {
    pub id: i64,
    pub title: String,
    pub slug: Slug,
    pub excerpt: Option<String>,
    pub content: String,
    pub image: Option<String>,
    pub tags: Vec<NewsTag>,
    pub views: i64,
    pub is_active: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tags are stored either as bare strings or as styled objects written by the admin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NewsTag {
    Plain(String),
    Styled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TagView {
    pub label: String,
    pub color: String,
}

impl NewsTag {
    pub fn normalize(&self) -> TagView {
        match self {
            NewsTag::Plain(label) => TagView { label: label.clone(), color: DEFAULT_TAG_COLOR.into() },
            NewsTag::Styled { label, name, value, color } => TagView {
                label: label.clone().or_else(|| name.clone()).or_else(|| value.clone()).unwrap_or_else(|| DEFAULT_TAG_LABEL.into()),
                color: color.clone().unwrap_or_else(|| DEFAULT_TAG_COLOR.into()),
            },
        }
    }

    /// Text used for tag filters and search.
    pub fn text(&self) -> String { self.normalize().label }
}

#[derive(Clone, Debug)]
pub struct NewNews {
    pub title: String,
    pub slug: Slug,
    pub excerpt: Option<String>,
    pub content: String,
    pub image: Option<String>,
    pub tags: Vec<NewsTag>,
    pub is_active: bool,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct NewsPatch {
    pub title: Option<String>,
    pub slug: Option<Slug>,
    pub excerpt: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub tags: Option<Vec<NewsTag>>,
    pub is_active: Option<bool>,
    pub published_at: Option<DateTime<Utc>>,
}

impl News {
    pub fn create(id: i64, draft: NewNews) -> Self {
        let now = Utc::now();
        Self {
            id, title: draft.title, slug: draft.slug, excerpt: draft.excerpt, content: draft.content,
            image: draft.image, tags: draft.tags, views: 0, is_active: draft.is_active,
            published_at: draft.published_at, created_at: now, updated_at: now,
        }
    }

    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.published_at.is_some_and(|at| at <= now)
    }

    pub fn has_tag(&self, tag: &str) -> bool { self.tags.iter().any(|t| t.text() == tag) }

    pub fn apply(&mut self, patch: NewsPatch) {
        if let Some(v) = patch.title { self.title = v; }
        if let Some(v) = patch.slug { self.slug = v; }
        if patch.excerpt.is_some() { self.excerpt = patch.excerpt; }
        if let Some(v) = patch.content { self.content = v; }
        if patch.image.is_some() { self.image = patch.image; }
        if let Some(v) = patch.tags { self.tags = v; }
        if let Some(v) = patch.is_active { self.is_active = v; }
        if patch.published_at.is_some() { self.published_at = patch.published_at; }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn news(active: bool, published_at: Option<DateTime<Utc>>) -> News {
        News::create(1, NewNews {
            title: "Скидки".into(), slug: Slug::new("skidki").unwrap(), excerpt: None, content: "...".into(),
            image: None, tags: vec![], is_active: active, published_at,
        })
    }

    #[test]
    fn test_published_scope() {
        let now = Utc::now();
        assert!(news(true, Some(now - Duration::hours(1))).is_published(now));
        assert!(!news(true, Some(now + Duration::hours(1))).is_published(now));
        assert!(!news(false, Some(now - Duration::hours(1))).is_published(now));
        assert!(!news(true, None).is_published(now));
    }

    #[test]
    fn test_tag_normalization() {
        let tags: Vec<NewsTag> = serde_json::from_value(serde_json::json!([
            "акция",
            {"name": "ремонт", "color": "#FF0000"},
            {"color": "#000000"}
        ])).unwrap();
        let views: Vec<TagView> = tags.iter().map(NewsTag::normalize).collect();
        assert_eq!(views[0], TagView { label: "акция".into(), color: DEFAULT_TAG_COLOR.into() });
        assert_eq!(views[1], TagView { label: "ремонт".into(), color: "#FF0000".into() });
        assert_eq!(views[2].label, "Тег");
    }
}
