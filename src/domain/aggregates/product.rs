//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::domain::value_objects::{ArticleCode, Discount, Money, Slug};

pub type Characteristics = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub slug: Slug,
    pub article_id: ArticleCode,
    pub category_id: Option<i64>,
    pub price: Money,
    pub discount: Discount,
    pub description: Option<String>,
    pub characteristics: Characteristics,
    pub images: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewProduct {
    pub title: String,
    pub slug: Slug,
    pub article_id: ArticleCode,
    pub category_id: Option<i64>,
    pub price: Money,
    pub discount: Discount,
    pub description: Option<String>,
    pub characteristics: Characteristics,
    pub images: Vec<String>,
    pub is_active: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ProductPatch {
    pub title: Option<String>,
    pub slug: Option<Slug>,
    pub article_id: Option<ArticleCode>,
    pub category_id: Option<i64>,
    pub price: Option<Money>,
    pub discount: Option<Discount>,
    pub description: Option<String>,
    pub characteristics: Option<Characteristics>,
    pub images: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl Product {
    pub fn create(id: i64, draft: NewProduct) -> Self {
        let now = Utc::now();
        Self {
            id, title: draft.title, slug: draft.slug, article_id: draft.article_id, category_id: draft.category_id,
            price: draft.price, discount: draft.discount, description: draft.description,
            characteristics: draft.characteristics, images: draft.images, is_active: draft.is_active,
            created_at: now, updated_at: now,
        }
    }

    /// Price the customer pays after the product discount.
    pub fn final_price(&self) -> Money { self.price.discounted(self.discount) }

    pub fn apply(&mut self, patch: ProductPatch) {
        if let Some(v) = patch.title { self.title = v; }
        if let Some(v) = patch.slug { self.slug = v; }
        if let Some(v) = patch.article_id { self.article_id = v; }
        if patch.category_id.is_some() { self.category_id = patch.category_id; }
        if let Some(v) = patch.price { self.price = v; }
        if let Some(v) = patch.discount { self.discount = v; }
        if patch.description.is_some() { self.description = patch.description; }
        if let Some(v) = patch.characteristics { self.characteristics = v; }
        if let Some(v) = patch.images { self.images = v; }
        if let Some(v) = patch.is_active { self.is_active = v; }
        self.touch();
    }

    /// Merges values into the characteristics map, overwriting existing keys.
    pub fn merge_characteristics(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        for (k, v) in values { self.characteristics.insert(k, v); }
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn sample(id: i64) -> Product {
        Product::create(id, NewProduct {
            title: "Унитаз компакт".into(), slug: Slug::new(format!("unitaz-{id}")).unwrap(),
            article_id: ArticleCode::new(format!("A-{id}")).unwrap(), category_id: Some(1),
            price: Money::new(Decimal::new(10_000, 0)), discount: Discount::new(10).unwrap(),
            description: None, characteristics: Characteristics::new(), images: vec![], is_active: true,
        })
    }

    #[test]
    fn test_final_price() {
        assert_eq!(sample(1).final_price().amount(), Decimal::new(9_000, 0));
    }

    #[test]
    fn test_patch_and_merge() {
        let mut p = sample(1);
        p.apply(ProductPatch { discount: Some(Discount::default()), ..Default::default() });
        assert_eq!(p.final_price(), p.price);
        p.merge_characteristics([("stock".to_string(), Value::from(3.0))]);
        p.merge_characteristics([("stock".to_string(), Value::from(5.0))]);
        assert_eq!(p.characteristics.get("stock"), Some(&Value::from(5.0)));
        assert_eq!(p.category_id, Some(1));
    }
}
