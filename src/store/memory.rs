//! In-memory storage implementation

use super::*;
use crate::domain::value_objects::average_rating;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    categories: BTreeMap<i64, Category>,
    products: BTreeMap<i64, Product>,
    reviews: BTreeMap<i64, Review>,
    news: BTreeMap<i64, News>,
    orders: BTreeMap<Uuid, Order>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 { self.next_id += 1; self.next_id }

    fn products_count(&self, category_id: i64) -> i64 {
        self.products.values().filter(|p| p.category_id == Some(category_id)).count() as i64
    }

    fn with_count(&self, c: &Category) -> CategoryWithCount {
        CategoryWithCount { category: c.clone(), products_count: self.products_count(c.id) }
    }

    fn details(&self, p: &Product) -> ProductDetails {
        let ratings: Vec<_> = self.reviews.values().filter(|r| r.product_id == p.id).map(|r| r.rating).collect();
        ProductDetails {
            product: p.clone(),
            category: p.category_id.and_then(|id| self.categories.get(&id)).cloned(),
            reviews_count: ratings.len() as i64,
            rating_avg: average_rating(ratings),
        }
    }

    fn check_category_slug(&self, slug: &Slug, except: Option<i64>) -> StorageResult<()> {
        if self.categories.values().any(|c| &c.slug == slug && Some(c.id) != except) {
            return Err(StorageError::Conflict { field: "slug" });
        }
        Ok(())
    }

    fn check_product_keys(&self, slug: &Slug, article: &ArticleCode, except: Option<i64>) -> StorageResult<()> {
        let others = || self.products.values().filter(|p| Some(p.id) != except);
        if others().any(|p| &p.slug == slug) { return Err(StorageError::Conflict { field: "slug" }); }
        if others().any(|p| &p.article_id == article) { return Err(StorageError::Conflict { field: "article_id" }); }
        Ok(())
    }

    fn check_category_ref(&self, id: Option<i64>) -> StorageResult<()> {
        match id {
            Some(id) if !self.categories.contains_key(&id) => Err(StorageError::MissingReference { field: "category_id" }),
            _ => Ok(()),
        }
    }

    fn check_news_slug(&self, slug: &Slug, except: Option<i64>) -> StorageResult<()> {
        if self.news.values().any(|n| &n.slug == slug && Some(n.id) != except) {
            return Err(StorageError::Conflict { field: "slug" });
        }
        Ok(())
    }
}

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

fn contains_ci(haystack: &str, needle: &str) -> bool { haystack.to_lowercase().contains(&needle.to_lowercase()) }

fn matches_terms(terms: &[String], columns: &[&str]) -> bool {
    terms.iter().all(|t| columns.iter().any(|c| contains_ci(c, t)))
}

fn compare_products(sort: &ProductSort, direction: SortDirection, a: &Product, b: &Product) -> Ordering {
    let ord = match sort {
        ProductSort::Title => a.title.cmp(&b.title),
        ProductSort::Price => a.price.cmp(&b.price),
        ProductSort::CreatedAt => a.created_at.cmp(&b.created_at),
        ProductSort::Alphabet => return alphabet_rank(&a.title).cmp(&alphabet_rank(&b.title))
            .then_with(|| a.title.cmp(&b.title)).then_with(|| a.id.cmp(&b.id)),
        ProductSort::Suggestion { exact_article } => {
            let exact = |p: &Product| p.article_id.as_str() != exact_article.as_str();
            return exact(a).cmp(&exact(b))
                .then_with(|| b.discount.percent().cmp(&a.discount.percent()))
                .then_with(|| a.title.cmp(&b.title));
        }
    };
    let ord = if direction == SortDirection::Desc { ord.reverse() } else { ord };
    ord.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl CategoryStore for MemoryStore {
    async fn list_categories(&self, query: &CategoryQuery, page: Page) -> StorageResult<Paginated<CategoryWithCount>> {
        let s = self.state.read().await;
        let mut all: Vec<_> = s.categories.values().filter(|c| !query.only_active || c.is_active).map(|c| s.with_count(c)).collect();
        match query.order {
            CategoryOrder::Title => all.sort_by(|a, b| a.category.title.cmp(&b.category.title)),
            CategoryOrder::MostProducts => all.sort_by(|a, b| b.products_count.cmp(&a.products_count).then_with(|| a.category.id.cmp(&b.category.id))),
        }
        Ok(Paginated::slice(all, page))
    }

    async fn get_category(&self, id: i64) -> StorageResult<Option<CategoryWithCount>> {
        let s = self.state.read().await;
        Ok(s.categories.get(&id).map(|c| s.with_count(c)))
    }

    async fn find_category_by_slug(&self, slug: &str) -> StorageResult<Option<Category>> {
        Ok(self.state.read().await.categories.values().find(|c| c.slug.as_str() == slug).cloned())
    }

    async fn find_category_by_title(&self, title: &str) -> StorageResult<Option<Category>> {
        Ok(self.state.read().await.categories.values().find(|c| c.title == title).cloned())
    }

    async fn category_slug_exists(&self, slug: &Slug) -> StorageResult<bool> {
        Ok(self.state.read().await.categories.values().any(|c| &c.slug == slug))
    }

    async fn create_category(&self, draft: NewCategory) -> StorageResult<Category> {
        let mut s = self.state.write().await;
        s.check_category_slug(&draft.slug, None)?;
        let category = Category::create(s.next_id(), draft);
        s.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(&self, id: i64, patch: CategoryPatch) -> StorageResult<Category> {
        let mut s = self.state.write().await;
        if let Some(slug) = &patch.slug { s.check_category_slug(slug, Some(id))?; }
        let category = s.categories.get_mut(&id).ok_or(StorageError::NotFound("category"))?;
        category.apply(patch);
        Ok(category.clone())
    }

    async fn delete_category(&self, id: i64) -> StorageResult<bool> {
        let mut s = self.state.write().await;
        if s.categories.remove(&id).is_none() { return Ok(false); }
        for p in s.products.values_mut().filter(|p| p.category_id == Some(id)) { p.category_id = None; }
        Ok(true)
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn list_products(&self, query: &ProductQuery, page: Page) -> StorageResult<Paginated<ProductDetails>> {
        let s = self.state.read().await;
        let slug_category = match &query.category_slug {
            Some(slug) => match s.categories.values().find(|c| c.slug.as_str() == slug.as_str()) {
                Some(c) => Some(c.id),
                None => return Ok(Paginated::slice(Vec::new(), page)),
            },
            None => None,
        };
        let mut all: Vec<&Product> = s.products.values()
            .filter(|p| !query.only_active || p.is_active)
            .filter(|p| query.category_id.map_or(true, |id| p.category_id == Some(id)))
            .filter(|p| slug_category.map_or(true, |id| p.category_id == Some(id)))
            .filter(|p| query.min_price.map_or(true, |min| p.price.amount() >= min))
            .filter(|p| query.max_price.map_or(true, |max| p.price.amount() <= max))
            .filter(|p| matches_terms(&query.terms, &[p.title.as_str(), p.article_id.as_str(), p.slug.as_str()]))
            .collect();
        all.sort_by(|a, b| compare_products(&query.sort, query.direction, a, b));
        let details = all.into_iter().map(|p| s.details(p)).collect();
        Ok(Paginated::slice(details, page))
    }

    async fn get_product(&self, id: i64) -> StorageResult<Option<ProductDetails>> {
        let s = self.state.read().await;
        Ok(s.products.get(&id).map(|p| s.details(p)))
    }

    async fn get_products(&self, ids: &[i64]) -> StorageResult<Vec<Product>> {
        let s = self.state.read().await;
        Ok(ids.iter().filter_map(|id| s.products.get(id).cloned()).collect())
    }

    async fn find_product_by_article(&self, article: &ArticleCode) -> StorageResult<Option<Product>> {
        Ok(self.state.read().await.products.values().find(|p| &p.article_id == article).cloned())
    }

    async fn product_slug_exists(&self, slug: &Slug) -> StorageResult<bool> {
        Ok(self.state.read().await.products.values().any(|p| &p.slug == slug))
    }

    async fn create_product(&self, draft: NewProduct) -> StorageResult<Product> {
        let mut s = self.state.write().await;
        s.check_product_keys(&draft.slug, &draft.article_id, None)?;
        s.check_category_ref(draft.category_id)?;
        let product = Product::create(s.next_id(), draft);
        s.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: i64, patch: ProductPatch) -> StorageResult<Product> {
        let mut s = self.state.write().await;
        let mut product = s.products.get(&id).cloned().ok_or(StorageError::NotFound("product"))?;
        product.apply(patch);
        s.check_product_keys(&product.slug, &product.article_id, Some(id))?;
        s.check_category_ref(product.category_id)?;
        s.products.insert(id, product.clone());
        Ok(product)
    }

    async fn save_product(&self, product: &Product) -> StorageResult<()> {
        let mut s = self.state.write().await;
        if !s.products.contains_key(&product.id) { return Err(StorageError::NotFound("product")); }
        s.check_product_keys(&product.slug, &product.article_id, Some(product.id))?;
        s.check_category_ref(product.category_id)?;
        s.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn delete_products(&self, ids: &[i64]) -> StorageResult<u64> {
        let mut s = self.state.write().await;
        let removed = ids.iter().filter(|id| s.products.remove(*id).is_some()).count() as u64;
        s.reviews.retain(|_, r| !ids.contains(&r.product_id));
        Ok(removed)
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn create_review(&self, draft: NewReview) -> StorageResult<Review> {
        let mut s = self.state.write().await;
        if !s.products.contains_key(&draft.product_id) {
            return Err(StorageError::MissingReference { field: "product_id" });
        }
        let review = Review::create(s.next_id(), draft);
        s.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    async fn list_reviews(&self, product_id: i64) -> StorageResult<Vec<Review>> {
        let s = self.state.read().await;
        let mut reviews: Vec<_> = s.reviews.values().filter(|r| r.product_id == product_id).cloned().collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(reviews)
    }

    async fn delete_reviews(&self, ids: &[i64]) -> StorageResult<u64> {
        let mut s = self.state.write().await;
        Ok(ids.iter().filter(|id| s.reviews.remove(*id).is_some()).count() as u64)
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn list_news(&self, query: &NewsQuery, page: Page) -> StorageResult<Paginated<News>> {
        let s = self.state.read().await;
        let now = Utc::now();
        let mut all: Vec<News> = s.news.values()
            .filter(|n| !query.only_published || n.is_published(now))
            .filter(|n| query.tag.as_deref().map_or(true, |t| n.has_tag(t)))
            .filter(|n| {
                let excerpt = n.excerpt.clone().unwrap_or_default();
                let mut columns = vec![n.title.clone(), excerpt];
                if query.search_body {
                    columns.push(n.content.clone());
                    columns.extend(n.tags.iter().map(|t| t.text()));
                }
                let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                matches_terms(&query.terms, &refs)
            })
            .cloned()
            .collect();
        // NULL publish dates sort last, as in Postgres `DESC NULLS LAST`
        all.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| b.id.cmp(&a.id)));
        let (dated, undated): (Vec<_>, Vec<_>) = all.into_iter().partition(|n| n.published_at.is_some());
        Ok(Paginated::slice(dated.into_iter().chain(undated).collect(), page))
    }

    async fn get_news(&self, id: i64) -> StorageResult<Option<News>> {
        Ok(self.state.read().await.news.get(&id).cloned())
    }

    async fn find_news_by_slug(&self, slug: &str) -> StorageResult<Option<News>> {
        Ok(self.state.read().await.news.values().find(|n| n.slug.as_str() == slug).cloned())
    }

    async fn create_news(&self, draft: NewNews) -> StorageResult<News> {
        let mut s = self.state.write().await;
        s.check_news_slug(&draft.slug, None)?;
        let news = News::create(s.next_id(), draft);
        s.news.insert(news.id, news.clone());
        Ok(news)
    }

    async fn update_news(&self, id: i64, patch: NewsPatch) -> StorageResult<News> {
        let mut s = self.state.write().await;
        if let Some(slug) = &patch.slug { s.check_news_slug(slug, Some(id))?; }
        let news = s.news.get_mut(&id).ok_or(StorageError::NotFound("news"))?;
        news.apply(patch);
        Ok(news.clone())
    }

    async fn increment_news_views(&self, id: i64) -> StorageResult<Option<News>> {
        let mut s = self.state.write().await;
        Ok(s.news.get_mut(&id).map(|n| { n.views += 1; n.clone() }))
    }

    async fn delete_news(&self, ids: &[i64]) -> StorageResult<u64> {
        let mut s = self.state.write().await;
        Ok(ids.iter().filter(|id| s.news.remove(*id).is_some()).count() as u64)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, order: &Order) -> StorageResult<()> {
        let mut s = self.state.write().await;
        if s.orders.values().any(|o| o.number == order.number) { return Err(StorageError::Conflict { field: "number" }); }
        s.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StorageResult<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_number(&self, number: &str) -> StorageResult<Option<Order>> {
        Ok(self.state.read().await.orders.values().find(|o| o.number == number).cloned())
    }

    async fn save_order(&self, order: &Order) -> StorageResult<()> {
        let mut s = self.state.write().await;
        match s.orders.get_mut(&order.id) {
            Some(existing) => { *existing = order.clone(); Ok(()) }
            None => Err(StorageError::NotFound("order")),
        }
    }

    async fn list_orders(&self, query: &OrderQuery, page: Page) -> StorageResult<Paginated<Order>> {
        let s = self.state.read().await;
        let mut all: Vec<Order> = s.orders.values()
            .filter(|o| query.status.map_or(true, |st| o.status == st))
            .filter(|o| query.payment_method.map_or(true, |m| o.payment_method == m))
            .filter(|o| query.delivery_method.map_or(true, |m| o.delivery_method == m))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(Paginated::slice(all, page))
    }

    async fn count_orders(&self, status: OrderStatus) -> StorageResult<i64> {
        Ok(self.state.read().await.orders.values().filter(|o| o.status == status).count() as i64)
    }

    async fn delete_orders(&self, ids: &[Uuid]) -> StorageResult<u64> {
        let mut s = self.state.write().await;
        Ok(ids.iter().filter(|id| s.orders.remove(*id).is_some()).count() as u64)
    }
}
