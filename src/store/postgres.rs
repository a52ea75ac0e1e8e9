//! PostgreSQL storage implementation
//!
//! Schema lives in `migrations/`. Rows are mapped by hand so domain value
//! objects are validated on the way out of the database.

use super::*;
use crate::domain::aggregates::{Customer, DeliveryAddress, LineItem, NewsTag, PaymentInfo};
use crate::domain::value_objects::{Discount, Money, Rating};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;

const CATEGORY_COLUMNS: &str = "c.id, c.title, c.slug, c.description, c.image, c.is_active, c.created_at, c.updated_at";

const PRODUCT_SELECT: &str = "SELECT p.id, p.title, p.slug, p.article_id, p.category_id, p.price, p.discount, \
    p.characteristics, p.images, p.description, p.is_active, p.created_at, p.updated_at, \
    c.id AS c_id, c.title AS c_title, c.slug AS c_slug, c.description AS c_description, c.image AS c_image, \
    c.is_active AS c_is_active, c.created_at AS c_created_at, c.updated_at AS c_updated_at, \
    (SELECT AVG(r.rating)::float8 FROM reviews r WHERE r.product_id = p.id) AS rating_avg, \
    (SELECT COUNT(*) FROM reviews r WHERE r.product_id = p.id) AS reviews_count \
    FROM products p LEFT JOIN categories c ON c.id = p.category_id";

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Database(format!("failed to connect postgres: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        let constraint = db.constraint().unwrap_or_default();
        if db.is_unique_violation() {
            let field = match constraint {
                "products_article_id_key" => "article_id",
                "orders_number_key" => "number",
                _ => "slug",
            };
            return StorageError::Conflict { field };
        }
        if db.is_foreign_key_violation() {
            let field = if constraint.starts_with("reviews_") { "product_id" } else { "category_id" };
            return StorageError::MissingReference { field };
        }
    }
    StorageError::Database(e.to_string())
}

fn decode_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn slug_at(row: &PgRow, column: &str) -> Result<Slug, sqlx::Error> {
    Slug::new(row.try_get::<String, _>(column)?).map_err(decode_err)
}

fn category_from_row(row: &PgRow, prefix: &str) -> Result<Category, sqlx::Error> {
    let col = |name: &str| format!("{prefix}{name}");
    Ok(Category {
        id: row.try_get(col("id").as_str())?,
        title: row.try_get(col("title").as_str())?,
        slug: slug_at(row, &col("slug"))?,
        description: row.try_get(col("description").as_str())?,
        image: row.try_get(col("image").as_str())?,
        is_active: row.try_get(col("is_active").as_str())?,
        created_at: row.try_get(col("created_at").as_str())?,
        updated_at: row.try_get(col("updated_at").as_str())?,
    })
}

fn counted_category_from_row(row: &PgRow) -> Result<CategoryWithCount, sqlx::Error> {
    Ok(CategoryWithCount { category: category_from_row(row, "")?, products_count: row.try_get("products_count")? })
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    let discount: i16 = row.try_get("discount")?;
    Ok(Product {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        slug: slug_at(row, "slug")?,
        article_id: ArticleCode::new(row.try_get::<String, _>("article_id")?).map_err(decode_err)?,
        category_id: row.try_get("category_id")?,
        price: Money::new(row.try_get("price")?),
        discount: Discount::new(discount as i32).map_err(decode_err)?,
        description: row.try_get("description")?,
        characteristics: row.try_get::<Json<_>, _>("characteristics")?.0,
        images: row.try_get::<Json<Vec<String>>, _>("images")?.0,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn details_from_row(row: &PgRow) -> Result<ProductDetails, sqlx::Error> {
    let category = match row.try_get::<Option<i64>, _>("c_id")? {
        Some(_) => Some(category_from_row(row, "c_")?),
        None => None,
    };
    Ok(ProductDetails {
        product: product_from_row(row)?,
        category,
        rating_avg: row.try_get::<Option<f64>, _>("rating_avg")?.map(|v| (v * 10.0).round() / 10.0),
        reviews_count: row.try_get("reviews_count")?,
    })
}

fn review_from_row(row: &PgRow) -> Result<Review, sqlx::Error> {
    let rating: i16 = row.try_get("rating")?;
    Ok(Review {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        author_name: row.try_get("author_name")?,
        author_email: row.try_get("author_email")?,
        body: row.try_get("body")?,
        rating: Rating::new(rating as i32).map_err(decode_err)?,
        created_at: row.try_get("created_at")?,
    })
}

fn news_from_row(row: &PgRow) -> Result<News, sqlx::Error> {
    Ok(News {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        slug: slug_at(row, "slug")?,
        excerpt: row.try_get("excerpt")?,
        content: row.try_get("content")?,
        image: row.try_get("image")?,
        tags: row.try_get::<Json<Vec<NewsTag>>, _>("tags")?.0,
        views: row.try_get("views")?,
        is_active: row.try_get("is_active")?,
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, sqlx::Error> {
    let items_count: i32 = row.try_get("items_count")?;
    Ok(Order {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        customer: Customer {
            first_name: row.try_get("customer_first_name")?,
            last_name: row.try_get("customer_last_name")?,
            phone: row.try_get("customer_phone")?,
            email: row.try_get("customer_email")?,
        },
        products: row.try_get::<Json<Vec<LineItem>>, _>("products")?.0,
        items_count: items_count.max(0) as u32,
        total_price: Money::new(row.try_get("total_price")?),
        status: row.try_get::<String, _>("status")?.parse::<OrderStatus>().map_err(decode_err)?,
        payment_method: row.try_get::<String, _>("payment_method")?.parse::<PaymentMethod>().map_err(decode_err)?,
        delivery_method: row.try_get::<String, _>("delivery_method")?.parse::<DeliveryMethod>().map_err(decode_err)?,
        delivery: DeliveryAddress {
            is_private_house: row.try_get("delivery_is_private_house")?,
            city: row.try_get("delivery_city")?,
            street: row.try_get("delivery_street")?,
            house: row.try_get("delivery_house")?,
            apartment: row.try_get("delivery_apartment")?,
            entrance: row.try_get("delivery_entrance")?,
            comment: row.try_get("delivery_comment")?,
        },
        comment: row.try_get("comment")?,
        agreement: row.try_get("agreement")?,
        payment: PaymentInfo {
            payment_id: row.try_get("payment_id")?,
            payment_status: row.try_get("payment_status")?,
            payment_url: row.try_get("payment_url")?,
            payment_data: row.try_get::<Option<Json<serde_json::Value>>, _>("payment_data")?.map(|j| j.0),
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        events: Vec::new(),
    })
}

fn map_rows<T>(rows: &[PgRow], f: fn(&PgRow) -> Result<T, sqlx::Error>) -> StorageResult<Vec<T>> {
    rows.iter().map(f).collect::<Result<_, _>>().map_err(db_err)
}

fn like(term: &str) -> String { format!("%{}%", escape_like(term)) }

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: Page) {
    qb.push(" LIMIT ").push_bind(page.limit()).push(" OFFSET ").push_bind(page.offset());
}

fn push_product_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &ProductQuery) {
    qb.push(" WHERE TRUE");
    if q.only_active { qb.push(" AND p.is_active"); }
    if let Some(id) = q.category_id { qb.push(" AND p.category_id = ").push_bind(id); }
    if let Some(slug) = &q.category_slug {
        // unknown slug yields NULL and therefore no rows
        qb.push(" AND p.category_id = (SELECT id FROM categories WHERE slug = ").push_bind(slug.clone()).push(")");
    }
    if let Some(min) = q.min_price { qb.push(" AND p.price >= ").push_bind(min); }
    if let Some(max) = q.max_price { qb.push(" AND p.price <= ").push_bind(max); }
    for term in &q.terms {
        let pattern = like(term);
        qb.push(" AND (p.title ILIKE ").push_bind(pattern.clone())
            .push(" OR p.article_id ILIKE ").push_bind(pattern.clone())
            .push(" OR p.slug ILIKE ").push_bind(pattern)
            .push(")");
    }
}

fn push_product_order(qb: &mut QueryBuilder<'_, Postgres>, q: &ProductQuery) {
    let dir = if q.direction == SortDirection::Desc { "DESC" } else { "ASC" };
    match &q.sort {
        ProductSort::Title => { qb.push(format!(" ORDER BY p.title {dir}, p.id")); }
        ProductSort::Price => { qb.push(format!(" ORDER BY p.price {dir}, p.id")); }
        ProductSort::CreatedAt => { qb.push(format!(" ORDER BY p.created_at {dir}, p.id")); }
        ProductSort::Alphabet => {
            qb.push(" ORDER BY CASE WHEN p.title ~ '^[А-Яа-яЁё]' THEN 1 WHEN p.title ~ '^[A-Za-z]' THEN 2 \
                WHEN p.title ~ '^[0-9]' THEN 3 ELSE 4 END, p.title, p.id");
        }
        ProductSort::Suggestion { exact_article } => {
            qb.push(" ORDER BY CASE WHEN p.article_id = ").push_bind(exact_article.clone())
                .push(" THEN 0 ELSE 1 END, p.discount DESC, p.title, p.id");
        }
    }
}

/// Label of a `news.tags` element `t`, as `NewsTag::text` computes it.
const TAG_TEXT: &str = "CASE WHEN jsonb_typeof(t) = 'string' THEN t #>> '{}' \
    ELSE COALESCE(t->>'label', t->>'name', t->>'value', 'Тег') END";

fn push_news_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &NewsQuery) {
    qb.push(" WHERE TRUE");
    if q.only_published {
        qb.push(" AND n.is_active AND n.published_at IS NOT NULL AND n.published_at <= NOW()");
    }
    if let Some(tag) = &q.tag {
        qb.push(" AND EXISTS (SELECT 1 FROM jsonb_array_elements(n.tags) t WHERE ")
            .push(TAG_TEXT).push(" = ").push_bind(tag.clone()).push(")");
    }
    for term in &q.terms {
        let pattern = like(term);
        qb.push(" AND (n.title ILIKE ").push_bind(pattern.clone())
            .push(" OR n.excerpt ILIKE ").push_bind(pattern.clone());
        if q.search_body {
            qb.push(" OR n.content ILIKE ").push_bind(pattern.clone())
                .push(" OR n.tags::text ILIKE ").push_bind(pattern);
        }
        qb.push(")");
    }
}

fn push_order_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &OrderQuery) {
    qb.push(" WHERE TRUE");
    if let Some(status) = q.status { qb.push(" AND status = ").push_bind(status.as_str()); }
    if let Some(m) = q.payment_method { qb.push(" AND payment_method = ").push_bind(m.as_str()); }
    if let Some(m) = q.delivery_method { qb.push(" AND delivery_method = ").push_bind(m.as_str()); }
}

impl PgStore {
    async fn count(&self, mut qb: QueryBuilder<'_, Postgres>) -> StorageResult<i64> {
        qb.build_query_scalar::<i64>().fetch_one(&self.pool).await.map_err(db_err)
    }

    async fn fetch(&self, mut qb: QueryBuilder<'_, Postgres>) -> StorageResult<Vec<PgRow>> {
        qb.build().fetch_all(&self.pool).await.map_err(db_err)
    }

    async fn write_product(&self, p: &Product) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE products SET title = $2, slug = $3, article_id = $4, category_id = $5, price = $6, discount = $7, \
             characteristics = $8, images = $9, description = $10, is_active = $11, updated_at = $12 WHERE id = $1",
        )
        .bind(p.id)
        .bind(&p.title)
        .bind(p.slug.as_str())
        .bind(p.article_id.as_str())
        .bind(p.category_id)
        .bind(p.price.amount())
        .bind(p.discount.percent() as i16)
        .bind(Json(&p.characteristics))
        .bind(Json(&p.images))
        .bind(&p.description)
        .bind(p.is_active)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 { return Err(StorageError::NotFound("product")); }
        Ok(())
    }
}

#[async_trait]
impl CategoryStore for PgStore {
    async fn list_categories(&self, query: &CategoryQuery, page: Page) -> StorageResult<Paginated<CategoryWithCount>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM categories c");
        let mut qb = QueryBuilder::new(format!(
            "SELECT {CATEGORY_COLUMNS}, (SELECT COUNT(*) FROM products p WHERE p.category_id = c.id) AS products_count FROM categories c"
        ));
        if query.only_active {
            count.push(" WHERE c.is_active");
            qb.push(" WHERE c.is_active");
        }
        qb.push(match query.order {
            CategoryOrder::Title => " ORDER BY c.title, c.id",
            CategoryOrder::MostProducts => " ORDER BY products_count DESC, c.id",
        });
        push_page(&mut qb, page);

        let total = self.count(count).await?;
        let rows = self.fetch(qb).await?;
        let items = map_rows(&rows, counted_category_from_row)?;
        Ok(Paginated { items, total, page: page.page, per_page: page.per_page })
    }

    async fn get_category(&self, id: i64) -> StorageResult<Option<CategoryWithCount>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS}, (SELECT COUNT(*) FROM products p WHERE p.category_id = c.id) AS products_count \
             FROM categories c WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| counted_category_from_row(&r)).transpose().map_err(db_err)
    }

    async fn find_category_by_slug(&self, slug: &str) -> StorageResult<Option<Category>> {
        let row = sqlx::query(&format!("SELECT {CATEGORY_COLUMNS} FROM categories c WHERE c.slug = $1"))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| category_from_row(&r, "")).transpose().map_err(db_err)
    }

    async fn find_category_by_title(&self, title: &str) -> StorageResult<Option<Category>> {
        let row = sqlx::query(&format!("SELECT {CATEGORY_COLUMNS} FROM categories c WHERE c.title = $1 ORDER BY c.id LIMIT 1"))
            .bind(title)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| category_from_row(&r, "")).transpose().map_err(db_err)
    }

    async fn category_slug_exists(&self, slug: &Slug) -> StorageResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE slug = $1)")
            .bind(slug.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn create_category(&self, draft: NewCategory) -> StorageResult<Category> {
        let row = sqlx::query(
            "INSERT INTO categories (title, slug, description, image, is_active) VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(&draft.title)
        .bind(draft.slug.as_str())
        .bind(&draft.description)
        .bind(&draft.image)
        .bind(draft.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        category_from_row(&row, "").map_err(db_err)
    }

    async fn update_category(&self, id: i64, patch: CategoryPatch) -> StorageResult<Category> {
        let mut category = self.get_category(id).await?.ok_or(StorageError::NotFound("category"))?.category;
        category.apply(patch);
        sqlx::query(
            "UPDATE categories SET title = $2, slug = $3, description = $4, image = $5, is_active = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(id)
        .bind(&category.title)
        .bind(category.slug.as_str())
        .bind(&category.description)
        .bind(&category.image)
        .bind(category.is_active)
        .bind(category.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(category)
    }

    async fn delete_category(&self, id: i64) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn list_products(&self, query: &ProductQuery, page: Page) -> StorageResult<Paginated<ProductDetails>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM products p");
        push_product_filters(&mut count, query);

        let mut qb = QueryBuilder::new(PRODUCT_SELECT);
        push_product_filters(&mut qb, query);
        push_product_order(&mut qb, query);
        push_page(&mut qb, page);

        let total = self.count(count).await?;
        let rows = self.fetch(qb).await?;
        let items = map_rows(&rows, details_from_row)?;
        Ok(Paginated { items, total, page: page.page, per_page: page.per_page })
    }

    async fn get_product(&self, id: i64) -> StorageResult<Option<ProductDetails>> {
        let row = sqlx::query(&format!("{PRODUCT_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| details_from_row(&r)).transpose().map_err(db_err)
    }

    async fn get_products(&self, ids: &[i64]) -> StorageResult<Vec<Product>> {
        let rows = sqlx::query("SELECT * FROM products WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut products = map_rows(&rows, product_from_row)?;
        // keep the caller's order
        products.sort_by_key(|p| ids.iter().position(|id| *id == p.id));
        Ok(products)
    }

    async fn find_product_by_article(&self, article: &ArticleCode) -> StorageResult<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE article_id = $1")
            .bind(article.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| product_from_row(&r)).transpose().map_err(db_err)
    }

    async fn product_slug_exists(&self, slug: &Slug) -> StorageResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE slug = $1)")
            .bind(slug.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn create_product(&self, draft: NewProduct) -> StorageResult<Product> {
        let row = sqlx::query(
            "INSERT INTO products (title, slug, article_id, category_id, price, discount, characteristics, images, description, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
        )
        .bind(&draft.title)
        .bind(draft.slug.as_str())
        .bind(draft.article_id.as_str())
        .bind(draft.category_id)
        .bind(draft.price.amount())
        .bind(draft.discount.percent() as i16)
        .bind(Json(&draft.characteristics))
        .bind(Json(&draft.images))
        .bind(&draft.description)
        .bind(draft.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        product_from_row(&row).map_err(db_err)
    }

    async fn update_product(&self, id: i64, patch: ProductPatch) -> StorageResult<Product> {
        let mut product = self.get_products(&[id]).await?.pop().ok_or(StorageError::NotFound("product"))?;
        product.apply(patch);
        self.write_product(&product).await?;
        Ok(product)
    }

    async fn save_product(&self, product: &Product) -> StorageResult<()> {
        self.write_product(product).await
    }

    async fn delete_products(&self, ids: &[i64]) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM products WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn create_review(&self, draft: NewReview) -> StorageResult<Review> {
        let row = sqlx::query(
            "INSERT INTO reviews (product_id, author_name, author_email, body, rating) VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(draft.product_id)
        .bind(&draft.author_name)
        .bind(&draft.author_email)
        .bind(&draft.body)
        .bind(draft.rating.value() as i16)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        review_from_row(&row).map_err(db_err)
    }

    async fn list_reviews(&self, product_id: i64) -> StorageResult<Vec<Review>> {
        let rows = sqlx::query("SELECT * FROM reviews WHERE product_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        map_rows(&rows, review_from_row)
    }

    async fn delete_reviews(&self, ids: &[i64]) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NewsStore for PgStore {
    async fn list_news(&self, query: &NewsQuery, page: Page) -> StorageResult<Paginated<News>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM news n");
        push_news_filters(&mut count, query);

        let mut qb = QueryBuilder::new("SELECT n.* FROM news n");
        push_news_filters(&mut qb, query);
        qb.push(" ORDER BY n.published_at DESC NULLS LAST, n.id DESC");
        push_page(&mut qb, page);

        let total = self.count(count).await?;
        let rows = self.fetch(qb).await?;
        Ok(Paginated { items: map_rows(&rows, news_from_row)?, total, page: page.page, per_page: page.per_page })
    }

    async fn get_news(&self, id: i64) -> StorageResult<Option<News>> {
        let row = sqlx::query("SELECT * FROM news WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| news_from_row(&r)).transpose().map_err(db_err)
    }

    async fn find_news_by_slug(&self, slug: &str) -> StorageResult<Option<News>> {
        let row = sqlx::query("SELECT * FROM news WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| news_from_row(&r)).transpose().map_err(db_err)
    }

    async fn create_news(&self, draft: NewNews) -> StorageResult<News> {
        let row = sqlx::query(
            "INSERT INTO news (title, slug, excerpt, content, image, tags, is_active, published_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(&draft.title)
        .bind(draft.slug.as_str())
        .bind(&draft.excerpt)
        .bind(&draft.content)
        .bind(&draft.image)
        .bind(Json(&draft.tags))
        .bind(draft.is_active)
        .bind(draft.published_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        news_from_row(&row).map_err(db_err)
    }

    async fn update_news(&self, id: i64, patch: NewsPatch) -> StorageResult<News> {
        let mut news = self.get_news(id).await?.ok_or(StorageError::NotFound("news"))?;
        news.apply(patch);
        sqlx::query(
            "UPDATE news SET title = $2, slug = $3, excerpt = $4, content = $5, image = $6, tags = $7, is_active = $8, \
             published_at = $9, updated_at = $10 WHERE id = $1",
        )
        .bind(id)
        .bind(&news.title)
        .bind(news.slug.as_str())
        .bind(&news.excerpt)
        .bind(&news.content)
        .bind(&news.image)
        .bind(Json(&news.tags))
        .bind(news.is_active)
        .bind(news.published_at)
        .bind(news.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(news)
    }

    async fn increment_news_views(&self, id: i64) -> StorageResult<Option<News>> {
        let row = sqlx::query("UPDATE news SET views = views + 1 WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| news_from_row(&r)).transpose().map_err(db_err)
    }

    async fn delete_news(&self, ids: &[i64]) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM news WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create_order(&self, o: &Order) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO orders (id, number, customer_first_name, customer_last_name, customer_phone, customer_email, \
             products, items_count, total_price, status, payment_method, payment_id, payment_status, payment_url, payment_data, \
             delivery_method, delivery_is_private_house, delivery_city, delivery_street, delivery_house, delivery_apartment, \
             delivery_entrance, delivery_comment, comment, agreement, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, \
             $24, $25, $26, $27)",
        )
        .bind(o.id)
        .bind(&o.number)
        .bind(&o.customer.first_name)
        .bind(&o.customer.last_name)
        .bind(&o.customer.phone)
        .bind(&o.customer.email)
        .bind(Json(&o.products))
        .bind(o.items_count as i32)
        .bind(o.total_price.amount())
        .bind(o.status.as_str())
        .bind(o.payment_method.as_str())
        .bind(&o.payment.payment_id)
        .bind(&o.payment.payment_status)
        .bind(&o.payment.payment_url)
        .bind(o.payment.payment_data.as_ref().map(Json))
        .bind(o.delivery_method.as_str())
        .bind(o.delivery.is_private_house)
        .bind(&o.delivery.city)
        .bind(&o.delivery.street)
        .bind(&o.delivery.house)
        .bind(&o.delivery.apartment)
        .bind(&o.delivery.entrance)
        .bind(&o.delivery.comment)
        .bind(&o.comment)
        .bind(o.agreement)
        .bind(o.created_at)
        .bind(o.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StorageResult<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| order_from_row(&r)).transpose().map_err(db_err)
    }

    async fn find_order_by_number(&self, number: &str) -> StorageResult<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE number = $1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| order_from_row(&r)).transpose().map_err(db_err)
    }

    async fn save_order(&self, o: &Order) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2, payment_id = $3, payment_status = $4, payment_url = $5, payment_data = $6, \
             comment = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(o.id)
        .bind(o.status.as_str())
        .bind(&o.payment.payment_id)
        .bind(&o.payment.payment_status)
        .bind(&o.payment.payment_url)
        .bind(o.payment.payment_data.as_ref().map(Json))
        .bind(&o.comment)
        .bind(o.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 { return Err(StorageError::NotFound("order")); }
        Ok(())
    }

    async fn list_orders(&self, query: &OrderQuery, page: Page) -> StorageResult<Paginated<Order>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        push_order_filters(&mut count, query);

        let mut qb = QueryBuilder::new("SELECT * FROM orders");
        push_order_filters(&mut qb, query);
        qb.push(" ORDER BY created_at DESC, id DESC");
        push_page(&mut qb, page);

        let total = self.count(count).await?;
        let rows = self.fetch(qb).await?;
        Ok(Paginated { items: map_rows(&rows, order_from_row)?, total, page: page.page, per_page: page.per_page })
    }

    async fn count_orders(&self, status: OrderStatus) -> StorageResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn delete_orders(&self, ids: &[Uuid]) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
