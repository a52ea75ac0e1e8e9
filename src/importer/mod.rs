//! Inventory import from accounting report exports
//!
//! The report is a delimited text export: five header rows, then category
//! rows (name only) each followed by the product rows that belong to it.
//! Columns are code, name, stock, purchase price, retail price and warehouse
//! value. Rows are applied one by one; the first failure aborts the run.

use std::borrow::Cow;

use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::domain::aggregates::{Category, Characteristics, NewCategory, NewProduct};
use crate::domain::events::{CatalogEvent, DomainEvent};
use crate::domain::value_objects::{ArticleCode, Discount, Money, Slug};
use crate::store::{StorageError, Store};

const HEADER_ROWS: usize = 5;
const DELIMITERS: [u8; 3] = [b';', b'\t', b','];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("cannot decode file: {0}")]
    Decode(String),

    #[error("malformed file: {0}")]
    Malformed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<csv::Error> for ImportError {
    fn from(e: csv::Error) -> Self { ImportError::Malformed(e.to_string()) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub categories_created: u32,
    pub products_created: u32,
    pub products_updated: u32,
}

impl ImportReport {
    pub fn event(&self) -> DomainEvent {
        DomainEvent::Catalog(CatalogEvent::Imported {
            categories_created: self.categories_created,
            products_created: self.products_created,
            products_updated: self.products_updated,
        })
    }
}

/// Admin-facing summary of an import run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportNotification {
    pub title: String,
    pub body: String,
    pub success: bool,
}

impl ImportNotification {
    pub fn from_result(result: &Result<ImportReport, ImportError>) -> Self {
        match result {
            Ok(r) => Self {
                title: "Импорт завершён".into(),
                body: format!(
                    "Создано категорий: {}\nСоздано товаров: {}\nОбновлено товаров: {}",
                    r.categories_created, r.products_created, r.products_updated
                ),
                success: true,
            },
            Err(e) => Self { title: "Импорт не выполнен".into(), body: e.to_string(), success: false },
        }
    }
}

/// Decodes the raw export: UTF-8 or UTF-16 by BOM, then plain UTF-8, then Windows-1251.
pub fn decode(bytes: &[u8]) -> Result<Cow<'_, str>, ImportError> {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        return encoding
            .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
            .ok_or_else(|| ImportError::Decode(format!("invalid {} content", encoding.name())));
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(Cow::Borrowed(text));
    }
    let (text, _) = encoding_rs::WINDOWS_1251.decode_without_bom_handling(bytes);
    Ok(text)
}

/// Picks the most frequent candidate delimiter in the first rows.
pub fn sniff_delimiter(text: &str) -> u8 {
    let head: Vec<&str> = text.lines().take(HEADER_ROWS + 5).collect();
    let mut best = (DELIMITERS[0], 0usize);
    for d in DELIMITERS {
        let count: usize = head.iter().map(|l| l.bytes().filter(|b| *b == d).count()).sum();
        if count > best.1 { best = (d, count); }
    }
    best.0
}

/// Parses report numbers like `1 234,50 руб.`; anything non-numeric is `None`.
pub fn parse_number(value: &str) -> Option<Decimal> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace() && *c != '\u{A0}').collect();
    let lowered = compact.to_lowercase();
    let stripped = lowered.replace("руб.", "").replace("руб", "").replace(',', ".");
    if stripped.is_empty() { return None; }
    stripped.parse::<Decimal>().ok().or_else(|| Decimal::from_scientific(&stripped).ok())
}

#[derive(Debug, PartialEq)]
enum Row {
    Category { code: String, name: String },
    Product(ProductRow),
    Skip,
}

#[derive(Debug, PartialEq)]
struct ProductRow {
    code: String,
    name: String,
    stock: Option<Decimal>,
    purchase_price: Option<Decimal>,
    retail_price: Option<Decimal>,
    warehouse_value: Option<Decimal>,
}

fn classify(record: &csv::StringRecord) -> Row {
    let cell = |i: usize| record.get(i).map(str::trim).unwrap_or_default();
    let number = |i: usize| parse_number(cell(i));
    let (code, name) = (cell(0).to_string(), cell(1).to_string());
    let (stock, purchase_price, retail_price, warehouse_value) = (number(2), number(3), number(4), number(5));

    if !name.is_empty() && stock.is_none() && purchase_price.is_none() && retail_price.is_none() {
        return Row::Category { code, name };
    }
    if code.is_empty() || name.is_empty() { return Row::Skip; }
    Row::Product(ProductRow { code, name, stock, purchase_price, retail_price, warehouse_value })
}

fn json_number(value: Decimal) -> Value {
    serde_json::Number::from_f64(value.to_f64().unwrap_or_default()).map(Value::Number).unwrap_or(Value::Null)
}

fn random_token(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(|b| (b as char).to_ascii_lowercase()).collect()
}

#[derive(Clone, Copy)]
enum SlugScope { Category, Product }

/// Slug from `name`, else from `fallback`, suffixed `-1`, `-2`, ... until free.
async fn unique_slug(store: &dyn Store, scope: SlugScope, name: &str, fallback: &str) -> Result<Slug, ImportError> {
    let base = Slug::from_title(name)
        .or_else(|| Slug::from_title(fallback))
        .or_else(|| Slug::new(format!("item-{}", random_token(6))).ok())
        .ok_or_else(|| ImportError::Malformed(format!("cannot build slug for {name:?}")))?;
    let mut candidate = base.clone();
    let mut counter = 1;
    loop {
        let taken = match scope {
            SlugScope::Category => store.category_slug_exists(&candidate).await?,
            SlugScope::Product => store.product_slug_exists(&candidate).await?,
        };
        if !taken { return Ok(candidate); }
        candidate = base.with_suffix(counter);
        counter += 1;
    }
}

/// Applies a decoded report to the catalog.
pub struct Importer<'a> {
    store: &'a dyn Store,
    report: ImportReport,
    current_category: Option<Category>,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store, report: ImportReport::default(), current_category: None }
    }

    pub async fn run(mut self, bytes: &[u8]) -> Result<ImportReport, ImportError> {
        let text = decode(bytes)?;
        if text.trim().is_empty() { return Err(ImportError::Malformed("file is empty".into())); }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(sniff_delimiter(&text))
            .from_reader(text.as_bytes());

        for (index, record) in reader.records().enumerate() {
            let record = record?;
            // blank lines are not yielded, so count by source position
            let line = record.position().map_or(index + 1, |p| p.line() as usize);
            if line <= HEADER_ROWS { continue; }
            match classify(&record) {
                Row::Category { code, name } => self.enter_category(&code, &name).await?,
                Row::Product(row) => self.upsert_product(line, row).await?,
                Row::Skip => {}
            }
        }

        tracing::info!(
            categories_created = self.report.categories_created,
            products_created = self.report.products_created,
            products_updated = self.report.products_updated,
            "inventory import finished"
        );
        Ok(self.report)
    }

    async fn enter_category(&mut self, code: &str, name: &str) -> Result<(), ImportError> {
        let category = match self.store.find_category_by_title(name).await? {
            Some(existing) => existing,
            None => {
                let fallback = if code.is_empty() { random_token(4) } else { code.to_string() };
                let slug = unique_slug(self.store, SlugScope::Category, name, &fallback).await?;
                let created = self.store.create_category(NewCategory {
                    title: name.to_string(), slug, description: None, image: None, is_active: true,
                }).await?;
                self.report.categories_created += 1;
                created
            }
        };
        self.current_category = Some(category);
        Ok(())
    }

    async fn upsert_product(&mut self, line: usize, row: ProductRow) -> Result<(), ImportError> {
        let Some(category_id) = self.current_category.as_ref().map(|c| c.id) else {
            tracing::debug!(line, "product row before any category, skipped");
            return Ok(());
        };
        let article = ArticleCode::new(row.code.as_str())
            .map_err(|e| ImportError::Malformed(format!("row {line}: {e}")))?;

        let mut characteristics = Characteristics::new();
        if let Some(v) = row.stock { characteristics.insert("stock".into(), json_number(v)); }
        if let Some(v) = row.purchase_price { characteristics.insert("purchase_price".into(), json_number(v)); }
        if let Some(v) = row.warehouse_value { characteristics.insert("warehouse_value".into(), json_number(v)); }
        let price = row.retail_price.filter(|p| !p.is_sign_negative()).map(Money::new).filter(Money::fits_column);

        match self.store.find_product_by_article(&article).await? {
            Some(mut product) => {
                product.category_id = Some(category_id);
                if let Some(price) = price { product.price = price; }
                product.merge_characteristics(characteristics);
                self.store.save_product(&product).await?;
                self.report.products_updated += 1;
            }
            None => {
                let slug = unique_slug(self.store, SlugScope::Product, &row.name, &row.code).await?;
                self.store.create_product(NewProduct {
                    title: row.name, slug, article_id: article, category_id: Some(category_id),
                    price: price.unwrap_or_else(Money::zero), discount: Discount::default(),
                    description: Some(String::new()), characteristics, images: Vec::new(), is_active: true,
                }).await?;
                self.report.products_created += 1;
            }
        }
        Ok(())
    }
}

pub async fn import(store: &dyn Store, bytes: &[u8]) -> Result<ImportReport, ImportError> {
    Importer::new(store).run(bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ProductStore};

    const HEADER: &str = "Отчёт по складу\n\nПериод\n\nКод;Наименование;Остаток;Закупка;Розница;Сумма\n";

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1 234,50 руб."), Some(Decimal::new(123_450, 2)));
        assert_eq!(parse_number("1\u{A0}000"), Some(Decimal::from(1000)));
        assert_eq!(parse_number("12 РУБ"), Some(Decimal::from(12)));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("шт"), None);
    }

    #[test]
    fn test_decode_encodings() {
        assert_eq!(decode("\u{FEFF}Кран".as_bytes()).unwrap(), "Кран");
        assert_eq!(decode("Кран".as_bytes()).unwrap(), "Кран");

        let mut utf16 = vec![0xFF, 0xFE];
        utf16.extend("Кран".encode_utf16().flat_map(u16::to_le_bytes));
        assert_eq!(decode(&utf16).unwrap(), "Кран");

        let (cp1251, _, _) = encoding_rs::WINDOWS_1251.encode("Смесители");
        assert_eq!(decode(&cp1251).unwrap(), "Смесители");
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a\tb\tc\n1,5\t2\t3"), b'\t');
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("plain"), b';');
    }

    #[test]
    fn test_classify_rows() {
        let rec = |cells: &[&str]| csv::StringRecord::from(cells.to_vec());
        assert_eq!(classify(&rec(&["", "Смесители"])), Row::Category { code: "".into(), name: "Смесители".into() });
        assert_eq!(classify(&rec(&["", "", "", "", "", ""])), Row::Skip);
        assert_eq!(classify(&rec(&["", "Итого", "5", "", "", ""])), Row::Skip);
        assert!(matches!(classify(&rec(&["A-1", "Кран", "3", "100", "150", "300"])), Row::Product(_)));
    }

    #[tokio::test]
    async fn test_import_creates_then_updates() {
        let store = MemoryStore::new();
        let first = format!("{HEADER}K1;Смесители;;;;\nA-1;Смеситель Grohe;3;100;150,50;300\nA-2;Смеситель;1;;200;\n");
        let report = import(&store, first.as_bytes()).await.unwrap();
        assert_eq!(report, ImportReport { categories_created: 1, products_created: 2, products_updated: 0 });

        let a1 = store.find_product_by_article(&ArticleCode::new("A-1").unwrap()).await.unwrap().unwrap();
        assert_eq!(a1.slug.as_str(), "smesitel-grohe");
        assert_eq!(a1.price.amount(), Decimal::new(15_050, 2));
        assert_eq!(a1.characteristics.get("stock"), Some(&Value::from(3.0)));
        assert!(a1.is_active);

        let second = format!("{HEADER}K1;Смесители;;;;\nA-1;Другое имя;7;;;\nA-3;Смеситель;2;;90;\n");
        let report = import(&store, second.as_bytes()).await.unwrap();
        assert_eq!(report, ImportReport { categories_created: 0, products_created: 1, products_updated: 1 });

        let a1 = store.find_product_by_article(&ArticleCode::new("A-1").unwrap()).await.unwrap().unwrap();
        assert_eq!(a1.title, "Смеситель Grohe");
        assert_eq!(a1.price.amount(), Decimal::new(15_050, 2));
        assert_eq!(a1.characteristics.get("stock"), Some(&Value::from(7.0)));
        assert_eq!(a1.characteristics.get("purchase_price"), Some(&Value::from(100.0)));

        // same title as A-2, so the slug gets a suffix
        let a3 = store.find_product_by_article(&ArticleCode::new("A-3").unwrap()).await.unwrap().unwrap();
        assert_eq!(a3.slug.as_str(), "smesitel-1");
    }

    #[tokio::test]
    async fn test_products_before_category_are_skipped() {
        let store = MemoryStore::new();
        let text = format!("{HEADER}A-1;Кран;1;2;3;4\n");
        let report = import(&store, text.as_bytes()).await.unwrap();
        assert_eq!(report, ImportReport::default());
    }

    #[tokio::test]
    async fn test_empty_file_fails_with_notification() {
        let store = MemoryStore::new();
        let result = import(&store, b"   ").await;
        let note = ImportNotification::from_result(&result);
        assert!(!note.success);
        assert_eq!(note.title, "Импорт не выполнен");
    }
}
