//! Value Objects for the storefront

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money value object, always kept at two decimal places
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self { Self(round2(amount)) }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn add(&self, other: Money) -> Money { Money::new(self.0 + other.0) }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.0 * Decimal::from(qty)) }

    /// Price after a percentage discount.
    pub fn discounted(&self, discount: Discount) -> Money {
        Money::new(self.0 * Decimal::from(100 - discount.percent()) / Decimal::from(100))
    }

    /// Amount in kopecks, as payment gateways expect it.
    pub fn to_minor_units(&self) -> i64 {
        (self.0 * Decimal::from(100)).trunc().to_i64().unwrap_or(0)
    }

    pub fn to_f64(&self) -> f64 { self.0.to_f64().unwrap_or(0.0) }

    /// Largest amount a `NUMERIC(10,2)` column holds.
    pub fn max_stored() -> Money { Money(Decimal::new(99_999_999_99, 2)) }

    pub fn fits_column(&self) -> bool { self.0.abs() <= Self::max_stored().0 }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self { Money::new(value) }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self { iter.fold(Money::zero(), |acc, m| acc.add(m)) }
}

/// Formats as `1 234.50 ₽`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!("{:.2}", self.0);
        let (int_part, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));
        let (sign, digits) = match int_part.strip_prefix('-') { Some(d) => ("-", d), None => ("", int_part) };
        let mut grouped = String::new();
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 { grouped.push(' '); }
            grouped.push(ch);
        }
        write!(f, "{sign}{grouped}.{frac} ₽")
    }
}

pub fn round2(value: Decimal) -> Decimal { value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero) }

/// URL slug: lowercase ASCII letters, digits and dashes
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    pub fn new(value: impl Into<String>) -> Result<Self, SlugError> {
        let value = value.into().trim().to_lowercase();
        if value.is_empty() { return Err(SlugError::Empty); }
        if value.len() > 255 { return Err(SlugError::TooLong); }
        if !value.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(SlugError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    /// Builds a slug from free text, transliterating Cyrillic.
    /// Returns `None` when nothing usable is left.
    pub fn from_title(title: &str) -> Option<Self> {
        let mut out = String::new();
        for ch in title.chars().flat_map(char::to_lowercase) {
            if ch.is_ascii_alphanumeric() {
                out.push(ch);
            } else if let Some(latin) = transliterate(ch) {
                out.push_str(latin);
            } else if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
        }
        let trimmed: String = out.trim_matches('-').chars().take(255).collect();
        Slug::new(trimmed.trim_end_matches('-')).ok()
    }

    /// `base-n` variant used to resolve collisions.
    pub fn with_suffix(&self, n: u32) -> Slug { Slug(format!("{}-{}", self.0, n)) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for Slug {
    type Error = SlugError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Slug::new(value) }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self { slug.0 }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

fn transliterate(ch: char) -> Option<&'static str> {
    Some(match ch {
        'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d", 'е' => "e", 'ё' => "yo",
        'ж' => "zh", 'з' => "z", 'и' => "i", 'й' => "y", 'к' => "k", 'л' => "l", 'м' => "m",
        'н' => "n", 'о' => "o", 'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t", 'у' => "u",
        'ф' => "f", 'х' => "h", 'ц' => "c", 'ч' => "ch", 'ш' => "sh", 'щ' => "shh", 'ъ' => "",
        'ы' => "y", 'ь' => "", 'э' => "e", 'ю' => "yu", 'я' => "ya",
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlugError {
    #[error("slug is empty")]
    Empty,
    #[error("slug is longer than 255 characters")]
    TooLong,
    #[error("slug may only contain lowercase latin letters, digits and dashes")]
    InvalidCharacter,
}

/// Merchant article code (SKU), the natural key for imported products
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArticleCode(String);

impl ArticleCode {
    pub fn new(value: impl Into<String>) -> Result<Self, ArticleCodeError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(ArticleCodeError::Empty); }
        if value.chars().count() > 255 { return Err(ArticleCodeError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ArticleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArticleCodeError {
    #[error("article code is empty")]
    Empty,
    #[error("article code is longer than 255 characters")]
    TooLong,
}

/// Discount percentage, 0..=90
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Discount(u8);

impl Discount {
    pub const MAX: u8 = 90;
    pub fn new(percent: i32) -> Result<Self, RangeError> {
        if !(0..=Self::MAX as i32).contains(&percent) { return Err(RangeError { min: 0, max: Self::MAX as i32, got: percent }); }
        Ok(Self(percent as u8))
    }
    pub fn percent(&self) -> u8 { self.0 }
}

impl TryFrom<i32> for Discount {
    type Error = RangeError;
    fn try_from(value: i32) -> Result<Self, Self::Error> { Discount::new(value) }
}

impl From<Discount> for i32 {
    fn from(d: Discount) -> Self { d.0 as i32 }
}

/// Review rating, 1..=5
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: i32) -> Result<Self, RangeError> {
        if !(1..=5).contains(&value) { return Err(RangeError { min: 1, max: 5, got: value }); }
        Ok(Self(value as u8))
    }
    pub fn value(&self) -> u8 { self.0 }
}

impl TryFrom<i32> for Rating {
    type Error = RangeError;
    fn try_from(value: i32) -> Result<Self, Self::Error> { Rating::new(value) }
}

impl From<Rating> for i32 {
    fn from(r: Rating) -> Self { r.0 as i32 }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("value {got} is outside {min}..={max}")]
pub struct RangeError { pub min: i32, pub max: i32, pub got: i32 }

/// Mean rating rounded to one decimal, `None` without reviews.
pub fn average_rating(ratings: impl IntoIterator<Item = Rating>) -> Option<f64> {
    let (sum, count) = ratings.into_iter().fold((0u32, 0u32), |(s, c), r| (s + r.value() as u32, c + 1));
    if count == 0 { return None; }
    Some((sum as f64 / count as f64 * 10.0).round() / 10.0)
}
