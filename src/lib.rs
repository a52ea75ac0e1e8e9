//! Plumbing fixture storefront
//!
//! Online shop for plumbing fixtures: product catalog with categories and
//! reviews, news, checkout with card payments through Tinkoff, public order
//! tracking and an admin surface with inventory import.
//!
//! ## Features
//! - Catalog, news and reviews JSON API
//! - Storefront page props for the frontend
//! - Checkout, payment webhook and order tracking
//! - Admin order management and bulk actions
//! - Inventory import from accounting exports
//! - Telegram notifications for new orders and payments

pub mod api;
pub mod config;
pub mod domain;
pub mod importer;
pub mod notify;
pub mod payment;
pub mod store;

pub use api::{router, AppState};
pub use config::AppConfig;
