//! Aggregates module
pub mod category;
pub mod product;
pub mod review;
pub mod news;
pub mod order;

pub use category::{Category, CategoryPatch, CategoryWithCount, NewCategory};
pub use product::{Characteristics, NewProduct, Product, ProductPatch};
pub use review::{NewReview, Review};
pub use news::{News, NewsPatch, NewsTag, NewNews, TagView};
pub use order::{
    Customer, DeliveryAddress, DeliveryMethod, LineItem, NewOrder, Order, OrderError, OrderStatus, PaymentInfo,
    PaymentMethod, PaymentUpdate, SettleOutcome, TimelineStep,
};
