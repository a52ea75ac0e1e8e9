//! Order Aggregate

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Money;

pub const DEFAULT_CITY: &str = "Челябинск";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Shipped, Delivered, Cancelled }

impl OrderStatus {
    /// Linear progression shown on the tracking page. `Cancelled` sits outside it.
    pub const FLOW: [OrderStatus; 4] = [Self::Pending, Self::Confirmed, Self::Shipped, Self::Delivered];
    pub const ALL: [OrderStatus; 5] = [Self::Pending, Self::Confirmed, Self::Shipped, Self::Delivered, Self::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Confirmed => "confirmed", Self::Shipped => "shipped",
            Self::Delivered => "delivered", Self::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Новый", Self::Confirmed => "Подтверждён", Self::Shipped => "Отправлен",
            Self::Delivered => "Доставлен", Self::Cancelled => "Отменён",
        }
    }

    fn position(&self) -> Option<usize> { Self::FLOW.iter().position(|s| s == self) }

    /// One step forward along the flow, or cancellation before shipping.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (Self::Pending | Self::Confirmed, Self::Cancelled) => true,
            (from, to) => match (from.position(), to.position()) {
                (Some(a), Some(b)) => b == a + 1,
                _ => false,
            },
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str() == s).ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod { #[default] Cash, Card }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str { match self { Self::Cash => "cash", Self::Card => "card" } }
    pub fn label(&self) -> &'static str { match self { Self::Cash => "Наличными", Self::Card => "Банковская карта" } }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod { #[default] Courier, Pickup }

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str { match self { Self::Courier => "courier", Self::Pickup => "pickup" } }
    pub fn label(&self) -> &'static str { match self { Self::Courier => "Курьер", Self::Pickup => "Самовывоз" } }
}

macro_rules! parse_by_name {
    ($ty:ty, [$($variant:expr),+]) => {
        impl FromStr for $ty {
            type Err = OrderError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+].into_iter().find(|v| v.as_str() == s).ok_or_else(|| OrderError::UnknownValue(s.to_string()))
            }
        }
    };
}
parse_by_name!(PaymentMethod, [PaymentMethod::Cash, PaymentMethod::Card]);
parse_by_name!(DeliveryMethod, [DeliveryMethod::Courier, DeliveryMethod::Pickup]);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer { pub first_name: String, pub last_name: String, pub phone: String, pub email: String }

impl Customer {
    pub fn full_name(&self) -> String { format!("{} {}", self.first_name, self.last_name).trim().to_string() }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub is_private_house: bool,
    pub city: String,
    pub street: Option<String>,
    pub house: Option<String>,
    pub apartment: Option<String>,
    pub entrance: Option<String>,
    pub comment: Option<String>,
}

impl Default for DeliveryAddress {
    fn default() -> Self {
        Self { is_private_house: false, city: DEFAULT_CITY.into(), street: None, house: None, apartment: None, entrance: None, comment: None }
    }
}

impl DeliveryAddress {
    /// `Город, Улица, д. 1, кв. 2, подъезд 3`; `None` without city, street or house.
    pub fn one_line(&self) -> Option<String> {
        if self.city.is_empty() && self.street.is_none() && self.house.is_none() { return None; }
        let mut out = String::new();
        if !self.city.is_empty() { out.push_str(&self.city); out.push_str(", "); }
        if let Some(street) = &self.street { out.push_str(street); out.push_str(", "); }
        if let Some(house) = &self.house { out.push_str("д. "); out.push_str(house); }
        if let Some(apt) = &self.apartment { out.push_str(", кв. "); out.push_str(apt); }
        if let Some(entrance) = &self.entrance { out.push_str(", подъезд "); out.push_str(entrance); }
        Some(out)
    }
}

/// Snapshot of a purchased product at checkout time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub title: String,
    pub slug: Option<String>,
    pub quantity: u32,
    pub price: Money,
    pub final_price: Money,
    pub total_price: Money,
    pub image: Option<String>,
}

impl LineItem {
    pub fn new(id: i64, title: impl Into<String>, slug: Option<String>, quantity: u32, price: Money, final_price: Money, image: Option<String>) -> Self {
        Self { id, title: title.into(), slug, quantity, price, final_price, total_price: final_price.multiply(quantity), image }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub payment_url: Option<String>,
    pub payment_data: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub number: String,
    pub customer: Customer,
    pub products: Vec<LineItem>,
    pub items_count: u32,
    pub total_price: Money,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub delivery_method: DeliveryMethod,
    pub delivery: DeliveryAddress,
    pub comment: Option<String>,
    pub agreement: bool,
    pub payment: PaymentInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub customer: Customer,
    pub items: Vec<LineItem>,
    pub payment_method: PaymentMethod,
    pub delivery_method: DeliveryMethod,
    pub delivery: DeliveryAddress,
    pub comment: Option<String>,
    pub agreement: bool,
}

/// Payment state reported by the gateway, already signature-checked.
#[derive(Clone, Debug)]
pub struct PaymentUpdate {
    pub payment_id: String,
    pub status: Option<String>,
    pub success: bool,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SettleOutcome {
    Unchanged,
    Transitioned { from: OrderStatus, to: OrderStatus },
    Skipped(OrderError),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineStep {
    pub value: OrderStatus,
    pub label: &'static str,
    pub completed: bool,
    pub current: bool,
}

impl Order {
    pub fn place(draft: NewOrder) -> Result<Self, OrderError> {
        if draft.items.is_empty() { return Err(OrderError::NoItems); }
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::now_v7(), number: generate_number(now), customer: draft.customer,
            items_count: 0, total_price: Money::zero(), products: draft.items,
            status: OrderStatus::Pending, payment_method: draft.payment_method, delivery_method: draft.delivery_method,
            delivery: draft.delivery, comment: draft.comment, agreement: draft.agreement,
            payment: PaymentInfo::default(), created_at: now, updated_at: now, events: vec![],
        };
        order.recalculate();
        order.raise_event(DomainEvent::Order(OrderEvent::Created {
            order_id: order.id, number: order.number.clone(), total: order.total_price.amount(),
        }));
        Ok(order)
    }

    /// Moves the order along the status flow. Returns `false` when already there.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<bool, OrderError> {
        if self.status == next { return Ok(false); }
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition { from: self.status, to: next });
        }
        let from = self.status;
        self.status = next;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged {
            order_id: self.id, number: self.number.clone(), from: from.to_string(), to: next.to_string(),
        }));
        Ok(true)
    }

    /// Stores the initial gateway answer for a card payment.
    pub fn attach_payment(&mut self, payment: PaymentInfo) {
        self.payment = payment;
        self.touch();
    }

    /// Records a gateway notification and advances the status it implies.
    /// Payment data is stored even when the implied transition is not allowed.
    pub fn settle_payment(&mut self, update: PaymentUpdate) -> SettleOutcome {
        self.payment.payment_id = Some(update.payment_id.clone());
        self.payment.payment_status = update.status.clone();
        self.payment.payment_data = Some(update.data);
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentUpdated {
            order_id: self.id, number: self.number.clone(), payment_id: update.payment_id, payment_status: update.status.clone(),
        }));

        let target = match update.status.as_deref() {
            Some("CONFIRMED") if update.success => OrderStatus::Confirmed,
            Some("REVERSED" | "CANCELED") => OrderStatus::Cancelled,
            _ => return SettleOutcome::Unchanged,
        };
        let from = self.status;
        match self.transition_to(target) {
            Ok(true) => SettleOutcome::Transitioned { from, to: target },
            Ok(false) => SettleOutcome::Unchanged,
            Err(e) => SettleOutcome::Skipped(e),
        }
    }

    pub fn timeline(&self) -> Vec<TimelineStep> {
        let current = self.status.position();
        OrderStatus::FLOW.iter().enumerate().map(|(idx, step)| TimelineStep {
            value: *step,
            label: step.label(),
            completed: current.is_some_and(|c| c >= idx),
            current: self.status == *step,
        }).collect()
    }

    pub fn is_cancelled(&self) -> bool { self.status == OrderStatus::Cancelled }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }

    fn recalculate(&mut self) {
        self.total_price = self.products.iter().map(|i| i.total_price).sum();
        self.items_count = self.products.iter().map(|i| i.quantity).sum();
    }

    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// `ORD-YYYYMMDD-XXXXX`
pub fn generate_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng().sample_iter(&Alphanumeric).take(5).map(|b| (b as char).to_ascii_uppercase()).collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("unknown order status: {0}")]
    UnknownStatus(String),
    #[error("unknown value: {0}")]
    UnknownValue(String),
}
