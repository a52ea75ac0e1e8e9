//! Checkout, order tracking and payment gateway callbacks

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;
use validator::Validate;

use super::pages::render;
use super::{views, ApiError, ApiResult, AppState, FieldErrors, Payload};
use crate::domain::aggregates::{
    Customer, DeliveryAddress, DeliveryMethod, LineItem, NewOrder, Order, OrderError, OrderStatus, PaymentInfo,
    PaymentMethod, PaymentUpdate, SettleOutcome,
};
use crate::config::AppConfig;
use crate::domain::aggregates::order::DEFAULT_CITY;
use crate::domain::value_objects::Money;
use crate::payment::{InitPayment, PaymentError};

const ORDER_PLACED: &str = "Заказ успешно оформлен! Мы свяжемся с вами в ближайшее время.";
const PAYMENT_INIT_FAILED: &str = "Ошибка инициализации платежа. Мы свяжемся с вами для уточнения деталей.";
const PAYMENT_SUCCEEDED: &str = "Платеж успешно проведен!";
const PAYMENT_FAILED: &str = "Оплата не была завершена. Попробуйте еще раз.";
const PAYMENT_NOT_COMPLETED: &str = "Оплата не была завершена.";

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", get(checkout_page).post(checkout))
        .route("/orders/:uuid", get(track_order))
        .route("/payment/notification", post(payment_notification))
        .route("/payment/success", get(payment_success))
        .route("/payment/fail", get(payment_fail))
}

async fn checkout_page(State(s): State<AppState>) -> Json<Value> {
    let methods = |pairs: &[(&str, &str)]| pairs.iter().map(|(v, l)| json!({"value": v, "label": l})).collect::<Vec<_>>();
    render("Checkout", json!({
        "paymentMethods": methods(&[
            (PaymentMethod::Cash.as_str(), PaymentMethod::Cash.label()),
            (PaymentMethod::Card.as_str(), PaymentMethod::Card.label()),
        ]),
        "deliveryMethods": methods(&[
            (DeliveryMethod::Courier.as_str(), DeliveryMethod::Courier.label()),
            (DeliveryMethod::Pickup.as_str(), DeliveryMethod::Pickup.label()),
        ]),
        "defaultCity": DEFAULT_CITY,
        "cardPaymentsEnabled": s.gateway.is_some(),
    }), "/checkout")
}

// =============================================================================
// Checkout
// =============================================================================

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 255))]
    pub first_name: String,
    #[validate(length(min = 1, max = 255))]
    pub last_name: String,
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    pub delivery_method: String,
    pub payment_method: String,
    pub address: AddressInput,
    pub items: Vec<ItemInput>,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
    pub agreement: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct AddressInput {
    pub is_private_house: bool,
    #[validate(length(min = 1, max = 255))]
    pub city: String,
    #[validate(length(max = 255))]
    pub street: Option<String>,
    #[validate(length(max = 255))]
    pub house: Option<String>,
    #[validate(length(max = 255))]
    pub apartment: Option<String>,
    #[validate(length(max = 255))]
    pub entrance: Option<String>,
    #[validate(length(max = 1000))]
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ItemInput {
    pub id: Option<i64>,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

fn filled(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Validated checkout form
struct CheckoutForm {
    customer: Customer,
    payment_method: PaymentMethod,
    delivery_method: DeliveryMethod,
    delivery: DeliveryAddress,
    items: Vec<(i64, u32)>,
    comment: Option<String>,
}

impl CheckoutRequest {
    fn into_form(mut self) -> ApiResult<CheckoutForm> {
        let address = &mut self.address;
        if address.is_private_house {
            address.apartment = None;
            address.entrance = None;
        }
        address.street = filled(address.street.take());
        address.house = filled(address.house.take());

        let mut errors = FieldErrors::default();
        errors.absorb("", self.validate());
        errors.absorb("address.", self.address.validate());
        for (i, item) in self.items.iter().enumerate() {
            errors.absorb(&format!("items.{i}."), item.validate());
            if item.id.is_none() { errors.required(&format!("items.{i}.id")); }
        }
        if self.items.is_empty() { errors.required("items"); }

        let delivery_method = self.delivery_method.parse::<DeliveryMethod>().ok();
        if delivery_method.is_none() { errors.add("delivery_method", "The selected delivery method is invalid."); }
        let payment_method = self.payment_method.parse::<PaymentMethod>().ok();
        if payment_method.is_none() { errors.add("payment_method", "The selected payment method is invalid."); }
        if delivery_method == Some(DeliveryMethod::Courier) {
            if self.address.street.is_none() { errors.required("address.street"); }
            if self.address.house.is_none() { errors.required("address.house"); }
        }
        if !self.agreement { errors.add("agreement", "The agreement field must be accepted."); }
        errors.into_result()?;

        let (Some(delivery_method), Some(payment_method)) = (delivery_method, payment_method) else {
            return Err(ApiError::BadRequest("invalid checkout form".into()));
        };
        let a = self.address;
        Ok(CheckoutForm {
            customer: Customer {
                first_name: self.first_name.trim().into(),
                last_name: self.last_name.trim().into(),
                phone: self.phone.trim().into(),
                email: self.email.trim().into(),
            },
            payment_method,
            delivery_method,
            delivery: DeliveryAddress {
                is_private_house: a.is_private_house,
                city: a.city.trim().into(),
                street: a.street,
                house: a.house,
                apartment: filled(a.apartment),
                entrance: filled(a.entrance),
                comment: filled(a.comment),
            },
            items: self.items.iter().filter_map(|i| Some((i.id?, i.quantity.max(1) as u32))).collect(),
            comment: filled(self.comment),
        })
    }
}

/// Prices line items from the current catalog.
async fn price_items(s: &AppState, items: &[(i64, u32)]) -> ApiResult<Vec<LineItem>> {
    let ids: Vec<i64> = items.iter().map(|(id, _)| *id).collect();
    let products = s.store.get_products(&ids).await?;
    let mut errors = FieldErrors::default();
    let mut lines = Vec::with_capacity(items.len());
    for (i, (id, quantity)) in items.iter().enumerate() {
        match products.iter().find(|p| p.id == *id) {
            Some(p) => lines.push(LineItem::new(
                p.id, p.title.clone(), Some(p.slug.to_string()), *quantity, p.price, p.final_price(),
                p.images.first().and_then(|i| views::asset_url(&s.config, i)),
            )),
            None => errors.add(format!("items.{i}.id"), "The selected product is invalid."),
        }
    }
    let total: Money = lines.iter().map(|l| l.total_price).sum();
    if !total.fits_column() {
        errors.add("items", format!("The order total must not be greater than {}.", Money::max_stored().amount()));
    }
    errors.into_result()?;
    Ok(lines)
}

async fn checkout(State(s): State<AppState>, Payload(request): Payload<CheckoutRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    let form = request.into_form()?;
    let items = price_items(&s, &form.items).await?;

    let mut order = Order::place(NewOrder {
        customer: form.customer,
        items,
        payment_method: form.payment_method,
        delivery_method: form.delivery_method,
        delivery: form.delivery,
        comment: form.comment,
        agreement: true,
    }).map_err(|e| match e {
        OrderError::NoItems => ApiError::Validation(FieldErrors::single("items", "The items field is required.")),
        other => ApiError::BadRequest(other.to_string()),
    })?;
    let events = order.take_events();
    s.store.create_order(&order).await?;
    tracing::info!(order = %order.number, total = %order.total_price, payment = order.payment_method.as_str(), "order placed");
    s.events.publish_all(events).await;
    s.notifier.notify_order(&order).await;

    let mut payment_error = None;
    if order.payment_method == PaymentMethod::Card {
        match start_payment(&s, &mut order).await {
            Ok(()) => {
                // the webhook still finds the order by number
                if let Err(e) = s.store.save_order(&order).await {
                    tracing::error!(order = %order.number, error = %e, "cannot store payment details");
                }
            }
            Err(e) => {
                tracing::error!(order = %order.number, error = %e, "payment initialisation failed");
                payment_error = Some(PAYMENT_INIT_FAILED);
            }
        }
    }
    Ok((StatusCode::CREATED, Json(checkout_response(&s.config, &order, payment_error))))
}

/// `payment_url` is only offered together with `success: true`.
fn checkout_response(config: &AppConfig, order: &Order, payment_error: Option<&str>) -> Value {
    let mut body = json!({
        "success": payment_error.is_none(),
        "order": {"uuid": order.id, "number": order.number},
        "tracking_url": config.url(&format!("/orders/{}", order.id)),
        "payment_url": Value::Null,
    });
    match payment_error {
        Some(error) => body["error"] = json!(error),
        None => {
            body["payment_url"] = json!(order.payment.payment_url);
            body["message"] = json!(ORDER_PLACED);
        }
    }
    body
}

async fn start_payment(s: &AppState, order: &mut Order) -> Result<(), PaymentError> {
    let gateway = s.gateway.as_ref().ok_or(PaymentError::NotConfigured)?;
    let mut data = Map::new();
    data.insert("Phone".into(), Value::String(order.customer.phone.clone()));
    data.insert("Email".into(), Value::String(order.customer.email.clone()));

    let response = gateway.init_payment(InitPayment {
        amount: order.total_price,
        order_id: order.number.clone(),
        description: format!("Оплата заказа №{}", order.number),
        success_url: s.config.url(&format!("/payment/success?OrderId={}", order.number)),
        fail_url: s.config.url(&format!("/payment/fail?OrderId={}", order.number)),
        customer_key: None,
        recurrent: false,
        data: Some(data),
        receipt: None,
    }).await?;

    tracing::info!(order = %order.number, payment_id = %response.payment_id, "payment initialised");
    order.attach_payment(PaymentInfo {
        payment_id: Some(response.payment_id),
        payment_status: response.status,
        payment_url: response.payment_url,
        payment_data: Some(response.raw),
    });
    Ok(())
}

// =============================================================================
// Tracking
// =============================================================================

async fn track_order(State(s): State<AppState>, Path(uuid): Path<String>) -> ApiResult<Json<Value>> {
    let id = Uuid::parse_str(&uuid).map_err(|_| ApiError::not_found("order"))?;
    let order = s.store.get_order(id).await?.ok_or_else(|| ApiError::not_found("order"))?;
    let path = format!("/orders/{}", order.id);
    Ok(render("OrderTracking", json!({
        "order": views::tracking_order(&order),
        "statusTimeline": order.timeline(),
        "isCancelled": order.is_cancelled(),
        "trackingUrl": s.config.url(&path),
    }), &path))
}

// =============================================================================
// Payment callbacks
// =============================================================================

type Plain = (StatusCode, &'static str);

/// Gateway webhook. Answers `OK` once the notification is recorded.
async fn payment_notification(State(s): State<AppState>, body: Bytes) -> Result<Plain, Plain> {
    let payload: Map<String, Value> = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "unreadable payment notification");
        (StatusCode::BAD_REQUEST, "Invalid payload")
    })?;

    if !s.gateway.as_ref().is_some_and(|g| g.verify_notification(&payload)) {
        tracing::warn!(order = ?payload.get("OrderId"), "payment notification with invalid token");
        return Err((StatusCode::BAD_REQUEST, "Invalid token"));
    }

    let number = payload.get("OrderId").and_then(Value::as_str).map(String::from);
    let payment_id = match payload.get("PaymentId") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    let (Some(number), Some(payment_id)) = (number, payment_id) else {
        tracing::warn!("payment notification without OrderId or PaymentId");
        return Err((StatusCode::BAD_REQUEST, "Missing OrderId or PaymentId"));
    };

    let internal = |e: crate::store::StorageError| {
        tracing::error!(order = %number, error = %e, "cannot process payment notification");
        (StatusCode::INTERNAL_SERVER_ERROR, "Server Error")
    };
    let mut order = s.store.find_order_by_number(&number).await.map_err(internal)?.ok_or_else(|| {
        tracing::warn!(order = %number, "payment notification for unknown order");
        (StatusCode::NOT_FOUND, "Order not found")
    })?;

    let update = PaymentUpdate {
        payment_id: payment_id.clone(),
        status: payload.get("Status").and_then(Value::as_str).map(String::from),
        success: payload.get("Success").and_then(Value::as_bool).unwrap_or(false),
        data: Value::Object(payload),
    };
    match order.settle_payment(update) {
        SettleOutcome::Transitioned { from, to } => {
            tracing::info!(order = %number, payment_id = %payment_id, %from, %to, "order status updated by payment");
        }
        SettleOutcome::Skipped(e) => {
            tracing::warn!(order = %number, payment_id = %payment_id, error = %e, "payment status not applied");
        }
        SettleOutcome::Unchanged => {
            tracing::debug!(order = %number, payment_id = %payment_id, "payment notification recorded");
        }
    }

    let events = order.take_events();
    s.store.save_order(&order).await.map_err(internal)?;
    s.events.publish_all(events).await;
    if order.status == OrderStatus::Confirmed {
        s.notifier.notify_payment(&order).await;
    }
    Ok((StatusCode::OK, "OK"))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReturnParams {
    #[serde(rename = "OrderId")]
    pub order_id: Option<String>,
}

fn redirect(to: String, kind: &str, message: &str) -> Json<Value> {
    Json(json!({"redirect": to, "flash": {kind: message}}))
}

async fn find_returning_order(s: &AppState, params: &ReturnParams) -> ApiResult<Option<Order>> {
    match params.order_id.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(number) => Ok(s.store.find_order_by_number(number).await?),
        None => Ok(None),
    }
}

async fn payment_success(State(s): State<AppState>, Query(p): Query<ReturnParams>) -> ApiResult<Json<Value>> {
    Ok(match find_returning_order(&s, &p).await? {
        Some(order) => redirect(s.config.url(&format!("/orders/{}", order.id)), "success", PAYMENT_SUCCEEDED),
        None => redirect(s.config.url("/"), "success", PAYMENT_SUCCEEDED),
    })
}

async fn payment_fail(State(s): State<AppState>, Query(p): Query<ReturnParams>) -> ApiResult<Json<Value>> {
    Ok(match find_returning_order(&s, &p).await? {
        Some(order) => redirect(s.config.url(&format!("/orders/{}", order.id)), "error", PAYMENT_FAILED),
        None => redirect(s.config.url("/checkout"), "error", PAYMENT_NOT_COMPLETED),
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::testing::get;
    use super::*;
    use crate::domain::aggregates::{Characteristics, NewProduct};
    use crate::domain::value_objects::{ArticleCode, Discount, Slug};
    use crate::store::{OrderStore, ProductStore};
    use rust_decimal::Decimal;

    async fn seed_product(app: &TestApp) -> i64 {
        app.store.create_product(NewProduct {
            title: "Смеситель Grohe".into(), slug: Slug::new("grohe").unwrap(), article_id: ArticleCode::new("GR-1").unwrap(),
            category_id: None, price: Money::new(Decimal::new(100_000, 2)), discount: Discount::new(10).unwrap(),
            description: None, characteristics: Characteristics::new(), images: vec!["products/grohe.jpg".into()], is_active: true,
        }).await.unwrap().id
    }

    fn form(product_id: i64, payment: &str) -> Value {
        json!({
            "first_name": "Иван", "last_name": "Петров", "phone": "+79000000000", "email": "ivan@example.com",
            "delivery_method": "courier", "payment_method": payment,
            "address": {"city": "Челябинск", "street": "Ленина", "house": "1", "apartment": "5"},
            "items": [{"id": product_id, "quantity": 2, "price": 1.0, "final_price": 1.0}],
            "agreement": true,
        })
    }

    async fn notify(app: &TestApp, payload: Value) -> (StatusCode, Value) {
        json(&app.router, "POST", "/payment/notification", payload).await
    }

    #[tokio::test]
    async fn test_cash_checkout_prices_from_catalog() {
        let app = app();
        let id = seed_product(&app).await;
        let (status, body) = json(&app.router, "POST", "/checkout", form(id, "cash")).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], ORDER_PLACED);
        assert!(body["payment_url"].is_null());

        let number = body["order"]["number"].as_str().unwrap();
        let order = app.store.find_order_by_number(number).await.unwrap().unwrap();
        // client-sent prices are ignored
        assert_eq!(order.total_price.amount(), Decimal::new(180_000, 2));
        assert_eq!(order.items_count, 2);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(body["tracking_url"], format!("http://shop.test/orders/{}", order.id));
        assert!(app.gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_card_checkout_initiates_payment() {
        let app = app();
        let id = seed_product(&app).await;
        let (status, body) = json(&app.router, "POST", "/checkout", form(id, "card")).await;
        assert_eq!(status, StatusCode::CREATED);
        let number = body["order"]["number"].as_str().unwrap().to_string();
        assert_eq!(body["payment_url"], format!("https://pay.example/{number}"));

        let requests = app.gateway.requests.lock().unwrap();
        assert_eq!(requests[0].amount.to_minor_units(), 180_000);
        assert_eq!(requests[0].description, format!("Оплата заказа №{number}"));
        assert_eq!(requests[0].success_url, format!("http://shop.test/payment/success?OrderId={number}"));
        drop(requests);

        let order = app.store.find_order_by_number(&number).await.unwrap().unwrap();
        assert_eq!(order.payment.payment_id.as_deref(), Some("13660"));
        assert_eq!(order.payment_method, PaymentMethod::Card);
    }

    #[tokio::test]
    async fn test_card_checkout_survives_gateway_failure() {
        let app = app_with(FakeGateway { fail: true, ..Default::default() });
        let id = seed_product(&app).await;
        let (status, body) = json(&app.router, "POST", "/checkout", form(id, "card")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], PAYMENT_INIT_FAILED);
        assert!(body["payment_url"].is_null());

        let order = app.store.find_order_by_number(body["order"]["number"].as_str().unwrap()).await.unwrap().unwrap();
        assert_eq!(order.payment_method, PaymentMethod::Card);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.payment.payment_id.is_none());
    }

    #[tokio::test]
    async fn test_checkout_validation() {
        let app = app();
        let (status, body) = json(&app.router, "POST", "/checkout", json!({
            "first_name": "", "email": "nope", "delivery_method": "drone", "payment_method": "crypto",
            "address": {"city": ""}, "items": [], "agreement": false,
        })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        for field in ["first_name", "last_name", "phone", "email", "delivery_method", "payment_method", "address.city", "items", "agreement"] {
            assert!(body["errors"][field].is_array(), "missing error for {field}: {body}");
        }
    }

    #[tokio::test]
    async fn test_courier_needs_street_and_unknown_products_rejected() {
        let app = app();
        let mut request = form(999, "cash");
        request["address"] = json!({"city": "Челябинск", "street": " "});
        let (status, body) = json(&app.router, "POST", "/checkout", request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["address.street"].is_array());
        assert!(body["errors"]["address.house"].is_array());

        let (status, body) = json(&app.router, "POST", "/checkout", form(999, "cash")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["items.0.id"].is_array());
    }

    #[tokio::test]
    async fn test_private_house_clears_apartment() {
        let app = app();
        let id = seed_product(&app).await;
        let mut request = form(id, "cash");
        request["delivery_method"] = json!("pickup");
        request["address"] = json!({"city": "Копейск", "is_private_house": true, "apartment": "12", "entrance": "3"});
        let (status, body) = json(&app.router, "POST", "/checkout", request).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let order = app.store.find_order_by_number(body["order"]["number"].as_str().unwrap()).await.unwrap().unwrap();
        assert!(order.delivery.is_private_house);
        assert!(order.delivery.apartment.is_none());
        assert!(order.delivery.entrance.is_none());
    }

    #[tokio::test]
    async fn test_address_parts_accept_255_chars() {
        let app = app();
        let id = seed_product(&app).await;
        let mut request = form(id, "cash");
        request["address"]["house"] = json!("д".repeat(255));
        request["address"]["entrance"] = json!("п".repeat(255));
        let (status, body) = json(&app.router, "POST", "/checkout", request.clone()).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let order = app.store.find_order_by_number(body["order"]["number"].as_str().unwrap()).await.unwrap().unwrap();
        assert_eq!(order.delivery.house.as_deref().map(|h| h.chars().count()), Some(255));

        request["address"]["house"] = json!("д".repeat(256));
        let (status, body) = json(&app.router, "POST", "/checkout", request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["address.house"].is_array(), "{body}");
    }

    #[tokio::test]
    async fn test_order_total_must_fit_storage() {
        let app = app();
        let id = app.store.create_product(NewProduct {
            title: "Котел".into(), slug: Slug::new("kotel").unwrap(), article_id: ArticleCode::new("K-1").unwrap(),
            category_id: None, price: Money::new(Decimal::new(99_999_999, 0)), discount: Discount::default(),
            description: None, characteristics: Characteristics::new(), images: vec![], is_active: true,
        }).await.unwrap().id;

        let (status, body) = json(&app.router, "POST", "/checkout", form(id, "cash")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["items"].is_array(), "{body}");

        let mut request = form(id, "cash");
        request["items"][0]["quantity"] = json!(1);
        let (status, body) = json(&app.router, "POST", "/checkout", request).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    #[tokio::test]
    async fn test_quantity_upper_bound() {
        let app = app();
        let id = seed_product(&app).await;
        let mut request = form(id, "cash");
        request["items"][0]["quantity"] = json!(10_001);
        let (status, body) = json(&app.router, "POST", "/checkout", request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["items.0.quantity"].is_array(), "{body}");
    }

    #[tokio::test]
    async fn test_failed_payment_hides_payment_url() {
        let app = app();
        let id = seed_product(&app).await;
        let (_, body) = json(&app.router, "POST", "/checkout", form(id, "card")).await;
        let order = app.store.find_order_by_number(body["order"]["number"].as_str().unwrap()).await.unwrap().unwrap();
        assert!(order.payment.payment_url.is_some());

        let config = AppConfig { app_url: "http://shop.test".into(), ..AppConfig::default() };
        let body = checkout_response(&config, &order, Some(PAYMENT_INIT_FAILED));
        assert_eq!(body["success"], false);
        assert!(body["payment_url"].is_null());
        assert_eq!(body["error"], PAYMENT_INIT_FAILED);

        let body = checkout_response(&config, &order, None);
        assert_eq!(body["success"], true);
        assert_eq!(body["payment_url"], json!(order.payment.payment_url));
        assert_eq!(body["tracking_url"], format!("http://shop.test/orders/{}", order.id));
    }

    #[tokio::test]
    async fn test_tracking_page() {
        let app = app();
        let id = seed_product(&app).await;
        let (_, body) = json(&app.router, "POST", "/checkout", form(id, "cash")).await;
        let uuid = body["order"]["uuid"].as_str().unwrap().to_string();

        let (status, page) = get(&app.router, &format!("/orders/{uuid}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["component"], "OrderTracking");
        let props = &page["props"];
        assert_eq!(props["order"]["status_label"], "Новый");
        assert_eq!(props["order"]["payment_method_label"], "Наличными");
        assert_eq!(props["order"]["items"][0]["unit_price"], 900.0);
        assert_eq!(props["order"]["items"][0]["total_price"], 1800.0);
        assert_eq!(props["statusTimeline"][0]["completed"], true);
        assert_eq!(props["statusTimeline"][1]["completed"], false);
        assert_eq!(props["isCancelled"], false);

        let (status, _) = get(&app.router, "/orders/not-a-uuid").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&app.router, &format!("/orders/{}", Uuid::nil())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_confirms_order() {
        let app = app();
        let id = seed_product(&app).await;
        let (_, body) = json(&app.router, "POST", "/checkout", form(id, "card")).await;
        let number = body["order"]["number"].as_str().unwrap().to_string();

        let payload = json!({"OrderId": number, "PaymentId": 13660, "Status": "CONFIRMED", "Success": true, "Token": "valid"});
        let (status, body) = notify(&app, payload.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        let order = app.store.find_order_by_number(&number).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment.payment_status.as_deref(), Some("CONFIRMED"));
        assert_eq!(order.payment.payment_data.as_ref().unwrap()["PaymentId"], 13660);

        // duplicate delivery
        let (status, _) = notify(&app, payload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.store.find_order_by_number(&number).await.unwrap().unwrap().status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_webhook_rejections() {
        let app = app();
        let id = seed_product(&app).await;
        let (_, body) = json(&app.router, "POST", "/checkout", form(id, "card")).await;
        let number = body["order"]["number"].as_str().unwrap().to_string();

        let (status, body) = notify(&app, json!({"OrderId": number, "PaymentId": 1, "Status": "CONFIRMED", "Success": true, "Token": "forged"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid token");
        assert_eq!(app.store.find_order_by_number(&number).await.unwrap().unwrap().status, OrderStatus::Pending);

        let (status, _) = notify(&app, json!({"OrderId": number, "Token": "valid"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = notify(&app, json!({"OrderId": "ORD-00000000-XXXXX", "PaymentId": "1", "Token": "valid"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Order not found");
    }

    #[tokio::test]
    async fn test_webhook_keeps_data_when_transition_not_allowed() {
        let app = app();
        let id = seed_product(&app).await;
        let (_, body) = json(&app.router, "POST", "/checkout", form(id, "card")).await;
        let number = body["order"]["number"].as_str().unwrap().to_string();
        let mut order = app.store.find_order_by_number(&number).await.unwrap().unwrap();
        order.transition_to(OrderStatus::Confirmed).unwrap();
        order.transition_to(OrderStatus::Shipped).unwrap();
        order.take_events();
        app.store.save_order(&order).await.unwrap();

        let (status, _) = notify(&app, json!({"OrderId": number, "PaymentId": "13660", "Status": "REVERSED", "Success": true, "Token": "valid"})).await;
        assert_eq!(status, StatusCode::OK);
        let order = app.store.find_order_by_number(&number).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.payment.payment_status.as_deref(), Some("REVERSED"));
    }

    #[tokio::test]
    async fn test_payment_return_pages() {
        let app = app();
        let id = seed_product(&app).await;
        let (_, body) = json(&app.router, "POST", "/checkout", form(id, "card")).await;
        let number = body["order"]["number"].as_str().unwrap().to_string();
        let uuid = body["order"]["uuid"].as_str().unwrap().to_string();

        let (_, body) = get(&app.router, &format!("/payment/success?OrderId={number}")).await;
        assert_eq!(body["redirect"], format!("http://shop.test/orders/{uuid}"));
        assert_eq!(body["flash"]["success"], PAYMENT_SUCCEEDED);

        let (_, body) = get(&app.router, &format!("/payment/fail?OrderId={number}")).await;
        assert_eq!(body["flash"]["error"], PAYMENT_FAILED);

        let (_, body) = get(&app.router, "/payment/fail?OrderId=missing").await;
        assert_eq!(body["redirect"], "http://shop.test/checkout");
        assert_eq!(body["flash"]["error"], PAYMENT_NOT_COMPLETED);

        let (_, body) = get(&app.router, "/payment/success").await;
        assert_eq!(body["redirect"], "http://shop.test/");
    }
}
