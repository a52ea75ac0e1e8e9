//! Admin endpoints, guarded by a static bearer token.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ok, paginated, views, ApiError, ApiResult, AppState, FieldErrors, Payload};
use crate::domain::aggregates::{Order, OrderStatus, PaymentUpdate, SettleOutcome};
use crate::importer::{self, ImportNotification};
use crate::payment::{PaymentError, PaymentGateway};
use crate::store::{OrderQuery, Page};

/// Accounting exports run to several megabytes.
const IMPORT_BODY_LIMIT: usize = 32 * 1024 * 1024;

pub(super) fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/badge", get(orders_badge))
        .route("/orders/bulk-delete", post(delete_orders))
        .route("/orders/:id", get(show_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/payment", get(payment_state))
        .route("/orders/:id/payment/cancel", post(cancel_payment))
        .route("/products/bulk-delete", post(delete_products))
        .route("/products/import", post(import_products).layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT)))
        .route("/news/bulk-delete", post(delete_news))
        .route("/reviews/bulk-delete", post(delete_reviews))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

async fn require_admin(State(s): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    let given = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match (s.config.admin_token.as_deref().filter(|t| !t.is_empty()), given) {
        (Some(expected), Some(given)) if expected == given.trim() => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized),
    }
}

// -----------------------------------------------------------------------------
// Orders
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct OrderListParams {
    pub status: Option<String>,
    pub payment_method: Option<String>,
    pub delivery_method: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn parse_filter<T: FromStr>(errors: &mut FieldErrors, field: &str, value: Option<&str>) -> Option<T> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    let parsed = value.parse().ok();
    if parsed.is_none() {
        errors.add(field, format!("The selected {} is invalid.", field.replace('_', " ")));
    }
    parsed
}

async fn list_orders(State(s): State<AppState>, Query(p): Query<OrderListParams>) -> ApiResult<Json<Value>> {
    let mut errors = FieldErrors::default();
    let query = OrderQuery {
        status: parse_filter(&mut errors, "status", p.status.as_deref()),
        payment_method: parse_filter(&mut errors, "payment_method", p.payment_method.as_deref()),
        delivery_method: parse_filter(&mut errors, "delivery_method", p.delivery_method.as_deref()),
    };
    errors.into_result()?;
    let orders = s.store.list_orders(&query, Page::new(p.page, p.per_page, 25)).await?;
    Ok(paginated(orders.map(|o| views::admin_order(&o)), "Заказы"))
}

/// Navigation badge: number of new orders, `null` when there are none.
async fn orders_badge(State(s): State<AppState>) -> ApiResult<Json<Value>> {
    let pending = s.store.count_orders(OrderStatus::Pending).await?;
    Ok(Json(json!({"data": (pending > 0).then_some(pending)})))
}

async fn load_order(s: &AppState, id: Uuid) -> ApiResult<Order> {
    s.store.get_order(id).await?.ok_or_else(|| ApiError::not_found("order"))
}

async fn show_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let order = load_order(&s, id).await?;
    Ok(ok(views::admin_order(&order), "Заказ"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusRequest {
    pub status: Option<String>,
}

async fn update_status(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Payload(r): Payload<StatusRequest>,
) -> ApiResult<Json<Value>> {
    let mut errors = FieldErrors::default();
    let status: Option<OrderStatus> = parse_filter(&mut errors, "status", r.status.as_deref());
    if status.is_none() && errors.is_empty() {
        errors.required("status");
    }
    errors.into_result()?;
    let Some(status) = status else {
        return Err(ApiError::BadRequest("status is required".into()));
    };

    let mut order = load_order(&s, id).await?;
    let from = order.status;
    order.transition_to(status).map_err(|e| ApiError::Validation(FieldErrors::single("status", e.to_string())))?;
    s.store.save_order(&order).await?;
    s.events.publish_all(order.take_events()).await;
    tracing::info!(order = %order.number, %from, to = %status, "order status updated by admin");
    Ok(ok(views::admin_order(&order), "Статус заказа обновлён"))
}

fn payment_target(s: &AppState, order: &Order) -> ApiResult<(Arc<dyn PaymentGateway>, String)> {
    let gateway = s.gateway.clone().ok_or_else(|| ApiError::BadRequest(PaymentError::NotConfigured.to_string()))?;
    let payment_id = order.payment.payment_id.clone().ok_or_else(|| ApiError::BadRequest("Заказ не оплачивался картой".into()))?;
    Ok((gateway, payment_id))
}

fn gateway_failure(order: &Order, e: PaymentError) -> ApiError {
    tracing::error!(order = %order.number, error = %e, "payment gateway call failed");
    ApiError::BadRequest(format!("Ошибка платёжного шлюза: {e}"))
}

async fn payment_state(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let order = load_order(&s, id).await?;
    let (gateway, payment_id) = payment_target(&s, &order)?;
    let state = gateway.get_state(&payment_id).await.map_err(|e| gateway_failure(&order, e))?;
    Ok(ok(json!({"payment_id": state.payment_id, "status": state.status, "response": state.raw}), "Статус платежа"))
}

async fn cancel_payment(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let mut order = load_order(&s, id).await?;
    let (gateway, payment_id) = payment_target(&s, &order)?;
    let response = gateway.cancel_payment(&payment_id, None).await.map_err(|e| gateway_failure(&order, e))?;

    let outcome = order.settle_payment(PaymentUpdate {
        payment_id,
        status: response.get("Status").and_then(Value::as_str).map(String::from),
        success: response.get("Success").and_then(Value::as_bool).unwrap_or(false),
        data: response,
    });
    if let SettleOutcome::Skipped(e) = &outcome {
        tracing::warn!(order = %order.number, error = %e, "payment cancelled but order status kept");
    }
    s.store.save_order(&order).await?;
    s.events.publish_all(order.take_events()).await;
    Ok(ok(views::admin_order(&order), "Платёж отменён"))
}

// -----------------------------------------------------------------------------
// Bulk actions
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BulkIds<T> {
    pub ids: Vec<T>,
}

impl<T> BulkIds<T> {
    fn require(self) -> ApiResult<Vec<T>> {
        if self.ids.is_empty() {
            let mut errors = FieldErrors::default();
            errors.required("ids");
            errors.into_result()?;
        }
        Ok(self.ids)
    }
}

fn deleted(count: u64) -> Json<Value> {
    ok(json!({"deleted": count}), &format!("Удалено записей: {count}"))
}

async fn delete_orders(State(s): State<AppState>, Payload(r): Payload<BulkIds<Uuid>>) -> ApiResult<Json<Value>> {
    let ids = r.require()?;
    let count = s.store.delete_orders(&ids).await?;
    tracing::info!(count, "orders deleted");
    Ok(deleted(count))
}

async fn delete_products(State(s): State<AppState>, Payload(r): Payload<BulkIds<i64>>) -> ApiResult<Json<Value>> {
    let ids = r.require()?;
    let count = s.store.delete_products(&ids).await?;
    tracing::info!(count, "products deleted");
    Ok(deleted(count))
}

async fn delete_news(State(s): State<AppState>, Payload(r): Payload<BulkIds<i64>>) -> ApiResult<Json<Value>> {
    let ids = r.require()?;
    Ok(deleted(s.store.delete_news(&ids).await?))
}

async fn delete_reviews(State(s): State<AppState>, Payload(r): Payload<BulkIds<i64>>) -> ApiResult<Json<Value>> {
    let ids = r.require()?;
    Ok(deleted(s.store.delete_reviews(&ids).await?))
}

// -----------------------------------------------------------------------------
// Import
// -----------------------------------------------------------------------------

async fn import_products(State(s): State<AppState>, body: Bytes) -> Response {
    let result = importer::import(s.store.as_ref(), &body).await;
    let status = match &result {
        Ok(report) => {
            tracing::info!(
                categories_created = report.categories_created,
                products_created = report.products_created,
                products_updated = report.products_updated,
                "inventory import finished"
            );
            s.events.publish(report.event()).await;
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!(error = %e, bytes = body.len(), "inventory import failed");
            StatusCode::UNPROCESSABLE_ENTITY
        }
    };
    (status, Json(ImportNotification::from_result(&result))).into_response()
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::domain::aggregates::{Customer, DeliveryAddress, DeliveryMethod, LineItem, NewOrder, Order, PaymentInfo, PaymentMethod};
    use crate::domain::value_objects::{ArticleCode, Money};
    use crate::store::{OrderStore, ProductStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal::Decimal;
    use serde_json::json;

    async fn place(app: &TestApp, payment_method: PaymentMethod, delivery_method: DeliveryMethod) -> Order {
        let price = Money::new(Decimal::from(500));
        let mut order = Order::place(NewOrder {
            customer: Customer { first_name: "Иван".into(), last_name: "Петров".into(), phone: "+79001234567".into(), email: "ivan@example.com".into() },
            items: vec![LineItem::new(1, "Смеситель", Some("smesitel".into()), 2, price, price, None)],
            payment_method,
            delivery_method,
            delivery: DeliveryAddress::default(),
            comment: None,
            agreement: true,
        }).unwrap();
        order.take_events();
        app.store.create_order(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = app();
        let (status, body) = get(&app.router, "/admin/orders").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthenticated.");

        let request = Request::builder().uri("/admin/orders").header("authorization", "Bearer wrong").body(Body::empty()).unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_filters_and_badge() {
        let app = app();
        let (_, body) = admin(&app.router, "GET", "/admin/orders/badge", None).await;
        assert!(body["data"].is_null());

        place(&app, PaymentMethod::Cash, DeliveryMethod::Courier).await;
        place(&app, PaymentMethod::Card, DeliveryMethod::Pickup).await;

        let (status, body) = admin(&app.router, "GET", "/admin/orders", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["total"], 2);

        let (_, body) = admin(&app.router, "GET", "/admin/orders?payment_method=card", None).await;
        assert_eq!(body["meta"]["total"], 1);
        assert_eq!(body["data"][0]["delivery_method"], "pickup");

        let (status, body) = admin(&app.router, "GET", "/admin/orders?status=lost", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["status"].is_array());

        let (_, body) = admin(&app.router, "GET", "/admin/orders/badge", None).await;
        assert_eq!(body["data"], 2);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let app = app();
        let order = place(&app, PaymentMethod::Cash, DeliveryMethod::Courier).await;
        let uri = format!("/admin/orders/{}/status", order.id);

        let (status, body) = admin(&app.router, "PATCH", &uri, Some(json!({"status": "shipped"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "cannot move order from pending to shipped");

        let (status, body) = admin(&app.router, "PATCH", &uri, Some(json!({"status": "confirmed"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "confirmed");

        let (status, _) = admin(&app.router, "PATCH", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let stored = app.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status.as_str(), "confirmed");

        let (status, _) = admin(&app.router, "GET", &format!("/admin/orders/{}", uuid::Uuid::now_v7()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_payment_cancel() {
        let app = app();
        let cash = place(&app, PaymentMethod::Cash, DeliveryMethod::Courier).await;
        let (status, _) = admin(&app.router, "POST", &format!("/admin/orders/{}/payment/cancel", cash.id), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut card = place(&app, PaymentMethod::Card, DeliveryMethod::Courier).await;
        card.attach_payment(PaymentInfo { payment_id: Some("13660".into()), payment_status: Some("NEW".into()), ..Default::default() });
        app.store.save_order(&card).await.unwrap();

        let (_, body) = admin(&app.router, "GET", &format!("/admin/orders/{}/payment", card.id), None).await;
        assert_eq!(body["data"]["status"], "CONFIRMED");

        let (status, body) = admin(&app.router, "POST", &format!("/admin/orders/{}/payment/cancel", card.id), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["status"], "cancelled");
        assert_eq!(body["data"]["payment"]["payment_status"], "CANCELED");
    }

    #[tokio::test]
    async fn test_bulk_delete() {
        let app = app();
        let order = place(&app, PaymentMethod::Cash, DeliveryMethod::Courier).await;
        let (status, body) = admin(&app.router, "POST", "/admin/orders/bulk-delete", Some(json!({"ids": [order.id]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["deleted"], 1);

        let (status, body) = admin(&app.router, "POST", "/admin/products/bulk-delete", Some(json!({"ids": []}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["ids"].is_array());

        let (_, body) = admin(&app.router, "POST", "/admin/news/bulk-delete", Some(json!({"ids": [99]}))).await;
        assert_eq!(body["data"]["deleted"], 0);
    }

    #[tokio::test]
    async fn test_import() {
        let app = app();
        let export = "Отчёт\n\n\n\nКод;Наименование;Остаток;Закупка;Розница;Сумма\n;Смесители;;;;\nA-1;Смеситель Grohe;3;100;150;300\n";
        let request = Request::builder()
            .method("POST")
            .uri("/admin/products/import")
            .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
            .body(Body::from(export))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        assert!(body["body"].as_str().unwrap().contains("Создано товаров: 1"));
        let product = app.store.find_product_by_article(&ArticleCode::new("A-1").unwrap()).await.unwrap().unwrap();
        assert_eq!(product.title, "Смеситель Grohe");

        let request = Request::builder()
            .method("POST")
            .uri("/admin/products/import")
            .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
    }
}
