//! HTTP layer
//!
//! Routes are grouped by surface: the JSON API under `/api/v1`, storefront
//! page props, checkout with payment callbacks, and the admin endpoints.
//! Handlers share [`AppState`] and fail with [`ApiError`].

mod admin;
mod catalog;
mod checkout;
mod news;
mod pages;
mod reviews;
mod views;

pub use views::asset_url;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use validator::{ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::config::AppConfig;
use crate::domain::events::EventPublisher;
use crate::notify::TelegramNotifier;
use crate::payment::PaymentGateway;
use crate::store::{Paginated, StorageError, Store};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Card payments are refused when no gateway is configured
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub notifier: TelegramNotifier,
    pub events: EventPublisher,
    pub config: Arc<AppConfig>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(catalog::routes())
        .merge(news::routes())
        .merge(reviews::routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .merge(pages::routes())
        .merge(checkout::routes())
        .nest("/admin", admin::routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "plumbing-storefront"}))
}

// =============================================================================
// Errors
// =============================================================================

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(FieldErrors),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthenticated")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: &str) -> Self { ApiError::NotFound(format!("{what} not found")) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(errors) => {
                let message = errors.first().unwrap_or("The given data was invalid.").to_string();
                (StatusCode::UNPROCESSABLE_ENTITY, json!({"success": false, "message": message, "errors": errors}))
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({"success": false, "message": message})),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({"success": false, "message": message})),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({"success": false, "message": "Unauthenticated."})),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({"success": false, "message": "Server Error"}))
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => ApiError::not_found(what),
            StorageError::Conflict { field } => {
                ApiError::Validation(FieldErrors::single(field, format!("The {} has already been taken.", humanize(field))))
            }
            StorageError::MissingReference { field } => {
                ApiError::Validation(FieldErrors::single(field, format!("The selected {} is invalid.", humanize(field))))
            }
            StorageError::Invalid(message) => ApiError::BadRequest(message),
            StorageError::Database(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::Validation(FieldErrors::single("body", e.body_text())),
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = FieldErrors::default();
        fields.absorb("", Err(errors));
        ApiError::Validation(fields)
    }
}

/// JSON body extractor whose rejections use the API error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Payload<T>(pub T);

/// Validation messages keyed by field path (`address.city`, `items.0.quantity`).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Adds a "field is required" message.
    pub fn required(&mut self, field: &str) {
        self.add(field, format!("The {} field is required.", humanize(field)));
    }

    /// Merges the outcome of `Validate::validate`, prefixing every key.
    pub fn absorb(&mut self, prefix: &str, result: Result<(), ValidationErrors>) {
        if let Err(errors) = result {
            self.collect(prefix, &errors);
        }
    }

    fn collect(&mut self, prefix: &str, errors: &ValidationErrors) {
        for (field, kind) in errors.errors() {
            let key = format!("{prefix}{field}");
            match kind {
                ValidationErrorsKind::Field(list) => {
                    for error in list {
                        let message = describe(&key, error);
                        self.add(key.clone(), message);
                    }
                }
                ValidationErrorsKind::Struct(inner) => self.collect(&format!("{key}."), inner),
                ValidationErrorsKind::List(items) => {
                    for (index, inner) in items {
                        self.collect(&format!("{key}.{index}."), inner);
                    }
                }
            }
        }
    }

    pub fn contains(&self, field: &str) -> bool { self.0.contains_key(field) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn first(&self) -> Option<&str> {
        self.0.values().flat_map(|v| v.first()).next().map(String::as_str)
    }

    pub fn into_result(self) -> ApiResult<()> {
        if self.is_empty() { Ok(()) } else { Err(ApiError::Validation(self)) }
    }
}

fn humanize(field: &str) -> String {
    field.rsplit('.').next().unwrap_or(field).replace('_', " ")
}

fn describe(field: &str, error: &ValidationError) -> String {
    if let Some(message) = &error.message {
        return message.to_string();
    }
    let name = humanize(field);
    let param = |key: &str| error.params.get(key).map(|v| v.to_string());
    let blank = matches!(error.params.get("value"), Some(Value::String(s)) if s.trim().is_empty());
    match error.code.as_ref() {
        "required" => format!("The {name} field is required."),
        "length" if blank => format!("The {name} field is required."),
        "length" => match param("max") {
            Some(max) => format!("The {name} field must not be greater than {max} characters."),
            None => format!("The {name} field is invalid."),
        },
        "email" => format!("The {name} field must be a valid email address."),
        "range" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("The {name} field must be between {min} and {max}."),
            (Some(min), None) => format!("The {name} field must be at least {min}."),
            _ => format!("The {name} field is invalid."),
        },
        _ => format!("The {name} field is invalid."),
    }
}

// =============================================================================
// Response helpers
// =============================================================================

pub fn ok<T: Serialize>(data: T, message: &str) -> Json<Value> {
    Json(json!({"data": data, "success": true, "message": message}))
}

pub fn created<T: Serialize>(data: T, message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, ok(data, message))
}

pub fn done(message: &str) -> Json<Value> {
    Json(json!({"success": true, "message": message}))
}

pub fn paginated<T: Serialize>(page: Paginated<T>, message: &str) -> Json<Value> {
    let meta = meta(&page);
    Json(json!({"data": page.items, "success": true, "message": message, "meta": meta}))
}

pub fn meta<T>(page: &Paginated<T>) -> Value {
    json!({
        "current_page": page.page,
        "per_page": page.per_page,
        "total": page.total,
        "last_page": page.last_page(),
    })
}

/// Lenient boolean query flag: `1`, `true`, `on`, `yes` and their negatives.
pub fn flag(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and plain dates (midnight UTC).
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(at.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{Map, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::payment::{InitPayment, InitResponse, PaymentError, PaymentState};
    use crate::store::MemoryStore;

    pub const ADMIN_TOKEN: &str = "test-admin-token";

    /// Gateway double: accepts notifications whose `Token` is `valid`.
    #[derive(Default)]
    pub struct FakeGateway {
        pub fail: bool,
        pub requests: Mutex<Vec<InitPayment>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn init_payment(&self, request: InitPayment) -> Result<InitResponse, PaymentError> {
            let order_id = request.order_id.clone();
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(PaymentError::Rejected { message: "terminal blocked".into() });
            }
            Ok(InitResponse {
                payment_id: "13660".into(),
                status: Some("NEW".into()),
                payment_url: Some(format!("https://pay.example/{order_id}")),
                raw: serde_json::json!({"Success": true, "PaymentId": 13660}),
            })
        }

        async fn cancel_payment(&self, payment_id: &str, _amount: Option<i64>) -> Result<Value, PaymentError> {
            Ok(serde_json::json!({"Success": true, "PaymentId": payment_id, "Status": "CANCELED"}))
        }

        async fn get_state(&self, payment_id: &str) -> Result<PaymentState, PaymentError> {
            Ok(PaymentState { payment_id: payment_id.into(), status: Some("CONFIRMED".into()), raw: Value::Null })
        }

        fn verify_notification(&self, payload: &Map<String, Value>) -> bool {
            payload.get("Token").and_then(Value::as_str) == Some("valid")
        }
    }

    pub struct TestApp {
        pub store: Arc<MemoryStore>,
        pub gateway: Arc<FakeGateway>,
        pub router: Router,
    }

    pub fn app() -> TestApp { app_with(FakeGateway::default()) }

    pub fn app_with(gateway: FakeGateway) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let config = AppConfig {
            app_url: "http://shop.test".into(),
            admin_token: Some(ADMIN_TOKEN.into()),
            ..AppConfig::default()
        };
        let state = AppState {
            store: store.clone(),
            gateway: Some(gateway.clone()),
            notifier: TelegramNotifier::disabled(),
            events: EventPublisher::default(),
            config: Arc::new(config),
        };
        TestApp { store, gateway, router: router(state) }
    }

    pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
        send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn json(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(router, request).await
    }

    pub async fn admin(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {ADMIN_TOKEN}"));
        let request = match body {
            Some(body) => builder.header("content-type", "application/json").body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        send(router, request.unwrap()).await
    }
}
