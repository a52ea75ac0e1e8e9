use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{sign, InitPayment, InitResponse, PaymentError, PaymentGateway, PaymentState};

pub const DEFAULT_API_URL: &str = "https://securepay.tinkoff.ru/v2";

#[derive(Clone, Debug)]
pub struct TinkoffConfig {
    pub terminal_key: String,
    pub password: String,
    pub api_url: String,
    /// Absolute URL of the notification webhook
    pub notification_url: String,
}

/// Tinkoff acquiring API client
#[derive(Clone)]
pub struct TinkoffClient {
    config: TinkoffConfig,
    http: reqwest::Client,
}

impl TinkoffClient {
    pub fn new(config: TinkoffConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    fn base_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("TerminalKey".into(), Value::String(self.config.terminal_key.clone()));
        payload
    }

    async fn call(&self, method: &str, mut payload: Map<String, Value>) -> Result<Value, PaymentError> {
        let token = sign(&payload, &self.config.password);
        payload.insert("Token".into(), Value::String(token));

        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), method);
        let response = self.http.post(&url).json(&payload).send().await?;
        let status = response.status();
        let body: Value = serde_json::from_str(&response.text().await?)
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || body.get("Success").and_then(Value::as_bool) != Some(true) {
            let message = body.get("Message").and_then(Value::as_str)
                .unwrap_or("payment gateway error")
                .to_string();
            tracing::error!(method, http_status = %status, %message, "gateway request failed");
            return Err(PaymentError::Rejected { message });
        }
        Ok(body)
    }
}

/// Gateway ids arrive as numbers or strings depending on the endpoint.
fn id_field(body: &Value, key: &'static str) -> Result<String, PaymentError> {
    match body.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PaymentError::MissingField(key)),
    }
}

fn str_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl PaymentGateway for TinkoffClient {
    async fn init_payment(&self, request: InitPayment) -> Result<InitResponse, PaymentError> {
        let mut payload = self.base_payload();
        payload.insert("Amount".into(), Value::from(request.amount.to_minor_units()));
        payload.insert("OrderId".into(), Value::String(request.order_id.clone()));
        payload.insert("Description".into(), Value::String(request.description));
        payload.insert("NotificationURL".into(), Value::String(self.config.notification_url.clone()));
        payload.insert("SuccessURL".into(), Value::String(request.success_url));
        payload.insert("FailURL".into(), Value::String(request.fail_url));
        if let Some(key) = request.customer_key.filter(|k| !k.is_empty()) {
            payload.insert("CustomerKey".into(), Value::String(key));
        }
        if request.recurrent {
            payload.insert("Recurrent".into(), Value::String("Y".into()));
        }
        if let Some(data) = request.data.filter(|d| !d.is_empty()) {
            payload.insert("DATA".into(), Value::Object(data));
        }
        if let Some(receipt) = request.receipt {
            payload.insert("Receipt".into(), receipt);
        }

        tracing::info!(order_id = %request.order_id, "initialising payment");
        let body = self.call("Init", payload).await?;
        Ok(InitResponse {
            payment_id: id_field(&body, "PaymentId")?,
            status: str_field(&body, "Status"),
            payment_url: str_field(&body, "PaymentURL"),
            raw: body,
        })
    }

    async fn cancel_payment(&self, payment_id: &str, amount: Option<i64>) -> Result<Value, PaymentError> {
        let mut payload = self.base_payload();
        payload.insert("PaymentId".into(), Value::String(payment_id.into()));
        if let Some(amount) = amount {
            payload.insert("Amount".into(), Value::from(amount));
        }
        self.call("Cancel", payload).await
    }

    async fn get_state(&self, payment_id: &str) -> Result<PaymentState, PaymentError> {
        let mut payload = self.base_payload();
        payload.insert("PaymentId".into(), Value::String(payment_id.into()));
        let body = self.call("GetState", payload).await?;
        Ok(PaymentState { payment_id: id_field(&body, "PaymentId")?, status: str_field(&body, "Status"), raw: body })
    }

    fn verify_notification(&self, payload: &Map<String, Value>) -> bool {
        super::verify_notification(payload, &self.config.password)
    }
}
