//! Telegram notifications for shop administrators

use std::time::Duration;

use serde_json::json;

use crate::domain::aggregates::Order;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends HTML messages to every configured admin chat.
#[derive(Clone)]
pub struct TelegramNotifier {
    token: Option<String>,
    chats: Vec<String>,
    api_base: String,
    http: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(token: Option<String>, chats: Vec<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            token: token.filter(|t| !t.is_empty()),
            chats: chats.into_iter().map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect(),
            api_base: TELEGRAM_API.into(),
            http,
        }
    }

    /// Notifier that never sends anything.
    pub fn disabled() -> Self { Self::new(None, Vec::new()) }

    pub async fn notify_order(&self, order: &Order) {
        self.send_to_admins(&order_message(order)).await;
    }

    pub async fn notify_payment(&self, order: &Order) {
        self.send_to_admins(&payment_message(order)).await;
    }

    pub async fn send_to_admins(&self, text: &str) {
        for chat in &self.chats {
            self.send_to_chat(chat, text).await;
        }
    }

    /// Failures are logged and swallowed.
    pub async fn send_to_chat(&self, chat_id: &str, text: &str) -> bool {
        let Some(token) = &self.token else {
            tracing::error!("telegram token missing, message not sent");
            return false;
        };
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let body = json!({ "chat_id": chat_id, "text": text, "parse_mode": "HTML" });
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let response = resp.text().await.unwrap_or_default();
                tracing::error!(chat_id, %status, %response, "telegram send failed");
                false
            }
            Err(e) => {
                tracing::error!(chat_id, error = %e, "telegram request failed");
                false
            }
        }
    }
}

fn escape_html(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn line(out: &mut String, label: &str, value: &str) {
    out.push_str(&format!("<b>{label}:</b> {}\n", escape_html(value)));
}

pub fn order_message(order: &Order) -> String {
    let mut msg = String::from("🛒 <b>Новый заказ</b>\n\n");
    line(&mut msg, "Номер", &order.number);
    line(&mut msg, "Имя", &order.customer.first_name);
    line(&mut msg, "Фамилия", &order.customer.last_name);
    line(&mut msg, "Телефон", &order.customer.phone);
    line(&mut msg, "Email", &order.customer.email);
    line(&mut msg, "Сумма заказа", &order.total_price.to_string());
    line(&mut msg, "Статус", order.status.label());
    line(&mut msg, "Оплата", order.payment_method.label());
    line(&mut msg, "Доставка", order.delivery_method.label());
    if let Some(address) = order.delivery.one_line() {
        line(&mut msg, "Адрес", &address);
    }
    if let Some(comment) = &order.delivery.comment {
        line(&mut msg, "Комментарий к доставке", comment);
    }
    if let Some(comment) = &order.comment {
        line(&mut msg, "Комментарий к заказу", comment);
    }
    msg
}

pub fn payment_message(order: &Order) -> String {
    let p = &order.payment;
    let mut msg = String::from("💰 <b>Платеж</b>\n\n");
    line(&mut msg, "Номер", &order.number);
    line(&mut msg, "Оплата", order.payment_method.label());
    line(&mut msg, "Сумма", &order.total_price.to_string());
    line(&mut msg, "ID платежа", p.payment_id.as_deref().unwrap_or_default());
    line(&mut msg, "Статус платежа", p.payment_status.as_deref().unwrap_or_default());
    line(&mut msg, "URL платежа", p.payment_url.as_deref().unwrap_or_default());
    let data = p.payment_data.as_ref().map(|d| d.to_string()).unwrap_or_else(|| "null".into());
    msg.push_str(&format!("<b>Данные платежа:</b> <code>{}</code>\n", escape_html(&data)));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Customer, DeliveryAddress, DeliveryMethod, LineItem, NewOrder, PaymentMethod};
    use crate::domain::value_objects::Money;
    use rust_decimal::Decimal;

    fn order() -> Order {
        let price = Money::new(Decimal::new(123_450, 2));
        Order::place(NewOrder {
            customer: Customer { first_name: "Анна".into(), last_name: "<Смирнова>".into(), phone: "+7 900".into(), email: "a@b.ru".into() },
            items: vec![LineItem::new(1, "Смеситель", None, 1, price, price, None)],
            payment_method: PaymentMethod::Card,
            delivery_method: DeliveryMethod::Courier,
            delivery: DeliveryAddress { street: Some("Ленина".into()), house: Some("1".into()), ..Default::default() },
            comment: Some("позвонить заранее".into()),
            agreement: true,
        }).unwrap()
    }

    #[test]
    fn test_order_message() {
        let msg = order_message(&order());
        assert!(msg.starts_with("🛒 <b>Новый заказ</b>"));
        assert!(msg.contains("<b>Сумма заказа:</b> 1 234.50 ₽\n"));
        assert!(msg.contains("<b>Оплата:</b> Банковская карта\n"));
        assert!(msg.contains("<b>Адрес:</b> Челябинск, Ленина, д. 1\n"));
        assert!(msg.contains("&lt;Смирнова&gt;"));
        assert!(msg.contains("<b>Комментарий к заказу:</b> позвонить заранее\n"));
        assert!(!msg.contains("Комментарий к доставке"));
    }

    #[test]
    fn test_payment_message() {
        let mut o = order();
        o.payment.payment_id = Some("13660".into());
        o.payment.payment_status = Some("CONFIRMED".into());
        let msg = payment_message(&o);
        assert!(msg.contains("<b>ID платежа:</b> 13660\n"));
        assert!(msg.contains("<b>Данные платежа:</b> <code>null</code>"));
    }

    #[tokio::test]
    async fn test_missing_token_skips_send() {
        let notifier = TelegramNotifier::new(Some(String::new()), vec!["1".into()]);
        assert!(!notifier.send_to_chat("1", "hi").await);
    }
}
