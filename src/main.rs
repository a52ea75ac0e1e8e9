//! Plumbing storefront service

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plumbing_storefront::domain::events::EventPublisher;
use plumbing_storefront::notify::TelegramNotifier;
use plumbing_storefront::payment::{PaymentGateway, TinkoffClient};
use plumbing_storefront::store::{MemoryStore, PgStore, Store};
use plumbing_storefront::{router, AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => {
            let pg = PgStore::connect(url, config.database_max_connections).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, using in-memory storage");
            Arc::new(MemoryStore::new())
        }
    };

    let nats = match config.nats_url.as_deref() {
        Some(url) => async_nats::connect(url).await
            .map_err(|e| tracing::warn!(error = %e, "NATS unavailable, events will not be published"))
            .ok(),
        None => None,
    };

    let gateway = config.tinkoff().map(|c| Arc::new(TinkoffClient::new(c)) as Arc<dyn PaymentGateway>);
    if gateway.is_none() {
        tracing::warn!("Tinkoff credentials are not set, card payments are disabled");
    }
    let notifier = TelegramNotifier::new(config.telegram_bot_token.clone(), config.telegram_admin_chats.clone());

    let port = config.port;
    let state = AppState { store, gateway, notifier, events: EventPublisher::new(nats), config: Arc::new(config) };
    let app = router(state);

    tracing::info!("Plumbing storefront listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}
