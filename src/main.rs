//! Storefront checkout service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_checkout::gateway::HmacGateway;
use storefront_checkout::http::router;
use storefront_checkout::ports::{AddressBook, Catalog};
use storefront_checkout::publisher::EventPublisher;
use storefront_checkout::services::Context;
use storefront_checkout::store::{MemoryAddressBook, MemoryCatalog, MemoryStore, PgAddressBook, PgCatalog, PgStore, Store};
use storefront_checkout::{AppConfig, Storefront};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;
    info!(?config, "configuration loaded");

    let (store, catalog, addresses): (Arc<dyn Store>, Arc<dyn Catalog>, Arc<dyn AddressBook>) = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let store = PgStore::new(db.clone());
            store.migrate().await?;
            (Arc::new(store), Arc::new(PgCatalog::new(db.clone())), Arc::new(PgAddressBook::new(db)))
        }
        None => {
            warn!("DATABASE_URL not set, keeping carts and orders in memory");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryCatalog::new()), Arc::new(MemoryAddressBook::new()))
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "NATS unavailable, events will only be logged");
                None
            }
        },
        None => None,
    };

    let ctx = Context::new(store, catalog, addresses, Arc::new(HmacGateway::new(config.gateway_secret.clone())))
        .with_events(EventPublisher::new(nats, config.event_subject_prefix.clone()))
        .with_settings(config.service_settings());
    let app = router(Arc::new(Storefront::new(ctx)));

    let addr = format!("0.0.0.0:{}", config.port);
    info!("storefront checkout listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
