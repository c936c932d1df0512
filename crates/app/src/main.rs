mod orders_api;
mod reply;
mod router;
mod telemetry;
mod webhook;

use std::net::SocketAddr;

use tracing::info;

use orderdesk_render::{InvoiceRenderer, MerchantInfo};
use orderdesk_storage::Database;
use orderdesk_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;

    tokio::fs::create_dir_all(&config.invoice_dir).await?;

    let renderer = InvoiceRenderer::new(merchant_info(&config)?);
    let state = router::AppState::new(
        metrics,
        storage,
        renderer,
        config.invoice_dir.clone(),
        config
            .webhook_secret
            .as_ref()
            .map(|secret| secret.as_bytes().to_vec()),
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}

fn merchant_info(config: &AppConfig) -> Result<MerchantInfo, String> {
    let timezone: chrono_tz::Tz = config
        .merchant
        .timezone
        .parse()
        .map_err(|err| format!("invalid MERCHANT_TIMEZONE: {err}"))?;

    Ok(MerchantInfo {
        name: config.merchant.name.clone(),
        address_lines: config
            .merchant
            .address
            .split('|')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect(),
        tax_id: config.merchant.tax_id.clone(),
        email: config.merchant.email.clone(),
        phone: config.merchant.phone.clone(),
        currency_prefix: config.merchant.currency_prefix.clone(),
        timezone,
    })
}
