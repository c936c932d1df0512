use std::{path::PathBuf, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::services::ServeDir;

use orderdesk_render::InvoiceRenderer;
use orderdesk_storage::Database;

use crate::{orders_api, telemetry, webhook};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    renderer: Arc<InvoiceRenderer>,
    invoice_dir: Arc<PathBuf>,
    webhook_secret: Option<Arc<[u8]>>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        renderer: InvoiceRenderer,
        invoice_dir: PathBuf,
        webhook_secret: Option<Vec<u8>>,
    ) -> Self {
        Self {
            metrics,
            storage,
            renderer: Arc::new(renderer),
            invoice_dir: Arc::new(invoice_dir),
            webhook_secret: webhook_secret.map(|secret| Arc::from(secret.into_boxed_slice())),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn renderer(&self) -> &InvoiceRenderer {
        &self.renderer
    }

    pub fn invoice_dir(&self) -> &PathBuf {
        &self.invoice_dir
    }

    pub fn webhook_secret(&self) -> Option<Arc<[u8]>> {
        self.webhook_secret.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    // Generated PDFs are served read-only from the invoice directory.
    let invoices = ServeDir::new(state.invoice_dir().as_path());

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/webhook", post(webhook::handle))
        .route("/api/orders", get(orders_api::list))
        .route("/api/orders/:order_id", get(orders_api::lookup))
        .route("/api/orders/:order_id/invoice", get(orders_api::download))
        .nest_service("/invoices", invoices)
        .with_state(state)
}

/// Liveness probe for uptime monitors; `get` also answers HEAD requests.
async fn root() -> &'static str {
    "Server is alive and running!"
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}
