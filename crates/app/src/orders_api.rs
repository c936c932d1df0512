use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::error;

use orderdesk_core::types::Invoice;
use orderdesk_storage::OrderSummary;

use crate::reply::ApiReply;
use crate::router::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

/// Portal lookup response: the stored canonical invoice plus the static URL
/// of its generated PDF.
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    success: bool,
    order: Invoice,
    invoice_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct OrderListBody {
    success: bool,
    orders: Vec<OrderListEntry>,
}

#[derive(Debug, Serialize)]
struct OrderListEntry {
    order_id: String,
    order_date: DateTime<Utc>,
    customer_name: String,
    grand_total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_status: Option<String>,
    received_at: DateTime<Utc>,
}

impl From<OrderSummary> for OrderListEntry {
    fn from(summary: OrderSummary) -> Self {
        Self {
            order_id: summary.order_id,
            order_date: summary.order_date,
            customer_name: summary.customer_name,
            grand_total: summary.grand_total,
            payment_status: summary.payment_status,
            received_at: summary.received_at,
        }
    }
}

/// `GET /api/orders/:order_id`: exact-match portal lookup.
pub async fn lookup(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderDetail>, ApiReply> {
    match state.storage().orders().fetch(&order_id).await {
        Ok(Some(stored)) => {
            counter!("api_order_requests_total", "result" => "found").increment(1);
            Ok(Json(OrderDetail {
                success: true,
                invoice_url: format!("/invoices/{}", stored.invoice_file),
                order: stored.invoice,
            }))
        }
        Ok(None) => {
            counter!("api_order_requests_total", "result" => "not_found").increment(1);
            Err(ApiReply::failure(
                StatusCode::NOT_FOUND,
                "Order not found. Please check the order ID and try again.",
            ))
        }
        Err(err) => {
            counter!("api_order_requests_total", "result" => "error").increment(1);
            error!(stage = "api", order_id = %order_id, error = %err, "failed to load order");
            Err(ApiReply::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to load order",
            ))
        }
    }
}

/// `GET /api/orders?q=&limit=`: dashboard listing, newest first, optionally
/// filtered by order id or customer name.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<OrderListBody>, ApiReply> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    match state.storage().orders().search(query.q.as_deref(), limit).await {
        Ok(orders) => Ok(Json(OrderListBody {
            success: true,
            orders: orders.into_iter().map(OrderListEntry::from).collect(),
        })),
        Err(err) => {
            error!(stage = "api", error = %err, "failed to list orders");
            Err(ApiReply::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to list orders",
            ))
        }
    }
}

/// `GET /api/orders/:order_id/invoice`: re-renders the stored invoice and
/// streams the PDF for on-demand download.
pub async fn download(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Response, ApiReply> {
    let stored = match state.storage().orders().fetch(&order_id).await {
        Ok(Some(stored)) => stored,
        Ok(None) => {
            counter!("api_order_requests_total", "result" => "not_found").increment(1);
            return Err(ApiReply::failure(
                StatusCode::NOT_FOUND,
                "Order not found. Please check the order ID and try again.",
            ));
        }
        Err(err) => {
            counter!("api_order_requests_total", "result" => "error").increment(1);
            error!(stage = "api", order_id = %order_id, error = %err, "failed to load order");
            return Err(ApiReply::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to load order",
            ));
        }
    };

    let rendered = state.renderer().render(&stored.invoice).map_err(|err| {
        error!(stage = "render", order_id = %order_id, error = %err, "failed to render invoice for download");
        ApiReply::failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to render invoice",
        )
    })?;

    counter!("api_order_requests_total", "result" => "found").increment(1);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", rendered.filename),
        )
        .body(Body::from(rendered.bytes))
        .map_err(|err| {
            error!(stage = "api", order_id = %order_id, error = %err, "failed to build download response");
            ApiReply::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to build download response",
            )
        })
}
