use std::{path::Path, time::Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use metrics::{counter, histogram};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use uuid::Uuid;

use orderdesk_core::normalizer::Normalizer;
use orderdesk_storage::{NewOrder, NewWebhookEvent};

use crate::reply::ApiReply;
use crate::router::AppState;

const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

/// `POST /webhook`: validates the request, normalizes the order payload,
/// renders the invoice PDF and persists both the file and the order record.
pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiReply {
    let start = Instant::now();
    let (result_label, reply) = match process(&state, &headers, &body).await {
        Ok(reply) => ("ok", reply),
        Err(failure) => (failure.label, failure.reply),
    };

    counter!("webhook_requests_total", "result" => result_label).increment(1);
    histogram!("webhook_ack_latency_seconds").record(start.elapsed().as_secs_f64());
    reply
}

/// Failed webhook processing step, carrying the metric label for the result.
struct Failure {
    label: &'static str,
    reply: ApiReply,
}

impl Failure {
    fn new<S: Into<String>>(label: &'static str, status: StatusCode, message: S) -> Self {
        Self {
            label,
            reply: ApiReply::failure(status, message),
        }
    }
}

async fn process(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<ApiReply, Failure> {
    require_json_content_type(headers)?;
    verify_signature_if_configured(state, headers, body)?;

    let payload: Value = serde_json::from_slice(body).map_err(|err| {
        Failure::new(
            "rejected",
            StatusCode::BAD_REQUEST,
            format!("invalid JSON payload: {err}"),
        )
    })?;

    let received_at = state.now();
    audit_payload(state, &payload, body, received_at).await;

    let invoice = Normalizer::normalize(&payload, received_at).map_err(|err| {
        warn!(stage = "normalizer", error = %err, "rejected webhook payload");
        Failure::new("rejected", StatusCode::BAD_REQUEST, format!("Invalid payload: {err}."))
    })?;

    let render_start = Instant::now();
    let rendered = state.renderer().render(&invoice).map_err(|err| {
        error!(stage = "render", order_id = %invoice.order_id, error = %err, "failed to render invoice");
        Failure::new(
            "error",
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to render invoice: {err}"),
        )
    })?;
    histogram!("invoice_render_seconds").record(render_start.elapsed().as_secs_f64());

    write_invoice_file(state.invoice_dir(), &rendered.filename, &rendered.bytes)
        .await
        .map_err(|err| {
            error!(stage = "render", order_id = %invoice.order_id, error = %err, "failed to write invoice file");
            Failure::new(
                "error",
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to write invoice: {err}"),
            )
        })?;

    let outcome = state
        .storage()
        .orders()
        .upsert(NewOrder {
            invoice: &invoice,
            invoice_file: &rendered.filename,
            received_at,
        })
        .await
        .map_err(|err| {
            error!(stage = "storage", order_id = %invoice.order_id, error = %err, "failed to persist order");
            Failure::new(
                "error",
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to persist order: {err}"),
            )
        })?;

    counter!("invoices_rendered_total").increment(1);
    info!(
        stage = "ingress",
        order_id = %invoice.order_id,
        pages = rendered.pages,
        bytes = rendered.bytes.len(),
        replaced = outcome.is_replaced(),
        "invoice generated"
    );

    Ok(ApiReply::ok("Invoice created successfully."))
}

fn require_json_content_type(headers: &HeaderMap) -> Result<(), Failure> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or("").trim().to_ascii_lowercase());

    match content_type.as_deref() {
        Some("application/json") => Ok(()),
        _ => Err(Failure::new(
            "rejected",
            StatusCode::BAD_REQUEST,
            "request content type must be application/json",
        )),
    }
}

fn verify_signature_if_configured(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), Failure> {
    let Some(secret) = state.webhook_secret() else {
        return Ok(());
    };

    let provided = headers
        .get(HEADER_SIGNATURE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            counter!("webhook_invalid_signature_total").increment(1);
            Failure::new(
                "invalid_signature",
                StatusCode::FORBIDDEN,
                "missing webhook signature",
            )
        })?;

    verify_signature(&secret, body, provided).map_err(|detail| {
        counter!("webhook_invalid_signature_total").increment(1);
        warn!(stage = "ingress", error = %detail, "rejected webhook signature");
        Failure::new("invalid_signature", StatusCode::FORBIDDEN, detail)
    })
}

fn verify_signature(secret: &[u8], body: &[u8], provided: &str) -> Result<(), String> {
    let provided_bytes =
        hex::decode(provided.trim()).map_err(|_| "signature is not valid hex".to_string())?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| "failed to initialize signature verifier".to_string())?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_bytes: &[u8] = expected.as_ref();

    if expected_bytes.ct_eq(provided_bytes.as_slice()).into() {
        Ok(())
    } else {
        Err("signature mismatch".to_string())
    }
}

/// Appends the raw payload to the audit log so rejected or failed deliveries
/// can be reprocessed by hand. Audit failures do not block invoice generation.
async fn audit_payload(state: &AppState, payload: &Value, body: &[u8], received_at: chrono::DateTime<chrono::Utc>) {
    let order_id = Normalizer::order_id_hint(payload);
    let id = Uuid::new_v4().to_string();
    let body_string = String::from_utf8_lossy(body);

    let record = NewWebhookEvent {
        id: &id,
        order_id: order_id.as_deref(),
        payload_json: body_string.as_ref(),
        received_at,
    };
    if let Err(err) = state.storage().webhook_events().insert(record).await {
        warn!(stage = "storage", error = %err, "failed to append webhook audit log");
    }
}

/// Writes the document under a temporary name in the target directory and
/// renames into place; a failed write leaves no partial invoice behind.
async fn write_invoice_file(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = dir.join(format!("{filename}.tmp"));
    let final_path = dir.join(filename);

    tokio::fs::write(&tmp_path, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp_path, &final_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{HeaderValue, Method, Request, StatusCode},
        response::Response,
    };
    use chrono::{DateTime, Utc};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::router::{app_router, AppState};
    use crate::telemetry;
    use orderdesk_render::{InvoiceRenderer, MerchantInfo};
    use orderdesk_storage::Database;

    const FIXED_NOW: &str = "2025-09-25T12:00:00Z";

    struct TestContext {
        state: AppState,
        invoice_dir: TempDir,
    }

    async fn setup_context(secret: Option<&str>) -> TestContext {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        let invoice_dir = TempDir::new().expect("tempdir");
        let now: DateTime<Utc> = FIXED_NOW.parse().expect("fixed time");
        let state = AppState::new(
            metrics,
            database,
            InvoiceRenderer::new(MerchantInfo::default()),
            invoice_dir.path().to_path_buf(),
            secret.map(|value| value.as_bytes().to_vec()),
        )
        .with_clock(Arc::new(move || now));

        TestContext { state, invoice_dir }
    }

    fn legacy_body() -> String {
        json!({
            "order": {
                "order_id": "21413494",
                "order_date": "2025-09-25",
                "status": "Paid",
                "customer": {
                    "name": "Subramanian RV",
                    "phone": "+91-908977378",
                    "address": "17E Petals Apartment, Medavakkam"
                },
                "products": [
                    {"name": "Portulaca Plant", "price": 30, "quantity": 1},
                    {"name": "Jasmine Plant", "price": 95, "quantity": 2}
                ],
                "amounts": {"item_total": 370, "grand_total": 440, "discount": 77.29}
            }
        })
        .to_string()
    }

    async fn post_webhook(
        state: AppState,
        body: String,
        content_type: Option<&str>,
        signature: Option<String>,
    ) -> Response {
        let mut request = Request::builder().method(Method::POST).uri("/webhook");
        if let Some(content_type) = content_type {
            request = request.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(signature) = signature {
            request = request.header(
                HEADER_SIGNATURE,
                HeaderValue::from_str(&signature).expect("signature header"),
            );
        }
        let request = request.body(Body::from(body)).expect("request");

        app_router(state).oneshot(request).await.expect("response")
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let collected = response.into_body().collect().await.expect("body");
        serde_json::from_slice(&collected.to_bytes()).expect("json body")
    }

    fn sign(secret: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn webhook_generates_invoice_and_persists_order() {
        let ctx = setup_context(None).await;

        let response = post_webhook(
            ctx.state.clone(),
            legacy_body(),
            Some("application/json"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["success"], true);

        let pdf = std::fs::read(ctx.invoice_dir.path().join("invoice_21413494.pdf"))
            .expect("invoice file written");
        assert!(pdf.starts_with(b"%PDF"));

        let stored = ctx
            .state
            .storage()
            .orders()
            .fetch("21413494")
            .await
            .expect("fetch")
            .expect("order persisted");
        assert_eq!(stored.invoice.grand_total, 440.0);
        assert_eq!(stored.invoice.line_items.len(), 2);
        assert_eq!(stored.invoice_file, "invoice_21413494.pdf");
    }

    #[tokio::test]
    async fn missing_order_object_is_rejected() {
        let ctx = setup_context(None).await;

        let response = post_webhook(
            ctx.state.clone(),
            json!({"id": "21413494"}).to_string(),
            Some("application/json"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn missing_identifier_is_rejected() {
        let ctx = setup_context(None).await;

        let response = post_webhook(
            ctx.state.clone(),
            json!({"order": {"customer": {"name": "A"}}}).to_string(),
            Some("application/json"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_json_is_rejected() {
        let ctx = setup_context(None).await;

        let response = post_webhook(
            ctx.state.clone(),
            "{not json".to_string(),
            Some("application/json"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_content_type_is_rejected() {
        let ctx = setup_context(None).await;

        let response =
            post_webhook(ctx.state.clone(), legacy_body(), Some("text/plain"), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_post_methods_are_rejected() {
        let ctx = setup_context(None).await;

        let response = app_router(ctx.state.clone())
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/webhook")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn redelivery_replaces_order_and_overwrites_invoice() {
        let ctx = setup_context(None).await;

        let first = post_webhook(
            ctx.state.clone(),
            legacy_body(),
            Some("application/json"),
            None,
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = post_webhook(
            ctx.state.clone(),
            legacy_body(),
            Some("application/json"),
            None,
        )
        .await;
        assert_eq!(second.status(), StatusCode::OK);

        let audit_count = ctx
            .state
            .storage()
            .webhook_events()
            .count_for_order("21413494")
            .await
            .expect("count");
        assert_eq!(audit_count, 2);

        assert!(ctx
            .invoice_dir
            .path()
            .join("invoice_21413494.pdf")
            .exists());
    }

    #[tokio::test]
    async fn signature_is_required_when_secret_configured() {
        let ctx = setup_context(Some("test-secret")).await;

        let response = post_webhook(
            ctx.state.clone(),
            legacy_body(),
            Some("application/json"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = post_webhook(
            ctx.state.clone(),
            legacy_body(),
            Some("application/json"),
            Some("deadbeef".to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn valid_signature_is_accepted() {
        let ctx = setup_context(Some("test-secret")).await;
        let body = legacy_body();
        let signature = sign("test-secret", &body);

        let response = post_webhook(
            ctx.state.clone(),
            body,
            Some("application/json"),
            Some(signature),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
