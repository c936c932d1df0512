use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, Row, SqlitePool};
use thiserror::Error;

use orderdesk_core::types::{Customer, Invoice, LineItem};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to interact with stored orders.
    pub fn orders(&self) -> OrderRepository {
        OrderRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the raw webhook payload audit log.
    pub fn webhook_events(&self) -> WebhookEventRepository {
        WebhookEventRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository responsible for the `orders` table.
#[derive(Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Persists a normalized order. Webhook redeliveries for the same order
    /// id replace the existing row.
    pub async fn upsert(&self, record: NewOrder<'_>) -> Result<OrderUpsertOutcome, OrderError> {
        let invoice = record.invoice;
        let line_items_json = serde_json::to_string(&invoice.line_items)?;
        let custom_fields_json = serde_json::to_string(&invoice.custom_fields)?;

        let insert = sqlx::query(
            "INSERT INTO orders \
             (order_id, order_date, customer_name, customer_phone, customer_email, customer_address, \
              subtotal, grand_total, discount, payment_status, note, custom_fields_json, \
              line_items_json, invoice_file, received_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&invoice.order_id)
        .bind(to_rfc3339(invoice.order_date))
        .bind(&invoice.customer.name)
        .bind(&invoice.customer.phone)
        .bind(&invoice.customer.email)
        .bind(&invoice.customer.address)
        .bind(invoice.subtotal)
        .bind(invoice.grand_total)
        .bind(invoice.discount)
        .bind(&invoice.payment_status)
        .bind(&invoice.note)
        .bind(&custom_fields_json)
        .bind(&line_items_json)
        .bind(record.invoice_file)
        .bind(to_rfc3339(record.received_at))
        .bind(to_rfc3339(record.received_at))
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok(OrderUpsertOutcome::Created),
            Err(sqlx::Error::Database(db_err))
                if matches!(db_err.code().as_deref(), Some("1555") | Some("2067")) =>
            {
                sqlx::query(
                    "UPDATE orders SET \
                     order_date = ?, customer_name = ?, customer_phone = ?, customer_email = ?, \
                     customer_address = ?, subtotal = ?, grand_total = ?, discount = ?, \
                     payment_status = ?, note = ?, custom_fields_json = ?, line_items_json = ?, \
                     invoice_file = ?, updated_at = ? \
                     WHERE order_id = ?",
                )
                .bind(to_rfc3339(invoice.order_date))
                .bind(&invoice.customer.name)
                .bind(&invoice.customer.phone)
                .bind(&invoice.customer.email)
                .bind(&invoice.customer.address)
                .bind(invoice.subtotal)
                .bind(invoice.grand_total)
                .bind(invoice.discount)
                .bind(&invoice.payment_status)
                .bind(&invoice.note)
                .bind(&custom_fields_json)
                .bind(&line_items_json)
                .bind(record.invoice_file)
                .bind(to_rfc3339(record.received_at))
                .bind(&invoice.order_id)
                .execute(&self.pool)
                .await
                .map_err(OrderError::Database)?;
                Ok(OrderUpsertOutcome::Replaced)
            }
            Err(err) => Err(OrderError::Database(err)),
        }
    }

    /// Exact-match lookup by order id.
    pub async fn fetch(&self, order_id: &str) -> Result<Option<StoredOrder>, OrderError> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(OrderError::Database)?;

        row.map(OrderRow::into_domain).transpose()
    }

    /// Lists stored orders newest-first, optionally filtered by a
    /// case-insensitive substring match on order id or customer name.
    pub async fn search(
        &self,
        filter: Option<&str>,
        limit: u32,
    ) -> Result<Vec<OrderSummary>, OrderError> {
        let pattern = filter
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| format!("%{value}%"));

        let rows = sqlx::query_as::<_, OrderSummary>(
            "SELECT order_id, order_date, customer_name, grand_total, payment_status, received_at \
             FROM orders \
             WHERE (?1 IS NULL OR order_id LIKE ?1 OR customer_name LIKE ?1) \
             ORDER BY received_at DESC \
             LIMIT ?2",
        )
        .bind(pattern)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(OrderError::Database)?;

        Ok(rows)
    }
}

/// Result of attempting to persist an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderUpsertOutcome {
    Created,
    Replaced,
}

impl OrderUpsertOutcome {
    pub fn is_replaced(self) -> bool {
        matches!(self, Self::Replaced)
    }
}

/// Data required to persist a normalized order.
pub struct NewOrder<'a> {
    pub invoice: &'a Invoice,
    pub invoice_file: &'a str,
    pub received_at: DateTime<Utc>,
}

/// Errors that can occur while reading or writing orders.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("failed to encode or decode stored order json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

/// A stored order together with its persistence metadata.
#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub invoice: Invoice,
    pub invoice_file: String,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    order_date: DateTime<Utc>,
    customer_name: String,
    customer_phone: Option<String>,
    customer_email: Option<String>,
    customer_address: Option<String>,
    subtotal: f64,
    grand_total: f64,
    discount: f64,
    payment_status: Option<String>,
    note: Option<String>,
    custom_fields_json: String,
    line_items_json: String,
    invoice_file: String,
    received_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    /// Converts the database row back into the canonical invoice.
    fn into_domain(self) -> Result<StoredOrder, OrderError> {
        let line_items: Vec<LineItem> = serde_json::from_str(&self.line_items_json)?;
        let custom_fields: Vec<(String, String)> = serde_json::from_str(&self.custom_fields_json)?;

        Ok(StoredOrder {
            invoice: Invoice {
                order_id: self.order_id,
                order_date: self.order_date,
                customer: Customer {
                    name: self.customer_name,
                    phone: self.customer_phone,
                    email: self.customer_email,
                    address: self.customer_address,
                },
                line_items,
                subtotal: self.subtotal,
                grand_total: self.grand_total,
                discount: self.discount,
                payment_status: self.payment_status,
                note: self.note,
                custom_fields,
            },
            invoice_file: self.invoice_file,
            received_at: self.received_at,
            updated_at: self.updated_at,
        })
    }
}

/// Dashboard-facing order listing row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderSummary {
    pub order_id: String,
    pub order_date: DateTime<Utc>,
    pub customer_name: String,
    pub grand_total: f64,
    pub payment_status: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Repository for the `webhook_events` audit table. Raw payloads are kept so
/// rejected or failed deliveries can be reprocessed by hand.
#[derive(Clone)]
pub struct WebhookEventRepository {
    pool: SqlitePool,
}

impl WebhookEventRepository {
    /// Inserts one received webhook payload.
    pub async fn insert(&self, record: NewWebhookEvent<'_>) -> Result<(), WebhookEventError> {
        sqlx::query(
            "INSERT INTO webhook_events (id, order_id, payload_json, received_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.order_id)
        .bind(record.payload_json)
        .bind(to_rfc3339(record.received_at))
        .execute(&self.pool)
        .await
        .map_err(WebhookEventError::Database)?;

        Ok(())
    }

    /// Counts stored payloads for an order id, mostly useful in tests and
    /// manual reprocessing sessions.
    pub async fn count_for_order(&self, order_id: &str) -> Result<i64, WebhookEventError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM webhook_events WHERE order_id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(WebhookEventError::Database)?;
        Ok(row.get("n"))
    }
}

/// Data required to append to the webhook audit log.
pub struct NewWebhookEvent<'a> {
    pub id: &'a str,
    /// `None` when the payload carried no recognizable identifier.
    pub order_id: Option<&'a str>,
    pub payload_json: &'a str,
    pub received_at: DateTime<Utc>,
}

/// Errors that can occur while appending to the webhook audit log.
#[derive(Debug, Error)]
pub enum WebhookEventError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
