use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Customer, Invoice, LineItem, MISSING_FIELD_PLACEHOLDER};

/// Hard validation failures raised while normalizing an order payload.
///
/// These are the only two conditions that reject a payload. Every other
/// defect (missing optional fields, unparseable numbers) is silently
/// defaulted: document generation must never abort on a single malformed
/// field.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("payload is missing the order object")]
    MissingOrder,
    #[error("no usable order identifier found in payload")]
    MissingOrderId,
}

/// Which historical payload shape the incoming order uses. The upstream
/// producer changed over the life of the system, so both shapes remain in
/// the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadShape {
    /// `order.shipping_address.*` + `order.line_items[]` with `title` fields.
    Modern,
    /// `order.customer.*` + `order.products[]` with `name` fields.
    Legacy,
}

impl PayloadShape {
    fn probe(order: &Value) -> Self {
        if order.get("line_items").is_some() || order.get("shipping_address").is_some() {
            Self::Modern
        } else {
            Self::Legacy
        }
    }
}

/// Deterministic normalizer transforming raw order JSON into [`Invoice`] values.
pub struct Normalizer;

impl Normalizer {
    /// Converts a raw webhook payload into a canonical [`Invoice`].
    ///
    /// `received_at` supplies the order-date fallback when the payload
    /// carries no parseable date, keeping the function free of wall-clock
    /// reads.
    pub fn normalize(payload: &Value, received_at: DateTime<Utc>) -> Result<Invoice, NormalizeError> {
        let order = payload
            .get("order")
            .filter(|value| value.is_object())
            .ok_or(NormalizeError::MissingOrder)?;
        let order_id = Self::order_id(payload, order).ok_or(NormalizeError::MissingOrderId)?;

        let shape = PayloadShape::probe(order);
        let customer = match shape {
            PayloadShape::Modern => customer_block(order.get("shipping_address")),
            PayloadShape::Legacy => customer_block(order.get("customer")),
        };
        let line_items = match shape {
            PayloadShape::Modern => item_rows(order.get("line_items"), "title"),
            PayloadShape::Legacy => item_rows(order.get("products"), "name"),
        };

        let amounts = order.get("amounts");
        let subtotal = pick_money(amounts, &["item_total", "subtotal"]);
        let grand_total = {
            let from_amounts = pick_money(amounts, &["grand_total"]);
            if from_amounts > 0.0 {
                from_amounts
            } else {
                money_or_zero(order.get("amount"))
            }
        };
        let discount = pick_money(amounts, &["discount"]);

        Ok(Invoice {
            order_id,
            order_date: order_date(order, received_at),
            customer,
            line_items,
            subtotal,
            grand_total,
            discount,
            payment_status: opt_string(order.get("payment_status"))
                .or_else(|| opt_string(order.get("status"))),
            note: opt_string(order.get("note")),
            custom_fields: custom_fields(order.get("custom_fields")),
        })
    }

    /// Resolves the order identifier among the accepted locations, in
    /// precedence order: top-level `id`, `order.id`, `order.order_id`,
    /// `order.uuid`.
    pub fn order_id(payload: &Value, order: &Value) -> Option<String> {
        scalar_id(payload.get("id"))
            .or_else(|| scalar_id(order.get("id")))
            .or_else(|| scalar_id(order.get("order_id")))
            .or_else(|| scalar_id(order.get("uuid")))
    }

    /// Best-effort identifier extraction for audit logging. Unlike
    /// [`Normalizer::normalize`] this never fails; it returns `None` when the
    /// payload holds no recognizable id.
    pub fn order_id_hint(payload: &Value) -> Option<String> {
        match payload.get("order") {
            Some(order) => Self::order_id(payload, order),
            None => scalar_id(payload.get("id")),
        }
    }
}

/// Accepts a JSON string or number as an identifier. Upstream systems have
/// emitted both `"21413494"` and `21413494` over time.
fn scalar_id(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// Best-effort monetary parse: numbers and numeric strings pass through,
/// everything else becomes zero. Negative values are clamped.
fn money_or_zero(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed.max(0.0)
    } else {
        0.0
    }
}

/// Best-effort quantity parse with the same silent-to-zero policy.
fn quantity_or_zero(value: Option<&Value>) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<u64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
        }
        _ => None,
    };
    parsed.map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX))
}

fn pick_money(container: Option<&Value>, keys: &[&str]) -> f64 {
    let Some(container) = container else {
        return 0.0;
    };
    for key in keys {
        if let Some(value) = container.get(key) {
            let parsed = money_or_zero(Some(value));
            if parsed > 0.0 {
                return parsed;
            }
        }
    }
    0.0
}

fn customer_block(block: Option<&Value>) -> Customer {
    let Some(block) = block else {
        return Customer::default();
    };
    Customer {
        name: opt_string(block.get("name"))
            .unwrap_or_else(|| MISSING_FIELD_PLACEHOLDER.to_string()),
        phone: opt_string(block.get("phone")),
        email: opt_string(block.get("email")),
        address: opt_string(block.get("address")),
    }
}

fn item_rows(items: Option<&Value>, title_key: &str) -> Vec<LineItem> {
    let Some(Value::Array(items)) = items else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| LineItem {
            title: opt_string(item.get(title_key))
                .unwrap_or_else(|| "Unknown Product".to_string()),
            quantity: quantity_or_zero(item.get("quantity")),
            unit_price: money_or_zero(item.get("price")),
        })
        .collect()
}

fn custom_fields(value: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(map)) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

/// Parses the order date from `order_date` or `created_at`, accepting
/// RFC3339 timestamps and bare `YYYY-MM-DD` dates. Anything else falls back
/// to the receive time.
fn order_date(order: &Value, received_at: DateTime<Utc>) -> DateTime<Utc> {
    let raw = opt_string(order.get("order_date")).or_else(|| opt_string(order.get("created_at")));
    let Some(raw) = raw else {
        return received_at;
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return midnight.and_utc();
        }
    }
    received_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 25, 12, 0, 0).unwrap()
    }

    fn legacy_payload() -> Value {
        json!({
            "order": {
                "order_id": "21413494",
                "order_date": "2025-09-25",
                "status": "Paid",
                "customer": {
                    "name": "Subramanian RV",
                    "phone": "+91-908977378",
                    "email": "customer@example.com",
                    "address": "17E Petals Apartment, Medavakkam"
                },
                "products": [
                    {"name": "Portulaca Plant", "price": 30, "quantity": 1},
                    {"name": "Jasmine Plant", "price": "95", "quantity": "2"}
                ],
                "amounts": {
                    "item_total": 370,
                    "grand_total": 440,
                    "discount": 77.29
                }
            }
        })
    }

    fn modern_payload() -> Value {
        json!({
            "order": {
                "uuid": "21413494",
                "created_at": "2025-09-25T00:00:00Z",
                "payment_status": "Paid",
                "shipping_address": {
                    "name": "Subramanian RV",
                    "phone": "+91-908977378",
                    "email": "customer@example.com",
                    "address": "17E Petals Apartment, Medavakkam"
                },
                "line_items": [
                    {"title": "Portulaca Plant", "price": "30", "quantity": 1},
                    {"title": "Jasmine Plant", "price": 95, "quantity": 2}
                ],
                "amounts": {
                    "subtotal": "370",
                    "grand_total": "440",
                    "discount": "77.29"
                }
            }
        })
    }

    #[test]
    fn rejects_payload_without_order() {
        let err = Normalizer::normalize(&json!({"id": "1"}), received_at()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingOrder));
    }

    #[test]
    fn rejects_payload_without_any_identifier() {
        let payload = json!({"order": {"customer": {"name": "A"}}});
        let err = Normalizer::normalize(&payload, received_at()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingOrderId));
    }

    #[test]
    fn top_level_id_takes_precedence() {
        let payload = json!({
            "id": "outer",
            "order": {"id": "inner", "order_id": "older", "uuid": "oldest"}
        });
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.order_id, "outer");
    }

    #[test]
    fn identifier_fallback_chain_is_ordered() {
        let payload = json!({"order": {"order_id": "from-order-id", "uuid": "from-uuid"}});
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.order_id, "from-order-id");

        let payload = json!({"order": {"uuid": "from-uuid"}});
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.order_id, "from-uuid");
    }

    #[test]
    fn numeric_identifiers_are_accepted() {
        let payload = json!({"order": {"id": 21413494}});
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.order_id, "21413494");
    }

    #[test]
    fn legacy_and_modern_shapes_normalize_identically() {
        let legacy = Normalizer::normalize(&legacy_payload(), received_at()).expect("legacy");
        let modern = Normalizer::normalize(&modern_payload(), received_at()).expect("modern");
        assert_eq!(legacy, modern);
    }

    #[test]
    fn modern_shape_wins_when_both_are_present() {
        let payload = json!({
            "order": {
                "id": "1",
                "customer": {"name": "Legacy Name"},
                "shipping_address": {"name": "Modern Name"},
                "products": [{"name": "Legacy Item", "price": 1, "quantity": 1}],
                "line_items": [{"title": "Modern Item", "price": 2, "quantity": 1}]
            }
        });
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.customer.name, "Modern Name");
        assert_eq!(invoice.line_items[0].title, "Modern Item");
    }

    #[test]
    fn malformed_numbers_default_to_zero() {
        let payload = json!({
            "order": {
                "id": "1",
                "products": [
                    {"name": "A", "price": "not-a-number", "quantity": "many"},
                    {"name": "B", "price": -5, "quantity": -2}
                ],
                "amounts": {"item_total": "abc", "grand_total": {"nested": true}}
            }
        });
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.line_items[0].unit_price, 0.0);
        assert_eq!(invoice.line_items[0].quantity, 0);
        assert_eq!(invoice.line_items[1].unit_price, 0.0);
        assert_eq!(invoice.line_items[1].quantity, 0);
        assert_eq!(invoice.subtotal, 0.0);
        assert_eq!(invoice.grand_total, 0.0);
    }

    #[test]
    fn missing_customer_defaults_to_placeholder() {
        let payload = json!({"order": {"id": "1"}});
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.customer.name, MISSING_FIELD_PLACEHOLDER);
        assert!(invoice.customer.phone.is_none());
        assert!(invoice.line_items.is_empty());
    }

    #[test]
    fn unparseable_date_falls_back_to_receive_time() {
        let payload = json!({"order": {"id": "1", "order_date": "sometime last week"}});
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.order_date, received_at());
    }

    #[test]
    fn grand_total_falls_back_to_order_amount() {
        let payload = json!({"order": {"id": "1", "amount": 440.5}});
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.grand_total, 440.5);
    }

    #[test]
    fn custom_fields_stringify_scalars_only() {
        let payload = json!({
            "order": {
                "id": "1",
                "custom_fields": {
                    "gift_wrap": true,
                    "slot": 7,
                    "message": "Happy birthday",
                    "nested": {"ignored": true}
                }
            }
        });
        let invoice = Normalizer::normalize(&payload, received_at()).expect("normalize");
        assert_eq!(invoice.custom_fields.len(), 3);
        assert!(invoice
            .custom_fields
            .iter()
            .any(|(k, v)| k == "message" && v == "Happy birthday"));
        assert!(invoice.custom_fields.iter().any(|(k, v)| k == "slot" && v == "7"));
    }

    #[test]
    fn order_id_hint_never_fails() {
        assert_eq!(Normalizer::order_id_hint(&json!({})), None);
        assert_eq!(
            Normalizer::order_id_hint(&json!({"id": "top"})),
            Some("top".to_string())
        );
        assert_eq!(
            Normalizer::order_id_hint(&json!({"order": {"order_id": 7}})),
            Some("7".to_string())
        );
    }
}
