use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used wherever upstream data omits a customer-facing string.
pub const MISSING_FIELD_PLACEHOLDER: &str = "N/A";

/// Canonical normalized record describing one order's billing details,
/// ready for rendering.
///
/// An `Invoice` is constructed fresh per webhook call or per portal lookup,
/// never mutated afterwards, and discarded once the renderer has consumed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Order identifier; unique per invoice and the source of the output
    /// filename and portal lookups.
    pub order_id: String,
    pub order_date: DateTime<Utc>,
    pub customer: Customer,
    /// Insertion order is display order; an empty list is valid.
    pub line_items: Vec<LineItem>,
    pub subtotal: f64,
    pub grand_total: f64,
    #[serde(default)]
    pub discount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<(String, String)>,
}

impl Invoice {
    /// Delivery charge derived from the totals. Upstream data does not
    /// guarantee `grand_total >= subtotal`, so the difference is clamped at
    /// zero rather than ever reporting a negative fee.
    pub fn delivery_fee(&self) -> f64 {
        (self.grand_total - self.subtotal).max(0.0)
    }
}

/// Billing recipient details; everything except the name is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Default for Customer {
    fn default() -> Self {
        Self {
            name: MISSING_FIELD_PLACEHOLDER.to_string(),
            phone: None,
            email: None,
            address: None,
        }
    }
}

/// One product/quantity/price row within an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub title: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl LineItem {
    /// Row amount as displayed in the rightmost table column.
    pub fn amount(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn invoice(subtotal: f64, grand_total: f64) -> Invoice {
        Invoice {
            order_id: "1".to_string(),
            order_date: Utc.with_ymd_and_hms(2025, 9, 25, 0, 0, 0).unwrap(),
            customer: Customer::default(),
            line_items: Vec::new(),
            subtotal,
            grand_total,
            discount: 0.0,
            payment_status: None,
            note: None,
            custom_fields: Vec::new(),
        }
    }

    #[test]
    fn delivery_fee_is_total_difference() {
        assert_eq!(invoice(370.0, 440.0).delivery_fee(), 70.0);
    }

    #[test]
    fn delivery_fee_clamps_at_zero() {
        // grand_total < subtotal occurs in real payloads; never show -100.
        assert_eq!(invoice(500.0, 400.0).delivery_fee(), 0.0);
    }

    #[test]
    fn line_item_amount_multiplies_quantity() {
        let item = LineItem {
            title: "Jasmine Plant".to_string(),
            quantity: 2,
            unit_price: 95.0,
        };
        assert_eq!(item.amount(), 190.0);
    }
}
