//! Wire types for the subset of the marketplace API the core calls.
//!
//! The remote is tolerant-by-default here: prices arrive as numbers or
//! strings depending on the endpoint, and optional fields are simply
//! defaulted rather than failing the whole page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{CompetitorPricePoint, ListingRecord, OrderRecord};
use crate::money::{cents_from_major, Cents};

/// Accept `12.34`, `"12.34"` or missing.
fn de_price<'de, D>(deserializer: D) -> Result<Option<Cents>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_cents))
}

pub fn value_to_cents(value: &serde_json::Value) -> Option<Cents> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(cents_from_major),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(cents_from_major),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub results: Vec<RemoteListing>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteListing {
    #[serde(alias = "id")]
    pub listing_id: String,
    pub sku: String,
    #[serde(default)]
    pub grade: i32,
    #[serde(default, deserialize_with = "de_price")]
    pub price: Option<Cents>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default = "default_state")]
    pub publication_state: String,
    #[serde(default)]
    pub markets: Vec<RemoteMarket>,
}

fn default_currency() -> String {
    "EUR".to_string()
}

fn default_state() -> String {
    "active".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMarket {
    pub country_code: String,
    #[serde(default, deserialize_with = "de_price")]
    pub price: Option<Cents>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl RemoteListing {
    pub fn into_record(self, synced_at: DateTime<Utc>) -> ListingRecord {
        ListingRecord {
            listing_id: self.listing_id,
            sku: self.sku,
            grade: self.grade,
            price_cents: self.price.unwrap_or(0),
            currency: self.currency,
            quantity: self.quantity,
            publication_state: self.publication_state,
            last_probe_at: None,
            synced_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderPage {
    #[serde(default)]
    pub results: Vec<RemoteOrder>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrder {
    #[serde(alias = "id")]
    pub order_id: String,
    #[serde(default = "default_order_state")]
    pub state: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default, deserialize_with = "de_price")]
    pub total: Option<Cents>,
    #[serde(default)]
    pub date_creation: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
}

fn default_order_state() -> String {
    "new".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLine {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "de_price")]
    pub price: Option<Cents>,
}

fn default_quantity() -> i64 {
    1
}

impl RemoteOrder {
    pub fn into_record(self, synced_at: DateTime<Utc>) -> OrderRecord {
        let payload = serde_json::json!({
            "order_id": self.order_id,
            "state": self.state,
            "country_code": self.country_code,
            "lines": self.lines.len(),
        });
        let sku = self.lines.iter().find_map(|l| l.sku.clone());
        let quantity = self
            .lines
            .iter()
            .map(|l| l.quantity)
            .sum::<i64>()
            .max(1);
        OrderRecord {
            order_id: self.order_id,
            sku,
            quantity,
            state: self.state,
            country_code: self.country_code,
            total_cents: self.total,
            created_at: self.date_creation,
            payload,
            synced_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompetitorsResponse {
    #[serde(default)]
    pub results: Vec<CompetitorRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompetitorRecord {
    #[serde(alias = "seller_id")]
    pub competitor_id: String,
    #[serde(default, deserialize_with = "de_price")]
    pub price: Option<Cents>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub feedback_count: i64,
}

impl CompetitorRecord {
    pub fn into_point(self, now: DateTime<Utc>) -> Option<CompetitorPricePoint> {
        Some(CompetitorPricePoint {
            competitor_id: self.competitor_id,
            price_cents: self.price?,
            observed_at: self.observed_at.unwrap_or(now),
            feedback_count: self.feedback_count,
        })
    }
}

/// Payload for `POST /ws/listings/{id}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkUploadResponse {
    pub task_id: String,
}

/// Completion codes observed on `GET /ws/tasks/{id}`: 9 = done, 8 = failed.
pub const TASK_STATUS_DONE: i64 = 9;
pub const TASK_STATUS_FAILED: i64 = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct BulkTaskStatus {
    #[serde(alias = "status_code")]
    pub status: i64,
}

impl BulkTaskStatus {
    pub fn is_done(&self) -> bool {
        self.status == TASK_STATUS_DONE
    }

    pub fn is_failed(&self) -> bool {
        self.status == TASK_STATUS_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_parse_from_numbers_and_strings() {
        let listing: RemoteListing = serde_json::from_value(serde_json::json!({
            "listing_id": "L1",
            "sku": "SKU-1",
            "grade": 10,
            "price": "194.99",
            "quantity": 2
        }))
        .unwrap();
        assert_eq!(listing.price, Some(19_499));

        let listing: RemoteListing = serde_json::from_value(serde_json::json!({
            "id": "L2",
            "sku": "SKU-1",
            "price": 180.0
        }))
        .unwrap();
        assert_eq!(listing.listing_id, "L2");
        assert_eq!(listing.price, Some(18_000));
    }

    #[test]
    fn order_record_aggregates_lines() {
        let order: RemoteOrder = serde_json::from_value(serde_json::json!({
            "order_id": "O1",
            "state": "accepted",
            "country_code": "FR",
            "total": "399.98",
            "lines": [
                {"sku": "SKU-1", "quantity": 2, "price": "199.99"}
            ]
        }))
        .unwrap();
        let rec = order.into_record(Utc::now());
        assert_eq!(rec.sku.as_deref(), Some("SKU-1"));
        assert_eq!(rec.quantity, 2);
        assert_eq!(rec.total_cents, Some(39_998));
    }

    #[test]
    fn competitor_without_price_is_dropped() {
        let rec: CompetitorRecord = serde_json::from_value(serde_json::json!({
            "competitor_id": "c9"
        }))
        .unwrap();
        assert!(rec.into_point(Utc::now()).is_none());
    }

    #[test]
    fn listing_update_omits_unset_fields() {
        let update = ListingUpdate {
            price: Some(194.99),
            quantity: None,
            country_code: Some("FR".into()),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"price": 194.99, "country_code": "FR"}));
    }
}
