//! Shared test fixtures: a scripted transport and store builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use repricer_backend::error::CoreError;
use repricer_backend::models::{ListingMarket, ListingRecord, OrderRecord, PricingParameters};
use repricer_backend::store::Store;
use repricer_backend::traffic::{ApiResponse, OutboundRequest, Transport};

/// One observed outbound call.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub at: tokio::time::Instant,
}

struct Rule {
    needle: String,
    responses: VecDeque<ApiResponse>,
}

/// Transport that answers from a script. Rules are matched by URL substring
/// in insertion order; a rule with an exhausted queue is skipped. Unmatched
/// requests get a 200 with an empty JSON object.
pub struct MockTransport {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn script(self: &Arc<Self>, needle: &str, status: u16, body: &str) -> Arc<Self> {
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|r| r.needle == needle) {
            rule.responses.push_back(ApiResponse {
                status,
                body: body.to_string(),
            });
        } else {
            rules.push(Rule {
                needle: needle.to_string(),
                responses: VecDeque::from([ApiResponse {
                    status,
                    body: body.to_string(),
                }]),
            });
        }
        self.clone()
    }

    pub fn script_json(self: &Arc<Self>, needle: &str, status: u16, body: serde_json::Value) -> Arc<Self> {
        self.script(needle, status, &body.to_string())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_containing(&self, needle: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, CoreError> {
        self.calls.lock().push(Call {
            method: request.method.to_string(),
            url: request.url.clone(),
            body: request.body.clone(),
            at: tokio::time::Instant::now(),
        });

        let mut rules = self.rules.lock();
        for rule in rules.iter_mut() {
            if request.url.contains(&rule.needle) {
                if let Some(response) = rule.responses.pop_front() {
                    return Ok(response);
                }
            }
        }
        Ok(ApiResponse {
            status: 200,
            body: "{}".to_string(),
        })
    }
}

// ---- store fixtures -----------------------------------------------------

pub fn temp_store() -> (Arc<Store>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let store = Arc::new(Store::new(path.to_str().unwrap()).unwrap());
    (store, dir)
}

pub fn seed_listing(store: &Store, listing_id: &str, sku: &str, price_cents: i64) {
    store
        .upsert_listing(&ListingRecord {
            listing_id: listing_id.to_string(),
            sku: sku.to_string(),
            grade: 10,
            price_cents,
            currency: "EUR".to_string(),
            quantity: 3,
            publication_state: "active".to_string(),
            last_probe_at: None,
            synced_at: chrono::Utc::now(),
        })
        .unwrap();
    store
        .upsert_listing_market(&ListingMarket {
            listing_id: listing_id.to_string(),
            country_code: "FR".to_string(),
            price_cents,
            active: true,
        })
        .unwrap();
}

pub fn seed_parameters(store: &Store, sku: &str) {
    store
        .upsert_pricing_parameters(&PricingParameters {
            sku: sku.to_string(),
            grade: 10,
            country_code: "FR".to_string(),
            refurb_cost_cents: 2_000,
            operational_cost_cents: 1_000,
            warranty_risk_cost_cents: 500,
            platform_fee_rate: 0.10,
            target_margin_rate: 0.15,
            price_step_cents: 1,
            min_price_cents: None,
            max_price_cents: None,
        })
        .unwrap();
}

pub fn seed_acquisition(store: &Store, sku: &str, unit_cost_cents: i64) {
    store
        .add_purchase_batch(&repricer_backend::models::PurchaseBatch {
            sku: sku.to_string(),
            unit_cost_cents,
            quantity_received: 1,
            received_at: chrono::Utc::now(),
        })
        .unwrap();
}

pub fn seed_sales(store: &Store, sku: &str, units: i64) {
    store
        .upsert_order(&OrderRecord {
            order_id: format!("order-{}-{}", sku, units),
            sku: Some(sku.to_string()),
            quantity: units,
            state: "accepted".to_string(),
            country_code: Some("FR".to_string()),
            total_cents: Some(20_000 * units),
            created_at: Some(chrono::Utc::now() - chrono::Duration::days(2)),
            payload: serde_json::json!({}),
            synced_at: chrono::Utc::now(),
        })
        .unwrap();
}

pub fn competitors_json(prices_major: &[f64]) -> serde_json::Value {
    let results: Vec<serde_json::Value> = prices_major
        .iter()
        .enumerate()
        .map(|(i, p)| {
            serde_json::json!({
                "competitor_id": format!("c{}", i),
                "price": p,
                "feedback_count": 25,
            })
        })
        .collect();
    serde_json::json!({ "results": results })
}
