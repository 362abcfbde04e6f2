//! Typed marketplace API client.
//!
//! Thin wrapper over the TrafficController: every call is classified, rate
//! limited and retried there; this layer only builds URLs, shapes payloads
//! and maps non-2xx statuses onto the error taxonomy.

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::debug;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::CompetitorPricePoint;
use crate::money::{major_from_cents, Cents};
use crate::traffic::{ApiResponse, OutboundRequest, Priority, TrafficController};

use types::{
    BulkTaskStatus, BulkUploadResponse, CompetitorsResponse, ListingPage, ListingUpdate,
    OrderPage, RemoteListing, RemoteOrder,
};

pub const PAGE_SIZE: u32 = 50;

const TASK_POLL_DELAY_MS: u64 = 2_000;

pub struct MarketClient {
    controller: Arc<TrafficController>,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl MarketClient {
    pub fn new(
        controller: Arc<TrafficController>,
        base_url: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            controller,
            base_url,
            clock,
        }
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 2xx passes through; anything else becomes a typed error.
    fn ensure_success(response: ApiResponse) -> Result<ApiResponse, CoreError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(CoreError::from_status(response.status, response.body))
        }
    }

    // ---- listings -------------------------------------------------------

    pub async fn list_listings(&self, page: u32) -> Result<ListingPage, CoreError> {
        let url = self.url(&format!("/ws/listings?page={}&limit={}", page, PAGE_SIZE));
        let response = self
            .controller
            .schedule(OutboundRequest::get(url), Priority::Normal, 1)
            .await?;
        Self::ensure_success(response)?.json()
    }

    pub async fn get_listing(
        &self,
        listing_id: &str,
        priority: Priority,
    ) -> Result<RemoteListing, CoreError> {
        let url = self.url(&format!("/ws/listings/{}", listing_id));
        let response = self
            .controller
            .schedule(OutboundRequest::get(url), priority, 1)
            .await?;
        Self::ensure_success(response)?.json()
    }

    /// Push a listing update. `cost` carries the probe envelope semantics
    /// (1 = plain, 2 = also reserve the restore token, 0 = reserved).
    pub async fn update_listing(
        &self,
        listing_id: &str,
        update: &ListingUpdate,
        priority: Priority,
        cost: u32,
    ) -> Result<ApiResponse, CoreError> {
        let url = self.url(&format!("/ws/listings/{}", listing_id));
        let body = serde_json::to_value(update)
            .map_err(|e| CoreError::Data(format!("unserialisable update: {}", e)))?;
        let response = self
            .controller
            .schedule(OutboundRequest::post(url, body), priority, cost)
            .await?;
        Self::ensure_success(response)
    }

    pub async fn update_price(
        &self,
        listing_id: &str,
        price_cents: Cents,
        country_code: Option<&str>,
        priority: Priority,
        cost: u32,
    ) -> Result<ApiResponse, CoreError> {
        let update = ListingUpdate {
            price: Some(major_from_cents(price_cents)),
            quantity: None,
            country_code: country_code.map(|c| c.to_string()),
        };
        self.update_listing(listing_id, &update, priority, cost).await
    }

    /// CSV bulk upload; returns the remote task id for polling.
    pub async fn bulk_upload_listings(
        &self,
        catalog_csv: &str,
        delimiter: char,
        encoding: &str,
    ) -> Result<String, CoreError> {
        let url = self.url("/ws/listings");
        let body = serde_json::json!({
            "catalog": catalog_csv,
            "delimiter": delimiter.to_string(),
            "encoding": encoding,
        });
        let response = self
            .controller
            .schedule(OutboundRequest::post(url, body), Priority::Normal, 1)
            .await?;
        let parsed: BulkUploadResponse = Self::ensure_success(response)?.json()?;
        Ok(parsed.task_id)
    }

    pub async fn task_status(&self, task_id: &str) -> Result<BulkTaskStatus, CoreError> {
        let url = self.url(&format!("/ws/tasks/{}", task_id));
        let response = self
            .controller
            .schedule(OutboundRequest::get(url), Priority::Normal, 1)
            .await?;
        Self::ensure_success(response)?.json()
    }

    /// Poll a bulk task until it completes or the attempt budget runs out.
    /// Returns `true` when the task finished successfully.
    pub async fn wait_for_task(
        &self,
        task_id: &str,
        max_polls: u32,
    ) -> Result<bool, CoreError> {
        for attempt in 0..max_polls {
            let status = self.task_status(task_id).await?;
            if status.is_done() {
                return Ok(true);
            }
            if status.is_failed() {
                return Ok(false);
            }
            debug!(task_id, attempt, code = status.status, "bulk task still running");
            sleep(Duration::from_millis(TASK_POLL_DELAY_MS)).await;
        }
        Err(CoreError::Data(format!(
            "bulk task {} did not complete within {} polls",
            task_id, max_polls
        )))
    }

    // ---- buyback orders -------------------------------------------------

    pub async fn list_orders(
        &self,
        page: u32,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<OrderPage, CoreError> {
        let mut url = format!(
            "{}/ws/buyback/v1/orders?page={}&limit={}",
            self.base_url, page, PAGE_SIZE
        );
        if let Some(since) = modified_since {
            url.push_str(&format!("&modified_since={}", since.to_rfc3339()));
        }
        let response = self
            .controller
            .schedule(OutboundRequest::get(url), Priority::Normal, 1)
            .await?;
        Self::ensure_success(response)?.json()
    }

    pub async fn get_order(
        &self,
        order_id: &str,
        priority: Priority,
    ) -> Result<RemoteOrder, CoreError> {
        let url = self.url(&format!("/ws/buyback/v1/orders/{}", order_id));
        let response = self
            .controller
            .schedule(OutboundRequest::get(url), priority, 1)
            .await?;
        Self::ensure_success(response)?.json()
    }

    pub async fn post_order_message(
        &self,
        order_id: &str,
        message: &str,
    ) -> Result<(), CoreError> {
        let url = self.url(&format!("/ws/buyback/v1/orders/{}/messages", order_id));
        let body = serde_json::json!({ "body": message });
        let response = self
            .controller
            .schedule(OutboundRequest::post(url, body), Priority::Normal, 1)
            .await?;
        Self::ensure_success(response).map(|_| ())
    }

    pub async fn suspend_order(&self, order_id: &str) -> Result<(), CoreError> {
        let url = self.url(&format!("/ws/buyback/v1/orders/{}/suspend", order_id));
        let response = self
            .controller
            .schedule(
                OutboundRequest::put(url, serde_json::json!({})),
                Priority::Normal,
                1,
            )
            .await?;
        Self::ensure_success(response).map(|_| ())
    }

    // ---- competitors ----------------------------------------------------

    pub async fn fetch_competitors(
        &self,
        listing_id: &str,
        country_code: &str,
        priority: Priority,
    ) -> Result<Vec<CompetitorPricePoint>, CoreError> {
        let url = self.url(&format!(
            "/ws/backbox/v1/competitors/{}?country={}",
            listing_id, country_code
        ));
        let response = self
            .controller
            .schedule(OutboundRequest::get(url), priority, 1)
            .await?;
        let parsed: CompetitorsResponse = Self::ensure_success(response)?.json()?;
        let now = self.clock.now_utc();
        Ok(parsed
            .results
            .into_iter()
            .filter_map(|r| r.into_point(now))
            .collect())
    }
}
