//! Order and listing synchronisation.
//!
//! Two near-identical paginated pipelines pulling the remote state into the
//! local mirror. Upserts are idempotent, so overlapping runs and webhook
//! races converge to the last observed payload.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::marketplace::MarketClient;
use crate::models::ListingMarket;
use crate::store::Store;
use crate::traffic::Priority;

/// Incremental order syncs stop after this many pages; the 15-minute cadence
/// keeps the tail short anyway.
const INCREMENTAL_PAGE_CAP: u32 = 5;
const INCREMENTAL_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub pages: u32,
    pub upserted: usize,
}

pub struct SyncDriver {
    client: Arc<MarketClient>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl SyncDriver {
    pub fn new(client: Arc<MarketClient>, store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            store,
            clock,
        }
    }

    pub async fn sync_listings(&self) -> Result<SyncReport, CoreError> {
        let mut report = SyncReport::default();
        let mut page = 1u32;

        loop {
            let batch = self.client.list_listings(page).await?;
            report.pages += 1;

            let now = self.clock.now_utc();
            for remote in batch.results {
                let markets = remote.markets.clone();
                let record = remote.into_record(now);
                let listing_id = record.listing_id.clone();
                if let Err(e) = self.store.upsert_listing(&record) {
                    warn!(listing_id = %listing_id, error = %e, "listing upsert failed");
                    continue;
                }
                for market in markets {
                    if let Some(price_cents) = market.price {
                        let _ = self.store.upsert_listing_market(&ListingMarket {
                            listing_id: listing_id.clone(),
                            country_code: market.country_code,
                            price_cents,
                            active: market.active,
                        });
                    }
                }
                report.upserted += 1;
            }

            if batch.next.is_none() {
                break;
            }
            page += 1;
        }

        info!(
            pages = report.pages,
            upserted = report.upserted,
            "listing sync complete"
        );
        Ok(report)
    }

    pub async fn sync_orders(&self, scope: SyncScope) -> Result<SyncReport, CoreError> {
        let mut report = SyncReport::default();
        let mut page = 1u32;

        let modified_since = match scope {
            SyncScope::Full => None,
            SyncScope::Incremental => {
                Some(self.clock.now_utc() - Duration::hours(INCREMENTAL_LOOKBACK_HOURS))
            }
        };

        loop {
            let batch = self.client.list_orders(page, modified_since).await?;
            report.pages += 1;

            let now = self.clock.now_utc();
            for remote in batch.results {
                let record = remote.into_record(now);
                if let Err(e) = self.store.upsert_order(&record) {
                    warn!(order_id = %record.order_id, error = %e, "order upsert failed");
                    continue;
                }
                report.upserted += 1;
            }

            if batch.next.is_none() {
                break;
            }
            if scope == SyncScope::Incremental && report.pages >= INCREMENTAL_PAGE_CAP {
                info!(pages = report.pages, "incremental order sync page cap reached");
                break;
            }
            page += 1;
        }

        info!(
            pages = report.pages,
            upserted = report.upserted,
            "order sync complete"
        );
        Ok(report)
    }

    /// Webhook fast path: fetch the full record at HIGH priority and upsert.
    pub async fn refresh_order(&self, order_id: &str) -> Result<(), CoreError> {
        let remote = self.client.get_order(order_id, Priority::High).await?;
        let record = remote.into_record(self.clock.now_utc());
        self.store
            .upsert_order(&record)
            .map_err(|e| CoreError::Data(e.to_string()))
    }

    pub async fn refresh_listing(&self, listing_id: &str) -> Result<(), CoreError> {
        let remote = self.client.get_listing(listing_id, Priority::High).await?;
        let markets = remote.markets.clone();
        let record = remote.into_record(self.clock.now_utc());
        self.store
            .upsert_listing(&record)
            .map_err(|e| CoreError::Data(e.to_string()))?;
        for market in markets {
            if let Some(price_cents) = market.price {
                let _ = self.store.upsert_listing_market(&ListingMarket {
                    listing_id: listing_id.to_string(),
                    country_code: market.country_code,
                    price_cents,
                    active: market.active,
                });
            }
        }
        Ok(())
    }
}
