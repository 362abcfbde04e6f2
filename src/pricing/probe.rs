//! Dip / peek / peak price discovery.
//!
//! Drops a listing to the minimum permissible price, waits for competitor
//! repricers to react, observes them, then restores. The dip call carries a
//! cost-2 envelope that pre-reserves the restore token, so a fully drained
//! bucket can delay the peek but never the recovery.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::marketplace::MarketClient;
use crate::money::Cents;
use crate::store::Store;
use crate::traffic::Priority;

/// Undercut applied to the lowest observed competitor on restore: 1%.
const PEAK_UNDERCUT_NUM: Cents = 99;
const PEAK_UNDERCUT_DEN: Cents = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub listing_id: String,
    pub country_code: String,
    pub dip_cents: Cents,
    pub restored_cents: Cents,
    pub competitors_seen: usize,
    pub used_fallback: bool,
}

pub struct ProbeProtocol {
    client: Arc<MarketClient>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    default_country: String,
    settle_ms: u64,
    dip_cents: Cents,
}

impl ProbeProtocol {
    pub fn new(
        client: Arc<MarketClient>,
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        default_country: String,
        settle_ms: u64,
        dip_cents: Cents,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            default_country,
            settle_ms,
            dip_cents,
        }
    }

    /// Restore price: undercut the lowest competitor by 1%, but never drop
    /// below half of the pre-dip price.
    fn peak_price(fallback_cents: Cents, lowest_competitor: Option<Cents>) -> Cents {
        match lowest_competitor {
            Some(lowest) => {
                let undercut = lowest * PEAK_UNDERCUT_NUM / PEAK_UNDERCUT_DEN;
                undercut.max(fallback_cents / 2)
            }
            None => fallback_cents,
        }
    }

    pub async fn run(
        &self,
        listing_id: &str,
        country_code: Option<&str>,
    ) -> Result<ProbeReport, CoreError> {
        let listing = self
            .store
            .get_listing(listing_id)
            .map_err(|e| CoreError::Data(e.to_string()))?
            .ok_or_else(|| CoreError::Data(format!("unknown listing {}", listing_id)))?;

        let country = country_code
            .map(|c| c.to_string())
            .or_else(|| {
                self.store
                    .listing_countries(listing_id)
                    .ok()
                    .and_then(|c| c.into_iter().next())
            })
            .unwrap_or_else(|| self.default_country.clone());

        let fallback_cents = listing.price_cents;
        if fallback_cents <= 0 {
            return Err(CoreError::Data(format!(
                "listing {} has no current price to fall back to",
                listing_id
            )));
        }

        // Dip: cost 2 reserves the peak's token inside the same envelope.
        info!(listing_id, country = %country, dip = self.dip_cents, "probe dip");
        self.client
            .update_price(
                listing_id,
                self.dip_cents,
                Some(&country),
                Priority::Normal,
                2,
            )
            .await?;
        let _ = self.store.record_price_change(
            listing_id,
            &country,
            Some(fallback_cents),
            self.dip_cents,
            "probe_dip",
            self.clock.now_utc(),
        );

        // Let competitor repricers react before looking.
        sleep(Duration::from_millis(self.settle_ms)).await;

        let (lowest, competitors_seen) = match self
            .client
            .fetch_competitors(listing_id, &country, Priority::High)
            .await
        {
            Ok(points) => (points.iter().map(|p| p.price_cents).min(), points.len()),
            Err(e) => {
                warn!(listing_id, error = %e, "probe peek failed, restoring blind");
                (None, 0)
            }
        };
        let used_fallback = lowest.is_none();

        // Peak: cost 0 consumes the token reserved by the dip, so the
        // restore can never be starved.
        let restored_cents = Self::peak_price(fallback_cents, lowest);
        info!(listing_id, country = %country, restored = restored_cents, "probe peak");
        self.client
            .update_price(listing_id, restored_cents, Some(&country), Priority::High, 0)
            .await?;

        let now = self.clock.now_utc();
        let _ = self.store.set_market_price(listing_id, &country, restored_cents);
        let _ = self.store.set_listing_price(listing_id, restored_cents);
        let _ = self.store.record_price_change(
            listing_id,
            &country,
            Some(self.dip_cents),
            restored_cents,
            "probe_peak",
            now,
        );
        let _ = self.store.set_last_probe_at(listing_id, now);

        Ok(ProbeReport {
            listing_id: listing_id.to_string(),
            country_code: country,
            dip_cents: self.dip_cents,
            restored_cents,
            competitors_seen,
            used_fallback,
        })
    }
}
