//! Derived buyback offers.
//!
//! Recomputed on a schedule: what we can offer to buy a SKU back for, given
//! what its units actually sold for recently, minus refurbishment and
//! handling costs and the configured buyback margin.

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::money::Cents;
use crate::store::Store;

const SALE_LOOKBACK_DAYS: i64 = 90;

pub struct BuybackEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    margin_rate: f64,
}

impl BuybackEngine {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, margin_rate: f64) -> Self {
        Self {
            store,
            clock,
            margin_rate,
        }
    }

    fn offer_from(
        avg_sale_cents: Cents,
        refurb_cost_cents: Cents,
        operational_cost_cents: Cents,
        margin_rate: f64,
    ) -> Cents {
        let after_margin = (avg_sale_cents as f64 * (1.0 - margin_rate)) as Cents;
        (after_margin - refurb_cost_cents - operational_cost_cents).max(0)
    }

    /// Recompute the buyback offer for every SKU with recent sales.
    /// Returns the number of offers written.
    pub fn recompute_all(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let since = now - Duration::days(SALE_LOOKBACK_DAYS);
        let mut written = 0usize;

        for sku in self.store.distinct_skus()? {
            let sales = self.store.recent_sale_prices(&sku, since)?;
            if sales.is_empty() {
                debug!(sku = %sku, "no recent sales, keeping previous buyback offer");
                continue;
            }
            let avg_sale = sales.iter().sum::<Cents>() / sales.len() as Cents;

            // Costs averaged across the SKU's parameter rows; a SKU with no
            // parameters gets a margin-only offer.
            let params = self.store.list_pricing_parameters(&sku)?;
            let (refurb, operational) = if params.is_empty() {
                (0, 0)
            } else {
                let n = params.len() as Cents;
                (
                    params.iter().map(|p| p.refurb_cost_cents).sum::<Cents>() / n,
                    params.iter().map(|p| p.operational_cost_cents).sum::<Cents>() / n,
                )
            };

            let offer = Self::offer_from(avg_sale, refurb, operational, self.margin_rate);
            self.store.upsert_buyback_price(&sku, offer, now)?;
            written += 1;
        }

        info!(offers = written, "buyback recomputation complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_subtracts_margin_and_costs() {
        // 200.00 sale, 25% margin -> 150.00, minus 20.00 + 10.00 costs.
        assert_eq!(BuybackEngine::offer_from(20_000, 2_000, 1_000, 0.25), 12_000);
    }

    #[test]
    fn offer_never_goes_negative() {
        assert_eq!(BuybackEngine::offer_from(1_000, 2_000, 1_000, 0.25), 0);
    }
}
