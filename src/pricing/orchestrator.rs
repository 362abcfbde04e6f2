//! Per-listing repricing pipeline.
//!
//! For each active country market: fetch competitors through the traffic
//! controller, filter them, derive the floor and target, then dispatch the
//! update at a priority based on realised margin and sales velocity. One
//! country failing must never poison the others.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::marketplace::MarketClient;
use crate::money::Cents;
use crate::pricing::floor::{compute_floor, FloorInputs};
use crate::pricing::outliers::OutlierFilter;
use crate::pricing::target::{select_target, PricingStrategy};
use crate::store::Store;
use crate::traffic::Priority;

/// Margin above which a fast-moving listing is worth jumping the queue for.
const HIGH_MARGIN_THRESHOLD: f64 = 0.20;
const HIGH_VELOCITY_THRESHOLD: i64 = 10;
const LOW_MARGIN_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Serialize)]
pub struct CountryOutcome {
    pub country_code: String,
    pub target_cents: Cents,
    pub floor_cents: Cents,
    pub constrained_by_floor: bool,
    pub priority: Priority,
    pub dispatched: bool,
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepriceSummary {
    pub listing_id: String,
    pub dispatched: usize,
    pub skipped: usize,
    pub outcomes: Vec<CountryOutcome>,
}

/// Realised-margin priority rule: the margin here is measured against the
/// selected target, not the configured target margin.
pub fn dispatch_priority(target_cents: Cents, floor_cents: Cents, velocity: i64) -> Priority {
    let margin = if target_cents > 0 {
        (target_cents - floor_cents) as f64 / target_cents as f64
    } else {
        0.0
    };

    if margin > HIGH_MARGIN_THRESHOLD && velocity > HIGH_VELOCITY_THRESHOLD {
        Priority::High
    } else if margin < LOW_MARGIN_THRESHOLD || velocity == 0 {
        Priority::Low
    } else {
        Priority::Normal
    }
}

pub struct RepricingOrchestrator {
    client: Arc<MarketClient>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    outlier_filter: OutlierFilter,
    default_country: String,
    velocity_window_days: i64,
}

impl RepricingOrchestrator {
    pub fn new(
        client: Arc<MarketClient>,
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        default_country: String,
        velocity_window_days: i64,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            outlier_filter: OutlierFilter::default(),
            default_country,
            velocity_window_days,
        }
    }

    pub async fn reprice(&self, listing_id: &str) -> Result<RepriceSummary, CoreError> {
        let listing = self
            .store
            .get_listing(listing_id)
            .map_err(|e| CoreError::Data(e.to_string()))?
            .ok_or_else(|| CoreError::Data(format!("unknown listing {}", listing_id)))?;

        let mut countries = self
            .store
            .listing_countries(listing_id)
            .unwrap_or_default();
        if countries.is_empty() {
            countries.push(self.default_country.clone());
        }

        // Constant across countries within one call.
        let acquisition_cents = self
            .store
            .acquisition_cost_cents(&listing.sku)
            .ok()
            .flatten()
            .unwrap_or_else(|| {
                debug!(sku = %listing.sku, "no purchase batches, acquisition cost 0");
                0
            });
        let since = self.clock.now_utc() - Duration::days(self.velocity_window_days);
        let velocity = self
            .store
            .sales_velocity(&listing.sku, since)
            .unwrap_or(0);

        let mut outcomes = Vec::with_capacity(countries.len());
        for country in countries {
            match self
                .reprice_country(&listing, &country, acquisition_cents, velocity)
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(
                        listing_id,
                        country = %country,
                        error = %e,
                        "repricing failed for country"
                    );
                    outcomes.push(CountryOutcome {
                        country_code: country,
                        target_cents: 0,
                        floor_cents: 0,
                        constrained_by_floor: false,
                        priority: Priority::Normal,
                        dispatched: false,
                        skipped: Some(e.to_string()),
                    });
                }
            }
        }

        let dispatched = outcomes.iter().filter(|o| o.dispatched).count();
        let skipped = outcomes.len() - dispatched;
        info!(listing_id, dispatched, skipped, "repricing pass complete");

        Ok(RepriceSummary {
            listing_id: listing_id.to_string(),
            dispatched,
            skipped,
            outcomes,
        })
    }

    async fn reprice_country(
        &self,
        listing: &crate::models::ListingRecord,
        country: &str,
        acquisition_cents: Cents,
        velocity: i64,
    ) -> Result<CountryOutcome, CoreError> {
        let raw = self
            .client
            .fetch_competitors(&listing.listing_id, country, Priority::High)
            .await?;
        let competitors = self.outlier_filter.filter(raw, self.clock.now_utc());

        let params = match self
            .store
            .get_pricing_parameters(&listing.sku, listing.grade, country)
            .map_err(|e| CoreError::Data(e.to_string()))?
        {
            Some(p) => p,
            None => {
                warn!(
                    sku = %listing.sku,
                    grade = listing.grade,
                    country,
                    "no pricing parameters, skipping country"
                );
                return Ok(CountryOutcome {
                    country_code: country.to_string(),
                    target_cents: 0,
                    floor_cents: 0,
                    constrained_by_floor: false,
                    priority: Priority::Normal,
                    dispatched: false,
                    skipped: Some("missing pricing parameters".into()),
                });
            }
        };

        let floor_cents = compute_floor(&FloorInputs::from_parameters(&params, acquisition_cents))?;
        let strategy = PricingStrategy {
            price_step_cents: params.price_step_cents,
            min_price_cents: params.min_price_cents,
            max_price_cents: params.max_price_cents,
        };
        let quote = select_target(&competitors, floor_cents, &strategy);
        let priority = dispatch_priority(quote.target_cents, floor_cents, velocity);

        debug!(
            listing_id = %listing.listing_id,
            country,
            competitors = competitors.len(),
            floor = floor_cents,
            target = quote.target_cents,
            priority = priority.as_str(),
            "dispatching price update"
        );

        self.client
            .update_price(
                &listing.listing_id,
                quote.target_cents,
                Some(country),
                priority,
                1,
            )
            .await?;

        let now = self.clock.now_utc();
        let _ = self
            .store
            .set_market_price(&listing.listing_id, country, quote.target_cents);
        if country == self.default_country {
            let _ = self
                .store
                .set_listing_price(&listing.listing_id, quote.target_cents);
        }
        let _ = self.store.record_price_change(
            &listing.listing_id,
            country,
            Some(listing.price_cents),
            quote.target_cents,
            "reprice",
            now,
        );

        Ok(CountryOutcome {
            country_code: country.to_string(),
            target_cents: quote.target_cents,
            floor_cents,
            constrained_by_floor: quote.constrained_by_floor,
            priority,
            dispatched: true,
            skipped: None,
        })
    }

    /// Emergency path: push a known-safe price at CRITICAL priority,
    /// jumping every queue. Used when a probe or a bad update left a
    /// listing stranded.
    pub async fn recover(&self, listing_id: &str) -> Result<RepriceSummary, CoreError> {
        let listing = self
            .store
            .get_listing(listing_id)
            .map_err(|e| CoreError::Data(e.to_string()))?
            .ok_or_else(|| CoreError::Data(format!("unknown listing {}", listing_id)))?;

        let mut countries = self
            .store
            .listing_countries(listing_id)
            .unwrap_or_default();
        if countries.is_empty() {
            countries.push(self.default_country.clone());
        }

        let acquisition_cents = self
            .store
            .acquisition_cost_cents(&listing.sku)
            .ok()
            .flatten()
            .unwrap_or(0);

        let mut outcomes = Vec::new();
        for country in countries {
            let floor_cents = self
                .store
                .get_pricing_parameters(&listing.sku, listing.grade, &country)
                .ok()
                .flatten()
                .and_then(|p| {
                    compute_floor(&FloorInputs::from_parameters(&p, acquisition_cents)).ok()
                })
                .unwrap_or(0);

            let safe_cents = listing.price_cents.max(floor_cents);
            if safe_cents <= 0 {
                outcomes.push(CountryOutcome {
                    country_code: country,
                    target_cents: 0,
                    floor_cents,
                    constrained_by_floor: false,
                    priority: Priority::Critical,
                    dispatched: false,
                    skipped: Some("no safe price known".into()),
                });
                continue;
            }

            let result = self
                .client
                .update_price(
                    &listing.listing_id,
                    safe_cents,
                    Some(&country),
                    Priority::Critical,
                    1,
                )
                .await;

            let dispatched = result.is_ok();
            if let Err(e) = result {
                warn!(listing_id, country = %country, error = %e, "recovery dispatch failed");
            } else {
                let _ = self
                    .store
                    .set_market_price(&listing.listing_id, &country, safe_cents);
                let _ = self.store.record_price_change(
                    &listing.listing_id,
                    &country,
                    Some(listing.price_cents),
                    safe_cents,
                    "recover",
                    self.clock.now_utc(),
                );
            }

            outcomes.push(CountryOutcome {
                country_code: country,
                target_cents: safe_cents,
                floor_cents,
                constrained_by_floor: safe_cents == floor_cents,
                priority: Priority::Critical,
                dispatched,
                skipped: None,
            });
        }

        let dispatched = outcomes.iter().filter(|o| o.dispatched).count();
        let skipped = outcomes.len() - dispatched;
        Ok(RepriceSummary {
            listing_id: listing_id.to_string(),
            dispatched,
            skipped,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_margin_and_velocity_is_high() {
        // margin = (250-180)/250 = 0.28, velocity 12
        assert_eq!(dispatch_priority(25_000, 18_000, 12), Priority::High);
    }

    #[test]
    fn thin_margin_is_low() {
        // Clamped at floor: margin 0.
        assert_eq!(dispatch_priority(18_000, 18_000, 5), Priority::Low);
    }

    #[test]
    fn stagnant_listing_is_low_despite_margin() {
        assert_eq!(dispatch_priority(25_000, 18_000, 0), Priority::Low);
    }

    #[test]
    fn middling_case_is_normal() {
        // margin = 1499/19499 ~= 0.077, velocity 5
        assert_eq!(dispatch_priority(19_499, 18_000, 5), Priority::Normal);
    }

    #[test]
    fn zero_target_counts_as_zero_margin() {
        assert_eq!(dispatch_priority(0, 0, 5), Priority::Low);
    }
}
