//! Target price selection: undercut the cheapest surviving competitor,
//! clamped by the profitability floor and any manual bounds.
//!
//! All arithmetic is integer cents, so `10.03 - 0.01` is exactly `10.02`.

use crate::money::Cents;
use crate::models::CompetitorPricePoint;

pub const DEFAULT_PRICE_STEP_CENTS: Cents = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingStrategy {
    /// Undercut delta below the lowest competitor.
    pub price_step_cents: Cents,
    pub min_price_cents: Option<Cents>,
    pub max_price_cents: Option<Cents>,
}

impl Default for PricingStrategy {
    fn default() -> Self {
        Self {
            price_step_cents: DEFAULT_PRICE_STEP_CENTS,
            min_price_cents: None,
            max_price_cents: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetQuote {
    pub target_cents: Cents,
    pub floor_cents: Cents,
    pub constrained_by_floor: bool,
}

/// Pick the target price. An empty competitor set holds at the floor.
pub fn select_target(
    competitors: &[CompetitorPricePoint],
    floor_cents: Cents,
    strategy: &PricingStrategy,
) -> TargetQuote {
    let raw = competitors
        .iter()
        .map(|p| p.price_cents)
        .min()
        .map(|lowest| lowest - strategy.price_step_cents);

    let mut clamped = match raw {
        Some(r) => r.max(floor_cents),
        None => floor_cents,
    };
    let constrained_by_floor = raw.map(|r| r < floor_cents).unwrap_or(true);

    if let Some(min) = strategy.min_price_cents {
        clamped = clamped.max(min);
    }
    if let Some(max) = strategy.max_price_cents {
        clamped = clamped.min(max);
    }

    TargetQuote {
        target_cents: clamped,
        floor_cents,
        constrained_by_floor,
    }
}
