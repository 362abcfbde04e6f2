//! Profitability floor: the lowest price at which a sale still meets the
//! target margin after costs and platform fees.

use crate::error::CoreError;
use crate::money::{ceil_div_by_rate, Cents};
use crate::models::PricingParameters;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloorInputs {
    pub acquisition_cost_cents: Cents,
    pub refurb_cost_cents: Cents,
    pub operational_cost_cents: Cents,
    pub warranty_risk_cost_cents: Cents,
    pub platform_fee_rate: f64,
    pub target_margin_rate: f64,
}

impl FloorInputs {
    pub fn from_parameters(params: &PricingParameters, acquisition_cost_cents: Cents) -> Self {
        Self {
            acquisition_cost_cents,
            refurb_cost_cents: params.refurb_cost_cents,
            operational_cost_cents: params.operational_cost_cents,
            warranty_risk_cost_cents: params.warranty_risk_cost_cents,
            platform_fee_rate: params.platform_fee_rate,
            target_margin_rate: params.target_margin_rate,
        }
    }
}

/// `floor = ceil_to_cent(total_cost / (1 - fee - margin))`, rounded up so
/// the margin is preserved rather than shaved.
pub fn compute_floor(inputs: &FloorInputs) -> Result<Cents, CoreError> {
    let revenue_share = 1.0 - inputs.platform_fee_rate - inputs.target_margin_rate;
    if revenue_share <= 0.0
        || !(0.0..1.0).contains(&inputs.platform_fee_rate)
        || !(0.0..1.0).contains(&inputs.target_margin_rate)
    {
        return Err(CoreError::InvalidMarketParams {
            fee_rate: inputs.platform_fee_rate,
            margin_rate: inputs.target_margin_rate,
        });
    }

    let total_cost = inputs.acquisition_cost_cents
        + inputs.refurb_cost_cents
        + inputs.operational_cost_cents
        + inputs.warranty_risk_cost_cents;

    Ok(ceil_div_by_rate(total_cost, revenue_share))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> FloorInputs {
        FloorInputs {
            acquisition_cost_cents: 10_000,
            refurb_cost_cents: 2_000,
            operational_cost_cents: 1_000,
            warranty_risk_cost_cents: 500,
            platform_fee_rate: 0.10,
            target_margin_rate: 0.15,
        }
    }

    #[test]
    fn reference_floor() {
        // 135.00 total cost at 25% combined fee+margin -> 180.00.
        assert_eq!(compute_floor(&inputs()).unwrap(), 18_000);
    }

    #[test]
    fn floor_covers_costs_after_fee_and_margin() {
        let i = inputs();
        let floor = compute_floor(&i).unwrap() as f64;
        let total = 13_500.0;
        assert!(floor * (1.0 - i.platform_fee_rate - i.target_margin_rate) >= total - 1e-6);
    }

    #[test]
    fn fee_plus_margin_of_one_is_an_error() {
        let mut i = inputs();
        i.platform_fee_rate = 0.40;
        i.target_margin_rate = 0.60;
        assert!(matches!(
            compute_floor(&i),
            Err(CoreError::InvalidMarketParams { .. })
        ));
    }

    #[test]
    fn fee_plus_margin_just_below_one_is_finite() {
        let mut i = inputs();
        i.platform_fee_rate = 0.50;
        i.target_margin_rate = 0.499;
        let floor = compute_floor(&i).unwrap();
        assert!(floor > 0);
        // 135.00 / 0.001 = 135000.00
        assert_eq!(floor, 13_500_000);
    }

    #[test]
    fn fractional_quotient_rounds_up() {
        let mut i = inputs();
        i.acquisition_cost_cents = 10_001;
        i.refurb_cost_cents = 0;
        i.operational_cost_cents = 0;
        i.warranty_risk_cost_cents = 0;
        i.platform_fee_rate = 0.0;
        i.target_margin_rate = 0.70;
        // 100.01 / 0.3 = 333.3666... -> 333.37
        assert_eq!(compute_floor(&i).unwrap(), 33_337);
    }
}
