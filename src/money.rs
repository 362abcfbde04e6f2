//! Integer-cent money helpers.
//!
//! The pricing pipeline works in cents end to end; floats only appear inside
//! the MAD statistics and at the JSON boundary where the marketplace speaks
//! decimal major units.

pub type Cents = i64;

/// Convert a decimal major-unit amount (e.g. `194.99`) to cents.
pub fn cents_from_major(amount: f64) -> Cents {
    (amount * 100.0).round() as Cents
}

/// Convert cents back to a decimal major-unit amount for wire payloads.
pub fn major_from_cents(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

/// Divide a cent amount by a rate in (0, 1], rounding up to the next cent.
///
/// Snaps near-integer quotients first so that float noise in the rate
/// (`1.0 - 0.10 - 0.15`) cannot bump an exact result by a cent.
pub fn ceil_div_by_rate(total_cents: Cents, rate: f64) -> Cents {
    let quotient = total_cents as f64 / rate;
    let nearest = quotient.round();
    if (quotient - nearest).abs() < 1e-6 {
        nearest as Cents
    } else {
        quotient.ceil() as Cents
    }
}

pub fn format_cents(cents: Cents) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_round_trip_is_exact() {
        assert_eq!(cents_from_major(194.99), 19_499);
        assert_eq!(cents_from_major(10.03) - 1, 10_02);
        assert_eq!(major_from_cents(19_499), 194.99);
    }

    #[test]
    fn ceil_div_snaps_exact_quotients() {
        // 135.00 / 0.75 must be exactly 180.00 despite the float rate.
        let rate = 1.0 - 0.10 - 0.15;
        assert_eq!(ceil_div_by_rate(13_500, rate), 18_000);
    }

    #[test]
    fn ceil_div_rounds_up_fractional_quotients() {
        // 100.00 / 0.3 = 333.333... -> 333.34
        assert_eq!(ceil_div_by_rate(10_000, 0.3), 33_334);
    }

    #[test]
    fn formats_with_two_decimals() {
        assert_eq!(format_cents(18_000), "180.00");
        assert_eq!(format_cents(1_05), "1.05");
    }
}
