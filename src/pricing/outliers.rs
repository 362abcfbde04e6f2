//! Competitor price filtering: staleness cut, then MAD-based outlier
//! rejection.
//!
//! MAD holds up on the small samples a single listing sees and survives the
//! exact poisoning this filter exists for (one competitor posting at 1.00).

use chrono::{DateTime, Duration, Utc};

use crate::models::CompetitorPricePoint;

pub const DEFAULT_MAX_AGE_HOURS: i64 = 6;

/// Keep the tight-cluster floor at 5% of the median so the threshold can
/// never collapse to zero.
const MAD_FLOOR_RATIO: f64 = 0.05;
const MAD_MULTIPLIER: f64 = 3.0;

pub struct OutlierFilter {
    max_age_hours: i64,
}

impl OutlierFilter {
    pub fn new(max_age_hours: i64) -> Self {
        Self { max_age_hours }
    }

    pub fn filter(
        &self,
        points: Vec<CompetitorPricePoint>,
        now: DateTime<Utc>,
    ) -> Vec<CompetitorPricePoint> {
        let cutoff = now - Duration::hours(self.max_age_hours);
        let fresh: Vec<CompetitorPricePoint> = points
            .into_iter()
            .filter(|p| p.observed_at >= cutoff)
            .collect();

        // Too few points for statistics; pass through unchanged.
        if fresh.len() <= 2 {
            return fresh;
        }

        let prices: Vec<f64> = fresh.iter().map(|p| p.price_cents as f64).collect();
        let m = median(&prices);
        let deviations: Vec<f64> = prices.iter().map(|p| (p - m).abs()).collect();
        let mad = median(&deviations);
        let effective_mad = mad.max(MAD_FLOOR_RATIO * m);
        let threshold = MAD_MULTIPLIER * effective_mad;

        fresh
            .into_iter()
            .filter(|p| {
                let price = p.price_cents as f64;
                price >= m - threshold && price <= m + threshold
            })
            .collect()
    }
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_HOURS)
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn point(id: &str, price_cents: i64, age_hours: i64) -> CompetitorPricePoint {
        CompetitorPricePoint {
            competitor_id: id.to_string(),
            price_cents,
            observed_at: now() - Duration::hours(age_hours),
            feedback_count: 10,
        }
    }

    #[test]
    fn small_samples_pass_through() {
        let filter = OutlierFilter::default();
        for n in 0..=2 {
            let points: Vec<_> = (0..n).map(|i| point(&i.to_string(), 100 + i, 0)).collect();
            let out = filter.filter(points.clone(), now());
            assert_eq!(out, points);
        }
    }

    #[test]
    fn stale_points_are_dropped_first() {
        let filter = OutlierFilter::default();
        let points = vec![point("a", 20_000, 0), point("b", 20_100, 7)];
        let out = filter.filter(points, now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].competitor_id, "a");
    }

    #[test]
    fn poisoned_low_price_is_filtered() {
        let filter = OutlierFilter::default();
        let points = vec![
            point("a", 20_000, 0),
            point("b", 19_800, 0),
            point("c", 20_200, 0),
            point("d", 19_500, 0),
            point("e", 5_000, 0),
        ];
        let out = filter.filter(points, now());
        let ids: Vec<&str> = out.iter().map(|p| p.competitor_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn tight_cluster_is_not_over_filtered() {
        // Identical prices give mad = 0; the 5% floor keeps everything.
        let filter = OutlierFilter::default();
        let points = vec![
            point("a", 10_000, 0),
            point("b", 10_000, 0),
            point("c", 10_001, 0),
        ];
        let out = filter.filter(points, now());
        assert_eq!(out.len(), 3);
    }
}
