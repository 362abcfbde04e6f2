use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Cents;

/// One bucket shape: refilled to `max_requests` once per `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub interval_ms: u64,
    pub max_requests: u32,
}

/// Rate limits for the four endpoint classes, overridable per-bucket via
/// environment and hot-swappable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub global: BucketSpec,
    pub catalog: BucketSpec,
    pub competitor: BucketSpec,
    pub care: BucketSpec,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: BucketSpec {
                interval_ms: 10_000,
                max_requests: 150,
            },
            catalog: BucketSpec {
                interval_ms: 10_000,
                max_requests: 15,
            },
            competitor: BucketSpec {
                interval_ms: 1_000,
                max_requests: 2,
            },
            care: BucketSpec {
                interval_ms: 60_000,
                max_requests: 300,
            },
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        apply_env(&mut cfg.global, "GLOBAL");
        apply_env(&mut cfg.catalog, "CATALOG");
        apply_env(&mut cfg.competitor, "COMPETITOR");
        apply_env(&mut cfg.care, "CARE");
        cfg
    }
}

fn apply_env(spec: &mut BucketSpec, name: &str) {
    if let Some(v) = env_parse::<u64>(&format!("{}_INTERVAL_MS", name)) {
        spec.interval_ms = v;
    }
    if let Some(v) = env_parse::<u32>(&format!("{}_MAX_REQUESTS", name)) {
        spec.max_requests = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Mirrored marketplace listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub listing_id: String,
    pub sku: String,
    /// Aesthetic grade tier.
    pub grade: i32,
    pub price_cents: Cents,
    pub currency: String,
    pub quantity: i64,
    pub publication_state: String,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

/// Per-country market row for a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingMarket {
    pub listing_id: String,
    pub country_code: String,
    pub price_cents: Cents,
    pub active: bool,
}

/// Mirrored buyback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub state: String,
    pub country_code: Option<String>,
    pub total_cents: Option<Cents>,
    pub created_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

/// Competitor price observation; lives only for one repricing cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorPricePoint {
    pub competitor_id: String,
    pub price_cents: Cents,
    pub observed_at: DateTime<Utc>,
    pub feedback_count: i64,
}

/// Pricing inputs keyed by (sku, grade, country_code).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingParameters {
    pub sku: String,
    pub grade: i32,
    pub country_code: String,
    pub refurb_cost_cents: Cents,
    pub operational_cost_cents: Cents,
    pub warranty_risk_cost_cents: Cents,
    pub platform_fee_rate: f64,
    pub target_margin_rate: f64,
    /// Default undercut delta.
    pub price_step_cents: Cents,
    pub min_price_cents: Option<Cents>,
    pub max_price_cents: Option<Cents>,
}

/// Received purchase batch; acquisition cost is the quantity-weighted
/// average across these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseBatch {
    pub sku: String,
    pub unit_cost_cents: Cents,
    pub quantity_received: i64,
    pub received_at: DateTime<Utc>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub api_base_url: String,
    pub api_token: String,
    pub webhook_secret: Option<String>,
    /// Consumed by the out-of-core admin UI; surfaced here so it is
    /// configured in one place.
    pub jwt_secret: String,
    pub default_country: String,
    pub rate_limits: RateLimitConfig,
    pub probe_settle_ms: u64,
    pub probe_dip_cents: Cents,
    pub velocity_window_days: i64,
    pub buyback_margin_rate: f64,
    pub sync_orders_interval_secs: u64,
    pub sync_listings_interval_secs: u64,
    pub reprice_interval_secs: u64,
    pub buyback_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./repricer.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);

        let api_base_url = std::env::var("MARKETPLACE_API_BASE")
            .unwrap_or_else(|_| "https://marketplace.example.com".to_string());

        let api_token = std::env::var("MARKETPLACE_API_TOKEN").unwrap_or_default();

        let webhook_secret = std::env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

        let default_country =
            std::env::var("DEFAULT_COUNTRY").unwrap_or_else(|_| "FR".to_string());

        let probe_settle_ms = env_parse("PROBE_SETTLE_MS").unwrap_or(3_000);
        let probe_dip_cents = env_parse("PROBE_DIP_CENTS").unwrap_or(100);
        let velocity_window_days = env_parse("VELOCITY_WINDOW_DAYS").unwrap_or(30);
        let buyback_margin_rate = env_parse("BUYBACK_MARGIN_RATE").unwrap_or(0.25);

        let sync_orders_interval_secs = env_parse("SYNC_ORDERS_INTERVAL_SECS").unwrap_or(900);
        let sync_listings_interval_secs =
            env_parse("SYNC_LISTINGS_INTERVAL_SECS").unwrap_or(3_600);
        let reprice_interval_secs = env_parse("REPRICE_INTERVAL_SECS").unwrap_or(900);
        let buyback_interval_secs = env_parse("BUYBACK_INTERVAL_SECS").unwrap_or(3_600);

        Ok(Self {
            database_path,
            port,
            api_base_url,
            api_token,
            webhook_secret,
            jwt_secret,
            default_country,
            rate_limits: RateLimitConfig::from_env(),
            probe_settle_ms,
            probe_dip_cents,
            velocity_window_days,
            buyback_margin_rate,
            sync_orders_interval_secs,
            sync_listings_interval_secs,
            reprice_interval_secs,
            buyback_interval_secs,
        })
    }
}
