//! Local mirror store.
//!
//! Holds mirrored listings and orders, pricing parameters, purchase batches,
//! price history, buyback offers, the dispatch log and the persisted
//! rate-limit blob. Everything is written through idempotent upserts keyed on
//! the remote identifier, so repeating a sync converges instead of
//! duplicating.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::models::{
    ListingMarket, ListingRecord, OrderRecord, PricingParameters, PurchaseBatch,
};
use crate::money::Cents;
use crate::traffic::DispatchLog;

pub const RATE_LIMIT_CONFIG_KEY: &str = "marketplace_rate_limits";

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS listings (
    listing_id TEXT PRIMARY KEY,
    sku TEXT NOT NULL,
    grade INTEGER NOT NULL,
    price_cents INTEGER NOT NULL,
    currency TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    publication_state TEXT NOT NULL,
    last_probe_at TEXT,
    synced_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_listings_sku ON listings(sku);

CREATE TABLE IF NOT EXISTS listing_markets (
    listing_id TEXT NOT NULL,
    country_code TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (listing_id, country_code)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    sku TEXT,
    quantity INTEGER NOT NULL DEFAULT 1,
    state TEXT NOT NULL,
    country_code TEXT,
    total_cents INTEGER,
    created_at TEXT,
    payload_json TEXT NOT NULL,
    synced_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_orders_sku_created ON orders(sku, created_at);

CREATE TABLE IF NOT EXISTS pricing_parameters (
    sku TEXT NOT NULL,
    grade INTEGER NOT NULL,
    country_code TEXT NOT NULL,
    refurb_cost_cents INTEGER NOT NULL,
    operational_cost_cents INTEGER NOT NULL,
    warranty_risk_cost_cents INTEGER NOT NULL,
    platform_fee_rate REAL NOT NULL,
    target_margin_rate REAL NOT NULL,
    price_step_cents INTEGER NOT NULL,
    min_price_cents INTEGER,
    max_price_cents INTEGER,
    PRIMARY KEY (sku, grade, country_code)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS purchase_batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL,
    unit_cost_cents INTEGER NOT NULL,
    quantity_received INTEGER NOT NULL,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_batches_sku ON purchase_batches(sku);

CREATE TABLE IF NOT EXISTS price_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id TEXT NOT NULL,
    country_code TEXT NOT NULL,
    old_price_cents INTEGER,
    new_price_cents INTEGER NOT NULL,
    reason TEXT NOT NULL,
    changed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_price_history_listing
    ON price_history(listing_id, changed_at DESC);

CREATE TABLE IF NOT EXISTS buyback_prices (
    sku TEXT PRIMARY KEY,
    offer_cents INTEGER NOT NULL,
    computed_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS request_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL,
    url TEXT NOT NULL,
    priority TEXT NOT NULL,
    outcome TEXT NOT NULL,
    response_status INTEGER,
    duration_ms INTEGER NOT NULL,
    logged_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
"#;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply schema")?;
        info!("Store initialized at: {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- listings -------------------------------------------------------

    /// Insert-or-replace keyed on the remote id. `last_probe_at` is local
    /// state and survives re-sync.
    pub fn upsert_listing(&self, rec: &ListingRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO listings
                   (listing_id, sku, grade, price_cents, currency, quantity,
                    publication_state, last_probe_at, synced_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
               ON CONFLICT(listing_id) DO UPDATE SET
                   sku = excluded.sku,
                   grade = excluded.grade,
                   price_cents = excluded.price_cents,
                   currency = excluded.currency,
                   quantity = excluded.quantity,
                   publication_state = excluded.publication_state,
                   synced_at = excluded.synced_at"#,
            params![
                rec.listing_id,
                rec.sku,
                rec.grade,
                rec.price_cents,
                rec.currency,
                rec.quantity,
                rec.publication_state,
                rec.last_probe_at.map(|t| t.to_rfc3339()),
                rec.synced_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_listing(&self, listing_id: &str) -> Result<Option<ListingRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"SELECT listing_id, sku, grade, price_cents, currency, quantity,
                      publication_state, last_probe_at, synced_at
               FROM listings WHERE listing_id = ?1"#,
            params![listing_id],
            row_to_listing,
        )
        .optional()
        .context("Failed to load listing")
    }

    pub fn list_listings(&self, limit: usize, offset: usize) -> Result<Vec<ListingRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT listing_id, sku, grade, price_cents, currency, quantity,
                      publication_state, last_probe_at, synced_at
               FROM listings ORDER BY listing_id LIMIT ?1 OFFSET ?2"#,
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_listing)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list listings")
    }

    pub fn active_listing_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT listing_id FROM listings WHERE publication_state = 'active' ORDER BY listing_id",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list active listings")
    }

    pub fn listings_count(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM listings", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }

    pub fn set_listing_price(&self, listing_id: &str, price_cents: Cents) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE listings SET price_cents = ?2 WHERE listing_id = ?1",
            params![listing_id, price_cents],
        )?;
        Ok(())
    }

    pub fn set_last_probe_at(&self, listing_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE listings SET last_probe_at = ?2 WHERE listing_id = ?1",
            params![listing_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ---- per-country markets -------------------------------------------

    pub fn upsert_listing_market(&self, market: &ListingMarket) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO listing_markets (listing_id, country_code, price_cents, active)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(listing_id, country_code) DO UPDATE SET
                   price_cents = excluded.price_cents,
                   active = excluded.active"#,
            params![
                market.listing_id,
                market.country_code,
                market.price_cents,
                market.active as i64,
            ],
        )?;
        Ok(())
    }

    pub fn listing_countries(&self, listing_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT country_code FROM listing_markets WHERE listing_id = ?1 AND active = 1 ORDER BY country_code",
        )?;
        let rows = stmt.query_map(params![listing_id], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list markets")
    }

    pub fn set_market_price(
        &self,
        listing_id: &str,
        country_code: &str,
        price_cents: Cents,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO listing_markets (listing_id, country_code, price_cents, active)
               VALUES (?1, ?2, ?3, 1)
               ON CONFLICT(listing_id, country_code) DO UPDATE SET
                   price_cents = excluded.price_cents"#,
            params![listing_id, country_code, price_cents],
        )?;
        Ok(())
    }

    // ---- orders ---------------------------------------------------------

    pub fn upsert_order(&self, rec: &OrderRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO orders
                   (order_id, sku, quantity, state, country_code, total_cents,
                    created_at, payload_json, synced_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
               ON CONFLICT(order_id) DO UPDATE SET
                   sku = excluded.sku,
                   quantity = excluded.quantity,
                   state = excluded.state,
                   country_code = excluded.country_code,
                   total_cents = excluded.total_cents,
                   created_at = excluded.created_at,
                   payload_json = excluded.payload_json,
                   synced_at = excluded.synced_at"#,
            params![
                rec.order_id,
                rec.sku,
                rec.quantity,
                rec.state,
                rec.country_code,
                rec.total_cents,
                rec.created_at.map(|t| t.to_rfc3339()),
                rec.payload.to_string(),
                rec.synced_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_order(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"SELECT order_id, sku, quantity, state, country_code, total_cents,
                      created_at, payload_json, synced_at
               FROM orders WHERE order_id = ?1"#,
            params![order_id],
            row_to_order,
        )
        .optional()
        .context("Failed to load order")
    }

    pub fn list_orders(&self, limit: usize, offset: usize) -> Result<Vec<OrderRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT order_id, sku, quantity, state, country_code, total_cents,
                      created_at, payload_json, synced_at
               FROM orders ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"#,
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_order)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list orders")
    }

    /// Units sold for a SKU since the cutoff, excluding cancellations.
    pub fn sales_velocity(&self, sku: &str, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock();
        let sold: Option<i64> = conn.query_row(
            r#"SELECT SUM(quantity) FROM orders
               WHERE sku = ?1 AND created_at >= ?2 AND state != 'cancelled'"#,
            params![sku, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(sold.unwrap_or(0))
    }

    /// Per-unit sale prices for a SKU since the cutoff.
    pub fn recent_sale_prices(&self, sku: &str, since: DateTime<Utc>) -> Result<Vec<Cents>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT total_cents, quantity FROM orders
               WHERE sku = ?1 AND created_at >= ?2 AND state != 'cancelled'
                 AND total_cents IS NOT NULL AND quantity > 0"#,
        )?;
        let rows = stmt.query_map(params![sku, since.to_rfc3339()], |row| {
            let total: i64 = row.get(0)?;
            let quantity: i64 = row.get(1)?;
            Ok(total / quantity)
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load sale prices")
    }

    // ---- pricing parameters --------------------------------------------

    pub fn upsert_pricing_parameters(&self, p: &PricingParameters) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO pricing_parameters
                   (sku, grade, country_code, refurb_cost_cents, operational_cost_cents,
                    warranty_risk_cost_cents, platform_fee_rate, target_margin_rate,
                    price_step_cents, min_price_cents, max_price_cents)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(sku, grade, country_code) DO UPDATE SET
                   refurb_cost_cents = excluded.refurb_cost_cents,
                   operational_cost_cents = excluded.operational_cost_cents,
                   warranty_risk_cost_cents = excluded.warranty_risk_cost_cents,
                   platform_fee_rate = excluded.platform_fee_rate,
                   target_margin_rate = excluded.target_margin_rate,
                   price_step_cents = excluded.price_step_cents,
                   min_price_cents = excluded.min_price_cents,
                   max_price_cents = excluded.max_price_cents"#,
            params![
                p.sku,
                p.grade,
                p.country_code,
                p.refurb_cost_cents,
                p.operational_cost_cents,
                p.warranty_risk_cost_cents,
                p.platform_fee_rate,
                p.target_margin_rate,
                p.price_step_cents,
                p.min_price_cents,
                p.max_price_cents,
            ],
        )?;
        Ok(())
    }

    pub fn get_pricing_parameters(
        &self,
        sku: &str,
        grade: i32,
        country_code: &str,
    ) -> Result<Option<PricingParameters>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"SELECT sku, grade, country_code, refurb_cost_cents, operational_cost_cents,
                      warranty_risk_cost_cents, platform_fee_rate, target_margin_rate,
                      price_step_cents, min_price_cents, max_price_cents
               FROM pricing_parameters
               WHERE sku = ?1 AND grade = ?2 AND country_code = ?3"#,
            params![sku, grade, country_code],
            row_to_parameters,
        )
        .optional()
        .context("Failed to load pricing parameters")
    }

    pub fn list_pricing_parameters(&self, sku: &str) -> Result<Vec<PricingParameters>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT sku, grade, country_code, refurb_cost_cents, operational_cost_cents,
                      warranty_risk_cost_cents, platform_fee_rate, target_margin_rate,
                      price_step_cents, min_price_cents, max_price_cents
               FROM pricing_parameters WHERE sku = ?1 ORDER BY grade, country_code"#,
        )?;
        let rows = stmt.query_map(params![sku], row_to_parameters)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list pricing parameters")
    }

    // ---- purchase batches ----------------------------------------------

    pub fn add_purchase_batch(&self, batch: &PurchaseBatch) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO purchase_batches (sku, unit_cost_cents, quantity_received, received_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                batch.sku,
                batch.unit_cost_cents,
                batch.quantity_received,
                batch.received_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Quantity-weighted average unit cost across received batches.
    pub fn acquisition_cost_cents(&self, sku: &str) -> Result<Option<Cents>> {
        let conn = self.conn.lock();
        let (weighted, quantity): (Option<i64>, Option<i64>) = conn.query_row(
            r#"SELECT SUM(unit_cost_cents * quantity_received), SUM(quantity_received)
               FROM purchase_batches WHERE sku = ?1 AND quantity_received > 0"#,
            params![sku],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        match (weighted, quantity) {
            (Some(w), Some(q)) if q > 0 => Ok(Some(w / q)),
            _ => Ok(None),
        }
    }

    // ---- price history & buyback ---------------------------------------

    pub fn record_price_change(
        &self,
        listing_id: &str,
        country_code: &str,
        old_price_cents: Option<Cents>,
        new_price_cents: Cents,
        reason: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO price_history
                   (listing_id, country_code, old_price_cents, new_price_cents, reason, changed_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                listing_id,
                country_code,
                old_price_cents,
                new_price_cents,
                reason,
                changed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn price_history(
        &self,
        listing_id: &str,
        limit: usize,
    ) -> Result<Vec<(String, Option<Cents>, Cents, String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT country_code, old_price_cents, new_price_cents, reason, changed_at
               FROM price_history WHERE listing_id = ?1
               ORDER BY changed_at DESC LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(params![listing_id, limit as i64], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load price history")
    }

    pub fn distinct_skus(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT sku FROM listings ORDER BY sku")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list skus")
    }

    pub fn upsert_buyback_price(
        &self,
        sku: &str,
        offer_cents: Cents,
        computed_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO buyback_prices (sku, offer_cents, computed_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(sku) DO UPDATE SET
                   offer_cents = excluded.offer_cents,
                   computed_at = excluded.computed_at"#,
            params![sku, offer_cents, computed_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_buyback_prices(&self) -> Result<Vec<(String, Cents, String)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT sku, offer_cents, computed_at FROM buyback_prices ORDER BY sku")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list buyback prices")
    }

    // ---- dispatch log & metadata ---------------------------------------

    pub fn record_dispatch(&self, log: &DispatchLog) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO request_log
                   (request_id, url, priority, outcome, response_status, duration_ms, logged_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                log.request_id.to_string(),
                log.url,
                log.priority.as_str(),
                log.outcome.as_str(),
                log.response_status,
                log.duration_ms as i64,
                log.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO metadata (key, value) VALUES (?1, ?2)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read metadata")
    }
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_listing(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListingRecord> {
    Ok(ListingRecord {
        listing_id: row.get(0)?,
        sku: row.get(1)?,
        grade: row.get(2)?,
        price_cents: row.get(3)?,
        currency: row.get(4)?,
        quantity: row.get(5)?,
        publication_state: row.get(6)?,
        last_probe_at: parse_ts(row.get(7)?),
        synced_at: parse_ts(row.get(8)?).unwrap_or_else(Utc::now),
    })
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRecord> {
    let payload: String = row.get(7)?;
    Ok(OrderRecord {
        order_id: row.get(0)?,
        sku: row.get(1)?,
        quantity: row.get(2)?,
        state: row.get(3)?,
        country_code: row.get(4)?,
        total_cents: row.get(5)?,
        created_at: parse_ts(row.get(6)?),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        synced_at: parse_ts(row.get(8)?).unwrap_or_else(Utc::now),
    })
}

fn row_to_parameters(row: &rusqlite::Row<'_>) -> rusqlite::Result<PricingParameters> {
    Ok(PricingParameters {
        sku: row.get(0)?,
        grade: row.get(1)?,
        country_code: row.get(2)?,
        refurb_cost_cents: row.get(3)?,
        operational_cost_cents: row.get(4)?,
        warranty_risk_cost_cents: row.get(5)?,
        platform_fee_rate: row.get(6)?,
        target_margin_rate: row.get(7)?,
        price_step_cents: row.get(8)?,
        min_price_cents: row.get(9)?,
        max_price_cents: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::new(path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    fn listing(id: &str, sku: &str) -> ListingRecord {
        ListingRecord {
            listing_id: id.to_string(),
            sku: sku.to_string(),
            grade: 10,
            price_cents: 19_999,
            currency: "EUR".to_string(),
            quantity: 3,
            publication_state: "active".to_string(),
            last_probe_at: None,
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn listing_upsert_is_idempotent() {
        let (store, _dir) = temp_store();
        let rec = listing("L1", "SKU-1");

        store.upsert_listing(&rec).unwrap();
        store.upsert_listing(&rec).unwrap();

        assert_eq!(store.listings_count(), 1);
        let loaded = store.get_listing("L1").unwrap().unwrap();
        assert_eq!(loaded.sku, "SKU-1");
        assert_eq!(loaded.price_cents, 19_999);
    }

    #[test]
    fn resync_preserves_last_probe_at() {
        let (store, _dir) = temp_store();
        let rec = listing("L1", "SKU-1");
        store.upsert_listing(&rec).unwrap();

        let probed_at = Utc::now();
        store.set_last_probe_at("L1", probed_at).unwrap();
        store.upsert_listing(&rec).unwrap();

        let loaded = store.get_listing("L1").unwrap().unwrap();
        assert!(loaded.last_probe_at.is_some());
    }

    #[test]
    fn acquisition_cost_is_quantity_weighted() {
        let (store, _dir) = temp_store();
        store
            .add_purchase_batch(&PurchaseBatch {
                sku: "SKU-1".into(),
                unit_cost_cents: 10_000,
                quantity_received: 3,
                received_at: Utc::now(),
            })
            .unwrap();
        store
            .add_purchase_batch(&PurchaseBatch {
                sku: "SKU-1".into(),
                unit_cost_cents: 14_000,
                quantity_received: 1,
                received_at: Utc::now(),
            })
            .unwrap();

        // (10000*3 + 14000*1) / 4 = 11000
        assert_eq!(store.acquisition_cost_cents("SKU-1").unwrap(), Some(11_000));
        assert_eq!(store.acquisition_cost_cents("SKU-2").unwrap(), None);
    }

    #[test]
    fn sales_velocity_counts_recent_units() {
        let (store, _dir) = temp_store();
        let now = Utc::now();
        for (id, quantity, days_ago, state) in [
            ("O1", 2, 1, "accepted"),
            ("O2", 3, 5, "shipped"),
            ("O3", 4, 60, "accepted"),
            ("O4", 9, 1, "cancelled"),
        ] {
            store
                .upsert_order(&OrderRecord {
                    order_id: id.to_string(),
                    sku: Some("SKU-1".into()),
                    quantity,
                    state: state.to_string(),
                    country_code: Some("FR".into()),
                    total_cents: Some(20_000 * quantity),
                    created_at: Some(now - Duration::days(days_ago)),
                    payload: serde_json::json!({}),
                    synced_at: now,
                })
                .unwrap();
        }

        let velocity = store
            .sales_velocity("SKU-1", now - Duration::days(30))
            .unwrap();
        assert_eq!(velocity, 5);
    }

    #[test]
    fn metadata_round_trips_rate_limit_blob() {
        let (store, _dir) = temp_store();
        let cfg = crate::models::RateLimitConfig::default();
        store
            .set_metadata(RATE_LIMIT_CONFIG_KEY, &serde_json::to_string(&cfg).unwrap())
            .unwrap();
        let raw = store.get_metadata(RATE_LIMIT_CONFIG_KEY).unwrap().unwrap();
        let back: crate::models::RateLimitConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn listing_markets_track_active_countries() {
        let (store, _dir) = temp_store();
        store.upsert_listing(&listing("L1", "SKU-1")).unwrap();
        for (country, active) in [("FR", true), ("DE", true), ("ES", false)] {
            store
                .upsert_listing_market(&ListingMarket {
                    listing_id: "L1".into(),
                    country_code: country.into(),
                    price_cents: 19_999,
                    active,
                })
                .unwrap();
        }
        assert_eq!(store.listing_countries("L1").unwrap(), vec!["DE", "FR"]);
    }
}
