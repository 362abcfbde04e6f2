//! Inbound webhook handling.
//!
//! Payloads are `{ type, payload }`; recognised types trigger a HIGH-priority
//! refetch of the full record. When a secret is configured, the raw body must
//! carry a valid HMAC-SHA256 signature (hex, constant-time compare).

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::sync::driver::SyncDriver;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Handled,
    Ignored,
}

/// Constant-time verification of a hex-encoded HMAC-SHA256 signature over
/// the raw request body.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

fn remote_id(payload: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        payload.get(key).and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    })
}

pub async fn handle_webhook(
    driver: &SyncDriver,
    event: WebhookEvent,
) -> Result<WebhookOutcome, CoreError> {
    match event.event_type.as_str() {
        "order.created" | "order.updated" => {
            let order_id = remote_id(&event.payload, &["order_id", "id"]).ok_or_else(|| {
                CoreError::Data("webhook order event without order id".into())
            })?;
            info!(order_id = %order_id, event = %event.event_type, "webhook order refresh");
            driver.refresh_order(&order_id).await?;
            Ok(WebhookOutcome::Handled)
        }
        "listing.updated" => {
            let listing_id =
                remote_id(&event.payload, &["listing_id", "id"]).ok_or_else(|| {
                    CoreError::Data("webhook listing event without listing id".into())
                })?;
            info!(listing_id = %listing_id, "webhook listing refresh");
            driver.refresh_listing(&listing_id).await?;
            Ok(WebhookOutcome::Handled)
        }
        other => {
            warn!(event_type = other, "ignoring unknown webhook type");
            Ok(WebhookOutcome::Ignored)
        }
    }
}
