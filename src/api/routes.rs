//! Admin API handlers.
//!
//! Every response is a `{ success, ... }` envelope. When a remote call
//! fails, the remote status is mirrored on the response.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::api::AppState;
use crate::error::CoreError;
use crate::models::{PricingParameters, RateLimitConfig};
use crate::scheduler::{TASK_SYNC_LISTINGS, TASK_SYNC_ORDERS};
use crate::store::RATE_LIMIT_CONFIG_KEY;
use crate::sync::{handle_webhook, verify_signature, WebhookEvent, WebhookOutcome};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
}

fn core_error(e: CoreError) -> (StatusCode, Json<Value>) {
    // Remote failures mirror the remote status on the admin response.
    let status = match e.remote_status() {
        Some(remote) => StatusCode::from_u16(remote).unwrap_or(StatusCode::BAD_GATEWAY),
        None => match &e {
            CoreError::Network(_) => StatusCode::BAD_GATEWAY,
            CoreError::Data(_) => StatusCode::NOT_FOUND,
            CoreError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        },
    };
    failure(status, e.to_string())
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

// ---- pricing ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    pub country: Option<String>,
}

pub async fn post_probe(
    Path(listing_id): Path<String>,
    Query(params): Query<ProbeQuery>,
    State(state): State<AppState>,
) -> ApiResult {
    let report = state
        .probe
        .run(&listing_id, params.country.as_deref())
        .await
        .map_err(core_error)?;
    Ok(Json(json!({ "success": true, "probe": report })))
}

pub async fn post_recover(
    Path(listing_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    let summary = state
        .orchestrator
        .recover(&listing_id)
        .await
        .map_err(core_error)?;
    Ok(Json(json!({ "success": true, "recovery": summary })))
}

pub async fn post_reprice(
    Path(listing_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    let summary = state
        .orchestrator
        .reprice(&listing_id)
        .await
        .map_err(core_error)?;
    Ok(Json(json!({ "success": true, "repricing": summary })))
}

// ---- sync ---------------------------------------------------------------

pub async fn post_sync_orders(State(state): State<AppState>) -> ApiResult {
    let started = state.scheduler.trigger(TASK_SYNC_ORDERS).map_err(internal)?;
    Ok(Json(json!({ "success": true, "started": started })))
}

pub async fn post_sync_listings(State(state): State<AppState>) -> ApiResult {
    let started = state
        .scheduler
        .trigger(TASK_SYNC_LISTINGS)
        .map_err(internal)?;
    Ok(Json(json!({ "success": true, "started": started })))
}

// ---- readouts -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn get_orders(
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
) -> ApiResult {
    let orders = state
        .store
        .list_orders(page.limit.unwrap_or(100), page.offset.unwrap_or(0))
        .map_err(internal)?;
    Ok(Json(json!({ "success": true, "count": orders.len(), "orders": orders })))
}

pub async fn get_listings(
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
) -> ApiResult {
    let listings = state
        .store
        .list_listings(page.limit.unwrap_or(100), page.offset.unwrap_or(0))
        .map_err(internal)?;
    Ok(Json(json!({ "success": true, "count": listings.len(), "listings": listings })))
}

pub async fn get_price_history(
    Path(listing_id): Path<String>,
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
) -> ApiResult {
    let rows = state
        .store
        .price_history(&listing_id, page.limit.unwrap_or(100))
        .map_err(internal)?;
    let history: Vec<Value> = rows
        .into_iter()
        .map(|(country, old, new, reason, at)| {
            json!({
                "country_code": country,
                "old_price_cents": old,
                "new_price_cents": new,
                "reason": reason,
                "changed_at": at,
            })
        })
        .collect();
    Ok(Json(json!({ "success": true, "history": history })))
}

pub async fn get_buyback_prices(State(state): State<AppState>) -> ApiResult {
    let rows = state.store.list_buyback_prices().map_err(internal)?;
    let offers: Vec<Value> = rows
        .into_iter()
        .map(|(sku, cents, at)| json!({ "sku": sku, "offer_cents": cents, "computed_at": at }))
        .collect();
    Ok(Json(json!({ "success": true, "offers": offers })))
}

// ---- pricing parameters -------------------------------------------------

pub async fn get_parameters(
    Path(sku): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    let params = state.store.list_pricing_parameters(&sku).map_err(internal)?;
    Ok(Json(json!({ "success": true, "parameters": params })))
}

pub async fn post_parameters(
    Path(sku): Path<String>,
    State(state): State<AppState>,
    Json(mut params): Json<PricingParameters>,
) -> ApiResult {
    params.sku = sku;
    if params.platform_fee_rate + params.target_margin_rate >= 1.0 {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "platform_fee_rate + target_margin_rate must stay below 1",
        ));
    }
    state
        .store
        .upsert_pricing_parameters(&params)
        .map_err(internal)?;
    Ok(Json(json!({ "success": true, "parameters": params })))
}

// ---- scheduler ----------------------------------------------------------

pub async fn get_scheduler_status(State(state): State<AppState>) -> ApiResult {
    let status: Value = state
        .scheduler
        .status()
        .into_iter()
        .map(|(name, st)| (name.to_string(), serde_json::to_value(st).unwrap_or(Value::Null)))
        .collect::<serde_json::Map<String, Value>>()
        .into();
    Ok(Json(json!({ "success": true, "tasks": status })))
}

pub async fn post_scheduler_trigger(
    Path(task): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    let started = state
        .scheduler
        .trigger(&task)
        .map_err(|e| failure(StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(json!({ "success": true, "started": started })))
}

pub async fn post_scheduler_trigger_all(State(state): State<AppState>) -> ApiResult {
    let results: Value = state
        .scheduler
        .trigger_all()
        .into_iter()
        .map(|(name, started)| (name.to_string(), Value::Bool(started)))
        .collect::<serde_json::Map<String, Value>>()
        .into();
    Ok(Json(json!({ "success": true, "triggered": results })))
}

// ---- rate limits --------------------------------------------------------

pub async fn get_rate_limits(State(state): State<AppState>) -> ApiResult {
    let config = state
        .store
        .get_metadata(RATE_LIMIT_CONFIG_KEY)
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str::<RateLimitConfig>(&raw).ok())
        .unwrap_or(state.config.rate_limits);

    let buckets: Value = state
        .controller
        .bucket_snapshots()
        .into_iter()
        .map(|(class, (capacity, spent, reserved, available))| {
            (
                class.as_str().to_string(),
                json!({
                    "capacity": capacity,
                    "spent": spent,
                    "reserved": reserved,
                    "available": available,
                }),
            )
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();

    Ok(Json(json!({ "success": true, "config": config, "buckets": buckets })))
}

pub async fn put_rate_limits(
    State(state): State<AppState>,
    Json(config): Json<RateLimitConfig>,
) -> ApiResult {
    state.controller.update_config(&config);
    state
        .store
        .set_metadata(
            RATE_LIMIT_CONFIG_KEY,
            &serde_json::to_string(&config).map_err(internal)?,
        )
        .map_err(internal)?;
    Ok(Json(json!({ "success": true, "config": config })))
}

// ---- bulk upload --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BulkUploadRequest {
    pub catalog: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_delimiter() -> char {
    ';'
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_max_polls() -> u32 {
    30
}

pub async fn post_bulk_upload(
    State(state): State<AppState>,
    Json(request): Json<BulkUploadRequest>,
) -> ApiResult {
    let task_id = state
        .client
        .bulk_upload_listings(&request.catalog, request.delimiter, &request.encoding)
        .await
        .map_err(core_error)?;
    let done = state
        .client
        .wait_for_task(&task_id, request.max_polls)
        .await
        .map_err(core_error)?;
    Ok(Json(json!({ "success": done, "task_id": task_id })))
}

// ---- order care ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OrderMessageRequest {
    pub body: String,
}

pub async fn post_order_message(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<OrderMessageRequest>,
) -> ApiResult {
    state
        .client
        .post_order_message(&order_id, &request.body)
        .await
        .map_err(core_error)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn post_order_suspend(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    state
        .client
        .suspend_order(&order_id)
        .await
        .map_err(core_error)?;
    Ok(Json(json!({ "success": true })))
}

// ---- webhook ------------------------------------------------------------

pub async fn post_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    if let Some(secret) = &state.config.webhook_secret {
        let signature = headers
            .get("X-Signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("webhook signature mismatch");
            return Err(failure(StatusCode::UNAUTHORIZED, "invalid signature"));
        }
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| failure(StatusCode::BAD_REQUEST, format!("invalid payload: {}", e)))?;
    let outcome = handle_webhook(&state.sync, event)
        .await
        .map_err(core_error)?;

    Ok(Json(json!({
        "success": true,
        "handled": outcome == WebhookOutcome::Handled,
        "received_at": Utc::now().to_rfc3339(),
    })))
}
