//! Traffic controller: serialises every outbound marketplace request.
//!
//! Each request is classified into one of four bucket classes, queued by
//! priority, and dispatched only when both the GLOBAL bucket and the class
//! bucket can cover its cost. One dispatcher loop runs per class; the HTTP
//! calls themselves are fired off the loop so a slow response never blocks
//! token accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::RateLimitConfig;
use crate::traffic::bucket::TokenBucket;
use crate::traffic::queue::{Priority, PriorityQueue};

const BACKOFF_MS: u64 = 100;
const MAX_RETRIES: u32 = 3;
const DEFAULT_DEADLINE_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketClass {
    Global,
    Catalog,
    Competitor,
    Care,
}

impl BucketClass {
    pub const ALL: [BucketClass; 4] = [
        BucketClass::Global,
        BucketClass::Catalog,
        BucketClass::Competitor,
        BucketClass::Care,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketClass::Global => "global",
            BucketClass::Catalog => "catalog",
            BucketClass::Competitor => "competitor",
            BucketClass::Care => "care",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// URL -> bucket class, by substring match. First hit wins; everything else
/// is GLOBAL (which is also the meta-limit applied to every request).
pub struct RouteTable {
    rules: Vec<(String, BucketClass)>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            rules: vec![
                ("/backbox/v1/competitors".into(), BucketClass::Competitor),
                ("/listings".into(), BucketClass::Catalog),
                ("/sav/".into(), BucketClass::Care),
                ("/messages".into(), BucketClass::Care),
            ],
        }
    }
}

impl RouteTable {
    pub fn classify(&self, url: &str) -> BucketClass {
        self.rules
            .iter()
            .find(|(needle, _)| url.contains(needle.as_str()))
            .map(|(_, class)| *class)
            .unwrap_or(BucketClass::Global)
    }
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn put(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: reqwest::Method::PUT,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_str(&self.body)
            .map_err(|e| CoreError::Data(format!("unparseable response body: {}", e)))
    }
}

/// The HTTP seam. Production uses reqwest; tests script responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, CoreError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Client carries the bearer token as a default header so individual
    /// requests stay header-free.
    pub fn new(api_token: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut headers = reqwest::header::HeaderMap::new();
        if !api_token.is_empty() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", api_token)
                    .parse()
                    .context("Invalid API token format")?,
            );
        }
        headers.insert(
            reqwest::header::ACCEPT,
            "application/json".parse().expect("static header"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, CoreError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        Ok(ApiResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchOutcome {
    Executed,
    RateLimited,
    Error,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Executed => "EXECUTED",
            DispatchOutcome::RateLimited => "429_HIT",
            DispatchOutcome::Error => "ERROR",
        }
    }
}

/// One record per dispatch attempt, fed to the opaque log sink.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchLog {
    pub request_id: Uuid,
    pub url: String,
    pub priority: Priority,
    pub outcome: DispatchOutcome,
    pub response_status: Option<u16>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub type LogSink = Arc<dyn Fn(DispatchLog) + Send + Sync>;

struct PendingRequest {
    id: Uuid,
    request: OutboundRequest,
    priority: Priority,
    cost: u32,
    retries: u32,
    deadline_ms: u64,
    tx: oneshot::Sender<Result<ApiResponse, CoreError>>,
}

struct Lane {
    bucket: Arc<TokenBucket>,
    queue: Mutex<PriorityQueue<PendingRequest>>,
    processing: AtomicBool,
}

impl Lane {
    fn new(bucket: TokenBucket) -> Self {
        Self {
            bucket: Arc::new(bucket),
            queue: Mutex::new(PriorityQueue::new()),
            processing: AtomicBool::new(false),
        }
    }
}

enum Step {
    Dispatch(PendingRequest),
    Backoff,
    Exit,
}

pub struct TrafficController {
    lanes: [Lane; 4],
    routes: RouteTable,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    log_sink: Option<LogSink>,
    shutdown: AtomicBool,
    default_deadline_ms: u64,
}

impl TrafficController {
    pub fn new(
        config: &RateLimitConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        log_sink: Option<LogSink>,
    ) -> Arc<Self> {
        let lanes = [
            Lane::new(TokenBucket::new(config.global, clock.clone())),
            Lane::new(TokenBucket::new(config.catalog, clock.clone())),
            Lane::new(TokenBucket::new(config.competitor, clock.clone())),
            Lane::new(TokenBucket::new(config.care, clock.clone())),
        ];
        Arc::new(Self {
            lanes,
            routes: RouteTable::default(),
            transport,
            clock,
            log_sink,
            shutdown: AtomicBool::new(false),
            default_deadline_ms: DEFAULT_DEADLINE_MS,
        })
    }

    /// Enqueue a request and await its eventual response.
    ///
    /// `cost` is the token envelope for this call: `1` for a plain request,
    /// `2` to additionally reserve one token for a follow-up, `0` to consume
    /// a previously reserved token (never waits for a refill).
    pub async fn schedule(
        self: &Arc<Self>,
        request: OutboundRequest,
        priority: Priority,
        cost: u32,
    ) -> Result<ApiResponse, CoreError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(CoreError::Cancelled("controller is shut down".into()));
        }

        let class = self.routes.classify(&request.url);
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest {
            id: Uuid::new_v4(),
            request,
            priority,
            cost,
            retries: 0,
            deadline_ms: self.clock.now_ms() + self.default_deadline_ms,
            tx,
        };

        self.enqueue(class, pending);

        rx.await
            .unwrap_or_else(|_| Err(CoreError::Cancelled("request dropped".into())))
    }

    fn enqueue(self: &Arc<Self>, class: BucketClass, pending: PendingRequest) {
        let priority = pending.priority;
        self.lanes[class.index()].queue.lock().enqueue(pending, priority);
        self.ensure_dispatcher(class);
    }

    /// At most one dispatcher loop per class.
    fn ensure_dispatcher(self: &Arc<Self>, class: BucketClass) {
        let lane = &self.lanes[class.index()];
        if lane
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let controller = Arc::clone(self);
            tokio::spawn(async move { controller.run_dispatcher(class).await });
        }
    }

    async fn run_dispatcher(self: Arc<Self>, class: BucketClass) {
        debug!(class = class.as_str(), "dispatcher loop started");
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                self.drain_class(class, "shutdown");
                self.lanes[class.index()].processing.store(false, Ordering::SeqCst);
                return;
            }

            match self.next_step(class) {
                Step::Exit => {
                    debug!(class = class.as_str(), "dispatcher loop idle, exiting");
                    return;
                }
                Step::Backoff => sleep(Duration::from_millis(BACKOFF_MS)).await,
                Step::Dispatch(pending) => {
                    let controller = Arc::clone(&self);
                    tokio::spawn(async move { controller.dispatch_one(class, pending).await });
                }
            }
        }
    }

    /// Decide what to do with the head of the class queue. Token accounting
    /// happens under the queue lock so no other path can interleave between
    /// the budget check and the spend.
    fn next_step(&self, class: BucketClass) -> Step {
        let lane = &self.lanes[class.index()];
        let now_ms = self.clock.now_ms();
        let mut queue = lane.queue.lock();

        loop {
            let (cost, expired, abandoned) = match queue.peek() {
                None => {
                    // Cleared under the lock: a concurrent enqueue either
                    // lands before this check or sees the flag cleared and
                    // spawns a fresh loop.
                    lane.processing.store(false, Ordering::SeqCst);
                    return Step::Exit;
                }
                Some(head) => (
                    head.cost,
                    now_ms > head.deadline_ms,
                    head.tx.is_closed(),
                ),
            };

            if abandoned {
                queue.dequeue();
                continue;
            }
            if expired {
                if let Some(head) = queue.dequeue() {
                    let _ = head.tx.send(Err(CoreError::Cancelled(
                        "deadline elapsed before dispatch".into(),
                    )));
                }
                continue;
            }

            if !self.take_tokens(class, cost) {
                return Step::Backoff;
            }

            let pending = queue.dequeue().expect("peeked head");
            if pending.cost == 0 {
                // Reserved dispatch: the budget was pre-paid. A missing
                // reservation is a caller bug surfaced as an error.
                if let Err(e) = self.consume_reserved(class) {
                    let _ = pending.tx.send(Err(e));
                    continue;
                }
            }
            return Step::Dispatch(pending);
        }
    }

    /// Spend (and for a cost-2 envelope, reserve) on both the global and the
    /// class bucket, all-or-nothing. Cost 0 is handled separately.
    fn take_tokens(&self, class: BucketClass, cost: u32) -> bool {
        if cost == 0 {
            return true;
        }
        let (spend, reserve) = (1, cost.saturating_sub(1));
        let class_bucket = &self.lanes[class.index()].bucket;
        let global_bucket = &self.lanes[BucketClass::Global.index()].bucket;

        if class == BucketClass::Global {
            return global_bucket.acquire(spend, reserve);
        }
        if !class_bucket.acquire(spend, reserve) {
            return false;
        }
        if !global_bucket.acquire(spend, reserve) {
            class_bucket.unacquire(spend, reserve);
            return false;
        }
        true
    }

    fn consume_reserved(&self, class: BucketClass) -> Result<(), CoreError> {
        let global_bucket = &self.lanes[BucketClass::Global.index()].bucket;
        global_bucket.spend_reserved(1)?;
        if class != BucketClass::Global {
            self.lanes[class.index()].bucket.spend_reserved(1)?;
        }
        Ok(())
    }

    async fn dispatch_one(self: Arc<Self>, class: BucketClass, mut pending: PendingRequest) {
        let started_ms = self.clock.now_ms();
        let remaining = pending.deadline_ms.saturating_sub(started_ms).max(1);

        let result = timeout(
            Duration::from_millis(remaining),
            self.transport.execute(&pending.request),
        )
        .await;
        let duration_ms = self.clock.now_ms().saturating_sub(started_ms);

        match result {
            Err(_) => {
                self.emit_log(&pending, DispatchOutcome::Error, None, duration_ms);
                let _ = pending.tx.send(Err(CoreError::Cancelled(
                    "deadline elapsed awaiting response".into(),
                )));
            }
            Ok(Err(e)) => {
                self.emit_log(&pending, DispatchOutcome::Error, None, duration_ms);
                let _ = pending.tx.send(Err(e));
            }
            Ok(Ok(response)) if response.status == 429 || response.status >= 500 => {
                let outcome = if response.status == 429 {
                    DispatchOutcome::RateLimited
                } else {
                    DispatchOutcome::Executed
                };
                self.emit_log(&pending, outcome, Some(response.status), duration_ms);

                if pending.retries >= MAX_RETRIES {
                    // Surfaced unmodified; the caller sees the raw status.
                    let _ = pending.tx.send(Ok(response));
                    return;
                }

                pending.retries += 1;
                // A retry pays the single-call cost; any reservation made by
                // the first attempt is still held for its follow-up.
                pending.cost = 1;
                let delay_ms = 1_000 * (1u64 << pending.retries);
                warn!(
                    url = %pending.request.url,
                    status = response.status,
                    retry = pending.retries,
                    delay_ms,
                    "transient remote error, re-enqueueing"
                );
                sleep(Duration::from_millis(delay_ms)).await;

                if self.shutdown.load(Ordering::SeqCst) {
                    let _ = pending.tx.send(Err(CoreError::Cancelled("shutdown".into())));
                } else {
                    self.enqueue(class, pending);
                }
            }
            Ok(Ok(response)) => {
                self.emit_log(
                    &pending,
                    DispatchOutcome::Executed,
                    Some(response.status),
                    duration_ms,
                );
                let _ = pending.tx.send(Ok(response));
            }
        }
    }

    fn emit_log(
        &self,
        pending: &PendingRequest,
        outcome: DispatchOutcome,
        response_status: Option<u16>,
        duration_ms: u64,
    ) {
        if let Some(sink) = &self.log_sink {
            sink(DispatchLog {
                request_id: pending.id,
                url: pending.request.url.clone(),
                priority: pending.priority,
                outcome,
                response_status,
                duration_ms,
                timestamp: self.clock.now_utc(),
            });
        }
    }

    /// Atomically reshape every bucket; queues and reservations survive.
    pub fn update_config(&self, config: &RateLimitConfig) {
        self.lanes[BucketClass::Global.index()].bucket.reconfigure(config.global);
        self.lanes[BucketClass::Catalog.index()].bucket.reconfigure(config.catalog);
        self.lanes[BucketClass::Competitor.index()]
            .bucket
            .reconfigure(config.competitor);
        self.lanes[BucketClass::Care.index()].bucket.reconfigure(config.care);
    }

    /// Per-class (capacity, spent, reserved, available) for the admin
    /// readout.
    pub fn bucket_snapshots(&self) -> Vec<(BucketClass, (u32, u32, u32, u32))> {
        BucketClass::ALL
            .iter()
            .map(|class| (*class, self.lanes[class.index()].bucket.snapshot()))
            .collect()
    }

    /// Stop accepting work and reject everything still queued.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for class in BucketClass::ALL {
            self.drain_class(class, "shutdown");
        }
    }

    fn drain_class(&self, class: BucketClass, reason: &str) {
        let drained = self.lanes[class.index()].queue.lock().drain_all();
        for pending in drained {
            let _ = pending.tx.send(Err(CoreError::Cancelled(reason.into())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_table_classifies_endpoint_paths() {
        let routes = RouteTable::default();
        assert_eq!(
            routes.classify("https://api.example.com/ws/backbox/v1/competitors/42?country=FR"),
            BucketClass::Competitor
        );
        assert_eq!(
            routes.classify("https://api.example.com/ws/listings?page=1"),
            BucketClass::Catalog
        );
        assert_eq!(
            routes.classify("https://api.example.com/ws/sav/123"),
            BucketClass::Care
        );
        assert_eq!(
            routes.classify("https://api.example.com/ws/buyback/v1/orders/7/messages"),
            BucketClass::Care
        );
        assert_eq!(
            routes.classify("https://api.example.com/ws/buyback/v1/orders"),
            BucketClass::Global
        );
        assert_eq!(
            routes.classify("https://api.example.com/ws/tasks/9"),
            BucketClass::Global
        );
    }

    #[test]
    fn dispatch_outcome_strings() {
        assert_eq!(DispatchOutcome::Executed.as_str(), "EXECUTED");
        assert_eq!(DispatchOutcome::RateLimited.as_str(), "429_HIT");
        assert_eq!(DispatchOutcome::Error.as_str(), "ERROR");
    }
}
