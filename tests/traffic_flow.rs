//! End-to-end traffic controller scenarios against a scripted transport,
//! running on paused time so refills and backoffs are deterministic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use repricer_backend::clock::{Clock, SystemClock};
use repricer_backend::error::CoreError;
use repricer_backend::models::{BucketSpec, RateLimitConfig};
use repricer_backend::traffic::{
    DispatchLog, DispatchOutcome, OutboundRequest, Priority, TrafficController, Transport,
};

use common::MockTransport;

fn limits(global: (u64, u32)) -> RateLimitConfig {
    RateLimitConfig {
        global: BucketSpec {
            interval_ms: global.0,
            max_requests: global.1,
        },
        catalog: BucketSpec {
            interval_ms: 1_000,
            max_requests: 5,
        },
        competitor: BucketSpec {
            interval_ms: 1_000,
            max_requests: 5,
        },
        care: BucketSpec {
            interval_ms: 1_000,
            max_requests: 5,
        },
    }
}

fn controller(
    config: RateLimitConfig,
    transport: Arc<dyn Transport>,
    logs: Option<Arc<Mutex<Vec<DispatchLog>>>>,
) -> Arc<TrafficController> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let sink = logs.map(|collected| {
        let sink: repricer_backend::traffic::LogSink =
            Arc::new(move |log: DispatchLog| collected.lock().push(log));
        sink
    });
    TrafficController::new(&config, transport, clock, sink)
}

#[tokio::test(start_paused = true)]
async fn rate_limited_requests_queue_and_keep_fifo_order() {
    let transport = MockTransport::new();
    let controller = controller(limits((500, 1)), transport.clone(), None);

    let started = tokio::time::Instant::now();
    let (a, b, c) = tokio::join!(
        controller.schedule(
            OutboundRequest::get("https://api.test/ws/ping?n=1"),
            Priority::Normal,
            1
        ),
        controller.schedule(
            OutboundRequest::get("https://api.test/ws/ping?n=2"),
            Priority::Normal,
            1
        ),
        controller.schedule(
            OutboundRequest::get("https://api.test/ws/ping?n=3"),
            Priority::Normal,
            1
        ),
    );

    assert_eq!(a.unwrap().status, 200);
    assert_eq!(b.unwrap().status, 200);
    assert_eq!(c.unwrap().status, 200);

    // One token per 500ms: three requests need at least two refills.
    assert!(started.elapsed() >= Duration::from_millis(1_000));

    let urls: Vec<String> = transport.calls().iter().map(|c| c.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            "https://api.test/ws/ping?n=1",
            "https://api.test/ws/ping?n=2",
            "https://api.test/ws/ping?n=3",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn high_priority_preempts_low_on_refill() {
    let transport = MockTransport::new();
    let controller = controller(limits((500, 1)), transport.clone(), None);

    // Drain the single token.
    controller
        .schedule(
            OutboundRequest::get("https://api.test/ws/ping?first"),
            Priority::Normal,
            1,
        )
        .await
        .unwrap();

    // Enqueue LOW before HIGH while the bucket is empty.
    let (low, high) = tokio::join!(
        controller.schedule(
            OutboundRequest::get("https://api.test/ws/ping?low"),
            Priority::Low,
            1
        ),
        controller.schedule(
            OutboundRequest::get("https://api.test/ws/ping?high"),
            Priority::High,
            1
        ),
    );
    low.unwrap();
    high.unwrap();

    let urls: Vec<String> = transport.calls().iter().map(|c| c.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            "https://api.test/ws/ping?first",
            "https://api.test/ws/ping?high",
            "https://api.test/ws/ping?low",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limit_response_retries_with_backoff() {
    let transport = MockTransport::new();
    transport
        .script("/ws/ping", 429, "slow down")
        .script("/ws/ping", 200, r#"{"ok":true}"#);

    let logs = Arc::new(Mutex::new(Vec::new()));
    let controller = controller(limits((100, 10)), transport.clone(), Some(logs.clone()));

    let started = tokio::time::Instant::now();
    let response = controller
        .schedule(
            OutboundRequest::get("https://api.test/ws/ping?flaky"),
            Priority::Normal,
            1,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    // First retry sleeps 1000 * 2^1 ms.
    assert!(started.elapsed() >= Duration::from_millis(2_000));
    assert!(started.elapsed() < Duration::from_millis(4_000));

    let outcomes: Vec<DispatchOutcome> = logs.lock().iter().map(|l| l.outcome).collect();
    assert_eq!(
        outcomes,
        vec![DispatchOutcome::RateLimited, DispatchOutcome::Executed]
    );
}

#[tokio::test(start_paused = true)]
async fn persistent_429_is_surfaced_unmodified_after_retries() {
    let transport = MockTransport::new();
    for _ in 0..8 {
        transport.script("/ws/ping", 429, "still limited");
    }
    let controller = controller(limits((100, 10)), transport.clone(), None);

    let response = controller
        .schedule(
            OutboundRequest::get("https://api.test/ws/ping?hopeless"),
            Priority::Normal,
            1,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 429);
    // Initial attempt plus three retries.
    assert_eq!(transport.calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn probe_envelope_reserves_the_restore_token() {
    let transport = MockTransport::new();
    let controller = controller(limits((1_000, 2)), transport.clone(), None);

    // Leave one token in the global bucket.
    controller
        .schedule(
            OutboundRequest::get("https://api.test/ws/ping?drain"),
            Priority::Normal,
            1,
        )
        .await
        .unwrap();

    let started = tokio::time::Instant::now();

    // Dip: needs spend+reserve = 2, so it waits for the first refill.
    controller
        .schedule(
            OutboundRequest::post(
                "https://api.test/ws/listings/L1",
                serde_json::json!({"price": 1.0}),
            ),
            Priority::Normal,
            2,
        )
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(1_000));

    // Peek: the reservation hides one token, so this waits for the next
    // refill.
    controller
        .schedule(
            OutboundRequest::get("https://api.test/ws/backbox/v1/competitors/L1?country=FR"),
            Priority::High,
            1,
        )
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2_000));

    // Peak: cost 0 consumes the reserved token and never waits.
    let before_peak = tokio::time::Instant::now();
    controller
        .schedule(
            OutboundRequest::post(
                "https://api.test/ws/listings/L1",
                serde_json::json!({"price": 190.0}),
            ),
            Priority::High,
            0,
        )
        .await
        .unwrap();
    assert!(before_peak.elapsed() < Duration::from_millis(100));

    // Exactly two listing updates made it to the wire.
    assert_eq!(transport.calls_containing("/ws/listings/L1").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reserved_dispatch_without_reservation_errors() {
    let transport = MockTransport::new();
    let controller = controller(limits((1_000, 5)), transport.clone(), None);

    let result = controller
        .schedule(
            OutboundRequest::get("https://api.test/ws/ping?unreserved"),
            Priority::Normal,
            0,
        )
        .await;

    assert!(matches!(result, Err(CoreError::Data(_))));
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn starved_request_is_cancelled_at_its_deadline() {
    let transport = MockTransport::new();
    let controller = controller(limits((1_000, 0)), transport.clone(), None);

    let started = tokio::time::Instant::now();
    let result = controller
        .schedule(
            OutboundRequest::get("https://api.test/ws/ping?starved"),
            Priority::Normal,
            1,
        )
        .await;

    assert!(matches!(result, Err(CoreError::Cancelled(_))));
    assert!(started.elapsed() >= Duration::from_millis(30_000));
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_queued_requests() {
    let transport = MockTransport::new();
    let controller = controller(limits((60_000, 0)), transport.clone(), None);

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .schedule(
                    OutboundRequest::get("https://api.test/ws/ping?doomed"),
                    Priority::Normal,
                    1,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    controller.shutdown();
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled(_))));
}

#[tokio::test(start_paused = true)]
async fn hot_reconfigure_widens_a_starved_bucket() {
    let transport = MockTransport::new();
    let controller = controller(limits((1_000, 0)), transport.clone(), None);

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .schedule(
                    OutboundRequest::get("https://api.test/ws/ping?widened"),
                    Priority::Normal,
                    1,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(transport.calls().is_empty());

    controller.update_config(&limits((1_000, 5)));
    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
}
