//! End-to-end pipeline tests against an in-process mock ingestion server.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::mock_api::{ApiBehavior, MockApi};
use rollbar_agent::config::Config;
use rollbar_agent::controller::QueueController;
use rollbar_agent::events::InternalErrorKind;
use rollbar_agent::telemetry::TelemetryBuffer;
use rollbar_agent::{BlockingNotifier, DeliveryOutcome, Event, Notifier, ReportOptions};
use rollbar_api::{Body, Level};

fn pipeline_config(endpoint: &str, token: &str) -> Config {
    let mut config = Config::new(token, "prod");
    config.endpoint = endpoint.to_string();
    config.post_timeout = Duration::from_millis(500);
    config
}

fn isolated_controller() -> Arc<QueueController> {
    QueueController::with_telemetry(Arc::new(TelemetryBuffer::new(10)))
}

async fn wait_until(limit: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

#[tokio::test]
async fn test_single_error_report_reaches_the_wire() {
    let api = MockApi::start().await;
    let controller = isolated_controller();
    let notifier =
        Notifier::with_controller(pipeline_config(&api.endpoint(), "X"), controller).unwrap();

    notifier.log(Level::Error, Body::message("boom")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || api.request_count() == 1).await);
    let requests = api.requests();
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/item/");
    assert_eq!(request.header("x-rollbar-access-token"), Some("X"));
    assert!(request
        .header("content-type")
        .unwrap()
        .starts_with("application/json"));

    let json = request.json();
    assert_eq!(json["access_token"], "X");
    assert_eq!(json["data"]["level"], "error");
    assert_eq!(json["data"]["environment"], "prod");
    assert_eq!(json["data"]["body"]["message"]["body"], "boom");
    assert_eq!(json["data"]["language"], "rust");
    assert!(json["data"]["uuid"].is_string());
}

#[tokio::test]
async fn test_stalled_queue_evicts_exactly_the_overflow() {
    // The server hangs, the post timeout is generous, so the head payload
    // pins the controller and everything else accumulates in the queue.
    let api = MockApi::with_behavior(ApiBehavior::Hang(Duration::from_secs(30))).await;
    let controller = isolated_controller();
    let mut config = pipeline_config(&api.endpoint(), "tok");
    config.reporting_queue_depth = 20;
    config.post_timeout = Duration::from_secs(60);
    let notifier = Notifier::with_controller(config, controller).unwrap();
    let mut events = notifier.subscribe();

    for i in 0..25 {
        notifier
            .log(Level::Error, Body::message(format!("item {i}")))
            .unwrap();
    }

    let mut overflow = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while overflow < 5 && Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(Event::InternalError {
                kind: InternalErrorKind::QueueOverflow,
                ..
            })) => overflow += 1,
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {}
        }
    }

    assert_eq!(overflow, 5);
    assert_eq!(notifier.queue_len(), 20);
}

#[tokio::test]
async fn test_rate_limit_bounds_dispatches_per_window() {
    let api = MockApi::start().await;
    let controller = isolated_controller();
    let mut config = pipeline_config(&api.endpoint(), "tok");
    config.max_reports_per_minute = 2;
    let notifier = Notifier::with_controller(config, controller).unwrap();

    for i in 0..10 {
        notifier
            .log(Level::Error, Body::message(format!("item {i}")))
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || api.request_count() == 2).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Exactly two posts in this 60 s window; the remainder wait their turn.
    assert_eq!(api.request_count(), 2);
    assert_eq!(notifier.queue_len(), 8);

    // The dispatched pair is the oldest two submissions.
    let mut sent: Vec<String> = api
        .requests()
        .iter()
        .map(|request| {
            request.json()["data"]["body"]["message"]["body"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    sent.sort();
    assert_eq!(sent, vec!["item 0".to_string(), "item 1".to_string()]);
}

#[tokio::test]
async fn test_429_defers_then_retries_with_identical_body() {
    let api = MockApi::with_behavior(ApiBehavior::Status {
        status: 429,
        retry_after: Some(1),
    })
    .await;
    let controller = isolated_controller();
    let notifier =
        Notifier::with_controller(pipeline_config(&api.endpoint(), "tok"), controller).unwrap();

    notifier.log(Level::Error, Body::message("deferred")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || api.request_count() == 1).await);
    api.set_behavior(ApiBehavior::Accept);

    // Deferred for the advertised Retry-After; no post happens meanwhile.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(api.request_count(), 1);

    assert!(wait_until(Duration::from_secs(3), || api.request_count() == 2).await);
    let requests = api.requests();
    assert_eq!(requests[0].body, requests[1].body);
    assert!(wait_until(Duration::from_secs(2), || notifier.queue_len() == 0).await);
}

#[tokio::test]
async fn test_panicking_check_ignore_still_delivers() {
    let api = MockApi::start().await;
    let controller = isolated_controller();
    let mut config = pipeline_config(&api.endpoint(), "tok");
    config.check_ignore = Some(Arc::new(|_| panic!("user bug")));
    let notifier = Notifier::with_controller(config, controller).unwrap();
    let mut events = notifier.subscribe();

    notifier.log(Level::Error, Body::message("survives")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || api.request_count() == 1).await);

    let mut saw_callback_error = false;
    let mut saw_delivery = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while !(saw_callback_error && saw_delivery) && Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(Event::InternalError {
                kind: InternalErrorKind::UserCallback,
                ..
            })) => saw_callback_error = true,
            Ok(Ok(Event::Communication { .. })) => saw_delivery = true,
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {}
        }
    }
    assert!(saw_callback_error);
    assert!(saw_delivery);
}

#[tokio::test]
async fn test_blocking_caller_times_out_while_payload_later_delivers() {
    let api = MockApi::with_behavior(ApiBehavior::Hang(Duration::from_secs(2))).await;
    let controller = isolated_controller();
    let notifier =
        Notifier::with_controller(pipeline_config(&api.endpoint(), "tok"), controller).unwrap();
    let blocking = BlockingNotifier::new(Arc::clone(&notifier), Duration::from_secs(1));

    let started = Instant::now();
    let outcome = blocking.log(Level::Error, Body::message("slow")).await;

    // The caller unblocks at its own timeout.
    assert_eq!(outcome, DeliveryOutcome::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));

    // The payload began dispatch, so it outlives the caller's deadline and
    // delivers once the server recovers.
    assert_eq!(notifier.queue_len(), 1);
    api.set_behavior(ApiBehavior::Accept);
    assert!(wait_until(Duration::from_secs(10), || notifier.queue_len() == 0).await);
    assert!(api.request_count() >= 2);
}

#[tokio::test]
async fn test_application_rejection_surfaces_api_error() {
    let api = MockApi::with_behavior(ApiBehavior::Reject {
        err: 3,
        message: "invalid item",
    })
    .await;
    let controller = isolated_controller();
    let notifier =
        Notifier::with_controller(pipeline_config(&api.endpoint(), "tok"), controller).unwrap();
    let mut events = notifier.subscribe();

    notifier.log(Level::Error, Body::message("rejected")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut api_error = None;
    while api_error.is_none() && Instant::now() < deadline {
        if let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if let Event::ApiError { code, message, .. } = event {
                api_error = Some((code, message));
            }
        }
    }

    let (code, message) = api_error.expect("expected an ApiError event");
    assert_eq!(code, 3);
    assert_eq!(message, "invalid item");
    // Permanent rejection: dequeued, not retried.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(api.request_count(), 1);
    assert_eq!(notifier.queue_len(), 0);
}

#[tokio::test]
async fn test_submission_never_blocks_on_a_stalled_network() {
    let api = MockApi::with_behavior(ApiBehavior::Hang(Duration::from_secs(30))).await;
    let controller = isolated_controller();
    let mut config = pipeline_config(&api.endpoint(), "tok");
    config.post_timeout = Duration::from_secs(60);
    let notifier = Notifier::with_controller(config, controller).unwrap();

    let started = Instant::now();
    for i in 0..100 {
        notifier
            .log(Level::Error, Body::message(format!("burst {i}")))
            .unwrap();
    }

    // Acceptance into the pending buffer is all a submission waits for.
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_telemetry_breadcrumbs_ride_on_reports() {
    let api = MockApi::start().await;
    let telemetry = Arc::new(TelemetryBuffer::new(10));
    let controller = QueueController::with_telemetry(Arc::clone(&telemetry));
    let notifier =
        Notifier::with_controller(pipeline_config(&api.endpoint(), "tok"), controller).unwrap();

    notifier.telemetry().capture_message(
        rollbar_api::TelemetrySource::Log,
        Level::Info,
        "user clicked retry",
    );
    notifier.log(Level::Error, Body::message("with crumbs")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || api.request_count() == 1).await);
    let json = api.requests()[0].json();
    assert_eq!(
        json["data"]["telemetry"][0]["body"]["message"],
        "user clicked retry"
    );
    assert_eq!(json["data"]["telemetry"][0]["source"], "log");
}

#[tokio::test]
async fn test_reports_with_custom_data_and_request_context() {
    let api = MockApi::start().await;
    let controller = isolated_controller();
    let mut config = pipeline_config(&api.endpoint(), "tok");
    config.ip_address_policy = rollbar_agent::config::IpAddressPolicy::Anonymize;
    let notifier = Notifier::with_controller(config, controller).unwrap();

    let mut custom = serde_json::Map::new();
    custom.insert("shard".to_string(), serde_json::Value::from(7));
    let options = ReportOptions {
        custom: Some(custom),
        request: Some(rollbar_api::Request {
            url: Some("https://app.example.com/checkout".to_string()),
            method: Some("POST".to_string()),
            user_ip: Some("203.0.113.77".to_string()),
            ..rollbar_api::Request::default()
        }),
        fingerprint: Some("checkout-failure".to_string()),
        ..ReportOptions::default()
    };
    notifier
        .log_with(Level::Warning, Body::message("checkout failed"), options)
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || api.request_count() == 1).await);
    let json = api.requests()[0].json();
    assert_eq!(json["data"]["custom"]["shard"], 7);
    assert_eq!(json["data"]["fingerprint"], "checkout-failure");
    assert_eq!(json["data"]["request"]["user_ip"], "203.0.113.0");
    assert_eq!(json["data"]["level"], "warning");
}
