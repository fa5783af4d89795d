use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chatbox_client::{
    HttpRequest, Method, ReqwestTransport, RetryPolicy, Transport, TransportError,
};
use chatbox_core::Headers;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Counters {
    flaky: Arc<AtomicU32>,
    rejected: Arc<AtomicU32>,
}

async fn flaky_handler(State(counters): State<Counters>) -> (StatusCode, String) {
    let seen = counters.flaky.fetch_add(1, Ordering::SeqCst);
    if seen < 2 {
        (StatusCode::SERVICE_UNAVAILABLE, "warming up".to_owned())
    } else {
        (StatusCode::OK, "ready".to_owned())
    }
}

async fn rejecting_handler(State(counters): State<Counters>) -> (StatusCode, String) {
    counters.rejected.fetch_add(1, Ordering::SeqCst);
    (StatusCode::BAD_REQUEST, "bad model".to_owned())
}

async fn echo_handler(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    Json(json!({"auth": auth, "body": body}))
}

async fn slow_handler() -> &'static str {
    tokio::time::sleep(Duration::from_secs(30)).await;
    "too late"
}

async fn start_server() -> (String, Counters, oneshot::Sender<()>) {
    let counters = Counters::default();
    let router = Router::new()
        .route("/flaky", get(flaky_handler))
        .route("/reject", get(rejecting_handler))
        .route("/echo", post(echo_handler))
        .route("/slow", get(slow_handler))
        .with_state(counters.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{address}"), counters, shutdown_tx)
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        attempt_timeout: None,
    }
}

fn get_request(url: String) -> HttpRequest {
    HttpRequest {
        method: Method::Get,
        url,
        headers: Headers::new(),
        body: None,
    }
}

#[tokio::test]
async fn transient_status_is_retried_until_success() {
    let (base, counters, shutdown_tx) = start_server().await;
    let transport = ReqwestTransport::new(fast_policy()).expect("transport");

    let response = transport
        .request(get_request(format!("{base}/flaky")), None, 3)
        .await
        .expect("third attempt succeeds");
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "ready");
    assert_eq!(counters.flaky.load(Ordering::SeqCst), 3);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn retry_budget_is_respected() {
    let (base, counters, shutdown_tx) = start_server().await;
    let transport = ReqwestTransport::new(fast_policy()).expect("transport");

    let err = transport
        .request(get_request(format!("{base}/flaky")), None, 1)
        .await
        .expect_err("budget exhausted");
    assert!(matches!(err, TransportError::Status { status: 503, .. }));
    assert_eq!(counters.flaky.load(Ordering::SeqCst), 2);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (base, counters, shutdown_tx) = start_server().await;
    let transport = ReqwestTransport::new(fast_policy()).expect("transport");

    let err = transport
        .request(get_request(format!("{base}/reject")), None, 3)
        .await
        .expect_err("400 is terminal");
    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad model");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(counters.rejected.load(Ordering::SeqCst), 1);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn post_sends_headers_and_json_body() {
    let (base, _, shutdown_tx) = start_server().await;
    let transport = ReqwestTransport::new(fast_policy()).expect("transport");
    let mut headers = Headers::new();
    headers.insert("Authorization".to_owned(), "Bearer sk-test".to_owned());
    let body = json!({"model": "gpt-4", "stream": false});

    let response = transport
        .request(
            HttpRequest {
                method: Method::Post,
                url: format!("{base}/echo"),
                headers,
                body: Some(body.clone()),
            },
            None,
            0,
        )
        .await
        .expect("echo");
    let echoed: Value = response.json().expect("json body");
    assert_eq!(echoed, json!({"auth": "Bearer sk-test", "body": body}));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn cancellation_interrupts_an_in_flight_request() {
    let (base, _, shutdown_tx) = start_server().await;
    let transport = ReqwestTransport::new(fast_policy()).expect("transport");
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        transport.request(get_request(format!("{base}/slow")), Some(&token), 3),
    )
    .await
    .expect("cancellation is prompt");
    assert!(matches!(result, Err(TransportError::Cancelled)));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn cancelled_token_stops_before_the_first_attempt() {
    let (base, counters, shutdown_tx) = start_server().await;
    let transport = ReqwestTransport::new(fast_policy()).expect("transport");
    let token = CancellationToken::new();
    token.cancel();

    let result = transport
        .request(get_request(format!("{base}/flaky")), Some(&token), 3)
        .await;
    assert!(matches!(result, Err(TransportError::Cancelled)));
    assert_eq!(counters.flaky.load(Ordering::SeqCst), 0);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn attempt_timeout_is_transient() {
    let (base, _, shutdown_tx) = start_server().await;
    let transport = ReqwestTransport::new(RetryPolicy {
        attempt_timeout: Some(Duration::from_millis(100)),
        ..fast_policy()
    })
    .expect("transport");

    let err = transport
        .request(get_request(format!("{base}/slow")), None, 1)
        .await
        .expect_err("times out");
    assert!(matches!(err, TransportError::Timeout));

    let _ = shutdown_tx.send(());
}
