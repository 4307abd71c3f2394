// tests/notify_sinks.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, http::Uri, Json, Router};
use feed_relay::notify::discord::DiscordSink;
use feed_relay::notify::slack::SlackSink;
use feed_relay::notify::telegram::TelegramSink;
use feed_relay::{ContentSink, Destination};
use parking_lot::Mutex;
use serde_json::Value;

const TOKEN: &str = "123456:SECRETTOKEN";

/// Local HTTP endpoint answering with a scripted list of status codes
/// (the last one repeats).
#[derive(Clone)]
struct Stub {
    statuses: Arc<Vec<u16>>,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn answer(State(stub): State<Stub>, uri: Uri, Json(body): Json<Value>) -> StatusCode {
    let n = stub.hits.fetch_add(1, Ordering::SeqCst);
    stub.seen.lock().push((uri.path().to_string(), body));
    let code = stub
        .statuses
        .get(n)
        .or(stub.statuses.last())
        .copied()
        .unwrap_or(200);
    StatusCode::from_u16(code).unwrap()
}

async fn spawn_stub(statuses: &[u16]) -> (String, Stub) {
    let stub = Stub {
        statuses: Arc::new(statuses.to_vec()),
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new().fallback(answer).with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), stub)
}

fn telegram(base: &str, retries: u8) -> TelegramSink {
    TelegramSink::new(TOKEN.to_string())
        .with_api_base(base)
        .with_timeout(5)
        .with_retries(retries)
        .with_backoff(Duration::from_millis(5))
}

#[tokio::test]
async fn telegram_retries_server_errors_then_succeeds() {
    let (base, stub) = spawn_stub(&[500, 502, 200]).await;
    let sink = telegram(&base, 3);

    sink.send(&Destination::new("-1001", "Group"), "hello")
        .await
        .unwrap();

    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
    let seen = stub.seen.lock().clone();
    assert_eq!(seen[2].0, format!("/bot{TOKEN}/sendMessage"));
    assert_eq!(seen[2].1["chat_id"], "-1001");
    assert_eq!(seen[2].1["text"], "hello");
}

#[tokio::test]
async fn telegram_gives_up_after_retries_without_leaking_token() {
    let (base, stub) = spawn_stub(&[503]).await;
    let sink = telegram(&base, 2);

    let err = sink
        .send(&Destination::new("-1001", "Group"), "hello")
        .await
        .unwrap_err();

    // One attempt plus two retries.
    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
    let msg = format!("{err:#}");
    assert!(msg.contains("503"), "{msg}");
    assert!(!msg.contains("SECRETTOKEN"), "{msg}");
}

#[tokio::test]
async fn client_errors_are_not_retried_but_rate_limits_are() {
    let (base, stub) = spawn_stub(&[400]).await;
    let err = telegram(&base, 3)
        .send(&Destination::new("bad-chat", "Nope"), "hello")
        .await
        .unwrap_err();
    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    assert!(format!("{err:#}").contains("400"));

    let (base, stub) = spawn_stub(&[429, 200]).await;
    telegram(&base, 3)
        .send(&Destination::new("-1001", "Group"), "hello")
        .await
        .unwrap();
    assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_endpoint_error_hides_the_url() {
    // Grab a free port, then close it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = telegram(&format!("http://{addr}"), 0)
        .send(&Destination::new("-1001", "Group"), "hello")
        .await
        .unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.starts_with("telegram request failed"), "{msg}");
    assert!(!msg.contains("SECRETTOKEN"), "{msg}");
    assert!(!msg.contains("sendMessage"), "{msg}");
}

#[tokio::test]
async fn discord_posts_content_to_the_webhook() {
    let (base, stub) = spawn_stub(&[500, 204]).await;
    let sink = DiscordSink::new()
        .with_retries(1)
        .with_backoff(Duration::from_millis(5));
    let hook = Destination::new(format!("{base}/api/webhooks/1/secret-part"), "Hook");

    sink.send(&hook, "new upload").await.unwrap();

    assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
    let seen = stub.seen.lock().clone();
    assert_eq!(seen[1].0, "/api/webhooks/1/secret-part");
    assert_eq!(seen[1].1["content"], "new upload");
}

#[tokio::test]
async fn slack_failure_does_not_echo_the_webhook() {
    let (base, stub) = spawn_stub(&[404]).await;
    let sink = SlackSink::new().with_backoff(Duration::from_millis(5));
    let hook = Destination::new(format!("{base}/services/T0/B0/secret-part"), "Hook");

    let err = sink.send(&hook, "new upload").await.unwrap_err();

    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    assert_eq!(stub.seen.lock()[0].1["text"], "new upload");
    assert!(!format!("{err:#}").contains("secret-part"));
}
