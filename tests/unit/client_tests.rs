//! Unit tests for the agent client's write path and reply pool.
//!
//! Covers:
//! - concurrent sends never interleave frames
//! - `send_async` writes the computed reply
//! - `send_async` falls back when the task fails, panics or the pool is gone
//! - at most `async_workers` replies are computed at the same time

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use robot_agent_server::agent::response::{ExpressionType, ServerResponse};
use robot_agent_server::AppError;

use super::test_helpers::{client_pair, client_pair_with_workers};

// ── Synchronised send ────────────────────────────────────────────────────────

/// Many tasks sending large frames at once produce intact, complete lines.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_interleave() {
    const SENDERS: u32 = 16;
    const PER_SENDER: u32 = 20;

    let (client, mut wire) = client_pair();
    let payload = "p".repeat(2048);

    let mut tasks = Vec::new();
    for sender in 0..SENDERS {
        let client = Arc::clone(&client);
        let payload = payload.clone();
        tasks.push(tokio::spawn(async move {
            for seq in 0..PER_SENDER {
                client
                    .send(&ServerResponse::EvaluateExpression {
                        id: sender * 1000 + seq,
                        kind: ExpressionType::Robot,
                        expression: payload.clone(),
                    })
                    .await
                    .expect("send must succeed");
            }
        }));
    }

    let mut seen = Vec::new();
    for _ in 0..SENDERS * PER_SENDER {
        let frame = wire.next_json().await;
        let body = &frame["evaluate_expression"];
        assert_eq!(body["expr"], payload.as_str(), "frame body must be intact");
        seen.push(body["id"].as_u64().expect("numeric id"));
    }

    for task in tasks {
        task.await.expect("sender task");
    }

    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), (SENDERS * PER_SENDER) as usize, "no frame may be lost or duplicated");
}

// ── Asynchronous send ────────────────────────────────────────────────────────

/// A successful computation is what gets written.
#[tokio::test]
async fn send_async_writes_computed_reply() {
    let (client, mut wire) = client_pair();

    client
        .send_async(async { Ok(ServerResponse::Pause) }, ServerResponse::Continue)
        .await
        .expect("reply job");

    assert_eq!(wire.next_line().await, "{\"pause\":{}}");
}

/// A failing computation writes the fallback instead of its (absent) result.
#[tokio::test]
async fn send_async_failure_writes_fallback() {
    let (client, mut wire) = client_pair();

    client
        .send_async(
            async { Err(AppError::Protocol("cannot evaluate".into())) },
            ServerResponse::Continue,
        )
        .await
        .expect("reply job");

    assert_eq!(wire.next_line().await, "{\"continue\":{}}");
}

/// A panicking computation writes the fallback too.
#[tokio::test]
async fn send_async_panic_writes_fallback() {
    let (client, mut wire) = client_pair();

    client
        .send_async(
            async {
                if ServerResponse::Pause.name() == "pause" {
                    panic!("evaluation blew up");
                }
                Ok(ServerResponse::Pause)
            },
            ServerResponse::Resume,
        )
        .await
        .expect("reply job must not propagate the task panic");

    assert_eq!(wire.next_line().await, "{\"resume\":{}}");
}

/// Once the client is disposed, scheduled replies go out as their fallback.
#[tokio::test]
async fn send_async_after_dispose_writes_fallback() {
    let (client, mut wire) = client_pair();
    client.dispose();

    client
        .send_async(async { Ok(ServerResponse::Pause) }, ServerResponse::Terminate)
        .await
        .expect("reply job");

    assert_eq!(wire.next_line().await, "{\"terminate\":{}}");
}

/// No more than `async_workers` computations run at the same time.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reply_pool_is_bounded() {
    let (client, mut wire) = client_pair_with_workers(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut jobs = Vec::new();
    for _ in 0..6 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        jobs.push(client.send_async(
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(ServerResponse::Continue)
            },
            ServerResponse::Continue,
        ));
    }

    for job in jobs {
        job.await.expect("reply job");
    }
    for _ in 0..6 {
        assert_eq!(wire.next_line().await, "{\"continue\":{}}");
    }
    assert!(peak.load(Ordering::SeqCst) <= 2, "pool of two must never run more than two tasks");
}

/// `wait_for_pending` returns once every scheduled reply was written.
#[tokio::test]
async fn wait_for_pending_drains_replies() {
    let (client, mut wire) = client_pair();

    let _job = client.send_async(
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(ServerResponse::Resume)
        },
        ServerResponse::Continue,
    );
    client.wait_for_pending().await;

    assert_eq!(
        wire.next_line_within(Duration::from_millis(10)).await.as_deref(),
        Some("{\"resume\":{}}"),
        "the reply must already be on the wire"
    );
}
