//! Unit tests for the start gate.

use std::sync::Arc;
use std::time::Duration;

use robot_agent_server::agent::event::{AgentInitializingEvent, ReadyToStartEvent};
use robot_agent_server::agent::listener::ExecutionEventListener;
use robot_agent_server::agent::response::ExecutionMode;
use robot_agent_server::listeners::TestsStarter;
use robot_agent_server::AppError;

use super::test_helpers::client_pair;

/// `agent_initializing` is answered with the mode and the wait flag.
#[tokio::test]
async fn initializing_agent_gets_mode_and_wait_flag() {
    let (client, mut wire) = client_pair();
    let starter = TestsStarter::new(ExecutionMode::Debug);

    starter
        .handle_agent_initializing(&AgentInitializingEvent { client })
        .await
        .expect("mode must be sent");

    assert_eq!(
        wire.next_line().await,
        "{\"operating_mode\":{\"mode\":\"DEBUG\",\"wait_for_start_allowance\":true}}"
    );
}

/// Without permission the gate blocks and nothing is sent.
#[tokio::test]
async fn gate_blocks_until_start_is_allowed() {
    let (client, mut wire) = client_pair();
    let starter = TestsStarter::new(ExecutionMode::Run);
    let event = ReadyToStartEvent { client };

    let blocked =
        tokio::time::timeout(Duration::from_millis(100), starter.handle_ready_to_start(&event)).await;
    assert!(blocked.is_err(), "the gate must hold the agent");
    assert_eq!(
        wire.next_line_within(Duration::from_millis(50)).await,
        None,
        "no start command may be sent before permission"
    );
}

/// One permission releases exactly one start command.
#[tokio::test]
async fn one_permission_sends_exactly_one_start() {
    let (client, mut wire) = client_pair();
    let starter = Arc::new(TestsStarter::new(ExecutionMode::Run));
    let event = ReadyToStartEvent { client };

    let waiting = {
        let starter = Arc::clone(&starter);
        let event = event.clone();
        tokio::spawn(async move { starter.handle_ready_to_start(&event).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    starter.allow_client_tests_start();

    waiting
        .await
        .expect("gate task")
        .expect("start must be sent after permission");
    assert_eq!(wire.next_line().await, "{\"do_start\":{}}");

    let second =
        tokio::time::timeout(Duration::from_millis(50), starter.handle_ready_to_start(&event)).await;
    assert!(second.is_err(), "the permission must have been consumed");
    assert_eq!(wire.next_line_within(Duration::from_millis(50)).await, None);
}

/// Permissions granted before the agent is ready accumulate.
#[tokio::test]
async fn early_permission_is_kept() {
    let (client, mut wire) = client_pair();
    let starter = TestsStarter::new(ExecutionMode::Run);
    starter.allow_client_tests_start();
    starter.allow_client_tests_start();

    starter
        .handle_ready_to_start(&ReadyToStartEvent { client })
        .await
        .expect("start must not block");
    assert_eq!(wire.next_line().await, "{\"do_start\":{}}");
}

/// A configured timeout turns an endless wait into a protocol error.
#[tokio::test]
async fn start_timeout_is_protocol_fatal() {
    let (client, mut wire) = client_pair();
    let starter =
        TestsStarter::new(ExecutionMode::Run).with_start_timeout(Some(Duration::from_millis(30)));

    let err = starter
        .handle_ready_to_start(&ReadyToStartEvent { client })
        .await
        .expect_err("wait must time out");

    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("30 ms")), "got {err:?}");
    assert_eq!(wire.next_line_within(Duration::from_millis(50)).await, None);
}

/// Interrupting a pending wait fails it instead of hanging.
#[tokio::test]
async fn interrupted_wait_is_protocol_fatal() {
    let (client, _wire) = client_pair();
    let starter = Arc::new(TestsStarter::new(ExecutionMode::Run));
    let event = ReadyToStartEvent { client };

    let waiting = {
        let starter = Arc::clone(&starter);
        tokio::spawn(async move { starter.handle_ready_to_start(&event).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    starter.interrupt();

    let err = waiting.await.expect("gate task").expect_err("interrupt must fail the wait");
    assert!(err.is_protocol_fatal());
}
