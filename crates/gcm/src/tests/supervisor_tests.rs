use super::mocks::*;
use crate::error::{ConnectionError, GcmError, HandlerError};
use crate::message::{Acknowledgement, UpstreamMessage};
use crate::supervisor::{ConnectionHealth, GenerationState, Replacement, Supervisor};
use crate::transport::SharedHandler;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

async fn start(
    connector: &MockConnector,
    handler: &RecordingHandler,
) -> Supervisor<MockConnector> {
    start_with(connector, handler, fast_config()).await
}

async fn start_with(
    connector: &MockConnector,
    handler: &RecordingHandler,
    config: crate::config::ClientConfig,
) -> Supervisor<MockConnector> {
    let handler: SharedHandler = Arc::new(handler.clone());
    Supervisor::start(connector.clone(), &config, credentials(), handler)
        .await
        .unwrap()
}

fn ack(message_id: &str) -> UpstreamMessage {
    UpstreamMessage::Ack(Acknowledgement {
        message_id: message_id.to_string(),
        from: Some("device-1".to_string()),
        registration_id: None,
    })
}

#[tokio::test]
async fn initial_connect_failure_is_returned() {
    let connector = MockConnector::new([ConnectPlan::Fail]);
    let handler: SharedHandler = Arc::new(RecordingHandler::default());

    let result = Supervisor::start(connector.clone(), &fast_config(), credentials(), handler).await;

    assert!(matches!(
        result,
        Err(GcmError::Connection {
            source: ConnectionError::ConnectFailed { .. }
        })
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.connect_attempts(), 1);
}

#[tokio::test]
async fn starts_healthy() {
    let connector = MockConnector::healthy();
    let supervisor = start(&connector, &RecordingHandler::default()).await;

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.generation, 1);
    assert_eq!(status.state, GenerationState::Listening);
    assert_eq!(status.health, ConnectionHealth::Healthy);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn ping_timeout_replaces_connection_once() {
    let connector = MockConnector::new([
        ConnectPlan::Succeed(PingPlan::TimeoutAfter(Duration::from_millis(30))),
        ConnectPlan::Succeed(PingPlan::Healthy),
    ]);
    let supervisor = start(&connector, &RecordingHandler::default()).await;

    wait_for_generation(&supervisor, 2).await;
    let old = connector.connection(0);
    eventually("old connection closed", || old.close_calls() == 1).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(old.close_calls(), 1);
    assert_eq!(
        supervisor.status().await.unwrap().health,
        ConnectionHealth::Healthy
    );

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn drain_control_hands_off_without_closing() {
    let connector = MockConnector::healthy();
    let handler = RecordingHandler::default();
    let supervisor = start(&connector, &handler).await;
    let old = connector.connection(0);

    old.deliver(drain_control());
    wait_for_generation(&supervisor, 2).await;

    assert!(handler.seen().is_empty());
    assert_eq!(old.handler_results(), vec![Ok(())]);
    assert_eq!(old.close_calls(), 0);

    // new sends go to the new connection, the old one still accepts traffic
    supervisor.send(&streaming_message("m-1")).await.unwrap();
    assert_eq!(connector.connection(1).sent().len(), 1);
    assert!(old.sent().is_empty());
    old.send_direct("m-2").await;
    assert_eq!(old.sent().len(), 1);

    supervisor.close().await.unwrap();
    assert_eq!(old.close_calls(), 1);
    assert_eq!(connector.connection(1).close_calls(), 1);
}

#[tokio::test]
async fn drain_nack_is_forwarded_and_replaces() {
    let connector = MockConnector::healthy();
    let handler = RecordingHandler::default();
    let supervisor = start(&connector, &handler).await;

    connector.connection(0).deliver(drain_nack("m-7"));
    wait_for_generation(&supervisor, 2).await;

    assert_eq!(handler.seen(), vec![drain_nack("m-7")]);
    assert_eq!(connector.connection(0).close_calls(), 0);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn drain_nack_reaches_handler_after_handoff() {
    let connector = MockConnector::healthy();
    let slot: Arc<OnceLock<Supervisor<MockConnector>>> = Arc::new(OnceLock::new());
    let current_at_nack: Arc<Mutex<Vec<Option<u64>>>> = Arc::default();

    let handler: SharedHandler = {
        let slot = slot.clone();
        let current_at_nack = current_at_nack.clone();
        Arc::new(move |message: UpstreamMessage| {
            let slot = slot.clone();
            let current_at_nack = current_at_nack.clone();
            async move {
                if let UpstreamMessage::Nack(_) = message {
                    let current = match slot.get() {
                        Some(supervisor) => supervisor.generation().await,
                        None => None,
                    };
                    current_at_nack.lock().unwrap().push(current);
                }
                Ok::<(), HandlerError>(())
            }
        })
    };
    let supervisor = Supervisor::start(connector.clone(), &fast_config(), credentials(), handler)
        .await
        .unwrap();
    assert!(slot.set(supervisor).is_ok());
    let supervisor = slot.get().unwrap();

    connector.connection(0).deliver(drain_nack("m-3"));
    eventually("nack handled", || !current_at_nack.lock().unwrap().is_empty()).await;

    assert_eq!(*current_at_nack.lock().unwrap(), vec![Some(2)]);
    assert_eq!(connector.connect_attempts(), 2);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn repeated_drain_signals_replace_once() {
    let connector = MockConnector::healthy();
    let supervisor = start(&connector, &RecordingHandler::default()).await;
    let old = connector.connection(0);

    old.deliver(drain_control());
    old.deliver(drain_nack("m-1"));
    old.deliver(drain_control());
    wait_for_generation(&supervisor, 2).await;
    eventually("all messages handled", || old.handler_results().len() == 3).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.connect_attempts(), 2);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn handler_errors_reach_the_receive_loop() {
    let connector = MockConnector::healthy();
    let handler = RecordingHandler::failing();
    let supervisor = start(&connector, &handler).await;
    let connection = connector.connection(0);

    connection.deliver(ack("m-1"));
    eventually("handler result recorded", || {
        !connection.handler_results().is_empty()
    })
    .await;

    assert!(connection.handler_results()[0].is_err());
    assert_eq!(handler.seen(), vec![ack("m-1")]);
    assert_eq!(connector.connect_attempts(), 1);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn failed_replacement_keeps_old_connection_current() {
    let connector = MockConnector::new([
        ConnectPlan::Succeed(PingPlan::TimeoutAfter(Duration::from_millis(20))),
        ConnectPlan::Fail,
        ConnectPlan::Fail,
        ConnectPlan::Succeed(PingPlan::Healthy),
    ]);
    let mut config = fast_config();
    config.keep_alive.reconnect_delay = Duration::from_millis(200);
    let supervisor = start_with(&connector, &RecordingHandler::default(), config).await;

    eventually("first replacement attempt", || connector.connect_attempts() >= 2).await;
    let status = supervisor.status().await.unwrap();
    assert_eq!(status.generation, 1);
    assert_eq!(status.state, GenerationState::TimedOut);
    assert_eq!(status.health, ConnectionHealth::Degraded);

    wait_for_generation(&supervisor, 2).await;
    assert_eq!(connector.connect_attempts(), 4);
    assert_eq!(connector.connection(0).close_calls(), 1);
    assert_eq!(
        supervisor.status().await.unwrap().health,
        ConnectionHealth::Healthy
    );

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn failed_drain_handoff_keeps_serving() {
    let connector = MockConnector::new([
        ConnectPlan::Succeed(PingPlan::Healthy),
        ConnectPlan::Fail,
        ConnectPlan::Succeed(PingPlan::Healthy),
    ]);
    let mut config = fast_config();
    config.keep_alive.reconnect_delay = Duration::from_millis(200);
    let supervisor = start_with(&connector, &RecordingHandler::default(), config).await;
    let old = connector.connection(0);

    old.deliver(drain_control());
    eventually("drain handoff attempted", || connector.connect_attempts() >= 2).await;

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.generation, 1);
    assert_eq!(status.health, ConnectionHealth::Draining);
    supervisor.send(&streaming_message("m-1")).await.unwrap();
    assert_eq!(old.sent().len(), 1);

    wait_for_generation(&supervisor, 2).await;
    assert_eq!(old.close_calls(), 0);

    supervisor.close().await.unwrap();
    assert_eq!(old.close_calls(), 1);
}

#[tokio::test]
async fn retired_connection_is_closed_when_its_pings_fail() {
    let connector = MockConnector::new([
        ConnectPlan::Succeed(PingPlan::TimeoutAfter(Duration::from_millis(100))),
        ConnectPlan::Succeed(PingPlan::Healthy),
    ]);
    let supervisor = start(&connector, &RecordingHandler::default()).await;
    let old = connector.connection(0);

    old.deliver(drain_control());
    wait_for_generation(&supervisor, 2).await;
    assert_eq!(old.close_calls(), 0);

    eventually("retired connection closed", || old.close_calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(supervisor.generation().await, Some(2));

    supervisor.close().await.unwrap();
    assert_eq!(old.close_calls(), 1);
}

#[tokio::test]
async fn replace_closing_old_closes_before_returning() {
    let connector = MockConnector::healthy();
    let supervisor = start(&connector, &RecordingHandler::default()).await;

    let replacement = supervisor.replace(true).await.unwrap();

    assert_eq!(
        replacement,
        Replacement::Swapped {
            previous: Some(1),
            current: 2
        }
    );
    assert_eq!(connector.connection(0).close_calls(), 1);
    assert!(!connector.connection(1).is_closed());

    supervisor.close().await.unwrap();
    assert_eq!(connector.connection(0).close_calls(), 1);
}

#[tokio::test]
async fn replace_keeping_old_leaves_it_open_until_close() {
    let connector = MockConnector::healthy();
    let supervisor = start(&connector, &RecordingHandler::default()).await;

    supervisor.replace(false).await.unwrap();

    let old = connector.connection(0);
    assert_eq!(old.close_calls(), 0);
    supervisor.send(&streaming_message("m-1")).await.unwrap();
    assert_eq!(connector.connection(1).sent().len(), 1);

    supervisor.close().await.unwrap();
    assert_eq!(old.close_calls(), 1);
    assert_eq!(connector.connection(1).close_calls(), 1);
}

#[tokio::test]
async fn failed_manual_replace_keeps_current() {
    let connector = MockConnector::new([ConnectPlan::Succeed(PingPlan::Healthy), ConnectPlan::Fail]);
    let supervisor = start(&connector, &RecordingHandler::default()).await;

    let err = supervisor.replace(true).await.unwrap_err();

    assert!(matches!(err, GcmError::Connection { .. }));
    assert_eq!(supervisor.generation().await, Some(1));
    assert_eq!(connector.connection(0).close_calls(), 0);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn close_interrupts_reconnect_wait() {
    let connector = MockConnector::new([
        ConnectPlan::Succeed(PingPlan::TimeoutAfter(Duration::from_millis(20))),
        ConnectPlan::Fail,
    ]);
    let mut config = fast_config();
    config.keep_alive.reconnect_delay = Duration::from_secs(30);
    let supervisor = start_with(&connector, &RecordingHandler::default(), config).await;

    eventually("replacement attempted", || connector.connect_attempts() == 2).await;
    tokio::time::timeout(Duration::from_secs(1), supervisor.close())
        .await
        .expect("close should not wait for the reconnect delay")
        .unwrap();

    assert_eq!(connector.connection(0).close_calls(), 1);
    assert_eq!(connector.connect_attempts(), 2);
    assert!(supervisor.is_closed());
}

#[tokio::test]
async fn close_stops_loops_that_ignore_connection_shutdown() {
    let connector = MockConnector::new([ConnectPlan::Succeed(PingPlan::Unresponsive)]);
    let supervisor = start(&connector, &RecordingHandler::default()).await;
    let connection = connector.connection(0);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!connection.listen_ended());

    tokio::time::timeout(Duration::from_secs(1), supervisor.close())
        .await
        .expect("close should not wait for the connection to stop by itself")
        .unwrap();

    assert!(connection.listen_ended());
    assert_eq!(connection.listen_result(), None);
    assert_eq!(connection.close_calls(), 1);
    assert!(supervisor.is_closed());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.connect_attempts(), 1);
}

#[tokio::test]
async fn operations_after_close_fail() {
    let connector = MockConnector::healthy();
    let supervisor = start(&connector, &RecordingHandler::default()).await;

    supervisor.close().await.unwrap();
    supervisor.close().await.unwrap();

    assert!(matches!(
        supervisor.send(&streaming_message("m-1")).await,
        Err(GcmError::Closed)
    ));
    assert!(matches!(supervisor.replace(true).await, Err(GcmError::Closed)));
    assert_eq!(supervisor.status().await, None);
    assert_eq!(connector.connection(0).close_calls(), 1);
    assert_eq!(connector.connect_attempts(), 1);
}
