//! Unit tests for the session supervisor and facade operations.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rstest::rstest;
use tokio::{sync::mpsc, time::timeout};

use super::*;
use crate::test_support::{Call, FakeConnector};

fn fast_config() -> SessionConfig {
    SessionConfig {
        receipt_timeout: Duration::from_secs(5),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_attempts: None,
        },
        ..SessionConfig::default()
    }
}

fn manager(connector: &Arc<FakeConnector>, config: SessionConfig) -> Arc<SessionManager> {
    let connector: Arc<dyn StompConnector> = connector.clone();
    Arc::new(SessionManager::new(connector, config))
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("event channel open")
}

#[tokio::test]
async fn connect_reports_first_generation() {
    let connector = Arc::new(FakeConnector::default());
    let session = manager(&connector, fast_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let generation = session
        .connect(tx)
        .expect("supervisor starts")
        .await
        .expect("connects");

    assert_eq!(generation, 1);
    assert_eq!(session.state(), SessionState::Connected);
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::Connected { generation: 1 }
    ));
}

#[tokio::test]
async fn second_connect_is_refused_while_supervising() {
    let connector = Arc::new(FakeConnector::default());
    let session = manager(&connector, fast_config());
    let (tx, _rx) = mpsc::unbounded_channel();
    let _first = session.connect(tx.clone()).expect("supervisor starts");
    assert!(matches!(
        session.connect(tx),
        Err(TransportError::AlreadyActive)
    ));
}

#[tokio::test(start_paused = true)]
async fn handshake_failures_are_retried() {
    let connector = Arc::new(FakeConnector::refusing(2));
    let session = manager(&connector, fast_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let generation = session.connect(tx).expect("supervisor starts").await;

    assert_eq!(generation, Ok(3));
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Error(_)));
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Error(_)));
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::Connected { generation: 3 }
    ));
}

#[rstest]
#[case(1)]
#[case(3)]
#[tokio::test(start_paused = true)]
async fn bounded_policy_gives_up(#[case] max_attempts: u32) {
    let connector = Arc::new(FakeConnector::refusing(u32::MAX));
    let mut config = fast_config();
    config.reconnect.max_attempts = Some(max_attempts);
    let session = manager(&connector, config);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = session.connect(tx.clone()).expect("supervisor starts").await;

    assert_eq!(
        outcome,
        Err(TransportError::Exhausted {
            attempts: max_attempts
        })
    );
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_supervising());
    for _ in 0..max_attempts {
        assert!(matches!(next_event(&mut rx).await, SessionEvent::Error(_)));
    }
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::GaveUp { attempts } if attempts == max_attempts
    ));
    assert!(session.connect(tx).is_ok(), "connect may be requested again");
}

#[tokio::test]
async fn operations_require_a_session() {
    let connector = Arc::new(FakeConnector::default());
    let session = manager(&connector, fast_config());
    let result = session.subscribe(&"/topic/a".into(), false).await;
    assert!(matches!(result, Err(TransportError::NotConnected)));
    let result = session
        .send("/queue/a", Bytes::from_static(b"x"), Headers::new(), false)
        .await;
    assert!(matches!(result, Err(TransportError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn session_loss_fails_receipts_and_reconnects() {
    let connector = Arc::new(FakeConnector::default());
    let mut config = fast_config();
    config.auto_receipt = true;
    let session = manager(&connector, config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    session
        .connect(tx)
        .expect("supervisor starts")
        .await
        .expect("connects");
    let _ = next_event(&mut rx).await;

    let issued = session
        .subscribe(&"/topic/a".into(), false)
        .await
        .expect("subscribe written");
    let waiter = issued.receipt.expect("auto receipt requested");
    let expected = Call {
        receipt: Some(waiter.token().to_string()),
        ..Call::new(StompCommand::Subscribe, "/topic/a")
    };
    assert_eq!(connector.calls(), vec![expected]);

    connector
        .last_events()
        .on_disconnected(DisconnectCause::RemoteClosed);

    assert_eq!(waiter.wait().await, ReceiptOutcome::ConnectionLost);
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::Disconnected {
            generation: 1,
            cause: DisconnectCause::RemoteClosed
        }
    ));
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::Connected { generation: 2 }
    ));
    assert_eq!(session.generation(), Some(2));
}

#[tokio::test]
async fn stale_subscription_is_not_unsubscribed() {
    let connector = Arc::new(FakeConnector::default());
    let session = manager(&connector, fast_config());
    let (tx, _rx) = mpsc::unbounded_channel();
    session
        .connect(tx)
        .expect("supervisor starts")
        .await
        .expect("connects");

    let stale = Subscription::new("/topic/a".into(), SubscriptionId::new("sub-9"), 0);
    let receipt = session.unsubscribe(&stale, true).await.expect("no error");
    assert!(receipt.is_none());
    assert!(connector.calls().is_empty());
}

#[tokio::test]
async fn disconnect_is_terminal() {
    let connector = Arc::new(FakeConnector::default());
    let session = manager(&connector, fast_config());
    let (tx, _rx) = mpsc::unbounded_channel();
    session
        .connect(tx)
        .expect("supervisor starts")
        .await
        .expect("connects");

    session.disconnect().await;

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.generation(), None);
    assert_eq!(
        connector.calls(),
        vec![Call::new(StompCommand::Disconnect, "")]
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), SessionState::Disconnected);
}
