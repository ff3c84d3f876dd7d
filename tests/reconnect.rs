//! Reconnect policy and subscription replay across sessions.

mod common;

use std::time::Duration;

use common::{Harness, TestResult, fast_session};
use rstest::rstest;
use stompwire::{
    LifecycleEvent,
    SessionConfig,
    StompError,
    TransportError,
    session::{DisconnectCause, ReconnectPolicy},
};

fn bounded(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        reconnect: ReconnectPolicy {
            max_attempts: Some(max_attempts),
            ..fast_session().reconnect
        },
        ..fast_session()
    }
}

#[tokio::test(start_paused = true)]
async fn refused_handshakes_are_retried_until_one_succeeds() -> TestResult {
    let mut h = Harness::new(|b| b.destination("/topic/a"));
    h.broker.refuse_connects(2);

    let generation = h.start().await;
    assert_eq!(generation, 3, "two failed attempts consume two generations");
    assert_eq!(h.broker.connects(), 1);

    let mut failures = 0;
    let connected = h
        .wait_for(|event| match event {
            LifecycleEvent::Error {
                cause: StompError::Transport(TransportError::Connect(_)),
            } => {
                failures += 1;
                None
            }
            LifecycleEvent::Connected { generation } => Some(generation),
            _ => None,
        })
        .await;
    assert_eq!(failures, 2);
    assert_eq!(connected, 3);
    assert_eq!(h.next_subscribed().await, "/topic/a");

    h.adapter.stop().await;
    Ok(())
}

#[rstest]
#[case(1)]
#[case(3)]
#[tokio::test(start_paused = true)]
async fn bounded_policy_reports_exhaustion(#[case] max_attempts: u32) -> TestResult {
    let h = Harness::new(|b| b.session_config(bounded(max_attempts)));
    h.broker.refuse_connects(10);

    let result = h.adapter.start()?.await;
    assert_eq!(result, Err(TransportError::Exhausted { attempts: max_attempts }));
    assert_eq!(h.broker.connects(), 0);

    h.adapter.stop().await;
    Ok(())
}

async fn next_exhaustion(h: &mut Harness) -> u32 {
    h.wait_for(|event| match event {
        LifecycleEvent::Error {
            cause: StompError::Transport(TransportError::Exhausted { attempts }),
        } => Some(attempts),
        _ => None,
    })
    .await
}

#[tokio::test]
async fn adapter_can_restart_after_giving_up() -> TestResult {
    let mut h = Harness::new(|b| b.session_config(bounded(1)).destination("/topic/a"));
    h.broker.refuse_connects(1);

    let result = h.adapter.start()?.await;
    assert_eq!(result, Err(TransportError::Exhausted { attempts: 1 }));
    assert_eq!(next_exhaustion(&mut h).await, 1);
    assert!(!h.adapter.is_running());

    let generation = h.start().await;
    assert_eq!(generation, 2);
    assert!(h.adapter.is_running());
    assert_eq!(h.next_subscribed().await, "/topic/a");

    h.adapter.stop().await;
    Ok(())
}

#[tokio::test]
async fn giving_up_after_a_lost_session_is_published() -> TestResult {
    let mut h = Harness::new(|b| b.session_config(bounded(2)).destination("/topic/a"));
    h.start().await;
    assert_eq!(h.next_subscribed().await, "/topic/a");

    h.broker.refuse_connects(10);
    h.broker.drop_connection(DisconnectCause::RemoteClosed);
    assert_eq!(next_exhaustion(&mut h).await, 2);
    assert!(!h.adapter.is_running());
    assert_eq!(h.adapter.destinations().len(), 1, "the desired set survives");

    h.broker.refuse_connects(0);
    h.start().await;
    assert_eq!(h.next_subscribed().await, "/topic/a");

    h.adapter.stop().await;
    Ok(())
}

#[tokio::test]
async fn every_session_subscribes_each_destination_once() -> TestResult {
    let destinations = ["/topic/a", "/topic/b", "/queue/c"];
    let mut h = Harness::new(|b| b.destinations(destinations));
    h.start().await;

    for round in 0..3 {
        let mut seen: Vec<String> = Vec::new();
        for _ in destinations {
            seen.push(h.next_subscribed().await);
        }
        seen.sort_unstable();
        let mut expected = destinations.map(str::to_owned).to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected, "round {round}");
        if round < 2 {
            assert!(h.broker.drop_connection(DisconnectCause::TransportFailure(
                "reset by peer".into()
            )));
        }
    }

    let calls = h.broker.subscribe_calls();
    for destination in destinations {
        let count = calls.iter().filter(|d| *d == destination).count();
        assert_eq!(count, 3, "{destination} subscribed once per session");
    }
    assert_eq!(h.broker.subscriptions().len(), destinations.len());

    h.adapter.stop().await;
    Ok(())
}

#[tokio::test]
async fn frames_from_a_replaced_session_are_dropped() -> TestResult {
    let mut h = Harness::new(|b| b.destination("/topic/a"));
    h.start().await;
    h.next_subscribed().await;
    let (old_id, _) = h.broker.subscriptions().remove(0);

    h.broker.drop_connection(DisconnectCause::RemoteClosed);
    h.next_subscribed().await;
    let (new_id, _) = h.broker.subscriptions().remove(0);
    assert_ne!(old_id, new_id);

    h.broker
        .deliver(stompwire::Frame::message("/topic/a", old_id.as_str(), "stale"));
    h.broker
        .publish("/topic/a", "fresh", &stompwire::Headers::new());
    let message = h.next_message().await;
    assert_eq!(message.payload.as_text(), None, "default payloads are bytes");
    assert_eq!(
        message.subscription_id.as_ref().map(|id| id.as_str()),
        Some(new_id.as_str())
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.messages.try_recv().is_err());

    h.adapter.stop().await;
    Ok(())
}
