//! Log output of the adapter's lifecycle.

mod common;

use common::{Harness, TestResult};
use log::Level;
use rstest::rstest;
use serial_test::serial;
use stompwire::{LifecycleEvent, session::DisconnectCause};
use stompwire_testing::{LoggerHandle, logger};

fn assert_logged(logger: &mut LoggerHandle, level: Level, needle: &str) {
    let mut seen = Vec::new();
    while let Some(record) = logger.pop() {
        let message = record.args().to_string();
        if record.level() == level && message.contains(needle) {
            return;
        }
        seen.push(message);
    }
    panic!("no {level} record containing {needle:?}; saw {seen:?}");
}

#[rstest]
#[tokio::test]
#[serial(adapter_logs)]
async fn session_changes_are_logged(mut logger: LoggerHandle) -> TestResult {
    logger.clear();
    let mut h = Harness::new(|b| b.destination("/topic/a"));
    h.start().await;
    h.next_subscribed().await;
    assert_logged(&mut logger, Level::Info, "session connected");

    logger.clear();
    h.broker.drop_connection(DisconnectCause::TransportFailure("reset".into()));
    h.next_subscribed().await;
    assert_logged(&mut logger, Level::Warn, "session lost");

    h.adapter.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test]
#[serial(adapter_logs)]
async fn panicking_observer_is_logged_and_isolated(mut logger: LoggerHandle) -> TestResult {
    logger.clear();
    let mut h = Harness::new(|b| {
        b.observer(|event: &LifecycleEvent| {
            if matches!(event, LifecycleEvent::Subscribed { .. }) {
                panic!("observer bug");
            }
        })
        .destination("/topic/a")
    });
    h.start().await;
    assert_eq!(h.next_subscribed().await, "/topic/a");
    assert_logged(&mut logger, Level::Warn, "event observer panicked");

    h.broker.publish("/topic/a", "still flowing", &stompwire::Headers::new());
    h.next_message().await;

    h.adapter.stop().await;
    Ok(())
}
