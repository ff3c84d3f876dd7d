//! Adds, removes and replays racing on a multi-threaded runtime.

mod common;

use std::{collections::HashSet, time::Duration};

use common::{Harness, TestResult};
use rstest::rstest;
use stompwire::session::DisconnectCause;
use stompwire_testing::BrokerCall;

const NAMES: [&str; 3] = ["/topic/a", "/topic/b", "/queue/c"];

fn sorted_subscriptions(h: &Harness) -> Vec<String> {
    let mut live: Vec<String> = h
        .broker
        .subscriptions()
        .into_iter()
        .map(|(_, destination)| destination)
        .collect();
    live.sort();
    live
}

#[rstest]
#[case(4, 40)]
#[case(8, 25)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_changes_leave_one_subscription_per_destination(
    #[case] workers: usize,
    #[case] rounds: usize,
) -> TestResult {
    let h = Harness::new(|b| b.destinations(NAMES));
    h.start().await;

    let mut tasks = Vec::new();
    for worker in 0..workers {
        let adapter = h.adapter.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..rounds {
                let name = NAMES[(worker + round) % NAMES.len()];
                if (worker * 7 + round) % 3 == 0 {
                    adapter.remove_destination(name).await;
                } else {
                    adapter.add_destination(name).await;
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    let broker = h.broker.clone();
    tasks.push(tokio::spawn(async move {
        for _ in 0..5 {
            stompwire_testing::eventually("session re-established", || broker.is_connected())
                .await;
            broker.drop_connection(DisconnectCause::TransportFailure("reset".into()));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }));
    for task in tasks {
        task.await?;
    }

    let mut desired: Vec<String> = h
        .adapter
        .destinations()
        .iter()
        .map(|d| d.name().to_owned())
        .collect();
    desired.sort();
    stompwire_testing::eventually("broker matches the desired set", || {
        h.broker.is_connected() && sorted_subscriptions(&h) == desired
    })
    .await;

    let calls = h.broker.calls();
    let mut subscribed = HashSet::new();
    let mut unsubscribed = HashSet::new();
    for call in &calls {
        match call {
            BrokerCall::Subscribe { id, .. } => {
                assert!(subscribed.insert(id.clone()), "subscription id {id} reused");
            }
            BrokerCall::Unsubscribe { id, .. } => {
                assert!(
                    subscribed.contains(id),
                    "{id} unsubscribed before it was subscribed"
                );
                assert!(unsubscribed.insert(id.clone()), "{id} unsubscribed twice");
            }
            _ => {}
        }
    }

    h.adapter.stop().await;
    Ok(())
}
