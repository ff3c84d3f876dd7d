//! The adapter's inbound task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::AdapterInner;
use crate::{
    converter::Dispatch,
    error::StompError,
    event::LifecycleEvent,
    frame::{Frame, StompCommand},
    receipt::ReceiptOutcome,
    session::{SessionEvent, TransportError},
};

pub(super) async fn run(
    inner: Arc<AdapterInner>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let gave_up = matches!(event, SessionEvent::GaveUp { .. });
        inner.handle(event).await;
        if gave_up {
            break;
        }
    }
    debug!("inbound task finished");
}

impl AdapterInner {
    async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { generation } => {
                if self.session.generation() != Some(generation) {
                    debug!(generation, "connect notice for a replaced session ignored");
                    return;
                }
                self.publisher
                    .publish(&LifecycleEvent::Connected { generation });
                self.coordinator.on_connected().await;
            }
            SessionEvent::Frame { generation, frame } => {
                if self.session.generation() != Some(generation) {
                    trace!(generation, command = %frame.command, "frame from a replaced session dropped");
                    return;
                }
                self.on_frame(generation, frame);
            }
            SessionEvent::Error(error) => {
                self.publisher.publish(&LifecycleEvent::Error {
                    cause: StompError::Transport(error),
                });
            }
            SessionEvent::Disconnected { generation, cause } => {
                self.coordinator.on_disconnected(generation);
                self.publisher
                    .publish(&LifecycleEvent::Disconnected { cause });
            }
            SessionEvent::GaveUp { attempts } => {
                self.publisher.publish(&LifecycleEvent::Error {
                    cause: StompError::Transport(TransportError::Exhausted { attempts }),
                });
            }
        }
    }

    fn on_frame(&self, generation: u64, frame: Frame) {
        match frame.command {
            StompCommand::Message => self.on_message(generation, frame),
            StompCommand::Receipt => match frame.headers.receipt_id() {
                Some(token) => {
                    self.session
                        .receipts()
                        .resolve(token, ReceiptOutcome::Confirmed);
                }
                None => warn!("RECEIPT frame without receipt-id ignored"),
            },
            StompCommand::Error => {
                let reason = frame.headers.message().map_or_else(
                    || String::from_utf8_lossy(&frame.body).into_owned(),
                    str::to_owned,
                );
                match frame.headers.receipt_id() {
                    Some(token) => {
                        self.session
                            .receipts()
                            .resolve(token, ReceiptOutcome::Rejected { reason });
                    }
                    None => {
                        warn!(%reason, "broker reported an error");
                        self.publisher.publish(&LifecycleEvent::Error {
                            cause: StompError::Broker { message: reason },
                        });
                    }
                }
            }
            other => debug!(command = %other, "unexpected inbound frame ignored"),
        }
    }

    fn on_message(&self, generation: u64, frame: Frame) {
        let routed = match frame.headers.subscription() {
            Some(id) => self.coordinator.route(id, generation).is_some(),
            None => frame
                .headers
                .destination()
                .is_some_and(|d| self.coordinator.destinations().contains(d)),
        };
        if !routed {
            debug!(
                destination = frame.headers.destination(),
                subscription_id = frame.headers.subscription(),
                "frame for an inactive subscription dropped"
            );
            return;
        }
        let errors = self.errors.as_deref();
        match self.converter.dispatch(frame, &*self.output, errors) {
            Dispatch::Delivered | Dispatch::Undeliverable(_) => {}
            Dispatch::Rejected(rejected) => {
                self.publisher.publish(&LifecycleEvent::ConversionError {
                    cause: rejected.cause,
                    frame: rejected.frame,
                });
            }
        }
    }
}
