//! Correlation of receipt-tracked operations with broker acknowledgements.
//!
//! Every operation that asks for a receipt registers a [`PendingReceipt`]
//! under a fresh [`ReceiptToken`] and hands the caller a [`ReceiptWaiter`].
//! The inbound task resolves tokens when `RECEIPT` or `ERROR` frames arrive;
//! waiters time out on their own deadline. Whichever happens first wins and
//! the loser is ignored.

use std::{
    borrow::Borrow,
    fmt,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::{
    sync::oneshot,
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};

use crate::frame::StompCommand;

/// Identifier placed in the `receipt` header of a tracked frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReceiptToken(Arc<str>);

impl ReceiptToken {
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for ReceiptToken {
    fn from(value: &str) -> Self { Self(value.into()) }
}

impl Borrow<str> for ReceiptToken {
    fn borrow(&self) -> &str { &self.0 }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Final state of a receipt-tracked operation.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// The broker acknowledged the operation.
    Confirmed,
    /// The broker answered with an `ERROR` frame.
    Rejected {
        /// The `message` header of the error frame.
        reason: String,
    },
    /// No acknowledgement arrived before the deadline.
    TimedOut,
    /// The session ended before an acknowledgement arrived.
    ConnectionLost,
}

impl ReceiptOutcome {
    #[must_use]
    pub fn is_confirmed(&self) -> bool { matches!(self, Self::Confirmed) }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Rejected { .. } => "rejected",
            Self::TimedOut => "timed_out",
            Self::ConnectionLost => "connection_lost",
        }
    }
}

impl fmt::Display for ReceiptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The operation a receipt was requested for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiptOperation {
    pub command: StompCommand,
    pub destination: Option<String>,
}

impl ReceiptOperation {
    #[must_use]
    pub fn new(command: StompCommand, destination: Option<&str>) -> Self {
        Self {
            command,
            destination: destination.map(str::to_owned),
        }
    }
}

/// A registered waiter awaiting its receipt.
#[derive(Debug)]
pub struct PendingReceipt {
    tx: oneshot::Sender<ReceiptOutcome>,
    operation: ReceiptOperation,
    deadline: Instant,
}

impl PendingReceipt {
    #[must_use]
    pub fn operation(&self) -> &ReceiptOperation { &self.operation }

    #[must_use]
    pub fn deadline(&self) -> Instant { self.deadline }
}

/// Token-to-waiter map shared by the session facade and the inbound task.
#[derive(Debug)]
pub struct ReceiptCorrelator {
    prefix: String,
    counter: AtomicU64,
    pending: DashMap<ReceiptToken, PendingReceipt>,
}

impl ReceiptCorrelator {
    /// Create a correlator generating tokens of the form `{prefix}-{n}`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
            pending: DashMap::new(),
        }
    }

    /// Generate a token that has never been handed out by this correlator.
    pub fn next_token(&self) -> ReceiptToken {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        ReceiptToken(format!("{}-{n}", self.prefix).into())
    }

    /// Track `token` until `deadline` and return the waiter for it.
    ///
    /// Registering a token that already has an outstanding waiter replaces
    /// that waiter, which then observes [`ReceiptOutcome::ConnectionLost`].
    /// Tokens from [`next_token`](Self::next_token) never collide.
    ///
    /// ```
    /// use std::{sync::Arc, time::Duration};
    ///
    /// use stompwire::{
    ///     frame::StompCommand,
    ///     receipt::{ReceiptCorrelator, ReceiptOperation, ReceiptOutcome},
    /// };
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let correlator = Arc::new(ReceiptCorrelator::new("r"));
    /// let token = correlator.next_token();
    /// let waiter = correlator.register(
    ///     token.clone(),
    ///     ReceiptOperation::new(StompCommand::Send, Some("/queue/a")),
    ///     tokio::time::Instant::now() + Duration::from_secs(1),
    /// );
    /// assert!(correlator.resolve(token.as_str(), ReceiptOutcome::Confirmed));
    /// assert_eq!(waiter.wait().await, ReceiptOutcome::Confirmed);
    /// # }
    /// ```
    pub fn register(
        self: &Arc<Self>,
        token: ReceiptToken,
        operation: ReceiptOperation,
        deadline: Instant,
    ) -> ReceiptWaiter {
        let (tx, rx) = oneshot::channel();
        let pending = PendingReceipt {
            tx,
            operation: operation.clone(),
            deadline,
        };
        if self.pending.insert(token.clone(), pending).is_some() {
            warn!(receipt = %token, "receipt token re-registered; previous waiter dropped");
        }
        ReceiptWaiter {
            token,
            operation,
            deadline,
            rx,
            correlator: Arc::downgrade(self),
        }
    }

    /// Complete the waiter registered for `token`.
    ///
    /// Returns `false` when no waiter is outstanding, which is expected for
    /// receipts that arrive after their deadline.
    pub fn resolve(&self, token: &str, outcome: ReceiptOutcome) -> bool {
        let Some((token, pending)) = self.pending.remove(token) else {
            debug!(receipt = token, %outcome, "receipt for unknown token ignored");
            return false;
        };
        debug!(
            receipt = %token,
            command = %pending.operation.command,
            %outcome,
            "receipt resolved"
        );
        // The waiter may already be gone; the outcome is then unobserved.
        let _ = pending.tx.send(outcome);
        true
    }

    /// Stop tracking `token` without resolving it.
    pub fn discard(&self, token: &str) -> bool { self.pending.remove(token).is_some() }

    /// Resolve every outstanding waiter with `outcome`, returning how many
    /// were pending.
    pub fn fail_all(&self, outcome: &ReceiptOutcome) -> usize {
        let tokens: Vec<ReceiptToken> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for token in tokens {
            if self.resolve(token.as_str(), outcome.clone()) {
                failed += 1;
            }
        }
        failed
    }

    /// Number of receipts still awaiting an outcome.
    #[must_use]
    pub fn pending(&self) -> usize { self.pending.len() }

    /// Operation tracked under `token`, if still pending.
    #[must_use]
    pub fn operation(&self, token: &str) -> Option<ReceiptOperation> {
        self.pending.get(token).map(|p| p.operation.clone())
    }
}

/// Handle used to await a single receipt.
#[derive(Debug)]
#[must_use = "dropping a waiter discards the receipt outcome"]
pub struct ReceiptWaiter {
    token: ReceiptToken,
    operation: ReceiptOperation,
    deadline: Instant,
    rx: oneshot::Receiver<ReceiptOutcome>,
    correlator: Weak<ReceiptCorrelator>,
}

impl ReceiptWaiter {
    pub fn token(&self) -> &ReceiptToken { &self.token }

    pub fn operation(&self) -> &ReceiptOperation { &self.operation }

    pub fn deadline(&self) -> Instant { self.deadline }

    /// Wait for the outcome or the deadline, whichever comes first.
    ///
    /// On timeout the pending entry is removed so a late receipt is ignored.
    /// If a receipt was resolved in the same instant the deadline fired, the
    /// resolved outcome is returned instead of [`ReceiptOutcome::TimedOut`].
    pub async fn wait(self) -> ReceiptOutcome {
        let Self {
            token,
            deadline,
            mut rx,
            correlator,
            ..
        } = self;
        match timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ReceiptOutcome::ConnectionLost,
            Err(_) => {
                if let Some(correlator) = correlator.upgrade() {
                    correlator.discard(token.as_str());
                }
                let outcome = rx.try_recv().unwrap_or(ReceiptOutcome::TimedOut);
                debug!(receipt = %token, %outcome, "receipt deadline elapsed");
                outcome
            }
        }
    }
}
