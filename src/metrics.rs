//! Metric helpers for `stompwire`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking live subscriptions.
pub const SUBSCRIPTIONS_ACTIVE: &str = "stompwire_subscriptions_active";
/// Name of the counter tracking converted `MESSAGE` frames.
pub const FRAMES_CONVERTED: &str = "stompwire_frames_converted_total";
/// Name of the counter tracking established sessions.
pub const CONNECTS_TOTAL: &str = "stompwire_connects_total";
/// Name of the counter tracking failed connect attempts.
pub const CONNECT_FAILURES_TOTAL: &str = "stompwire_connect_failures_total";
/// Name of the counter tracking receipt outcomes.
pub const RECEIPTS_TOTAL: &str = "stompwire_receipts_total";

/// Result of converting an inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
    /// The frame was converted and accepted by the output sink.
    Delivered,
    /// The frame could not be converted and went to the error sink.
    Rejected,
    /// Neither sink accepted the frame.
    Dropped,
}

impl Conversion {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "labels only feed metrics"))]
    fn as_str(self) -> &'static str {
        match self {
            Conversion::Delivered => "delivered",
            Conversion::Rejected => "rejected",
            Conversion::Dropped => "dropped",
        }
    }
}

/// Set the live subscriptions gauge.
#[cfg_attr(
    feature = "metrics",
    expect(clippy::cast_precision_loss, reason = "subscription counts stay small")
)]
pub fn set_subscriptions(count: usize) {
    #[cfg(feature = "metrics")]
    gauge!(SUBSCRIPTIONS_ACTIVE).set(count as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record a converted frame with its outcome.
pub fn inc_frames(outcome: Conversion) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_CONVERTED, "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record an established session.
pub fn inc_connects() {
    #[cfg(feature = "metrics")]
    counter!(CONNECTS_TOTAL).increment(1);
}

/// Record a failed connect attempt.
pub fn inc_connect_failures() {
    #[cfg(feature = "metrics")]
    counter!(CONNECT_FAILURES_TOTAL).increment(1);
}

/// Record a settled receipt, labelled with its outcome.
pub fn inc_receipts(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(RECEIPTS_TOTAL, "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}
