use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Raw send statistics of a dispatcher run.
///
/// Like every aggregate, `SendStats` only stores mergeable raw data: counts
/// and sums. Averages and rates are derived later by
/// [`SendReport`](crate::report::SendReport), so worker-local stats can be
/// merged in any order without losing precision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendStats {
    pub session_count: usize,
    /// Sessions that ended aborted
    pub aborted_count: usize,
    pub transaction_count: usize,
    /// Transactions without a 200
    pub error_count: usize,
    pub retry_count: u64,
    /// Sum of per-request `cost_time`
    pub request_cost: Duration,
    /// Sum of whole-session wall time
    pub session_cost: Duration,
}

impl SendStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incorporate one finished session and how long its loop took.
    pub fn consume(&mut self, session: &Session, elapsed: Duration) {
        self.session_count += 1;
        if !session.finished_without_error() {
            self.aborted_count += 1;
        }
        for t in &session.transactions {
            self.transaction_count += 1;
            if !t.finished_without_error() {
                self.error_count += 1;
            }
            self.retry_count += u64::from(t.retry_count);
            self.request_cost += Duration::from_secs_f64(t.cost_time.max(0.0));
        }
        self.session_cost += elapsed;
    }

    /// Count a session whose maintainer panicked. Nothing it recorded is
    /// trusted, so it counts as aborted with no transactions.
    pub fn consume_panicked(&mut self, elapsed: Duration) {
        self.session_count += 1;
        self.aborted_count += 1;
        self.session_cost += elapsed;
    }

    /// Combine two aggregates into one. Associative and commutative.
    pub fn merge(&mut self, other: Self) {
        self.session_count += other.session_count;
        self.aborted_count += other.aborted_count;
        self.transaction_count += other.transaction_count;
        self.error_count += other.error_count;
        self.retry_count += other.retry_count;
        self.request_cost += other.request_cost;
        self.session_cost += other.session_cost;
    }
}
