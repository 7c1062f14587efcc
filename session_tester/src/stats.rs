//! Side-table helpers for all-sessions cases.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::session::{Session, Transaction};

/// Counts transactions per tag over the sessions `filter` accepts.
///
/// One row per tag, sorted by tag: `{"group", "count", "ratio"}` where
/// `ratio` is the share of all tagged transactions. Transactions the tag
/// function returns `None` for are left out.
pub fn distribution<T, F>(sessions: &[Session], tag: T, filter: F) -> Vec<Value>
where
    T: Fn(&Transaction) -> Option<String>,
    F: Fn(&Session) -> bool,
{
    let mut groups: BTreeMap<String, usize> = BTreeMap::new();
    for t in sessions
        .iter()
        .filter(|&s| filter(s))
        .flat_map(|s| &s.transactions)
    {
        if let Some(group) = tag(t) {
            *groups.entry(group).or_default() += 1;
        }
    }

    let total: usize = groups.values().sum();
    groups
        .into_iter()
        .map(|(group, count)| {
            json!({
                "group": group,
                "count": count,
                "ratio": count as f64 / total as f64,
            })
        })
        .collect()
}

/// Latency summary of every answered transaction, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencyStats {
    pub fn rows(&self) -> Vec<Value> {
        [
            ("count", self.count as f64),
            ("mean", self.mean),
            ("p50", self.p50),
            ("p90", self.p90),
            ("p95", self.p95),
            ("p99", self.p99),
            ("max", self.max),
        ]
        .into_iter()
        .map(|(stat, value)| json!({"stat": stat, "value_ms": value}))
        .collect()
    }
}

pub fn latency_stats(sessions: &[Session]) -> Option<LatencyStats> {
    let mut costs: Vec<f64> = sessions
        .iter()
        .flat_map(|s| &s.transactions)
        .filter(|t| t.status_code.is_some())
        .map(|t| t.cost_time * 1000.0)
        .collect();
    if costs.is_empty() {
        return None;
    }
    costs.sort_by(f64::total_cmp);

    let len = costs.len();
    let at = |q: f64| costs[((len as f64 * q) as usize).min(len - 1)];
    Some(LatencyStats {
        count: len,
        mean: costs.iter().sum::<f64>() / len as f64,
        p50: at(0.50),
        p90: at(0.90),
        p95: at(0.95),
        p99: at(0.99),
        max: costs[len - 1],
    })
}
