//! Ready-made test cases.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::{
    case::{CheckResult, TestCase},
    error::Result,
    session::{Session, Transaction},
    stats,
};

/// Maximum absolute difference between an observed and an expected ratio.
pub const RATIO_TOLERANCE: f64 = 1e-3;

fn same_by<V, E, R, C>(s: &Session, read: R, same: C) -> std::result::Result<CheckResult, E>
where
    R: Fn(&Transaction) -> std::result::Result<V, E>,
    C: Fn(&V, &V) -> bool,
{
    let Some((first, rest)) = s.transactions.split_first() else {
        return Ok(CheckResult::fail("No transactions in session"));
    };
    let base = read(first)?;
    for t in rest {
        if !same(&base, &read(t)?) {
            return Ok(CheckResult::fail(format!(
                "Different responses in session {}-{}",
                s.label, s.session_id
            )));
        }
    }
    Ok(CheckResult::pass())
}

/// Every transaction of a session got the same response body as the first.
pub fn same_response(doc: &str) -> Result<TestCase> {
    TestCase::session(doc, |s: &Session| {
        same_by(
            s,
            |t| Ok::<_, std::convert::Infallible>(t.response.clone()),
            |a, b| a == b,
        )
    })
}

/// Like [`same_response`], comparing parsed JSON so key order and spacing
/// do not matter.
pub fn same_json_response(doc: &str) -> Result<TestCase> {
    same_json_response_by(doc, |a, b| a == b)
}

/// Compares parsed JSON responses with a custom predicate, e.g. one that
/// ignores timestamps.
pub fn same_json_response_by<C>(doc: &str, same: C) -> Result<TestCase>
where
    C: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
{
    TestCase::session(doc, move |s: &Session| {
        same_by(s, Transaction::response_json, &same)
    })
}

/// Reports how transactions spread over the groups `tag` assigns. Always
/// passes; the rows are the point.
pub fn distribution<T, F>(doc: &str, tag: T, filter: F) -> Result<TestCase>
where
    T: Fn(&Transaction) -> Option<String> + Send + Sync + 'static,
    F: Fn(&Session) -> bool + Send + Sync + 'static,
{
    TestCase::all_sessions(doc, move |ss: &[Session]| {
        CheckResult::pass().with_rows(stats::distribution(ss, &tag, &filter))
    })
}

/// Checks the spread of groups against expected ratios.
///
/// Fails on a group that is not expected, and on any ratio further than
/// [`RATIO_TOLERANCE`] from its expectation. Each row carries its
/// `expected` ratio.
pub fn distribution_check<T>(doc: &str, tag: T, expected: BTreeMap<String, f64>) -> Result<TestCase>
where
    T: Fn(&Transaction) -> Option<String> + Send + Sync + 'static,
{
    TestCase::all_sessions(doc, move |ss: &[Session]| {
        let mut rows = stats::distribution(ss, &tag, |_| true);
        let mut failure = None;

        for row in &mut rows {
            let group = row["group"].as_str().unwrap_or_default().to_string();
            let ratio = row["ratio"].as_f64().unwrap_or_default();
            match expected.get(&group) {
                None => {
                    failure.get_or_insert_with(|| format!("group {group} not expected"));
                    row["expected"] = Value::Null;
                }
                Some(&want) => {
                    if (ratio - want).abs() > RATIO_TOLERANCE {
                        failure.get_or_insert_with(|| {
                            format!("group {group} expected {want}, got {ratio}")
                        });
                    }
                    row["expected"] = json!(want);
                }
            }
        }
        for (group, &want) in &expected {
            let seen = rows.iter().any(|r| r["group"] == group.as_str());
            if !seen && want > RATIO_TOLERANCE {
                failure.get_or_insert_with(|| format!("group {group} expected {want}, got 0"));
                rows.push(json!({"group": group, "count": 0, "ratio": 0.0, "expected": want}));
            }
        }

        match failure {
            Some(detail) => CheckResult::fail(detail),
            None => CheckResult::pass(),
        }
        .with_rows(rows)
    })
}

/// Reports request latency percentiles. Uncovered when nothing answered.
pub fn latency(doc: &str) -> Result<TestCase> {
    TestCase::all_sessions(doc, |ss: &[Session]| {
        stats::latency_stats(ss).map(|l| CheckResult::pass().with_rows(l.rows()))
    })
}
