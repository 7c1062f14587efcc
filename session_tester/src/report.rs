use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, time::Duration};

use crate::{
    aggregate::SendStats,
    case::{CaseKind, CheckResult},
    error::Result,
};

/// Send statistics with the derived rates of a finished dispatcher run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReport {
    pub session_count: usize,
    pub aborted_count: usize,
    pub transaction_count: usize,
    pub error_count: usize,
    pub retry_count: u64,
    /// Wall clock of the whole run
    pub elapsed: Duration,
    pub qps: f64,
    pub mean_request_cost: Duration,
    pub mean_session_cost: Duration,
}

impl SendReport {
    pub fn new(stats: SendStats, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            session_count: stats.session_count,
            aborted_count: stats.aborted_count,
            transaction_count: stats.transaction_count,
            error_count: stats.error_count,
            retry_count: stats.retry_count,
            elapsed,
            qps: if secs > 0.0 {
                stats.transaction_count as f64 / secs
            } else {
                0.0
            },
            mean_request_cost: mean(stats.request_cost, stats.transaction_count),
            mean_session_cost: mean(stats.session_cost, stats.session_count),
        }
    }
}

fn mean(total: Duration, count: usize) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        total.div_f64(count as f64)
    }
}

impl fmt::Display for SendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sessions ({} aborted), {} requests ({} retries, {} failed) in {:.3}s; \
             mean request {:.1}ms, mean session {:.1}ms, {:.1} qps",
            self.session_count,
            self.aborted_count,
            self.transaction_count,
            self.retry_count,
            self.error_count,
            self.elapsed.as_secs_f64(),
            self.mean_request_cost.as_secs_f64() * 1000.0,
            self.mean_session_cost.as_secs_f64() * 1000.0,
            self.qps,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    /// Nothing was there to check, or no checker gave a verdict.
    Uncovered,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Uncovered => "uncovered",
        })
    }
}

/// The outcome of one case over its whole population.
///
/// Built incrementally: [`Report::consume`] folds in each checker outcome
/// and [`Report::finish`] settles the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub expectation: String,
    pub kind: CaseKind,
    /// Candidate inputs, including the ones excluded for network errors
    pub total_count: usize,
    /// Candidates skipped because their session did not finish cleanly
    pub network_error_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    pub uncovered_count: usize,
    pub result: Verdict,
    /// Detail of the first failure
    pub detail: Option<String>,
    pub report_rows: Vec<Value>,
}

impl Report {
    pub fn new(name: impl Into<String>, expectation: impl Into<String>, kind: CaseKind) -> Self {
        Self {
            name: name.into(),
            expectation: expectation.into(),
            kind,
            total_count: 0,
            network_error_count: 0,
            passed_count: 0,
            failed_count: 0,
            uncovered_count: 0,
            result: Verdict::Uncovered,
            detail: None,
            report_rows: Vec::new(),
        }
    }

    pub fn consume(&mut self, outcome: Option<CheckResult>) {
        let Some(result) = outcome else {
            self.uncovered_count += 1;
            return;
        };
        if result.passed {
            self.passed_count += 1;
        } else {
            self.failed_count += 1;
            if self.detail.is_none() {
                self.detail = result.detail;
            }
        }
        self.report_rows.extend(result.report_rows);
    }

    /// Number of checker outcomes folded in so far.
    pub fn evaluated(&self) -> usize {
        self.passed_count + self.failed_count + self.uncovered_count
    }

    pub fn finish(mut self) -> Self {
        self.result = if self.failed_count > 0 {
            Verdict::Failed
        } else if self.passed_count == 0 {
            Verdict::Uncovered
        } else {
            Verdict::Passed
        };
        self
    }
}

/// Everything one suite produced: its send statistics when it sent, its
/// case reports (in case order) when it was checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<SendReport>,
    #[serde(default)]
    pub reports: Vec<Report>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.reports.iter().all(|r| r.result == Verdict::Passed)
    }

    pub fn get(&self, case: &str) -> Option<&Report> {
        self.reports.iter().find(|r| r.name == case)
    }
}

/// Sends finished reports somewhere: a terminal, a document, a database.
#[async_trait]
pub trait Reporter {
    async fn report(&self, reports: &[SuiteReport]) -> Result<()>;
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;

    /// Prints a one-line summary per case, then the side rows as JSON.
    pub struct StdoutReporter;

    #[async_trait]
    impl Reporter for StdoutReporter {
        async fn report(&self, reports: &[SuiteReport]) -> Result<()> {
            for suite in reports {
                println!("== {}", suite.suite);
                if let Some(send) = &suite.send {
                    println!("{send}");
                }
                for r in &suite.reports {
                    println!(
                        "{:<32} {:<10} passed {:>5}  failed {:>5}  uncovered {:>5}  network errors {:>5}",
                        r.name,
                        r.result,
                        r.passed_count,
                        r.failed_count,
                        r.uncovered_count,
                        r.network_error_count,
                    );
                    if let Some(detail) = &r.detail {
                        println!("    {}", detail.replace('\n', "\n    "));
                    }
                    for row in &r.report_rows {
                        println!("    {}", serde_json::to_string(row)?);
                    }
                }
            }
            Ok(())
        }
    }
}
