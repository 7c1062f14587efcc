//! Runs test cases over loaded sessions and folds the outcomes into reports.
//!
//! Only sessions that finished without error are checked. A checker that
//! returns an error or panics produces a failed [`CheckResult`] carrying the
//! error text and a backtrace; the remaining inputs and cases still run.

use std::{
    backtrace::Backtrace,
    borrow::Cow,
    cell::{Cell, RefCell},
    panic::{self, AssertUnwindSafe},
    sync::Once,
};

use crate::{
    case::{CaseKind, CheckResult, Checker, Outcome, TestCase},
    report::{Report, Verdict},
    session::Session,
};

thread_local! {
    static IN_CHECKER: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Chains a panic hook that records the panic-site backtrace while a checker
/// runs on this thread, and defers to the previous hook otherwise.
fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_CHECKER.with(Cell::get) {
                let trace = format!("{info}\n{}", Backtrace::force_capture());
                PANIC_TRACE.with(|t| *t.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Calls a checker, turning errors and panics into failed results.
fn guarded(check: impl FnOnce() -> Outcome) -> Option<CheckResult> {
    IN_CHECKER.with(|c| c.set(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(check));
    IN_CHECKER.with(|c| c.set(false));

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Some(CheckResult::fail(format!(
            "checking exception: {e}\nStack trace:\n{}",
            Backtrace::force_capture()
        ))),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            let trace = PANIC_TRACE
                .with(|t| t.borrow_mut().take())
                .unwrap_or_default();
            Some(CheckResult::fail(format!(
                "checking exception: {message}\nStack trace:\n{trace}"
            )))
        }
    }
}

/// Evaluates one case over `sessions`.
pub fn evaluate_case(case: &TestCase, sessions: &[Session]) -> Report {
    install_panic_hook();
    let mut report = Report::new(&case.name, &case.expectation, case.kind());
    let clean = || sessions.iter().filter(|s| s.finished_without_error());

    match &case.checker {
        Checker::Transaction(check) => {
            report.total_count = sessions.iter().map(|s| s.transactions.len()).sum();
            report.network_error_count = sessions
                .iter()
                .filter(|s| !s.finished_without_error())
                .map(|s| s.transactions.len())
                .sum();
            for transaction in clean().flat_map(|s| &s.transactions) {
                report.consume(guarded(|| check(transaction)));
            }
        }
        Checker::Session(check) => {
            report.total_count = sessions.len();
            report.network_error_count = sessions.len() - clean().count();
            for session in clean() {
                report.consume(guarded(|| check(session)));
            }
        }
        Checker::AllSessions(check) => {
            report.total_count = 1;
            let population: Cow<'_, [Session]> = if clean().count() == sessions.len() {
                Cow::Borrowed(sessions)
            } else {
                Cow::Owned(clean().cloned().collect())
            };
            if population.is_empty() {
                report.uncovered_count = 1;
            } else {
                report.consume(guarded(|| check(&*population)));
            }
        }
    }

    report.finish()
}

/// Evaluates every case, in order.
pub fn evaluate(cases: &[TestCase], sessions: &[Session]) -> Vec<Report> {
    cases
        .iter()
        .map(|case| {
            let report = evaluate_case(case, sessions);
            match report.result {
                Verdict::Failed => tracing::warn!(
                    "{} ({}) failed {}/{}: {}",
                    report.name,
                    report.kind,
                    report.failed_count,
                    report.evaluated(),
                    report.detail.as_deref().unwrap_or_default().lines().next().unwrap_or_default(),
                ),
                _ => tracing::info!("{} ({}) checked: {}", report.name, report.kind, report.result),
            }
            report
        })
        .collect()
}

/// Counts by kind, handy for logs.
pub fn kinds(cases: &[TestCase]) -> [(CaseKind, usize); 3] {
    let count = |kind| cases.iter().filter(|c| c.kind() == kind).count();
    [
        (CaseKind::Transaction, count(CaseKind::Transaction)),
        (CaseKind::Session, count(CaseKind::Session)),
        (CaseKind::AllSessions, count(CaseKind::AllSessions)),
    ]
}
