//! Test cases: a name, an expectation and a checker over recorded data.
//!
//! Each case has one of three kinds, decided by what its checker looks at:
//!
//! - [`CaseKind::Transaction`]: called once per transaction of every clean
//!   session.
//! - [`CaseKind::Session`]: called once per clean session.
//! - [`CaseKind::AllSessions`]: called once with every clean session.
//!
//! Name and expectation come from a doc string of the form
//! `"name: expectation"` (a full-width `：` works too), so a checker's
//! documentation doubles as its entry in the test report.
//!
//! ```rust
//! use session_tester::{CheckResult, TestCase, Transaction};
//!
//! let case = TestCase::transaction("Status: every request answers 200", |t: &Transaction| {
//!     CheckResult::from(t.status_code == Some(200))
//! })
//! .unwrap();
//! assert_eq!(case.name, "Status");
//! ```

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    session::{Session, Transaction},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseKind {
    Transaction,
    Session,
    AllSessions,
}

impl fmt::Display for CaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transaction => "transaction",
            Self::Session => "session",
            Self::AllSessions => "all_sessions",
        })
    }
}

/// The verdict of one checker call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: Option<String>,
    /// Free-form rows for side tables (distributions, latency).
    #[serde(default)]
    pub report_rows: Vec<Value>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            detail: None,
            report_rows: Vec::new(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: Some(detail.into()),
            report_rows: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.report_rows = rows;
        self
    }
}

impl From<bool> for CheckResult {
    fn from(passed: bool) -> Self {
        if passed {
            Self::pass()
        } else {
            Self {
                passed: false,
                detail: None,
                report_rows: Vec::new(),
            }
        }
    }
}

/// What a checker call produced: a verdict, no verdict (uncovered), or the
/// text of an error the checker raised.
pub type Outcome = std::result::Result<Option<CheckResult>, String>;

/// Return types a checker may use.
pub trait IntoCheckOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoCheckOutcome for CheckResult {
    fn into_outcome(self) -> Outcome {
        Ok(Some(self))
    }
}

impl IntoCheckOutcome for Option<CheckResult> {
    fn into_outcome(self) -> Outcome {
        Ok(self)
    }
}

impl IntoCheckOutcome for bool {
    fn into_outcome(self) -> Outcome {
        Ok(Some(self.into()))
    }
}

impl<E: fmt::Display> IntoCheckOutcome for std::result::Result<CheckResult, E> {
    fn into_outcome(self) -> Outcome {
        self.map(Some).map_err(|e| e.to_string())
    }
}

impl<E: fmt::Display> IntoCheckOutcome for std::result::Result<Option<CheckResult>, E> {
    fn into_outcome(self) -> Outcome {
        self.map_err(|e| e.to_string())
    }
}

type TransactionFn = Box<dyn Fn(&Transaction) -> Outcome + Send + Sync>;
type SessionFn = Box<dyn Fn(&Session) -> Outcome + Send + Sync>;
type AllSessionsFn = Box<dyn Fn(&[Session]) -> Outcome + Send + Sync>;

/// A type-erased checker, tagged with the population it runs over.
pub enum Checker {
    Transaction(TransactionFn),
    Session(SessionFn),
    AllSessions(AllSessionsFn),
}

impl Checker {
    pub fn transaction<F, R>(f: F) -> Self
    where
        F: Fn(&Transaction) -> R + Send + Sync + 'static,
        R: IntoCheckOutcome,
    {
        Self::Transaction(Box::new(move |t| f(t).into_outcome()))
    }

    pub fn session<F, R>(f: F) -> Self
    where
        F: Fn(&Session) -> R + Send + Sync + 'static,
        R: IntoCheckOutcome,
    {
        Self::Session(Box::new(move |s| f(s).into_outcome()))
    }

    pub fn all_sessions<F, R>(f: F) -> Self
    where
        F: Fn(&[Session]) -> R + Send + Sync + 'static,
        R: IntoCheckOutcome,
    {
        Self::AllSessions(Box::new(move |ss| f(ss).into_outcome()))
    }

    pub fn kind(&self) -> CaseKind {
        match self {
            Self::Transaction(_) => CaseKind::Transaction,
            Self::Session(_) => CaseKind::Session,
            Self::AllSessions(_) => CaseKind::AllSessions,
        }
    }
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checker::{:?}", self.kind())
    }
}

#[derive(Debug)]
pub struct TestCase {
    pub name: String,
    pub expectation: String,
    pub checker: Checker,
}

impl TestCase {
    /// Builds a case from an explicit name and expectation, both non-empty.
    pub fn named(
        name: impl Into<String>,
        expectation: impl Into<String>,
        checker: Checker,
    ) -> Result<Self> {
        let (name, expectation) = (name.into(), expectation.into());
        if name.trim().is_empty() {
            return Err(Error::config("test case name must not be empty"));
        }
        if expectation.trim().is_empty() {
            return Err(Error::config(format!(
                "test case {name:?} needs an expectation"
            )));
        }
        Ok(Self {
            name,
            expectation,
            checker,
        })
    }

    /// Builds a case whose name and expectation come from `doc`.
    pub fn from_doc(doc: &str, checker: Checker) -> Result<Self> {
        let (name, expectation) = split_doc(doc)?;
        Self::named(name, expectation, checker)
    }

    pub fn transaction<F, R>(doc: &str, f: F) -> Result<Self>
    where
        F: Fn(&Transaction) -> R + Send + Sync + 'static,
        R: IntoCheckOutcome,
    {
        Self::from_doc(doc, Checker::transaction(f))
    }

    pub fn session<F, R>(doc: &str, f: F) -> Result<Self>
    where
        F: Fn(&Session) -> R + Send + Sync + 'static,
        R: IntoCheckOutcome,
    {
        Self::from_doc(doc, Checker::session(f))
    }

    pub fn all_sessions<F, R>(doc: &str, f: F) -> Result<Self>
    where
        F: Fn(&[Session]) -> R + Send + Sync + 'static,
        R: IntoCheckOutcome,
    {
        Self::from_doc(doc, Checker::all_sessions(f))
    }

    pub fn kind(&self) -> CaseKind {
        self.checker.kind()
    }
}

/// Splits `"name: expectation"` on the first ASCII or full-width colon.
///
/// The name is folded onto one line; expectation lines lose their leading
/// blanks, which strips the indentation doc comments carry.
pub fn split_doc(doc: &str) -> Result<(String, String)> {
    let Some((at, colon)) = doc.char_indices().find(|&(_, c)| c == ':' || c == '：') else {
        return Err(Error::config(format!(
            "checker doc {doc:?} must read \"name: expectation\""
        )));
    };
    let name = doc[..at].split_whitespace().collect::<Vec<_>>().join(" ");
    let expectation = doc[at + colon.len_utf8()..]
        .trim()
        .lines()
        .map(str::trim_start)
        .collect::<Vec<_>>()
        .join("\n");

    if name.is_empty() {
        return Err(Error::config(format!("checker doc {doc:?} has no name")));
    }
    if expectation.is_empty() {
        return Err(Error::config(format!(
            "checker doc {doc:?} has no expectation"
        )));
    }
    Ok((name, expectation))
}

/// Fails on the first name used twice.
pub fn ensure_unique<'a>(names: impl IntoIterator<Item = &'a str>, what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::config(format!("duplicate {what} name: {name}")));
        }
    }
    Ok(())
}

/// Explicit cases first, then discovered ones, names unique across both.
pub fn merge_cases(explicit: Vec<TestCase>, discovered: Vec<TestCase>) -> Result<Vec<TestCase>> {
    let cases: Vec<TestCase> = explicit.into_iter().chain(discovered).collect();
    ensure_unique(cases.iter().map(|c| c.name.as_str()), "test case")?;
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_splits_on_first_colon() {
        let (name, expectation) = split_doc("Latency: under 1s: always").unwrap();
        assert_eq!(name, "Latency");
        assert_eq!(expectation, "under 1s: always");
    }

    #[test]
    fn doc_accepts_full_width_colon() {
        let (name, expectation) = split_doc("状态码：全部为200").unwrap();
        assert_eq!(name, "状态码");
        assert_eq!(expectation, "全部为200");
    }

    #[test]
    fn doc_comment_layout_is_normalized() {
        let doc = " Same answer\n across rounds:\n every round\n    answers alike ";
        let (name, expectation) = split_doc(doc).unwrap();
        assert_eq!(name, "Same answer across rounds");
        assert_eq!(expectation, "every round\nanswers alike");
    }

    #[test]
    fn doc_without_name_or_expectation_is_rejected() {
        for doc in ["no colon here", ": only expectation", "only name:  \n "] {
            assert!(matches!(split_doc(doc), Err(Error::Config(_))), "{doc:?}");
        }
    }

    #[test]
    fn named_requires_both_fields() {
        let checker = || Checker::session(|_: &Session| true);
        assert!(TestCase::named("", "x", checker()).is_err());
        assert!(TestCase::named("x", " ", checker()).is_err());
        assert!(TestCase::named("x", "y", checker()).is_ok());
    }

    #[test]
    fn constructors_tag_the_kind() {
        let t = TestCase::transaction("a: b", |_: &Transaction| CheckResult::pass()).unwrap();
        let s = TestCase::session("a: b", |_: &Session| None::<CheckResult>).unwrap();
        let all = TestCase::all_sessions("a: b", |ss: &[Session]| {
            Ok::<_, String>(CheckResult::from(ss.is_empty()))
        })
        .unwrap();
        assert_eq!(t.kind(), CaseKind::Transaction);
        assert_eq!(s.kind(), CaseKind::Session);
        assert_eq!(all.kind(), CaseKind::AllSessions);
    }

    #[test]
    fn return_types_convert() {
        assert_eq!(CheckResult::pass().into_outcome(), Ok(Some(CheckResult::pass())));
        assert_eq!(None::<CheckResult>.into_outcome(), Ok(None));
        assert!(!false.into_outcome().unwrap().unwrap().passed);
        let err: std::result::Result<CheckResult, &str> = Err("bad payload");
        assert_eq!(err.into_outcome(), Err("bad payload".to_string()));
        let uncovered: std::result::Result<Option<CheckResult>, String> = Ok(None);
        assert_eq!(uncovered.into_outcome(), Ok(None));
    }

    #[test]
    fn merge_rejects_duplicates_across_lists() {
        let case = |doc: &str| TestCase::session(doc, |_: &Session| true).unwrap();

        let merged = merge_cases(vec![case("a: x")], vec![case("b: y")]).unwrap();
        let names: Vec<_> = merged.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);

        let err = merge_cases(vec![case("a: x")], vec![case("a: y")]).unwrap_err();
        assert!(err.to_string().contains("duplicate test case name: a"));
    }
}
