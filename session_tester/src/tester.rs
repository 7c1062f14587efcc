//! Tester: runs a named set of suites against one store and one transport
//! pool.
//!
//! Sessions of a tester live in a sub-directory of the store named after the
//! tester, so several testers can share a root without clobbering each
//! other. Each suite's name is its label inside that directory.
//!
//! # Run modes
//! - [`RunMode::New`]: clear every suite's old sessions, send, then check.
//! - [`RunMode::Check`]: check what an earlier run persisted. Useful while
//!   iterating on checkers without hitting the service again.
//! - [`RunMode::Benchmark`]: send without persisting and report send
//!   statistics only.
//!
//! Every test definition is validated before any session I/O happens.

use std::{collections::HashSet, sync::Arc, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    dispatcher::{Dispatcher, DispatcherConfig},
    error::{Error, Result},
    evaluate::{evaluate, kinds},
    report::{SendReport, SuiteReport},
    session::Session,
    store::SessionStore,
    suite::TestSuite,
    transport::{Transport, TransportPool},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    New,
    Check,
    Benchmark,
}

#[derive(TypedBuilder)]
pub struct Tester<T: Transport> {
    #[builder(setter(into))]
    pub name: String,
    pub suites: Vec<TestSuite>,
    /// Root store; the tester works in its `name` sub-directory
    pub store: SessionStore,
    pub pool: Arc<TransportPool<T>>,
    #[builder(default = num_cpus::get() * 8)]
    pub concurrency: usize,
    /// Fewer loaded sessions than this fails the check phase of a suite
    #[builder(default = 1)]
    pub min_sessions: usize,
    #[builder(default = Duration::from_millis(100))]
    pub poll_interval: Duration,
}

impl<T: Transport> Tester<T> {
    /// Rejects empty or duplicate suite names and duplicate case names.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("tester name must not be empty"));
        }
        let mut seen = HashSet::new();
        for suite in &self.suites {
            if suite.name.trim().is_empty() {
                return Err(Error::config("test suite name must not be empty"));
            }
            if !seen.insert(suite.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate test suite name: {}",
                    suite.name
                )));
            }
            suite.validate()?;
        }
        Ok(())
    }

    pub async fn run(&self, mode: RunMode) -> Result<Vec<SuiteReport>> {
        self.validate()?;
        let store = self.store.scoped(&self.name)?;
        let mut reports: Vec<SuiteReport> = self
            .suites
            .iter()
            .map(|s| SuiteReport {
                suite: s.name.clone(),
                send: None,
                reports: Vec::new(),
            })
            .collect();

        match mode {
            RunMode::New => {
                for suite in &self.suites {
                    let (store, label) = (store.clone(), suite.name.clone());
                    tokio::task::spawn_blocking(move || store.clear(&label)).await??;
                }
                tracing::info!("{}: cleared old sessions", self.name);
                for (suite, report) in self.suites.iter().zip(&mut reports) {
                    report.send = Some(self.send(&store, suite, false).await?);
                }
                tracing::info!("{}: sending finished", self.name);
            }
            RunMode::Benchmark => {
                tracing::info!("{}: starting benchmark", self.name);
                for (suite, report) in self.suites.iter().zip(&mut reports) {
                    report.send = Some(self.send(&store, suite, true).await?);
                }
                tracing::info!("{}: benchmark finished", self.name);
                return Ok(reports);
            }
            RunMode::Check => {}
        }

        for (suite, report) in self.suites.iter().zip(&mut reports) {
            let sessions = self.load(&store, &suite.name).await?;
            let [(_, t), (_, s), (_, a)] = kinds(&suite.cases);
            tracing::info!(
                "{}: checking {} sessions against {t} transaction, {s} session and {a} all-sessions cases",
                suite.name,
                sessions.len(),
            );
            let cases = Arc::clone(&suite.cases);
            report.reports =
                tokio::task::spawn_blocking(move || evaluate(&cases, &sessions)).await?;
            tracing::info!("{}: check finished", suite.name);
        }
        Ok(reports)
    }

    async fn send(
        &self,
        store: &SessionStore,
        suite: &TestSuite,
        skip_persistence: bool,
    ) -> Result<SendReport> {
        let config = DispatcherConfig::builder()
            .label(suite.name.as_str())
            .concurrency(self.concurrency)
            .skip_persistence(skip_persistence)
            .poll_interval(self.poll_interval)
            .build();
        Dispatcher::new(config, store.clone(), Arc::clone(&self.pool))
            .run(
                Arc::clone(&suite.queue),
                Arc::clone(&suite.source),
                Arc::clone(&suite.maintainer),
            )
            .await
    }

    async fn load(&self, store: &SessionStore, label: &str) -> Result<Vec<Session>> {
        let (store, owned) = (store.clone(), label.to_string());
        let sessions = tokio::task::spawn_blocking(move || store.load(&owned, None)).await??;
        if sessions.len() < self.min_sessions {
            return Err(Error::Shortfall {
                label: label.to_string(),
                expected: self.min_sessions,
                found: sessions.len(),
            });
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        case::{CheckResult, TestCase},
        identity::UserIdentity,
        maintainer::{Strategy, stop_after_rounds},
        report::Verdict,
        request::{PreparedRequest, Request, RequestDefaults},
        session::Transaction,
        transport::{RawResponse, TransportError},
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the request body back with a running counter.
    #[derive(Clone, Default)]
    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn send(
            &self,
            request: &PreparedRequest,
        ) -> std::result::Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawResponse {
                status: 200,
                body: json!({"data": {"echo": request.body}}).to_string(),
            })
        }
    }

    fn suite(name: &str, users: usize, rounds: usize) -> TestSuite {
        let strategy = Strategy::builder()
            .defaults(
                RequestDefaults::builder()
                    .url("http://localhost:8000")
                    .retry_backoff(Duration::ZERO)
                    .build(),
            )
            .build_request(|s| Request::json(json!({"user_id": s.identity.id})))
            .should_stop(stop_after_rounds(rounds))
            .build();
        let cases = vec![
            TestCase::transaction("Echo: response echoes the request", |t: &Transaction| -> std::result::Result<CheckResult, String> {
                let data = t.response_data().map_err(|e| e.to_string())?;
                Ok(CheckResult::from(data["echo"] == json!(t.request)))
            })
            .unwrap(),
            TestCase::all_sessions("Population: one session per user", move |ss: &[Session]| {
                CheckResult::from(ss.len() == users)
            })
            .unwrap(),
        ];
        TestSuite::new(name, strategy)
            .unwrap()
            .with_source((0..users).map(|i| UserIdentity::new(format!("u{i}"))).collect::<Vec<_>>())
            .with_cases(cases, vec![])
            .unwrap()
    }

    fn tester(root: &std::path::Path, suites: Vec<TestSuite>, transport: Echo) -> Tester<Echo> {
        Tester::builder()
            .name("nightly")
            .suites(suites)
            .store(SessionStore::new(root).unwrap())
            .pool(Arc::new(TransportPool::new(move || Ok(transport.clone()))))
            .concurrency(4)
            .poll_interval(Duration::from_millis(5))
            .build()
    }

    #[tokio::test]
    async fn new_mode_sends_then_checks() {
        let dir = tempfile::tempdir().unwrap();
        let t = tester(dir.path(), vec![suite("login", 3, 2), suite("browse", 2, 1)], Echo::default());

        let reports = t.run(RunMode::New).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].send.as_ref().unwrap().transaction_count, 6);
        assert!(reports.iter().all(SuiteReport::passed), "{reports:#?}");
        assert_eq!(reports[0].get("Echo").unwrap().passed_count, 6);
        assert!(dir.path().join("nightly").join("login-00000001.json").exists());
    }

    #[tokio::test]
    async fn new_mode_clears_previous_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let t = tester(dir.path(), vec![suite("login", 2, 1)], Echo::default());

        t.run(RunMode::New).await.unwrap();
        let reports = t.run(RunMode::New).await.unwrap();

        assert_eq!(reports[0].get("Population").unwrap().result, Verdict::Passed);
    }

    #[tokio::test]
    async fn check_mode_does_not_send() {
        let dir = tempfile::tempdir().unwrap();
        let echo = Echo::default();
        let calls = Arc::clone(&echo.calls);
        let t = tester(dir.path(), vec![suite("login", 2, 3)], echo);

        t.run(RunMode::New).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let reports = t.run(RunMode::Check).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(reports[0].send.is_none());
        assert!(reports[0].passed());
    }

    #[tokio::test]
    async fn check_without_sessions_is_a_shortfall() {
        let dir = tempfile::tempdir().unwrap();
        let t = tester(dir.path(), vec![suite("login", 2, 1)], Echo::default());

        let err = t.run(RunMode::Check).await.unwrap_err();
        assert!(
            matches!(err, Error::Shortfall { ref label, expected: 1, found: 0 } if label == "login"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn benchmark_sends_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let t = tester(dir.path(), vec![suite("login", 4, 2)], Echo::default());

        let reports = t.run(RunMode::Benchmark).await.unwrap();

        let send = reports[0].send.as_ref().unwrap();
        assert_eq!(send.session_count, 4);
        assert_eq!(send.transaction_count, 8);
        assert!(reports[0].reports.is_empty());
        let store = SessionStore::new(dir.path()).unwrap().scoped("nightly").unwrap();
        assert!(store.load("login", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkers_run_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let threads = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&threads);
        let case = TestCase::session("Thread: recorded", move |_: &Session| {
            seen.lock().push(std::thread::current().id());
            true
        })
        .unwrap();
        let strategy = Strategy::builder()
            .defaults(RequestDefaults::builder().url("http://localhost:8000").build())
            .build_request(|s| Request::json(json!({"user_id": s.identity.id})))
            .build();
        let suite = TestSuite::new("login", strategy)
            .unwrap()
            .with_identities([UserIdentity::new("u1"), UserIdentity::new("u2")])
            .with_cases(vec![case], vec![])
            .unwrap();
        let t = tester(dir.path(), vec![suite], Echo::default());

        let reports = t.run(RunMode::New).await.unwrap();

        assert_eq!(reports[0].get("Thread").unwrap().passed_count, 2);
        let runtime_thread = std::thread::current().id();
        let threads = threads.lock();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn duplicate_suites_fail_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let echo = Echo::default();
        let calls = Arc::clone(&echo.calls);
        let t = tester(dir.path(), vec![suite("login", 1, 1), suite("login", 1, 1)], echo);

        let err = t.run(RunMode::New).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
