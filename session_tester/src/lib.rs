//! session_tester: session-oriented load and functional testing for HTTP services.
//!
//! Most load tools fire independent requests. session_tester drives
//! *sessions*: each simulated user sends a sequence of requests whose content
//! depends on what the service answered before. Every exchange is persisted,
//! and once sending is done declarative checkers run over the recorded data
//! to produce pass/fail reports.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`SessionMaintainer`]: the behaviour of one simulated user. It seeds the
//!   session state, builds each request from it, folds responses back in and
//!   decides when to stop. [`Strategy`] assembles one from closures.
//! - [`Client`]: drives one session through its maintainer, retrying failed
//!   requests and aborting the session when the service never answers 200.
//! - [`Dispatcher`]: a pool of workers draining an identity queue, one session
//!   per identity, persisting every session to the [`SessionStore`].
//! - [`SessionStore`]: one JSON file per session plus a lock-guarded id
//!   counter per label, safe across processes.
//! - [`TestCase`]: a named expectation and a checker over a transaction, a
//!   session, or all sessions at once. [`evaluate`] folds checker verdicts
//!   into [`Report`]s.
//! - [`Tester`]: ties suites, store and transports together and runs them in
//!   one of three [`RunMode`]s.
//! - [`Reporter`]: sends finished reports somewhere (stdout, a document, a
//!   database).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use session_tester::{
//!     CheckResult, Request, RequestDefaults, RunMode, Session, SessionStore, Strategy,
//!     TestCase, TestSuite, Tester, Transaction, TransportPool, UserIdentity,
//!     maintainer::stop_after_rounds, report::{Reporter, StdoutReporter},
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> session_tester::Result<()> {
//!     // Each user asks for five pages of their feed.
//!     let strategy = Strategy::builder()
//!         .defaults(RequestDefaults::builder().url("http://localhost:3000/feed").build())
//!         .init(|s| {
//!             s.extended_state.insert("page".into(), json!(0));
//!         })
//!         .build_request(|s| {
//!             Request::json(json!({"user_id": s.identity.id, "page": s.extended_state["page"]}))
//!         })
//!         .update(|s| {
//!             let page = s.extended_state["page"].as_u64().unwrap_or(0);
//!             s.extended_state.insert("page".into(), json!(page + 1));
//!         })
//!         .should_stop(stop_after_rounds(5))
//!         .build();
//!
//!     let suite = TestSuite::new("feed", strategy)?
//!         .with_identities((0..100).map(|i| UserIdentity::new(format!("user-{i}"))))
//!         .with_cases(
//!             vec![
//!                 TestCase::transaction("Payload: every page has items", |t: &Transaction| -> Result<CheckResult, String> {
//!                     let data = t.response_data().map_err(|e| e.to_string())?;
//!                     Ok(CheckResult::from(data["items"].is_array()))
//!                 })?,
//!                 TestCase::session("Length: five pages per user", |s: &Session| {
//!                     s.transactions.len() == 5
//!                 })?,
//!             ],
//!             vec![],
//!         )?;
//!
//!     let reports = Tester::builder()
//!         .name("nightly")
//!         .suites(vec![suite])
//!         .store(SessionStore::new("./test_sessions")?)
//!         .pool(Arc::new(TransportPool::http(Default::default())))
//!         .build()
//!         .run(RunMode::New)
//!         .await?;
//!
//!     StdoutReporter.report(&reports).await
//! }
//! ```
//!
//! # Feature flags
//!
//! - `macros`: the `#[checkers]` attribute, which turns the `chk*` functions
//!   of an `impl` block into test cases at build time. (Enabled by default)
//! - `builtins`: ready-made cases (same response across a session,
//!   distributions, latency) and `StdoutReporter`. (Enabled by default)
//!
//! # Where to start
//!
//! - Read the docs for [`SessionMaintainer`], [`TestCase`] and [`Tester`].
//! - See `examples/inventory.rs` for a runnable suite against a local server.

// Lets `#[checkers]` expansions name this crate from inside it.
extern crate self as session_tester;

/// Send statistics gathered while sessions run
pub mod aggregate;
/// Test cases and checker verdicts
pub mod case;
/// Built-in test cases
#[cfg(feature = "builtins")]
pub mod cases;
/// The per-session request loop
pub mod client;
/// Worker pool that turns identities into persisted sessions
pub mod dispatcher;
pub mod error;
/// Runs cases over sessions
pub mod evaluate;
pub mod identity;
pub mod maintainer;
/// Reports and Reporters
pub mod report;
pub mod request;
pub mod session;
/// Side-table helpers for reports
pub mod stats;
pub mod store;
pub mod suite;
/// Glues suites, store and transports together
pub mod tester;
pub mod transport;

pub use aggregate::SendStats;
pub use case::{CaseKind, CheckResult, Checker, TestCase};
pub use client::{Client, SessionOutcome};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Error, Result};
pub use evaluate::evaluate;
pub use identity::{IdentityQueue, IdentitySource, UserIdentity};
pub use maintainer::{SessionMaintainer, Strategy};
pub use report::{Report, Reporter, SendReport, SuiteReport, Verdict};
pub use request::{Request, RequestDefaults};
pub use session::{Session, Transaction};
pub use store::SessionStore;
pub use suite::TestSuite;
pub use tester::{RunMode, Tester};
pub use transport::{HttpTransport, Transport, TransportConfig, TransportPool};

#[cfg(feature = "macros")]
/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use session_tester_macros::*;
}
