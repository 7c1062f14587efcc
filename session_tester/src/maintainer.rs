//! Session maintainers: the pluggable behaviour behind every simulated user.
//!
//! A maintainer decides what a session sends and when it is done. The driver
//! calls its hooks in a fixed order:
//!
//! ```text
//! init -> (build_request -> send -> update -> should_stop)* -> done
//! ```
//!
//! Only [`SessionMaintainer::defaults`] and [`SessionMaintainer::build_request`]
//! are required. `init` and `update` default to doing nothing and
//! `should_stop` defaults to stopping after the first successful exchange.
//!
//! For small suites, [`Strategy`] assembles a maintainer out of closures:
//!
//! ```rust
//! use session_tester::{Request, RequestDefaults, Strategy, maintainer::stop_after_rounds};
//! use serde_json::json;
//!
//! let strategy = Strategy::builder()
//!     .defaults(RequestDefaults::builder().url("http://localhost:8000").build())
//!     .init(|s| {
//!         s.extended_state.insert("round".into(), json!(0));
//!     })
//!     .build_request(|s| Request::json(json!({"user_id": s.identity.id})))
//!     .should_stop(stop_after_rounds(5))
//!     .build();
//! # let _ = strategy;
//! ```

use typed_builder::TypedBuilder;

use crate::{
    request::{Request, RequestDefaults},
    session::Session,
};

pub trait SessionMaintainer: Send + Sync {
    /// Where requests go unless they say otherwise.
    fn defaults(&self) -> &RequestDefaults;

    /// Seeds `extended_state` before the first request.
    fn init(&self, _session: &mut Session) {}

    /// Builds the next request from the current session state.
    fn build_request(&self, session: &Session) -> Request;

    /// Folds the last (successful) transaction into `extended_state`.
    fn update(&self, _session: &mut Session) {}

    fn should_stop(&self, _session: &Session) -> bool {
        true
    }
}

type InitFn = Box<dyn Fn(&mut Session) + Send + Sync>;
type BuildFn = Box<dyn Fn(&Session) -> Request + Send + Sync>;
type StopFn = Box<dyn Fn(&Session) -> bool + Send + Sync>;

/// A maintainer assembled from closures.
#[derive(TypedBuilder)]
pub struct Strategy {
    defaults: RequestDefaults,
    #[builder(default = Box::new(|_: &mut Session| {}), setter(transform = |f: impl Fn(&mut Session) + Send + Sync + 'static| Box::new(f) as InitFn))]
    init: InitFn,
    #[builder(setter(transform = |f: impl Fn(&Session) -> Request + Send + Sync + 'static| Box::new(f) as BuildFn))]
    build_request: BuildFn,
    #[builder(default = Box::new(|_: &mut Session| {}), setter(transform = |f: impl Fn(&mut Session) + Send + Sync + 'static| Box::new(f) as InitFn))]
    update: InitFn,
    #[builder(default = Box::new(stop_after_rounds(1)), setter(transform = |f: impl Fn(&Session) -> bool + Send + Sync + 'static| Box::new(f) as StopFn))]
    should_stop: StopFn,
}

impl SessionMaintainer for Strategy {
    fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    fn init(&self, session: &mut Session) {
        (self.init)(session)
    }

    fn build_request(&self, session: &Session) -> Request {
        (self.build_request)(session)
    }

    fn update(&self, session: &mut Session) {
        (self.update)(session)
    }

    fn should_stop(&self, session: &Session) -> bool {
        (self.should_stop)(session)
    }
}

/// Stop once the session holds `n` transactions.
pub fn stop_after_rounds(n: usize) -> impl Fn(&Session) -> bool + Send + Sync + Clone + 'static {
    move |s: &Session| s.transactions.len() >= n
}

/// Stop when either predicate says so.
pub fn stop_when_any<A, B>(a: A, b: B) -> impl Fn(&Session) -> bool + Send + Sync + 'static
where
    A: Fn(&Session) -> bool + Send + Sync + 'static,
    B: Fn(&Session) -> bool + Send + Sync + 'static,
{
    move |s: &Session| a(s) || b(s)
}
