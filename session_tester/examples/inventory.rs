//! A small inventory service and a suite that exercises it.
//!
//! Each simulated user adds its item three times and then reads the stock
//! back. The checks verify that every answer is well-formed, that stock
//! grows by one per add, and report how requests spread over actions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{Json, Router, extract::State, routing::post};
use serde_json::{Value, json};
use session_tester::{
    CheckResult, Request, RequestDefaults, RunMode, Session, SessionMaintainer, SessionStore,
    TestSuite, Tester, Transaction, TransportConfig, TransportPool, UserIdentity, cases,
    macros::checkers,
    report::{Reporter, StdoutReporter},
};

type Stock = Arc<Mutex<HashMap<String, i64>>>;

async fn inventory(State(stock): State<Stock>, Json(req): Json<Value>) -> Json<Value> {
    let sku = req["sku"].as_str().unwrap_or_default().to_string();
    let mut stock = stock.lock().unwrap();
    let count = stock.entry(sku).or_default();
    if req["action"] == "add" {
        *count += 1;
    }
    Json(json!({"data": {"count": *count}}))
}

const ADDS: usize = 3;

struct InventoryUser {
    defaults: RequestDefaults,
}

impl SessionMaintainer for InventoryUser {
    fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    fn init(&self, session: &mut Session) {
        session.extended_state.insert("count".into(), json!(0));
    }

    fn build_request(&self, session: &Session) -> Request {
        let action = if session.transactions.len() < ADDS {
            "add"
        } else {
            "count"
        };
        Request::json(json!({
            "action": action,
            "sku": format!("sku-{}", session.identity.id),
        }))
    }

    fn update(&self, session: &mut Session) {
        let count = session
            .last_transaction()
            .and_then(|t| t.response_data().ok())
            .map(|data| data["count"].clone())
            .unwrap_or(Value::Null);
        session.extended_state.insert("count".into(), count);
    }

    fn should_stop(&self, session: &Session) -> bool {
        session.transactions.len() > ADDS
    }
}

struct InventoryChecks;

#[checkers]
impl InventoryChecks {
    /// Answer: every response carries a numeric count
    fn chk_answer(t: &Transaction) -> serde_json::Result<CheckResult> {
        let data = t.response_data()?;
        Ok(CheckResult::from(data["count"].is_i64()))
    }

    /// Stock:
    ///     each add raises the stock by one,
    ///     the final read sees every add
    fn chk_stock(s: &Session) -> CheckResult {
        let counts: Vec<i64> = s
            .transactions
            .iter()
            .filter_map(|t| t.response_data().ok()?["count"].as_i64())
            .collect();
        let expected: Vec<i64> = (1..=ADDS as i64).chain([ADDS as i64]).collect();
        if counts == expected {
            CheckResult::pass()
        } else {
            CheckResult::fail(format!("stock went {counts:?}, expected {expected:?}"))
        }
    }

    /// Users: every user finished a session
    fn chk_users(ss: &[Session]) -> CheckResult {
        CheckResult::from(ss.len() == 20)
    }
}

fn action(t: &Transaction) -> Option<String> {
    t.request_json().ok()?["action"].as_str().map(str::to_string)
}

#[tokio::main]
async fn main() -> session_tester::Result<()> {
    tracing_subscriber::fmt().init();

    let app = Router::new()
        .route("/inventory", post(inventory))
        .with_state(Stock::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });

    let user = InventoryUser {
        defaults: RequestDefaults::builder()
            .url(format!("http://{addr}/inventory"))
            .build(),
    };
    let suite = TestSuite::new("inventory", user)?
        .with_identities((0..20).map(|i| UserIdentity::new(format!("user-{i:02}"))))
        .with_cases(
            vec![
                cases::distribution("Actions: three adds per read", action, |_| true)?,
                cases::latency("Latency: for the record")?,
            ],
            InventoryChecks::test_cases()?,
        )?;

    let dir = std::env::temp_dir().join("session_tester_inventory");
    let reports = Tester::builder()
        .name("demo")
        .suites(vec![suite])
        .store(SessionStore::new(dir)?)
        .pool(Arc::new(TransportPool::http(TransportConfig::default())))
        .concurrency(8)
        .build()
        .run(RunMode::New)
        .await?;

    StdoutReporter.report(&reports).await
}
