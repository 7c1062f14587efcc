use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use reqwest::Method;
use serde_json::{Value, json};
use session_tester::{
    CheckResult, Request, RequestDefaults, RunMode, Session, SessionStore, Strategy, TestCase,
    TestSuite, Tester, Transaction, TransportConfig, TransportPool, UserIdentity, Verdict,
    maintainer::stop_after_rounds, transport::RetryPolicy,
};

/// Attempts seen per user.
type Attempts = Arc<Mutex<HashMap<String, usize>>>;

/// `bad*` users always get a 500, `flaky*` users get two 502s first,
/// everyone else an echo of their request.
async fn api(State(attempts): State<Attempts>, Json(req): Json<Value>) -> (StatusCode, Json<Value>) {
    let user = req["user_id"].as_str().unwrap_or_default().to_string();
    let attempt = {
        let mut attempts = attempts.lock().unwrap();
        let n = attempts.entry(user.clone()).or_default();
        *n += 1;
        *n
    };
    if user.starts_with("bad") {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"})));
    }
    if user.starts_with("flaky") && attempt <= 2 {
        return (StatusCode::BAD_GATEWAY, Json(json!({"error": "try again"})));
    }
    (StatusCode::OK, Json(json!({"data": {"user_id": user, "round": req["round"]}})))
}

async fn lookup(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({"data": params}))
}

async fn serve() -> String {
    let app = Router::new()
        .route("/api", post(api))
        .route("/lookup", get(lookup))
        .with_state(Attempts::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}

fn rounds_strategy(base: &str, rounds: usize, retry: u32) -> Strategy {
    Strategy::builder()
        .defaults(
            RequestDefaults::builder()
                .url(format!("{base}/api"))
                .retry(retry)
                .retry_backoff(Duration::from_millis(10))
                .build(),
        )
        .init(|s| {
            s.extended_state.insert("round".into(), json!(0));
        })
        .build_request(|s| {
            Request::json(json!({"user_id": s.identity.id, "round": s.extended_state["round"]}))
        })
        .update(|s| {
            let round = s.extended_state["round"].as_u64().unwrap_or(0);
            s.extended_state.insert("round".into(), json!(round + 1));
        })
        .should_stop(stop_after_rounds(rounds))
        .build()
}

fn tester(root: &std::path::Path, suites: Vec<TestSuite>) -> Tester<session_tester::HttpTransport> {
    let config = TransportConfig::builder().retry(RetryPolicy::none()).build();
    Tester::builder()
        .name("e2e")
        .suites(suites)
        .store(SessionStore::new(root).unwrap())
        .pool(Arc::new(TransportPool::http(config)))
        .concurrency(4)
        .poll_interval(Duration::from_millis(5))
        .build()
}

fn rounds_in_order() -> TestCase {
    TestCase::session("Order: rounds are echoed in order", |s: &Session| {
        let rounds: Vec<u64> = s
            .transactions
            .iter()
            .filter_map(|t| t.response_data().ok()?["round"].as_u64())
            .collect();
        CheckResult::from(rounds == (0..s.transactions.len() as u64).collect::<Vec<_>>())
    })
    .unwrap()
}

#[tokio::test]
async fn five_rounds_are_persisted_and_checked() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let suite = TestSuite::new("rounds", rounds_strategy(&base, 5, 1))
        .unwrap()
        .with_identities([UserIdentity::new("u1")])
        .with_cases(vec![rounds_in_order()], vec![])
        .unwrap();

    let reports = tester(dir.path(), vec![suite]).run(RunMode::New).await.unwrap();

    let store = SessionStore::new(dir.path()).unwrap().scoped("e2e").unwrap();
    let sessions = store.load("rounds", Some(1)).unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.identity.id, "u1");
    assert_eq!(session.transactions.len(), 5);
    assert!(session.finished_without_error());
    assert!(session.transactions.iter().all(|t| t.request_time.is_some() && t.cost_time > 0.0));
    assert_eq!(session.extended_state["round"], 5);

    let report = reports[0].get("Order").unwrap();
    assert_eq!(report.result, Verdict::Passed);
    assert_eq!(report.passed_count, 1);
}

#[tokio::test]
async fn failing_users_are_excluded_from_checks() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let users = ["good-1", "good-2", "bad-1"].map(UserIdentity::new);
    let suite = TestSuite::new("mixed", rounds_strategy(&base, 3, 0))
        .unwrap()
        .with_source(users.to_vec())
        .with_cases(
            vec![
                TestCase::transaction("Status: every answer is 200", |t: &Transaction| {
                    t.status_code == Some(200)
                })
                .unwrap(),
                rounds_in_order(),
            ],
            vec![],
        )
        .unwrap();

    let reports = tester(dir.path(), vec![suite]).run(RunMode::New).await.unwrap();

    let send = reports[0].send.as_ref().unwrap();
    assert_eq!(send.session_count, 3);
    assert_eq!(send.aborted_count, 1);

    let status = reports[0].get("Status").unwrap();
    assert_eq!(status.result, Verdict::Passed);
    assert_eq!(status.passed_count, 6);
    assert_eq!(status.network_error_count, 1);
    assert_eq!(status.total_count, 7);

    let order = reports[0].get("Order").unwrap();
    assert_eq!((order.total_count, order.network_error_count, order.passed_count), (3, 1, 2));
}

#[tokio::test]
async fn driver_retries_are_recorded() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let suite = TestSuite::new("retry", rounds_strategy(&base, 1, 2))
        .unwrap()
        .with_identities([UserIdentity::new("flaky-1")]);

    tester(dir.path(), vec![suite]).run(RunMode::New).await.unwrap();

    let store = SessionStore::new(dir.path()).unwrap().scoped("e2e").unwrap();
    let sessions = store.load("retry", None).unwrap();
    let t = &sessions[0].transactions[0];
    assert_eq!(t.retry_count, 2);
    assert_eq!(t.status_code, Some(200));
}

#[tokio::test]
async fn get_requests_send_query_parameters() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let url = format!("{base}/lookup");
    let strategy = Strategy::builder()
        .defaults(RequestDefaults::builder().url(format!("{base}/api")).build())
        .build_request(move |s| {
            Request::builder()
                .body(session_tester::request::RequestBody::Json(
                    json!({"user_id": s.identity.id, "page": 2}),
                ))
                .url(url.clone())
                .method(Method::GET)
                .build()
        })
        .build();
    let suite = TestSuite::new("lookup", strategy)
        .unwrap()
        .with_identities([UserIdentity::new("u7")])
        .with_cases(
            vec![
                TestCase::transaction("Query: parameters arrive", |t: &Transaction| -> Option<CheckResult> {
                    let data = t.response_data().ok()?;
                    Some(CheckResult::from(data == json!({"user_id": "u7", "page": "2"})))
                })
                .unwrap(),
            ],
            vec![],
        )
        .unwrap();

    let reports = tester(dir.path(), vec![suite]).run(RunMode::New).await.unwrap();

    assert_eq!(reports[0].get("Query").unwrap().result, Verdict::Passed);
}
