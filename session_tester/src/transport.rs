//! Reusable HTTP transports and the pool workers check them out from.
//!
//! Building an HTTP client is expensive (connection pools, TLS state), so
//! workers never build one per session. A [`TransportPool`] hands out idle
//! transports and only builds a new one when none is available; a
//! [`Pooled`] handle returns its transport to the pool when dropped. A handle
//! is owned by exactly one driver at a time.

use std::{
    fmt,
    ops::Deref,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Method};
use typed_builder::TypedBuilder;

use crate::{error::Result, request::PreparedRequest};

/// What came back from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// No response was obtained at all.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportError {}

/// Sends one prepared request. Implementations may retry internally.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<RawResponse, TransportError>;
}

/// Transport-level retries for statuses that are safe to repeat.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    #[builder(default = 3)]
    pub total: u32,
    #[builder(default = vec![429, 500, 502, 503, 504])]
    pub statuses: Vec<u16>,
    /// Sleep before retry `n` is `backoff_factor * 2^(n-1)`; the first retry is immediate.
    #[builder(default = Duration::from_secs(1))]
    pub backoff_factor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::builder().total(0).build()
    }

    fn backoff(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        self.backoff_factor
            .saturating_mul(2u32.saturating_pow(retry - 1))
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct TransportConfig {
    #[builder(default = Duration::from_secs(1))]
    pub connect_timeout: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub read_timeout: Duration,
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// [`Transport`] over a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;
        Ok(Self {
            client,
            retry: config.retry.clone(),
        })
    }

    async fn send_once(&self, request: &PreparedRequest) -> reqwest::Result<RawResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = if request.method == Method::GET {
                builder.query(&query_pairs(body))
            } else {
                builder.body(body.clone())
            };
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<RawResponse, TransportError> {
        let mut retry = 0;
        loop {
            let outcome = self.send_once(request).await;
            let retryable = match &outcome {
                Ok(r) => self.retry.statuses.contains(&r.status),
                Err(e) => e.is_connect() || e.is_timeout(),
            };
            if !retryable || retry >= self.retry.total {
                return outcome.map_err(|e| TransportError(e.to_string()));
            }
            retry += 1;
            tracing::debug!("Transport retry {retry} for {}", request.url);
            tokio::time::sleep(self.retry.backoff(retry)).await;
        }
    }
}

/// A JSON object body becomes `key=value` pairs; anything else is sent as
/// a single `data` parameter.
fn query_pairs(body: &str) -> Vec<(String, String)> {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        _ => vec![("data".to_string(), body.to_string())],
    }
}

type Factory<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// Pool of idle transports guarded by one lock.
pub struct TransportPool<T> {
    idle: Mutex<Vec<T>>,
    factory: Factory<T>,
    created: AtomicUsize,
}

impl<T: Transport> TransportPool<T> {
    pub fn new(factory: impl Fn() -> Result<T> + Send + Sync + 'static) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            created: AtomicUsize::new(0),
        }
    }

    /// Takes an idle transport, or builds one when the pool is empty.
    pub fn acquire(&self) -> Result<Pooled<'_, T>> {
        let idle = self.idle.lock().pop();
        let transport = match idle {
            Some(t) => t,
            None => {
                let t = (self.factory)()?;
                let n = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!("Built transport #{n}");
                t
            }
        };
        Ok(Pooled {
            pool: self,
            transport: Some(transport),
        })
    }

    pub fn release(&self, transport: T) {
        self.idle.lock().push(transport);
    }

    /// Number of transports built over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl TransportPool<HttpTransport> {
    pub fn http(config: TransportConfig) -> Self {
        Self::new(move || HttpTransport::new(&config))
    }
}

impl<T> fmt::Debug for TransportPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportPool")
            .field("idle", &self.idle.lock().len())
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish()
    }
}

/// A checked-out transport; goes back to its pool on drop.
pub struct Pooled<'a, T: Transport> {
    pool: &'a TransportPool<T>,
    transport: Option<T>,
}

impl<T: Transport> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only taken in drop
        self.transport.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Transport> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(t) = self.transport.take() {
            self.pool.release(t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn send(
            &self,
            request: &PreparedRequest,
        ) -> std::result::Result<RawResponse, TransportError> {
            Ok(RawResponse {
                status: 200,
                body: request.body.clone().unwrap_or_default(),
            })
        }
    }

    #[test]
    fn released_transports_are_reused() {
        let pool = TransportPool::new(|| Ok(Echo));
        {
            let _a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
            assert_eq!(pool.created(), 2);
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 2);

        let _c = pool.acquire().unwrap();
        assert_eq!(pool.created(), 2);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn backoff_doubles_after_first_retry() {
        let policy = RetryPolicy::builder()
            .backoff_factor(Duration::from_millis(100))
            .build();
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn get_bodies_become_query_pairs() {
        let pairs = query_pairs(r#"{"user":"u1","round":2}"#);
        assert!(pairs.contains(&("user".to_string(), "u1".to_string())));
        assert!(pairs.contains(&("round".to_string(), "2".to_string())));
        assert_eq!(query_pairs("raw"), vec![("data".to_string(), "raw".to_string())]);
    }

    #[test]
    fn default_policy_retries_idempotent_statuses() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.total, 3);
        assert_eq!(policy.statuses, vec![429, 500, 502, 503, 504]);
    }
}
