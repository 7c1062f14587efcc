use std::{collections::BTreeMap, time::Duration};

use reqwest::Method;
use serde_json::Value;
use typed_builder::TypedBuilder;

/// Payload handed back by a maintainer's `build_request` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON; sent with `Content-Type: application/json`.
    /// For `GET` the top-level object becomes the query string.
    Json(Value),
    /// Sent verbatim.
    Raw(String),
    Empty,
}

/// A request as built by a maintainer. Anything left unset is filled from
/// the maintainer's [`RequestDefaults`] before sending.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct Request {
    pub body: RequestBody,
    #[builder(default, setter(strip_option, into))]
    pub url: Option<String>,
    #[builder(default, setter(strip_option))]
    pub method: Option<Method>,
    #[builder(default, setter(strip_option))]
    pub headers: Option<BTreeMap<String, String>>,
    /// Read timeout of one attempt
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    /// Extra attempts after the first
    #[builder(default, setter(strip_option))]
    pub retry: Option<u32>,
}

impl Request {
    pub fn json(body: Value) -> Self {
        Self::builder().body(RequestBody::Json(body)).build()
    }

    pub fn raw(body: impl Into<String>) -> Self {
        Self::builder().body(RequestBody::Raw(body.into())).build()
    }

    /// Fills unset fields and serializes the body.
    pub fn prepare(self, defaults: &RequestDefaults) -> PreparedRequest {
        let mut headers = self.headers.unwrap_or_else(|| defaults.headers.clone());
        let body = match self.body {
            RequestBody::Json(value) => {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
                Some(value.to_string())
            }
            RequestBody::Raw(text) => Some(text),
            RequestBody::Empty => None,
        };
        PreparedRequest {
            url: self.url.unwrap_or_else(|| defaults.url.clone()),
            method: self.method.unwrap_or_else(|| defaults.method.clone()),
            headers,
            body,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retry: self.retry.unwrap_or(defaults.retry),
            retry_backoff: defaults.retry_backoff,
        }
    }
}

impl From<Value> for Request {
    fn from(value: Value) -> Self {
        Self::json(value)
    }
}

impl From<String> for Request {
    fn from(value: String) -> Self {
        Self::raw(value)
    }
}

/// Where and how a maintainer's requests go unless a request says otherwise.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RequestDefaults {
    #[builder(setter(into))]
    pub url: String,
    #[builder(default = Method::POST)]
    pub method: Method,
    #[builder(default)]
    pub headers: BTreeMap<String, String>,
    #[builder(default = Duration::from_secs(5))]
    pub timeout: Duration,
    #[builder(default = 1)]
    pub retry: u32,
    /// Fixed sleep between attempts
    #[builder(default = Duration::from_millis(500))]
    pub retry_backoff: Duration,
}

/// A fully resolved request, ready for a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub retry: u32,
    pub retry_backoff: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> RequestDefaults {
        RequestDefaults::builder()
            .url("http://localhost:8000")
            .headers(BTreeMap::from([("X-Env".to_string(), "test".to_string())]))
            .build()
    }

    #[test]
    fn unset_fields_come_from_defaults() {
        let prepared = Request::json(json!({"round": 1})).prepare(&defaults());

        assert_eq!(prepared.url, "http://localhost:8000");
        assert_eq!(prepared.method, Method::POST);
        assert_eq!(prepared.timeout, Duration::from_secs(5));
        assert_eq!(prepared.retry, 1);
        assert_eq!(prepared.body.as_deref(), Some(r#"{"round":1}"#));
        assert_eq!(prepared.headers["X-Env"], "test");
        assert_eq!(prepared.headers["Content-Type"], "application/json");
    }

    #[test]
    fn request_fields_win() {
        let prepared = Request::builder()
            .body(RequestBody::Raw("ping".to_string()))
            .url("http://elsewhere")
            .method(Method::GET)
            .headers(BTreeMap::new())
            .timeout(Duration::from_secs(1))
            .retry(3)
            .build()
            .prepare(&defaults());

        assert_eq!(prepared.url, "http://elsewhere");
        assert_eq!(prepared.method, Method::GET);
        assert!(prepared.headers.is_empty());
        assert_eq!(prepared.body.as_deref(), Some("ping"));
        assert_eq!(prepared.timeout, Duration::from_secs(1));
        assert_eq!(prepared.retry, 3);
    }
}
