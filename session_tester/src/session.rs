//! The recorded unit of work: sessions and the transactions they contain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::UserIdentity;

/// One request/response exchange.
///
/// `cost_time` is only meaningful when `status_code` is set; a transaction
/// without a status never got a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub url: String,
    pub method: String,
    pub status_code: Option<u16>,
    /// Serialized request payload
    pub request: Option<String>,
    /// Response body as text
    pub response: Option<String>,
    pub request_time: Option<DateTime<Utc>>,
    /// Seconds
    #[serde(default)]
    pub cost_time: f64,
    #[serde(default)]
    pub retry_count: u32,
}

impl Transaction {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            status_code: None,
            request: None,
            response: None,
            request_time: None,
            cost_time: 0.0,
            retry_count: 0,
        }
    }

    pub fn finished_without_error(&self) -> bool {
        self.status_code == Some(200)
    }

    /// The request payload parsed as JSON.
    pub fn request_json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(self.request.as_deref().unwrap_or("null"))
    }

    /// The response body parsed as JSON.
    pub fn response_json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(self.response.as_deref().unwrap_or("null"))
    }

    /// The `data` member of a JSON response, `Null` when absent.
    pub fn response_data(&self) -> serde_json::Result<Value> {
        let mut body = self.response_json()?;
        Ok(body
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

/// One simulated user's run under a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub label: String,
    pub session_id: u64,
    pub identity: UserIdentity,
    pub transactions: Vec<Transaction>,
    /// State carried between driver iterations, owned by the maintainer.
    #[serde(default)]
    pub extended_state: Map<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(label: impl Into<String>, session_id: u64, identity: UserIdentity) -> Self {
        Self {
            label: label.into(),
            session_id,
            identity,
            transactions: Vec::new(),
            extended_state: Map::new(),
            start_time: None,
        }
    }

    /// `true` when every transaction got a 200.
    pub fn finished_without_error(&self) -> bool {
        self.transactions.iter().all(Transaction::finished_without_error)
    }

    pub fn append_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    pub fn file_name(&self) -> String {
        session_file_name(&self.label, self.session_id)
    }
}

pub(crate) fn session_file_name(label: &str, session_id: u64) -> String {
    format!("{label}-{session_id:08}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(body: &str) -> Transaction {
        Transaction {
            status_code: Some(200),
            response: Some(body.to_string()),
            ..Transaction::new("http://localhost", "POST")
        }
    }

    #[test]
    fn file_name_is_zero_padded() {
        let session = Session::new("suite", 42, UserIdentity::new("u1"));
        assert_eq!(session.file_name(), "suite-00000042.json");
    }

    #[test]
    fn finished_without_error_requires_every_200() {
        let mut session = Session::new("suite", 1, UserIdentity::new("u1"));
        session.append_transaction(ok("{}"));
        assert!(session.finished_without_error());

        session.append_transaction(Transaction {
            status_code: Some(503),
            ..Transaction::new("http://localhost", "POST")
        });
        assert!(!session.finished_without_error());

        let mut unanswered = Session::new("suite", 2, UserIdentity::new("u2"));
        unanswered.append_transaction(Transaction::new("http://localhost", "POST"));
        assert!(!unanswered.finished_without_error());
    }

    #[test]
    fn response_helpers() {
        let tx = ok(r#"{"data":{"items":[1,2]},"code":0}"#);
        assert_eq!(tx.response_json().unwrap()["code"], 0);
        assert_eq!(tx.response_data().unwrap(), json!({"items": [1, 2]}));
        assert_eq!(ok(r#"{"code":0}"#).response_data().unwrap(), Value::Null);
        assert!(ok("not json").response_json().is_err());
    }
}
