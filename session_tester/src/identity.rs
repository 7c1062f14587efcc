//! Simulated user identities and the queue workers drain them from.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Who a simulated session acts as.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Produces the identities of one run.
///
/// Parsing identities out of files or databases lives outside this crate;
/// anything that can hand over a finite list can drive a suite.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn load(&self) -> Result<Vec<UserIdentity>>;
}

#[async_trait]
impl IdentitySource for Vec<UserIdentity> {
    async fn load(&self) -> Result<Vec<UserIdentity>> {
        Ok(self.clone())
    }
}

/// Source backed by a generator closure, e.g. a fixed synthetic population.
pub struct FnSource<F>(pub F);

#[async_trait]
impl<F> IdentitySource for FnSource<F>
where
    F: Fn() -> Vec<UserIdentity> + Send + Sync,
{
    async fn load(&self) -> Result<Vec<UserIdentity>> {
        Ok((self.0)())
    }
}

/// Work queue shared by the dispatcher's loader and workers.
#[derive(Debug, Default)]
pub struct IdentityQueue {
    inner: Mutex<VecDeque<UserIdentity>>,
}

impl IdentityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, identity: UserIdentity) {
        self.inner.lock().push_back(identity);
    }

    pub fn extend(&self, identities: impl IntoIterator<Item = UserIdentity>) {
        self.inner.lock().extend(identities);
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<UserIdentity> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl FromIterator<UserIdentity> for IdentityQueue {
    fn from_iter<I: IntoIterator<Item = UserIdentity>>(iter: I) -> Self {
        Self {
            inner: Mutex::new(iter.into_iter().collect()),
        }
    }
}
