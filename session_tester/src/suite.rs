use std::{fmt, sync::Arc};

use crate::{
    case::{TestCase, ensure_unique, merge_cases},
    error::{Error, Result},
    identity::{IdentityQueue, IdentitySource, UserIdentity},
    maintainer::SessionMaintainer,
};

/// A maintainer, the identities it runs for and the cases its sessions must
/// satisfy. The suite name doubles as the store label of its sessions.
pub struct TestSuite {
    pub name: String,
    pub maintainer: Arc<dyn SessionMaintainer>,
    pub source: Arc<dyn IdentitySource>,
    /// Identities queued up front; when non-empty the source is not consulted
    pub queue: Arc<IdentityQueue>,
    /// Shared with the blocking task that evaluates them
    pub cases: Arc<Vec<TestCase>>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>, maintainer: impl SessionMaintainer + 'static) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::config("test suite name must not be empty"));
        }
        Ok(Self {
            name,
            maintainer: Arc::new(maintainer),
            source: Arc::new(Vec::<UserIdentity>::new()),
            queue: Arc::new(IdentityQueue::new()),
            cases: Arc::new(Vec::new()),
        })
    }

    pub fn with_source(mut self, source: impl IdentitySource + 'static) -> Self {
        self.source = Arc::new(source);
        self
    }

    /// Queues identities directly, bypassing the source.
    pub fn with_identities(self, identities: impl IntoIterator<Item = UserIdentity>) -> Self {
        self.queue.extend(identities);
        self
    }

    /// Adds explicitly built cases followed by discovered ones, e.g. the
    /// output of a `#[checkers]` block.
    pub fn with_cases(mut self, explicit: Vec<TestCase>, discovered: Vec<TestCase>) -> Result<Self> {
        let added = merge_cases(explicit, discovered)?;
        Arc::get_mut(&mut self.cases)
            .ok_or_else(|| {
                Error::config(format!("cases of suite {} are in use and cannot change", self.name))
            })?
            .extend(added);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_unique(
            self.cases.iter().map(|c| c.name.as_str()),
            &format!("test case in suite {}", self.name),
        )
    }
}

impl fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("name", &self.name)
            .field("queued", &self.queue.len())
            .field("cases", &self.cases)
            .finish_non_exhaustive()
    }
}
