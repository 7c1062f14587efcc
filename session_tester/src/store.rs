//! Durable session storage and the per-label session id allocator.
//!
//! Layout under the store root:
//!
//! ```text
//! {label}                   decimal counter, the highest id handed out
//! {label}.lock              lock token guarding the counter
//! {label}-{id:08}.json      one persisted session
//! ```
//!
//! The counter is only ever read or written while holding an exclusive
//! advisory lock on the lock token, so allocation is safe across threads and
//! across processes sharing the same root.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;

use crate::{
    error::{Error, Result},
    session::{Session, session_file_name},
};

const LOCK_POLL: Duration = Duration::from_millis(10);

/// File-backed session store rooted at one directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl SessionStore {
    /// Opens (and creates if needed) a store at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock_timeout: Duration::from_secs(30),
        })
    }

    /// A store in the sub-directory `name`, sharing this store's settings.
    pub fn scoped(&self, name: &str) -> Result<Self> {
        let root = self.root.join(name);
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock_timeout: self.lock_timeout,
        })
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates the next session id for `label`, starting at 1.
    pub fn get_next_id(&self, label: &str) -> Result<u64> {
        let _guard = self.lock(label)?;
        let next = self.read_counter(label) + 1;
        write_atomic(&self.counter_path(label), next.to_string().as_bytes())?;
        Ok(next)
    }

    /// The highest id allocated so far for `label`, without allocating.
    pub fn get_curr_id(&self, label: &str) -> Result<u64> {
        let _guard = self.lock(label)?;
        Ok(self.read_counter(label))
    }

    pub fn session_path(&self, label: &str, session_id: u64) -> PathBuf {
        self.root.join(session_file_name(label, session_id))
    }

    /// Persists `session`, replacing any previous dump of it.
    pub fn dump(&self, session: &Session) -> Result<()> {
        let body = serde_json::to_vec_pretty(session)?;
        write_atomic(&self.session_path(&session.label, session.session_id), &body)
    }

    /// Reads one persisted session.
    ///
    /// A session without transactions never got past creation and is
    /// reported as malformed.
    pub fn load_session(&self, path: &Path) -> Result<Session> {
        let body = fs::read(path)?;
        let session: Session = serde_json::from_slice(&body).map_err(|e| Error::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if session.transactions.is_empty() {
            return Err(Error::Corrupt {
                path: path.to_path_buf(),
                reason: "no transactions recorded".to_string(),
            });
        }
        Ok(session)
    }

    /// Loads up to `limit` sessions of `label`, newest first.
    ///
    /// Missing or unreadable files are skipped with a warning.
    pub fn load(&self, label: &str, limit: Option<usize>) -> Result<Vec<Session>> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut sessions = Vec::new();
        let mut id = self.get_curr_id(label)?;
        while id > 0 && sessions.len() < limit {
            let path = self.session_path(label, id);
            match self.load_session(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping session {}: {e}", path.display()),
            }
            id -= 1;
        }
        tracing::debug!("Loaded {} sessions of {label}", sessions.len());
        Ok(sessions)
    }

    /// Removes every persisted session of `label` along with its counter and
    /// any half-written files. The lock token is kept.
    pub fn clear(&self, label: &str) -> Result<()> {
        let _guard = self.lock(label)?;
        let mut doomed = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                let stem = name.strip_suffix(".tmp").unwrap_or(name);
                if stem == label || is_session_file_of(stem, label) {
                    doomed.push(entry.path());
                }
            }
        }

        for path in doomed {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::error!("Failed to remove {}: {e}", path.display()),
            }
        }
        tracing::info!("Cleared sessions of {label}");
        Ok(())
    }

    fn counter_path(&self, label: &str) -> PathBuf {
        self.root.join(label)
    }

    fn lock_path(&self, label: &str) -> PathBuf {
        self.root.join(format!("{label}.lock"))
    }

    /// Absent or unparsable counters read as zero.
    fn read_counter(&self, label: &str) -> u64 {
        fs::read_to_string(self.counter_path(label))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn lock(&self, label: &str) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(label))?;

        let start = Instant::now();
        loop {
            if matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
                return Ok(LockGuard { file });
            }
            if start.elapsed() >= self.lock_timeout {
                return Err(Error::LockTimeout {
                    label: label.to_string(),
                });
            }
            std::thread::sleep(LOCK_POLL);
        }
    }
}

/// Exclusive lock on a label's token. Unlocks on drop.
#[derive(Debug)]
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Matches `{label}-{8 digits}.json` and nothing else, so `a` never claims
/// the sessions of `a-b`.
fn is_session_file_of(name: &str, label: &str) -> bool {
    name.strip_prefix(label)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|id| id.len() >= 8 && id.bytes().all(|b| b.is_ascii_digit()))
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
