//! Loader and worker tasks of the [`Dispatcher`](super::Dispatcher).

use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use futures::FutureExt;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    aggregate::SendStats,
    client::Client,
    error::Result,
    identity::{IdentityQueue, IdentitySource, UserIdentity},
    maintainer::SessionMaintainer,
    session::Session,
    store::SessionStore,
    transport::{Transport, TransportPool},
};

/// Shared state of the loader and every worker of one run.
pub(crate) struct ExecutionContext<T: Transport> {
    pub label: Arc<str>,
    pub queue: Arc<IdentityQueue>,
    /// Flips to `true` once the loader is done, successfully or not. A
    /// closed channel means the loader died.
    pub loaded: watch::Receiver<bool>,
    pub store: SessionStore,
    pub pool: Arc<TransportPool<T>>,
    pub maintainer: Arc<dyn SessionMaintainer>,
    pub skip_persistence: bool,
    pub poll_interval: Duration,
}

impl<T: Transport> Clone for ExecutionContext<T> {
    fn clone(&self) -> Self {
        Self {
            label: Arc::clone(&self.label),
            queue: Arc::clone(&self.queue),
            loaded: self.loaded.clone(),
            store: self.store.clone(),
            pool: Arc::clone(&self.pool),
            maintainer: Arc::clone(&self.maintainer),
            skip_persistence: self.skip_persistence,
            poll_interval: self.poll_interval,
        }
    }
}

/// Fills the queue from `source` unless it already holds work, then signals
/// completion. Returns how many identities it loaded.
pub(crate) async fn loader_task(
    queue: Arc<IdentityQueue>,
    source: Arc<dyn IdentitySource>,
    loaded: watch::Sender<bool>,
) -> Result<usize> {
    let result = if queue.is_empty() {
        tracing::debug!("Loading identities...");
        source.load().await.map(|identities| {
            let n = identities.len();
            queue.extend(identities);
            n
        })
    } else {
        tracing::debug!("Queue pre-populated with {} identities", queue.len());
        Ok(0)
    };
    // Workers poll this flag; it must flip even when loading failed.
    let _ = loaded.send(true);
    result
}

impl<T: Transport> ExecutionContext<T> {
    fn loader_finished(&self) -> bool {
        *self.loaded.borrow() || self.loaded.has_changed().is_err()
    }
}

/// Spawns `workers` Tokio tasks draining the identity queue. Each returns the
/// statistics of the sessions it ran.
pub(crate) fn spawn_workers<T: Transport>(
    ctx: ExecutionContext<T>,
    workers: usize,
) -> Vec<JoinHandle<SendStats>> {
    (0..workers)
        .map(|i| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tracing::debug!("Worker {i} started.");
                let mut stats = SendStats::new();
                loop {
                    match ctx.queue.try_pop() {
                        Some(identity) => {
                            let user = identity.id.clone();
                            let start = Instant::now();
                            match AssertUnwindSafe(run_session(&ctx, identity))
                                .catch_unwind()
                                .await
                            {
                                Ok(Ok((session, elapsed))) => stats.consume(&session, elapsed),
                                Ok(Err(e)) => tracing::error!("Worker {i} lost a session: {e}"),
                                Err(payload) => {
                                    tracing::error!(
                                        "Worker {i}: session of {user} panicked: {}",
                                        panic_message(payload.as_ref())
                                    );
                                    stats.consume_panicked(start.elapsed());
                                }
                            }
                        }
                        None => {
                            if ctx.loader_finished() && ctx.queue.is_empty() {
                                break;
                            }
                            tokio::time::sleep(ctx.poll_interval).await;
                        }
                    }
                }
                tracing::debug!(
                    "Worker {i} shutting down after {} sessions.",
                    stats.session_count
                );
                stats
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Allocates, persists, drives and re-persists one session. Returns it with
/// the time its request loop took.
async fn run_session<T: Transport>(
    ctx: &ExecutionContext<T>,
    identity: UserIdentity,
) -> Result<(Session, Duration)> {
    let store = ctx.store.clone();
    let label = Arc::clone(&ctx.label);
    let id = tokio::task::spawn_blocking(move || store.get_next_id(&label)).await??;

    let mut session = Session::new(&*ctx.label, id, identity);
    session.start_time = Some(Utc::now());
    if !ctx.skip_persistence {
        persist(&ctx.store, session.clone()).await?;
    }

    let start = Instant::now();
    let outcome = {
        let client = Client::new(&ctx.pool, ctx.maintainer.as_ref())?;
        client.run(&mut session).await
    };
    let elapsed = start.elapsed();
    tracing::debug!(
        "Session {}-{id} finished with {outcome:?} after {} transactions",
        ctx.label,
        session.transactions.len()
    );

    if !ctx.skip_persistence {
        persist(&ctx.store, session.clone()).await?;
    }
    Ok((session, elapsed))
}

async fn persist(store: &SessionStore, session: Session) -> Result<()> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.dump(&session)).await?
}
