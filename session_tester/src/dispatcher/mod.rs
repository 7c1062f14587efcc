//! Dispatcher: a bounded pool of workers turning identities into sessions.
//!
//! The dispatcher separates **producing work** (the loader task) from
//! **executing it** (worker tasks).
//!
//! # High-level flow
//! 1. A loader task fills the shared identity queue from an
//!    [`IdentitySource`], unless the queue was pre-populated, and then flips a
//!    `watch` flag to signal that no more work will arrive.
//! 2. `min(concurrency, queue length)` workers are spawned (`concurrency` when
//!    the queue starts empty). Each worker repeatedly:
//!    - pops an identity without blocking,
//!    - allocates a session id from the [`SessionStore`], persists the fresh
//!      session, drives it with a [`Client`](crate::Client), persists it again,
//!    - folds the finished session into its own [`SendStats`].
//!
//!    A session whose maintainer panics is caught, logged and counted as
//!    aborted; the worker moves on to the next identity.
//! 3. On an empty queue a worker sleeps for `poll_interval` and tries again,
//!    unless the loader has finished, in which case it exits.
//! 4. All tasks are joined, their statistics merged and the final
//!    [`SendReport`] is built. Workers are joined even when the loader fails.
//!
//! # Failure semantics
//! - An aborted session is still persisted and counted; the check phase skips
//!   it through `Session::finished_without_error`.
//! - A store failure loses that one session and is logged.
//! - A panicking session is counted as aborted. Its file keeps the state
//!   from before it was driven, which loading skips.
//! - A failing identity source is returned as the run's error once every
//!   worker has drained what was already queued.
//!
//! # Tuning knobs
//! - `concurrency`: number of worker tasks. Each worker holds one transport
//!   from the pool while it drives a session.
//! - `poll_interval`: how long an idle worker waits before looking at the
//!   queue again.
//! - `skip_persistence`: pure load testing; sessions are driven and counted
//!   but never written.
mod worker;

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{sync::watch, time::Instant};
use typed_builder::TypedBuilder;

use crate::{
    aggregate::SendStats,
    error::Result,
    identity::{IdentityQueue, IdentitySource},
    maintainer::SessionMaintainer,
    report::SendReport,
    store::SessionStore,
    transport::{Transport, TransportPool},
};
use worker::*;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DispatcherConfig {
    /// Store partition and id allocator key.
    #[builder(setter(into))]
    pub label: String,
    #[builder(default = num_cpus::get() * 8)]
    pub concurrency: usize,
    #[builder(default)]
    pub skip_persistence: bool,
    #[builder(default = Duration::from_millis(100))]
    pub poll_interval: Duration,
}

pub struct Dispatcher<T: Transport> {
    config: DispatcherConfig,
    store: SessionStore,
    pool: Arc<TransportPool<T>>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(config: DispatcherConfig, store: SessionStore, pool: Arc<TransportPool<T>>) -> Self {
        Self {
            config,
            store,
            pool,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Drives one session per identity and reports aggregate send statistics.
    pub async fn run(
        &self,
        queue: Arc<IdentityQueue>,
        source: Arc<dyn IdentitySource>,
        maintainer: Arc<dyn SessionMaintainer>,
    ) -> Result<SendReport> {
        let label = self.config.label.as_str();
        let (loaded_tx, loaded_rx) = watch::channel(false);
        let workers = if queue.is_empty() {
            self.config.concurrency
        } else {
            self.config.concurrency.min(queue.len())
        }
        .max(1);

        let ctx = ExecutionContext {
            label: Arc::from(label),
            queue: Arc::clone(&queue),
            loaded: loaded_rx,
            store: self.store.clone(),
            pool: Arc::clone(&self.pool),
            maintainer,
            skip_persistence: self.config.skip_persistence,
            poll_interval: self.config.poll_interval,
        };

        let start = Instant::now();
        tracing::info!("{label}: spawning loader task...");
        let loader = tokio::spawn(loader_task(queue, source, loaded_tx));

        tracing::info!("{label}: spawning {workers} workers...");
        let handles = spawn_workers(ctx, workers);

        // Workers stop on their own once the loader is gone, even if it panicked.
        let loaded = loader.await;
        let mut stats = SendStats::new();
        for (i, res) in join_all(handles).await.into_iter().enumerate() {
            match res {
                Ok(partial) => stats.merge(partial),
                Err(e) => tracing::error!("{label}: worker {i} panicked: {e}"),
            }
        }
        let elapsed = start.elapsed();

        let report = SendReport::new(stats, elapsed);
        tracing::info!("{label}: done sending. {report}");
        let n = loaded??;
        tracing::debug!("{label}: loader supplied {n} identities");
        Ok(report)
    }
}
