//! The per-session request loop.
//!
//! A [`Client`] owns one transport for the lifetime of one session and drives
//! the session through its maintainer:
//!
//! ```text
//! Init -> (Send -> CheckStop)* -> Done
//!              \-> Aborted
//! ```
//!
//! A request is attempted up to `retry + 1` times with a fixed sleep between
//! attempts; only a 200 counts as success. When the last attempt leaves the
//! session without a 200 the transaction is still recorded and the session
//! is aborted. Aborting is never an error for the caller.

use std::time::Instant;

use chrono::Utc;

use crate::{
    error::Result,
    maintainer::SessionMaintainer,
    request::PreparedRequest,
    session::{Session, Transaction},
    transport::{Pooled, RawResponse, Transport, TransportPool},
};

/// How a session's loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The maintainer asked to stop.
    Done,
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// Every attempt failed before a response arrived.
    NoResponse(String),
    /// The last attempt got a response other than 200.
    Status(u16),
}

impl SessionOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

pub struct Client<'a, T: Transport> {
    transport: Pooled<'a, T>,
    maintainer: &'a dyn SessionMaintainer,
}

impl<'a, T: Transport> Client<'a, T> {
    pub fn new(pool: &'a TransportPool<T>, maintainer: &'a dyn SessionMaintainer) -> Result<Self> {
        Ok(Self {
            transport: pool.acquire()?,
            maintainer,
        })
    }

    /// Runs `session` to completion, appending a transaction per request.
    pub async fn run(&self, session: &mut Session) -> SessionOutcome {
        self.maintainer.init(session);

        loop {
            let request = self
                .maintainer
                .build_request(session)
                .prepare(self.maintainer.defaults());

            let (transaction, last) = self.send(&request).await;
            session.append_transaction(transaction);

            match last {
                Err(reason) => {
                    tracing::error!(
                        "Aborting session {}-{}: no response from {} {}: {reason}",
                        session.label,
                        session.session_id,
                        request.method,
                        request.url,
                    );
                    return SessionOutcome::Aborted(AbortReason::NoResponse(reason));
                }
                Ok(status) if status != 200 => {
                    tracing::error!(
                        "Aborting session {}-{}: {} {} answered {status}: {:?}",
                        session.label,
                        session.session_id,
                        request.method,
                        request.url,
                        session.last_transaction().and_then(|t| t.response.as_deref()),
                    );
                    return SessionOutcome::Aborted(AbortReason::Status(status));
                }
                Ok(_) => {}
            }

            self.maintainer.update(session);
            if self.maintainer.should_stop(session) {
                return SessionOutcome::Done;
            }
        }
    }

    /// Sends with retries. Returns the transaction to record and either the
    /// final status or the last transport error when nothing ever answered.
    async fn send(
        &self,
        request: &PreparedRequest,
    ) -> (Transaction, std::result::Result<u16, String>) {
        let mut transaction = Transaction {
            request: request.body.clone(),
            ..Transaction::new(request.url.clone(), request.method.as_str())
        };
        let mut answered: Option<(RawResponse, f64)> = None;
        let mut last_error = String::new();

        for attempt in 0..=request.retry {
            if attempt > 0 {
                transaction.retry_count += 1;
                tokio::time::sleep(request.retry_backoff).await;
            }

            transaction.request_time = Some(Utc::now());
            let start = Instant::now();
            match self.transport.send(request).await {
                Ok(response) => {
                    let ok = response.status == 200;
                    answered = Some((response, start.elapsed().as_secs_f64()));
                    if ok {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("Attempt {attempt} to {} failed: {e}", request.url);
                    last_error = e.0;
                }
            }
        }

        match answered {
            Some((response, cost)) => {
                transaction.status_code = Some(response.status);
                transaction.response = Some(response.body);
                transaction.cost_time = cost;
                (transaction, Ok(response.status))
            }
            None => (transaction, Err(last_error)),
        }
    }
}
