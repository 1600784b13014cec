//! Pending-request table.
//!
//! Each blocking call registers a fresh [`RequestId`] and gets a [`Waiter`].
//! The receive path completes the waiter whose id the reply carries, so any
//! number of calls of the same kind can be in flight at once.
//!
//! ```text
//! caller ── register() ──▶ (req, Waiter) ── send(frame{req}) ──▶ peer
//!                               │                                  │
//!                               ▼                                  ▼
//!                      wait(timeout, cancel) ◀── complete(req) ◀── reply{req}
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use prime_protocol::{Frame, RequestId, RequestIdGenerator};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::{Datagram, Endpoint};

/// A reply as delivered to a waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub frame: Frame,
    /// Sender of the reply
    pub from: Option<Endpoint>,
}

/// Why a wait ended without a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("request {req} timed out after {after:?}")]
    Timeout { req: RequestId, after: Duration },

    #[error("request {req} cancelled")]
    Cancelled { req: RequestId },
}

struct PendingInner<T> {
    ids: RequestIdGenerator,
    waiters: Mutex<HashMap<RequestId, oneshot::Sender<T>>>,
}

/// Request id to waiter map. Clones share the table.
pub struct PendingRequests<T> {
    inner: Arc<PendingInner<T>>,
}

impl<T> Clone for PendingRequests<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingRequests<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PendingInner {
                ids: RequestIdGenerator::default(),
                waiters: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<T>>> {
        self.inner.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a request id and its waiter. Register before sending.
    pub fn register(&self) -> (RequestId, Waiter<T>) {
        let req = self.inner.ids.next_id();
        let (tx, rx) = oneshot::channel();
        self.waiters().insert(req, tx);
        let waiter = Waiter {
            req,
            rx,
            pending: self.clone(),
        };
        (req, waiter)
    }

    /// Hands `value` to the waiter for `req`. Returns false when nobody is
    /// waiting, e.g. the caller already timed out.
    pub fn complete(&self, req: RequestId, value: T) -> bool {
        match self.waiters().remove(&req) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drops every waiter; their calls end as cancelled.
    pub fn cancel_all(&self) {
        self.waiters().clear();
    }

    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, req: RequestId) {
        self.waiters().remove(&req);
    }
}

impl PendingRequests<Reply> {
    /// Receive-path entry point: decodes `datagram` and completes the waiter
    /// named by its request id. Returns false for malformed, unsolicited or
    /// late replies, which are logged and dropped.
    pub fn deliver(&self, datagram: Datagram) -> bool {
        let frame = match Frame::decode(&datagram.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed reply");
                return false;
            }
        };
        let Some(req) = frame.request_id() else {
            debug!("Ignoring frame without request id");
            return false;
        };
        let delivered = self.complete(
            req,
            Reply {
                frame,
                from: datagram.from,
            },
        );
        if !delivered {
            debug!(req = %req, "Reply has no waiter");
        }
        delivered
    }
}

/// One in-flight request. Dropping it removes the table entry.
pub struct Waiter<T> {
    req: RequestId,
    rx: oneshot::Receiver<T>,
    pending: PendingRequests<T>,
}

impl<T> Waiter<T> {
    pub fn request_id(&self) -> RequestId {
        self.req
    }

    /// Waits for the reply, the timeout or cancellation, whichever is first.
    pub async fn wait(mut self, after: Duration, cancel: &CancellationToken) -> Result<T, WaitError> {
        let req = self.req;
        tokio::select! {
            _ = cancel.cancelled() => Err(WaitError::Cancelled { req }),
            result = tokio::time::timeout(after, &mut self.rx) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(WaitError::Cancelled { req }),
                Err(_) => Err(WaitError::Timeout { req, after }),
            },
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        self.pending.forget(self.req);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_complete_resolves_matching_waiter() {
        let pending = PendingRequests::<u32>::new();
        let (first, w1) = pending.register();
        let (second, w2) = pending.register();
        assert_ne!(first, second);
        assert_eq!(pending.len(), 2);

        // Out of order on purpose
        assert!(pending.complete(second, 20));
        assert!(pending.complete(first, 10));

        let token = CancellationToken::new();
        assert_eq!(w1.wait(WAIT, &token).await, Ok(10));
        assert_eq!(w2.wait(WAIT, &token).await, Ok(20));
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let pending = PendingRequests::<u32>::new();
        let (req, waiter) = pending.register();
        let token = CancellationToken::new();

        let err = waiter.wait(Duration::from_millis(100), &token).await.unwrap_err();
        assert_eq!(
            err,
            WaitError::Timeout {
                req,
                after: Duration::from_millis(100)
            }
        );
        assert!(pending.is_empty());
        assert!(!pending.complete(req, 1));
    }

    #[tokio::test]
    async fn test_cancel_token_ends_wait() {
        let pending = PendingRequests::<u32>::new();
        let (req, waiter) = pending.register();
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(waiter.wait(WAIT, &token).await, Err(WaitError::Cancelled { req }));
    }

    #[tokio::test]
    async fn test_cancel_all_ends_wait() {
        let pending = PendingRequests::<u32>::new();
        let (req, waiter) = pending.register();
        pending.cancel_all();
        let token = CancellationToken::new();
        assert_eq!(waiter.wait(WAIT, &token).await, Err(WaitError::Cancelled { req }));
    }

    #[test]
    fn test_unknown_request_is_not_completed() {
        let pending = PendingRequests::<u32>::new();
        assert!(!pending.complete(RequestId::new(99), 1));
    }

    #[tokio::test]
    async fn test_deliver_routes_by_request_id() {
        let pending = PendingRequests::<Reply>::new();
        let (req, waiter) = pending.register();
        let bytes = prime_protocol::SlowFrame::with_req(
            prime_protocol::SlowMessage::AppRegisterReturn { proc_id: 9 },
            req,
        )
        .encode()
        .unwrap();

        assert!(!pending.deliver(Datagram {
            bytes: b"{broken".to_vec(),
            from: None,
        }));
        assert!(pending.deliver(Datagram { bytes, from: None }));

        let reply = waiter.wait(WAIT, &CancellationToken::new()).await.unwrap();
        assert_eq!(reply.frame.request_id(), Some(req));
    }
}
