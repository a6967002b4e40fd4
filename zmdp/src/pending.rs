//! Pending-call registry and the future type returned by async dispatch

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::ready;
use serde::de::DeserializeOwned;
use tokio::sync::{oneshot, Mutex};

use crate::{Error, Result};

/// Correlation key matching an async reply to its originating request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub id: u8,
    pub service: String,
}

impl CorrelationKey {
    pub fn new(id: u8, service: impl Into<String>) -> Self {
        Self {
            id,
            service: service.into(),
        }
    }
}

type ReplySlot = oneshot::Sender<Result<Bytes>>;

/// Registry of in-flight asynchronous calls.
///
/// Entries are created when a call is dispatched and removed when the
/// matching reply resolves or rejects them. Replies with no matching entry
/// are a defined no-op: the receive loop logs and drops them.
#[derive(Default)]
pub struct PendingCalls {
    slots: Mutex<HashMap<CorrelationKey, ReplySlot>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight call.
    ///
    /// The message-id counter wraps after 255, so 256 outstanding calls to
    /// one service reuse a key. The stale entry is evicted deterministically:
    /// its future is rejected with [`Error::Superseded`] and the new call
    /// takes the slot.
    pub async fn register(&self, key: CorrelationKey) -> oneshot::Receiver<Result<Bytes>> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().await;
        if let Some(stale) = slots.insert(key.clone(), tx) {
            tracing::warn!(
                id = key.id,
                service = %key.service,
                "message id wrapped around with call still in flight; evicting stale entry"
            );
            let _ = stale.send(Err(Error::Superseded {
                id: key.id,
                service: key.service.clone(),
            }));
        }
        rx
    }

    /// Resolve an in-flight call with the reply payload.
    pub async fn resolve(&self, key: &CorrelationKey, payload: Bytes) {
        match self.slots.lock().await.remove(key) {
            Some(slot) => {
                let _ = slot.send(Ok(payload));
            }
            None => self.log_miss(key, "success"),
        }
    }

    /// Reject an in-flight call with an error.
    pub async fn reject(&self, key: &CorrelationKey, error: Error) {
        match self.slots.lock().await.remove(key) {
            Some(slot) => {
                let _ = slot.send(Err(error));
            }
            None => self.log_miss(key, "failure"),
        }
    }

    /// Drop an entry without completing it (send-path failure after register).
    pub async fn discard(&self, key: &CorrelationKey) {
        self.slots.lock().await.remove(key);
    }

    /// Reject every in-flight call, draining the registry.
    ///
    /// Invoked on loop shutdown and reconnect so awaiting callers get an
    /// error instead of hanging forever.
    pub async fn fail_all(&self, error: impl Fn() -> Error) {
        let mut slots = self.slots.lock().await;
        let drained = slots.len();
        for (_, slot) in slots.drain() {
            let _ = slot.send(Err(error()));
        }
        if drained > 0 {
            tracing::debug!(count = drained, "rejected all in-flight calls");
        }
    }

    /// Number of in-flight calls.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    fn log_miss(&self, key: &CorrelationKey, kind: &str) {
        tracing::warn!(
            id = key.id,
            service = %key.service,
            kind,
            "reply with no matching in-flight call; dropping"
        );
    }
}

/// A not-yet-resolved remote call, returned by asynchronous dispatch.
///
/// Resolves to the bincode-decoded result once the receive loop observes the
/// matching reply. If the client shuts down first, resolves to
/// [`Error::Shutdown`] rather than hanging.
pub struct PendingReply<R> {
    rx: oneshot::Receiver<Result<Bytes>>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> PendingReply<R> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Bytes>>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }

    /// Await the reply.
    pub async fn wait(self) -> Result<R> {
        decode(self.rx.await)
    }
}

impl<R: DeserializeOwned> Future for PendingReply<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = ready!(Pin::new(&mut self.rx).poll(cx));
        Poll::Ready(decode(outcome))
    }
}

fn decode<R: DeserializeOwned>(
    outcome: std::result::Result<Result<Bytes>, oneshot::error::RecvError>,
) -> Result<R> {
    let payload = outcome.map_err(|_| Error::Shutdown)??;
    Ok(bincode::deserialize(&payload)?)
}
