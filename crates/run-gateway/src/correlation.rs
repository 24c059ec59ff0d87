//! Correlation map — request id → the caller waiting for its response.
//!
//! A handler registers a slot before dispatching and awaits it. The
//! delivery path completes the slot by request id. Removal happens before
//! the send, so each request id is answered at most once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use run_core::{RequestId, ResponseEnvelope};
use tokio::sync::oneshot;

type Slots = HashMap<RequestId, oneshot::Sender<ResponseEnvelope>>;

#[derive(Clone, Default)]
pub struct Correlations {
    slots: Arc<Mutex<Slots>>,
}

impl Correlations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a slot for `request_id`. Dropping the returned [`Pending`]
    /// releases the slot.
    pub fn register(&self, request_id: RequestId) -> Pending {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id, tx);
        Pending {
            request_id,
            rx,
            correlations: self.clone(),
        }
    }

    /// Deliver `response` to its waiting caller. Returns `false` when no
    /// caller is waiting (already answered, or gone).
    pub fn complete(&self, response: ResponseEnvelope) -> bool {
        let Some(tx) = self.lock().remove(&response.request_id) else {
            return false;
        };
        tx.send(response).is_ok()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, request_id: RequestId) {
        self.lock().remove(&request_id);
    }
}

/// A registered slot. Resolves to the response, or to an error if the slot
/// was dropped without one.
pub struct Pending {
    request_id: RequestId,
    rx: oneshot::Receiver<ResponseEnvelope>,
    correlations: Correlations,
}

impl Pending {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for Pending {
    type Output = Result<ResponseEnvelope, oneshot::error::RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx)
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.correlations.release(self.request_id);
    }
}
