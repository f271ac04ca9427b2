//! Pending outbound queue with per-peer text coalescing.
//!
//! Every [`PendingQueue::enqueue`] call hands back a [`Delivery`] future. A
//! plain text request for a peer merges into the first non-special entry for
//! that peer already waiting anywhere in the queue; its text is appended after
//! a blank line and its waiter joins that entry. Special messages always get
//! an entry of their own.
//!
//! The queue itself is synchronous. The dispatcher wraps it in a mutex and
//! holds the lock only while mutating the sequence.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::debug;

use crate::client::Response;
use crate::error::DispatchError;
use crate::message::{OutgoingMessage, PeerId};

/// Result every waiter of an entry receives.
pub type DeliveryResult = Result<Response, DispatchError>;

/// Future of a single enqueue request.
///
/// Resolves once the entry it was merged into is sent, purged, or dropped by
/// a closing dispatcher.
#[derive(Debug)]
#[must_use = "a delivery does nothing unless awaited"]
pub struct Delivery {
    rx: oneshot::Receiver<DeliveryResult>,
}

impl Delivery {
    /// A delivery paired with the waiter that completes it.
    pub(crate) fn channel() -> (Waiter, Self) {
        let (tx, rx) = oneshot::channel();
        (Waiter { tx }, Self { rx })
    }
}

impl Future for Delivery {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(DispatchError::Closed)))
    }
}

/// Completion side of one [`Delivery`].
#[derive(Debug)]
pub(crate) struct Waiter {
    tx: oneshot::Sender<DeliveryResult>,
}

impl Waiter {
    pub(crate) fn complete(self, result: DeliveryResult) {
        // A dropped Delivery means the caller stopped listening.
        let _ = self.tx.send(result);
    }
}

/// Waiters detached from a dispatched entry.
#[derive(Debug)]
pub struct Waiters(Vec<Waiter>);

impl Waiters {
    /// Number of original requests represented.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false` for waiters taken from a queued entry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deliver the same result to every waiter, in enqueue order.
    pub fn complete(self, result: DeliveryResult) {
        for waiter in self.0 {
            waiter.complete(result.clone());
        }
    }
}

/// One queued unit of outbound work, possibly several coalesced requests.
#[derive(Debug)]
pub struct Entry {
    message: OutgoingMessage,
    waiters: Vec<Waiter>,
}

impl Entry {
    fn new(message: OutgoingMessage, waiter: Waiter) -> Self {
        Self {
            message,
            waiters: vec![waiter],
        }
    }

    /// Destination peer.
    pub fn peer(&self) -> PeerId {
        self.message.peer
    }

    /// Payload that will be sent, including any merged text.
    pub fn message(&self) -> &OutgoingMessage {
        &self.message
    }

    /// Whether the payload is exempt from coalescing.
    pub fn is_special(&self) -> bool {
        self.message.is_special()
    }

    /// Number of requests merged into this entry.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Split into the payload to send and the waiters to notify afterwards.
    pub fn into_parts(self) -> (OutgoingMessage, Waiters) {
        (self.message, Waiters(self.waiters))
    }

    /// Resolve every waiter with the same response.
    pub fn resolve(self, response: Response) {
        Waiters(self.waiters).complete(Ok(response));
    }

    /// Reject every waiter with the same error.
    pub fn reject(self, error: DispatchError) {
        Waiters(self.waiters).complete(Err(error));
    }

    fn accepts_merge(&self, peer: PeerId) -> bool {
        self.message.peer == peer && !self.is_special()
    }

    fn merge(&mut self, message: &OutgoingMessage, waiter: Waiter) {
        self.message.append_text(&message.text);
        self.waiters.push(waiter);
    }
}

/// Ordered collection of pending entries.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<Entry>,
    closed: bool,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries (not requests) waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in drain order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Queue a message, merging it into a compatible entry when possible.
    ///
    /// A closed queue rejects the request at once with
    /// [`DispatchError::Closed`].
    pub fn enqueue(&mut self, message: OutgoingMessage) -> Delivery {
        let (waiter, delivery) = Delivery::channel();

        if self.closed {
            waiter.complete(Err(DispatchError::Closed));
            return delivery;
        }

        if !message.is_special() {
            let peer = message.peer;
            if let Some(entry) = self.entries.iter_mut().find(|e| e.accepts_merge(peer)) {
                entry.merge(&message, waiter);
                debug!(peer = %peer, waiters = entry.waiter_count(), "coalesced outgoing message");
                return delivery;
            }
        }

        self.entries.push_back(Entry::new(message, waiter));
        delivery
    }

    /// Remove the front entry without notifying its waiters.
    pub fn dequeue_head(&mut self) -> Option<Entry> {
        self.entries.pop_front()
    }

    /// Remove every entry for `peer` and reject its waiters.
    ///
    /// Other entries keep their relative order. Returns the number of
    /// entries removed.
    pub fn purge(&mut self, peer: PeerId) -> usize {
        if !self.entries.iter().any(|e| e.peer() == peer) {
            return 0;
        }

        let (purged, kept): (VecDeque<Entry>, VecDeque<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.peer() == peer);
        self.entries = kept;

        let removed = purged.len();
        for entry in purged {
            entry.reject(DispatchError::Purged { peer });
        }
        removed
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop accepting work and reject everything queued with
    /// [`DispatchError::Closed`]. Returns the number of entries rejected.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        self.reject_all(&DispatchError::Closed)
    }

    /// Remove every entry and reject all waiters with `error`.
    pub fn reject_all(&mut self, error: &DispatchError) -> usize {
        let removed = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.reject(error.clone());
        }
        removed
    }
}

/// Lock a shared queue, recovering it if a previous holder panicked.
///
/// No operation leaves the sequence half-mutated, so a poisoned queue is
/// still consistent.
pub(crate) fn lock_queue(queue: &Mutex<PendingQueue>) -> MutexGuard<'_, PendingQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}
