//! Throttled drain loop over the pending queue.
//!
//! The loop runs as one Tokio task and moves between three states:
//!
//! - **Idle**: nothing queued; waits for an enqueue.
//! - **Armed**: an entry was just handed to the API client and the interval
//!   timer is running. The timer throttles how often sends *start*; it does
//!   not wait for the send to finish, so sends may overlap.
//! - **Blocked**: the captcha gate is open. No send starts until it closes,
//!   at which point draining resumes immediately.
//!
//! A captcha raised while Armed cancels the timer. A send already in flight
//! still completes and resolves its waiters.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::captcha::{CaptchaGate, CaptchaHook, ChallengeHandler};
use crate::client::ApiClient;
use crate::config::{DispatchConfig, DispatchMode, MIN_SENDING_INTERVAL_MS};
use crate::error::DispatchError;
use crate::eviction::EvictionHandler;
use crate::message::OutgoingMessage;
use crate::queue::{lock_queue, Delivery, Entry, PendingQueue};

/// State shared between the public handle and the drain task.
struct Shared {
    queue: Arc<Mutex<PendingQueue>>,
    gate: Arc<CaptchaGate>,
    wakeup: Notify,
    client: Arc<dyn ApiClient>,
    interval: Duration,
}

/// Outbound dispatcher: the entry point for scheduling delivery.
pub struct Dispatcher {
    shared: Arc<Shared>,
    mode: DispatchMode,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode)
            .field("interval", &self.shared.interval)
            .field("captcha_count", &self.captcha_count())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build a dispatcher around `client`. Call [`start`](Self::start) to
    /// begin draining.
    ///
    /// An interval below [`MIN_SENDING_INTERVAL_MS`] is raised to it.
    pub fn new(client: Arc<dyn ApiClient>, config: &DispatchConfig) -> Self {
        let floor = Duration::from_millis(MIN_SENDING_INTERVAL_MS);
        let mut interval = config.sending_interval();
        if interval < floor {
            warn!(
                configured_ms = config.sending_interval_ms,
                min_ms = MIN_SENDING_INTERVAL_MS,
                "sending interval below floor, clamping"
            );
            interval = floor;
        }

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                queue: Arc::new(Mutex::new(PendingQueue::new())),
                gate: Arc::new(CaptchaGate::new()),
                wakeup: Notify::new(),
                client,
                interval,
            }),
            mode: config.mode,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Spawn the drain loop. No-op if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *task = Some(tokio::spawn(run_drain_loop(shared, shutdown_rx)));
    }

    /// Schedule delivery of `message`.
    ///
    /// Never fails synchronously; every outcome arrives through the
    /// returned [`Delivery`].
    pub fn enqueue_outgoing(&self, message: OutgoingMessage) -> Delivery {
        match self.mode {
            DispatchMode::Queued => {
                // Closed-queue check and push happen under one lock.
                let delivery = lock_queue(&self.shared.queue).enqueue(message);
                self.shared.wakeup.notify_one();
                delivery
            }
            DispatchMode::Direct => self.send_direct(message),
        }
    }

    fn send_direct(&self, message: OutgoingMessage) -> Delivery {
        let (waiter, delivery) = Delivery::channel();
        if *self.shutdown_tx.borrow() {
            waiter.complete(Err(DispatchError::Closed));
            return delivery;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let client = Arc::clone(&self.shared.client);
                handle.spawn(async move {
                    let result = client.send_message(&message).await;
                    if let Err(ref e) = result {
                        warn!(peer = %message.peer, error = %e, "direct send failed");
                    }
                    waiter.complete(result.map_err(DispatchError::from));
                });
            }
            Err(_) => waiter.complete(Err(DispatchError::Closed)),
        }
        delivery
    }

    /// Install the host's captcha handler on the API client.
    pub fn set_captcha_handler(&self, handler: impl ChallengeHandler + 'static) {
        let hook = CaptchaHook::new(Arc::clone(&self.shared.gate), Arc::new(handler));
        self.shared.client.on_challenge_required(hook);
    }

    /// Handle for purging peers the bot was removed from.
    pub fn eviction_handler(&self, bot_id: i64) -> EvictionHandler {
        EvictionHandler::new(Arc::clone(&self.shared.queue), bot_id)
    }

    /// Outstanding captcha challenges.
    pub fn captcha_count(&self) -> usize {
        self.shared.gate.count()
    }

    /// Whether dispatch is paused by a captcha.
    pub fn has_captcha(&self) -> bool {
        self.shared.gate.is_blocking()
    }

    /// Entries waiting to be drained.
    pub fn queue_len(&self) -> usize {
        lock_queue(&self.shared.queue).len()
    }

    /// Stop the drain loop and reject everything still queued.
    ///
    /// Sends already in flight complete normally. A stopped dispatcher
    /// rejects further enqueues with [`DispatchError::Closed`].
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "drain loop ended abnormally");
            }
        }

        let rejected = lock_queue(&self.shared.queue).close();
        info!(rejected, "dispatcher stopped");
    }
}

/// Run the drain loop until shutdown is signalled or the dispatcher is dropped.
async fn run_drain_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut gate_rx = shared.gate.subscribe();
    let interval_ms = u64::try_from(shared.interval.as_millis()).unwrap_or(u64::MAX);
    info!(interval_ms, "dispatcher started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Gate check, dequeue and send start happen while the gate is held,
        // so no send starts once a challenge is raised.
        let dispatched = shared.gate.when_clear(|| {
            let head = lock_queue(&shared.queue).dequeue_head();
            match head {
                Some(entry) => {
                    spawn_send(&shared, entry);
                    true
                }
                None => false,
            }
        });

        // Blocked
        let Some(dispatched) = dispatched else {
            debug!(outstanding = shared.gate.count(), "dispatch blocked by captcha");
            tokio::select! {
                cleared = gate_cleared(&mut gate_rx) => {
                    if !cleared {
                        break;
                    }
                    debug!("captcha cleared, resuming dispatch");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            continue;
        };

        // Idle
        if !dispatched {
            tokio::select! {
                () = shared.wakeup.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            continue;
        }

        // Armed
        tokio::select! {
            () = tokio::time::sleep(shared.interval) => {}
            raised = gate_raised(&mut gate_rx) => {
                if !raised {
                    break;
                }
                debug!("captcha raised, send timer cancelled");
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!("drain loop exited");
}

/// Wait until no challenge is outstanding. `false` if the gate is gone.
async fn gate_cleared(gate_rx: &mut watch::Receiver<usize>) -> bool {
    gate_rx.wait_for(|count| *count == 0).await.is_ok()
}

/// Wait until a challenge is raised. `false` if the gate is gone.
async fn gate_raised(gate_rx: &mut watch::Receiver<usize>) -> bool {
    gate_rx.wait_for(|count| *count > 0).await.is_ok()
}

/// Start the send for `entry` and fan its result out when it completes.
fn spawn_send(shared: &Shared, entry: Entry) {
    let (message, waiters) = entry.into_parts();
    let client = Arc::clone(&shared.client);
    debug!(peer = %message.peer, waiters = waiters.len(), "dispatching entry");

    tokio::spawn(async move {
        let result = client.send_message(&message).await;
        if let Err(ref e) = result {
            warn!(
                peer = %message.peer,
                waiters = waiters.len(),
                error = %e,
                "send failed"
            );
        }
        waiters.complete(result.map_err(DispatchError::from));
    });
}
