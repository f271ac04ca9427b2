//! Captcha backpressure.
//!
//! The platform can demand an out-of-band human challenge at any time. While
//! at least one challenge is outstanding the [`CaptchaGate`] is open and the
//! dispatcher initiates no new sends. The gate is a counter rather than a flag
//! so that several concurrent challenges each have to be settled.
//!
//! Flow: the API client calls [`CaptchaHook::raise`], which opens the gate and
//! hands the host's [`ChallengeHandler`] a one-shot [`CaptchaResolver`]. The
//! host solves the challenge and calls [`CaptchaResolver::resolve`]; success or
//! failure, the gate closes and draining resumes.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ChallengeError;

/// Counter of outstanding challenges, observable through a watch channel.
#[derive(Debug)]
pub struct CaptchaGate {
    count: watch::Sender<usize>,
}

impl CaptchaGate {
    /// A closed gate.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    /// Register one more outstanding challenge.
    pub fn open(&self) {
        self.count.send_modify(|count| *count = count.saturating_add(1));
    }

    /// Settle one challenge. Never drops below zero.
    pub fn close(&self) {
        self.count.send_if_modified(|count| {
            if *count == 0 {
                return false;
            }
            *count = count.saturating_sub(1);
            true
        });
    }

    /// Whether dispatch is currently suspended.
    pub fn is_blocking(&self) -> bool {
        self.count() > 0
    }

    /// Number of outstanding challenges.
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Run `f` only if no challenge is outstanding.
    ///
    /// The counter is borrowed for the duration of `f`, so [`open`](Self::open)
    /// cannot interleave with it. `f` must not touch the gate.
    pub(crate) fn when_clear<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let count = self.count.borrow();
        if *count > 0 {
            return None;
        }
        let out = f();
        drop(count);
        Some(out)
    }

    /// Receiver notified on every counter change.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }
}

impl Default for CaptchaGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Challenge descriptor reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Platform captcha session id.
    pub sid: String,
    /// Image the human has to read.
    pub image_url: String,
}

/// Client-side retry of the request that triggered a challenge.
#[async_trait]
pub trait ChallengeRetry: Send {
    /// Retry with the key the human entered.
    async fn retry(self: Box<Self>, key: String) -> Result<(), ChallengeError>;
}

#[async_trait]
impl<F, Fut> ChallengeRetry for F
where
    F: FnOnce(String) -> Fut + Send,
    Fut: Future<Output = Result<(), ChallengeError>> + Send,
{
    async fn retry(self: Box<Self>, key: String) -> Result<(), ChallengeError> {
        (*self)(key).await
    }
}

/// Host callback that presents a challenge to a human.
pub trait ChallengeHandler: Send + Sync {
    /// Present `challenge`; settle it later through `resolver`.
    fn handle(&self, challenge: Challenge, resolver: CaptchaResolver);
}

impl<F> ChallengeHandler for F
where
    F: Fn(Challenge, CaptchaResolver) + Send + Sync,
{
    fn handle(&self, challenge: Challenge, resolver: CaptchaResolver) {
        self(challenge, resolver);
    }
}

/// Hook the API client raises when the platform demands a captcha.
#[derive(Clone)]
pub struct CaptchaHook {
    gate: Arc<CaptchaGate>,
    handler: Arc<dyn ChallengeHandler>,
}

impl std::fmt::Debug for CaptchaHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaHook")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl CaptchaHook {
    pub(crate) fn new(gate: Arc<CaptchaGate>, handler: Arc<dyn ChallengeHandler>) -> Self {
        Self { gate, handler }
    }

    /// Open the gate and pass the challenge to the host handler.
    pub fn raise(&self, challenge: Challenge, retry: Box<dyn ChallengeRetry>) {
        self.gate.open();
        info!(
            sid = %challenge.sid,
            outstanding = self.gate.count(),
            "captcha required, dispatch paused"
        );
        let resolver = CaptchaResolver {
            gate: Arc::clone(&self.gate),
            retry: Some(retry),
            settled: false,
        };
        self.handler.handle(challenge, resolver);
    }
}

/// One-shot continuation settling a single challenge.
///
/// Dropping an unresolved resolver closes its share of the gate.
pub struct CaptchaResolver {
    gate: Arc<CaptchaGate>,
    retry: Option<Box<dyn ChallengeRetry>>,
    settled: bool,
}

impl std::fmt::Debug for CaptchaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaResolver")
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl CaptchaResolver {
    /// Submit the solved key.
    ///
    /// # Errors
    ///
    /// Returns the client's [`ChallengeError`] when the key is rejected. The
    /// gate closes either way; queued messages are not affected.
    pub async fn resolve(mut self, key: impl Into<String>) -> Result<(), ChallengeError> {
        let Some(retry) = self.retry.take() else {
            return Ok(());
        };

        let result = retry.retry(key.into()).await;
        self.settled = true;
        self.gate.close();

        match &result {
            Ok(()) => debug!(outstanding = self.gate.count(), "captcha solved"),
            Err(e) => warn!(error = %e, outstanding = self.gate.count(), "captcha failed"),
        }
        result
    }
}

impl Drop for CaptchaResolver {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.close();
            warn!(
                outstanding = self.gate.count(),
                "captcha abandoned without a key"
            );
        }
    }
}
