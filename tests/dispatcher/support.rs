//! Recording API client shared by the dispatcher tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use courier::captcha::{CaptchaHook, CaptchaResolver, Challenge, ChallengeRetry};
use courier::client::{ApiClient, Response};
use courier::config::{DispatchConfig, DispatchMode};
use courier::error::{ChallengeError, SendError};
use courier::message::{OutgoingMessage, PeerId};

/// A sent message and the (virtual) time its send started.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub at: Instant,
    pub message: OutgoingMessage,
}

/// Client that records every send and answers with a sequential id.
#[derive(Default)]
pub struct RecordingClient {
    sent: Mutex<Vec<SentMessage>>,
    hook: Mutex<Option<CaptchaHook>>,
    failing: Vec<PeerId>,
    latency: Duration,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn failing_for(peer: PeerId) -> Arc<Self> {
        Arc::new(Self {
            failing: vec![peer],
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn sent_texts(&self) -> Vec<(i64, String)> {
        self.sent()
            .into_iter()
            .map(|s| (s.message.peer.get(), s.message.text))
            .collect()
    }

    /// Simulate the platform demanding a captcha; `accept` decides the retry outcome.
    pub fn raise_captcha(&self, accept: bool) {
        let hook = self
            .hook
            .lock()
            .expect("hook lock")
            .clone()
            .expect("captcha handler registered");
        let retry: Box<dyn ChallengeRetry> = Box::new(move |key: String| async move {
            if accept {
                Ok(())
            } else {
                Err(ChallengeError::Rejected(key))
            }
        });
        hook.raise(
            Challenge {
                sid: "sid-1".to_owned(),
                image_url: "https://example.com/captcha.jpg".to_owned(),
            },
            retry,
        );
    }
}

#[async_trait]
impl ApiClient for RecordingClient {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<Response, SendError> {
        let id = {
            let mut sent = self.sent.lock().expect("sent lock");
            sent.push(SentMessage {
                at: Instant::now(),
                message: message.clone(),
            });
            sent.len()
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.failing.contains(&message.peer) {
            return Err(SendError::Api {
                code: 7,
                message: "Permission to perform this action is denied".to_owned(),
            });
        }
        Ok(serde_json::json!(id))
    }

    fn on_challenge_required(&self, hook: CaptchaHook) {
        *self.hook.lock().expect("hook lock") = Some(hook);
    }
}

/// Slot the test captcha handler parks resolvers in.
pub type ResolverSlot = Arc<Mutex<Vec<CaptchaResolver>>>;

/// A captcha handler that keeps every resolver for the test to settle.
pub fn parking_handler() -> (ResolverSlot, impl Fn(Challenge, CaptchaResolver) + Send + Sync) {
    let slot: ResolverSlot = Arc::new(Mutex::new(Vec::new()));
    let parked = Arc::clone(&slot);
    let handler = move |_challenge: Challenge, resolver: CaptchaResolver| {
        parked.lock().expect("slot lock").push(resolver);
    };
    (slot, handler)
}

pub fn take_resolver(slot: &ResolverSlot) -> CaptchaResolver {
    slot.lock()
        .expect("slot lock")
        .pop()
        .expect("a challenge was raised")
}

pub fn queued(interval_ms: u64) -> DispatchConfig {
    DispatchConfig {
        sending_interval_ms: interval_ms,
        mode: DispatchMode::Queued,
    }
}

pub fn text(peer: i64, body: &str) -> OutgoingMessage {
    OutgoingMessage::text(PeerId::new(peer), body)
}
