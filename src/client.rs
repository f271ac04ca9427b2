//! Boundary to the platform API client.
//!
//! The dispatcher only needs two things from the client: a way to send one
//! message, and a place to register the captcha hook it raises when the
//! platform demands a human challenge.

use async_trait::async_trait;

use crate::captcha::CaptchaHook;
use crate::error::SendError;
use crate::message::OutgoingMessage;

/// Raw API response for a sent message (usually the new message id).
pub type Response = serde_json::Value;

/// Platform API client consumed by the dispatcher.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Send one message.
    ///
    /// A captcha demanded mid-send is reported through the registered
    /// [`CaptchaHook`], not as an error of this call.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<Response, SendError>;

    /// Register the hook to raise whenever the platform requires a captcha.
    fn on_challenge_required(&self, hook: CaptchaHook);
}
