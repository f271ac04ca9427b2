//! Error types shared by the queue, dispatcher and captcha gate.
//!
//! A single send result fans out to every waiter of an entry, so the errors
//! delivered through [`Delivery`](crate::queue::Delivery) are `Clone`.

use thiserror::Error;

use crate::message::PeerId;

/// Failure reported by the API client for a single `sendMessage` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The API rejected the call with an error code.
    #[error("API error {code}: {message}")]
    Api {
        /// Platform error code.
        code: i64,
        /// Platform error description.
        message: String,
    },
    /// The request never produced an API response.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Terminal outcome of a queued delivery that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The API client failed to send the entry.
    #[error("send failed: {0}")]
    Send(#[from] SendError),
    /// The entry was removed because the bot lost access to the peer.
    #[error("queue purged for peer {peer}")]
    Purged {
        /// Peer whose entries were purged.
        peer: PeerId,
    },
    /// The dispatcher shut down before the entry was sent.
    #[error("dispatcher closed before the message was sent")]
    Closed,
}

/// Failure of an out-of-band captcha retry.
///
/// Returned to whoever resolved the challenge, never to queued waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    /// The platform rejected the supplied captcha key.
    #[error("captcha key rejected: {0}")]
    Rejected(String),
    /// The retry request itself failed.
    #[error("captcha retry failed: {0}")]
    Retry(#[from] SendError),
}
