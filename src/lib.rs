//! Courier: outbound message dispatch for chat-bot integrations.
//!
//! Callers hand outgoing messages to a [`Dispatcher`]. Plain text for the same
//! peer is coalesced into one API call, sends start at most once per
//! configured interval, delivery pauses while a captcha is outstanding, and a
//! peer's pending messages are purged when the bot is removed from it.
//!
//! See `DESIGN.md` for the architecture notes.

pub mod config;
pub mod logging;

pub mod captcha;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod eviction;
pub mod message;
pub mod queue;

pub use dispatcher::Dispatcher;
