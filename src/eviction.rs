//! Purging a peer's pending work when the bot loses access to it.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::message::PeerId;
use crate::queue::{lock_queue, PendingQueue};

/// Cloneable handle the host wires into its inbound event stream.
#[derive(Debug, Clone)]
pub struct EvictionHandler {
    queue: Arc<Mutex<PendingQueue>>,
    bot_id: i64,
}

impl EvictionHandler {
    pub(crate) fn new(queue: Arc<Mutex<PendingQueue>>, bot_id: i64) -> Self {
        Self { queue, bot_id }
    }

    /// The bot was removed from `peer`: drop and reject everything queued for it.
    pub fn on_evicted(&self, peer: PeerId) {
        let purged = lock_queue(&self.queue).purge(peer);
        if purged > 0 {
            info!(peer = %peer, purged, "bot evicted, pending messages purged");
        } else {
            debug!(peer = %peer, "bot evicted, nothing pending");
        }
    }

    /// A member was removed from `peer`; purges only if that member is the bot.
    pub fn on_member_removed(&self, peer: PeerId, member: i64) {
        if member == self.bot_id {
            self.on_evicted(peer);
        }
    }
}
