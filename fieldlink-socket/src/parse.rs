use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use fieldlink_wire::{frame, Packet};

/// A packet handler. Handlers run on the receiving session task and should return quickly.
pub type Handler = Arc<dyn Fn(Packet) + Send + Sync + 'static>;

/// Routes received packets to the handler registered for their channel.
///
/// Cloning a `Parse` is cheap and every clone shares the same handlers, so one registry can be
/// handed to an endpoint and still be updated afterwards. Independent registries don't interact.
#[derive(Clone, Default)]
pub struct Parse {
    handlers: Arc<RwLock<FxHashMap<u8, Handler>>>,
}

impl std::fmt::Debug for Parse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.handlers.read().keys().copied().collect();
        channels.sort_unstable();
        f.debug_struct("Parse").field("channels", &channels).finish()
    }
}

impl Parse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the handler for `channel`, replacing any previous one.
    ///
    /// Returns `true` if a handler was replaced. Channels at or above
    /// [`RESERVED_CHANNELS`](frame::RESERVED_CHANNELS) carry link control traffic and never reach
    /// a handler.
    pub fn set_parse_handler<F>(&self, channel: u8, handler: F) -> bool
    where
        F: Fn(Packet) + Send + Sync + 'static,
    {
        if frame::is_reserved(channel) {
            warn!(channel, "Registering a handler on a reserved channel, it will never be called");
        }

        let replaced = self.handlers.write().insert(channel, Arc::new(handler)).is_some();
        if replaced {
            warn!(channel, "Replaced existing parse handler");
        }

        replaced
    }

    /// Removes the handler for `channel`. Returns `true` if there was one.
    pub fn remove_parse_handler(&self, channel: u8) -> bool {
        self.handlers.write().remove(&channel).is_some()
    }

    pub fn has_handler(&self, channel: u8) -> bool {
        self.handlers.read().contains_key(&channel)
    }

    /// Invokes the handler registered for the packet's channel.
    ///
    /// Packets on channels without a handler are dropped and `false` is returned. A panicking
    /// handler is logged and does not take the caller down.
    pub fn dispatch(&self, packet: Packet) -> bool {
        let channel = packet.channel();

        // Don't hold the lock while the handler runs, it may register handlers itself.
        let Some(handler) = self.handlers.read().get(&channel).cloned() else {
            debug!(channel, "No parse handler registered, dropping packet");
            return false;
        };

        if catch_unwind(AssertUnwindSafe(|| handler(packet))).is_err() {
            error!(channel, "Parse handler panicked");
        }

        true
    }
}
