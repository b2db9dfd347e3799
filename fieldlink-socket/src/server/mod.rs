use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

use fieldlink_queue::BufferError;
use fieldlink_wire::{frame, handshake};

use crate::{
    BufferPolicy, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_WATCHDOG_TIMEOUT,
};

mod driver;

mod socket;
pub use socket::*;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] frame::Error),
    #[error("Handshake error: {0:?}")]
    Handshake(#[from] handshake::Error),
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
    #[error("Client rejected: {0:?}")]
    Rejected(handshake::Status),
    #[error("Server already started")]
    AlreadyStarted,
    #[error("No client connected")]
    NotConnected,
    #[error("Socket closed")]
    SocketClosed,
    #[error("Timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Interval between heartbeats sent to the client.
    pub heartbeat_interval: Duration,
    /// Silence from the client after which the session is dropped.
    pub watchdog_timeout: Duration,
    /// Time a new connection has to complete the handshake.
    pub handshake_timeout: Duration,
    /// Scheduler for outgoing packets.
    pub buffer: BufferPolicy,
    /// Sets `TCP_NODELAY` on accepted connections.
    pub set_nodelay: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            buffer: BufferPolicy::default(),
            set_nodelay: true,
        }
    }
}

impl ServerOptions {
    /// Sets the interval between heartbeats.
    pub fn heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Sets how long the client may stay silent before the session is dropped.
    pub fn watchdog_timeout(mut self, watchdog_timeout: Duration) -> Self {
        self.watchdog_timeout = watchdog_timeout;
        self
    }

    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets the scheduler used for outgoing packets.
    pub fn buffer(mut self, buffer: BufferPolicy) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn set_nodelay(mut self, set_nodelay: bool) -> Self {
        self.set_nodelay = set_nodelay;
        self
    }
}

/// The client currently connected to a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The name the client announced.
    pub name: String,
    /// The client's stream address.
    pub addr: SocketAddr,
    /// The client's datagram address.
    pub datagram_addr: SocketAddr,
}
