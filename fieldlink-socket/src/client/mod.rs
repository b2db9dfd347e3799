use std::time::Duration;

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
pub enum ClientError {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] frame::Error),
    #[error("Handshake error: {0:?}")]
    Handshake(#[from] handshake::Error),
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
    #[error("Rejected by server: {0:?}")]
    Rejected(handshake::Status),
    #[error("Could not resolve server address {0}")]
    UnknownHost(String),
    #[error("Client already started")]
    AlreadyStarted,
    #[error("No server connected")]
    NotConnected,
    #[error("Socket closed")]
    SocketClosed,
    #[error("Timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Interval between heartbeats sent to the server.
    pub heartbeat_interval: Duration,
    /// Silence from the server after which the link is considered lost.
    pub watchdog_timeout: Duration,
    /// Time allowed to establish the stream connection.
    pub connect_timeout: Duration,
    /// Time allowed for the server to answer the handshake.
    pub handshake_timeout: Duration,
    /// Initial delay before reconnecting. Doubles on every failed attempt.
    pub backoff_duration: Duration,
    /// Upper bound for the reconnect delay.
    pub max_backoff: Duration,
    /// Reconnect attempts before giving up. `None` retries forever.
    pub retry_attempts: Option<usize>,
    /// Scheduler for outgoing packets.
    pub buffer: BufferPolicy,
    /// Sets `TCP_NODELAY` on the stream connection.
    pub set_nodelay: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            backoff_duration: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            retry_attempts: None,
            buffer: BufferPolicy::default(),
            set_nodelay: true,
        }
    }
}

impl ClientOptions {
    /// Sets the interval between heartbeats.
    pub fn heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Sets how long the server may stay silent before the link is considered lost.
    pub fn watchdog_timeout(mut self, watchdog_timeout: Duration) -> Self {
        self.watchdog_timeout = watchdog_timeout;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets the initial reconnect delay and its upper bound.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_duration = initial;
        self.max_backoff = max;
        self
    }

    /// Gives up after the given number of reconnect attempts.
    pub fn retry_attempts(mut self, retry_attempts: usize) -> Self {
        self.retry_attempts = Some(retry_attempts);
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
