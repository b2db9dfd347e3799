//! Client and server endpoints of a fieldlink link.
//!
//! A [`Server`] listens on a stream port and a datagram port and accepts a single [`Client`].
//! Reliable packets, the handshake and heartbeats travel over the stream connection,
//! best-effort packets travel as datagrams. Outgoing packets go through the scheduler chosen by
//! the endpoint's [`BufferPolicy`], incoming packets are routed by channel through a [`Parse`]
//! registry.

use std::time::Duration;

mod backoff;
mod outbox;
mod session;

mod parse;
pub use parse::{Handler, Parse};

mod policy;
pub use policy::BufferPolicy;

mod stats;
pub use stats::LinkStats;

mod client;
pub use client::{Client, ClientError, ClientOptions};

mod server;
pub use server::{PeerInfo, Server, ServerError, ServerOptions};

/// Interval between heartbeats on an idle link.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Silence after which a link is considered lost.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the handshake on a fresh connection.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// State of an endpoint's link, published whenever it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// The client is establishing a connection.
    Connecting,
    /// A session with the peer is active.
    Connected,
    /// No peer. A server waits for the next client, a client retries after a backoff.
    Disconnected,
    /// The endpoint was shut down or gave up reconnecting.
    Closed,
}

impl ConnectionStatus {
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}
