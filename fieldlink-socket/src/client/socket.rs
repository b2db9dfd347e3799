use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    net::{lookup_host, UdpSocket},
    sync::{oneshot, watch},
};
use tracing::debug;

use fieldlink_wire::Packet;

use super::{
    driver::{ClientDriver, Target},
    ClientError, ClientOptions,
};
use crate::{outbox::Outbox, stats::LinkStats, ConnectionStatus, Parse};

/// The controller side of a link.
///
/// Once started, the client keeps connecting to its server in the background and reconnects
/// with an exponential backoff when the link is lost. Packets sent while disconnected stay in
/// the scheduler and go out once the link is back.
///
/// ```no_run
/// use std::time::Duration;
///
/// use fieldlink_socket::{Client, Parse};
/// use fieldlink_wire::Packet;
///
/// # async fn run() -> Result<(), fieldlink_socket::ClientError> {
/// let mut client = Client::new(Parse::new());
/// client.start("127.0.0.1", 2000, 2001, "TestClient").await?;
/// client.wait_connected(Duration::from_secs(5)).await?;
/// client.send(Packet::new(0xCD, "Hello, World!"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    /// The client options, shared with the driver.
    options: Arc<ClientOptions>,
    /// Handlers for received packets.
    parse: Parse,
    /// The client stats, shared with the driver.
    stats: Arc<LinkStats>,
    /// Outgoing packets. Created once the client is started.
    outbox: Option<Arc<Outbox>>,
    /// Connection status published by the driver.
    status: Option<watch::Receiver<ConnectionStatus>>,
    /// Stops the driver.
    shutdown: Option<oneshot::Sender<()>>,
    /// The server's stream address.
    server_addr: Option<SocketAddr>,
    /// The local address of the datagram socket.
    datagram_addr: Option<SocketAddr>,
}

impl Client {
    /// Creates a new client with the default [`ClientOptions`].
    pub fn new(parse: Parse) -> Self {
        Self::with_options(parse, ClientOptions::default())
    }

    /// Creates a new client with the given options.
    pub fn with_options(parse: Parse, options: ClientOptions) -> Self {
        Self {
            options: Arc::new(options),
            parse,
            stats: Arc::default(),
            outbox: None,
            status: None,
            shutdown: None,
            server_addr: None,
            datagram_addr: None,
        }
    }

    /// Resolves `host` and starts connecting to its stream and datagram ports, announcing the
    /// client as `name`. IPv4 addresses are preferred when `host` resolves to both families.
    ///
    /// Returns once the driver is running. Use [`Client::wait_connected`] to wait for the link.
    pub async fn start(
        &mut self,
        host: &str,
        stream_port: u16,
        datagram_port: u16,
        name: impl Into<String>,
    ) -> Result<(), ClientError> {
        let resolved: Vec<SocketAddr> = lookup_host((host, stream_port)).await?.collect();

        let ip = preferred_addr(&resolved)
            .ok_or_else(|| ClientError::UnknownHost(host.to_owned()))?
            .ip();

        let stream_addr = SocketAddr::new(ip, stream_port);
        let datagram_addr = SocketAddr::new(ip, datagram_port);

        self.connect(stream_addr, datagram_addr, name).await
    }

    /// Starts connecting to the given server addresses.
    pub async fn connect(
        &mut self,
        stream_addr: SocketAddr,
        datagram_addr: SocketAddr,
        name: impl Into<String>,
    ) -> Result<(), ClientError> {
        if self.shutdown.is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        let buffer = self.options.buffer.build()?;

        let local: SocketAddr = if stream_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let datagram = UdpSocket::bind(local).await?;
        let local_datagram_addr = datagram.local_addr()?;

        let name = name.into();
        debug!(server = %stream_addr, datagram = %local_datagram_addr, %name, "Starting client");

        let target = Target { stream_addr, datagram_addr, name: Bytes::from(name) };

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let outbox = Arc::new(Outbox::new(buffer));

        let driver = ClientDriver::new(
            target,
            Arc::new(datagram),
            Arc::clone(&self.options),
            self.parse.clone(),
            Arc::clone(&outbox),
            Arc::clone(&self.stats),
            status_tx,
            shutdown_rx,
        );

        tokio::spawn(driver);

        self.outbox = Some(outbox);
        self.status = Some(status_rx);
        self.shutdown = Some(shutdown_tx);
        self.server_addr = Some(stream_addr);
        self.datagram_addr = Some(local_datagram_addr);

        Ok(())
    }

    /// The outbox of a running endpoint. Once the driver has stopped nothing drains it.
    fn outbox(&self) -> Result<&Arc<Outbox>, ClientError> {
        match self.outbox {
            Some(ref outbox) if self.status() != ConnectionStatus::Closed => Ok(outbox),
            _ => Err(ClientError::SocketClosed),
        }
    }

    /// Schedules a packet in the default class.
    ///
    /// Fails with [`ClientError::SocketClosed`] if the endpoint was never started or has stopped.
    pub fn send(&self, packet: Packet) -> Result<(), ClientError> {
        self.outbox()?.push(packet);
        Ok(())
    }

    /// Schedules a packet in the given priority class.
    ///
    /// Accepts a raw class index or a [`Priority`](fieldlink_queue::Priority) level.
    pub fn send_with_priority(
        &self,
        packet: Packet,
        priority: impl Into<i32>,
    ) -> Result<(), ClientError> {
        self.outbox()?.push_with_priority(packet, priority.into())?;
        Ok(())
    }

    /// Writes a packet right away, ahead of anything scheduled, and waits for the outcome.
    ///
    /// Reliable packets are done once they are flushed to the stream, best-effort packets once
    /// the datagram socket took them. Fails with [`ClientError::NotConnected`] if there is no
    /// server to send to.
    pub async fn send_now(&self, packet: Packet) -> Result<(), ClientError> {
        let outbox = self.outbox()?;
        if !self.status().is_connected() {
            return Err(ClientError::NotConnected);
        }

        match outbox.push_now(packet).await {
            Ok(result) => Ok(result?),
            // Discarded because the link went down first.
            Err(_) => Err(ClientError::NotConnected),
        }
    }

    /// Waits until the link to the server is up.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut status = self.status.clone().ok_or(ClientError::SocketClosed)?;

        let result = tokio::time::timeout(timeout, status.wait_for(ConnectionStatus::is_connected))
            .await
            .map(|changed| changed.map(|_| ()));

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::SocketClosed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Closes the link and stops reconnecting.
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        self.outbox = None;
    }

    /// The handler registry of this client.
    pub fn parse(&self) -> &Parse {
        &self.parse
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.as_ref().map_or(ConnectionStatus::Closed, |status| *status.borrow())
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Number of packets waiting to be sent.
    pub fn queued(&self) -> usize {
        self.outbox.as_ref().map_or(0, |outbox| outbox.len())
    }

    /// The server's stream address.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    /// The local address of the datagram socket.
    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        self.datagram_addr
    }
}

/// Picks the address to connect to, IPv4 first since `Server::start` only listens on IPv4.
fn preferred_addr(resolved: &[SocketAddr]) -> Option<SocketAddr> {
    resolved.iter().find(|addr| addr.is_ipv4()).or_else(|| resolved.first()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_ipv4() {
        let v6: SocketAddr = "[::1]:2000".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:2000".parse().unwrap();

        assert_eq!(preferred_addr(&[v6, v4]), Some(v4));
        assert_eq!(preferred_addr(&[v6]), Some(v6));
        assert_eq!(preferred_addr(&[]), None);
    }

    #[tokio::test]
    async fn send_before_start_fails() {
        let client = Client::new(Parse::new());

        assert!(matches!(client.send(Packet::new(1, "x")), Err(ClientError::SocketClosed)));
        assert!(matches!(
            client.send_now(Packet::new(1, "x")).await,
            Err(ClientError::SocketClosed)
        ));
        assert_eq!(client.status(), ConnectionStatus::Closed);
    }
}
