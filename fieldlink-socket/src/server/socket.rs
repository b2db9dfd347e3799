use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use parking_lot::RwLock;
use tokio::{
    net::{TcpListener, ToSocketAddrs, UdpSocket},
    sync::{oneshot, watch},
};
use tracing::debug;

use fieldlink_wire::Packet;

use super::{driver::ServerDriver, PeerInfo, ServerError, ServerOptions};
use crate::{outbox::Outbox, stats::LinkStats, ConnectionStatus, Parse};

/// The field unit side of a link.
///
/// A server listens on a stream port and a datagram port and serves one client at a time.
/// Packets sent while no client is connected stay in the scheduler until one connects.
///
/// ```no_run
/// use fieldlink_socket::{Parse, Server};
/// use fieldlink_wire::Packet;
///
/// # async fn run() -> Result<(), fieldlink_socket::ServerError> {
/// let parse = Parse::new();
/// parse.set_parse_handler(0xCD, |packet| println!("{:?}", packet.payload()));
///
/// let mut server = Server::new(parse);
/// server.start(2000, 2001).await?;
/// server.send(Packet::new(0xCF, "hello, world"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    /// The server options, shared with the driver.
    options: Arc<ServerOptions>,
    /// Handlers for received packets.
    parse: Parse,
    /// The server stats, shared with the driver.
    stats: Arc<LinkStats>,
    /// The connected client, shared with the driver.
    peer: Arc<RwLock<Option<PeerInfo>>>,
    /// Outgoing packets. Created once the server is bound.
    outbox: Option<Arc<Outbox>>,
    /// Connection status published by the driver.
    status: Option<watch::Receiver<ConnectionStatus>>,
    /// Stops the driver.
    shutdown: Option<oneshot::Sender<()>>,
    stream_addr: Option<SocketAddr>,
    datagram_addr: Option<SocketAddr>,
}

impl Server {
    /// Creates a new server with the default [`ServerOptions`].
    pub fn new(parse: Parse) -> Self {
        Self::with_options(parse, ServerOptions::default())
    }

    /// Creates a new server with the given options.
    pub fn with_options(parse: Parse, options: ServerOptions) -> Self {
        Self {
            options: Arc::new(options),
            parse,
            stats: Arc::default(),
            peer: Arc::default(),
            outbox: None,
            status: None,
            shutdown: None,
            stream_addr: None,
            datagram_addr: None,
        }
    }

    /// Listens on the given stream and datagram ports on all IPv4 interfaces.
    pub async fn start(&mut self, stream_port: u16, datagram_port: u16) -> Result<(), ServerError> {
        self.bind((Ipv4Addr::UNSPECIFIED, stream_port), (Ipv4Addr::UNSPECIFIED, datagram_port))
            .await
    }

    /// Binds the stream listener and the datagram socket, then spawns the driver task.
    pub async fn bind(
        &mut self,
        stream_addr: impl ToSocketAddrs,
        datagram_addr: impl ToSocketAddrs,
    ) -> Result<(), ServerError> {
        if self.shutdown.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let buffer = self.options.buffer.build()?;

        let listener = TcpListener::bind(stream_addr).await?;
        let datagram = UdpSocket::bind(datagram_addr).await?;

        let stream_addr = listener.local_addr()?;
        let datagram_addr = datagram.local_addr()?;
        debug!(stream = %stream_addr, datagram = %datagram_addr, "Server listening");

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let outbox = Arc::new(Outbox::new(buffer));

        let driver = ServerDriver::new(
            listener,
            Arc::new(datagram),
            Arc::clone(&self.options),
            self.parse.clone(),
            Arc::clone(&outbox),
            Arc::clone(&self.stats),
            status_tx,
            Arc::clone(&self.peer),
            shutdown_rx,
        );

        tokio::spawn(driver);

        self.outbox = Some(outbox);
        self.status = Some(status_rx);
        self.shutdown = Some(shutdown_tx);
        self.stream_addr = Some(stream_addr);
        self.datagram_addr = Some(datagram_addr);

        Ok(())
    }

    /// The outbox of a running endpoint. Once the driver has stopped nothing drains it.
    fn outbox(&self) -> Result<&Arc<Outbox>, ServerError> {
        match self.outbox {
            Some(ref outbox) if self.status() != ConnectionStatus::Closed => Ok(outbox),
            _ => Err(ServerError::SocketClosed),
        }
    }

    /// Schedules a packet in the default class.
    ///
    /// Fails with [`ServerError::SocketClosed`] if the endpoint was never started or has stopped.
    pub fn send(&self, packet: Packet) -> Result<(), ServerError> {
        self.outbox()?.push(packet);
        Ok(())
    }

    /// Schedules a packet in the given priority class.
    pub fn send_with_priority(
        &self,
        packet: Packet,
        priority: impl Into<i32>,
    ) -> Result<(), ServerError> {
        self.outbox()?.push_with_priority(packet, priority.into())?;
        Ok(())
    }

    /// Writes a packet right away, ahead of anything scheduled, and waits for the outcome.
    ///
    /// Reliable packets are done once they are flushed to the stream, best-effort packets once
    /// the datagram socket took them. Fails with [`ServerError::NotConnected`] if there is no
    /// client to send to.
    pub async fn send_now(&self, packet: Packet) -> Result<(), ServerError> {
        let outbox = self.outbox()?;
        if !self.status().is_connected() {
            return Err(ServerError::NotConnected);
        }

        match outbox.push_now(packet).await {
            Ok(result) => Ok(result?),
            // Discarded because the link went down first.
            Err(_) => Err(ServerError::NotConnected),
        }
    }

    /// Waits until a client is connected.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ServerError> {
        let mut status = self.status.clone().ok_or(ServerError::SocketClosed)?;

        let result = tokio::time::timeout(timeout, status.wait_for(ConnectionStatus::is_connected))
            .await
            .map(|changed| changed.map(|_| ()));

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ServerError::SocketClosed),
            Err(_) => Err(ServerError::Timeout),
        }
    }

    /// Stops the server and drops the current client.
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        self.outbox = None;
    }

    /// The handler registry of this server.
    pub fn parse(&self) -> &Parse {
        &self.parse
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.as_ref().map_or(ConnectionStatus::Closed, |status| *status.borrow())
    }

    /// The connected client, if any.
    pub fn peer(&self) -> Option<PeerInfo> {
        self.peer.read().clone()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Number of packets waiting to be sent.
    pub fn queued(&self) -> usize {
        self.outbox.as_ref().map_or(0, |outbox| outbox.len())
    }

    /// The local address of the stream listener.
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.stream_addr
    }

    /// The local address of the datagram socket.
    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        self.datagram_addr
    }
}
