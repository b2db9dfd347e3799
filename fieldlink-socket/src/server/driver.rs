use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{future::BoxFuture, Future, FutureExt, SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::{
    net::{TcpListener, TcpStream, UdpSocket},
    sync::{oneshot, watch},
};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use fieldlink_wire::{
    frame::{self, WATCHDOG_FROM_SERVER},
    handshake::{self, Status, PROTOCOL_VERSION},
};

use super::{PeerInfo, ServerError, ServerOptions};
use crate::{
    outbox::Outbox,
    session::{into_frames, Session, SessionConfig},
    stats::LinkStats,
    ConnectionStatus, Parse,
};

/// A connection that completed the handshake.
struct Accepted {
    peer: PeerInfo,
    conn: Framed<TcpStream, frame::Codec>,
}

enum State {
    /// Waiting for a client.
    Idle,
    /// A client is going through the handshake.
    Handshake(BoxFuture<'static, Result<Accepted, ServerError>>),
    /// A client is connected.
    Active(Session),
}

pub(crate) struct ServerDriver {
    /// Accepts stream connections.
    listener: TcpListener,
    /// The datagram socket, shared with every session.
    datagram: Arc<UdpSocket>,
    options: Arc<ServerOptions>,
    parse: Parse,
    outbox: Arc<Outbox>,
    stats: Arc<LinkStats>,
    /// Publishes the connection status to the server front-end.
    status: watch::Sender<ConnectionStatus>,
    /// The connected client, shared with the server front-end.
    peer: Arc<RwLock<Option<PeerInfo>>>,
    /// Fires (or is dropped) when the server shuts down.
    shutdown: oneshot::Receiver<()>,
    state: State,
}

impl ServerDriver {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        listener: TcpListener,
        datagram: Arc<UdpSocket>,
        options: Arc<ServerOptions>,
        parse: Parse,
        outbox: Arc<Outbox>,
        stats: Arc<LinkStats>,
        status: watch::Sender<ConnectionStatus>,
        peer: Arc<RwLock<Option<PeerInfo>>>,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            datagram,
            options,
            parse,
            outbox,
            stats,
            status,
            peer,
            shutdown,
            state: State::Idle,
        }
    }

    fn on_accepted(&mut self, accepted: Accepted) {
        info!(name = %accepted.peer.name, peer = %accepted.peer.addr, "Client connected");

        let config = SessionConfig {
            heartbeat_channel: WATCHDOG_FROM_SERVER,
            heartbeat_interval: self.options.heartbeat_interval,
            watchdog_timeout: self.options.watchdog_timeout,
        };

        let session = Session::new(
            accepted.peer.addr,
            accepted.conn,
            Arc::clone(&self.datagram),
            accepted.peer.datagram_addr,
            Arc::clone(&self.outbox),
            self.parse.clone(),
            Arc::clone(&self.stats),
            config,
        );

        *self.peer.write() = Some(accepted.peer);
        self.state = State::Active(session);
        self.status.send_replace(ConnectionStatus::Connected);
    }

    fn on_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if !matches!(self.state, State::Idle) {
            warn!(%addr, "Rejecting connection, a client is already connected");
            tokio::spawn(reject_busy(stream, Arc::clone(&self.options)));
            return;
        }

        debug!(%addr, "New connection, starting handshake");
        let handshake = accept_handshake(stream, addr, Arc::clone(&self.options));
        self.state = State::Handshake(Box::pin(handshake));
    }
}

impl Future for ServerDriver {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if this.shutdown.poll_unpin(cx).is_ready() {
                debug!("Server shutting down");
                this.state = State::Idle;
                *this.peer.write() = None;
                this.status.send_replace(ConnectionStatus::Closed);
                return Poll::Ready(());
            }

            // Packets sent now have nowhere to go without a session.
            if !matches!(this.state, State::Active(_)) {
                this.outbox.clear_immediate();
            }

            match this.state {
                State::Handshake(ref mut fut) => {
                    if let Poll::Ready(result) = fut.poll_unpin(cx) {
                        this.state = State::Idle;

                        match result {
                            Ok(accepted) => this.on_accepted(accepted),
                            Err(e) => warn!(err = ?e, "Handshake failed"),
                        }

                        continue;
                    }
                }
                State::Active(ref mut session) => {
                    if let Poll::Ready(reason) = session.poll_unpin(cx) {
                        let peer = this.peer.write().take();
                        info!(peer = ?peer.map(|p| p.name), %reason, "Client disconnected");

                        this.state = State::Idle;
                        this.status.send_replace(ConnectionStatus::Disconnected);
                        continue;
                    }
                }
                State::Idle => {}
            }

            // Poll the listener for new incoming connections
            match this.listener.poll_accept(cx) {
                Poll::Ready(Ok((stream, addr))) => {
                    this.on_connection(stream, addr);
                    continue;
                }
                Poll::Ready(Err(e)) => {
                    error!(err = ?e, "Error accepting connection");
                    continue;
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}

/// Runs the server side of the handshake on a fresh connection.
async fn accept_handshake(
    stream: TcpStream,
    addr: SocketAddr,
    options: Arc<ServerOptions>,
) -> Result<Accepted, ServerError> {
    stream.set_nodelay(options.set_nodelay)?;

    let mut conn = Framed::new(stream, handshake::Codec::new_server());

    let hello = tokio::time::timeout(options.handshake_timeout, conn.next())
        .await
        .map_err(|_| ServerError::Timeout)?
        .ok_or(ServerError::SocketClosed)??;

    let handshake::Message::Hello { version, datagram_port, name } = hello else {
        return Err(ServerError::SocketClosed);
    };

    let name = String::from_utf8(name.to_vec()).ok().filter(|name| !name.is_empty());

    let status = match name {
        _ if version != PROTOCOL_VERSION => Status::IncompatibleVersion,
        None => Status::InvalidName,
        Some(_) => Status::Okay,
    };

    conn.send(handshake::Message::Ack(status)).await?;

    let Some(name) = name.filter(|_| status == Status::Okay) else {
        debug!(%addr, version, ?status, "Rejected client");
        return Err(ServerError::Rejected(status));
    };

    let peer = PeerInfo { name, addr, datagram_addr: SocketAddr::new(addr.ip(), datagram_port) };

    Ok(Accepted { peer, conn: into_frames(conn) })
}

/// Answers a connection with [`Status::Busy`] and closes it.
async fn reject_busy(stream: TcpStream, options: Arc<ServerOptions>) {
    let mut conn = Framed::new(stream, handshake::Codec::new_server());

    // Wait for the hello so the client is listening for our answer.
    if let Ok(Some(Ok(_))) = tokio::time::timeout(options.handshake_timeout, conn.next()).await {
        if let Err(e) = conn.send(handshake::Message::Ack(Status::Busy)).await {
            debug!(err = ?e, "Failed to reject connection");
        }
    }
}
