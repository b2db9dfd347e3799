use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{future::BoxFuture, Future, FutureExt, SinkExt, StreamExt};
use tokio::{
    net::{TcpStream, UdpSocket},
    sync::{oneshot, watch},
};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use fieldlink_wire::{
    frame::{self, WATCHDOG_FROM_CLIENT},
    handshake::{self, Status},
};

use super::{ClientError, ClientOptions};
use crate::{
    backoff::ExponentialBackoff,
    outbox::Outbox,
    session::{into_frames, Session, SessionConfig},
    stats::LinkStats,
    ConnectionStatus, Parse,
};

type Connecting = BoxFuture<'static, Result<Framed<TcpStream, frame::Codec>, ClientError>>;

enum State {
    /// Connecting and going through the handshake.
    Connecting(Connecting),
    /// The link is up.
    Active(Session),
    /// Waiting before the next connection attempt.
    Backoff,
}

/// Where and as whom the client connects.
#[derive(Debug, Clone)]
pub(super) struct Target {
    /// The server's stream address.
    pub(super) stream_addr: SocketAddr,
    /// The server's datagram address.
    pub(super) datagram_addr: SocketAddr,
    /// The name announced in the handshake.
    pub(super) name: Bytes,
}

pub(crate) struct ClientDriver {
    target: Target,
    /// The local datagram socket, kept across reconnects.
    datagram: Arc<UdpSocket>,
    options: Arc<ClientOptions>,
    parse: Parse,
    outbox: Arc<Outbox>,
    stats: Arc<LinkStats>,
    /// Publishes the connection status to the client front-end.
    status: watch::Sender<ConnectionStatus>,
    /// Fires (or is dropped) when the client shuts down.
    shutdown: oneshot::Receiver<()>,
    backoff: ExponentialBackoff,
    state: State,
}

impl ClientDriver {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        target: Target,
        datagram: Arc<UdpSocket>,
        options: Arc<ClientOptions>,
        parse: Parse,
        outbox: Arc<Outbox>,
        stats: Arc<LinkStats>,
        status: watch::Sender<ConnectionStatus>,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        let backoff = new_backoff(&options);
        let state = State::Connecting(connect(target.clone(), Arc::clone(&datagram), &options));

        Self {
            target,
            datagram,
            options,
            parse,
            outbox,
            stats,
            status,
            shutdown,
            backoff,
            state,
        }
    }

    fn on_connected(&mut self, conn: Framed<TcpStream, frame::Codec>) {
        info!(server = %self.target.stream_addr, "Connected");

        let config = SessionConfig {
            heartbeat_channel: WATCHDOG_FROM_CLIENT,
            heartbeat_interval: self.options.heartbeat_interval,
            watchdog_timeout: self.options.watchdog_timeout,
        };

        let session = Session::new(
            self.target.stream_addr,
            conn,
            Arc::clone(&self.datagram),
            self.target.datagram_addr,
            Arc::clone(&self.outbox),
            self.parse.clone(),
            Arc::clone(&self.stats),
            config,
        );

        self.backoff = new_backoff(&self.options);
        self.state = State::Active(session);
        self.status.send_replace(ConnectionStatus::Connected);
    }

    fn close(&mut self) -> Poll<()> {
        self.state = State::Backoff;
        self.status.send_replace(ConnectionStatus::Closed);
        Poll::Ready(())
    }
}

impl Future for ClientDriver {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if this.shutdown.poll_unpin(cx).is_ready() {
                debug!("Client shutting down");
                return this.close();
            }

            // Packets sent now have nowhere to go without a session.
            if !matches!(this.state, State::Active(_)) {
                this.outbox.clear_immediate();
            }

            match this.state {
                State::Connecting(ref mut fut) => match fut.poll_unpin(cx) {
                    Poll::Ready(Ok(conn)) => {
                        this.on_connected(conn);
                        continue;
                    }
                    Poll::Ready(Err(ClientError::Rejected(status))) if status != Status::Busy => {
                        error!(?status, "Rejected by server, not retrying");
                        return this.close();
                    }
                    Poll::Ready(Err(e)) => {
                        warn!(err = ?e, server = %this.target.stream_addr, "Failed to connect");
                        this.state = State::Backoff;
                        this.status.send_replace(ConnectionStatus::Disconnected);
                        continue;
                    }
                    Poll::Pending => {}
                },
                State::Active(ref mut session) => {
                    if let Poll::Ready(reason) = session.poll_unpin(cx) {
                        warn!(%reason, server = %this.target.stream_addr, "Link lost");
                        this.state = State::Backoff;
                        this.status.send_replace(ConnectionStatus::Disconnected);
                        continue;
                    }
                }
                State::Backoff => match this.backoff.poll_next_unpin(cx) {
                    Poll::Ready(Some(delay)) => {
                        debug!(?delay, "Reconnecting");
                        let datagram = Arc::clone(&this.datagram);
                        let connecting = connect(this.target.clone(), datagram, &this.options);
                        this.state = State::Connecting(connecting);
                        this.status.send_replace(ConnectionStatus::Connecting);
                        continue;
                    }
                    Poll::Ready(None) => {
                        error!(server = %this.target.stream_addr, "Giving up reconnecting");
                        return this.close();
                    }
                    Poll::Pending => {}
                },
            }

            return Poll::Pending;
        }
    }
}

fn new_backoff(options: &ClientOptions) -> ExponentialBackoff {
    ExponentialBackoff::new(options.backoff_duration, options.max_backoff, options.retry_attempts)
}

/// Connects to the server and runs the client side of the handshake.
fn connect(target: Target, datagram: Arc<UdpSocket>, options: &Arc<ClientOptions>) -> Connecting {
    let options = Arc::clone(options);

    Box::pin(async move {
        let stream =
            tokio::time::timeout(options.connect_timeout, TcpStream::connect(target.stream_addr))
                .await
                .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(options.set_nodelay)?;

        let mut conn = Framed::new(stream, handshake::Codec::new_client());
        let datagram_port = datagram.local_addr()?.port();
        conn.send(handshake::Message::hello(datagram_port, target.name)).await?;

        let ack = tokio::time::timeout(options.handshake_timeout, conn.next())
            .await
            .map_err(|_| ClientError::Timeout)?
            .ok_or(ClientError::SocketClosed)??;

        match ack {
            handshake::Message::Ack(Status::Okay) => Ok(into_frames(conn)),
            handshake::Message::Ack(status) => Err(ClientError::Rejected(status)),
            handshake::Message::Hello { .. } => Err(ClientError::SocketClosed),
        }
    })
}
