use std::{
    fmt, io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::{Future, FutureExt, SinkExt, StreamExt};
use tokio::{
    io::ReadBuf,
    net::{TcpStream, UdpSocket},
    sync::oneshot,
    time::{Instant, Interval, MissedTickBehavior, Sleep},
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, error, trace, warn};

use fieldlink_wire::{frame, handshake, Delivery, Packet};

use crate::{
    outbox::{Immediate, Outbox, Outgoing},
    stats::LinkStats,
    Parse,
};

/// Stop pulling from the scheduler once this many bytes wait to be flushed.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Largest datagram we can receive.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Swaps the handshake codec for the frame codec, keeping anything already read.
pub(crate) fn into_frames(
    conn: Framed<TcpStream, handshake::Codec>,
) -> Framed<TcpStream, frame::Codec> {
    let parts = conn.into_parts();
    let mut frames = FramedParts::new(parts.io, frame::Codec::new());
    frames.read_buf = parts.read_buf;
    frames.write_buf = parts.write_buf;
    Framed::from_parts(frames)
}

/// Timing of an active session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionConfig {
    /// Channel of the heartbeats this side sends.
    pub(crate) heartbeat_channel: u8,
    pub(crate) heartbeat_interval: Duration,
    /// Silence from the peer after which the link is considered lost.
    pub(crate) watchdog_timeout: Duration,
}

/// Why a session ended.
#[derive(Debug)]
pub(crate) enum Disconnect {
    /// The peer closed the stream.
    PeerClosed,
    /// Nothing was received for the watchdog timeout.
    WatchdogExpired,
    /// Reading or writing the stream failed.
    Failed(frame::Error),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::WatchdogExpired => write!(f, "watchdog expired"),
            Self::Failed(e) => write!(f, "connection failed: {e}"),
        }
    }
}

/// An established link with a peer.
///
/// Drains the endpoint's scheduler onto the stream (reliable packets) or the datagram socket
/// (best-effort packets), sends heartbeats, and hands every received packet to the [`Parse`]
/// registry.
pub(crate) struct Session {
    /// The peer's stream address.
    peer: SocketAddr,
    /// The framed stream connection.
    conn: Framed<TcpStream, frame::Codec>,
    /// The datagram socket shared with the endpoint.
    datagram: Arc<UdpSocket>,
    /// Where best-effort packets go, and the only accepted datagram source.
    datagram_peer: SocketAddr,
    /// Receive buffer for datagrams.
    recv_buf: Box<[u8]>,
    /// Encode buffer for datagrams.
    send_buf: BytesMut,
    outbox: Arc<Outbox>,
    /// Immediate senders waiting for their packet to be flushed.
    unflushed: Vec<oneshot::Sender<Result<(), frame::Error>>>,
    parse: Parse,
    stats: Arc<LinkStats>,
    config: SessionConfig,
    heartbeat: Interval,
    watchdog: Pin<Box<Sleep>>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        peer: SocketAddr,
        conn: Framed<TcpStream, frame::Codec>,
        datagram: Arc<UdpSocket>,
        datagram_peer: SocketAddr,
        outbox: Arc<Outbox>,
        parse: Parse,
        stats: Arc<LinkStats>,
        config: SessionConfig,
    ) -> Self {
        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        stats.increment_sessions();

        Self {
            peer,
            conn,
            datagram,
            datagram_peer,
            recv_buf: vec![0; MAX_DATAGRAM_SIZE].into_boxed_slice(),
            send_buf: BytesMut::new(),
            outbox,
            unflushed: Vec::new(),
            parse,
            stats,
            config,
            heartbeat,
            watchdog: Box::pin(tokio::time::sleep(config.watchdog_timeout)),
        }
    }

    /// Writes an outgoing packet to the stream buffer or sends it as a datagram.
    fn on_outgoing(&mut self, packet: Packet) -> Result<(), frame::Error> {
        let len = packet.len();

        if len > frame::MAX_PAYLOAD_SIZE as usize {
            warn!(channel = packet.channel(), len, "Dropping oversized packet");
            return Ok(());
        }

        match packet.delivery() {
            Delivery::Reliable => {
                trace!(channel = packet.channel(), len, "Sending packet");
                self.conn.start_send_unpin(packet)?;
                self.stats.increment_tx(len);
            }
            Delivery::BestEffort => {
                let channel = packet.channel();
                frame::encode_datagram(packet, &mut self.send_buf)?;
                let datagram = self.send_buf.split();

                match self.datagram.try_send_to(&datagram, self.datagram_peer) {
                    Ok(_) => {
                        trace!(channel, len, "Sent datagram");
                        self.stats.increment_tx(len);
                    }
                    Err(e) => {
                        // Best-effort: drop instead of waiting for the socket.
                        debug!(err = ?e, channel, "Dropping datagram");
                        self.stats.increment_datagrams_dropped();
                    }
                }
            }
        }

        Ok(())
    }

    /// Writes a packet that skipped the scheduler and reports the outcome to its sender.
    ///
    /// Reliable packets are reported once the stream is flushed, datagrams as soon as the socket
    /// took them.
    fn on_immediate(&mut self, Immediate { packet, sent }: Immediate) {
        let channel = packet.channel();
        let len = packet.len();

        let result = match packet.delivery() {
            Delivery::Reliable => match self.conn.start_send_unpin(packet) {
                Ok(()) => {
                    trace!(channel, len, "Sending packet now");
                    self.stats.increment_tx(len);
                    self.unflushed.push(sent);
                    return;
                }
                Err(e) => Err(e),
            },
            Delivery::BestEffort => self.send_datagram_now(packet),
        };

        if let Err(ref e) = result {
            debug!(err = ?e, channel, "Failed to send packet now");
        }

        let _ = sent.send(result);
    }

    fn send_datagram_now(&mut self, packet: Packet) -> Result<(), frame::Error> {
        let len = packet.len();
        frame::encode_datagram(packet, &mut self.send_buf)?;
        let datagram = self.send_buf.split();

        self.datagram.try_send_to(&datagram, self.datagram_peer)?;
        self.stats.increment_tx(len);
        Ok(())
    }

    /// Reports the outcome of a flush to every immediate sender waiting on it.
    fn on_flushed(&mut self, flushed: bool) {
        for sent in self.unflushed.drain(..) {
            let outcome = if flushed {
                Ok(())
            } else {
                Err(io::Error::from(io::ErrorKind::BrokenPipe).into())
            };
            let _ = sent.send(outcome);
        }
    }

    /// Handles a packet from the peer.
    fn on_incoming(&mut self, packet: Packet) {
        // Any traffic proves the peer is alive.
        self.watchdog.as_mut().reset(Instant::now() + self.config.watchdog_timeout);

        if frame::is_reserved(packet.channel()) {
            trace!(channel = packet.channel(), "Heartbeat received");
            return;
        }

        self.stats.increment_rx(packet.len());
        if !self.parse.dispatch(packet) {
            self.stats.increment_unhandled();
        }
    }

    #[inline]
    fn heartbeat_packet(&self) -> Packet {
        Packet::new(self.config.heartbeat_channel, Bytes::new())
    }
}

impl Future for Session {
    type Output = Disconnect;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            // Pull from the scheduler while the write buffer has room. The scheduler decides
            // the order, so we take one packet at a time.
            if this.conn.write_buffer().len() < WRITE_BUFFER_SIZE {
                if let Poll::Ready(outgoing) = this.outbox.poll_next(cx) {
                    let packet = match outgoing {
                        Outgoing::Scheduled(packet) => packet,
                        Outgoing::Immediate(immediate) => {
                            this.on_immediate(immediate);
                            continue;
                        }
                    };

                    if let Err(e) = this.on_outgoing(packet) {
                        error!(err = ?e, peer = %this.peer, "Failed to send packet");
                        let _ = this.conn.poll_close_unpin(cx);
                        return Poll::Ready(Disconnect::Failed(e));
                    }

                    continue;
                }
            }

            if !this.conn.write_buffer().is_empty() {
                match this.conn.poll_flush_unpin(cx) {
                    // The buffer is empty again, go back to the scheduler.
                    Poll::Ready(Ok(())) => {
                        this.on_flushed(true);
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        this.on_flushed(false);
                        error!(err = ?e, peer = %this.peer, "Failed to flush connection");
                        let _ = this.conn.poll_close_unpin(cx);
                        return Poll::Ready(Disconnect::Failed(e));
                    }
                    Poll::Pending => {}
                }
            }

            if this.heartbeat.poll_tick(cx).is_ready() {
                let heartbeat = this.heartbeat_packet();
                if let Err(e) = this.conn.start_send_unpin(heartbeat) {
                    error!(err = ?e, peer = %this.peer, "Failed to send heartbeat");
                    return Poll::Ready(Disconnect::Failed(e));
                }

                continue;
            }

            if this.watchdog.poll_unpin(cx).is_ready() {
                warn!(peer = %this.peer, timeout = ?this.config.watchdog_timeout, "Watchdog expired");
                let _ = this.conn.poll_close_unpin(cx);
                return Poll::Ready(Disconnect::WatchdogExpired);
            }

            // Handle incoming packets from the stream
            if let Poll::Ready(item) = this.conn.poll_next_unpin(cx) {
                match item {
                    Some(Ok(packet)) => {
                        this.on_incoming(packet);
                        continue;
                    }
                    Some(Err(e)) => {
                        error!(err = ?e, peer = %this.peer, "Error reading from connection");
                        let _ = this.conn.poll_close_unpin(cx);
                        return Poll::Ready(Disconnect::Failed(e));
                    }
                    None => {
                        debug!(peer = %this.peer, "Connection closed by peer");
                        return Poll::Ready(Disconnect::PeerClosed);
                    }
                }
            }

            // Handle incoming datagrams
            let mut buf = ReadBuf::new(&mut this.recv_buf);
            if let Poll::Ready(result) = this.datagram.poll_recv_from(cx, &mut buf) {
                match result {
                    Ok(from) if from == this.datagram_peer => {
                        match frame::decode_datagram(buf.filled()) {
                            Ok(packet) => this.on_incoming(packet),
                            Err(e) => warn!(err = ?e, %from, "Invalid datagram"),
                        }
                    }
                    Ok(from) => {
                        debug!(%from, expected = %this.datagram_peer, "Ignoring stray datagram");
                    }
                    Err(e) => {
                        debug!(err = ?e, "Error receiving datagram");
                    }
                }

                continue;
            }

            return Poll::Pending;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("datagram_peer", &self.datagram_peer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
