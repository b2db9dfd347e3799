//! Handshake exchanged on a fresh stream connection before any packet is framed.
//!
//! The client announces its protocol version, the local port of its datagram socket and its
//! name. The server answers with a single status octet.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// The ID of the handshake codec on the wire.
const WIRE_ID: u8 = 0x01;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Longest client name accepted by the server.
pub const MAX_NAME_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Invalid wire ID: {0}")]
    WireId(u8),
    #[error("Invalid handshake status: {0}")]
    InvalidStatus(u8),
    #[error("Client name too long: {0} bytes")]
    NameTooLong(usize),
}

/// The server's answer to a client hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The connection is accepted.
    Okay = 0,
    /// The client announced an empty or non UTF-8 name.
    InvalidName = 1,
    /// The client speaks a different protocol version.
    IncompatibleVersion = 2,
    /// The server already has a peer.
    Busy = 3,
}

impl TryFrom<u8> for Status {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Okay),
            1 => Ok(Self::InvalidName),
            2 => Ok(Self::IncompatibleVersion),
            3 => Ok(Self::Busy),
            other => Err(Error::InvalidStatus(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The client introduces itself.
    Hello {
        version: u8,
        /// Local port of the client's datagram socket.
        datagram_port: u16,
        name: Bytes,
    },
    /// The server accepts or rejects the client.
    Ack(Status),
}

impl Message {
    /// Creates a hello for the current protocol version.
    pub fn hello(datagram_port: u16, name: impl Into<Bytes>) -> Self {
        Self::Hello { version: PROTOCOL_VERSION, datagram_port, name: name.into() }
    }
}

#[derive(Debug, Clone)]
enum State {
    /// Waiting for the client hello
    HelloReceive,
    /// Waiting for the server ack
    Ack,
}

/// Handshake codec.
#[derive(Debug)]
pub struct Codec {
    state: State,
}

impl Codec {
    /// Creates a new handshake codec for a client, waiting for the server's ack.
    pub fn new_client() -> Self {
        Self { state: State::Ack }
    }

    /// Creates a new handshake codec for a server, waiting for the client's hello.
    pub fn new_server() -> Self {
        Self { state: State::HelloReceive }
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // Wire ID check (without advancing the cursor)
        let wire_id = src[0];
        if wire_id != WIRE_ID {
            return Err(Error::WireId(wire_id));
        }

        match self.state {
            // We are the server, waiting for the client to introduce itself
            State::HelloReceive => {
                // wire id + version + port + name length
                const FIXED: usize = 1 + 1 + 2 + 4;

                if src.len() < FIXED {
                    return Ok(None);
                }

                let name_len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                if name_len > MAX_NAME_LEN {
                    return Err(Error::NameTooLong(name_len));
                }

                if src.len() < FIXED + name_len {
                    tracing::trace!("not enough bytes for client name");
                    return Ok(None);
                }

                src.advance(1);
                let version = src.get_u8();
                let datagram_port = src.get_u16();
                src.advance(4);
                let name = src.split_to(name_len).freeze();

                self.state = State::Ack;
                Ok(Some(Message::Hello { version, datagram_port, name }))
            }
            // We are the client, waiting for the server to answer
            State::Ack => {
                if src.len() < 2 {
                    return Ok(None);
                }

                src.advance(1);
                let status = Status::try_from(src.get_u8())?;

                Ok(Some(Message::Ack(status)))
            }
        }
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            // We are the client, sending our hello
            Message::Hello { version, datagram_port, name } => {
                if name.len() > MAX_NAME_LEN {
                    return Err(Error::NameTooLong(name.len()));
                }

                self.state = State::Ack;
                dst.reserve(1 + 1 + 2 + 4 + name.len());
                dst.put_u8(WIRE_ID);
                dst.put_u8(version);
                dst.put_u16(datagram_port);
                dst.put_u32(name.len() as u32);
                dst.put(name);
            }
            // We are the server, answering the hello
            Message::Ack(status) => {
                dst.reserve(1 + 1);
                dst.put_u8(WIRE_ID);
                dst.put_u8(status as u8);
            }
        }

        Ok(())
    }
}
