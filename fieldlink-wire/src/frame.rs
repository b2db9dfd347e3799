//! Packet framing used on both the stream connection and the datagram socket.
//!
//! ```text
//! | wire id (u8) | channel (u8) | timestamp (u64) | payload size (u32) | payload |
//! ```

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use fieldlink_common::{constants::MiB, unix_micros};

use crate::{Delivery, Message, Packet};

/// The ID of the frame codec on the wire.
const WIRE_ID: u8 = 0x02;

/// Size of the frame header, including the wire ID.
pub const HEADER_LEN: usize = 1 + 1 + 8 + 4;

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD_SIZE: u32 = 16 * MiB;

/// Heartbeat sent by the server to keep the client's watchdog fed.
pub const WATCHDOG_FROM_SERVER: u8 = 0xF0;

/// Heartbeat sent by the client to keep the server's watchdog fed.
pub const WATCHDOG_FROM_CLIENT: u8 = 0xF1;

/// Channels at or above this value are used by the link itself.
pub const RESERVED_CHANNELS: u8 = 0xF0;

/// Returns `true` if the channel is reserved for link control traffic.
#[inline]
pub const fn is_reserved(channel: u8) -> bool {
    channel >= RESERVED_CHANNELS
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Invalid wire ID: {0}")]
    WireId(u8),
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(u32),
    #[error("Truncated datagram: {0} bytes")]
    Truncated(usize),
}

#[derive(Debug, Clone, Copy)]
struct Header {
    channel: u8,
    timestamp: u64,
    size: u32,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Header,
    Payload(Header),
}

/// Packet frame codec.
#[derive(Debug, Default)]
pub struct Codec {
    /// The current state of the decoder.
    state: State,
    /// Delivery mode assigned to decoded packets.
    delivery: Delivery,
}

impl Codec {
    /// Creates a codec for the stream connection. Decoded packets are [`Delivery::Reliable`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec whose decoded packets carry the given delivery mode.
    pub fn new_with_delivery(delivery: Delivery) -> Self {
        Self { state: State::Header, delivery }
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    // Wire ID check (without advancing the cursor)
                    let wire_id = src[0];
                    if wire_id != WIRE_ID {
                        return Err(Error::WireId(wire_id));
                    }

                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }

                    src.advance(1);

                    let header = Header {
                        channel: src.get_u8(),
                        timestamp: src.get_u64(),
                        size: src.get_u32(),
                    };

                    if header.size > MAX_PAYLOAD_SIZE {
                        return Err(Error::PayloadTooLarge(header.size));
                    }

                    src.reserve(header.size as usize);
                    self.state = State::Payload(header);
                }
                State::Payload(header) => {
                    if src.len() < header.size as usize {
                        return Ok(None);
                    }

                    let payload = src.split_to(header.size as usize).freeze();
                    let packet = Packet::from_message(
                        Message { channel: header.channel, payload },
                        self.delivery,
                    )
                    .with_timestamp(header.timestamp);

                    self.state = State::Header;
                    return Ok(Some(packet));
                }
            }
        }
    }
}

impl Encoder<Packet> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = match u32::try_from(item.len()) {
            Ok(size) if size <= MAX_PAYLOAD_SIZE => size,
            _ => return Err(Error::PayloadTooLarge(item.len().min(u32::MAX as usize) as u32)),
        };

        // Packets that have not been on the wire yet are stamped now.
        let timestamp = match item.timestamp() {
            0 => unix_micros(),
            ts => ts,
        };

        dst.reserve(HEADER_LEN + size as usize);

        dst.put_u8(WIRE_ID);
        dst.put_u8(item.channel());
        dst.put_u64(timestamp);
        dst.put_u32(size);
        dst.put(item.into_payload());

        Ok(())
    }
}

/// Encodes a packet as a single datagram.
pub fn encode_datagram(packet: Packet, dst: &mut BytesMut) -> Result<(), Error> {
    Codec::new_with_delivery(Delivery::BestEffort).encode(packet, dst)
}

/// Decodes a single datagram. The datagram must contain exactly one complete frame.
pub fn decode_datagram(datagram: &[u8]) -> Result<Packet, Error> {
    let mut src = BytesMut::from(datagram);
    let mut codec = Codec::new_with_delivery(Delivery::BestEffort);

    match codec.decode(&mut src)? {
        Some(packet) if src.is_empty() => Ok(packet),
        _ => Err(Error::Truncated(datagram.len())),
    }
}
