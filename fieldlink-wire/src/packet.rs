use bytes::Bytes;

/// How a packet travels to the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Sent on the stream connection. Ordered and retransmitted by the transport.
    #[default]
    Reliable,
    /// Sent as a single datagram. May be lost or reordered.
    BestEffort,
}

/// A channel-tagged payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The logical channel this message belongs to.
    pub channel: u8,
    /// The encoded payload.
    pub payload: Bytes,
}

impl Message {
    #[inline]
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self { channel, payload: payload.into() }
    }
}

/// The unit that is scheduled and sent: a [`Message`] plus its delivery mode.
///
/// Cloning a packet is cheap, the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    message: Message,
    delivery: Delivery,
    /// UNIX timestamp in microseconds, stamped by the sender when the packet is framed.
    /// Zero for packets that have not been on the wire.
    timestamp: u64,
}

impl Packet {
    /// Creates a new reliable packet on the given channel.
    #[inline]
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self::from_message(Message::new(channel, payload), Delivery::Reliable)
    }

    /// Creates a new best-effort packet on the given channel.
    #[inline]
    pub fn best_effort(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self::from_message(Message::new(channel, payload), Delivery::BestEffort)
    }

    #[inline]
    pub const fn from_message(message: Message, delivery: Delivery) -> Self {
        Self { message, delivery, timestamp: 0 }
    }

    /// Sets the delivery mode of this packet.
    #[inline]
    pub const fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Sets the send timestamp of this packet.
    #[inline]
    pub const fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub const fn channel(&self) -> u8 {
        self.message.channel
    }

    #[inline]
    pub const fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    #[inline]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    #[inline]
    pub const fn delivery(&self) -> Delivery {
        self.delivery
    }

    #[inline]
    pub const fn is_reliable(&self) -> bool {
        matches!(self.delivery, Delivery::Reliable)
    }

    #[inline]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The length of the payload in bytes. This is the size used for bandwidth accounting.
    #[inline]
    pub fn len(&self) -> usize {
        self.message.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.message.payload.is_empty()
    }

    #[inline]
    pub fn into_message(self) -> Message {
        self.message
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.message.payload
    }
}
