use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    mode::{Mode, Plain, Tagged},
    value::put_block,
    Delivery, Message, Packet, Tag, WireValue,
};

/// Writes raw values, the reader must request them in the exact order and type.
pub type PacketWriter = Writer<Plain>;

/// Writes every value with its type tag so the reader can check it.
pub type SafePacketWriter = Writer<Tagged>;

/// Builds a packet payload value by value.
///
/// `put*` methods return the writer so a payload can be built in one chain:
///
/// ```
/// use fieldlink_wire::{Delivery, PacketWriter};
///
/// let packet = PacketWriter::new(0xCD, Delivery::Reliable)
///     .put_str("Hello, World!")
///     .put_i32(42)
///     .finish();
///
/// assert_eq!(packet.channel(), 0xCD);
/// ```
#[derive(Debug)]
pub struct Writer<M> {
    channel: u8,
    delivery: Delivery,
    buf: BytesMut,
    _mode: PhantomData<M>,
}

impl<M: Mode> Writer<M> {
    /// Creates an empty writer for the given channel and delivery mode.
    pub fn new(channel: u8, delivery: Delivery) -> Self {
        Self::with_capacity(channel, delivery, 0)
    }

    pub fn with_capacity(channel: u8, delivery: Delivery, capacity: usize) -> Self {
        Self { channel, delivery, buf: BytesMut::with_capacity(capacity), _mode: PhantomData }
    }

    /// Creates a writer that appends to the payload of an existing packet.
    pub fn from_packet(packet: Packet) -> Self {
        let channel = packet.channel();
        let delivery = packet.delivery();
        let buf = BytesMut::from(&packet.payload()[..]);

        Self { channel, delivery, buf, _mode: PhantomData }
    }

    #[inline]
    fn tag(&mut self, tag: Tag) {
        if M::TAGGED {
            self.buf.put_u8(tag as u8);
        }
    }

    /// Appends any [`WireValue`].
    #[inline]
    pub fn put<T: WireValue>(&mut self, value: T) -> &mut Self {
        self.tag(T::TAG);
        value.encode(&mut self.buf);
        self
    }

    #[inline]
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put(value)
    }

    /// Appends a single ASCII character.
    ///
    /// # Panics
    /// Panics if `value` is not ASCII.
    #[inline]
    pub fn put_char(&mut self, value: char) -> &mut Self {
        self.put(value)
    }

    #[inline]
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.put(value)
    }

    #[inline]
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.put(value)
    }

    #[inline]
    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.put(value)
    }

    #[inline]
    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.put(value)
    }

    #[inline]
    pub fn put_f64(&mut self, value: f64) -> &mut Self {
        self.put(value)
    }

    /// Appends a length-prefixed UTF-8 string.
    #[inline]
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.tag(Tag::Str);
        put_block(&mut self.buf, value.as_bytes());
        self
    }

    /// Appends a length-prefixed block of raw bytes.
    #[inline]
    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.tag(Tag::Bytes);
        put_block(&mut self.buf, value);
        self
    }

    /// Number of payload bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// Takes the bytes written so far and returns them as a packet. The writer is left empty
    /// and can be reused for the next packet on the same channel.
    pub fn finish(&mut self) -> Packet {
        let payload: Bytes = self.buf.split().freeze();
        Packet::from_message(Message { channel: self.channel, payload }, self.delivery)
    }

    /// Consumes the writer and returns the packet.
    pub fn into_packet(mut self) -> Packet {
        self.finish()
    }
}
