use std::marker::PhantomData;

use bytes::{Buf, Bytes};

use crate::{
    mode::{Mode, Plain, Tagged},
    CodecError, Packet, Tag, WireValue,
};

/// Reads values written by a [`PacketWriter`](crate::PacketWriter). No type checks.
pub type PacketScanner = Scanner<Plain>;

/// Reads values written by a [`SafePacketWriter`](crate::SafePacketWriter), checking the type
/// tag of every value.
pub type SafePacketScanner = Scanner<Tagged>;

/// Reads values from a packet payload in the order they were written.
///
/// A failed read leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct Scanner<M> {
    buf: Bytes,
    _mode: PhantomData<M>,
}

impl<M: Mode> Scanner<M> {
    /// Creates a scanner over the payload of `packet`.
    pub fn new(packet: &Packet) -> Self {
        Self::from_bytes(packet.payload().clone())
    }

    pub const fn from_bytes(buf: Bytes) -> Self {
        Self { buf, _mode: PhantomData }
    }

    /// Reads the next value of type `T`.
    pub fn next<T: WireValue>(&mut self) -> Result<T, CodecError> {
        let mut cursor = self.buf.clone();

        if M::TAGGED {
            let Some(&found) = cursor.first() else {
                return Err(CodecError::OutOfData { needed: 1, remaining: 0 });
            };

            if found != T::TAG as u8 {
                return Err(CodecError::TypeMismatch { expected: T::TAG, found });
            }

            cursor.advance(1);
        }

        let value = T::decode(&mut cursor)?;
        self.buf = cursor;

        Ok(value)
    }

    #[inline]
    pub fn next_bool(&mut self) -> Result<bool, CodecError> {
        self.next()
    }

    #[inline]
    pub fn next_char(&mut self) -> Result<char, CodecError> {
        self.next()
    }

    #[inline]
    pub fn next_u8(&mut self) -> Result<u8, CodecError> {
        self.next()
    }

    #[inline]
    pub fn next_i32(&mut self) -> Result<i32, CodecError> {
        self.next()
    }

    #[inline]
    pub fn next_i64(&mut self) -> Result<i64, CodecError> {
        self.next()
    }

    #[inline]
    pub fn next_f32(&mut self) -> Result<f32, CodecError> {
        self.next()
    }

    #[inline]
    pub fn next_f64(&mut self) -> Result<f64, CodecError> {
        self.next()
    }

    #[inline]
    pub fn next_string(&mut self) -> Result<String, CodecError> {
        self.next()
    }

    /// Reads a length-prefixed byte block. The returned bytes share the packet's buffer.
    #[inline]
    pub fn next_bytes(&mut self) -> Result<Bytes, CodecError> {
        self.next()
    }

    /// Returns the next raw octet without consuming it. In tagged mode this is the type tag.
    #[inline]
    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Scanner<Tagged> {
    /// Returns `true` if the next value has the given type.
    pub fn has_next(&self, tag: Tag) -> bool {
        self.peek_u8() == Some(tag as u8)
    }

    /// Returns the type of the next value, if any and if it is known.
    pub fn next_tag(&self) -> Option<Tag> {
        self.peek_u8().and_then(|tag| Tag::try_from(tag).ok())
    }
}
