use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors returned when reading values from a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Out of data: needed {needed} bytes, {remaining} remaining")]
    OutOfData { needed: usize, remaining: usize },
    #[error("Type mismatch: expected {expected:?}, found tag {found:#04x}")]
    TypeMismatch { expected: Tag, found: u8 },
    #[error("Invalid UTF-8 in string value")]
    InvalidUtf8,
}

/// The one-octet type tag written before every value by the tagged codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Bool = 0x01,
    Char = 0x02,
    I32 = 0x03,
    I64 = 0x04,
    F32 = 0x05,
    F64 = 0x06,
    Str = 0x07,
    Bytes = 0x08,
    U8 = 0x09,
}

impl TryFrom<u8> for Tag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::Bool,
            0x02 => Self::Char,
            0x03 => Self::I32,
            0x04 => Self::I64,
            0x05 => Self::F32,
            0x06 => Self::F64,
            0x07 => Self::Str,
            0x08 => Self::Bytes,
            0x09 => Self::U8,
            other => return Err(other),
        })
    }
}

/// A value that can be written to and read from a packet payload.
///
/// Integers and floats are big-endian. Strings and byte blocks carry a `u32` length prefix.
pub trait WireValue: Sized {
    /// The type tag used by the tagged codec.
    const TAG: Tag;

    /// Appends the untagged encoding of `self` to `dst`.
    fn encode(&self, dst: &mut BytesMut);

    /// Reads one value from the front of `src`.
    ///
    /// On error `src` may have been partially consumed; callers decode from a clone.
    fn decode(src: &mut Bytes) -> Result<Self, CodecError>;
}

#[inline]
pub(crate) fn ensure(src: &Bytes, needed: usize) -> Result<(), CodecError> {
    if src.len() < needed {
        return Err(CodecError::OutOfData { needed, remaining: src.len() });
    }

    Ok(())
}

macro_rules! fixed_width {
    ($ty:ty, $tag:expr, $width:expr, $put:ident, $get:ident) => {
        impl WireValue for $ty {
            const TAG: Tag = $tag;

            #[inline]
            fn encode(&self, dst: &mut BytesMut) {
                dst.$put(*self);
            }

            #[inline]
            fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
                ensure(src, $width)?;
                Ok(src.$get())
            }
        }
    };
}

fixed_width!(u8, Tag::U8, 1, put_u8, get_u8);
fixed_width!(i32, Tag::I32, 4, put_i32, get_i32);
fixed_width!(i64, Tag::I64, 8, put_i64, get_i64);
fixed_width!(f32, Tag::F32, 4, put_f32, get_f32);
fixed_width!(f64, Tag::F64, 8, put_f64, get_f64);

/// Booleans take one full octet, `0x00` or `0x01`.
impl WireValue for bool {
    const TAG: Tag = Tag::Bool;

    #[inline]
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(u8::from(*self));
    }

    #[inline]
    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        ensure(src, 1)?;
        Ok(src.get_u8() != 0)
    }
}

/// Characters are a single ASCII octet.
impl WireValue for char {
    const TAG: Tag = Tag::Char;

    /// # Panics
    /// Panics if the character is not ASCII.
    #[inline]
    fn encode(&self, dst: &mut BytesMut) {
        assert!(self.is_ascii(), "only ASCII characters can be encoded, got {self:?}");
        dst.put_u8(*self as u8);
    }

    #[inline]
    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        ensure(src, 1)?;
        Ok(char::from(src.get_u8()))
    }
}

impl WireValue for Bytes {
    const TAG: Tag = Tag::Bytes;

    #[inline]
    fn encode(&self, dst: &mut BytesMut) {
        put_block(dst, self);
    }

    #[inline]
    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        get_block(src)
    }
}

impl WireValue for String {
    const TAG: Tag = Tag::Str;

    #[inline]
    fn encode(&self, dst: &mut BytesMut) {
        put_block(dst, self.as_bytes());
    }

    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        let block = get_block(src)?;
        std::str::from_utf8(&block).map(str::to_owned).map_err(|_| CodecError::InvalidUtf8)
    }
}

/// Writes a `u32` length prefix followed by the raw octets.
///
/// # Panics
/// Panics if the block is larger than `u32::MAX` bytes.
#[inline]
pub(crate) fn put_block(dst: &mut BytesMut, block: &[u8]) {
    let len = u32::try_from(block.len()).expect("Block too large, max 4GiB");
    dst.reserve(4 + block.len());
    dst.put_u32(len);
    dst.put_slice(block);
}

#[inline]
fn get_block(src: &mut Bytes) -> Result<Bytes, CodecError> {
    ensure(src, 4)?;
    let len = src.get_u32() as usize;
    ensure(src, len)?;
    Ok(src.split_to(len))
}
