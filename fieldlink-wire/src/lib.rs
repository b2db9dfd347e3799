//! Wire formats for fieldlink: the packet model, the value codec used to build packet payloads,
//! and the framing codecs used on the stream and datagram sockets.

mod packet;
pub use packet::{Delivery, Message, Packet};

mod value;
pub use value::{CodecError, Tag, WireValue};

mod writer;
pub use writer::{PacketWriter, SafePacketWriter, Writer};

mod scanner;
pub use scanner::{PacketScanner, SafePacketScanner, Scanner};

pub mod frame;
pub mod handshake;

/// Payload encoding modes shared by [`Writer`] and [`Scanner`].
pub mod mode {
    /// Selects whether every value carries a one-octet type tag.
    pub trait Mode: Send + Sync + 'static {
        /// `true` if values are prefixed with their [`Tag`](crate::Tag).
        const TAGGED: bool;
    }

    /// Raw concatenation of encodings, no type information on the wire.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Plain;

    /// Every value is preceded by its type tag and checked on read.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Tagged;

    impl Mode for Plain {
        const TAGGED: bool = false;
    }

    impl Mode for Tagged {
        const TAGGED: bool = true;
    }
}
