#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use fieldlink_queue::{
    BandwidthControlBuffer, BufferError, GenericController, PacketBuffer, Priority,
    PriorityBuffer, QueueBuffer,
};
pub use fieldlink_socket::*;
pub use fieldlink_wire::{
    frame, handshake, CodecError, Delivery, Message, Packet, PacketScanner, PacketWriter,
    SafePacketScanner, SafePacketWriter, Tag,
};
