//! Queueing disciplines deciding which packet is sent next.
//!
//! Every buffer implements [`PacketBuffer`] so an endpoint can hold any of them behind an
//! `Arc<dyn PacketBuffer>`. All operations take `&self`, never block on an empty buffer and are
//! safe to call from many producer threads while a single task drains.

use thiserror::Error;

use fieldlink_wire::Packet;

mod queue;
pub use queue::QueueBuffer;

mod priority;
pub use priority::PriorityBuffer;

mod bandwidth;
pub use bandwidth::{BandwidthControlBuffer, DEFAULT_QUANTUM};

mod generic;
pub use generic::{GenericController, Priority};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Priority {priority} out of range for a buffer with {classes} classes")]
    Range { priority: i32, classes: usize },
    #[error("Invalid argument: {0}")]
    Argument(&'static str),
}

/// A scheduler holding packets until the sender is ready for them.
pub trait PacketBuffer: Send + Sync {
    /// Enqueues a packet into the buffer's default class.
    fn enqueue(&self, packet: Packet);

    /// Enqueues a packet into the given priority class, `0` being the highest.
    ///
    /// On error the packet is dropped and the buffer is left unchanged.
    fn enqueue_with_priority(&self, packet: Packet, priority: i32) -> Result<(), BufferError>;

    /// Returns the packet the next [`dequeue`](PacketBuffer::dequeue) would return.
    fn peek(&self) -> Option<Packet>;

    /// Removes and returns the next packet to send.
    fn dequeue(&self) -> Option<Packet>;

    /// Number of packets currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validates a priority index against the number of classes.
#[inline]
pub(crate) fn class_index(priority: i32, classes: usize) -> Result<usize, BufferError> {
    usize::try_from(priority)
        .ok()
        .filter(|index| *index < classes)
        .ok_or(BufferError::Range { priority, classes })
}

#[cfg(test)]
pub(crate) mod test_utils {
    use bytes::Bytes;
    use fieldlink_wire::Packet;

    /// A packet whose payload is `len` copies of `tag`, so tests can tell packets apart.
    pub(crate) fn packet(tag: u8, len: usize) -> Packet {
        Packet::new(tag, Bytes::from(vec![tag; len]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_index_bounds() {
        assert_eq!(class_index(0, 3), Ok(0));
        assert_eq!(class_index(2, 3), Ok(2));
        assert_eq!(class_index(3, 3), Err(BufferError::Range { priority: 3, classes: 3 }));
        assert_eq!(class_index(-1, 3), Err(BufferError::Range { priority: -1, classes: 3 }));
    }
}
