use std::collections::VecDeque;

use parking_lot::Mutex;

use fieldlink_wire::Packet;

use crate::{BufferError, PacketBuffer};

/// A FIFO queue for a single traffic class.
#[derive(Debug, Default)]
pub struct QueueBuffer {
    queue: Mutex<VecDeque<Packet>>,
}

impl QueueBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { queue: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Length of the packet at the head of the queue.
    #[inline]
    pub fn head_len(&self) -> Option<usize> {
        self.queue.lock().front().map(Packet::len)
    }

    /// Removes all packets, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl PacketBuffer for QueueBuffer {
    #[inline]
    fn enqueue(&self, packet: Packet) {
        self.queue.lock().push_back(packet);
    }

    /// A flat queue has no priority classes, this always fails.
    fn enqueue_with_priority(&self, _packet: Packet, _priority: i32) -> Result<(), BufferError> {
        Err(BufferError::Argument("a queue buffer has no priority classes"))
    }

    #[inline]
    fn peek(&self) -> Option<Packet> {
        self.queue.lock().front().cloned()
    }

    #[inline]
    fn dequeue(&self) -> Option<Packet> {
        self.queue.lock().pop_front()
    }

    #[inline]
    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}
