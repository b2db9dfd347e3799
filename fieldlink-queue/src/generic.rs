use fieldlink_wire::Packet;

use crate::{BufferError, PacketBuffer, PriorityBuffer};

/// The five traffic levels of a [`GenericController`], highest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum Priority {
    Emergent = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
    Lowest = 4,
}

impl Priority {
    pub const ALL: [Self; 5] = [Self::Emergent, Self::High, Self::Medium, Self::Low, Self::Lowest];
}

impl TryFrom<i32> for Priority {
    type Error = BufferError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or(BufferError::Range { priority: value, classes: Self::ALL.len() })
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority as Self
    }
}

/// Strict priority scheduling over the five named [`Priority`] levels.
///
/// [`PacketBuffer::enqueue`] uses [`Priority::Medium`].
#[derive(Debug)]
pub struct GenericController {
    inner: PriorityBuffer,
}

impl Default for GenericController {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericController {
    pub fn new() -> Self {
        let inner = PriorityBuffer::with_classes(Priority::ALL.len())
            .expect("Priority::ALL is not empty");
        Self { inner }
    }

    /// Enqueues a packet at a named level.
    pub fn enqueue_at(&self, packet: Packet, priority: Priority) {
        // Every level maps to an existing class.
        let _ = self.inner.enqueue_with_priority(packet, priority.into());
    }

    /// Number of packets waiting at the given level.
    pub fn level_len(&self, priority: Priority) -> usize {
        self.inner.class_len(priority.into()).unwrap_or_default()
    }
}

impl PacketBuffer for GenericController {
    fn enqueue(&self, packet: Packet) {
        self.enqueue_at(packet, Priority::default());
    }

    fn enqueue_with_priority(&self, packet: Packet, priority: i32) -> Result<(), BufferError> {
        self.enqueue_at(packet, Priority::try_from(priority)?);
        Ok(())
    }

    fn peek(&self) -> Option<Packet> {
        self.inner.peek()
    }

    fn dequeue(&self) -> Option<Packet> {
        self.inner.dequeue()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
