use parking_lot::Mutex;

use fieldlink_wire::Packet;

use crate::{class_index, BufferError, PacketBuffer, QueueBuffer};

/// Strict priority over a fixed set of classes. Class `0` always drains first.
///
/// There is no starvation protection: a busy high priority class blocks every class below it.
#[derive(Debug)]
pub struct PriorityBuffer {
    classes: Vec<QueueBuffer>,
    /// Serializes class selection so `peek` and `dequeue` agree on the head.
    select: Mutex<()>,
}

impl PriorityBuffer {
    /// Creates a buffer over the given classes, index `0` being the highest priority.
    pub fn new(classes: Vec<QueueBuffer>) -> Result<Self, BufferError> {
        if classes.is_empty() {
            return Err(BufferError::Argument("a priority buffer needs at least one class"));
        }

        Ok(Self { classes, select: Mutex::new(()) })
    }

    /// Creates a buffer with `n` empty classes.
    pub fn with_classes(n: usize) -> Result<Self, BufferError> {
        Self::new((0..n).map(|_| QueueBuffer::new()).collect())
    }

    /// Number of priority classes.
    #[inline]
    pub fn classes(&self) -> usize {
        self.classes.len()
    }

    /// Number of packets waiting in the given class.
    pub fn class_len(&self, priority: i32) -> Result<usize, BufferError> {
        Ok(self.classes[class_index(priority, self.classes.len())?].len())
    }

    #[inline]
    fn first_non_empty(&self) -> Option<&QueueBuffer> {
        self.classes.iter().find(|class| !class.is_empty())
    }
}

impl PacketBuffer for PriorityBuffer {
    /// Enqueues into the lowest priority class.
    fn enqueue(&self, packet: Packet) {
        if let Some(class) = self.classes.last() {
            class.enqueue(packet);
        }
    }

    fn enqueue_with_priority(&self, packet: Packet, priority: i32) -> Result<(), BufferError> {
        let index = class_index(priority, self.classes.len())?;
        self.classes[index].enqueue(packet);
        Ok(())
    }

    fn peek(&self) -> Option<Packet> {
        let _guard = self.select.lock();
        self.first_non_empty()?.peek()
    }

    fn dequeue(&self) -> Option<Packet> {
        let _guard = self.select.lock();
        self.first_non_empty()?.dequeue()
    }

    fn len(&self) -> usize {
        self.classes.iter().map(QueueBuffer::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::test_utils::packet;

    #[test]
    fn strict_order() {
        let buffer = PriorityBuffer::with_classes(3).unwrap();
        buffer.enqueue_with_priority(packet(0, 1), 0).unwrap();
        buffer.enqueue_with_priority(packet(2, 2), 2).unwrap();
        buffer.enqueue_with_priority(packet(1, 3), 1).unwrap();
        buffer.enqueue_with_priority(packet(1, 4), 1).unwrap();

        let order: Vec<_> =
            std::iter::from_fn(|| buffer.dequeue()).map(|p| (p.channel(), p.len())).collect();
        assert_eq!(order, vec![(0, 1), (1, 3), (1, 4), (2, 2)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn out_of_range() {
        let buffer = PriorityBuffer::with_classes(3).unwrap();

        for priority in [-1, 3] {
            assert_eq!(
                buffer.enqueue_with_priority(packet(0, 1), priority),
                Err(BufferError::Range { priority, classes: 3 })
            );
            assert!(buffer.class_len(priority).is_err());
        }

        assert!(buffer.is_empty());
    }

    #[test]
    fn peek_matches_dequeue() {
        let buffer = PriorityBuffer::with_classes(2).unwrap();
        assert!(buffer.peek().is_none());

        buffer.enqueue(packet(1, 5));
        buffer.enqueue_with_priority(packet(0, 7), 0).unwrap();

        assert_eq!(buffer.peek(), buffer.dequeue());
        assert_eq!(buffer.peek().map(|p| p.channel()), Some(1));
        assert_eq!(buffer.class_len(1), Ok(1));
    }

    #[test]
    fn default_class_is_lowest() {
        let buffer = PriorityBuffer::with_classes(4).unwrap();
        buffer.enqueue(packet(9, 1));
        assert_eq!(buffer.class_len(3), Ok(1));
    }

    #[test]
    fn needs_a_class() {
        assert!(matches!(PriorityBuffer::with_classes(0), Err(BufferError::Argument(_))));
    }

    #[test]
    fn concurrent_producers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 10_000;

        let buffer = Arc::new(PriorityBuffer::with_classes(3).unwrap());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|id| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let priority = ((id + i) % 3) as i32;
                        buffer.enqueue_with_priority(packet(id as u8, i % 64), priority).unwrap();
                    }
                })
            })
            .collect();

        let mut drained = 0;
        while drained < PRODUCERS * PER_PRODUCER {
            if buffer.dequeue().is_some() {
                drained += 1;
            } else {
                thread::yield_now();
            }
        }

        for producer in producers {
            producer.join().unwrap();
        }

        assert!(buffer.is_empty());
    }
}
