use parking_lot::Mutex;
use tracing::trace;

use fieldlink_wire::Packet;

use crate::{class_index, BufferError, PacketBuffer, QueueBuffer};

/// Default credit, in bytes, a class with weight `1` earns per round.
pub const DEFAULT_QUANTUM: u32 = 512;

/// Proportional bandwidth sharing across classes using deficit round robin.
///
/// Every class has a weight and a byte credit that starts at zero. Classes are visited in a fixed
/// circular order. A class whose credit covers the length of its head packet is served, and keeps
/// being served while its credit lasts. A backlogged class that cannot afford its head packet
/// earns `quantum * weight` bytes and the turn passes to the next class. A class that runs empty
/// loses its credit.
///
/// While every class is backlogged, the bytes sent per class converge to the weight ratio. Idle
/// classes do not hold back the others, and classes with weight `0` are served only when no
/// weighted class has traffic.
#[derive(Debug)]
pub struct BandwidthControlBuffer {
    classes: Vec<QueueBuffer>,
    weights: Vec<u32>,
    quantum: u32,
    state: Mutex<RoundState>,
}

#[derive(Debug)]
struct RoundState {
    /// Byte credit per class.
    credits: Vec<i64>,
    /// Class whose turn it is.
    cursor: usize,
}

impl BandwidthControlBuffer {
    /// Creates a new buffer over the given classes.
    ///
    /// `weights` defaults to `1` for every class. Fails if there are no classes, if the number of
    /// weights doesn't match the number of classes, or if `quantum` is zero.
    pub fn new(
        classes: Vec<QueueBuffer>,
        weights: Option<Vec<u32>>,
        quantum: u32,
    ) -> Result<Self, BufferError> {
        if classes.is_empty() {
            return Err(BufferError::Argument("a bandwidth buffer needs at least one class"));
        }

        if quantum == 0 {
            return Err(BufferError::Argument("the quantum must be positive"));
        }

        let weights = weights.unwrap_or_else(|| vec![1; classes.len()]);
        if weights.len() != classes.len() {
            return Err(BufferError::Argument("expected exactly one weight per class"));
        }

        let state = RoundState { credits: vec![0; classes.len()], cursor: 0 };

        Ok(Self { classes, weights, quantum, state: Mutex::new(state) })
    }

    /// Creates a buffer with `weights.len()` empty classes and the default quantum.
    pub fn with_weights(weights: Vec<u32>) -> Result<Self, BufferError> {
        let classes = weights.iter().map(|_| QueueBuffer::new()).collect();
        Self::new(classes, Some(weights), DEFAULT_QUANTUM)
    }

    /// Creates a buffer with `n` equally weighted classes and the default quantum.
    pub fn with_classes(n: usize) -> Result<Self, BufferError> {
        Self::new((0..n).map(|_| QueueBuffer::new()).collect(), None, DEFAULT_QUANTUM)
    }

    #[inline]
    pub fn classes(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    #[inline]
    pub const fn quantum(&self) -> u32 {
        self.quantum
    }

    /// Current byte credit of every class.
    pub fn credits(&self) -> Vec<i64> {
        self.state.lock().credits.clone()
    }

    /// Number of packets waiting in the given class.
    pub fn class_len(&self, priority: i32) -> Result<usize, BufferError> {
        Ok(self.classes[class_index(priority, self.classes.len())?].len())
    }

    /// Picks the class to serve next. Must be called with the round state locked.
    fn select(&self, state: &mut RoundState) -> Option<usize> {
        let weighted_backlog = self
            .classes
            .iter()
            .zip(&self.weights)
            .any(|(class, weight)| *weight > 0 && !class.is_empty());

        if !weighted_backlog {
            // Only unweighted classes (if any) have traffic: plain FIFO across them.
            return self.classes.iter().position(|class| !class.is_empty());
        }

        let n = self.classes.len();

        loop {
            let index = state.cursor;
            let weight = self.weights[index];

            match self.classes[index].head_len() {
                None => state.credits[index] = 0,
                Some(len) if weight > 0 => {
                    if state.credits[index] >= len as i64 {
                        return Some(index);
                    }

                    let grant = i64::from(self.quantum).saturating_mul(i64::from(weight));
                    state.credits[index] = state.credits[index].saturating_add(grant);
                    trace!(class = index, credit = state.credits[index], "Replenished credit");
                }
                Some(_) => {}
            }

            state.cursor = (index + 1) % n;
        }
    }
}

impl PacketBuffer for BandwidthControlBuffer {
    /// Enqueues into the last class.
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
        let mut state = self.state.lock();
        let index = self.select(&mut state)?;
        self.classes[index].peek()
    }

    fn dequeue(&self) -> Option<Packet> {
        let mut state = self.state.lock();
        let index = self.select(&mut state)?;
        let packet = self.classes[index].dequeue()?;

        if self.weights[index] > 0 {
            state.credits[index] -= packet.len() as i64;
        }

        Some(packet)
    }

    fn len(&self) -> usize {
        self.classes.iter().map(QueueBuffer::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::test_utils::packet;

    #[test]
    fn cold_start_serves_first_packet() {
        let buffer = BandwidthControlBuffer::with_classes(3).unwrap();
        buffer.enqueue_with_priority(packet(2, 1500), 2).unwrap();

        assert_eq!(buffer.dequeue().map(|p| p.len()), Some(1500));
        assert!(buffer.dequeue().is_none());
    }

    #[test]
    fn peek_matches_dequeue() {
        let buffer = BandwidthControlBuffer::with_weights(vec![1, 3]).unwrap();
        for i in 0..50 {
            buffer.enqueue_with_priority(packet(0, 100 + i), 0).unwrap();
            buffer.enqueue_with_priority(packet(1, 200 + i), 1).unwrap();
        }

        while let Some(peeked) = buffer.peek() {
            assert_eq!(buffer.dequeue(), Some(peeked));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn invalid_construction() {
        let classes = || (0..3).map(|_| QueueBuffer::new()).collect::<Vec<_>>();

        assert!(matches!(
            BandwidthControlBuffer::new(classes(), Some(vec![1, 2]), DEFAULT_QUANTUM),
            Err(BufferError::Argument(_))
        ));
        assert!(matches!(
            BandwidthControlBuffer::new(classes(), None, 0),
            Err(BufferError::Argument(_))
        ));
        assert!(matches!(
            BandwidthControlBuffer::new(Vec::new(), None, DEFAULT_QUANTUM),
            Err(BufferError::Argument(_))
        ));
    }

    #[test]
    fn out_of_range() {
        let buffer = BandwidthControlBuffer::with_classes(3).unwrap();
        assert_eq!(
            buffer.enqueue_with_priority(packet(0, 1), 3),
            Err(BufferError::Range { priority: 3, classes: 3 })
        );
        assert_eq!(
            buffer.enqueue_with_priority(packet(0, 1), -1),
            Err(BufferError::Range { priority: -1, classes: 3 })
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn idle_classes_do_not_block() {
        let buffer = BandwidthControlBuffer::with_weights(vec![1, 5]).unwrap();
        for _ in 0..10 {
            buffer.enqueue_with_priority(packet(0, 64), 0).unwrap();
        }

        assert_eq!(std::iter::from_fn(|| buffer.dequeue()).count(), 10);
    }

    #[test]
    fn empty_class_loses_credit() {
        let buffer = BandwidthControlBuffer::with_weights(vec![1, 1]).unwrap();
        buffer.enqueue_with_priority(packet(0, 10), 0).unwrap();
        buffer.enqueue_with_priority(packet(1, 10), 1).unwrap();

        while buffer.dequeue().is_some() {}
        // One more pass over the now empty classes resets their credit.
        buffer.enqueue_with_priority(packet(0, 10), 0).unwrap();
        buffer.dequeue().unwrap();

        assert_eq!(buffer.credits()[1], 0);
    }

    #[test]
    fn zero_weight_is_served_last() {
        let buffer = BandwidthControlBuffer::with_weights(vec![0, 1]).unwrap();
        buffer.enqueue_with_priority(packet(0, 8), 0).unwrap();
        buffer.enqueue_with_priority(packet(1, 8), 1).unwrap();
        buffer.enqueue_with_priority(packet(1, 8), 1).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| buffer.dequeue()).map(|p| p.channel()).collect();
        assert_eq!(order, vec![1, 1, 0]);
    }

    #[test]
    fn huge_weights_saturate_credit() {
        let classes = (0..2).map(|_| QueueBuffer::new()).collect();
        let buffer =
            BandwidthControlBuffer::new(classes, Some(vec![u32::MAX, u32::MAX]), u32::MAX).unwrap();

        for i in 0..4 {
            buffer.enqueue_with_priority(packet(i % 2, 10), i32::from(i % 2)).unwrap();
        }

        assert_eq!(std::iter::from_fn(|| buffer.dequeue()).count(), 4);
        assert!(buffer.credits().iter().all(|credit| *credit >= 0));
    }

    #[test]
    fn default_class_is_last() {
        let buffer = BandwidthControlBuffer::with_classes(2).unwrap();
        buffer.enqueue(packet(7, 3));
        assert_eq!(buffer.class_len(1), Ok(1));
    }

    /// Random sized packets in three classes weighted `1:2:5`. While every class is backlogged
    /// the bytes sent per class follow the weights. Nothing is lost when draining.
    #[test]
    fn converges_to_weights() {
        const PER_CLASS: usize = 20_000;
        const WEIGHTS: [u32; 3] = [1, 2, 5];

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let buffer = BandwidthControlBuffer::with_weights(WEIGHTS.to_vec()).unwrap();

        for class in 0..WEIGHTS.len() {
            for _ in 0..PER_CLASS {
                let len = rng.gen_range(1..64);
                buffer.enqueue_with_priority(packet(class as u8, len), class as i32).unwrap();
            }
        }

        let total = PER_CLASS * WEIGHTS.len();
        let mut bytes = [0usize; 3];
        let mut packets = [0usize; 3];
        let mut dequeued = 0;

        let mut take = |n: usize, bytes: &mut [usize; 3], packets: &mut [usize; 3]| {
            for _ in 0..n {
                let packet = buffer.dequeue().expect("buffer should not be empty");
                bytes[packet.channel() as usize] += packet.len();
                packets[packet.channel() as usize] += 1;
            }
        };

        // A quarter of the traffic: every class still has a backlog.
        take(total / 4, &mut bytes, &mut packets);
        dequeued += total / 4;
        assert!(packets.iter().all(|sent| *sent < PER_CLASS));

        for (class, weight) in WEIGHTS.iter().enumerate().skip(1) {
            let ratio = bytes[class] as f64 / bytes[0] as f64;
            let expected = f64::from(*weight) / f64::from(WEIGHTS[0]);
            assert!(
                (ratio - expected).abs() / expected < 0.1,
                "class {class}: ratio {ratio:.3}, expected {expected}"
            );
        }

        // Up to three quarters, then drain the rest.
        take(total * 3 / 4 - dequeued, &mut bytes, &mut packets);
        dequeued = total * 3 / 4;

        while let Some(packet) = buffer.dequeue() {
            packets[packet.channel() as usize] += 1;
            dequeued += 1;
        }

        assert_eq!(dequeued, total);
        assert_eq!(packets, [PER_CLASS; 3]);
        assert!(buffer.is_empty());
    }
}
