use std::{
    collections::VecDeque,
    sync::Arc,
    task::{Context, Poll},
};

use futures::task::AtomicWaker;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use fieldlink_queue::{BufferError, PacketBuffer};
use fieldlink_wire::{frame, Packet};

/// A packet that skips the scheduler. The session reports the outcome on `sent`.
pub(crate) struct Immediate {
    pub(crate) packet: Packet,
    pub(crate) sent: oneshot::Sender<Result<(), frame::Error>>,
}

/// The next thing the session should write.
pub(crate) enum Outgoing {
    Immediate(Immediate),
    Scheduled(Packet),
}

/// The outgoing side of an endpoint: a scheduler filled by any number of producers and drained
/// by the session task, which is woken on every enqueue.
pub(crate) struct Outbox {
    buffer: Arc<dyn PacketBuffer>,
    /// Packets sent with `send_now`, always written before scheduled ones.
    immediate: Mutex<VecDeque<Immediate>>,
    waker: AtomicWaker,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("len", &self.buffer.len())
            .field("immediate", &self.immediate.lock().len())
            .finish()
    }
}

impl Outbox {
    pub(crate) fn new(buffer: Arc<dyn PacketBuffer>) -> Self {
        Self { buffer, immediate: Mutex::default(), waker: AtomicWaker::new() }
    }

    /// Schedules a packet in the default class.
    pub(crate) fn push(&self, packet: Packet) {
        self.buffer.enqueue(packet);
        self.waker.wake();
    }

    /// Schedules a packet in the given priority class.
    pub(crate) fn push_with_priority(&self, packet: Packet, priority: i32) -> Result<(), BufferError> {
        self.buffer.enqueue_with_priority(packet, priority)?;
        self.waker.wake();
        Ok(())
    }

    /// Hands a packet to the session ahead of the scheduler.
    ///
    /// The receiver errors if the packet is discarded before the session got to it.
    pub(crate) fn push_now(&self, packet: Packet) -> oneshot::Receiver<Result<(), frame::Error>> {
        let (sent, rx) = oneshot::channel();
        self.immediate.lock().push_back(Immediate { packet, sent });
        self.waker.wake();
        rx
    }

    /// Discards immediate packets nobody is going to write.
    pub(crate) fn clear_immediate(&self) {
        self.immediate.lock().clear();
    }

    fn next(&self) -> Option<Outgoing> {
        if let Some(immediate) = self.immediate.lock().pop_front() {
            return Some(Outgoing::Immediate(immediate));
        }

        self.buffer.dequeue().map(Outgoing::Scheduled)
    }

    /// Returns the next packet to write, registering the task for wakeup if there is none.
    pub(crate) fn poll_next(&self, cx: &mut Context<'_>) -> Poll<Outgoing> {
        if let Some(outgoing) = self.next() {
            return Poll::Ready(outgoing);
        }

        self.waker.register(cx.waker());

        // A producer may have pushed between the first check and the registration.
        match self.next() {
            Some(outgoing) => Poll::Ready(outgoing),
            None => Poll::Pending,
        }
    }

    /// Number of scheduled packets waiting to be sent.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }
}
