use std::sync::atomic::{AtomicUsize, Ordering};

/// Link statistics, shared between the driver task and the endpoint.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Total application packets sent
    packets_tx: AtomicUsize,
    /// Total payload bytes sent
    bytes_tx: AtomicUsize,
    /// Total application packets received
    packets_rx: AtomicUsize,
    /// Total payload bytes received
    bytes_rx: AtomicUsize,
    /// Best-effort packets dropped because the datagram socket was not ready
    datagrams_dropped: AtomicUsize,
    /// Received packets without a registered handler
    unhandled: AtomicUsize,
    /// Number of sessions established
    sessions: AtomicUsize,
}

impl LinkStats {
    #[inline]
    pub(crate) fn increment_tx(&self, bytes: usize) {
        self.packets_tx.fetch_add(1, Ordering::Relaxed);
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rx(&self, bytes: usize) {
        self.packets_rx.fetch_add(1, Ordering::Relaxed);
        self.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_datagrams_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_unhandled(&self) {
        self.unhandled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_sessions(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn packets_tx(&self) -> usize {
        self.packets_tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_tx(&self) -> usize {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn packets_rx(&self) -> usize {
        self.packets_rx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_rx(&self) -> usize {
        self.bytes_rx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn datagrams_dropped(&self) -> usize {
        self.datagrams_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unhandled(&self) -> usize {
        self.unhandled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }
}
