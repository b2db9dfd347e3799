use std::time::{Duration, SystemTime};

/// Returns the current UNIX timestamp in microseconds.
///
/// A clock set before the epoch reads as zero.
#[inline]
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_micros() as u64
}

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u32 = 1024;
    pub const MiB: u32 = 1024 * KiB;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_micros_is_monotonic_enough() {
        let a = unix_micros();
        let b = unix_micros();
        assert!(a > 0);
        assert!(b >= a);
    }
}
