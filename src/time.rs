//! Monotonic clock readings in nanoseconds.
//!
//! All deadlines in the crate are absolute readings of `CLOCK_MONOTONIC`.
//! The clock never goes backwards, making `Uptime` safe to compare and
//! subtract without guarding against wall-clock adjustments.

use std::time::Duration;

/// An instant on the monotonic clock, in nanoseconds since an arbitrary
/// fixed origin (boot on Linux).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uptime(u64);

impl Uptime {
    /// The clock origin.
    pub const ZERO: Self = Self(0);

    /// Reads the current monotonic time.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid out-pointer and CLOCK_MONOTONIC is always
        // available, so this cannot fail.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        debug_assert_eq!(rc, 0);
        Self((ts.tv_sec as u64).saturating_mul(1_000_000_000) + ts.tv_nsec as u64)
    }

    /// Creates an instant from raw nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the instant as raw nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the instant advanced by `delay`, saturating at the maximum
    /// representable instant.
    #[must_use]
    pub fn saturating_add(self, delay: Duration) -> Self {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Returns the elapsed time since `earlier`, or zero if `earlier` is in
    /// the future.
    #[must_use]
    pub fn duration_since(self, earlier: Uptime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Returns the number of whole milliseconds until `deadline`, rounded
    /// up so that a wait of the returned length never wakes early. Zero if
    /// the deadline has passed.
    #[must_use]
    pub(crate) fn millis_until(self, deadline: Uptime) -> u64 {
        deadline.0.saturating_sub(self.0).div_ceil(1_000_000)
    }
}

/// Converts a duration to whole milliseconds, rounded up. A sub-millisecond
/// non-zero duration becomes one millisecond rather than a zero-length wait.
pub(crate) fn duration_to_millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn now_is_monotonic() {
        init_test("now_is_monotonic");
        let a = Uptime::now();
        let b = Uptime::now();
        crate::assert_with_log!(a <= b, "clock does not go backwards", true, a <= b);
        crate::test_complete!("now_is_monotonic");
    }

    #[test]
    fn millis_until_rounds_up() {
        init_test("millis_until_rounds_up");
        let now = Uptime::from_nanos(1_000_000_000);
        let deadline = Uptime::from_nanos(1_000_500_001);
        crate::assert_with_log!(
            now.millis_until(deadline) == 1,
            "sub-millisecond remainder rounds up",
            1u64,
            now.millis_until(deadline)
        );
        crate::assert_with_log!(
            deadline.millis_until(now) == 0,
            "past deadline is zero",
            0u64,
            deadline.millis_until(now)
        );
        crate::test_complete!("millis_until_rounds_up");
    }

    #[test]
    fn saturating_add_caps_at_max() {
        init_test("saturating_add_caps_at_max");
        let late = Uptime::from_nanos(u64::MAX - 10);
        let capped = late.saturating_add(Duration::from_secs(1));
        crate::assert_with_log!(
            capped.as_nanos() == u64::MAX,
            "overflowing deadline saturates",
            u64::MAX,
            capped.as_nanos()
        );
        crate::test_complete!("saturating_add_caps_at_max");
    }

    #[test]
    fn duration_to_millis_ceil_rounds_up() {
        init_test("duration_to_millis_ceil_rounds_up");
        crate::assert_with_log!(
            duration_to_millis_ceil(Duration::from_micros(1)) == 1,
            "1us becomes 1ms",
            1u64,
            duration_to_millis_ceil(Duration::from_micros(1))
        );
        crate::assert_with_log!(
            duration_to_millis_ceil(Duration::ZERO) == 0,
            "zero stays zero",
            0u64,
            duration_to_millis_ceil(Duration::ZERO)
        );
        crate::test_complete!("duration_to_millis_ceil_rounds_up");
    }
}
