//! Event flags for descriptor readiness.

/// A set of readiness event flags.
///
/// `INPUT` and `OUTPUT` are the only subscribable events; `ERROR` and
/// `HANGUP` are report-only and may appear in poll results regardless of the
/// subscribed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u32);

impl Events {
    /// The descriptor is ready for reading.
    pub const INPUT: Events = Events(1 << 0);
    /// The descriptor is ready for writing.
    pub const OUTPUT: Events = Events(1 << 1);
    /// An error condition on the descriptor. Report-only.
    pub const ERROR: Events = Events(1 << 2);
    /// The peer end was closed. Report-only.
    pub const HANGUP: Events = Events(1 << 3);

    /// Returns the empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Events(0)
    }

    /// Returns true if no flags are set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(&self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combines flag sets.
    #[must_use]
    pub const fn add(self, other: Events) -> Self {
        Events(self.0 | other.0)
    }

    /// Removes flags.
    #[must_use]
    pub const fn remove(self, other: Events) -> Self {
        Events(self.0 & !other.0)
    }

    /// Restricts the set to the subscribable flags (`INPUT` and `OUTPUT`).
    #[must_use]
    pub const fn subscribable(self) -> Self {
        Events(self.0 & (Self::INPUT.0 | Self::OUTPUT.0))
    }

    /// Returns the raw bit representation.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Builds a set from raw bits, keeping only known flags.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Events(bits & (Self::INPUT.0 | Self::OUTPUT.0 | Self::ERROR.0 | Self::HANGUP.0))
    }
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
    fn contains_and_add() {
        init_test("contains_and_add");
        let set = Events::INPUT.add(Events::OUTPUT);
        crate::assert_with_log!(
            set.contains(Events::INPUT),
            "set contains INPUT",
            true,
            set.contains(Events::INPUT)
        );
        crate::assert_with_log!(
            set.contains(Events::OUTPUT),
            "set contains OUTPUT",
            true,
            set.contains(Events::OUTPUT)
        );
        crate::assert_with_log!(
            !set.contains(Events::ERROR),
            "set does not contain ERROR",
            false,
            set.contains(Events::ERROR)
        );
        crate::test_complete!("contains_and_add");
    }

    #[test]
    fn subscribable_strips_report_only_flags() {
        init_test("subscribable_strips_report_only_flags");
        let set = Events::INPUT
            .add(Events::ERROR)
            .add(Events::HANGUP)
            .subscribable();
        crate::assert_with_log!(
            set == Events::INPUT,
            "only INPUT survives",
            Events::INPUT,
            set
        );
        crate::test_complete!("subscribable_strips_report_only_flags");
    }

    #[test]
    fn bits_round_trip() {
        init_test("bits_round_trip");
        let set = Events::OUTPUT.add(Events::HANGUP);
        crate::assert_with_log!(
            Events::from_bits(set.bits()) == set,
            "from_bits(bits()) is identity",
            set,
            Events::from_bits(set.bits())
        );
        crate::assert_with_log!(
            Events::from_bits(0xffff_ffff).bits() == 0b1111,
            "unknown bits are dropped",
            0b1111u32,
            Events::from_bits(0xffff_ffff).bits()
        );
        crate::test_complete!("bits_round_trip");
    }

    #[test]
    fn remove_clears_flags() {
        init_test("remove_clears_flags");
        let set = Events::INPUT.add(Events::OUTPUT).remove(Events::INPUT);
        crate::assert_with_log!(set == Events::OUTPUT, "INPUT removed", Events::OUTPUT, set);
        crate::test_complete!("remove_clears_flags");
    }
}
