//! CPU exit conditions and the exit-mode mask that decides whether a
//! condition merely sets a flag or forces an error exit.

/// Guest-visible CPU exit-condition bits. These are ordinary data,
/// never a host `Result::Err` — the CPU keeps running with the bit set and
/// the guest operating system observes it through the exit package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitCondition(u8);

impl ExitCondition {
    pub const ADDRESS_OUT_OF_RANGE: u8 = 0o01;
    pub const OPERAND_OUT_OF_RANGE: u8 = 0o02;
    pub const INDEFINITE_OPERAND: u8 = 0o04;

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    #[must_use]
    pub const fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn clear(&mut self) {
        self.0 = 0;
    }

    /// Whether `exit_mode`'s matching mask bits (the condition bits shifted
    /// up 12 places) select an error exit for any condition
    /// currently flagged.
    #[must_use]
    pub const fn triggers_error_exit(self, exit_mode: u32) -> bool {
        exit_mode & ((self.0 as u32) << 12) != 0
    }
}

/// `exit_mode` register bits that aren't `ExitCondition` error-exit selects
/// (those live at bits 12-14): flags the guest sets directly in `exitMode`
/// to change CPU behavior rather than to arm an error exit.
pub struct ExitModeFlag;

impl ExitModeFlag {
    /// `EmFlagStackPurge`: void the instruction-word stack on every
    /// A-register write, not just on a branch to an uncached word. Placed
    /// at bit 9, clear of `ExitCondition`'s bits 12-14 and of
    /// `EmFlagExpandedAddress` (reused directly from
    /// `ModelFeatures::HAS_EXPANDED_ADDRESS`, bit 11, in
    /// `exchange::ecs_field_bits`) — the exact position isn't recoverable
    /// from the retrieved source (`const.h` wasn't kept in the pack).
    pub const STACK_PURGE: u32 = 1 << 9;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_only_on_matching_bit() {
        let mut ec = ExitCondition::empty();
        ec.set(ExitCondition::ADDRESS_OUT_OF_RANGE);
        assert!(ec.triggers_error_exit(ExitCondition::ADDRESS_OUT_OF_RANGE << 12));
        assert!(!ec.triggers_error_exit(ExitCondition::OPERAND_OUT_OF_RANGE << 12));
    }
}
