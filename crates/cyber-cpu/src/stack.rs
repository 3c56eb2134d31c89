//! The optional instruction-word stack: a tiny cache of
//! recently-fetched CM instruction words keyed by absolute address, so a
//! tight branch loop doesn't have to refetch the same word every pass.

const MAX_ENTRIES: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct InstructionStack {
    /// Most-recently-used first.
    entries: Vec<(u32, u64)>,
}

impl InstructionStack {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_ENTRIES),
        }
    }

    #[must_use]
    pub fn lookup(&self, address: u32) -> Option<u64> {
        self.entries
            .iter()
            .find(|(addr, _)| *addr == address)
            .map(|(_, word)| *word)
    }

    pub fn insert(&mut self, address: u32, word: u64) {
        self.entries.retain(|(addr, _)| *addr != address);
        self.entries.insert(0, (address, word));
        self.entries.truncate(MAX_ENTRIES);
    }

    /// Unconditionally discard every cached word (a branch out of the
    /// stack, an exchange jump, or the stack-purge exit-mode flag).
    pub fn void(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_hits() {
        let mut stack = InstructionStack::new();
        stack.insert(100, 0o777);
        assert_eq!(stack.lookup(100), Some(0o777));
        assert_eq!(stack.lookup(101), None);
    }

    #[test]
    fn void_clears_everything() {
        let mut stack = InstructionStack::new();
        stack.insert(100, 0o777);
        stack.void();
        assert_eq!(stack.lookup(100), None);
    }

    #[test]
    fn capacity_is_bounded_to_eight() {
        let mut stack = InstructionStack::new();
        for addr in 0..16u32 {
            stack.insert(addr, u64::from(addr));
        }
        assert_eq!(stack.lookup(0), None);
        assert_eq!(stack.lookup(15), Some(15));
    }
}
