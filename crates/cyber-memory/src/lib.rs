//! Central memory (CM) and extended memory (EM/ECS/ESM) storage.
//!
//! Both stores are a dense array of 60-bit words. Central memory additionally
//! carries the wrap/no-wrap addressing model feature: an access at
//! or past `cmSize` either wraps modulo the size or returns all-ones (reads)
//! / is dropped (writes), depending on configuration. Bounds checking against
//! a program's RA/FL window, and the CPU error-exit behavior that follows a
//! bounds violation, live in `cyber-cpu` — this crate only knows about the
//! flat array and its own wrap rule.

use cyber_core::{CpWord, MASK60};
use std::fmt;

/// Bytes used to serialize one `CpWord` in a persistent backing file:
/// little-endian, low 60 bits significant.
const WORD_BYTES: usize = 8;

#[derive(Debug)]
pub enum MemoryError {
    /// The backing file's length didn't match `size * WORD_BYTES`.
    SizeMismatch { expected: usize, got: usize },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { expected, got } => write!(
                f,
                "backing store size mismatch: expected {expected} bytes, got {got}"
            ),
        }
    }
}

impl std::error::Error for MemoryError {}

/// A dense array of 60-bit words with a raw little-endian persistence format.
#[derive(Debug, Clone)]
struct WordStore {
    words: Vec<CpWord>,
}

impl WordStore {
    fn new(size: usize) -> Self {
        Self {
            words: vec![0; size],
        }
    }

    fn len(&self) -> usize {
        self.words.len()
    }

    fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MemoryError> {
        let expected = self.words.len() * WORD_BYTES;
        if bytes.len() != expected {
            return Err(MemoryError::SizeMismatch {
                expected,
                got: bytes.len(),
            });
        }
        for (word, chunk) in self.words.iter_mut().zip(bytes.chunks_exact(WORD_BYTES)) {
            let mut raw = [0u8; WORD_BYTES];
            raw.copy_from_slice(chunk);
            *word = u64::from_le_bytes(raw) & MASK60;
        }
        Ok(())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * WORD_BYTES);
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    fn clear(&mut self) {
        self.words.fill(0);
    }
}

/// Central memory: `cmSize` 60-bit words, with the wrap/no-wrap model
/// feature (see the module invariants below).
#[derive(Debug, Clone)]
pub struct CentralMemory {
    store: WordStore,
    /// When `true`, an out-of-range access wraps modulo `size()`. When
    /// `false` (the "no-wrap" model feature), reads past the end return
    /// all-ones and writes are silently dropped.
    wrap: bool,
}

impl CentralMemory {
    #[must_use]
    pub fn new(size: usize, wrap: bool) -> Self {
        Self {
            store: WordStore::new(size),
            wrap,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Read the word at `absolute`, applying the wrap/no-wrap rule.
    #[must_use]
    pub fn read(&self, absolute: u32) -> CpWord {
        let size = self.store.len();
        if size == 0 {
            return MASK60;
        }
        let idx = absolute as usize;
        if idx < size {
            return self.store.words[idx];
        }
        if self.wrap {
            self.store.words[idx % size]
        } else {
            MASK60
        }
    }

    /// Write `value` at `absolute`, applying the wrap/no-wrap rule.
    pub fn write(&mut self, absolute: u32, value: CpWord) {
        let size = self.store.len();
        if size == 0 {
            return;
        }
        let idx = absolute as usize;
        let value = value & MASK60;
        if idx < size {
            self.store.words[idx] = value;
        } else if self.wrap {
            let wrapped = idx % size;
            self.store.words[wrapped] = value;
        }
        // no-wrap, out of range: silently dropped.
    }

    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MemoryError> {
        self.store.load_from_bytes(bytes)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.store.to_bytes()
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }
}

/// Extended memory (ECS or ESM). No wrap rule of its own — a CP instruction
/// that overruns `size()` reports address-out-of-range before ever calling
/// in here, so accesses here are always in-bounds by contract.
#[derive(Debug, Clone)]
pub struct ExtendedMemory {
    store: WordStore,
}

impl ExtendedMemory {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            store: WordStore::new(size),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn read(&self, addr: u32) -> CpWord {
        self.store
            .words
            .get(addr as usize)
            .copied()
            .unwrap_or(MASK60)
    }

    pub fn write(&mut self, addr: u32, value: CpWord) {
        if let Some(slot) = self.store.words.get_mut(addr as usize) {
            *slot = value & MASK60;
        }
    }

    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MemoryError> {
        self.store.load_from_bytes(bytes)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.store.to_bytes()
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_wrap_read_past_end_is_all_ones() {
        let cm = CentralMemory::new(4096, false);
        assert_eq!(cm.read(4096), MASK60);
        assert_eq!(cm.read(5000), MASK60);
    }

    #[test]
    fn no_wrap_write_past_end_is_dropped() {
        let mut cm = CentralMemory::new(4096, false);
        cm.write(4096, 0o123);
        assert_eq!(cm.read(4096), MASK60);
    }

    #[test]
    fn wrap_mode_returns_word_zero_at_size() {
        let mut cm = CentralMemory::new(4096, true);
        cm.write(0, 0o7654);
        assert_eq!(cm.read(4096), 0o7654);
    }

    #[test]
    fn read_write_round_trip() {
        let mut cm = CentralMemory::new(16, true);
        cm.write(3, MASK60);
        assert_eq!(cm.read(3), MASK60);
    }

    #[test]
    fn persistence_round_trip() {
        let mut cm = CentralMemory::new(8, true);
        for i in 0..8u32 {
            cm.write(i, u64::from(i) * 0o111);
        }
        let bytes = cm.to_bytes();
        let mut cm2 = CentralMemory::new(8, true);
        cm2.load_from_bytes(&bytes).expect("matching size");
        for i in 0..8u32 {
            assert_eq!(cm2.read(i), cm.read(i));
        }
    }

    #[test]
    fn persistence_size_mismatch_is_an_error() {
        let mut cm = CentralMemory::new(8, true);
        assert!(cm.load_from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn extended_memory_out_of_range_read_is_all_ones() {
        let em = ExtendedMemory::new(100);
        assert_eq!(em.read(200), MASK60);
    }
}
