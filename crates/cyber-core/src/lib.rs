//! Shared types for the Cyber 6000-family core: word widths, model feature
//! flags, exit conditions, and the tick/bus seams the other crates compose
//! through.

pub mod exit;
pub mod features;
pub mod tick;

pub use exit::{ExitCondition, ExitModeFlag};
pub use features::{ExtMemoryKind, ModelFeatures, ModelType};
pub use tick::Tickable;

/// A 12-bit peripheral-processor word, held in the low bits of a `u16`.
pub type PpWord = u16;

/// A 60-bit central-processor word, held in the low bits of a `u64`.
pub type CpWord = u64;

/// Mask for a 12-bit `PpWord`.
pub const MASK12: u16 = 0o7777;

/// Mask for an 18-bit field.
pub const MASK18: u32 = 0o777_777;

/// Mask for a 21-bit field (central-memory address on classic models).
pub const MASK21: u32 = 0o777_777_7;

/// Mask for a 24-bit field.
pub const MASK24: u32 = 0o77_777_777;

/// Mask for a 30-bit field (expanded-address EM reference address).
pub const MASK30: u32 = 0o7_777_777_777;

/// Mask for a full 60-bit `CpWord`.
pub const MASK60: u64 = 0x0FFF_FFFF_FFFF_FFFF;

/// Truncate a value to 12 bits.
#[must_use]
pub const fn pp(value: u32) -> PpWord {
    (value & MASK12 as u32) as PpWord
}

/// Truncate a value to 60 bits.
#[must_use]
pub const fn cp(value: u64) -> CpWord {
    value & MASK60
}

/// A device or controller slot identifier within a channel's device list.
pub type DeviceId = usize;

/// A channel identifier, `0..channel_count`.
pub type ChannelId = u8;

/// Function-code dispatch outcome, returned by every device's `func()`.
///
/// Mirrors the three-way protocol every peripheral on a channel implements:
/// a device either declines a code (fabric tries the next device), accepts
/// it (I/O will follow on subsequent `io()` pulses), or processes it
/// immediately with no follow-up I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcStatus {
    Declined,
    Accepted,
    Processed,
}

/// Upper bound on configured channels (`deadstart.c`'s `ch <= 013`/
/// `020..033` range checks stay comfortably inside this; opD's 5-bit
/// channel-select field in every PP channel opcode masks to `0..31`).
pub const MAX_CHANNELS: usize = 32;

/// The real-time clock pseudo-channel id.
pub const CH_CLOCK: ChannelId = 0o20;
/// The interlock register pseudo-channel id.
pub const CH_INTERLOCK: ChannelId = 0o21;
/// The maintenance/status-and-control pseudo-channel id, undeactivatable
/// like [`CH_CLOCK`]/[`CH_INTERLOCK`] on models that carry it.
pub const CH_MAINTENANCE: ChannelId = 0o22;

/// The seam the PPU barrel uses for EXN/MXN/MAN and RPN,
/// implemented by `cyber-cpu`'s `Cpu` without `cyber-ppu` depending on the
/// CPU crate directly.
pub trait CpuPort {
    /// The CPU's P register (for RPN).
    fn p(&self) -> u32;

    /// Whether the CPU is currently in monitor mode.
    fn monitor_mode(&self) -> bool;

    /// The CPU's monitor address (for MAN).
    fn ma(&self) -> u32;

    /// Request an exchange jump to `address`. The swap itself needs
    /// central-memory access this trait seam doesn't have, so it always
    /// completes later, on the implementation's own per-tick step; this
    /// returns `true` once the request has been accepted at a CPU parcel
    /// boundary, or `false` if the CPU is mid-word, in which
    /// case the PP opcode stays busy and retries the request on the next
    /// barrel revolution until it is accepted.
    fn request_exchange_jump(&mut self, address: u32, force_monitor: bool) -> bool;

    /// Placeholder for a CP tick driven through this trait seam. The real
    /// CPU implementation is advanced directly by the machine's tick loop
    /// (which has the central-memory access this trait can't carry), so
    /// this is never called in practice; it exists only so trait objects
    /// and test doubles without their own tick source stay satisfiable.
    fn step(&mut self);
}
