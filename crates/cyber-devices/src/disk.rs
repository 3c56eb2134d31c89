//! Disk controller: a dense cylinder/track/sector image,
//! template for the 844/885 drive families.
//!
//! Seek consumes three parameter words (cylinder, track, sector — the unit
//! is carried in the function code itself); Read/Write each consume a
//! 24-bit extended-memory address split across two parameter words, then
//! move a whole 256-word sector directly between the image and EM in
//! [`DevicePort::io_em`] — the controller never carries sector data through
//! the channel latch word-by-word the way a CM-mediated device would
//! ("data moves via EM, not CM").

use cyber_channel::{ChannelCtx, DevicePort};
use cyber_core::{CpWord, FcStatus, PpWord, MASK60};
use cyber_memory::ExtendedMemory;
use std::fmt;

/// Data words per sector.
pub const SECTOR_WORDS: usize = 256;
/// Control bytes preceding each sector's data in the image.
pub const SECTOR_CONTROL_WORDS: usize = 2;
/// Bytes used to serialize one control or data word: little-endian, low 60
/// bits significant for data, low 12 for control (same convention
/// `cyber-memory`'s backing-store format uses).
const WORD_BYTES: usize = 8;

const FN_SEEK: u16 = 0o01;
const FN_READ: u16 = 0o02;
const FN_WRITE: u16 = 0o03;
const FN_GENERAL_STATUS: u16 = 0o04;
const FN_DETAILED_STATUS: u16 = 0o05;
const FN_EXTENDED_STATUS: u16 = 0o06;
const FN_CONTINUE: u16 = 0o07;
const FN_AUTOLOAD: u16 = 0o10;

/// Status bit layout returned by the General/Detailed/Extended-Status
/// functions ("alert/non-recoverable/write-enabled/BOT/EOT/
/// busy/ready bits").
pub mod status_bits {
    pub const ALERT: u16 = 1 << 0;
    pub const NON_RECOVERABLE: u16 = 1 << 1;
    pub const WRITE_ENABLED: u16 = 1 << 2;
    pub const BOT: u16 = 1 << 3;
    pub const EOT: u16 = 1 << 4;
    pub const BUSY: u16 = 1 << 5;
    pub const READY: u16 = 1 << 6;
}

#[derive(Debug)]
pub enum DiskError {
    /// The backing image's length didn't match `geometry`'s expected size.
    SizeMismatch { expected: usize, got: usize },
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { expected, got } => write!(
                f,
                "disk image size mismatch: expected {expected} bytes, got {got}"
            ),
        }
    }
}

impl std::error::Error for DiskError {}

/// Cylinder/track/sector geometry of one disk unit.
#[derive(Debug, Clone, Copy)]
pub struct DiskGeometry {
    pub cylinders: u32,
    pub tracks: u32,
    pub sectors: u32,
}

impl DiskGeometry {
    #[must_use]
    pub fn bytes_per_sector(&self) -> usize {
        SECTOR_CONTROL_WORDS * WORD_BYTES + SECTOR_WORDS * WORD_BYTES
    }

    #[must_use]
    pub fn image_bytes(&self) -> usize {
        (self.cylinders * self.tracks * self.sectors) as usize * self.bytes_per_sector()
    }

    /// `offset = ((cyl*tracks + trk)*sectors + sec) * sectorBytes`, in
    /// sector units rather than bytes.
    #[must_use]
    pub fn sector_index(&self, cyl: u32, trk: u32, sec: u32) -> usize {
        ((cyl * self.tracks + trk) * self.sectors + sec) as usize
    }

    #[must_use]
    pub fn in_range(&self, cyl: u32, trk: u32, sec: u32) -> bool {
        cyl < self.cylinders && trk < self.tracks && sec < self.sectors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKind {
    General,
    Detailed,
    Extended,
}

#[derive(Clone, Copy)]
enum Phase {
    Idle,
    /// Awaiting cylinder, then track, then sector words ("consumes 4
    /// parameter words: unit, cyl, trk, sec" — unit is already consumed
    /// from the function code itself, so 3 remain here).
    SeekParams { remaining: u8 },
    /// Awaiting the high, then low, 12-bit half of a 24-bit EM address.
    AwaitEmAddr { op: TransferOp, hi: Option<u16> },
    StatusReply { kind: StatusKind, word: u8 },
}

/// One disk controller: a geometry, a dense sector image, and the
/// seek/transfer/status state machine below.
pub struct DiskController {
    geometry: DiskGeometry,
    image: Vec<u8>,
    cyl: u32,
    trk: u32,
    sec: u32,
    write_enabled: bool,
    abnormal: bool,
    non_recoverable: bool,
    phase: Phase,
}

impl DiskController {
    /// Build a controller over a freshly zeroed image of `geometry`'s size.
    #[must_use]
    pub fn new(geometry: DiskGeometry, write_enabled: bool) -> Self {
        Self {
            image: vec![0u8; geometry.image_bytes()],
            geometry,
            cyl: 0,
            trk: 0,
            sec: 0,
            write_enabled,
            abnormal: false,
            non_recoverable: false,
            phase: Phase::Idle,
        }
    }

    /// Load an existing image, rejecting a length that doesn't match
    /// `geometry`.
    pub fn from_image(
        geometry: DiskGeometry,
        image: Vec<u8>,
        write_enabled: bool,
    ) -> Result<Self, DiskError> {
        let expected = geometry.image_bytes();
        if image.len() != expected {
            return Err(DiskError::SizeMismatch {
                expected,
                got: image.len(),
            });
        }
        Ok(Self {
            image,
            geometry,
            cyl: 0,
            trk: 0,
            sec: 0,
            write_enabled,
            abnormal: false,
            non_recoverable: false,
            phase: Phase::Idle,
        })
    }

    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    #[must_use]
    pub fn position(&self) -> (u32, u32, u32) {
        (self.cyl, self.trk, self.sec)
    }

    fn sector_offset(&self) -> usize {
        self.geometry.sector_index(self.cyl, self.trk, self.sec) * self.geometry.bytes_per_sector()
    }

    /// Advance to the next sector, rolling into the next track/cylinder as
    /// each dimension fills ("advances to next sector after each
    /// read/write").
    fn advance_sector(&mut self) {
        self.sec += 1;
        if self.sec >= self.geometry.sectors {
            self.sec = 0;
            self.trk += 1;
            if self.trk >= self.geometry.tracks {
                self.trk = 0;
                self.cyl += 1;
            }
        }
    }

    fn seek(&mut self, cyl: u32, trk: u32, sec: u32) {
        if self.geometry.in_range(cyl, trk, sec) {
            self.cyl = cyl;
            self.trk = trk;
            self.sec = sec;
            self.abnormal = false;
            self.non_recoverable = false;
        } else {
            // Out-of-range cyl/trk/sec sets the abnormal+non-recoverable
            // status bits and leaves position unchanged.
            self.abnormal = true;
            self.non_recoverable = true;
        }
    }

    fn status_word(&self, kind: StatusKind, word: u8) -> PpWord {
        let mut bits = status_bits::READY;
        if self.abnormal {
            bits |= status_bits::ALERT;
        }
        if self.non_recoverable {
            bits |= status_bits::NON_RECOVERABLE;
        }
        if self.write_enabled {
            bits |= status_bits::WRITE_ENABLED;
        }
        if self.cyl == 0 && self.trk == 0 && self.sec == 0 {
            bits |= status_bits::BOT;
        }
        if self.cyl + 1 >= self.geometry.cylinders {
            bits |= status_bits::EOT;
        }
        match (kind, word) {
            (StatusKind::General, 0) => bits,
            (StatusKind::Detailed, 0) => bits,
            (StatusKind::Detailed, 1) => {
                u16::try_from(self.cyl).unwrap_or(u16::MAX) & cyber_core::MASK12
            }
            (StatusKind::Extended, 0) => bits,
            (StatusKind::Extended, 1) => {
                u16::try_from(self.trk).unwrap_or(u16::MAX) & cyber_core::MASK12
            }
            (StatusKind::Extended, 2) => {
                u16::try_from(self.sec).unwrap_or(u16::MAX) & cyber_core::MASK12
            }
            _ => 0,
        }
    }

    /// Words a status reply for `kind` carries before going empty.
    fn status_len(kind: StatusKind) -> u8 {
        match kind {
            StatusKind::General => 1,
            StatusKind::Detailed => 2,
            StatusKind::Extended => 3,
        }
    }

    fn do_transfer(&mut self, op: TransferOp, em_addr: u32, em: &mut ExtendedMemory) {
        if !self.geometry.in_range(self.cyl, self.trk, self.sec) {
            self.abnormal = true;
            self.non_recoverable = true;
            return;
        }
        let start = self.sector_offset();
        match op {
            TransferOp::Read => {
                let control = read_control(&self.image[start..]);
                em.write(em_addr, u64::from(control[0]));
                em.write(em_addr.wrapping_add(1), u64::from(control[1]));
                let data_start = start + SECTOR_CONTROL_WORDS * WORD_BYTES;
                for i in 0..SECTOR_WORDS {
                    let word = read_word(&self.image[data_start + i * WORD_BYTES..]);
                    em.write(em_addr.wrapping_add(2 + i as u32), word);
                }
            }
            TransferOp::Write => {
                if !self.write_enabled {
                    self.abnormal = true;
                    self.non_recoverable = true;
                    return;
                }
                let control0 = em.read(em_addr) & u64::from(cyber_core::MASK12);
                let control1 = em.read(em_addr.wrapping_add(1)) & u64::from(cyber_core::MASK12);
                write_word(&mut self.image[start..], control0);
                write_word(&mut self.image[start + WORD_BYTES..], control1);
                let data_start = start + SECTOR_CONTROL_WORDS * WORD_BYTES;
                for i in 0..SECTOR_WORDS {
                    let word = em.read(em_addr.wrapping_add(2 + i as u32));
                    write_word(&mut self.image[data_start + i * WORD_BYTES..], word);
                }
            }
        }
        self.advance_sector();
    }
}

fn read_word(bytes: &[u8]) -> CpWord {
    let mut raw = [0u8; WORD_BYTES];
    raw.copy_from_slice(&bytes[..WORD_BYTES]);
    u64::from_le_bytes(raw) & MASK60
}

fn write_word(bytes: &mut [u8], value: CpWord) {
    bytes[..WORD_BYTES].copy_from_slice(&(value & MASK60).to_le_bytes());
}

fn read_control(bytes: &[u8]) -> [u16; SECTOR_CONTROL_WORDS] {
    [
        (read_word(bytes) & u64::from(cyber_core::MASK12)) as u16,
        (read_word(&bytes[WORD_BYTES..]) & u64::from(cyber_core::MASK12)) as u16,
    ]
}

impl DevicePort for DiskController {
    fn func(&mut self, code: PpWord) -> FcStatus {
        let selector = (code >> 6) & 0o77;
        match selector {
            FN_SEEK => {
                self.phase = Phase::SeekParams { remaining: 3 };
                FcStatus::Accepted
            }
            FN_READ => {
                self.phase = Phase::AwaitEmAddr {
                    op: TransferOp::Read,
                    hi: None,
                };
                FcStatus::Accepted
            }
            FN_WRITE => {
                self.phase = Phase::AwaitEmAddr {
                    op: TransferOp::Write,
                    hi: None,
                };
                FcStatus::Accepted
            }
            FN_GENERAL_STATUS => {
                self.phase = Phase::StatusReply {
                    kind: StatusKind::General,
                    word: 0,
                };
                FcStatus::Accepted
            }
            FN_DETAILED_STATUS => {
                self.phase = Phase::StatusReply {
                    kind: StatusKind::Detailed,
                    word: 0,
                };
                FcStatus::Accepted
            }
            FN_EXTENDED_STATUS => {
                self.phase = Phase::StatusReply {
                    kind: StatusKind::Extended,
                    word: 0,
                };
                FcStatus::Accepted
            }
            FN_CONTINUE => {
                self.advance_sector();
                FcStatus::Processed
            }
            FN_AUTOLOAD => {
                self.cyl = 0;
                self.trk = 0;
                self.sec = 0;
                self.abnormal = false;
                self.non_recoverable = false;
                FcStatus::Processed
            }
            _ => FcStatus::Declined,
        }
    }

    fn io(&mut self, ctx: &mut ChannelCtx) {
        match self.phase {
            Phase::SeekParams { remaining } if ctx.full => {
                let word = ctx.data;
                let remaining = remaining - 1;
                match remaining {
                    2 => self.cyl = u32::from(word),
                    1 => self.trk = u32::from(word),
                    0 => {
                        let sec = u32::from(word);
                        self.seek(self.cyl, self.trk, sec);
                    }
                    _ => {}
                }
                self.phase = if remaining == 0 {
                    Phase::Idle
                } else {
                    Phase::SeekParams { remaining }
                };
                ctx.full = false;
                ctx.active = true;
            }
            Phase::AwaitEmAddr { op, hi } if ctx.full => {
                // The low half and the actual transfer happen in `io_em`,
                // which has the EM handle this hook doesn't.
                if hi.is_none() {
                    self.phase = Phase::AwaitEmAddr {
                        op,
                        hi: Some(ctx.data),
                    };
                }
                ctx.full = false;
                ctx.active = true;
            }
            Phase::StatusReply { kind, word } => {
                ctx.data = self.status_word(kind, word);
                let next = word + 1;
                if next >= Self::status_len(kind) {
                    self.phase = Phase::Idle;
                    ctx.full = false;
                } else {
                    self.phase = Phase::StatusReply { kind, word: next };
                    ctx.full = true;
                }
                ctx.active = true;
            }
            _ => {}
        }
    }

    fn io_em(&mut self, ctx: &mut ChannelCtx, em: &mut ExtendedMemory) {
        if let Phase::AwaitEmAddr { op, hi: Some(hi) } = self.phase {
            if ctx.full {
                let lo = ctx.data;
                let addr = (u32::from(hi) << 12) | u32::from(lo);
                self.do_transfer(op, addr, em);
                self.phase = Phase::Idle;
                ctx.full = false;
                ctx.active = true;
                return;
            }
        }
        self.io(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DiskGeometry {
        DiskGeometry {
            cylinders: 4,
            tracks: 2,
            sectors: 3,
        }
    }

    #[test]
    fn seek_moves_to_target_sector() {
        let mut disk = DiskController::new(geometry(), true);
        assert_eq!(disk.func(FN_SEEK << 6), FcStatus::Accepted);
        let mut ctx = ChannelCtx {
            data: 2,
            active: false,
            full: true,
        };
        disk.io(&mut ctx); // cyl
        ctx.data = 1;
        ctx.full = true;
        disk.io(&mut ctx); // trk
        ctx.data = 2;
        ctx.full = true;
        disk.io(&mut ctx); // sec
        assert_eq!(disk.position(), (2, 1, 2));
    }

    #[test]
    fn seek_out_of_range_sets_abnormal_status() {
        let mut disk = DiskController::new(geometry(), true);
        disk.func(FN_SEEK << 6);
        for word in [99u16, 0, 0] {
            let mut ctx = ChannelCtx {
                data: word,
                active: false,
                full: true,
            };
            disk.io(&mut ctx);
        }
        assert!(disk.abnormal);
        assert!(disk.non_recoverable);
    }

    #[test]
    fn write_then_read_round_trips_a_sector() {
        let mut disk = DiskController::new(geometry(), true);
        let mut em = ExtendedMemory::new(1024);
        em.write(100, 0o17);
        em.write(101, 0o42);
        for i in 0..SECTOR_WORDS as u32 {
            em.write(102 + i, u64::from(i) + 1);
        }

        disk.func(FN_WRITE << 6);
        let mut ctx = ChannelCtx {
            data: 0,
            active: false,
            full: true,
        };
        disk.io_em(&mut ctx, &mut em); // hi addr half
        ctx.data = 100;
        ctx.full = true;
        disk.io_em(&mut ctx, &mut em); // lo addr half, triggers transfer
        assert_eq!(disk.position(), (0, 0, 1));

        // Seek back and read the sector we just wrote into a fresh EM
        // region.
        disk.func(FN_SEEK << 6);
        for word in [0u16, 0, 0] {
            let mut ctx = ChannelCtx {
                data: word,
                active: false,
                full: true,
            };
            disk.io(&mut ctx);
        }
        disk.func(FN_READ << 6);
        let mut ctx = ChannelCtx {
            data: 0,
            active: false,
            full: true,
        };
        disk.io_em(&mut ctx, &mut em);
        ctx.data = 500;
        ctx.full = true;
        disk.io_em(&mut ctx, &mut em);

        assert_eq!(em.read(500) & u64::from(cyber_core::MASK12), 0o17);
        assert_eq!(em.read(501) & u64::from(cyber_core::MASK12), 0o42);
        assert_eq!(em.read(502), 1);
        assert_eq!(em.read(502 + SECTOR_WORDS as u32 - 1), SECTOR_WORDS as u64);
    }

    #[test]
    fn write_declined_when_not_write_enabled() {
        let mut disk = DiskController::new(geometry(), false);
        let mut em = ExtendedMemory::new(1024);
        disk.func(FN_WRITE << 6);
        let mut ctx = ChannelCtx {
            data: 0,
            active: false,
            full: true,
        };
        disk.io_em(&mut ctx, &mut em);
        ctx.data = 200;
        ctx.full = true;
        disk.io_em(&mut ctx, &mut em);
        assert!(disk.non_recoverable);
    }

    #[test]
    fn general_status_reports_ready_and_write_enabled() {
        let mut disk = DiskController::new(geometry(), true);
        disk.func(FN_GENERAL_STATUS << 6);
        let mut ctx = ChannelCtx::default();
        disk.io(&mut ctx);
        assert_ne!(ctx.data & status_bits::READY, 0);
        assert_ne!(ctx.data & status_bits::WRITE_ENABLED, 0);
        assert_ne!(ctx.data & status_bits::BOT, 0);
    }

    #[test]
    fn from_image_rejects_mismatched_length() {
        let result = DiskController::from_image(geometry(), vec![0u8; 10], true);
        assert!(result.is_err());
    }

    #[test]
    fn continue_advances_sector_without_reseek() {
        let mut disk = DiskController::new(geometry(), true);
        disk.func(FN_CONTINUE << 6);
        assert_eq!(disk.position(), (0, 0, 1));
    }
}
