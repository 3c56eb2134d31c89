//! Tape controller: SIMH `.tap` storage, template for the reel
//! and cartridge drive families.
//!
//! A `.tap` image is a flat sequence of records: each data block is a
//! 4-byte little-endian length, the bytes themselves, then a trailing copy
//! of the length; a zero-length record is a tape mark. The
//! controller keeps the parsed record list and a head position rather than
//! re-scanning raw bytes on every move, the way `format-adf` keeps a parsed
//! `Adf` rather than re-deriving offsets from a byte slice each call.

use cyber_channel::{ChannelCtx, DevicePort};
use cyber_core::{FcStatus, PpWord};
use std::collections::VecDeque;
use std::fmt;

/// Bytes preceding and following every `.tap` data record.
const LENGTH_FIELD_BYTES: usize = 4;
/// Number of loadable conversion tables per direction ("one of four
/// loadable tables").
pub const CONV_TABLE_COUNT: usize = 4;
/// Entries per conversion table — one per possible byte value.
pub const CONV_TABLE_SIZE: usize = 256;

const FN_CONNECT: u16 = 0o01;
const FN_REWIND: u16 = 0o02;
const FN_REWIND_UNLOAD: u16 = 0o03;
const FN_FORESPACE: u16 = 0o04;
const FN_BACKSPACE: u16 = 0o05;
const FN_SEARCH_MARK_FWD: u16 = 0o06;
const FN_SEARCH_MARK_BKW: u16 = 0o07;
const FN_READ_FWD: u16 = 0o10;
const FN_READ_BKW: u16 = 0o11;
const FN_WRITE: u16 = 0o12;
const FN_WRITE_SHORT: u16 = 0o13;
const FN_WRITE_MARK: u16 = 0o14;
const FN_GENERAL_STATUS: u16 = 0o15;
const FN_DETAILED_STATUS: u16 = 0o16;
const FN_UNIT_STATUS: u16 = 0o17;
const FN_COPY_READ_CONV: u16 = 0o20;
const FN_COPY_WRITE_CONV: u16 = 0o21;
const FN_LOAD_READ_CONV: u16 = 0o22;
const FN_LOAD_WRITE_CONV: u16 = 0o23;
const FN_MASTER_CLEAR: u16 = 0o24;

pub mod status_bits {
    pub const READY: u16 = 1 << 0;
    pub const BOT: u16 = 1 << 1;
    pub const EOT: u16 = 1 << 2;
    pub const TAPE_MARK: u16 = 1 << 3;
    pub const DIAGNOSTIC_ERROR: u16 = 1 << 4;
    pub const WRITE_ENABLED: u16 = 1 << 5;
}

#[derive(Debug)]
pub enum TapeError {
    /// A record's leading and trailing length fields disagreed by more than
    /// the tolerated one-byte padding ("tolerates padded
    /// trailers").
    TruncatedOrCorrupt,
}

impl fmt::Display for TapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedOrCorrupt => write!(f, "tape image is truncated or malformed"),
        }
    }
}

impl std::error::Error for TapeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Data(Vec<u8>),
    Mark,
}

/// Parse a `.tap` byte stream into records. `tolerate_padding`
/// reproduces the source's leniency toward a trailing length whose low byte
/// is off by one (open question, resolved here as an explicit
/// opt-in rather than always-on so a strict caller can still reject the
/// image).
fn parse_tap(bytes: &[u8], tolerate_padding: bool) -> Result<Vec<Record>, TapeError> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if pos + LENGTH_FIELD_BYTES > bytes.len() {
            return Err(TapeError::TruncatedOrCorrupt);
        }
        let mut len_bytes = [0u8; LENGTH_FIELD_BYTES];
        len_bytes.copy_from_slice(&bytes[pos..pos + LENGTH_FIELD_BYTES]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        pos += LENGTH_FIELD_BYTES;
        if len == 0 {
            records.push(Record::Mark);
            continue;
        }
        if pos + len + LENGTH_FIELD_BYTES > bytes.len() {
            return Err(TapeError::TruncatedOrCorrupt);
        }
        let data = bytes[pos..pos + len].to_vec();
        pos += len;
        let mut trailer = [0u8; LENGTH_FIELD_BYTES];
        trailer.copy_from_slice(&bytes[pos..pos + LENGTH_FIELD_BYTES]);
        let trailer_len = u32::from_le_bytes(trailer) as usize;
        if trailer_len != len {
            let padded = tolerate_padding
                && trailer[1..] == len_bytes[1..]
                && u32::from(trailer[0]).abs_diff(u32::from(len_bytes[0])) <= 1;
            if !padded {
                return Err(TapeError::TruncatedOrCorrupt);
            }
        }
        pos += LENGTH_FIELD_BYTES;
        records.push(Record::Data(data));
    }
    Ok(records)
}

fn serialize_tap(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        match record {
            Record::Mark => out.extend_from_slice(&0u32.to_le_bytes()),
            Record::Data(data) => {
                let len = data.len() as u32;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(&len.to_le_bytes());
            }
        }
    }
    out
}

/// Pack 3 raw bytes into 2 12-bit PP words (`ReadFwd` packing).
fn pack_words(bytes: &[u8]) -> Vec<PpWord> {
    let mut words = Vec::with_capacity(bytes.len() * 2 / 3 + 2);
    for chunk in bytes.chunks(3) {
        match chunk {
            [b0, b1, b2] => {
                words.push((u16::from(*b0) << 4) | (u16::from(*b1) >> 4));
                words.push(((u16::from(*b1) & 0xF) << 8) | u16::from(*b2));
            }
            [b0, b1] => {
                words.push((u16::from(*b0) << 4) | (u16::from(*b1) >> 4));
                words.push((u16::from(*b1) & 0xF) << 8);
            }
            [b0] => words.push(u16::from(*b0) << 4),
            _ => unreachable!("chunks(3) never yields more than 3 elements"),
        }
    }
    words
}

/// Inverse of [`pack_words`]: unpack 2 12-bit words back into 3 bytes.
fn unpack_words(words: &[PpWord]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 3 / 2 + 2);
    for pair in words.chunks(2) {
        match pair {
            [w0, w1] => {
                bytes.push((w0 >> 4) as u8);
                bytes.push((((w0 & 0xF) << 4) | (w1 >> 8)) as u8);
                bytes.push((w1 & 0xFF) as u8);
            }
            [w0] => bytes.push((w0 >> 4) as u8),
            _ => unreachable!("chunks(2) never yields more than 2 elements"),
        }
    }
    bytes
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reading,
    Writing,
    StatusReply,
    ConvReply { table: usize, index: usize },
    ConvLoad { table: usize, write: bool },
}

/// One tape controller: parsed `.tap` records, head position, and the
/// function/phase state machine below.
pub struct TapeController {
    records: Vec<Record>,
    position: usize,
    bot: bool,
    connected: Option<u8>,
    write_enabled: bool,
    diagnostic_error: bool,
    read_conv: [[u8; CONV_TABLE_SIZE]; CONV_TABLE_COUNT],
    write_conv: [[u8; CONV_TABLE_SIZE]; CONV_TABLE_COUNT],
    pending_words: VecDeque<PpWord>,
    pending_write: Vec<u8>,
    phase: Phase,
}

impl TapeController {
    #[must_use]
    pub fn new(write_enabled: bool) -> Self {
        Self {
            records: Vec::new(),
            position: 0,
            bot: true,
            connected: None,
            write_enabled,
            diagnostic_error: false,
            read_conv: [identity_table(); CONV_TABLE_COUNT],
            write_conv: [identity_table(); CONV_TABLE_COUNT],
            pending_words: VecDeque::new(),
            pending_write: Vec::new(),
            phase: Phase::Idle,
        }
    }

    pub fn from_tap_bytes(bytes: &[u8], write_enabled: bool) -> Result<Self, TapeError> {
        let records = parse_tap(bytes, false)?;
        let mut tape = Self::new(write_enabled);
        tape.records = records;
        Ok(tape)
    }

    #[must_use]
    pub fn to_tap_bytes(&self) -> Vec<u8> {
        serialize_tap(&self.records)
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.bot
    }

    /// Serialize all eight conversion tables (four read, four write) as one
    /// flat byte blob for the per-controller backing file
    /// (`mt679StoreC<ch>E<eq>`).
    #[must_use]
    pub fn conv_tables_to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * CONV_TABLE_COUNT * CONV_TABLE_SIZE);
        for table in &self.read_conv {
            out.extend_from_slice(table);
        }
        for table in &self.write_conv {
            out.extend_from_slice(table);
        }
        out
    }

    /// Load all eight conversion tables back from [`Self::conv_tables_to_bytes`]'s
    /// layout. A length mismatch leaves the identity tables in place.
    pub fn load_conv_tables(&mut self, bytes: &[u8]) -> Result<(), TapeError> {
        let expected = 2 * CONV_TABLE_COUNT * CONV_TABLE_SIZE;
        if bytes.len() != expected {
            return Err(TapeError::TruncatedOrCorrupt);
        }
        let mut pos = 0;
        for table in &mut self.read_conv {
            table.copy_from_slice(&bytes[pos..pos + CONV_TABLE_SIZE]);
            pos += CONV_TABLE_SIZE;
        }
        for table in &mut self.write_conv {
            table.copy_from_slice(&bytes[pos..pos + CONV_TABLE_SIZE]);
            pos += CONV_TABLE_SIZE;
        }
        Ok(())
    }

    fn clear_bot(&mut self) {
        self.bot = false;
    }

    fn current_record(&self) -> Option<&Record> {
        self.records.get(self.position)
    }

    fn read_pending_data(&mut self, forward: bool) {
        let raw = match self.current_record() {
            Some(Record::Data(bytes)) => bytes.clone(),
            Some(Record::Mark) => {
                self.pending_words.clear();
                return;
            }
            None => {
                self.diagnostic_error = true;
                self.pending_words.clear();
                return;
            }
        };
        let words = pack_words(&raw);
        self.pending_words = if forward {
            words.into_iter().collect()
        } else {
            words.into_iter().rev().collect()
        };
        if forward {
            self.position += 1;
        } else if self.position > 0 {
            self.position -= 1;
        }
    }

    fn finish_write(&mut self) {
        if self.pending_write.is_empty() {
            self.phase = Phase::Idle;
            return;
        }
        let data = std::mem::take(&mut self.pending_write);
        self.records.truncate(self.position);
        self.records.push(Record::Data(data));
        self.records.truncate(self.position + 1);
        self.position += 1;
        self.phase = Phase::Idle;
    }

    fn write_mark(&mut self) {
        self.records.truncate(self.position);
        self.records.push(Record::Mark);
        self.position += 1;
    }

    fn general_status(&self) -> PpWord {
        let mut bits = status_bits::READY;
        if self.bot {
            bits |= status_bits::BOT;
        }
        if self.position >= self.records.len() {
            bits |= status_bits::EOT;
        }
        if self.write_enabled {
            bits |= status_bits::WRITE_ENABLED;
        }
        if self.diagnostic_error {
            bits |= status_bits::DIAGNOSTIC_ERROR;
        }
        bits
    }
}

fn identity_table() -> [u8; CONV_TABLE_SIZE] {
    let mut table = [0u8; CONV_TABLE_SIZE];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u8;
    }
    table
}

impl DevicePort for TapeController {
    fn func(&mut self, code: PpWord) -> FcStatus {
        let selector = (code >> 6) & 0o77;
        match selector {
            FN_CONNECT => {
                self.connected = Some((code & 0o77) as u8);
                FcStatus::Processed
            }
            FN_REWIND => {
                self.position = 0;
                self.bot = true;
                FcStatus::Processed
            }
            FN_REWIND_UNLOAD => {
                self.position = 0;
                self.bot = true;
                self.connected = None;
                FcStatus::Processed
            }
            FN_FORESPACE => {
                self.clear_bot();
                if self.position < self.records.len() {
                    self.position += 1;
                }
                FcStatus::Processed
            }
            FN_BACKSPACE => {
                self.clear_bot();
                self.position = self.position.saturating_sub(1);
                FcStatus::Processed
            }
            FN_SEARCH_MARK_FWD => {
                self.clear_bot();
                while self.position < self.records.len()
                    && self.records[self.position] != Record::Mark
                {
                    self.position += 1;
                }
                FcStatus::Processed
            }
            FN_SEARCH_MARK_BKW => {
                self.clear_bot();
                while self.position > 0 && self.records[self.position - 1] != Record::Mark {
                    self.position -= 1;
                }
                FcStatus::Processed
            }
            FN_READ_FWD => {
                self.clear_bot();
                self.diagnostic_error = false;
                self.read_pending_data(true);
                self.phase = Phase::Reading;
                FcStatus::Accepted
            }
            FN_READ_BKW => {
                self.clear_bot();
                self.diagnostic_error = false;
                self.read_pending_data(false);
                self.phase = Phase::Reading;
                FcStatus::Accepted
            }
            FN_WRITE | FN_WRITE_SHORT => {
                self.clear_bot();
                if !self.write_enabled {
                    self.diagnostic_error = true;
                    return FcStatus::Processed;
                }
                self.pending_write.clear();
                self.phase = Phase::Writing;
                FcStatus::Accepted
            }
            FN_WRITE_MARK => {
                self.clear_bot();
                if self.write_enabled {
                    self.write_mark();
                } else {
                    self.diagnostic_error = true;
                }
                FcStatus::Processed
            }
            FN_GENERAL_STATUS | FN_DETAILED_STATUS | FN_UNIT_STATUS => {
                self.phase = Phase::StatusReply;
                FcStatus::Accepted
            }
            FN_COPY_READ_CONV => {
                self.phase = Phase::ConvReply {
                    table: (code & 0o3) as usize,
                    index: 0,
                };
                FcStatus::Accepted
            }
            FN_COPY_WRITE_CONV => {
                self.phase = Phase::ConvReply {
                    table: CONV_TABLE_COUNT + (code & 0o3) as usize,
                    index: 0,
                };
                FcStatus::Accepted
            }
            FN_LOAD_READ_CONV => {
                self.phase = Phase::ConvLoad {
                    table: (code & 0o3) as usize,
                    write: false,
                };
                FcStatus::Accepted
            }
            FN_LOAD_WRITE_CONV => {
                self.phase = Phase::ConvLoad {
                    table: (code & 0o3) as usize,
                    write: true,
                };
                FcStatus::Accepted
            }
            FN_MASTER_CLEAR => {
                self.position = 0;
                self.bot = true;
                self.connected = None;
                self.diagnostic_error = false;
                self.pending_words.clear();
                self.pending_write.clear();
                self.phase = Phase::Idle;
                FcStatus::Processed
            }
            _ => FcStatus::Declined,
        }
    }

    fn io(&mut self, ctx: &mut ChannelCtx) {
        match self.phase {
            Phase::Reading => {
                if let Some(word) = self.pending_words.pop_front() {
                    ctx.data = word;
                    ctx.full = true;
                } else {
                    ctx.full = false;
                    self.phase = Phase::Idle;
                }
                ctx.active = true;
            }
            Phase::Writing if ctx.full => {
                let bytes = unpack_words(&[ctx.data]);
                self.pending_write.extend_from_slice(&bytes);
                ctx.full = false;
                ctx.active = true;
            }
            Phase::StatusReply => {
                ctx.data = self.general_status();
                self.phase = Phase::Idle;
                ctx.full = false;
                ctx.active = true;
            }
            Phase::ConvReply { table, index } => {
                let value = if table < CONV_TABLE_COUNT {
                    self.read_conv[table][index]
                } else {
                    self.write_conv[table - CONV_TABLE_COUNT][index]
                };
                ctx.data = PpWord::from(value);
                let next = index + 1;
                if next >= CONV_TABLE_SIZE {
                    self.phase = Phase::Idle;
                    ctx.full = false;
                } else {
                    self.phase = Phase::ConvReply { table, index: next };
                    ctx.full = true;
                }
                ctx.active = true;
            }
            Phase::ConvLoad { table, write } if ctx.full => {
                let index_slot = &mut self.pending_write;
                let index = index_slot.len();
                let byte = (ctx.data & 0xFF) as u8;
                if write {
                    self.write_conv[table][index % CONV_TABLE_SIZE] = byte;
                } else {
                    self.read_conv[table][index % CONV_TABLE_SIZE] = byte;
                }
                index_slot.push(byte);
                if index_slot.len() >= CONV_TABLE_SIZE {
                    index_slot.clear();
                    self.phase = Phase::Idle;
                }
                ctx.full = false;
                ctx.active = true;
            }
            _ => {}
        }
    }

    fn disconnect(&mut self) {
        if self.phase == Phase::Writing {
            self.finish_write();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_block_tap(bytes: &[u8]) -> Vec<u8> {
        serialize_tap(&[Record::Data(bytes.to_vec())])
    }

    #[test]
    fn read_fwd_packs_three_bytes_into_two_words() {
        let image = single_block_tap(&[0x41, 0x42, 0x43, 0x44, 0x45, 0x46]);
        let mut tape = TapeController::from_tap_bytes(&image, true).expect("valid tap");
        assert_eq!(tape.func((FN_CONNECT << 6) | 0), FcStatus::Processed);
        assert_eq!(tape.func(FN_READ_FWD << 6), FcStatus::Accepted);

        let mut words = Vec::new();
        loop {
            let mut ctx = ChannelCtx::default();
            tape.io(&mut ctx);
            if !ctx.full {
                break;
            }
            words.push(ctx.data);
        }

        assert_eq!(
            words,
            vec![
                (u16::from(0x41u8) << 4) | (u16::from(0x42u8) >> 4),
                ((u16::from(0x42u8) & 0xF) << 8) | u16::from(0x43u8),
                (u16::from(0x44u8) << 4) | (u16::from(0x45u8) >> 4),
                ((u16::from(0x45u8) & 0xF) << 8) | u16::from(0x46u8),
            ]
        );
    }

    #[test]
    fn general_status_after_read_clears_bot_and_reports_ready() {
        let image = single_block_tap(&[1, 2, 3]);
        let mut tape = TapeController::from_tap_bytes(&image, true).expect("valid tap");
        tape.func((FN_CONNECT << 6) | 0);
        tape.func(FN_READ_FWD << 6);
        while {
            let mut ctx = ChannelCtx::default();
            tape.io(&mut ctx);
            ctx.full
        } {}

        tape.func(FN_GENERAL_STATUS << 6);
        let mut ctx = ChannelCtx::default();
        tape.io(&mut ctx);
        assert_ne!(ctx.data & status_bits::READY, 0);
        assert_eq!(ctx.data & status_bits::BOT, 0);
    }

    #[test]
    fn space_forward_then_backward_returns_to_same_position() {
        let image = serialize_tap(&[
            Record::Data(vec![1, 2, 3]),
            Record::Data(vec![4, 5, 6]),
            Record::Mark,
        ]);
        let mut tape = TapeController::from_tap_bytes(&image, true).expect("valid tap");
        tape.func(FN_FORESPACE << 6);
        let after_fwd = tape.position();
        tape.func(FN_BACKSPACE << 6);
        assert_eq!(tape.position(), after_fwd - 1);
    }

    #[test]
    fn read_fwd_then_read_bkw_reverses_bytes() {
        let image = single_block_tap(&[1, 2, 3, 4, 5, 6]);
        let mut tape = TapeController::from_tap_bytes(&image, true).expect("valid tap");
        tape.func(FN_READ_FWD << 6);
        let mut fwd_words = Vec::new();
        while {
            let mut ctx = ChannelCtx::default();
            tape.io(&mut ctx);
            let full = ctx.full;
            if full {
                fwd_words.push(ctx.data);
            }
            full
        } {}
        let fwd_bytes = unpack_words(&fwd_words);

        tape.func(FN_READ_BKW << 6);
        let mut bkw_words = Vec::new();
        while {
            let mut ctx = ChannelCtx::default();
            tape.io(&mut ctx);
            let full = ctx.full;
            if full {
                bkw_words.push(ctx.data);
            }
            full
        } {}
        let mut bkw_bytes = unpack_words(&bkw_words);
        bkw_bytes.reverse();
        assert_eq!(fwd_bytes, bkw_bytes);
    }

    #[test]
    fn write_then_read_round_trips_a_block() {
        let mut tape = TapeController::new(true);
        tape.func(FN_WRITE << 6);
        for word in pack_words(&[9, 8, 7]) {
            let mut ctx = ChannelCtx {
                data: word,
                active: false,
                full: true,
            };
            tape.io(&mut ctx);
        }
        tape.disconnect();
        assert_eq!(tape.records.len(), 1);

        tape.func(FN_REWIND << 6);
        tape.func(FN_READ_FWD << 6);
        let mut words = Vec::new();
        while {
            let mut ctx = ChannelCtx::default();
            tape.io(&mut ctx);
            let full = ctx.full;
            if full {
                words.push(ctx.data);
            }
            full
        } {}
        assert_eq!(unpack_words(&words), vec![9, 8, 7]);
    }

    #[test]
    fn write_declined_when_not_write_enabled() {
        let mut tape = TapeController::new(false);
        assert_eq!(tape.func(FN_WRITE << 6), FcStatus::Processed);
        assert!(tape.diagnostic_error);
    }

    #[test]
    fn malformed_tap_is_rejected() {
        assert!(parse_tap(&[1, 0, 0, 0], false).is_err());
    }

    #[test]
    fn padded_trailer_is_tolerated_when_opted_in() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(&4u32.to_le_bytes()); // off by one
        assert!(parse_tap(&bytes, false).is_err());
        assert!(parse_tap(&bytes, true).is_ok());
    }

    #[test]
    fn master_clear_resets_position_and_bot() {
        let mut tape = TapeController::new(true);
        tape.func(FN_FORESPACE << 6);
        tape.func(FN_MASTER_CLEAR << 6);
        assert_eq!(tape.position(), 0);
        assert!(tape.is_bot());
    }

    #[test]
    fn conversion_tables_round_trip_through_bytes() {
        let mut tape = TapeController::new(true);
        tape.read_conv[0][5] = 0xAB;
        tape.write_conv[3][255] = 0xCD;
        let bytes = tape.conv_tables_to_bytes();
        assert_eq!(bytes.len(), 2 * CONV_TABLE_COUNT * CONV_TABLE_SIZE);

        let mut tape2 = TapeController::new(true);
        tape2.load_conv_tables(&bytes).expect("matching length");
        assert_eq!(tape2.read_conv[0][5], 0xAB);
        assert_eq!(tape2.write_conv[3][255], 0xCD);
    }

    #[test]
    fn conversion_table_length_mismatch_is_rejected() {
        let mut tape = TapeController::new(true);
        assert!(tape.load_conv_tables(&[0u8; 10]).is_err());
    }
}
