//! Card reader: template for the 405/3447 families. Reads
//! successive 80-column cards from an input source, producing one 12-bit
//! word of column data per column.
//!
//! Column encoding exploits the same 12-bit width as [`cyber_core::PpWord`]
//! itself: the twelve Hollerith punch rows (12, 11, 0..9) map one-for-one
//! onto bits 11..0, so a column is represented directly as a `PpWord`
//! bitmask rather than needing a separate row/column matrix type.

use cyber_channel::{ChannelCtx, DevicePort};
use cyber_core::{FcStatus, PpWord};
use std::fmt;

const FN_SELECT: u16 = 0o700;
const FN_READ: u16 = 0o701;
const FN_STATUS_REQ: u16 = 0o702;

pub mod status_bits {
    pub const READY: u16 = 1 << 0;
    pub const END_OF_DECK: u16 = 1 << 1;
}

/// Columns per card.
pub const COLUMNS_PER_CARD: usize = 80;

/// Bit position of Hollerith row 12 within a column word; rows 11, 0..9
/// follow at bit 10 down to bit 0.
const ROW_12_BIT: u32 = 11;
const ROW_11_BIT: u32 = 10;

#[derive(Debug)]
pub enum CardReaderError {
    /// A card's row data didn't divide evenly into [`COLUMNS_PER_CARD`]
    /// columns.
    MalformedCard { len: usize },
}

impl fmt::Display for CardReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCard { len } => {
                write!(f, "card has {len} columns, expected {COLUMNS_PER_CARD}")
            }
        }
    }
}

impl std::error::Error for CardReaderError {}

/// Encode one column of Hollerith-punched digits/letters into a 12-bit
/// column word. `None` punches no rows (a blank column).
#[must_use]
pub fn encode_hollerith(ch: Option<char>) -> PpWord {
    let Some(ch) = ch else { return 0 };
    match ch {
        '0'..='9' => {
            let digit = ch as u32 - '0' as u32;
            1 << (9 - digit)
        }
        'A'..='I' => 1 << ROW_12_BIT | 1 << (9 - (ch as u32 - 'A' as u32 + 1)),
        'J'..='R' => 1 << ROW_11_BIT | 1 << (9 - (ch as u32 - 'J' as u32 + 1)),
        'S'..='Z' => 1 << 9 | 1 << (9 - (ch as u32 - 'S' as u32 + 2)),
        ' ' => 0,
        _ => 0,
    }
}

/// Translate a whole line of text into one Hollerith-encoded card, padded
/// or truncated to [`COLUMNS_PER_CARD`] columns.
#[must_use]
pub fn encode_line(line: &str) -> Vec<PpWord> {
    let mut columns: Vec<PpWord> = line
        .chars()
        .map(|c| encode_hollerith(Some(c)))
        .take(COLUMNS_PER_CARD)
        .collect();
    columns.resize(COLUMNS_PER_CARD, 0);
    columns
}

/// How column words are produced from the configured input source
/// ("Hollerith-encoded or ASCII-translated depending on
/// configuration").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnEncoding {
    Hollerith,
    /// Pass the low 8 bits of the source byte straight through as the
    /// column word, for software that expects raw ASCII columns rather
    /// than punched Hollerith code.
    Ascii,
}

/// 405-style card reader: a queue of pre-encoded cards, read one column at
/// a time.
pub struct CardReaderDevice {
    encoding: ColumnEncoding,
    deck: std::collections::VecDeque<Vec<PpWord>>,
    current: Option<Vec<PpWord>>,
    column: usize,
    pending_function: u16,
    status: u16,
}

impl CardReaderDevice {
    #[must_use]
    pub fn new(encoding: ColumnEncoding) -> Self {
        Self {
            encoding,
            deck: std::collections::VecDeque::new(),
            current: None,
            column: 0,
            pending_function: 0,
            status: status_bits::READY,
        }
    }

    /// Load raw text lines, each translated to one Hollerith-encoded card
    /// ([`ColumnEncoding::Ascii`] readers keep the raw byte values
    /// instead). Cards already queued are kept; the new cards are appended
    /// behind them.
    pub fn load_deck_text<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            let card = match self.encoding {
                ColumnEncoding::Hollerith => encode_line(line),
                ColumnEncoding::Ascii => {
                    let mut columns: Vec<PpWord> =
                        line.bytes().map(PpWord::from).take(COLUMNS_PER_CARD).collect();
                    columns.resize(COLUMNS_PER_CARD, 0);
                    columns
                }
            };
            self.deck.push_back(card);
        }
    }

    #[must_use]
    pub fn cards_remaining(&self) -> usize {
        self.deck.len() + usize::from(self.current.is_some())
    }
}

impl DevicePort for CardReaderDevice {
    fn func(&mut self, code: PpWord) -> FcStatus {
        match code {
            FN_SELECT => {}
            FN_READ => {
                if self.current.is_none() {
                    self.current = self.deck.pop_front();
                    self.column = 0;
                }
            }
            FN_STATUS_REQ => {
                self.status = if self.cards_remaining() == 0 {
                    status_bits::READY | status_bits::END_OF_DECK
                } else {
                    status_bits::READY
                };
            }
            _ => return FcStatus::Declined,
        }
        self.pending_function = code;
        FcStatus::Accepted
    }

    fn io(&mut self, ctx: &mut ChannelCtx) {
        match self.pending_function {
            FN_STATUS_REQ => {
                ctx.data = self.status;
                ctx.full = true;
                self.pending_function = 0;
            }
            FN_READ => {
                if ctx.full {
                    return;
                }
                let Some(card) = self.current.as_ref() else {
                    ctx.full = true;
                    ctx.data = status_bits::END_OF_DECK;
                    self.pending_function = 0;
                    return;
                };
                ctx.data = card[self.column];
                ctx.full = true;
                self.column += 1;
                if self.column >= COLUMNS_PER_CARD {
                    self.current = None;
                    self.pending_function = 0;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_zero_punches_row_zero_only() {
        assert_eq!(encode_hollerith(Some('0')), 1 << 9);
    }

    #[test]
    fn digit_nine_punches_row_nine_only() {
        assert_eq!(encode_hollerith(Some('9')), 1 << 0);
    }

    #[test]
    fn letter_a_punches_row_twelve_and_one() {
        assert_eq!(encode_hollerith(Some('A')), 1 << ROW_12_BIT | 1 << 8);
    }

    #[test]
    fn letter_s_punches_row_zero_and_two() {
        assert_eq!(encode_hollerith(Some('S')), 1 << 9 | 1 << 7);
    }

    #[test]
    fn blank_column_punches_nothing() {
        assert_eq!(encode_hollerith(Some(' ')), 0);
        assert_eq!(encode_hollerith(None), 0);
    }

    #[test]
    fn encoded_line_is_padded_to_a_full_card() {
        let card = encode_line("9");
        assert_eq!(card.len(), COLUMNS_PER_CARD);
        assert_eq!(card[0], 1 << 0);
        assert_eq!(card[1], 0);
    }

    #[test]
    fn read_drains_one_card_column_by_column_then_reports_end_of_deck() {
        let mut dev = CardReaderDevice::new(ColumnEncoding::Hollerith);
        dev.load_deck_text(["9"]);
        assert_eq!(dev.cards_remaining(), 1);

        dev.func(FN_READ);
        let mut ctx = ChannelCtx::default();
        dev.io(&mut ctx);
        assert_eq!(ctx.data, 1 << 0);
        assert!(ctx.full);

        for _ in 1..COLUMNS_PER_CARD {
            ctx.full = false;
            dev.io(&mut ctx);
        }
        assert_eq!(dev.cards_remaining(), 0);

        dev.func(FN_STATUS_REQ);
        ctx.full = false;
        dev.io(&mut ctx);
        assert_eq!(ctx.data & status_bits::END_OF_DECK, status_bits::END_OF_DECK);
    }

    #[test]
    fn ascii_encoding_passes_bytes_through_unchanged() {
        let mut dev = CardReaderDevice::new(ColumnEncoding::Ascii);
        dev.load_deck_text(["A"]);
        dev.func(FN_READ);
        let mut ctx = ChannelCtx::default();
        dev.io(&mut ctx);
        assert_eq!(ctx.data, PpWord::from(b'A'));
    }

    #[test]
    fn unknown_function_code_declines() {
        let mut dev = CardReaderDevice::new(ColumnEncoding::Hollerith);
        assert_eq!(dev.func(0o001), FcStatus::Declined);
    }
}
