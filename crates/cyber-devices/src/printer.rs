//! Line printer: template for the 1612/501 families. Accepts
//! text words and spacing control codes; each 6-bit character is mapped
//! through a fixed display-code table and appended to a text sink.

use cyber_channel::{ChannelCtx, DevicePort};
use cyber_core::{FcStatus, PpWord};

const FN_SELECT: u16 = 0o600;
const FN_SINGLE_SPACE: u16 = 0o601;
const FN_DOUBLE_SPACE: u16 = 0o602;
const FN_MOVE_CHANNEL_7: u16 = 0o603;
const FN_MOVE_TOF: u16 = 0o604;
const FN_PRINT: u16 = 0o605;
const FN_STATUS_REQ: u16 = 0o607;

pub mod status_bits {
    pub const READY: u16 = 0o4000;
}

/// Fixed 6-bit display-code → ASCII translation table ("each
/// text word is mapped through a fixed translation table"); index is the
/// low 6 bits of the channel word.
pub const DISPLAY_CODE_TO_ASCII: [u8; 64] = [
    b':', b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'J', b'K', b'L', b'M', b'N', b'O',
    b'P', b'Q', b'R', b'S', b'T', b'U', b'V', b'W', b'X', b'Y', b'Z', b'0', b'1', b'2', b'3', b'4',
    b'5', b'6', b'7', b'8', b'9', b'+', b'-', b'*', b'/', b'(', b')', b'$', b'=', b' ', b',', b'.',
    b'#', b'[', b']', b'%', b'"', b'_', b'!', b'&', b'\'', b'?', b'<', b'>', b'@', b'\\', b'^',
    b';',
];

/// A sink for printer output; the channel never needs a handle back, only
/// the ability to append translated text ("text sinks ... for
/// printer/reader devices").
pub trait TextSink {
    fn push_str(&mut self, text: &str);
}

impl TextSink for String {
    fn push_str(&mut self, text: &str) {
        String::push_str(self, text);
    }
}

/// 1612-style line printer: one pending function code at a time, a text
/// sink accumulating everything printed.
pub struct PrinterDevice {
    sink: Box<dyn TextSink>,
    pending_function: u16,
    status: u16,
}

impl PrinterDevice {
    #[must_use]
    pub fn new(sink: Box<dyn TextSink>) -> Self {
        Self {
            sink,
            pending_function: 0,
            status: 0,
        }
    }
}

impl DevicePort for PrinterDevice {
    fn func(&mut self, code: PpWord) -> FcStatus {
        match code {
            FN_SELECT => {}
            FN_SINGLE_SPACE => self.sink.push_str("\n"),
            FN_DOUBLE_SPACE => self.sink.push_str("\n\n"),
            FN_MOVE_CHANNEL_7 => self.sink.push_str("\n"),
            FN_MOVE_TOF => self.sink.push_str("\x0c"),
            FN_PRINT => self.sink.push_str("\n"),
            FN_STATUS_REQ => self.status = status_bits::READY,
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
                self.status = 0;
            }
            _ => {
                if ctx.full {
                    let ch = DISPLAY_CODE_TO_ASCII[(ctx.data & 0o77) as usize];
                    self.sink.push_str(std::str::from_utf8(&[ch]).unwrap_or(" "));
                    ctx.full = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Capture(Rc<RefCell<String>>);
    impl TextSink for Capture {
        fn push_str(&mut self, text: &str) {
            self.0.borrow_mut().push_str(text);
        }
    }

    #[test]
    fn status_request_returns_ready_constant() {
        let mut dev = PrinterDevice::new(Box::new(String::new()));
        assert_eq!(dev.func(FN_STATUS_REQ), FcStatus::Accepted);
        let mut ctx = ChannelCtx::default();
        dev.io(&mut ctx);
        assert_eq!(ctx.data, status_bits::READY);
        assert!(ctx.full);
    }

    #[test]
    fn print_function_appends_translated_characters() {
        let log = Rc::new(RefCell::new(String::new()));
        let mut dev = PrinterDevice::new(Box::new(Capture(log.clone())));
        dev.func(FN_PRINT);
        let mut ctx = ChannelCtx {
            data: 1, // display code 1 -> 'A'
            active: true,
            full: true,
        };
        dev.io(&mut ctx);
        assert!(!ctx.full);
        assert_eq!(*log.borrow(), "A");
    }

    #[test]
    fn spacing_functions_append_expected_control_text() {
        let log = Rc::new(RefCell::new(String::new()));
        let mut dev = PrinterDevice::new(Box::new(Capture(log.clone())));
        dev.func(FN_SINGLE_SPACE);
        dev.func(FN_DOUBLE_SPACE);
        dev.func(FN_MOVE_TOF);
        assert_eq!(*log.borrow(), "\n\n\n\x0c");
    }

    #[test]
    fn unknown_function_code_declines() {
        let mut dev = PrinterDevice::new(Box::new(String::new()));
        assert_eq!(dev.func(0o001), FcStatus::Declined);
    }
}
