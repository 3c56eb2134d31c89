//! The central processor core and exchange-jump engine, grounded on
//! `cpu.c`'s `cpuStep`/`cpuExchangeJump`.
//!
//! A CP instruction word holds one or more parcels (15 or 30 bits each),
//! decoded and executed in sequence without ever yielding mid-word: the
//! whole word runs atomically, one call to
//! [`Cpu::execute`] finishing the parcels left in the current word and
//! prefetching the next one.

mod exchange;
mod ops;
mod registers;
mod stack;

use cyber_core::{CpuPort, ExitCondition, ExitModeFlag, ModelFeatures};
use cyber_memory::{CentralMemory, ExtendedMemory};
use cyber_word::add18;

pub use registers::Registers;
pub use stack::InstructionStack;

const MASK6: u64 = 0o77;
const MASK3: u64 = 0o7;
const MASK18: u32 = 0o777_777;

/// Per-opcode parcel length in bits: 15 for most families, 30 for the
/// address-operand families, and 0 for opcode `01` whose length is instead
/// looked up in [`OP01_LENGTH`] by `opI` (`cpu.c`'s `decodeCpuOpcode`/
/// `cpOp01Length`).
const DECODE_LENGTH: [u8; 64] = [
    15, 0, 30, 30, 30, 30, 30, 30, // 00-07
    15, 15, 15, 15, 15, 15, 15, 15, // 10-17
    15, 15, 15, 15, 15, 15, 15, 15, // 20-27
    15, 15, 15, 15, 15, 15, 15, 15, // 30-37
    15, 15, 15, 15, 15, 15, 15, 15, // 40-47
    30, 30, 30, 15, 15, 15, 15, 15, // 50-57
    30, 30, 30, 15, 15, 15, 15, 15, // 60-67
    30, 30, 30, 15, 15, 15, 15, 15, // 70-77
];

const OP01_LENGTH: [u8; 8] = [30, 30, 30, 30, 15, 15, 15, 15];

/// A pending PP-initiated exchange jump, serviced as soon as the CPU
/// reaches a parcel boundary.
#[derive(Debug, Clone, Copy)]
struct PendingExchange {
    address: u32,
    force_monitor: bool,
}

/// The central processor: register file, in-flight instruction word, exit
/// condition, instruction-word stack, and a deferred exchange-jump request
/// from the PP seam.
#[derive(Debug, Clone)]
pub struct Cpu {
    pub regs: Registers,
    op_word: u64,
    /// Bit offset of the next undecoded parcel within `op_word`; `60` means
    /// the word is entirely consumed and the next call decodes a freshly
    /// fetched one.
    op_offset: u32,
    op_fm: u8,
    op_i: u8,
    op_j: u8,
    op_k: u8,
    op_address: u32,
    exit_condition: ExitCondition,
    stack: InstructionStack,
    pending_exchange: Option<PendingExchange>,
    stopped: bool,
    features: ModelFeatures,
    /// Free-running microsecond counter backing the `01`-family `RC`
    /// instruction; kept in step with the RTC channel's own
    /// counter by the machine's tick loop feeding both the same increment,
    /// since `cyber-core` can't expose a shared clock type without the CPU
    /// crate depending on the channel fabric.
    rtc_micros: u64,
}

impl Cpu {
    /// A freshly power-on CPU: stopped, waiting for the deadstart sequence
    /// to start it with an exchange jump.
    #[must_use]
    pub fn new(features: ModelFeatures) -> Self {
        Self {
            regs: Registers::new(),
            op_word: 0,
            op_offset: 60,
            op_fm: 0,
            op_i: 0,
            op_j: 0,
            op_k: 0,
            op_address: 0,
            exit_condition: ExitCondition::empty(),
            stack: InstructionStack::new(),
            pending_exchange: None,
            stopped: true,
            features,
            rtc_micros: 0,
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Advance the `RC`-instruction microsecond counter;
    /// the machine's tick loop drives this with the same increment it gives
    /// the RTC channel.
    pub fn tick_rtc(&mut self, micros: u64) {
        self.rtc_micros = self.rtc_micros.wrapping_add(micros) & 0o7777_7777_7777;
    }

    /// The CPU is at a parcel boundary (ready to accept an exchange jump
    /// without deferring it) when it's stopped or has just finished a
    /// whole instruction word.
    #[must_use]
    fn at_parcel_boundary(&self) -> bool {
        self.stopped || self.op_offset == 60
    }

    /// CDC's `cpuAddRa`: a program-relative address plus the reference
    /// address, via the ones-complement subtractive adder at 18 or 21
    /// bits (series-800 widens the field).
    fn add_ra(&self, offset: u32) -> u32 {
        if self.features.has(ModelFeatures::IS_SERIES_800) {
            cyber_word::add24(self.regs.ra_cm & 0o777_777_7, offset & 0o777_777_7) & 0o777_777_7
        } else {
            add18(self.regs.ra_cm, offset)
        }
    }

    /// Resolve `offset` against RA/FL, taking an address-out-of-range error
    /// exit if it falls outside the field length (`cpuCheckOpAddress`).
    /// Returns `None` when the access was out of range (an error exit has
    /// already been taken or queued).
    fn check_op_address(&mut self, offset: u32, cm: &mut CentralMemory) -> Option<u32> {
        let location = self.add_ra(offset);
        let no_wrap = self.features.has(ModelFeatures::HAS_NO_CM_WRAP);
        if offset >= self.regs.fl_cm || (no_wrap && location as usize >= cm.size()) {
            self.exit_condition.set(ExitCondition::ADDRESS_OUT_OF_RANGE);
            self.error_exit(cm, self.regs.p);
            return None;
        }
        Some(if cm.size() == 0 {
            location
        } else {
            location % cm.size() as u32
        })
    }

    /// Write the two-word-ish exit package, stop, zero P, and (unless
    /// already in monitor mode, or the model has no CEJ/MEJ) exchange-jump
    /// to MA (`cpuCheckOpAddress`/`cpuOpIllegal`'s shared tail).
    fn error_exit(&mut self, cm: &mut CentralMemory, p_for_package: u32) {
        self.stopped = true;
        if self.regs.ra_cm < cm.size() as u32 {
            let package = (u64::from(self.exit_condition.bits()) << 48) | (u64::from(p_for_package) << 30);
            cm.write(self.regs.ra_cm, package);
        }
        self.regs.p = 0;
        self.exit_condition.clear();

        if !self.features.has(ModelFeatures::HAS_NO_CEJ_MEJ) && !self.regs.monitor_mode {
            self.regs.monitor_mode = true;
            let ma = self.regs.ma;
            exchange::exchange_jump(&mut self.regs, cm, ma, self.features);
            self.stack.void();
            self.stopped = false;
            self.fetch_word(cm);
        }
    }

    /// Inspect a floating result's exponent field for overflow/indefinite
    /// sentinel patterns and take the error exit if exit mode selects it
    /// (`cpuFloatCheck`).
    fn float_check(&mut self, cm: &mut CentralMemory, value: u64) {
        let exponent = (value >> 48) & 0o7777;
        if exponent == 0o3777 || exponent == 0o4000 {
            self.exit_condition.set(ExitCondition::OPERAND_OUT_OF_RANGE);
            self.float_exception_check(cm);
        } else if exponent == 0o1777 || exponent == 0o6000 {
            self.exit_condition.set(ExitCondition::INDEFINITE_OPERAND);
            self.float_exception_check(cm);
        }
    }

    /// After a float operation sets `EcOperandOutOfRange`/`EcIndefiniteOperand`,
    /// take the error exit if the exit-mode mask selects it
    /// (`cpuFloatExceptionHandler`).
    fn float_exception_check(&mut self, cm: &mut CentralMemory) {
        if self.exit_condition.triggers_error_exit(self.regs.exit_mode) {
            self.error_exit(cm, add18(self.regs.p, 1));
        } else {
            self.exit_condition.clear();
        }
    }

    /// Void the instruction stack unconditionally, or on every A-register
    /// write when the stack-purge exit-mode flag is set.
    fn maybe_purge_stack_on_a_write(&mut self) {
        if self.features.has(ModelFeatures::HAS_STACK_PURGE_FLAG)
            && (self.regs.exit_mode & ExitModeFlag::STACK_PURGE) != 0
        {
            self.stack.void();
        }
    }

    fn fetch_word(&mut self, cm: &mut CentralMemory) {
        let Some(location) = self.check_op_address(self.regs.p, cm) else {
            return;
        };
        if self.features.has(ModelFeatures::HAS_INSTRUCTION_STACK) {
            if let Some(word) = self.stack.lookup(location) {
                self.op_word = word;
            } else {
                let word = cm.read(location);
                self.stack.insert(location, word);
                self.op_word = word;
            }
        } else {
            self.op_word = cm.read(location);
        }
        self.op_offset = 60;
    }

    /// Branch to a new RA-relative program address, voiding the
    /// instruction stack unless the target is already cached and the
    /// stack-purge flag isn't forcing an unconditional void.
    fn branch_to(&mut self, target: u32) {
        let absolute = self.add_ra(target);
        let force_purge = self.features.has(ModelFeatures::HAS_STACK_PURGE_FLAG)
            && (self.regs.exit_mode & ExitModeFlag::STACK_PURGE) != 0;
        if force_purge || self.stack.lookup(absolute).is_none() {
            self.stack.void();
        }
        self.regs.p = target & MASK18;
    }

    /// Run the parcels left in the current instruction word to completion,
    /// then prefetch the next word (per-step algorithm). A
    /// deferred PP exchange-jump request is serviced first if the CPU has
    /// reached a parcel boundary.
    pub fn execute(&mut self, cm: &mut CentralMemory, em: &mut ExtendedMemory) {
        if let Some(pending) = self.pending_exchange {
            if self.at_parcel_boundary() {
                self.pending_exchange = None;
                if pending.force_monitor {
                    self.regs.monitor_mode = true;
                }
                exchange::exchange_jump(&mut self.regs, cm, pending.address, self.features);
                self.stack.void();
                self.stopped = false;
                self.fetch_word(cm);
                return;
            }
        }

        if self.stopped {
            return;
        }

        loop {
            self.op_fm = ((self.op_word >> (self.op_offset - 6)) & MASK6) as u8;
            self.op_i = ((self.op_word >> (self.op_offset - 9)) & MASK3) as u8;
            self.op_j = ((self.op_word >> (self.op_offset - 12)) & MASK3) as u8;

            let mut length = DECODE_LENGTH[self.op_fm as usize];
            if self.op_fm == 0o01 {
                length = OP01_LENGTH[self.op_i as usize];
            }

            if length == 15 {
                self.op_k = ((self.op_word >> (self.op_offset - 15)) & MASK3) as u8;
                self.op_address = 0;
                self.op_offset -= 15;
            } else {
                if self.op_offset == 15 {
                    self.exit_condition.clear();
                    self.error_exit(cm, self.regs.p);
                    return;
                }
                self.op_k = 0;
                self.op_address = ((self.op_word >> (self.op_offset - 30)) & u64::from(MASK18)) as u32;
                self.op_offset -= 30;
            }

            self.regs.clear_b0();
            ops::dispatch(self, cm, em);
            self.regs.clear_b0();

            if self.stopped {
                if self.op_offset == 0 {
                    self.regs.p = add18(self.regs.p, 1);
                }
                return;
            }

            if self.op_offset == 0 {
                self.regs.p = add18(self.regs.p, 1);
                self.fetch_word(cm);
                if self.stopped {
                    return;
                }
            }

            if self.op_offset == 60 {
                break;
            }
        }
    }
}

impl CpuPort for Cpu {
    fn p(&self) -> u32 {
        self.regs.p
    }

    fn monitor_mode(&self) -> bool {
        self.regs.monitor_mode
    }

    fn ma(&self) -> u32 {
        self.regs.ma
    }

    fn request_exchange_jump(&mut self, address: u32, force_monitor: bool) -> bool {
        let at_boundary = self.at_parcel_boundary();
        self.pending_exchange = Some(PendingExchange {
            address,
            force_monitor,
        });
        // The swap itself needs central-memory access this trait doesn't
        // have, so it's always deferred to the next `execute()` call
        // (later in the same machine tick, before any PP's next
        // revolution); reporting `true` as soon as we're at a parcel
        // boundary just tells the caller the request has been accepted
        // rather than that the registers have already moved.
        at_boundary
    }

    fn step(&mut self) {
        // The trait seam has no memory access (`cyber-core` can't depend on
        // `cyber-memory`); the machine's tick loop calls `Cpu::execute`
        // directly instead. This no-op keeps the trait satisfiable for
        // test doubles that never touch real memory.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_cpu() -> (Cpu, CentralMemory, ExtendedMemory) {
        let cpu = Cpu::new(ModelFeatures::empty());
        let cm = CentralMemory::new(4096, true);
        let em = ExtendedMemory::new(0);
        (cpu, cm, em)
    }

    #[test]
    fn stopped_cpu_ignores_execute() {
        let (mut cpu, mut cm, mut em) = new_cpu();
        cpu.execute(&mut cm, &mut em);
        assert!(cpu.is_stopped());
    }

    #[test]
    fn exchange_jump_to_in_range_block_starts_the_cpu() {
        let (mut cpu, mut cm, mut em) = new_cpu();
        // PS (opFm=00) at word 10: leaves P untouched, a harmless first
        // instruction once running.
        cm.write(10, 0);
        let exchange_block = 0;
        cm.write(exchange_block, (10u64 << 36) | 0); // P=10, A0=0
        cm.write(exchange_block + 2, 4096u64 << 36); // FL_cm, wide enough for word 10
        assert!(cpu.request_exchange_jump(exchange_block, false));
        cpu.execute(&mut cm, &mut em);
        assert!(!cpu.is_stopped());
        assert_eq!(cpu.p(), 10);
    }

    #[test]
    fn boolean_copy_moves_xj_into_xi() {
        let (mut cpu, mut cm, mut em) = new_cpu();
        cm.write(0, (10u64 << 36) | 0);
        cm.write(2, 4096u64 << 36); // FL_cm, wide enough for word 10
        // opFm=10 (copy), opI=1 (Xi dest), opJ=2 (Xj src): Xi = Xj. Written
        // before the exchange so the fetch it triggers picks this word up.
        cm.write(10, (0o10u64 << 54) | (1u64 << 51) | (2u64 << 48));
        cpu.request_exchange_jump(0, false);
        cpu.execute(&mut cm, &mut em); // performs the deferred exchange and fetch, lands at P=10
        cpu.regs.x[2] = 0o123_456;
        cpu.execute(&mut cm, &mut em); // decodes and dispatches the fetched word
        assert_eq!(cpu.regs.x[1], 0o123_456);
    }
}
