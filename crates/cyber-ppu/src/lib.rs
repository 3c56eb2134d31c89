//! Peripheral-processor barrel: up to 24 independent 12-bit
//! processors sharing central memory and the channel fabric, executed
//! round-robin one instruction at a time.
//!
//! A PP instruction that needs more than one tick to finish (a channel
//! transfer, a multi-word central-memory move) sets [`PpState::busy`] and is
//! re-entered on the next call to [`Barrel::step`] instead of fetching a new
//! opcode; [`PpState::op_f`]/[`PpState::op_d`] hold the opcode across those
//! re-entries.

mod ops;

use cyber_channel::Channel;
use cyber_core::{CpuPort, ModelFeatures, PpWord};
use cyber_memory::{CentralMemory, ExtendedMemory};

/// PP memory size: 4096 12-bit words.
pub const PP_MEM_SIZE: usize = 4096;

pub(crate) const MASK12: u16 = 0o7777;
pub(crate) const MASK18: u32 = 0o777_777;
pub(crate) const MASK17: u32 = 0o377_777;
pub(crate) const SIGN18: u32 = 0o400_000;
pub(crate) const OVERFLOW12: u32 = 0o10000;
pub(crate) const MASK3: u32 = 0o7;
pub(crate) const MASK10: u32 = 0o1777;

/// One peripheral processor's register file and local memory.
#[derive(Debug, Clone)]
pub struct PpState {
    /// 18-bit accumulator.
    pub a: u32,
    /// 12-bit program counter.
    pub p: u16,
    /// 12-bit word counter used by the multi-word CM transfer opcodes.
    pub q: u16,
    /// 28-bit CM relocation register (LRD/SRD, relocation-reg
    /// models only).
    pub r: u32,
    /// 4096 words of local PP memory.
    pub mem: [PpWord; PP_MEM_SIZE],
    /// Set while executing a multi-tick opcode; cleared when it completes.
    pub busy: bool,
    /// Opcode family of the in-flight instruction, saved across busy ticks.
    pub op_f: u8,
    /// Opcode operand field of the in-flight instruction, saved across busy
    /// ticks (also carries the channel select / no-hang bit for the channel
    /// opcodes).
    pub op_d: u8,
}

impl PpState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            a: 0,
            p: 0,
            q: 0,
            r: 0,
            mem: [0; PP_MEM_SIZE],
            busy: false,
            op_f: 0,
            op_d: 0,
        }
    }
}

impl Default for PpState {
    fn default() -> Self {
        Self::new()
    }
}

/// The mutable state a PP opcode may touch beyond its own registers:
/// the channel array (always [`cyber_core::MAX_CHANNELS`] entries long, one
/// per `opD & 037` channel-select value), central memory, and the CPU seam
/// for EXN/MXN/MAN/RPN.
pub struct BarrelCtx<'a> {
    pub channels: &'a mut [Channel],
    /// Number of channels actually configured on this model; AJM/IJM/FJM/EJM
    /// treat a select past this as out of range even though `channels` is
    /// always the full 32-entry array (`pp.c`'s `channelCount`).
    pub channel_count: u8,
    pub cm: &'a mut CentralMemory,
    /// Extended memory, threaded through to the channel fabric so an
    /// EM-mediated device (disk controller) can complete its
    /// block transfer from inside a channel `io()` pulse.
    pub em: &'a mut ExtendedMemory,
    pub cpu: &'a mut dyn CpuPort,
    pub features: ModelFeatures,
}

/// The barrel: every configured PP, stepped in id order once per tick.
#[derive(Debug, Clone)]
pub struct Barrel {
    pps: Vec<PpState>,
}

impl Barrel {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            pps: (0..count).map(|_| PpState::new()).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pps.is_empty()
    }

    #[must_use]
    pub fn pp(&self, id: usize) -> &PpState {
        &self.pps[id]
    }

    #[must_use]
    pub fn pp_mut(&mut self, id: usize) -> &mut PpState {
        &mut self.pps[id]
    }

    /// Run one instruction on every PP in the barrel (`ppStep()` round-robin).
    pub fn step(&mut self, ctx: &mut BarrelCtx<'_>) {
        self.step_from(0, ctx);
    }

    /// Run one instruction on every PP at index `start` or later.
    ///
    /// Lets a caller drive a subset of the barrel itself for one tick — used
    /// by the deadstart loader, which streams PP0's boot panel through its
    /// own dedicated routine rather than the general busy/opF dispatch (see
    /// `cyber-deadstart`), while every other configured PP still advances
    /// normally through this same round-robin.
    pub fn step_from(&mut self, start: usize, ctx: &mut BarrelCtx<'_>) {
        for pp in self.pps.iter_mut().skip(start) {
            if !pp.busy {
                let op_code = pp.mem[pp.p as usize];
                let op_f = ((op_code >> 6) & 0o77) as u8;
                let op_d = (op_code & 0o77) as u8;
                pp.p = pp_increment(pp.p);
                ops::dispatch(pp, op_f, op_d, ctx);
            } else {
                let op_f = pp.op_f;
                let op_d = pp.op_d;
                ops::dispatch(pp, op_f, op_d, ctx);
            }
        }
    }
}

/// Increment a 12-bit PP address, wrapping modulo 4096.
pub(crate) fn pp_increment(word: u16) -> u16 {
    (word.wrapping_add(1)) & MASK12
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyber_core::{FcStatus, MAX_CHANNELS};

    struct NullCpu;
    impl CpuPort for NullCpu {
        fn p(&self) -> u32 {
            0
        }
        fn monitor_mode(&self) -> bool {
            false
        }
        fn ma(&self) -> u32 {
            0
        }
        fn request_exchange_jump(&mut self, _address: u32, _force_monitor: bool) -> bool {
            true
        }
        fn step(&mut self) {}
    }

    fn new_channels() -> Vec<Channel> {
        (0..MAX_CHANNELS as u8).map(Channel::new).collect()
    }

    #[test]
    fn ldn_then_stn_round_trips_through_accumulator() {
        let mut barrel = Barrel::new(1);
        let mut cm = CentralMemory::new(4096, true);
        let mut cpu = NullCpu;
        let mut channels = new_channels();
        let mut em = ExtendedMemory::new(0);
        // LDN 052 ; STD 0100
        barrel.pp_mut(0).mem[0] = (0o14 << 6) | 0o52;
        barrel.pp_mut(0).mem[1] = (0o34 << 6) | 0o100;
        let mut ctx = BarrelCtx {
            channels: &mut channels,
            channel_count: 10,
            cm: &mut cm,
            em: &mut em,
            cpu: &mut cpu,
            features: ModelFeatures::empty(),
        };
        barrel.step(&mut ctx);
        assert_eq!(barrel.pp(0).a, 0o52);
        barrel.step(&mut ctx);
        assert_eq!(barrel.pp(0).mem[0o100], 0o52);
    }

    #[test]
    fn ujn_jumps_backward_with_negative_displacement() {
        let mut barrel = Barrel::new(1);
        let mut cm = CentralMemory::new(4096, true);
        let mut cpu = NullCpu;
        let mut channels = new_channels();
        let mut em = ExtendedMemory::new(0);
        barrel.pp_mut(0).p = 10;
        // UJN opD=076 (-1 displacement): jump to P-1+1 = 10 (back onto itself - 1)
        barrel.pp_mut(0).mem[10] = (0o03 << 6) | 0o76;
        let mut ctx = BarrelCtx {
            channels: &mut channels,
            channel_count: 10,
            cm: &mut cm,
            em: &mut em,
            cpu: &mut cpu,
            features: ModelFeatures::empty(),
        };
        barrel.step(&mut ctx);
        assert_eq!(barrel.pp(0).p, 10);
    }

    #[test]
    fn crd_reads_one_central_memory_word_into_five_pp_words() {
        let mut barrel = Barrel::new(1);
        let mut cm = CentralMemory::new(4096, true);
        cm.write(0o52, 0o123_456_701_234_567_012u64 & cyber_core::MASK60);
        let mut cpu = NullCpu;
        let mut channels = new_channels();
        let mut em = ExtendedMemory::new(0);
        barrel.pp_mut(0).a = 0o52;
        // CRD opD=0100
        barrel.pp_mut(0).mem[0] = (0o60 << 6) | 0o100;
        let mut ctx = BarrelCtx {
            channels: &mut channels,
            channel_count: 10,
            cm: &mut cm,
            em: &mut em,
            cpu: &mut cpu,
            features: ModelFeatures::empty(),
        };
        barrel.step(&mut ctx);
        let data = cm.read(0o52);
        assert_eq!(barrel.pp(0).mem[0o100], ((data >> 48) & 0o7777) as u16);
        assert_eq!(barrel.pp(0).mem[0o104], (data & 0o7777) as u16);
    }

    #[test]
    fn ian_on_hung_channel_without_no_hang_stays_busy() {
        let mut barrel = Barrel::new(1);
        let mut cm = CentralMemory::new(4096, true);
        let mut cpu = NullCpu;
        let mut channels = new_channels();
        let mut em = ExtendedMemory::new(0);
        // IAN channel 5, no-hang bit clear
        barrel.pp_mut(0).mem[0] = (0o70 << 6) | 0o05;
        let mut ctx = BarrelCtx {
            channels: &mut channels,
            channel_count: 10,
            cm: &mut cm,
            em: &mut em,
            cpu: &mut cpu,
            features: ModelFeatures::empty(),
        };
        barrel.step(&mut ctx);
        assert!(barrel.pp(0).busy);
    }

    #[test]
    fn fan_issues_function_code_from_accumulator_to_channel() {
        struct Echo;
        impl cyber_channel::DevicePort for Echo {
            fn func(&mut self, _code: PpWord) -> FcStatus {
                FcStatus::Processed
            }
        }
        let mut barrel = Barrel::new(1);
        let mut cm = CentralMemory::new(4096, true);
        let mut cpu = NullCpu;
        let mut channels = new_channels();
        let mut em = ExtendedMemory::new(0);
        channels[3].attach(Box::new(Echo));
        barrel.pp_mut(0).a = 0o17;
        // FAN channel 3
        barrel.pp_mut(0).mem[0] = (0o76 << 6) | 0o03;
        let mut ctx = BarrelCtx {
            channels: &mut channels,
            channel_count: 10,
            cm: &mut cm,
            em: &mut em,
            cpu: &mut cpu,
            features: ModelFeatures::empty(),
        };
        barrel.step(&mut ctx);
        assert!(!barrel.pp(0).busy);
        assert_eq!(channels[3].io_device(), None);
    }
}
