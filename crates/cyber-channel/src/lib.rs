//! Channel fabric and device port contract.
//!
//! A channel is a small state machine (`active`, `full`, a 12-bit `data`
//! latch) that dispatches function codes and I/O pulses to a list of
//! attached devices. Devices never hold a channel reference themselves —
//! a device's back-reference to its channel, where one is needed, is a
//! plain `ChannelId` index kept by the owning machine, never a pointer
//! (avoids the device↔channel ownership cycle the
//! source's C pointers created).

use cyber_core::{ChannelId, FcStatus, PpWord};
use cyber_memory::ExtendedMemory;

/// `flags()` bit indicating a PCI device wants the channel marked active.
pub const FLAG_ACTIVE: u16 = 1 << 0;
/// `flags()` bit indicating a PCI device wants the channel marked full.
pub const FLAG_FULL: u16 = 1 << 1;

/// Capability set every device on a channel implements.
///
/// Non-PCI devices only need `func`/`activate`/`disconnect`/`io`; the PCI
/// methods have neutral defaults so ordinary devices don't implement them.
pub trait DevicePort {
    /// Offer a function code. Fabric tries the next device on `Declined`.
    fn func(&mut self, code: PpWord) -> FcStatus;

    /// Called when the channel transitions to active while this device is
    /// the selected `ioDevice`.
    fn activate(&mut self) {}

    /// Called when the channel disconnects while this device is selected.
    fn disconnect(&mut self) {}

    /// Per-tick I/O pulse: move one word between the channel latch and the
    /// device, and update `ctx.active`/`ctx.full` to drive the PP's wait
    /// loop.
    fn io(&mut self, ctx: &mut ChannelCtx) {
        let _ = ctx;
    }

    /// Per-tick I/O pulse for a device whose transfer is EM-mediated rather
    /// than carried word-by-word through the channel latch (the disk
    /// controller: the PP only hands over a C/T/S address and an EM
    /// address through ordinary `io()` pulses, but the sector itself moves
    /// directly between the controller and EM). Devices that don't need EM
    /// access keep the plain [`DevicePort::io`] default.
    fn io_em(&mut self, ctx: &mut ChannelCtx, em: &mut ExtendedMemory) {
        let _ = em;
        self.io(ctx);
    }

    /// PCI input: supply the next word. Default returns an all-ones word
    /// (an idle bus reads as all-ones on this hardware).
    fn input(&mut self) -> PpWord {
        0o7777
    }

    /// PCI output: accept a word written by the channel.
    fn output(&mut self, value: PpWord) {
        let _ = value;
    }

    /// Notification that the channel was just marked full.
    fn on_full(&mut self) {}

    /// Notification that the channel was just marked empty.
    fn on_empty(&mut self) {}

    /// PCI status bitmask consulted by `check_if_active`/`check_if_full`
    /// (bits [`FLAG_ACTIVE`]/[`FLAG_FULL`]).
    fn flags(&self) -> u16 {
        0
    }

    /// Advance any free-running state that isn't driven by `io`/`io_em`
    /// pulses (the RTC's microsecond counter). Most devices
    /// have nothing to do here and keep the default.
    fn tick(&mut self) {}

    /// Variant of [`DevicePort::tick`] carrying a host-measured microsecond
    /// delta, for the RTC's host-clock mode (`incrementPerTick == 0`).
    /// Devices that don't care about the delta just forward to the
    /// ordinary [`DevicePort::tick`].
    fn tick_with_micros(&mut self, _micros: f64) {
        self.tick();
    }
}

/// A snapshot of the mutable channel fields passed to a device's `io()`
/// callback. Kept as a plain value (rather than `&mut Channel`) so the
/// channel can hold its device list by value without an aliasing conflict
/// between `&mut self.devices[idx]` and `&mut self` during the call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelCtx {
    pub data: PpWord,
    pub active: bool,
    pub full: bool,
}

/// One I/O channel: state machine plus its attached device list.
pub struct Channel {
    id: ChannelId,
    data: PpWord,
    active: bool,
    full: bool,
    /// Defers deactivation until after one more read by the PP, so the PP
    /// can drain the final word from the latch.
    disc_after_input: bool,
    /// Channel-flag bit set/cleared by IJM/EJM SCF/CCF subfunctions on
    /// models that carry the channel-flag feature.
    flag: bool,
    delay_disconnect: u8,
    delay_status: u8,
    /// Index into `devices` of the device currently handling I/O, if any.
    io_device: Option<usize>,
    devices: Vec<Box<dyn DevicePort>>,
    /// Treated as always-active regardless of `active` (the RTC hardwire,
    /// `io()` gate).
    always_active: bool,
}

impl Channel {
    #[must_use]
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            data: 0,
            active: false,
            full: false,
            disc_after_input: false,
            flag: false,
            delay_disconnect: 0,
            delay_status: 0,
            io_device: None,
            devices: Vec::new(),
            always_active: false,
        }
    }

    /// Mark this channel as the RTC hardwire: `io()` always pulses even
    /// when `active` is false.
    pub fn set_always_active(&mut self, value: bool) {
        self.always_active = value;
    }

    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[must_use]
    pub fn data(&self) -> PpWord {
        self.data
    }

    pub fn set_data(&mut self, value: PpWord) {
        self.data = value;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full
    }

    #[must_use]
    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn set_flag(&mut self, value: bool) {
        self.flag = value;
    }

    pub fn set_disc_after_input(&mut self, value: bool) {
        self.disc_after_input = value;
    }

    #[must_use]
    pub fn disc_after_input(&self) -> bool {
        self.disc_after_input
    }

    pub fn set_delay_disconnect(&mut self, ticks: u8) {
        self.delay_disconnect = ticks;
    }

    pub fn set_delay_status(&mut self, ticks: u8) {
        self.delay_status = ticks;
    }

    #[must_use]
    pub fn io_device(&self) -> Option<usize> {
        self.io_device
    }

    /// Attach a device. The fabric offers function codes in prepend order —
    /// the most recently attached device is tried first (matches the
    /// source's linked-list-head insertion), so this inserts at the front.
    pub fn attach(&mut self, device: Box<dyn DevicePort>) -> usize {
        self.devices.insert(0, device);
        // All downstream indices just shifted by one; callers that keep a
        // DeviceId across an attach must re-resolve it. In practice every
        // device is attached during configuration, before the machine runs.
        0
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Attach a device and make it the selected `ioDevice` immediately,
    /// without offering it a function code first.
    ///
    /// The RTC and interlock-register channels are wired
    /// to exactly one device apiece and never go through the normal
    /// FAN/FNC negotiation the barrel performs for ordinary peripherals —
    /// `RtcChannel::func` always declines, so routing it through
    /// [`Channel::function`] would just hang the channel per the "nobody
    /// claimed the code" branch. This is how the machine binds those two
    /// pseudo-devices at configuration time instead.
    pub fn attach_hardwired(&mut self, device: Box<dyn DevicePort>) -> usize {
        let idx = self.attach(device);
        self.io_device = Some(idx);
        idx
    }

    /// Walk the device list offering `code`, stopping at the first
    /// non-`Declined` reply.
    pub fn function(&mut self, code: PpWord) -> FcStatus {
        self.full = false;
        for (idx, dev) in self.devices.iter_mut().enumerate() {
            match dev.func(code) {
                FcStatus::Declined => continue,
                FcStatus::Accepted => {
                    self.io_device = Some(idx);
                    return FcStatus::Accepted;
                }
                FcStatus::Processed => {
                    self.io_device = None;
                    return FcStatus::Processed;
                }
            }
        }
        // Nobody claimed the code: models a hung channel.
        self.active = true;
        self.full = true;
        self.io_device = None;
        FcStatus::Declined
    }

    pub fn activate(&mut self) {
        self.active = true;
        if let Some(idx) = self.io_device {
            self.devices[idx].activate();
        }
    }

    pub fn disconnect(&mut self) {
        self.active = false;
        if let Some(idx) = self.io_device {
            self.devices[idx].disconnect();
        } else {
            self.full = false;
        }
    }

    /// Per-tick I/O pulse: gated on `active` (or the RTC
    /// hardwire), which always runs.
    pub fn io(&mut self) {
        if !(self.active || self.always_active) {
            return;
        }
        if let Some(idx) = self.io_device {
            let mut ctx = ChannelCtx {
                data: self.data,
                active: self.active,
                full: self.full,
            };
            self.devices[idx].io(&mut ctx);
            self.data = ctx.data;
            self.active = ctx.active;
            self.full = ctx.full;
        }
    }

    /// Per-tick I/O pulse for a channel whose selected device may need EM
    /// access. Identical gating to [`Channel::io`]; the only
    /// difference is which device callback is invoked.
    pub fn io_em(&mut self, em: &mut ExtendedMemory) {
        if !(self.active || self.always_active) {
            return;
        }
        if let Some(idx) = self.io_device {
            let mut ctx = ChannelCtx {
                data: self.data,
                active: self.active,
                full: self.full,
            };
            self.devices[idx].io_em(&mut ctx, em);
            self.data = ctx.data;
            self.active = ctx.active;
            self.full = ctx.full;
        }
    }

    /// PCI input: pull the next word from the selected device into the
    /// latch.
    pub fn channel_in(&mut self) -> PpWord {
        if let Some(idx) = self.io_device {
            self.data = self.devices[idx].input();
        }
        self.data
    }

    /// PCI output: push `value` to the selected device and latch it.
    pub fn channel_out(&mut self, value: PpWord) {
        self.data = value;
        if let Some(idx) = self.io_device {
            self.devices[idx].output(value);
        }
    }

    pub fn set_full(&mut self) {
        self.full = true;
        if let Some(idx) = self.io_device {
            self.devices[idx].on_full();
        }
    }

    pub fn set_empty(&mut self) {
        self.full = false;
        if let Some(idx) = self.io_device {
            self.devices[idx].on_empty();
        }
    }

    /// Whether this channel is undeactivatable by `DCN` (the RTC/interlock
    /// hardwire). Reuses [`Channel::set_always_active`]'s
    /// flag — the same channels that always pulse `io()` are the ones `pp.c`
    /// refuses to disconnect.
    #[must_use]
    pub fn is_hardwired(&self) -> bool {
        self.always_active
    }

    /// Directly clear `io_device` without invoking the device's
    /// `disconnect()` callback — matches the raw field writes the PP I/O
    /// opcodes make on disc-after-input completion, distinct from the full
    /// `disconnect()` protocol.
    pub fn clear_io_device(&mut self) {
        self.io_device = None;
    }

    /// Directly clear `active` and `io_device` together, as above.
    pub fn force_deactivate(&mut self) {
        self.active = false;
        self.io_device = None;
    }

    /// Set `full` without the `on_full`/`on_empty` device notification (the
    /// PP I/O opcodes write this field directly rather than going through
    /// [`Channel::set_full`]/[`Channel::set_empty`]).
    pub fn set_full_raw(&mut self, value: bool) {
        self.full = value;
    }

    pub fn check_if_active(&mut self) {
        if let Some(idx) = self.io_device {
            self.active = self.devices[idx].flags() & FLAG_ACTIVE != 0;
        }
    }

    pub fn check_if_full(&mut self) {
        if let Some(idx) = self.io_device {
            self.full = self.devices[idx].flags() & FLAG_FULL != 0;
        }
    }

    /// Drive the selected device's free-running state forward one tick,
    /// independent of `active`/`full` (RTC counter advances
    /// every tick regardless of whether a PP happens to pulse the channel
    /// that tick).
    pub fn tick_device(&mut self) {
        if let Some(idx) = self.io_device {
            self.devices[idx].tick();
        }
    }

    /// [`Channel::tick_device`]'s host-clock-mode counterpart:
    /// drives the selected device with a measured host microsecond delta
    /// instead of the fixed per-tick increment.
    pub fn tick_device_with_micros(&mut self, micros: f64) {
        if let Some(idx) = self.io_device {
            self.devices[idx].tick_with_micros(micros);
        }
    }

    /// Advance the delayed-disconnect and delayed-status timers by one
    /// tick.
    pub fn step(&mut self) {
        if self.delay_disconnect > 0 {
            self.delay_disconnect -= 1;
            if self.delay_disconnect == 0 {
                self.active = false;
                self.disc_after_input = false;
            }
        }
        if self.delay_status > 0 {
            self.delay_status -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Declining;
    impl DevicePort for Declining {
        fn func(&mut self, _code: PpWord) -> FcStatus {
            FcStatus::Declined
        }
    }

    struct Accepting {
        pulses: u32,
    }
    impl DevicePort for Accepting {
        fn func(&mut self, _code: PpWord) -> FcStatus {
            FcStatus::Accepted
        }
        fn io(&mut self, ctx: &mut ChannelCtx) {
            self.pulses += 1;
            ctx.data = 0o4242;
            ctx.full = true;
        }
    }

    #[test]
    fn all_declined_hangs_the_channel() {
        let mut ch = Channel::new(0);
        ch.attach(Box::new(Declining));
        ch.attach(Box::new(Declining));
        let status = ch.function(0o10);
        assert_eq!(status, FcStatus::Declined);
        assert!(ch.is_active());
        assert!(ch.is_full());
        assert_eq!(ch.io_device(), None);
    }

    #[test]
    fn accepted_device_becomes_io_device_and_pulses() {
        let mut ch = Channel::new(1);
        ch.attach(Box::new(Accepting { pulses: 0 }));
        assert_eq!(ch.function(0o10), FcStatus::Accepted);
        ch.activate();
        ch.io();
        assert_eq!(ch.data(), 0o4242);
        assert!(ch.is_full());
    }

    #[test]
    fn inactive_non_hardwire_channel_does_not_pulse() {
        let mut ch = Channel::new(2);
        ch.attach(Box::new(Accepting { pulses: 0 }));
        ch.function(0o10);
        // never activated
        ch.io();
        assert_eq!(ch.data(), 0);
    }

    #[test]
    fn hardwire_channel_pulses_while_inactive() {
        let mut ch = Channel::new(3);
        ch.set_always_active(true);
        ch.attach(Box::new(Accepting { pulses: 0 }));
        ch.function(0o10);
        ch.io();
        assert_eq!(ch.data(), 0o4242);
    }

    #[test]
    fn delayed_disconnect_counts_down_then_clears_active() {
        let mut ch = Channel::new(4);
        ch.activate();
        ch.set_disc_after_input(true);
        ch.set_delay_disconnect(2);
        ch.step();
        assert!(ch.is_active());
        ch.step();
        assert!(!ch.is_active());
        assert!(!ch.disc_after_input());
    }

    #[test]
    fn attach_hardwired_skips_the_function_handshake() {
        let mut ch = Channel::new(0o20);
        ch.set_always_active(true);
        ch.attach_hardwired(Box::new(Declining));
        assert_eq!(ch.io_device(), Some(0));
        // Declining never answers a function code, but io() still pulses
        // because the device was bound directly.
        ch.io();
        assert!(!ch.is_active() || ch.is_hardwired());
    }

    #[test]
    fn prepend_order_tries_most_recently_attached_first() {
        struct Tagging(u8);
        impl DevicePort for Tagging {
            fn func(&mut self, code: PpWord) -> FcStatus {
                if code == PpWord::from(self.0) {
                    FcStatus::Processed
                } else {
                    FcStatus::Declined
                }
            }
        }
        let mut ch = Channel::new(5);
        ch.attach(Box::new(Tagging(1)));
        ch.attach(Box::new(Tagging(2)));
        // device 2 (attached last) is tried first
        assert_eq!(ch.function(2), FcStatus::Processed);
    }
}
