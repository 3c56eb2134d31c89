//! The real-time clock channel: a pseudo-device that has no
//! function codes of its own and simply loads the low 12 bits of a
//! free-running 48-bit microsecond counter into the channel latch every
//! tick.

use cyber_channel::{ChannelCtx, DevicePort};
use cyber_core::{FcStatus, PpWord};

const MASK48: u64 = (1 << 48) - 1;
/// Per-tick cap on virtual microseconds, preventing a long host stall from
/// making a single tick advance the counter implausibly far.
const MAX_VIRTUAL_MICROS_PER_TICK: f64 = 400.0;

/// Free-running microsecond counter exposed as a channel device.
pub struct RtcChannel {
    counter: u64,
    /// Fixed per-tick increment. Zero selects the host-clock-driven mode,
    /// where [`RtcChannel::advance`]'s `host_micros_elapsed` argument is
    /// used instead.
    increment_per_tick: u64,
    /// Fractional microseconds carried across ticks so a sub-1us increment
    /// (or a fixed increment that doesn't divide evenly) isn't lost.
    carry: f64,
    /// Whether this model always reports the channel full (vs. always
    /// empty) — constant per hardware model.
    always_full: bool,
}

impl RtcChannel {
    #[must_use]
    pub fn new(increment_per_tick: u64, always_full: bool) -> Self {
        Self {
            counter: 0,
            increment_per_tick,
            carry: 0.0,
            always_full,
        }
    }

    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Advance the counter by one emulator tick. `host_micros_elapsed` is
    /// only consulted in host-clock mode (`increment_per_tick == 0`); the
    /// caller samples its own high-resolution clock (wall-clock access is
    /// left to the embedding application) and passes the elapsed
    /// microseconds since the previous tick.
    pub fn advance(&mut self, host_micros_elapsed: f64) {
        let delta = if self.increment_per_tick != 0 {
            self.increment_per_tick as f64
        } else {
            host_micros_elapsed.max(0.0)
        };
        self.carry += delta.min(MAX_VIRTUAL_MICROS_PER_TICK);
        let whole = self.carry.floor();
        self.carry -= whole;
        self.counter = (self.counter.wrapping_add(whole as u64)) & MASK48;
    }
}

impl DevicePort for RtcChannel {
    fn func(&mut self, _code: PpWord) -> FcStatus {
        FcStatus::Declined
    }

    fn io(&mut self, ctx: &mut ChannelCtx) {
        ctx.data = (self.counter & 0o7777) as PpWord;
        ctx.full = self.always_full;
        ctx.active = true;
    }

    /// Advance the free-running counter once per emulator tick, independent
    /// of whether any PP happens to pulse this channel's `io()` that tick.
    /// In host-clock mode (`increment_per_tick == 0`) the machine should
    /// call [`RtcChannel::advance`] directly with the measured host delta
    /// instead of relying on this hook, which always passes a zero delta.
    fn tick(&mut self) {
        self.advance(0.0);
    }

    /// Host-clock-mode counterpart of [`DevicePort::tick`]: advances by the
    /// machine's measured host microsecond delta instead of a zero sample.
    fn tick_with_micros(&mut self, micros: f64) {
        self.advance(micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_increment_advances_by_exact_amount() {
        let mut rtc = RtcChannel::new(10, true);
        for _ in 0..5 {
            rtc.advance(0.0);
        }
        assert_eq!(rtc.counter(), 50);
    }

    #[test]
    fn host_clock_mode_is_capped_per_tick() {
        let mut rtc = RtcChannel::new(0, true);
        rtc.advance(10_000.0);
        assert_eq!(rtc.counter(), 400);
    }

    #[test]
    fn io_loads_low_twelve_bits_of_counter() {
        let mut rtc = RtcChannel::new(1, false);
        for _ in 0..5000 {
            rtc.advance(0.0);
        }
        let mut ctx = ChannelCtx::default();
        rtc.io(&mut ctx);
        assert_eq!(ctx.data, (5000u64 & 0o7777) as PpWord);
        assert!(!ctx.full);
    }

    #[test]
    fn counter_wraps_at_forty_eight_bits() {
        let mut rtc = RtcChannel::new(0, true);
        // directly exercise wraparound without looping 2^48 times
        rtc.counter = MASK48;
        rtc.advance(1.0);
        assert_eq!(rtc.counter(), 0);
    }

    #[test]
    fn tick_advances_like_a_zero_elapsed_host_sample() {
        let mut rtc = RtcChannel::new(7, true);
        DevicePort::tick(&mut rtc);
        DevicePort::tick(&mut rtc);
        assert_eq!(rtc.counter(), 14);
    }

    #[test]
    fn tick_with_micros_drives_host_clock_mode() {
        let mut rtc = RtcChannel::new(0, true);
        DevicePort::tick_with_micros(&mut rtc, 123.0);
        assert_eq!(rtc.counter(), 123);
    }

    #[test]
    fn func_always_declines() {
        let mut rtc = RtcChannel::new(1, true);
        assert_eq!(rtc.func(0), FcStatus::Declined);
    }
}
