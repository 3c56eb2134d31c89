//! Deadstart loader: boots the machine by streaming an
//! operator-entered panel image into PP0's memory over channel 0, then
//! releasing every parked PP into ordinary instruction execution.
//!
//! The panel device is an otherwise ordinary PCI [`cyber_channel::DevicePort`]
//! (`input()`/`flags()` contract, the same one the RTC and
//! interlock channels use) attached to channel 0. What's special about
//! deadstart is how PP0 drains it: the source parks PP0 in the general
//! channel-input opcode's busy microstate (`opF = 071`, `A = 010000`,
//! `P = 0`, `mem[0] = 0`) and lets that opcode's own completion path put PP0
//! back into normal execution. Doing that literally here corrupts the boot,
//! because `cyber-ppu`'s `op_iam` completion path reads `pp.mem[0]` as the
//! address to resume at — but a deadstart panel's first word is stored at
//! address 0 itself, so streaming it overwrites the very cell the
//! completion path is about to read as a jump target. [`step`] reaches the
//! same observable outcome (PP0 ends up executing the loaded panel from
//! wherever streaming left `P`) by moving the transferred words directly
//! rather than going through `op_iam`.

use cyber_channel::{Channel, DevicePort, FLAG_ACTIVE};
use cyber_core::{ChannelId, FcStatus, ModelFeatures, PpWord, CH_INTERLOCK, MASK12};
use cyber_ppu::PpState;

/// The channel a deadstart panel is always streamed over.
pub const DEADSTART_CHANNEL: ChannelId = 0;

/// Largest panel `arm` will accept; longer images are truncated ("up
/// to some configurable count").
pub const MAX_DEAD_START: usize = 256;

/// The opF a deadstart-parked PP carries while waiting (INPUT
/// opcode family).
const PARKED_OP_F: u8 = 0o71;

/// The accumulator value a deadstart-parked PP carries while waiting
/// (`A = 010000`).
const PARKED_A: u32 = 0o10000;

/// Below this PP id, `arm` assigns `opD = pp` directly (channels 0..9 all
/// sit inside the normal-channel range). At or above it, ids wrap back onto
/// that same low range — an extended, >10-PP barrel has no channel ids of
/// its own left to hand out once every "normal" low channel is already
/// claimed by a low-numbered PP (`deadstart.c`'s `pp < 012` / `pp >= 012`
/// split).
const PP_OPD_SPLIT: usize = 0o12;

/// A deadstart panel: a fixed word list, read out front-to-back through the
/// usual PCI `input()` hook and reporting itself inactive once drained.
pub struct DeadstartDevice {
    panel: Vec<PpWord>,
    next: usize,
}

impl DeadstartDevice {
    /// Build a panel device, truncating to [`MAX_DEAD_START`] words.
    #[must_use]
    pub fn new(mut panel: Vec<PpWord>) -> Self {
        panel.truncate(MAX_DEAD_START);
        Self { panel, next: 0 }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.panel.len()
    }
}

impl DevicePort for DeadstartDevice {
    fn func(&mut self, _code: PpWord) -> FcStatus {
        // `arm` selects this device directly; it never answers a function
        // code issued by a running program.
        FcStatus::Accepted
    }

    fn input(&mut self) -> PpWord {
        let word = self.panel.get(self.next).copied().unwrap_or(0o7777);
        if !self.is_exhausted() {
            self.next += 1;
        }
        word
    }

    fn flags(&self) -> u16 {
        if self.is_exhausted() {
            0
        } else {
            FLAG_ACTIVE
        }
    }
}

/// Whether `ch` is one of the machine's "normal" channels — the ones `arm`
/// marks active and empty alongside channel 0 ("set all normal
/// channels active and empty"). Transcribed from `deadstart.c`'s
/// `ch <= 013 || (020 <= ch <= 033)` range check: channels 0..11 and 16..27,
/// leaving a 12..15 gap and everything past 27 untouched.
#[must_use]
pub fn is_normal_channel(ch: ChannelId) -> bool {
    ch <= 0o13 || (0o20..=0o33).contains(&ch)
}

/// Arm a machine for deadstart: attach the panel to channel 0, activate the
/// normal channels (interlock only if `features` carries the interlock
/// register), and park every supplied PP in the INPUT-wait microstate
/// described below.
///
/// PP0 lands on channel 0 (the panel). Every PP below [`PP_OPD_SPLIT`] lands
/// on the channel matching its own id; every PP at or above it wraps back
/// onto that same low range. None of those channels carry an attached
/// device, so the PPs hang in the busy wait indefinitely without disturbing
/// the boot. `channels` must be the machine's full channel array (any
/// length; only channel ids named by [`is_normal_channel`] are touched) and
/// `pps` the PPs to park.
pub fn arm(
    channels: &mut [Channel],
    pps: &mut [PpState],
    features: ModelFeatures,
    panel: Vec<PpWord>,
) {
    let deadstart_idx = DEADSTART_CHANNEL as usize;
    channels[deadstart_idx].attach(Box::new(DeadstartDevice::new(panel)));
    channels[deadstart_idx].function(0);

    for ch in 0..channels.len() as ChannelId {
        if !is_normal_channel(ch) {
            continue;
        }
        if ch == CH_INTERLOCK && !features.has(ModelFeatures::HAS_INTERLOCK_REG) {
            continue;
        }
        channels[ch as usize].activate();
        channels[ch as usize].set_empty();
    }

    for (idx, pp) in pps.iter_mut().enumerate() {
        pp.mem[0] = 0;
        pp.p = 0;
        pp.a = PARKED_A;
        pp.busy = true;
        pp.op_f = PARKED_OP_F;
        pp.op_d = (idx % PP_OPD_SPLIT) as u8;
    }
}

/// Whether deadstart is still in progress on `channels`' panel channel.
#[must_use]
pub fn is_active(channels: &[Channel]) -> bool {
    channels[DEADSTART_CHANNEL as usize].is_active()
}

/// Drive PP0's one-time panel load for a single tick. Returns `true` once
/// the panel is exhausted and PP0 has been released into normal execution;
/// the caller should stop calling `step` and start stepping PP0 through the
/// ordinary barrel round-robin once this returns `true`.
///
/// Every other configured PP keeps advancing through the ordinary barrel
/// dispatch in parallel with this (see `cyber_ppu::Barrel::step_from`) —
/// only PP0 is special-cased, since only PP0 carries the panel.
pub fn step(channels: &mut [Channel], pp0: &mut PpState) -> bool {
    let idx = DEADSTART_CHANNEL as usize;
    channels[idx].check_if_active();

    if !channels[idx].is_active() {
        channels[idx].force_deactivate();
        pp0.p = 0;
        pp0.busy = false;
        return true;
    }

    let word = channels[idx].channel_in();
    channels[idx].set_empty();
    pp0.mem[pp0.p as usize] = word & MASK12;
    pp0.p = (pp0.p.wrapping_add(1)) & MASK12;
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyber_core::MAX_CHANNELS;

    fn new_channels() -> Vec<Channel> {
        (0..MAX_CHANNELS as u8).map(Channel::new).collect()
    }

    #[test]
    fn arm_parks_every_pp_in_input_wait() {
        let mut channels = new_channels();
        let mut pps: Vec<PpState> = (0..10).map(|_| PpState::new()).collect();
        arm(
            &mut channels,
            &mut pps,
            ModelFeatures::empty(),
            vec![0o7400, 0o0000],
        );

        for pp in &pps {
            assert!(pp.busy);
            assert_eq!(pp.op_f, PARKED_OP_F);
            assert_eq!(pp.a, PARKED_A);
            assert_eq!(pp.p, 0);
            assert_eq!(pp.mem[0], 0);
        }
        assert!(channels[0].is_active());
        assert!(channels[0o13].is_active());
        // The 014..017 gap and anything past 033 are left at their power-on
        // default, never activated.
        assert!(!channels[0o14].is_active());
        assert!(!channels[0o34].is_active());
        // Interlock falls in the normal range but is skipped without the
        // feature flag.
        assert!(!channels[cyber_core::CH_INTERLOCK as usize].is_active());
    }

    #[test]
    fn interlock_channel_activates_when_feature_present() {
        let mut channels = new_channels();
        let mut pps: Vec<PpState> = (0..2).map(|_| PpState::new()).collect();
        arm(
            &mut channels,
            &mut pps,
            ModelFeatures::empty().with(ModelFeatures::HAS_INTERLOCK_REG),
            vec![0o7400, 0o0000],
        );
        assert!(channels[cyber_core::CH_INTERLOCK as usize].is_active());
    }

    #[test]
    fn deadstart_trivial_loads_panel_and_deactivates_channel() {
        let mut channels = new_channels();
        let mut pps: Vec<PpState> = (0..10).map(|_| PpState::new()).collect();
        arm(
            &mut channels,
            &mut pps,
            ModelFeatures::empty(),
            vec![0o7400, 0o0000],
        );

        // First tick streams word 0 into mem[0], second streams word 1 into
        // mem[1]; the panel device now reports itself inactive.
        let mut pp0 = pps[0].clone();
        assert!(!step(&mut channels, &mut pp0));
        assert_eq!(pp0.mem[0], 0o7400);
        assert!(!step(&mut channels, &mut pp0));
        assert_eq!(pp0.mem[1], 0o0000);
        assert!(pp0.busy);

        // Third tick observes the exhausted device and releases PP0.
        assert!(step(&mut channels, &mut pp0));
        assert!(!pp0.busy);
        assert_eq!(pp0.p, 0);
        assert!(!channels[0].is_active());

        // mem[0] still holds the first panel word: the streaming path never
        // aliased it the way op_iam's busy-completion path would have.
        assert_eq!(pp0.mem[0], 0o7400);
        assert_eq!(pp0.mem[1], 0o0000);
    }

    #[test]
    fn panel_longer_than_max_is_truncated() {
        let device = DeadstartDevice::new(vec![0o1234; MAX_DEAD_START + 10]);
        assert_eq!(device.panel.len(), MAX_DEAD_START);
    }

    #[test]
    fn is_normal_channel_follows_the_two_windows() {
        assert!(is_normal_channel(0));
        assert!(is_normal_channel(0o13));
        assert!(!is_normal_channel(0o14));
        assert!(!is_normal_channel(0o17));
        assert!(is_normal_channel(0o20));
        assert!(is_normal_channel(0o33));
        assert!(!is_normal_channel(0o34));
    }

    #[test]
    fn extended_pp_ids_wrap_opd_onto_the_low_range() {
        let mut channels = new_channels();
        let mut pps: Vec<PpState> = (0..(PP_OPD_SPLIT + 2)).map(|_| PpState::new()).collect();
        arm(&mut channels, &mut pps, ModelFeatures::empty(), vec![]);
        assert_eq!(pps[PP_OPD_SPLIT].op_d, 0);
        assert_eq!(pps[PP_OPD_SPLIT + 1].op_d, 1);
    }
}
