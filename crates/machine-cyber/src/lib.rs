//! A complete Cyber 6000-family machine: central and extended memory, the
//! PP barrel, the channel fabric, the CPU, and the devices attached to it,
//! composed into one value with a single tick loop.
//!
//! Nothing here is a singleton or a global: every piece of mutable state
//! lives inside [`Machine`], constructed once from a [`MachineConfig`] and
//! driven forward one tick at a time by whatever embeds it (see
//! `cyber-runner`).

mod config;
mod persistence;

use std::fmt;
use std::path::PathBuf;

use cyber_channel::Channel;
use cyber_clock::RtcChannel;
use cyber_core::{ModelFeatures, ModelType, CH_CLOCK, CH_INTERLOCK, MAX_CHANNELS};
use cyber_cpu::Cpu;
use cyber_interlock::InterlockChannel;
use cyber_memory::{CentralMemory, ExtendedMemory};
use cyber_ppu::{Barrel, BarrelCtx};

pub use config::{DeviceAttachment, MachineConfig};

/// Errors raised while building or running a [`Machine`].
#[derive(Debug)]
pub enum MachineError {
    /// A configured channel id fell outside `0..channel_count`.
    ChannelOutOfRange { channel: u8, channel_count: u8 },
    /// A persistence directory couldn't be created or read.
    Io(std::io::Error),
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelOutOfRange {
                channel,
                channel_count,
            } => write!(
                f,
                "configured device on channel {channel} but only {channel_count} channels are active"
            ),
            Self::Io(err) => write!(f, "persistence I/O error: {err}"),
        }
    }
}

impl std::error::Error for MachineError {}

impl From<std::io::Error> for MachineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// A complete, owned machine: memory, barrel, channels, CPU, and the
/// bookkeeping the tick loop needs.
pub struct Machine {
    model: ModelType,
    features: ModelFeatures,
    cm: CentralMemory,
    em: ExtendedMemory,
    barrel: Barrel,
    channels: Vec<Channel>,
    channel_count: u8,
    cpu: Cpu,
    /// Fixed per-tick RTC increment in microseconds; `0` means host-clock
    /// mode, driven instead by [`Machine::tick_host_clock`].
    rtc_increment_per_tick: u64,
    persistence_dir: Option<PathBuf>,
    cycles: u64,
}

impl Machine {
    /// Build a machine from `config`: allocates CM/EM/barrel/channels, wires
    /// the RTC and (if the model carries it) interlock-register hardwires,
    /// attaches every configured device, optionally arms deadstart, and
    /// optionally loads persisted state.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        let mut channels: Vec<Channel> = (0..MAX_CHANNELS as u8).map(Channel::new).collect();

        channels[CH_CLOCK as usize].set_always_active(true);
        channels[CH_CLOCK as usize].attach_hardwired(Box::new(RtcChannel::new(
            config.rtc_increment_per_tick,
            config.rtc_always_full,
        )));

        if config.features.has(ModelFeatures::HAS_INTERLOCK_REG) {
            channels[CH_INTERLOCK as usize].set_always_active(true);
            channels[CH_INTERLOCK as usize].attach_hardwired(Box::new(InterlockChannel::new()));
        }

        for attachment in config.devices {
            if attachment.channel >= config.channel_count {
                return Err(MachineError::ChannelOutOfRange {
                    channel: attachment.channel,
                    channel_count: config.channel_count,
                });
            }
            channels[attachment.channel as usize].attach(attachment.device);
        }

        let mut cm = CentralMemory::new(config.cm_size, !config.features.has(ModelFeatures::HAS_NO_CM_WRAP));
        let mut em = ExtendedMemory::new(config.em_size);
        let mut barrel = Barrel::new(config.pp_count);

        if let Some(dir) = &config.persistence_dir {
            persistence::load_memory(dir, &mut cm, &mut em);
            let mut pps: Vec<_> = (0..config.pp_count).map(|id| barrel.pp(id).clone()).collect();
            persistence::load_pps(dir, &mut pps);
            for (id, pp) in pps.into_iter().enumerate() {
                *barrel.pp_mut(id) = pp;
            }
        }

        if let Some(panel) = config.deadstart_panel {
            let mut pps: Vec<_> = (0..config.pp_count).map(|id| barrel.pp(id).clone()).collect();
            cyber_deadstart::arm(&mut channels, &mut pps, config.features, panel);
            for (id, pp) in pps.into_iter().enumerate() {
                *barrel.pp_mut(id) = pp;
            }
        }

        Ok(Self {
            model: config.model,
            features: config.features,
            cm,
            em,
            barrel,
            channels,
            channel_count: config.channel_count,
            cpu: Cpu::new(config.features),
            rtc_increment_per_tick: config.rtc_increment_per_tick,
            persistence_dir: config.persistence_dir,
            cycles: 0,
        })
    }

    #[must_use]
    pub fn model(&self) -> ModelType {
        self.model
    }

    #[must_use]
    pub fn features(&self) -> ModelFeatures {
        self.features
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    #[must_use]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    #[must_use]
    pub fn barrel(&self) -> &Barrel {
        &self.barrel
    }

    #[must_use]
    pub fn channel(&self, id: u8) -> &Channel {
        &self.channels[id as usize]
    }

    #[must_use]
    pub fn central_memory(&self) -> &CentralMemory {
        &self.cm
    }

    #[must_use]
    pub fn extended_memory(&self) -> &ExtendedMemory {
        &self.em
    }

    /// Run one pass of the main loop: advance the RTC, step every
    /// PP once, run the CPU for one whole instruction word, then count down
    /// every channel's delayed-disconnect/status timers.
    pub fn tick(&mut self) {
        self.tick_rtc_fixed();
        self.step_pps();
        self.cpu.execute(&mut self.cm, &mut self.em);
        self.cpu.tick_rtc(self.rtc_increment_per_tick);
        self.step_channels();
        self.cycles += 1;
    }

    /// [`Machine::tick`]'s host-clock-mode counterpart: advances the RTC by
    /// `host_micros_elapsed` (the caller's own measured wall-clock delta)
    /// instead of the configured fixed increment, then runs the rest of the
    /// tick exactly as [`Machine::tick`] does. Only meaningful when
    /// `rtc_increment_per_tick` was configured as `0`.
    pub fn tick_host_clock(&mut self, host_micros_elapsed: f64) {
        self.channels[CH_CLOCK as usize].tick_device_with_micros(host_micros_elapsed);
        self.step_pps();
        self.cpu.execute(&mut self.cm, &mut self.em);
        self.cpu.tick_rtc(host_micros_elapsed as u64);
        self.step_channels();
        self.cycles += 1;
    }

    fn tick_rtc_fixed(&mut self) {
        self.channels[CH_CLOCK as usize].tick_device();
    }

    fn step_pps(&mut self) {
        let deadstart_active = cyber_deadstart::is_active(&self.channels);
        if deadstart_active {
            let mut pp0 = self.barrel.pp(0).clone();
            cyber_deadstart::step(&mut self.channels, &mut pp0);
            *self.barrel.pp_mut(0) = pp0;

            let mut ctx = BarrelCtx {
                channels: &mut self.channels,
                channel_count: self.channel_count,
                cm: &mut self.cm,
                em: &mut self.em,
                cpu: &mut self.cpu,
                features: self.features,
            };
            self.barrel.step_from(1, &mut ctx);
        } else {
            let mut ctx = BarrelCtx {
                channels: &mut self.channels,
                channel_count: self.channel_count,
                cm: &mut self.cm,
                em: &mut self.em,
                cpu: &mut self.cpu,
                features: self.features,
            };
            self.barrel.step(&mut ctx);
        }
    }

    /// Count down every channel's delayed-disconnect/status timers.
    /// Runs over the full hardwired array rather than just
    /// `channel_count` entries, since the RTC and interlock pseudo-channels
    /// sit at fixed high indices ([`CH_CLOCK`]/[`CH_INTERLOCK`]) outside the
    /// model's configured "normal" channel range.
    fn step_channels(&mut self) {
        for channel in &mut self.channels {
            channel.step();
        }
    }

    /// Persist CM, EM, and every PP's register file and local memory to
    /// [`MachineConfig::persistence_dir`], if one was configured.
    /// A no-op when persistence wasn't configured.
    pub fn save(&self) -> Result<(), MachineError> {
        let Some(dir) = &self.persistence_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        persistence::save_memory(dir, &self.cm, &self.em)?;
        let pps: Vec<_> = (0..self.barrel.len()).map(|id| self.barrel.pp(id).clone()).collect();
        persistence::save_pps(dir, &pps)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyber_core::PpWord;

    #[test]
    fn minimal_machine_boots_with_every_pp_stopped() {
        let machine = Machine::new(MachineConfig::minimal()).expect("valid config");
        assert_eq!(machine.barrel().len(), 10);
        assert!(machine.cpu().is_stopped());
    }

    #[test]
    fn rtc_hardwire_advances_every_tick_even_with_no_pp_activity() {
        let mut machine = Machine::new(MachineConfig::minimal()).expect("valid config");
        for _ in 0..5 {
            machine.tick();
        }
        assert_eq!(machine.cycles(), 5);
        // The RTC channel is hardwired so DCN can never disconnect it,
        // independent of any PP opcode pulsing the channel.
        assert!(machine.channel(CH_CLOCK).is_hardwired());
    }

    #[test]
    fn deadstart_trivial_boots_pp0_from_the_panel() {
        let mut config = MachineConfig::minimal();
        let panel: Vec<PpWord> = vec![0o7400, 0o0000];
        config.deadstart_panel = Some(panel);
        let mut machine = Machine::new(config).expect("valid config");

        for _ in 0..20 {
            machine.tick();
        }

        assert!(!machine.channel(0).is_active());
        assert!(!machine.barrel().pp(0).busy);
    }

    #[test]
    fn channel_out_of_range_device_is_rejected() {
        let mut config = MachineConfig::minimal();
        config.channel_count = 4;
        struct Noop;
        impl cyber_channel::DevicePort for Noop {
            fn func(&mut self, _code: PpWord) -> cyber_core::FcStatus {
                cyber_core::FcStatus::Declined
            }
        }
        config
            .devices
            .push(DeviceAttachment::new(9, Box::new(Noop)));
        assert!(Machine::new(config).is_err());
    }
}
