//! Machine configuration ("package global state into one
//! Machine value"): everything [`crate::Machine::new`] needs to build a
//! machine, constructed by hand by the embedding binary rather than parsed
//! from a config file.

use std::path::PathBuf;

use cyber_channel::DevicePort;
use cyber_core::{ChannelId, ExtMemoryKind, ModelFeatures, ModelType, PpWord};

/// One device to attach at a configured channel, alongside the two
/// hardwired pseudo-channels ([`cyber_core::CH_CLOCK`]/
/// [`cyber_core::CH_INTERLOCK`]) the machine always wires up itself.
pub struct DeviceAttachment {
    pub channel: ChannelId,
    pub device: Box<dyn DevicePort>,
}

impl DeviceAttachment {
    #[must_use]
    pub fn new(channel: ChannelId, device: Box<dyn DevicePort>) -> Self {
        Self { channel, device }
    }
}

/// Everything needed to build one [`crate::Machine`].
pub struct MachineConfig {
    pub model: ModelType,
    pub features: ModelFeatures,
    pub pp_count: usize,
    pub channel_count: u8,
    pub cm_size: usize,
    pub em_kind: ExtMemoryKind,
    pub em_size: usize,
    /// Fixed RTC increment in microseconds per tick; `0` selects host-clock
    /// mode, which the embedding runner must then drive itself by calling
    /// [`crate::Machine::tick_host_clock`] instead of [`crate::Machine::tick`]
    ///.
    pub rtc_increment_per_tick: u64,
    /// Whether this model's RTC always reports the channel full (a
    /// per-model constant).
    pub rtc_always_full: bool,
    pub devices: Vec<DeviceAttachment>,
    /// Deadstart panel words to stream into PP0 at boot, if any.
    /// `None` leaves every PP stopped, as though deadstart had
    /// never been triggered.
    pub deadstart_panel: Option<Vec<PpWord>>,
    /// Directory holding `cmStore`/`ecsStore`/`ppStore` and per-controller
    /// conversion-table files. `None` runs with volatile memory
    /// only.
    pub persistence_dir: Option<PathBuf>,
}

impl MachineConfig {
    /// A minimal configuration: 10 PPs, 8 channels (plus the two
    /// always-present hardwires), 4096-word CM, no EM, no devices, no
    /// persistence — enough to deadstart and run simple PP/CP programs.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            model: ModelType::Cyber6400,
            features: ModelFeatures::empty(),
            pp_count: 10,
            channel_count: 8,
            cm_size: 4096,
            em_kind: ExtMemoryKind::None,
            em_size: 0,
            rtc_increment_per_tick: 1,
            rtc_always_full: false,
            devices: Vec::new(),
            deadstart_panel: None,
            persistence_dir: None,
        }
    }
}
