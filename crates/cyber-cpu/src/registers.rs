//! The central processor's register file, laid out the way `cpuExchangeJump`
//! reads and writes it.

/// CP register file: P, the A/B/X banks, the CM/ECS reference windows, exit
/// mode, and the monitor address.
#[derive(Debug, Clone)]
pub struct Registers {
    /// 18-bit program address, a word offset from `ra_cm`.
    pub p: u32,
    /// Address registers A0..A7. A0 is never written by an exchange jump's
    /// own field (it shares the P word) but is otherwise an ordinary
    /// register; setting A1..A5 (read) or A6..A7 (write) side-effects a CM
    /// transfer through the matching Xi (`50..57` family).
    pub a: [u32; 8],
    /// Index registers B0..B7. B0 is forced to zero before and after every
    /// instruction.
    pub b: [u32; 8],
    /// Data registers X0..X7, 60 bits each.
    pub x: [u64; 8],
    /// Central-memory reference address.
    pub ra_cm: u32,
    /// Central-memory field length.
    pub fl_cm: u32,
    /// 24-bit exit-mode mask; bit `12 + n` enables an error exit on
    /// exit-condition bit `n`.
    pub exit_mode: u32,
    /// Extended-memory reference address (24 bits, or 30 on a series-800
    /// model running with the expanded-address exit-mode bit set).
    pub ra_ecs: u32,
    /// Extended-memory field length.
    pub fl_ecs: u32,
    /// Monitor address: the exchange-jump target used for error exits and
    /// PP-initiated MAN/monitor EXN.
    pub ma: u32,
    /// The unused "spare" exchange-package word; round-tripped but
    /// otherwise inert.
    pub spare: u32,
    /// Whether the CP is currently running in monitor (privileged) mode.
    pub monitor_mode: bool,
}

impl Registers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            p: 0,
            a: [0; 8],
            b: [0; 8],
            x: [0; 8],
            ra_cm: 0,
            fl_cm: 0,
            exit_mode: 0,
            ra_ecs: 0,
            fl_ecs: 0,
            ma: 0,
            spare: 0,
            monitor_mode: false,
        }
    }

    /// Force B0 to zero; done before and after every instruction.
    pub fn clear_b0(&mut self) {
        self.b[0] = 0;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
