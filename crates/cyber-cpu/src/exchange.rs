//! The 16-word exchange jump, grounded on `cpu.c`'s
//! `cpuExchangeJump`.

use cyber_core::ModelFeatures;
use cyber_memory::CentralMemory;

use crate::registers::Registers;

const MASK18: u32 = 0o777_777;
const MASK24: u32 = 0o77_777_777;
const MASK30: u32 = 0o7_777_777_777;

fn ecs_field_bits(features: ModelFeatures, exit_mode: u32) -> u32 {
    if features.has(ModelFeatures::IS_SERIES_800) && (exit_mode & ModelFeatures::HAS_EXPANDED_ADDRESS) != 0 {
        30
    } else {
        24
    }
}

/// Swap 16 CM words at `address` with `regs`, in the documented field
/// order. If the swap would touch memory beyond `cm`'s size, it
/// silently does nothing to memory (the real hardware resumed with
/// undefined register state in that case; we simply leave `regs`
/// untouched and let the caller resume from wherever it already was).
pub(crate) fn exchange_jump(regs: &mut Registers, cm: &mut CentralMemory, address: u32, features: ModelFeatures) {
    if (address as usize).checked_add(16).is_none_or(|end| end > cm.size()) {
        return;
    }

    let ecs_bits = ecs_field_bits(features, regs.exit_mode);
    let ecs_mask = if ecs_bits == 30 { MASK30 } else { MASK24 };
    let ecs_shift = if ecs_bits == 30 { 30 } else { 36 };

    let mut words = [0u64; 16];
    for (i, word) in words.iter_mut().enumerate() {
        *word = cm.read(address + i as u32);
    }

    let mut new_words = [0u64; 16];
    new_words[0] = (u64::from(regs.p & MASK18) << 36) | (u64::from(regs.a[0] & MASK18) << 18);
    new_words[1] = (u64::from(regs.ra_cm & MASK24) << 36)
        | (u64::from(regs.a[1] & MASK18) << 18)
        | u64::from(regs.b[1] & MASK18);
    new_words[2] = (u64::from(regs.fl_cm & MASK24) << 36)
        | (u64::from(regs.a[2] & MASK18) << 18)
        | u64::from(regs.b[2] & MASK18);
    new_words[3] = (u64::from(regs.exit_mode & MASK24) << 36)
        | (u64::from(regs.a[3] & MASK18) << 18)
        | u64::from(regs.b[3] & MASK18);
    new_words[4] = (u64::from(regs.ra_ecs & ecs_mask) << ecs_shift)
        | (u64::from(regs.a[4] & MASK18) << 18)
        | u64::from(regs.b[4] & MASK18);
    new_words[5] = (u64::from(regs.fl_ecs & ecs_mask) << ecs_shift)
        | (u64::from(regs.a[5] & MASK18) << 18)
        | u64::from(regs.b[5] & MASK18);
    new_words[6] = (u64::from(regs.ma & MASK24) << 36)
        | (u64::from(regs.a[6] & MASK18) << 18)
        | u64::from(regs.b[6] & MASK18);
    new_words[7] = (u64::from(regs.spare & MASK24) << 36)
        | (u64::from(regs.a[7] & MASK18) << 18)
        | u64::from(regs.b[7] & MASK18);
    for i in 0..8 {
        new_words[8 + i] = regs.x[i];
    }

    for (i, word) in new_words.iter().enumerate() {
        cm.write(address + i as u32, *word);
    }

    regs.p = (words[0] >> 36) as u32 & MASK18;
    regs.a[0] = (words[0] >> 18) as u32 & MASK18;
    regs.b[0] = 0;

    regs.ra_cm = (words[1] >> 36) as u32 & MASK24;
    regs.a[1] = (words[1] >> 18) as u32 & MASK18;
    regs.b[1] = words[1] as u32 & MASK18;

    regs.fl_cm = (words[2] >> 36) as u32 & MASK24;
    regs.a[2] = (words[2] >> 18) as u32 & MASK18;
    regs.b[2] = words[2] as u32 & MASK18;

    regs.exit_mode = (words[3] >> 36) as u32 & MASK24;
    regs.a[3] = (words[3] >> 18) as u32 & MASK18;
    regs.b[3] = words[3] as u32 & MASK18;

    let ecs_bits_in = ecs_field_bits(features, regs.exit_mode);
    let (ecs_mask_in, ecs_shift_in) = if ecs_bits_in == 30 {
        (MASK30, 30)
    } else {
        (MASK24, 36)
    };
    regs.ra_ecs = (words[4] >> ecs_shift_in) as u32 & ecs_mask_in;
    regs.a[4] = (words[4] >> 18) as u32 & MASK18;
    regs.b[4] = words[4] as u32 & MASK18;

    regs.fl_ecs = (words[5] >> ecs_shift_in) as u32 & ecs_mask_in;
    regs.a[5] = (words[5] >> 18) as u32 & MASK18;
    regs.b[5] = words[5] as u32 & MASK18;

    regs.ma = (words[6] >> 36) as u32 & MASK24;
    regs.a[6] = (words[6] >> 18) as u32 & MASK18;
    regs.b[6] = words[6] as u32 & MASK18;

    regs.spare = (words[7] >> 36) as u32 & MASK24;
    regs.a[7] = (words[7] >> 18) as u32 & MASK18;
    regs.b[7] = words[7] as u32 & MASK18;

    for i in 0..8 {
        regs.x[i] = words[8 + i] & cyber_core::MASK60;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_round_trips_p_and_x_registers() {
        let mut cm = CentralMemory::new(64, true);
        let mut regs = Registers::new();
        regs.p = 0o1234;
        regs.x[3] = 0o7654_3210;
        exchange_jump(&mut regs, &mut cm, 16, ModelFeatures::empty());
        // The block at 16 was all zero, so the CPU picks up P=0, X=0...
        assert_eq!(regs.p, 0);
        assert_eq!(regs.x[3], 0);
        // ...and the old state was written out to CM.
        assert_eq!((cm.read(16) >> 36) & u64::from(MASK18), 0o1234);
        assert_eq!(cm.read(16 + 11), 0o7654_3210);
    }

    #[test]
    fn out_of_range_target_leaves_registers_untouched() {
        let mut cm = CentralMemory::new(8, false);
        let mut regs = Registers::new();
        regs.p = 0o55;
        exchange_jump(&mut regs, &mut cm, 1000, ModelFeatures::empty());
        assert_eq!(regs.p, 0o55);
    }
}
