//! The 64 PP opcodes, grounded one-for-one on `pp.c`'s
//! `decodePpuOpcode` table.

use cyber_core::{CH_CLOCK, CH_INTERLOCK, CpWord, ModelFeatures};
use cyber_word::{add18, sub18};

use crate::{BarrelCtx, MASK3, MASK10, MASK12, MASK17, MASK18, OVERFLOW12, PpState, SIGN18, pp_increment};

/// Dispatch one instruction: `op_f`/`op_d` are either freshly decoded (the
/// PP wasn't busy) or the saved values from a still-in-flight instruction.
pub(crate) fn dispatch(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    match op_f {
        0o00 => {}
        0o01 => op_ljm(pp, op_d),
        0o02 => op_rjm(pp, op_d),
        0o03 => pp.p = pp_add_offset(pp.p, op_d),
        0o04 => {
            if pp.a == 0 {
                pp.p = pp_add_offset(pp.p, op_d);
            }
        }
        0o05 => {
            if pp.a != 0 {
                pp.p = pp_add_offset(pp.p, op_d);
            }
        }
        0o06 => {
            if pp.a < 0o400_000 {
                pp.p = pp_add_offset(pp.p, op_d);
            }
        }
        0o07 => {
            if pp.a > 0o377_777 {
                pp.p = pp_add_offset(pp.p, op_d);
            }
        }
        0o10 => op_shn(pp, op_d),
        0o11 => pp.a ^= u32::from(op_d),
        0o12 => pp.a &= u32::from(op_d),
        0o13 => pp.a &= !(u32::from(op_d) & 0o77),
        0o14 => pp.a = u32::from(op_d),
        0o15 => pp.a = !u32::from(op_d) & MASK18,
        0o16 => pp.a = add18(pp.a, u32::from(op_d)),
        0o17 => pp.a = sub18(pp.a, u32::from(op_d)),
        0o20 => op_ldc(pp, op_d),
        0o21 => op_adc(pp, op_d),
        0o22 => op_lpc(pp, op_d),
        0o23 => op_lmc(pp, op_d),
        0o24 => op_lrd(pp, op_d, ctx),
        0o25 => op_srd(pp, op_d, ctx),
        0o26 => op_exn(pp, op_d, ctx),
        0o27 => op_rpn(pp, ctx),
        0o30 => pp.a = u32::from(pp.mem[op_d as usize] & MASK12),
        0o31 => pp.a = add18(pp.a, u32::from(pp.mem[op_d as usize] & MASK12)),
        0o32 => pp.a = sub18(pp.a, u32::from(pp.mem[op_d as usize] & MASK12)),
        0o33 => pp.a ^= u32::from(pp.mem[op_d as usize] & MASK12),
        0o34 => pp.mem[op_d as usize] = (pp.a as u16) & MASK12,
        0o35 => {
            pp.a = add18(pp.a, u32::from(pp.mem[op_d as usize] & MASK12));
            pp.mem[op_d as usize] = (pp.a as u16) & MASK12;
        }
        0o36 => {
            pp.a = add18(u32::from(pp.mem[op_d as usize] & MASK12), 1);
            pp.mem[op_d as usize] = (pp.a as u16) & MASK12;
        }
        0o37 => {
            pp.a = sub18(u32::from(pp.mem[op_d as usize] & MASK12), 1);
            pp.mem[op_d as usize] = (pp.a as u16) & MASK12;
        }
        0o40 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.a = u32::from(pp.mem[loc as usize] & MASK12);
        }
        0o41 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.a = add18(pp.a, u32::from(pp.mem[loc as usize] & MASK12));
        }
        0o42 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.a = sub18(pp.a, u32::from(pp.mem[loc as usize] & MASK12));
        }
        0o43 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.a ^= u32::from(pp.mem[loc as usize] & MASK12);
        }
        0o44 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o45 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.a = add18(pp.a, u32::from(pp.mem[loc as usize] & MASK12));
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o46 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.a = add18(u32::from(pp.mem[loc as usize] & MASK12), 1);
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o47 => {
            let loc = pp.mem[op_d as usize] & MASK12;
            pp.a = sub18(u32::from(pp.mem[loc as usize] & MASK12), 1);
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o50 => {
            let loc = index_location(pp, op_d);
            pp.a = u32::from(pp.mem[loc as usize] & MASK12);
        }
        0o51 => {
            let loc = index_location(pp, op_d);
            pp.a = add18(pp.a, u32::from(pp.mem[loc as usize] & MASK12));
        }
        0o52 => {
            let loc = index_location(pp, op_d);
            pp.a = sub18(pp.a, u32::from(pp.mem[loc as usize] & MASK12));
        }
        0o53 => {
            let loc = index_location(pp, op_d);
            pp.a ^= u32::from(pp.mem[loc as usize] & MASK12);
        }
        0o54 => {
            let loc = index_location(pp, op_d);
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o55 => {
            let loc = index_location(pp, op_d);
            pp.a = add18(pp.a, u32::from(pp.mem[loc as usize] & MASK12));
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o56 => {
            let loc = index_location(pp, op_d);
            pp.a = add18(u32::from(pp.mem[loc as usize] & MASK12), 1);
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o57 => {
            let loc = index_location(pp, op_d);
            pp.a = sub18(u32::from(pp.mem[loc as usize] & MASK12), 1);
            pp.mem[loc as usize] = (pp.a as u16) & MASK12;
        }
        0o60 => op_crd(pp, op_d, ctx),
        0o61 => op_crm(pp, op_d, ctx),
        0o62 => op_cwd(pp, op_d, ctx),
        0o63 => op_cwm(pp, op_d, ctx),
        0o64 => op_ajm(pp, op_d, ctx),
        0o65 => op_ijm(pp, op_d, ctx),
        0o66 => op_fjm(pp, op_d, ctx),
        0o67 => op_ejm(pp, op_d, ctx),
        0o70 => op_ian(pp, op_f, op_d, ctx),
        0o71 => op_iam(pp, op_f, op_d, ctx),
        0o72 => op_oan(pp, op_f, op_d, ctx),
        0o73 => op_oam(pp, op_f, op_d, ctx),
        0o74 => op_acn(pp, op_f, op_d, ctx),
        0o75 => op_dcn(pp, op_f, op_d, ctx),
        0o76 => op_fan(pp, op_f, op_d, ctx),
        0o77 => op_fnc(pp, op_f, op_d, ctx),
        _ => unreachable!("opF is a 6-bit field, 0..=0o77"),
    }
}

/// `PpAddOffset`: relative-jump displacement arithmetic (UJN
/// family). `from < 040` is a positive 0..31 displacement; `from >= 040` is
/// negative, `from - 077` giving -37..-1.
fn pp_add_offset(to: u16, from: u8) -> u16 {
    let mut t = u32::from(to.wrapping_sub(1)) & u32::from(MASK12);
    if from < 0o40 {
        t += u32::from(from);
    } else {
        t = t.wrapping_add(u32::from(from)).wrapping_sub(0o77);
    }
    if t & OVERFLOW12 != 0 {
        t = t.wrapping_add(1);
    }
    (t & u32::from(MASK12)) as u16
}

/// `IndexLocation`: `mem[opD] + mem[P]` (or just `mem[P]` when `opD == 0`),
/// corrected for ones-complement end-around carry and negative zero, then
/// consumes the word at `P`.
fn index_location(pp: &mut PpState, op_d: u8) -> u16 {
    let mut loc: u32 = if op_d != 0 {
        u32::from(pp.mem[op_d as usize]) + u32::from(pp.mem[pp.p as usize])
    } else {
        u32::from(pp.mem[pp.p as usize])
    };
    if (loc & OVERFLOW12) != 0 || (loc & u32::from(MASK12)) == 0o7777 {
        loc += 1;
    }
    loc &= u32::from(MASK12);
    pp.p = pp_increment(pp.p);
    loc as u16
}

/// Decrement-and-test a 12-bit word counter: returns whether it was nonzero
/// *before* the decrement (the `if (regQ--)` idiom), wrapping within 12 bits.
fn decrement_and_test(q: &mut u16) -> bool {
    let was_nonzero = *q != 0;
    *q = q.wrapping_sub(1) & MASK12;
    was_nonzero
}

fn op_ljm(pp: &mut PpState, op_d: u8) {
    pp.p = index_location(pp, op_d);
}

fn op_rjm(pp: &mut PpState, op_d: u8) {
    let loc = index_location(pp, op_d);
    pp.mem[loc as usize] = pp.p;
    pp.p = pp_increment(loc);
}

fn op_shn(pp: &mut PpState, op_d: u8) {
    if op_d < 0o40 {
        let n = u32::from(op_d) % 18;
        let acc = (u64::from(pp.a) & u64::from(MASK18)) << n;
        pp.a = ((acc & u64::from(MASK18)) | (acc >> 18)) as u32;
    } else {
        let n = 0o77 - op_d;
        pp.a >>= n;
    }
}

fn op_ldc(pp: &mut PpState, op_d: u8) {
    pp.a = (u32::from(op_d) << 12) | u32::from(pp.mem[pp.p as usize] & MASK12);
    pp.p = pp_increment(pp.p);
}

fn op_adc(pp: &mut PpState, op_d: u8) {
    let imm = (u32::from(op_d) << 12) | u32::from(pp.mem[pp.p as usize] & MASK12);
    pp.a = add18(pp.a, imm);
    pp.p = pp_increment(pp.p);
}

fn op_lpc(pp: &mut PpState, op_d: u8) {
    let imm = (u32::from(op_d) << 12) | u32::from(pp.mem[pp.p as usize] & MASK12);
    pp.a &= imm;
    pp.p = pp_increment(pp.p);
}

fn op_lmc(pp: &mut PpState, op_d: u8) {
    let imm = (u32::from(op_d) << 12) | u32::from(pp.mem[pp.p as usize] & MASK12);
    pp.a ^= imm;
    pp.p = pp_increment(pp.p);
}

/// LRD (relocation-register load), the non-trivial half of opcode 0o24.
/// `opD == 0` does nothing (the source's `PSN24` naming: it's a pass unless
/// a relocation-reg model gives it meaning).
fn op_lrd(pp: &mut PpState, op_d: u8, ctx: &BarrelCtx<'_>) {
    if op_d == 0 {
        return;
    }
    let d = op_d as usize;
    if ctx.features.has(ModelFeatures::HAS_RELOCATION_REG_SHORT) {
        pp.r = (u32::from(pp.mem[d] as u32) & MASK3) << 18 | (u32::from(pp.mem[d + 1]) & u32::from(MASK12)) << 6;
    } else if ctx.features.has(ModelFeatures::HAS_RELOCATION_REG_LONG) {
        pp.r = (u32::from(pp.mem[d] as u32) & MASK10) << 18 | (u32::from(pp.mem[d + 1]) & u32::from(MASK12)) << 6;
    }
}

fn op_srd(pp: &mut PpState, op_d: u8, ctx: &BarrelCtx<'_>) {
    if op_d == 0 {
        return;
    }
    let d = op_d as usize;
    if ctx.features.has(ModelFeatures::HAS_RELOCATION_REG_SHORT) {
        pp.mem[d] = ((pp.r >> 18) & MASK3) as u16;
        pp.mem[d + 1] = ((pp.r >> 6) & u32::from(MASK12)) as u16;
    } else if ctx.features.has(ModelFeatures::HAS_RELOCATION_REG_LONG) {
        pp.mem[d] = ((pp.r >> 18) & MASK10) as u16;
        pp.mem[d + 1] = ((pp.r >> 6) & u32::from(MASK12)) as u16;
    }
}

/// Compute the exchange-jump target address from `regA`, applying the
/// relocation register when the model has one and `regA`'s sign bit is set
///.
fn exchange_address_from_a(pp: &PpState, ctx: &BarrelCtx<'_>) -> u32 {
    if (pp.a & SIGN18) != 0 && ctx.features.has_relocation_reg() {
        let mut addr = pp.r.wrapping_add(pp.a & MASK17);
        if ctx
            .features
            .has(ModelFeatures::HAS_RELOCATION_REG_SHORT)
        {
            addr &= MASK18;
        }
        addr
    } else {
        pp.a & MASK18
    }
}

fn op_exn(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = 0o26;
        pp.op_d = op_d;
    }
    let op_d = pp.op_d;

    let (address, force_monitor) = if (op_d & 0o70) == 0
        || ctx.features.has(ModelFeatures::HAS_NO_CEJ_MEJ)
    {
        (exchange_address_from_a(pp, ctx), false)
    } else {
        if ctx.cpu.monitor_mode() {
            pp.busy = false;
            return;
        }
        if (op_d & 0o70) == 0o10 {
            (exchange_address_from_a(pp, ctx), true)
        } else if (op_d & 0o70) == 0o20 {
            (ctx.cpu.ma() & MASK18, true)
        } else {
            pp.busy = false;
            return;
        }
    };

    // The CPU only reaches a parcel boundary on its own per-tick step, driven
    // by the machine's tick loop outside the barrel; rather than spin here
    // (which would need the CPU to touch central memory while this opcode
    // still holds `ctx.cm` borrowed), stay busy and retry next barrel
    // revolution, mirroring every other multi-tick channel opcode in this
    // file.
    pp.busy = !ctx.cpu.request_exchange_jump(address, force_monitor);
}

fn op_rpn(pp: &mut PpState, ctx: &BarrelCtx<'_>) {
    if !ctx.features.has(ModelFeatures::IS_SERIES_800)
        || ctx.features.has(ModelFeatures::HAS_RPN_ON_800)
    {
        pp.a = ctx.cpu.p();
    }
}

fn cm_read_address(pp: &PpState, ctx: &BarrelCtx<'_>) -> u32 {
    if (pp.a & SIGN18) != 0 && ctx.features.has_relocation_reg() {
        pp.r.wrapping_add(pp.a & MASK17)
    } else {
        pp.a & MASK18
    }
}

fn unpack_into(mem: &mut [u16; crate::PP_MEM_SIZE], mut idx: u8, data: CpWord) {
    mem[idx as usize] = ((data >> 48) & 0xFFF) as u16;
    idx = idx.wrapping_add(1);
    mem[idx as usize] = ((data >> 36) & 0xFFF) as u16;
    idx = idx.wrapping_add(1);
    mem[idx as usize] = ((data >> 24) & 0xFFF) as u16;
    idx = idx.wrapping_add(1);
    mem[idx as usize] = ((data >> 12) & 0xFFF) as u16;
    idx = idx.wrapping_add(1);
    mem[idx as usize] = (data & 0xFFF) as u16;
}

fn op_crd(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    let addr = cm_read_address(pp, ctx);
    let data = ctx.cm.read(addr);
    unpack_into(&mut pp.mem, op_d, data);
}

fn op_crm(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.q = pp.mem[op_d as usize] & MASK12;
        pp.busy = true;
        pp.mem[0] = pp.p;
        pp.p = pp.mem[pp.p as usize] & MASK12;
    }

    if decrement_and_test(&mut pp.q) {
        let addr = cm_read_address(pp, ctx);
        let data = ctx.cm.read(addr);
        let words = [
            ((data >> 48) & 0xFFF) as u16,
            ((data >> 36) & 0xFFF) as u16,
            ((data >> 24) & 0xFFF) as u16,
            ((data >> 12) & 0xFFF) as u16,
            (data & 0xFFF) as u16,
        ];
        for word in words {
            pp.mem[pp.p as usize] = word;
            pp.p = pp_increment(pp.p);
        }
        pp.a = (pp.a + 1) & MASK18;
    }

    if pp.q == 0 {
        pp.p = pp.mem[0];
        pp.p = pp_increment(pp.p);
        pp.busy = false;
    }
}

fn pack_from(mem: &[u16; crate::PP_MEM_SIZE], mut idx: u8) -> CpWord {
    let mut data = u64::from(mem[idx as usize] & 0xFFF);
    idx = idx.wrapping_add(1);
    data = (data << 12) | u64::from(mem[idx as usize] & 0xFFF);
    idx = idx.wrapping_add(1);
    data = (data << 12) | u64::from(mem[idx as usize] & 0xFFF);
    idx = idx.wrapping_add(1);
    data = (data << 12) | u64::from(mem[idx as usize] & 0xFFF);
    idx = idx.wrapping_add(1);
    (data << 12) | u64::from(mem[idx as usize] & 0xFFF)
}

fn op_cwd(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    let data = pack_from(&pp.mem, op_d);
    let addr = cm_read_address(pp, ctx);
    ctx.cm.write(addr, data);
}

fn op_cwm(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.q = pp.mem[op_d as usize] & MASK12;
        pp.busy = true;
        pp.mem[0] = pp.p;
        pp.p = pp.mem[pp.p as usize] & MASK12;
    }

    if decrement_and_test(&mut pp.q) {
        let mut data: u64 = 0;
        for _ in 0..5 {
            data = (data << 12) | u64::from(pp.mem[pp.p as usize] & 0xFFF);
            pp.p = pp_increment(pp.p);
        }
        let addr = cm_read_address(pp, ctx);
        ctx.cm.write(addr, data);
        pp.a = (pp.a + 1) & MASK18;
    }

    if pp.q == 0 {
        pp.p = pp.mem[0];
        pp.p = pp_increment(pp.p);
        pp.busy = false;
    }
}

fn fetch_operand(pp: &mut PpState) -> u16 {
    let v = pp.mem[pp.p as usize] & MASK12;
    pp.p = pp_increment(pp.p);
    v
}

fn op_ajm(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    let location = fetch_operand(pp);

    if (op_d & 0o40) != 0 && ctx.features.has(ModelFeatures::HAS_CHANNEL_FLAG) {
        let ch = op_d & 0o37;
        if ch < ctx.channel_count {
            let ch = ctx.channels[ch as usize].flag();
            if ch {
                pp.p = location;
            } else {
                ctx.channels[(op_d & 0o37) as usize].set_flag(true);
            }
        }
        return;
    }

    let ch = op_d & 0o37;
    if ch < ctx.channel_count {
        let channel = &mut ctx.channels[ch as usize];
        channel.check_if_active();
        if channel.is_active() {
            pp.p = location;
        }
    }
}

fn op_ijm(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    let location = fetch_operand(pp);

    if (op_d & 0o40) != 0 && ctx.features.has(ModelFeatures::HAS_CHANNEL_FLAG) {
        let ch = op_d & 0o37;
        if ch < ctx.channel_count {
            ctx.channels[ch as usize].set_flag(false);
        }
        return;
    }

    let ch = op_d & 0o37;
    if ch >= ctx.channel_count {
        pp.p = location;
    } else {
        let channel = &mut ctx.channels[ch as usize];
        channel.check_if_active();
        if !channel.is_active() {
            pp.p = location;
        }
    }
}

fn op_fjm(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    let location = fetch_operand(pp);

    if (op_d & 0o40) != 0 && ctx.features.has(ModelFeatures::HAS_ERROR_FLAG) {
        // SFM: this emulator never raises channel errors, so it's a pass.
        return;
    }

    let ch = op_d & 0o37;
    if ch < ctx.channel_count {
        let channel = &mut ctx.channels[ch as usize];
        channel.io_em(ctx.em);
        channel.check_if_full();
        if channel.is_full() {
            pp.p = location;
        }
    }
}

fn op_ejm(pp: &mut PpState, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    let location = fetch_operand(pp);

    if (op_d & 0o40) != 0 && ctx.features.has(ModelFeatures::HAS_ERROR_FLAG) {
        // CFM: no channel errors are ever raised, so this always jumps.
        let ch = op_d & 0o37;
        if ch < ctx.channel_count {
            pp.p = location;
        }
        return;
    }

    let ch = op_d & 0o37;
    if ch >= ctx.channel_count {
        pp.p = location;
    } else {
        let channel = &mut ctx.channels[ch as usize];
        channel.io_em(ctx.em);
        channel.check_if_full();
        if !channel.is_full() {
            pp.p = location;
        }
    }
}

fn channel_id_at(op_d: u8) -> usize {
    (op_d & 0o37) as usize
}

fn op_ian(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
    }

    let no_hang = (pp.op_d & 0o40) != 0;
    let idx = channel_id_at(pp.op_d);
    // Reset the about-to-be-used channel's status delay (// `delayStatus`), resolving `pp.c`'s apparent stale-pointer ordering on
    // this specific opcode to match every other channel opcode's behavior.
    ctx.channels[idx].set_delay_status(0);
    pp.busy = true;

    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    let is_clock = channel.id() == CH_CLOCK;
    if !channel.is_active() && !is_clock {
        if no_hang {
            pp.a = 0;
            pp.busy = false;
        }
        return;
    }

    channel.check_if_full();
    if !channel.is_full() {
        channel.io_em(ctx.em);
    }

    if channel.is_full() || is_clock {
        channel.channel_in();
        channel.set_empty();
        pp.a = u32::from(channel.data() & MASK12);
        if channel.disc_after_input() {
            channel.set_disc_after_input(false);
            channel.set_delay_disconnect(0);
            channel.force_deactivate();
        }
        pp.busy = false;
    }
}

fn op_iam(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
        let idx = channel_id_at(op_d);
        pp.mem[0] = pp.p;
        pp.p = pp.mem[pp.p as usize] & MASK12;
        ctx.channels[idx].set_delay_status(0);
    }

    let idx = channel_id_at(pp.op_d);
    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    if !channel.is_active() {
        if !channel.is_hardwired() {
            channel.clear_io_device();
        }
        // Channel becomes empty without the on_empty notification, avoiding
        // a spurious empty pulse.
        channel.set_full_raw(false);

        pp.mem[pp.p as usize] = 0;
        pp.p = pp.mem[0];
        pp.p = pp_increment(pp.p);
        pp.busy = false;
        return;
    }

    channel.check_if_full();
    if !channel.is_full() {
        channel.io_em(ctx.em);
    }

    let channel = &mut ctx.channels[idx];
    if channel.is_full() || channel.id() == CH_CLOCK {
        channel.channel_in();
        channel.set_empty();
        pp.mem[pp.p as usize] = channel.data() & MASK12;
        pp.p = pp_increment(pp.p);
        pp.a = (pp.a.wrapping_sub(1)) & MASK18;

        if channel.disc_after_input() {
            channel.set_disc_after_input(false);
            channel.set_delay_disconnect(0);
            channel.force_deactivate();
            if pp.a != 0 {
                pp.mem[pp.p as usize] = 0;
            }
            pp.p = pp.mem[0];
            pp.p = pp_increment(pp.p);
            pp.busy = false;
        } else if pp.a == 0 {
            pp.p = pp.mem[0];
            pp.p = pp_increment(pp.p);
            pp.busy = false;
        }
    }
}

fn op_oan(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
    }

    let no_hang = (pp.op_d & 0o40) != 0;
    let idx = channel_id_at(pp.op_d);
    ctx.channels[idx].set_delay_status(0);
    pp.busy = true;

    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    if !channel.is_active() {
        if no_hang {
            pp.busy = false;
        }
        return;
    }

    channel.check_if_full();
    if !channel.is_full() {
        let value = (pp.a as u16) & MASK12;
        channel.channel_out(value);
        channel.set_full();
        pp.busy = false;
    }

    ctx.channels[idx].io_em(ctx.em);
}

fn op_oam(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
        let idx = channel_id_at(op_d);
        pp.mem[0] = pp.p;
        pp.p = pp.mem[pp.p as usize] & MASK12;
        ctx.channels[idx].set_delay_status(0);
    }

    let idx = channel_id_at(pp.op_d);
    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    if !channel.is_active() {
        if !channel.is_hardwired() {
            channel.clear_io_device();
        }
        channel.set_full_raw(false);

        pp.p = pp.mem[0];
        pp.p = pp_increment(pp.p);
        pp.busy = false;
        return;
    }

    channel.check_if_full();
    if !channel.is_full() {
        let value = pp.mem[pp.p as usize] & MASK12;
        pp.p = pp_increment(pp.p);
        pp.a = pp.a.wrapping_sub(1) & MASK18;
        let channel = &mut ctx.channels[idx];
        channel.channel_out(value);
        channel.set_full();

        if pp.a == 0 {
            pp.p = pp.mem[0];
            pp.p = pp_increment(pp.p);
            pp.busy = false;
        }
    }

    ctx.channels[idx].io_em(ctx.em);
}

fn op_acn(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
    }

    let no_hang = (pp.op_d & 0o40) != 0;
    let idx = channel_id_at(pp.op_d);
    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    if channel.is_active() {
        if !no_hang {
            pp.busy = true;
        }
        return;
    }

    channel.activate();
    pp.busy = false;
}

fn op_dcn(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
    }

    let no_hang = (pp.op_d & 0o40) != 0;
    let idx = channel_id_at(pp.op_d);

    // RTC/interlock/maintenance hardwires can never be deactivated.
    if ctx.channels[idx].is_hardwired() {
        return;
    }

    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    if !channel.is_active() {
        if !no_hang {
            pp.busy = true;
        }
        return;
    }

    channel.disconnect();
    pp.busy = false;
}

fn op_fan(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
    }

    let no_hang = (pp.op_d & 0o40) != 0;
    let idx = channel_id_at(pp.op_d);

    if ctx.channels[idx].id() == CH_INTERLOCK
        && ctx.features.has(ModelFeatures::HAS_INTERLOCK_REG)
    {
        return;
    }

    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    if channel.is_active() {
        if !no_hang {
            pp.busy = true;
        }
        return;
    }

    let code = (pp.a as u16) & MASK12;
    ctx.channels[idx].function(code);
    pp.busy = false;
}

fn op_fnc(pp: &mut PpState, op_f: u8, op_d: u8, ctx: &mut BarrelCtx<'_>) {
    if !pp.busy {
        pp.op_f = op_f;
        pp.op_d = op_d;
    }

    let no_hang = (pp.op_d & 0o40) != 0;
    let idx = channel_id_at(pp.op_d);

    if ctx.channels[idx].id() == CH_INTERLOCK
        && ctx.features.has(ModelFeatures::HAS_INTERLOCK_REG)
    {
        return;
    }

    let channel = &mut ctx.channels[idx];
    channel.check_if_active();
    if channel.is_active() {
        if !no_hang {
            pp.busy = true;
        }
        return;
    }

    let code = fetch_operand(pp);
    ctx.channels[idx].function(code);
    pp.busy = false;
}
