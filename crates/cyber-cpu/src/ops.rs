//! The CP's 64 opcodes, grouped into the eight families
//! `cpu.c`'s `decodeCpuOpcode` dispatches on. Each family covers the
//! representative members named below rather than every historical
//! sub-variant.

use cyber_core::{ExitCondition, MASK60, ModelFeatures};
use cyber_memory::{CentralMemory, ExtendedMemory};
use cyber_word::{add18, add60, mask, normalize, pack, sub18, sub60, unpack};

use crate::Cpu;

const MASK18: u32 = 0o777_777;
const SIGN18: u32 = 0o400_000;
const MASK21: u32 = 0o7_777_777;

pub(crate) fn dispatch(cpu: &mut Cpu, cm: &mut CentralMemory, em: &mut ExtendedMemory) {
    match cpu.op_fm {
        0o00 => op_error_exit(cpu, cm),
        0o01 => op_01(cpu, cm, em),
        0o02..=0o07 => op_branch(cpu),
        0o10..=0o17 => op_boolean(cpu),
        0o20..=0o27 => op_shift_family(cpu),
        0o30..=0o37 => op_float_add_family(cpu, cm),
        0o40..=0o47 => op_float_mul_family(cpu, cm),
        0o50..=0o57 => op_a_register(cpu, cm),
        0o60..=0o67 => op_b_register(cpu, cm),
        0o70..=0o77 => op_x_register(cpu, cm),
        _ => unreachable!("opFm is a 6-bit field, 0..=0o77"),
    }
}

fn sign_extend_18_to_60(value: u32) -> u64 {
    let v = u64::from(value & MASK18);
    if value & SIGN18 != 0 {
        v | (MASK60 & !u64::from(MASK18))
    } else {
        v
    }
}

/// The "jk" combined 6-bit shift count used by the constant-shift family:
/// top bit is the ones-complement sign, flipping shift direction.
fn jk_shift_count(op_j: u8, op_k: u8) -> (u32, bool) {
    let raw = (u32::from(op_j) << 3) | u32::from(op_k);
    if raw & 0o40 != 0 {
        (!raw & 0o77, false)
    } else {
        (raw, true)
    }
}

fn b_shift_count(b: u32) -> (u32, bool) {
    if b & SIGN18 != 0 {
        ((!b) & 0o77, false)
    } else {
        (b & 0o77, true)
    }
}

/// `cpuOpIllegal`'s unconditional-stop shared tail, reused by opcode `00`.
fn op_error_exit(cpu: &mut Cpu, cm: &mut CentralMemory) {
    cpu.exit_condition = ExitCondition::empty();
    let p = cpu.regs.p;
    cpu.error_exit(cm, p);
}

fn op_01(cpu: &mut Cpu, cm: &mut CentralMemory, em: &mut ExtendedMemory) {
    match cpu.op_i {
        0 => {
            // RJ: store the return address at the target, jump past it.
            let target = cpu.add_ra(cpu.op_address);
            cm.write(target, u64::from(cpu.regs.p));
            cpu.branch_to(add18(cpu.op_address, 1));
        }
        1 => {
            // XJ: exchange jump, legal only as the first parcel of a word.
            if cpu.op_offset == 30 {
                let address = cpu.op_address;
                let monitor_mode_already = cpu.regs.monitor_mode;
                if !monitor_mode_already {
                    cpu.regs.monitor_mode = true;
                }
                crate::exchange::exchange_jump(&mut cpu.regs, cm, address, cpu.features);
                cpu.stack.void();
                // A self-initiated XJ leaves the CPU running at the new
                // context's P; the outer execute() loop re-fetches.
                cpu.fetch_word(cm);
            }
        }
        2 => em_block_transfer(cpu, cm, em, false),
        3 => em_block_transfer(cpu, cm, em, true),
        4 => {
            let address = add18(cpu.regs.ra_ecs, u32::from(cpu.op_k));
            cpu.regs.x[cpu.op_j as usize] = em.read(address);
        }
        5 => {
            let address = add18(cpu.regs.ra_ecs, u32::from(cpu.op_k));
            em.write(address, cpu.regs.x[cpu.op_j as usize]);
        }
        6 => {
            cpu.regs.x[cpu.op_k as usize] = cpu.rtc_micros & 0o7777;
        }
        _ => {}
    }
}

/// REC/WEC: move a block of `X0` words between CM (starting at `A0`) and
/// EM (starting at `ra_ecs`).
fn em_block_transfer(cpu: &mut Cpu, cm: &mut CentralMemory, em: &mut ExtendedMemory, write_to_em: bool) {
    let count = (cpu.regs.x[0] & 0o777_777) as u32;
    let cm_start = cpu.regs.a[0];
    let em_start = cpu.regs.ra_ecs;
    for i in 0..count.min(cpu.regs.fl_ecs.max(1)) {
        let cm_addr = cpu.add_ra(add18(cm_start, i));
        let em_addr = add18(em_start, i);
        if write_to_em {
            em.write(em_addr, cm.read(cm_addr));
        } else {
            cm.write(cm_addr, em.read(em_addr));
        }
    }
}

fn op_branch(cpu: &mut Cpu) {
    let bi = cpu.regs.b[cpu.op_i as usize];
    let bj = cpu.regs.b[cpu.op_j as usize];
    let take = match cpu.op_fm {
        0o02 => true,
        0o03 => bi == 0,
        0o04 => bi != 0,
        0o05 => bi & SIGN18 == 0,
        0o06 => bi & SIGN18 != 0,
        0o07 => bi == bj,
        _ => unreachable!(),
    };
    if take {
        cpu.branch_to(cpu.op_address);
    }
}

fn op_boolean(cpu: &mut Cpu) {
    let xj = cpu.regs.x[cpu.op_j as usize];
    let xk = cpu.regs.x[cpu.op_k as usize];
    let result = match cpu.op_fm {
        0o10 => xj,
        0o11 => xj & xk,
        0o12 => xj | xk,
        0o13 => xj ^ xk,
        0o14 => !xj & MASK60,
        0o15 => xj & !xk & MASK60,
        0o16 => xj | (!xk & MASK60),
        0o17 => !(xj ^ xk) & MASK60,
        _ => unreachable!(),
    };
    cpu.regs.x[cpu.op_i as usize] = result;
}

fn op_shift_family(cpu: &mut Cpu) {
    match cpu.op_fm {
        0o20 | 0o21 => {
            let (mag, left) = jk_shift_count(cpu.op_j, cpu.op_k);
            shift_in_place(cpu, mag, left, cpu.op_fm == 0o21);
        }
        0o22 | 0o23 => {
            let (mag, left) = b_shift_count(cpu.regs.b[cpu.op_j as usize]);
            shift_in_place(cpu, mag, left, cpu.op_fm == 0o23);
        }
        0o24 | 0o25 => {
            let (coeff, shift) = normalize(cpu.regs.x[cpu.op_j as usize]);
            cpu.regs.x[cpu.op_i as usize] = coeff;
            cpu.regs.b[cpu.op_k as usize] = shift & 0o77;
        }
        0o26 => {
            let (coeff, expo) = unpack(cpu.regs.x[cpu.op_j as usize]);
            cpu.regs.x[cpu.op_i as usize] = coeff;
            cpu.regs.b[cpu.op_k as usize] = expo & 0o77;
        }
        0o27 => {
            let coeff = cpu.regs.x[cpu.op_j as usize];
            let expo = cpu.regs.b[cpu.op_k as usize];
            cpu.regs.x[cpu.op_i as usize] = pack(coeff, expo);
        }
        _ => unreachable!(),
    }
}

fn shift_in_place(cpu: &mut Cpu, magnitude: u32, left: bool, arithmetic: bool) {
    let x = cpu.regs.x[cpu.op_i as usize];
    let result = if arithmetic {
        if left {
            (x << magnitude.min(59)) & MASK60
        } else {
            cyber_word::shift_right_arithmetic(x, magnitude)
        }
    } else if left {
        cyber_word::shift_left_circular(x, magnitude)
    } else {
        cyber_word::shift_left_circular(x, 60 - (magnitude % 60))
    };
    cpu.regs.x[cpu.op_i as usize] = result;
}

/// `30..37`: FX/DX/RX add-subtract pairs, then plain integer add/subtract
/// ("floating add/subtract (FX), double variants (DX), rounded
/// (RX), integer add/sub (IX)"). Subtraction flips Xk's sign bit before the
/// shared `float_add` routine, matching `cpu.c`'s `cpuOpFloatAdd` callers.
fn op_float_add_family(cpu: &mut Cpu, cm: &mut CentralMemory) {
    let xj = cpu.regs.x[cpu.op_j as usize];
    let xk = cpu.regs.x[cpu.op_k as usize];
    let negate = xk ^ (1u64 << 59);
    let result = match cpu.op_fm {
        0o30 => cyber_word::float_add(xj, xk, false, false),
        0o31 => cyber_word::float_add(xj, negate, false, false),
        0o32 => cyber_word::float_add(xj, xk, false, true),
        0o33 => cyber_word::float_add(xj, negate, false, true),
        0o34 => cyber_word::float_add(xj, xk, true, false),
        0o35 => cyber_word::float_add(xj, negate, true, false),
        0o36 => add60(xj, xk),
        0o37 => sub60(xj, xk),
        _ => unreachable!(),
    };
    cpu.regs.x[cpu.op_i as usize] = result;
    if cpu.op_fm <= 0o35 {
        cpu.float_check(cm, result);
    }
}

fn op_float_mul_family(cpu: &mut Cpu, cm: &mut CentralMemory) {
    if cpu.op_fm == 0o46 && cpu.op_i >= 4 {
        if !cpu.features.has(ModelFeatures::HAS_CMU) {
            // CMU absent: the 464..467 encodings are illegal instructions,
            // not a silent no-op (spec §7's "CMU absent" IllegalInstruction row).
            cpu.exit_condition.clear();
            let p = cpu.regs.p;
            cpu.error_exit(cm, p);
            return;
        }
        cmu_dispatch(cpu, cm, cpu.op_i - 4);
        return;
    }

    let xj = cpu.regs.x[cpu.op_j as usize];
    let xk = cpu.regs.x[cpu.op_k as usize];
    match cpu.op_fm {
        0o40 => {
            let result = cyber_word::float_multiply(xj, xk, false, false);
            cpu.regs.x[cpu.op_i as usize] = result;
            cpu.float_check(cm, result);
        }
        0o41 => {
            let result = cyber_word::float_multiply(xj, xk, true, false);
            cpu.regs.x[cpu.op_i as usize] = result;
            cpu.float_check(cm, result);
        }
        0o42 => {
            let result = cyber_word::float_multiply(xj, xk, false, true);
            cpu.regs.x[cpu.op_i as usize] = result;
            cpu.float_check(cm, result);
        }
        0o43 => {
            let result = cyber_word::float_divide(xj, xk, false);
            cpu.regs.x[cpu.op_i as usize] = result;
            cpu.float_check(cm, result);
        }
        0o44 => {
            let result = cyber_word::float_divide(xj, xk, true);
            cpu.regs.x[cpu.op_i as usize] = result;
            cpu.float_check(cm, result);
        }
        0o45 => {
            // MX jk: Xi gets a mask of the combined jk-bit count, left
            // justified (`cpuOpMask`).
            let jk = (u32::from(cpu.op_j) << 3) | u32::from(cpu.op_k);
            cpu.regs.x[cpu.op_i as usize] = cyber_word::mask(jk);
        }
        0o46 => {
            // Pass/no-op when CMU isn't engaged.
        }
        0o47 => {
            cpu.regs.x[cpu.op_i as usize] = xj.count_ones() as u64;
        }
        _ => unreachable!(),
    }
}

/// The CMU character-string family ("CMU operations"). The
/// descriptor word packs (src addr : 24)(dst addr : 24)(length : 12), a
/// convention chosen here since the exact bit layout is otherwise
/// unconstrained (see DESIGN.md).
fn cmu_dispatch(cpu: &mut Cpu, cm: &mut CentralMemory, variant: u8) {
    let descriptor = if variant == 0 {
        // Move-indirect: Aj points at a CM word holding the full descriptor.
        let address = cpu.regs.a[cpu.op_j as usize];
        cpu.check_op_address(address, cm).map_or(0, |loc| cm.read(loc))
    } else {
        // Move-direct/compare: the descriptor is assembled from A1 (src),
        // A2 (dst), and the low bits of Bk (length) — this encoding's 15-bit
        // instruction word has no room for a literal descriptor operand.
        (u64::from(cpu.regs.a[1]) << 36) | (u64::from(cpu.regs.a[2]) << 12) | u64::from(cpu.regs.b[cpu.op_k as usize] & 0o7777)
    };

    let src = ((descriptor >> 36) & 0o77_777_777) as u32;
    let dst = ((descriptor >> 12) & 0o77_777_777) as u32;
    let len = (descriptor & 0o7777) as u32;

    match variant {
        0 | 1 => cmu_move(cpu, cm, src, dst, len),
        2 => cmu_compare(cpu, cm, src, dst, len, true),
        3 => cmu_compare(cpu, cm, src, dst, len, false),
        _ => unreachable!(),
    }
}

fn cmu_get_char(cm: &CentralMemory, base: u32, index: u32) -> u8 {
    let word_addr = base + index / 10;
    let pos = index % 10;
    let word = cm.read(word_addr);
    ((word >> (54 - pos * 6)) & mask(6)) as u8
}

fn cmu_put_char(cm: &mut CentralMemory, base: u32, index: u32, value: u8) {
    let word_addr = base + index / 10;
    let pos = index % 10;
    let mut word = cm.read(word_addr);
    let shift = 54 - pos * 6;
    word &= !(mask(6) << shift);
    word |= (u64::from(value) & mask(6)) << shift;
    cm.write(word_addr, word);
}

fn cmu_move(cpu: &mut Cpu, cm: &mut CentralMemory, src: u32, dst: u32, len: u32) {
    for i in 0..len {
        let ch = cmu_get_char(cm, cpu.add_ra(src), i);
        cmu_put_char(cm, cpu.add_ra(dst), i, ch);
    }
}

/// Compare returns a signed 60-bit result: the magnitude is the remaining
/// character count at the first mismatch, the sign marks which operand
/// compared low. Collated compare consults a 64x6-bit table at `A0`.
fn cmu_compare(cpu: &mut Cpu, cm: &mut CentralMemory, src: u32, dst: u32, len: u32, collated: bool) {
    let table_base = cpu.add_ra(cpu.regs.a[0]);
    let mut result = 0u64;
    for i in 0..len {
        let mut a = cmu_get_char(cm, cpu.add_ra(src), i);
        let mut b = cmu_get_char(cm, cpu.add_ra(dst), i);
        if collated {
            a = cmu_get_char(cm, table_base, u32::from(a));
            b = cmu_get_char(cm, table_base, u32::from(b));
        }
        if a != b {
            let remaining = u64::from(len - i);
            result = if a < b { remaining } else { sub60(0, remaining) };
            break;
        }
    }
    // opI is consumed selecting the CMU variant in this cramped 15-bit
    // encoding, so the result always lands in X0 rather than an
    // instruction-selected register.
    cpu.regs.x[0] = result;
}

/// The eight operand forms shared verbatim by the `50..57`, `60..67`, and
/// `70..77` register-load families (`cpOp5x`/`cpOp6x`/`cpOp7x`): `Aj+K`,
/// `Bj+K`, `Xj+K`, `Xj+Bk`, `Aj+Bk`, `Aj-Bk`, `Bj+Bk`, `Bj-Bk`, selected by
/// `opFm`'s low 3 bits.
fn register_operand_value(cpu: &Cpu) -> u32 {
    let xj = (cpu.regs.x[cpu.op_j as usize] & u64::from(MASK18)) as u32;
    match cpu.op_fm & 0o7 {
        0 => add18(cpu.regs.a[cpu.op_j as usize], cpu.op_address),
        1 => add18(cpu.regs.b[cpu.op_j as usize], cpu.op_address),
        2 => add18(xj, cpu.op_address),
        3 => add18(xj, cpu.regs.b[cpu.op_k as usize]),
        4 => add18(cpu.regs.a[cpu.op_j as usize], cpu.regs.b[cpu.op_k as usize]),
        5 => sub18(cpu.regs.a[cpu.op_j as usize], cpu.regs.b[cpu.op_k as usize]),
        6 => add18(cpu.regs.b[cpu.op_j as usize], cpu.regs.b[cpu.op_k as usize]),
        7 => sub18(cpu.regs.b[cpu.op_j as usize], cpu.regs.b[cpu.op_k as usize]),
        _ => unreachable!(),
    }
}

/// A-register loads (`50..57`): setting A1..A5 side-effects a
/// CM read through Xi; A6/A7 side-effects a CM write.
fn op_a_register(cpu: &mut Cpu, cm: &mut CentralMemory) {
    let i = cpu.op_i as usize;
    let value = register_operand_value(cpu);
    cpu.regs.a[i] = value & MASK18;
    cpu.maybe_purge_stack_on_a_write();
    a_register_side_effect(cpu, cm, i);
}

fn a_register_side_effect(cpu: &mut Cpu, cm: &mut CentralMemory, i: usize) {
    if !(1..=7).contains(&i) {
        return;
    }
    let Some(location) = cpu.check_op_address(cpu.regs.a[i], cm) else {
        return;
    };
    if (1..=5).contains(&i) {
        cpu.regs.x[i] = cm.read(location);
    } else {
        cm.write(location, cpu.regs.x[i]);
    }
}

fn op_b_register(cpu: &mut Cpu, cm: &mut CentralMemory) {
    let i = cpu.op_i as usize;
    if cpu.features.has(ModelFeatures::IS_SERIES_800) && cpu.op_i == 0 && (cpu.op_fm == 0o66 || cpu.op_fm == 0o67) {
        // CR/CW: single-word CM transfer between Xj and the address in Xk
        // (masked to 21 bits), series-800 only (`cpOp66`/`cpOp67`).
        let address = (cpu.regs.x[cpu.op_k as usize] as u32) & MASK21;
        let location = cpu.check_op_address(address, cm);
        if let Some(location) = location {
            if cpu.op_fm == 0o66 {
                cpu.regs.x[cpu.op_j as usize] = cm.read(location);
            } else {
                cm.write(location, cpu.regs.x[cpu.op_j as usize]);
            }
        }
        return;
    }

    let value = register_operand_value(cpu);
    cpu.regs.b[i] = value & MASK18;
}

fn op_x_register(cpu: &mut Cpu, _cm: &mut CentralMemory) {
    let i = cpu.op_i as usize;
    let value = sign_extend_18_to_60(register_operand_value(cpu));
    cpu.regs.x[i] = value & MASK60;
}
