//! Raw little-endian backing-store persistence: `cmStore`,
//! `ecsStore`, and `ppStore` files read at init and written back at
//! teardown, with `cpuInit`'s length-mismatch-falls-back-to-cleared
//! behavior (supplemented detail) surfaced as a warning rather
//! than silently proceeding from an infallible constructor.

use std::fs;
use std::path::Path;

use cyber_memory::{CentralMemory, ExtendedMemory};
use cyber_ppu::PpState;

use crate::MachineError;

const CM_STORE: &str = "cmStore";
const ECS_STORE: &str = "ecsStore";
const PP_STORE: &str = "ppStore";

/// Bytes used to serialize one [`PpState`]'s register file ahead of its
/// 4096-word memory: `a` (4), `p` (2), `q` (2), `r` (4).
const PP_REGISTER_BYTES: usize = 12;
const PP_WORD_BYTES: usize = 2;

fn pp_slot_bytes(mem_words: usize) -> usize {
    PP_REGISTER_BYTES + mem_words * PP_WORD_BYTES
}

fn pp_to_bytes(pp: &PpState) -> Vec<u8> {
    let mut out = Vec::with_capacity(pp_slot_bytes(pp.mem.len()));
    out.extend_from_slice(&pp.a.to_le_bytes());
    out.extend_from_slice(&pp.p.to_le_bytes());
    out.extend_from_slice(&pp.q.to_le_bytes());
    out.extend_from_slice(&pp.r.to_le_bytes());
    for word in &pp.mem {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

fn pp_from_bytes(pp: &mut PpState, bytes: &[u8]) {
    pp.a = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes"));
    pp.p = u16::from_le_bytes(bytes[4..6].try_into().expect("2 bytes"));
    pp.q = u16::from_le_bytes(bytes[6..8].try_into().expect("2 bytes"));
    pp.r = u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes"));
    for (word, chunk) in pp
        .mem
        .iter_mut()
        .zip(bytes[PP_REGISTER_BYTES..].chunks_exact(PP_WORD_BYTES))
    {
        *word = u16::from_le_bytes(chunk.try_into().expect("2 bytes"));
    }
}

/// Load `cm`/`em` from `dir`'s `cmStore`/`ecsStore` if present. A missing
/// file leaves the store at its power-on zero state; a present file whose
/// length doesn't match is cleared and a warning printed.
pub(crate) fn load_memory(dir: &Path, cm: &mut CentralMemory, em: &mut ExtendedMemory) {
    load_one(&dir.join(CM_STORE), |bytes| cm.load_from_bytes(bytes), || cm.clear());
    load_one(&dir.join(ECS_STORE), |bytes| em.load_from_bytes(bytes), || em.clear());
}

fn load_one(
    path: &Path,
    mut apply: impl FnMut(&[u8]) -> Result<(), cyber_memory::MemoryError>,
    mut clear: impl FnMut(),
) {
    let Ok(bytes) = fs::read(path) else {
        return;
    };
    if let Err(err) = apply(&bytes) {
        eprintln!(
            "warning: {} size mismatch ({err}), starting from cleared memory",
            path.display()
        );
        clear();
    }
}

/// Write `cm`/`em` back to `dir`'s `cmStore`/`ecsStore`.
pub(crate) fn save_memory(dir: &Path, cm: &CentralMemory, em: &ExtendedMemory) -> Result<(), MachineError> {
    fs::write(dir.join(CM_STORE), cm.to_bytes())?;
    fs::write(dir.join(ECS_STORE), em.to_bytes())?;
    Ok(())
}

/// Load every PP's register file and local memory from `dir`'s `ppStore`
/// dense snapshot array, if present and exactly sized for `pps`' length and
/// memory size; otherwise leaves every PP at its power-on zero state with a
/// warning.
pub(crate) fn load_pps(dir: &Path, pps: &mut [PpState]) {
    let Ok(bytes) = fs::read(dir.join(PP_STORE)) else {
        return;
    };
    let Some(slot_bytes) = pps.first().map(|pp| pp_slot_bytes(pp.mem.len())) else {
        return;
    };
    let expected = slot_bytes * pps.len();
    if bytes.len() != expected {
        eprintln!(
            "warning: {} size mismatch (expected {expected} bytes, got {}), starting every PP from power-on state",
            dir.join(PP_STORE).display(),
            bytes.len()
        );
        for pp in pps.iter_mut() {
            *pp = PpState::new();
        }
        return;
    }
    for (pp, chunk) in pps.iter_mut().zip(bytes.chunks_exact(slot_bytes)) {
        pp_from_bytes(pp, chunk);
    }
}

/// Write every PP's register file and local memory to `dir`'s `ppStore`.
pub(crate) fn save_pps(dir: &Path, pps: &[PpState]) -> Result<(), MachineError> {
    let mut out = Vec::new();
    for pp in pps {
        out.extend_from_slice(&pp_to_bytes(pp));
    }
    fs::write(dir.join(PP_STORE), out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pp_state_round_trips_through_bytes() {
        let mut pp = PpState::new();
        pp.a = 0o123_456;
        pp.p = 0o7654;
        pp.q = 0o42;
        pp.r = 0o1_234_567;
        pp.mem[0] = 0o7777;
        pp.mem[4095] = 0o1234;

        let bytes = pp_to_bytes(&pp);
        let mut restored = PpState::new();
        pp_from_bytes(&mut restored, &bytes);

        assert_eq!(restored.a, pp.a);
        assert_eq!(restored.p, pp.p);
        assert_eq!(restored.q, pp.q);
        assert_eq!(restored.r, pp.r);
        assert_eq!(restored.mem[0], 0o7777);
        assert_eq!(restored.mem[4095], 0o1234);
    }

    #[test]
    fn save_then_load_pps_round_trips_through_a_directory() {
        let dir = std::env::temp_dir().join(format!(
            "cyber-pp-store-test-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("temp dir");

        let mut pps: Vec<PpState> = (0..3).map(|_| PpState::new()).collect();
        pps[1].a = 0o5555;
        pps[2].mem[10] = 0o42;
        save_pps(&dir, &pps).expect("save");

        let mut loaded: Vec<PpState> = (0..3).map(|_| PpState::new()).collect();
        load_pps(&dir, &mut loaded);
        assert_eq!(loaded[1].a, 0o5555);
        assert_eq!(loaded[2].mem[10], 0o42);

        fs::remove_dir_all(&dir).ok();
    }
}
