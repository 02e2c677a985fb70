// Cache model: instruction-cache and operand-cache tag arrays, the ORAM
// remap window, and the two store queues. Deliberately not a functionally
// accurate cache (no actual line-fill timing) — just tags + ORAM, plus
// writeback-on-dirty-evict and the store-queue burst-write path.

pub const IC_LINE_SIZE: u32 = 32;
pub const IC_LINES: usize = 256;
pub const OC_LINE_SIZE: u32 = 32;
pub const OC_LINES: usize = 512;

pub const CCR_OCE: u32 = 0x0001;
pub const CCR_WT: u32 = 0x0002;
pub const CCR_CB: u32 = 0x0004;
pub const CCR_OCI: u32 = 0x0008;
pub const CCR_ORA: u32 = 0x0020;
pub const CCR_OIX: u32 = 0x0080;
pub const CCR_ICE: u32 = 0x0100;
pub const CCR_ICI: u32 = 0x0800;
pub const CCR_EMODE: u32 = 0x8000_0000;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheLine {
    pub tag: u32,
    pub valid: bool,
    pub dirty: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CacheModel {
    pub ic_tags: [CacheLine; IC_LINES],
    pub oc_tags: [CacheLine; OC_LINES],
    /// Directly-addressable slice of the operand cache, exposed as RAM at
    /// 0x7C000000 when CCR.ORA=1.
    pub oram: Vec<u8>,
    pub ccr: u32,
    pub store_queue: [[u32; 8]; 2],
    pub qacr0: u32,
    pub qacr1: u32,
}

impl CacheModel {
    pub fn new() -> Self {
        CacheModel {
            ic_tags: [CacheLine::default(); IC_LINES],
            oc_tags: [CacheLine::default(); OC_LINES],
            oram: vec![0u8; 8192],
            ccr: 0,
            store_queue: [[0; 8]; 2],
            qacr0: 0,
            qacr1: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = CacheModel::new();
    }

    pub fn oram_enabled(&self) -> bool {
        self.ccr & CCR_ORA != 0
    }

    /// Writeback-on-evict for an OC address-array write that targets a
    /// valid+dirty line (the OC's "cache direct access" write path).
    pub fn maybe_writeback<F: FnMut(u32, &[u8; 32])>(&mut self, line: usize, mut writer: F) {
        let entry = &mut self.oc_tags[line];
        if entry.valid && entry.dirty {
            let mut data = [0u8; 32];
            let start = line * OC_LINE_SIZE as usize;
            data.copy_from_slice(&self.oram[start..start + 32.min(self.oram.len() - start)]);
            writer(entry.tag, &data);
            entry.dirty = false;
        }
    }

    /// Which store queue bank an address in 0xE0000000..0xE0000040 selects.
    pub fn store_queue_bank(addr: u32) -> usize {
        ((addr >> 5) & 1) as usize
    }

    pub fn store_queue_write(&mut self, addr: u32, value: u32) {
        let bank = Self::store_queue_bank(addr);
        let idx = ((addr >> 2) & 7) as usize;
        self.store_queue[bank][idx] = value;
    }

    /// Computes the 32-byte burst target for a `PREF` to the store-queue
    /// window when the MMU is disabled: QACR{0,1} supply
    /// the high bits, OR'd with the low address bits.
    pub fn store_queue_flush_target(&self, addr: u32) -> u32 {
        let bank = Self::store_queue_bank(addr);
        let qacr = if bank == 0 { self.qacr0 } else { self.qacr1 };
        ((qacr & 0x1C) << 24) | (addr & 0x03FF_FFE0)
    }

    pub fn store_queue_burst_data(&self, addr: u32) -> [u8; 32] {
        let bank = Self::store_queue_bank(addr);
        let mut out = [0u8; 32];
        for (i, word) in self.store_queue[bank].iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}

impl Default for CacheModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_queue_round_trip_produces_expected_target() {
        // Write 32 bytes to 0xE0000000, QACR0 -> target base,
        // PREF 0xE0000000 -> 32-byte burst write to computed target.
        let mut cache = CacheModel::new();
        for i in 0..8 {
            cache.store_queue_write(0xE000_0000 + i * 4, 0x1000_0000 + i);
        }
        cache.qacr0 = 0x04; // selects external area bits
        let target = cache.store_queue_flush_target(0xE000_0000);
        assert_eq!(target, 0x0400_0000);
        let burst = cache.store_queue_burst_data(0xE000_0000);
        assert_eq!(u32::from_le_bytes(burst[0..4].try_into().unwrap()), 0x1000_0000);
    }
}
