// MMU: ITLB (4 entries), UTLB (64 entries), address translation and
// protection checks. spec.md §9 flags the original's `mmu_translate_read`
// as an unfinished stub ("Open question: MMU translation path... fully
// implement per the SH7750 manual; do not inherit the stub's undefined
// return value") — this module is a from-scratch implementation of the
// translation algorithm, grounded on the entry layout and bit masks in
// `examples/original_source/src/sh4/mmu.h`.

use crate::exception::{Exception, ExceptionClass};
use serde::{Deserialize, Serialize};

pub const ITLB_ENTRY_COUNT: usize = 4;
pub const UTLB_ENTRY_COUNT: usize = 64;

pub const TLB_VALID: u32 = 0x100;
pub const TLB_USERMODE: u32 = 0x040;
pub const TLB_WRITABLE: u32 = 0x020;
pub const TLB_SIZE_MASK: u32 = 0x090;
pub const TLB_SIZE_1K: u32 = 0x000;
pub const TLB_SIZE_4K: u32 = 0x010;
pub const TLB_SIZE_64K: u32 = 0x080;
pub const TLB_SIZE_1M: u32 = 0x090;
pub const TLB_CACHEABLE: u32 = 0x008;
pub const TLB_DIRTY: u32 = 0x004;
pub const TLB_SHARE: u32 = 0x002;
pub const TLB_WRITETHRU: u32 = 0x001;

pub const MASK_1K: u32 = 0xFFFF_FC00;
pub const MASK_4K: u32 = 0xFFFF_F000;
pub const MASK_64K: u32 = 0xFFFF_0000;
pub const MASK_1M: u32 = 0xFFF0_0000;

pub const MMUCR_AT: u32 = 0x0000_0001;
pub const MMUCR_TI: u32 = 0x0000_0004;
pub const MMUCR_SV: u32 = 0x0000_0100;
pub const MMUCR_SQMD: u32 = 0x0000_0200;

fn page_mask(flags: u32) -> u32 {
    match flags & TLB_SIZE_MASK {
        TLB_SIZE_1K => MASK_1K,
        TLB_SIZE_4K => MASK_4K,
        TLB_SIZE_64K => MASK_64K,
        TLB_SIZE_1M => MASK_1M,
        _ => unreachable!(),
    }
}

#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize)]
pub struct TlbEntry {
    pub vpn: u32,
    pub asid: u8,
    pub flags: u32,
    pub ppn: u32,
}

impl TlbEntry {
    fn matches(&self, vma: u32, asid: u8, single_virtual: bool) -> bool {
        if self.flags & TLB_VALID == 0 {
            return false;
        }
        let mask = page_mask(self.flags);
        if (self.vpn & mask) != (vma & mask) {
            return false;
        }
        single_virtual || self.flags & TLB_SHARE != 0 || self.asid == asid
    }

    fn translate(&self, vma: u32) -> u32 {
        let mask = page_mask(self.flags);
        (self.ppn & mask) | (vma & !mask)
    }
}

pub enum AccessMode {
    Read,
    Write,
    Prefetch,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Mmu {
    pub itlb: [TlbEntry; ITLB_ENTRY_COUNT],
    pub utlb: [TlbEntry; UTLB_ENTRY_COUNT],
    pub mmucr: u32,
    pub asid: u8,
    pub pteh: u32,
    pub ptel: u32,
    pub ptea: u32,
    pub ttb: u32,
    pub tea: u32,
}

impl Mmu {
    pub fn new() -> Self {
        Mmu {
            itlb: [TlbEntry::default(); ITLB_ENTRY_COUNT],
            utlb: [TlbEntry::default(); UTLB_ENTRY_COUNT],
            mmucr: 0,
            asid: 0,
            pteh: 0,
            ptel: 0,
            ptea: 0,
            ttb: 0,
            tea: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Mmu::new();
    }

    pub fn translation_enabled(&self) -> bool {
        self.mmucr & MMUCR_AT != 0
    }

    fn single_virtual(&self) -> bool {
        self.mmucr & MMUCR_SV != 0
    }

    /// Writes a UTLB entry from PTEH/PTEL/PTEA at the index selected by
    /// `LDTLB` (the index is externally supplied — it comes from MMUCR.URC
    /// at the time of the `LDTLB` instruction per the manual).
    pub fn ldtlb(&mut self, index: usize) {
        let idx = index % UTLB_ENTRY_COUNT;
        self.utlb[idx] = TlbEntry {
            vpn: self.pteh & 0xFFFF_FC00,
            asid: (self.pteh & 0xFF) as u8,
            flags: self.ptel & 0x1FF,
            ppn: self.ptel & 0x1FFF_F000,
        };
    }

    /// P1/P2/P3/P4 (top address bit set) always index physical space
    /// directly and are never run through the UTLB, regardless of
    /// MMUCR.AT; only P0/U0 is ever translated (spec.md §3/§4.3: "P1/P2/P3
    /// bypass MMU translation... P0/U0 are MMU-translated when MMUCR.AT=1").
    fn region_bypasses_mmu(vma: u32) -> bool {
        vma & 0x8000_0000 != 0
    }

    /// Full address translation + protection check, spec.md §4.3's
    /// "MMU-enabled path". Returns the physical address on success.
    pub fn translate(
        &self,
        vma: u32,
        mode: AccessMode,
        user_mode: bool,
    ) -> Result<u32, Exception> {
        if Self::region_bypasses_mmu(vma) || !self.translation_enabled() {
            return Ok(vma & crate::memory::PHYS_ADDR_MASK);
        }
        let sv = self.single_virtual();
        let mut hits: Vec<&TlbEntry> = self
            .utlb
            .iter()
            .filter(|e| e.matches(vma, self.asid, sv))
            .collect();

        if hits.len() > 1 {
            // Multi-hit is architecturally a separate exception class; we
            // fold it into Illegal since spec.md's exception table (§7)
            // does not enumerate a distinct multi-hit code for this core.
            return Err(Exception::new(ExceptionClass::Illegal));
        }

        let entry = match hits.pop() {
            Some(e) => e,
            None => {
                let class = match mode {
                    AccessMode::Write => ExceptionClass::TlbMissWrite,
                    _ => ExceptionClass::TlbMissRead,
                };
                return Err(Exception::new(class));
            }
        };

        if user_mode && entry.flags & TLB_USERMODE == 0 {
            let class = match mode {
                AccessMode::Write => ExceptionClass::TlbProtectionWrite,
                _ => ExceptionClass::TlbProtectionRead,
            };
            return Err(Exception::new(class));
        }

        if matches!(mode, AccessMode::Write) && entry.flags & TLB_WRITABLE == 0 {
            return Err(Exception::new(ExceptionClass::TlbProtectionWrite));
        }

        if matches!(mode, AccessMode::Write) && entry.flags & TLB_DIRTY == 0 {
            return Err(Exception::new(ExceptionClass::InitialPageWrite));
        }

        Ok(entry.translate(vma) & crate::memory::PHYS_ADDR_MASK)
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_enabled_mmu() -> Mmu {
        let mut mmu = Mmu::new();
        mmu.mmucr = MMUCR_AT | MMUCR_SV;
        mmu
    }

    #[test]
    fn translation_disabled_passes_through() {
        let mmu = Mmu::new();
        let phys = mmu.translate(0x8C01_2340, AccessMode::Read, false).unwrap();
        assert_eq!(phys, 0x0C01_2340);
    }

    #[test]
    fn p1_access_bypasses_translation_even_with_at_enabled() {
        // 0x8C010000 is a P1 address (top bit set, below the P2 boundary at
        // 0xA0000000); with MMUCR.AT=1 and no matching UTLB entry this must
        // still resolve straight to physical space rather than TLB-miss.
        let mmu = make_enabled_mmu();
        let phys = mmu.translate(0x8C01_0000, AccessMode::Read, false).unwrap();
        assert_eq!(phys, 0x0C01_0000);
    }

    #[test]
    fn p2_boot_vector_bypasses_translation_even_with_at_enabled() {
        let mmu = make_enabled_mmu();
        let phys = mmu.translate(0xA000_0000, AccessMode::Read, false).unwrap();
        assert_eq!(phys, 0x0000_0000);
    }

    #[test]
    fn tlb_miss_raises_exception() {
        let mmu = make_enabled_mmu();
        let err = mmu.translate(0x0000_1000, AccessMode::Read, false).unwrap_err();
        assert_eq!(err.class, ExceptionClass::TlbMissRead);
    }

    #[test]
    fn tlb_hit_translates_4k_page() {
        let mut mmu = make_enabled_mmu();
        mmu.utlb[0] = TlbEntry {
            vpn: 0x0000_1000,
            asid: 0,
            flags: TLB_VALID | TLB_WRITABLE | TLB_DIRTY | TLB_SIZE_4K,
            ppn: 0x1000_0000,
        };
        let phys = mmu
            .translate(0x0000_1234, AccessMode::Read, false)
            .unwrap();
        assert_eq!(phys, 0x1000_0234);
    }

    #[test]
    fn user_mode_protection_violation() {
        let mut mmu = make_enabled_mmu();
        mmu.utlb[0] = TlbEntry {
            vpn: 0x0000_1000,
            asid: 0,
            flags: TLB_VALID | TLB_SIZE_4K,
            ppn: 0x1000_0000,
        };
        let err = mmu
            .translate(0x0000_1234, AccessMode::Read, true)
            .unwrap_err();
        assert_eq!(err.class, ExceptionClass::TlbProtectionRead);
    }

    #[test]
    fn write_to_clean_page_raises_initial_page_write() {
        let mut mmu = make_enabled_mmu();
        mmu.utlb[0] = TlbEntry {
            vpn: 0x0000_1000,
            asid: 0,
            flags: TLB_VALID | TLB_WRITABLE | TLB_SIZE_4K,
            ppn: 0x1000_0000,
        };
        let err = mmu
            .translate(0x0000_1234, AccessMode::Write, false)
            .unwrap_err();
        assert_eq!(err.class, ExceptionClass::InitialPageWrite);
    }
}
