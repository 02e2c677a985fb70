// On-chip peripheral bundle: INTC, TMU, DMAC, SCIF, PMM and the L0 clock
// tracker, plus the P4 register-window dispatch spec.md §6 calls
// `register_io_region` (abridged register map per spec.md §6: "full schema
// bit-exact — see the SH7750 manual"). Grounded on the teacher's
// `devices.rs` bus-dispatch pattern, generalised from a flat device list
// scanned by address range into a direct offset match against the fixed
// windows `intc.c`, `timer.c`, `dmac.c` and `scif.c` declare for the real
// chip. Unlike the RAM/ROM page map in `memory.rs`, these registers are
// intercepted directly by `Cpu::read_mem`/`write_mem` before the MMU/page
// path runs — the same pattern already used there for the store queue —
// because `Peripherals` is owned alongside `AddressSpace` rather than
// inside it.

pub mod clock;
pub mod dmac;
pub mod intc;
pub mod pmm;
pub mod scif;
pub mod tmu;

use crate::fields::{OpResult, Size};
use crate::registers::Sh4Registers;
use clock::Clock;
use dmac::Dmac;
use intc::Intc;
use pmm::Pmm;
use scif::Scif;
use tmu::Tmu;

pub const INTC_BASE: u32 = 0xFFD0_0000;
pub const TMU_BASE: u32 = 0xFFD8_0000;
pub const DMAC_BASE: u32 = 0xFFA0_0000;
pub const SCIF_BASE: u32 = 0xFFE8_0000;
pub const PMM_BASE: u32 = 0xFF00_0080;
pub const CPG_BASE: u32 = 0xFFC0_0000;

const INTC_WINDOW: u32 = 0x10;
const TMU_WINDOW: u32 = 0x30;
const DMAC_WINDOW: u32 = 0x44;
const SCIF_WINDOW: u32 = 0x28;
const PMM_WINDOW: u32 = 0x18;
const CPG_WINDOW: u32 = 0x04;

pub struct Peripherals {
    pub intc: Intc,
    pub tmu: Tmu,
    pub dmac: Dmac,
    pub scif: Scif,
    pub pmm: Pmm,
    pub clock: Clock,
}

impl Peripherals {
    pub fn new() -> Self {
        Peripherals {
            intc: Intc::new(),
            tmu: Tmu::new(),
            dmac: Dmac::new(),
            scif: Scif::new(),
            pmm: Pmm::new(),
            clock: Clock::new(200_000_000),
        }
    }

    pub fn reset(&mut self) {
        self.intc.reset();
        self.tmu.reset();
        self.dmac.reset();
        self.scif.reset();
        self.pmm.reset();
        self.clock.reset();
    }

    /// Advances every ticking peripheral by `nanos` and folds the
    /// resulting INTC state back into `regs.int_pending` (spec.md §4.1's
    /// stepping loop reads that flag each instruction, and §4.9's ordering
    /// guarantee has peripheral clocks advance after dispatch, not
    /// interleaved with it).
    pub fn run_slice(&mut self, nanos: u64, regs: &mut Sh4Registers) {
        let imask = regs.imask();
        let block_bit = regs.sr & crate::registers::SR_BL != 0;
        self.tmu.run_slice(nanos, self.clock.peripheral_period_ns, &mut self.intc, imask, block_bit);
        self.scif.run_slice(nanos, &mut self.intc, imask, block_bit);
        self.pmm.run_slice(nanos);
        regs.int_pending = self.intc.int_pending;
    }

    fn imask_and_block(regs: &Sh4Registers) -> (u32, bool) {
        (regs.imask(), regs.sr & crate::registers::SR_BL != 0)
    }

    /// Address-range test shared by the interpreter's fetch/load/store
    /// paths so they can bypass the MMU for these privileged windows.
    pub fn covers(addr: u32) -> bool {
        (INTC_BASE..INTC_BASE + INTC_WINDOW).contains(&addr)
            || (TMU_BASE..TMU_BASE + TMU_WINDOW).contains(&addr)
            || (DMAC_BASE..DMAC_BASE + DMAC_WINDOW).contains(&addr)
            || (SCIF_BASE..SCIF_BASE + SCIF_WINDOW).contains(&addr)
            || (PMM_BASE..PMM_BASE + PMM_WINDOW).contains(&addr)
            || (CPG_BASE..CPG_BASE + CPG_WINDOW).contains(&addr)
    }

    pub fn read(&mut self, addr: u32, size: Size) -> OpResult {
        let value = if let Some(off) = offset_within(addr, INTC_BASE, INTC_WINDOW) {
            self.read_intc(off)
        } else if let Some(off) = offset_within(addr, TMU_BASE, TMU_WINDOW) {
            self.read_tmu(off)
        } else if let Some(off) = offset_within(addr, DMAC_BASE, DMAC_WINDOW) {
            self.read_dmac(off)
        } else if let Some(off) = offset_within(addr, SCIF_BASE, SCIF_WINDOW) {
            self.read_scif(off) as u32
        } else if let Some(off) = offset_within(addr, PMM_BASE, PMM_WINDOW) {
            self.read_pmm(off)
        } else if offset_within(addr, CPG_BASE, CPG_WINDOW).is_some() {
            self.clock.frqcr
        } else {
            0
        };
        match size {
            Size::Byte => OpResult::Byte(value as u8),
            Size::Word => OpResult::Word(value as u16),
            Size::Long => OpResult::Long(value),
        }
    }

    pub fn write(&mut self, addr: u32, value: OpResult, regs: &Sh4Registers) {
        let (imask, block_bit) = Self::imask_and_block(regs);
        let raw = value.inner();
        if let Some(off) = offset_within(addr, INTC_BASE, INTC_WINDOW) {
            self.write_intc(off, raw);
        } else if let Some(off) = offset_within(addr, TMU_BASE, TMU_WINDOW) {
            self.write_tmu(off, raw);
        } else if let Some(off) = offset_within(addr, DMAC_BASE, DMAC_WINDOW) {
            self.write_dmac(off, raw, imask, block_bit);
        } else if let Some(off) = offset_within(addr, SCIF_BASE, SCIF_WINDOW) {
            self.write_scif(off, raw as u16, imask, block_bit);
        } else if let Some(off) = offset_within(addr, PMM_BASE, PMM_WINDOW) {
            self.write_pmm(off, raw);
        } else if offset_within(addr, CPG_BASE, CPG_WINDOW).is_some() {
            self.clock.write_frqcr(raw);
        }
    }

    fn read_intc(&self, off: u32) -> u32 {
        match off {
            0x04 => self.intc.ipr(0) as u32,
            0x08 => self.intc.ipr(1) as u32,
            0x0C => self.intc.ipr(2) as u32,
            _ => 0,
        }
    }

    fn write_intc(&mut self, off: u32, value: u32) {
        match off {
            0x04 => self.intc.set_ipr(0, value as u16),
            0x08 => self.intc.set_ipr(1, value as u16),
            0x0C => self.intc.set_ipr(2, value as u16),
            _ => {}
        }
    }

    fn read_tmu(&self, off: u32) -> u32 {
        match off {
            0x08 => self.tmu.read_tcor(0),
            0x0C => self.tmu.read_tcnt(0),
            0x10 => self.tmu.read_tcr(0),
            0x14 => self.tmu.read_tcor(1),
            0x18 => self.tmu.read_tcnt(1),
            0x1C => self.tmu.read_tcr(1),
            0x20 => self.tmu.read_tcor(2),
            0x24 => self.tmu.read_tcnt(2),
            0x28 => self.tmu.read_tcr(2),
            _ => 0,
        }
    }

    fn write_tmu(&mut self, off: u32, value: u32) {
        match off {
            0x04 => {
                for i in 0..3 {
                    self.tmu.start(i, value & (1 << i) != 0);
                }
            }
            0x08 => self.tmu.write_tcor(0, value),
            0x0C => self.tmu.write_tcnt(0, value),
            0x10 => self.tmu.write_tcr(0, value),
            0x14 => self.tmu.write_tcor(1, value),
            0x18 => self.tmu.write_tcnt(1, value),
            0x1C => self.tmu.write_tcr(1, value),
            0x20 => self.tmu.write_tcor(2, value),
            0x24 => self.tmu.write_tcnt(2, value),
            0x28 => self.tmu.write_tcr(2, value),
            _ => {}
        }
    }

    fn read_dmac(&self, off: u32) -> u32 {
        if off == 0x40 {
            return self.dmac.dmaor;
        }
        let ch = (off / 0x10) as usize;
        if ch >= 4 {
            return 0;
        }
        match off % 0x10 {
            0x08 => self.dmac.read_dmatcr(ch),
            0x0C => self.dmac.read_chcr(ch),
            _ => 0,
        }
    }

    fn write_dmac(&mut self, off: u32, value: u32, imask: u32, block_bit: bool) {
        if off == 0x40 {
            self.dmac.dmaor = value;
            return;
        }
        let ch = (off / 0x10) as usize;
        if ch >= 4 {
            return;
        }
        match off % 0x10 {
            0x00 => self.dmac.write_sar(ch, value),
            0x04 => self.dmac.write_dar(ch, value),
            0x08 => self.dmac.write_dmatcr(ch, value),
            0x0C => self.dmac.write_chcr(ch, value, &mut self.intc, imask, block_bit),
            _ => {}
        }
    }

    fn read_scif(&self, off: u32) -> u16 {
        match off {
            0x00 => self.scif.scsmr2,
            0x04 => self.scif.scbrr2 as u16,
            0x08 => self.scif.scscr2,
            0x10 => self.scif.scfsr2,
            0x14 => 0,
            0x18 => self.scif.scfcr2,
            0x24 => self.scif.sclsr2,
            _ => 0,
        }
    }

    fn write_scif(&mut self, off: u32, value: u16, imask: u32, block_bit: bool) {
        match off {
            0x00 => self.scif.write_scsmr2(value),
            0x04 => self.scif.write_scbrr2(value as u8),
            0x08 => self.scif.scscr2 = value,
            0x0C => {
                self.scif.enqueue_outbound(value as u8);
            }
            0x10 => self.scif.write_scfsr2(value, &mut self.intc, imask, block_bit),
            0x18 => self.scif.scfcr2 = value,
            0x24 => self.scif.write_sclsr2(value, &mut self.intc, imask, block_bit),
            _ => {}
        }
    }

    fn read_pmm(&self, off: u32) -> u32 {
        match off {
            0x04 => self.pmm.read_pmcr(0) as u32,
            0x08 => self.pmm.read_pmcr(1) as u32,
            _ => 0,
        }
    }

    fn write_pmm(&mut self, off: u32, value: u32) {
        match off {
            0x04 => self.pmm.write_pmcr(0, value as u16),
            0x08 => self.pmm.write_pmcr(1, value as u16),
            _ => {}
        }
    }
}

fn offset_within(addr: u32, base: u32, window: u32) -> Option<u32> {
    if addr >= base && addr < base + window {
        Some(addr - base)
    } else {
        None
    }
}

impl Default for Peripherals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Sh4Registers;

    #[test]
    fn run_slice_threads_int_pending_from_tmu() {
        let mut peripherals = Peripherals::new();
        let mut regs = Sh4Registers::new();
        peripherals.intc.set_ipr(0, 0x1000);
        peripherals.tmu.write_tcor(0, 10);
        peripherals.tmu.write_tcnt(0, 0);
        peripherals.tmu.write_tcr(0, tmu::TCR_UNIE);
        peripherals.tmu.start(0, true);
        peripherals.run_slice(peripherals.clock.peripheral_period_ns * 4, &mut regs);
        assert!(regs.int_pending);
    }

    #[test]
    fn reset_clears_pending_interrupts() {
        let mut peripherals = Peripherals::new();
        peripherals.intc.set_ipr(0, 0x1000);
        peripherals.intc.raise(intc::IntSource::TmuTuni0, 0, false);
        peripherals.reset();
        assert!(!peripherals.intc.int_pending);
    }

    #[test]
    fn mmio_dispatch_routes_ipr_writes() {
        let mut peripherals = Peripherals::new();
        let regs = Sh4Registers::new();
        peripherals.write(INTC_BASE + 0x04, OpResult::Word(0x1234), &regs);
        assert_eq!(peripherals.intc.ipr(0), 0x1234);
        assert_eq!(peripherals.read(INTC_BASE + 0x04, Size::Word).inner(), 0x1234);
    }

    #[test]
    fn mmio_dispatch_routes_tmu_tcnt() {
        let mut peripherals = Peripherals::new();
        let regs = Sh4Registers::new();
        peripherals.write(TMU_BASE + 0x0C, OpResult::Long(42), &regs);
        assert_eq!(peripherals.tmu.read_tcnt(0), 42);
    }

    #[test]
    fn covers_reports_true_only_inside_register_windows() {
        assert!(Peripherals::covers(INTC_BASE));
        assert!(!Peripherals::covers(0x0000_1000));
    }
}
