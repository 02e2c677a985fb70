// Interrupt controller: priority-ordered pending queue, IPRA/IPRB/IPRC
// nibble-to-priority routing. Grounded on `examples/original_source/src/sh4/intc.c`
// (the `intc_sources` table, its per-source default priority and vector
// code, and the IPRA/IPRB/IPRC field layout in `mmio_region_INTC_write`)
// and on the teacher's device-interrupt bridge in `devices.rs`, generalised
// from a flat device list to the priority-queue scheme spec.md §4.4
// describes verbatim: `pending` stays sorted ascending by (priority,
// source_id), and `int_pending` is recomputed on every raise/clear/
// mask-change rather than derived lazily.

/// One entry per interrupt source `examples/original_source/src/sh4/intc.c`'s
/// `intc_sources` table names (SPEC_FULL.md §C: "the concrete 41-source
/// table ... is carried over verbatim"). `IRQ0`-`IRQ14` and `NMI` are the
/// external pins; everything else is an on-chip source gated through
/// IPRA/IPRB/IPRC. SCIF carries four distinct sources (`ScifEri`/`ScifRxi`/
/// `ScifBri`/`ScifTxi`) rather than one folded vector, since `scif.rs`'s own
/// FIFO-trigger behaviour needs the RX/TX distinction to be meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum IntSource {
    Irq0,
    Irq1,
    Irq2,
    Irq3,
    Irq4,
    Irq5,
    Irq6,
    Irq7,
    Irq8,
    Irq9,
    Irq10,
    Irq11,
    Irq12,
    Irq13,
    Irq14,
    Nmi,
    HUdi,
    Gpio,
    DmacDmte0,
    DmacDmte1,
    DmacDmte2,
    DmacDmte3,
    DmacDmae,
    TmuTuni0,
    TmuTuni1,
    TmuTuni2,
    TmuTicpi2,
    RtcAti,
    RtcPri,
    RtcCui,
    SciEri,
    SciRxi,
    SciTxi,
    SciTei,
    ScifEri,
    ScifRxi,
    ScifBri,
    ScifTxi,
    WdtIti,
    RefRcmi,
    RefRovi,
}

const SOURCE_COUNT: usize = 41;
const ALL_SOURCES: [IntSource; SOURCE_COUNT] = [
    IntSource::Irq0,
    IntSource::Irq1,
    IntSource::Irq2,
    IntSource::Irq3,
    IntSource::Irq4,
    IntSource::Irq5,
    IntSource::Irq6,
    IntSource::Irq7,
    IntSource::Irq8,
    IntSource::Irq9,
    IntSource::Irq10,
    IntSource::Irq11,
    IntSource::Irq12,
    IntSource::Irq13,
    IntSource::Irq14,
    IntSource::Nmi,
    IntSource::HUdi,
    IntSource::Gpio,
    IntSource::DmacDmte0,
    IntSource::DmacDmte1,
    IntSource::DmacDmte2,
    IntSource::DmacDmte3,
    IntSource::DmacDmae,
    IntSource::TmuTuni0,
    IntSource::TmuTuni1,
    IntSource::TmuTuni2,
    IntSource::TmuTicpi2,
    IntSource::RtcAti,
    IntSource::RtcPri,
    IntSource::RtcCui,
    IntSource::SciEri,
    IntSource::SciRxi,
    IntSource::SciTxi,
    IntSource::SciTei,
    IntSource::ScifEri,
    IntSource::ScifRxi,
    IntSource::ScifBri,
    IntSource::ScifTxi,
    IntSource::WdtIti,
    IntSource::RefRcmi,
    IntSource::RefRovi,
];

/// Where a source's priority comes from: the 15 external IRQ pins plus NMI
/// carry a fixed hardware priority that IPRA/IPRB/IPRC writes never touch
/// (`intc.c`'s `intc_sources` table initialises them directly, separately
/// from the `PRIORITY(which)` macro IPR writes go through); every on-chip
/// source is routed through a nibble of one of the three IPR registers.
enum PrioritySource {
    Fixed(u32),
    Ipr(usize, u32),
}

/// (vector code, priority source), taken from `intc.c`'s `intc_sources`
/// table and `mmio_region_INTC_write`'s field routing.
fn source_info(src: IntSource) -> (u32, PrioritySource) {
    use PrioritySource::{Fixed, Ipr};
    match src {
        IntSource::Irq0 => (0x200, Fixed(15)),
        IntSource::Irq1 => (0x220, Fixed(14)),
        IntSource::Irq2 => (0x240, Fixed(13)),
        IntSource::Irq3 => (0x260, Fixed(12)),
        IntSource::Irq4 => (0x280, Fixed(11)),
        IntSource::Irq5 => (0x2A0, Fixed(10)),
        IntSource::Irq6 => (0x2C0, Fixed(9)),
        IntSource::Irq7 => (0x2E0, Fixed(8)),
        IntSource::Irq8 => (0x300, Fixed(7)),
        IntSource::Irq9 => (0x320, Fixed(6)),
        IntSource::Irq10 => (0x340, Fixed(5)),
        IntSource::Irq11 => (0x360, Fixed(4)),
        IntSource::Irq12 => (0x380, Fixed(3)),
        IntSource::Irq13 => (0x3A0, Fixed(2)),
        IntSource::Irq14 => (0x3C0, Fixed(1)),
        IntSource::Nmi => (0x1C0, Fixed(16)),
        IntSource::HUdi => (0x600, Ipr(2, 0)),
        IntSource::Gpio => (0x620, Ipr(2, 12)),
        IntSource::DmacDmte0 => (0x640, Ipr(2, 8)),
        IntSource::DmacDmte1 => (0x660, Ipr(2, 8)),
        IntSource::DmacDmte2 => (0x680, Ipr(2, 8)),
        IntSource::DmacDmte3 => (0x6A0, Ipr(2, 8)),
        IntSource::DmacDmae => (0x6C0, Ipr(2, 8)),
        IntSource::TmuTuni0 => (0x400, Ipr(0, 12)),
        IntSource::TmuTuni1 => (0x420, Ipr(0, 8)),
        IntSource::TmuTuni2 => (0x440, Ipr(0, 4)),
        IntSource::TmuTicpi2 => (0x460, Ipr(0, 4)),
        IntSource::RtcAti => (0x480, Ipr(0, 0)),
        IntSource::RtcPri => (0x4A0, Ipr(0, 0)),
        IntSource::RtcCui => (0x4C0, Ipr(0, 0)),
        IntSource::SciEri => (0x4E0, Ipr(1, 4)),
        IntSource::SciRxi => (0x500, Ipr(1, 4)),
        IntSource::SciTxi => (0x520, Ipr(1, 4)),
        IntSource::SciTei => (0x540, Ipr(1, 4)),
        IntSource::ScifEri => (0x700, Ipr(2, 4)),
        IntSource::ScifRxi => (0x720, Ipr(2, 4)),
        IntSource::ScifBri => (0x740, Ipr(2, 4)),
        IntSource::ScifTxi => (0x760, Ipr(2, 4)),
        IntSource::WdtIti => (0x560, Ipr(1, 12)),
        IntSource::RefRcmi => (0x580, Ipr(1, 8)),
        IntSource::RefRovi => (0x5A0, Ipr(1, 8)),
    }
}

fn index_of(src: IntSource) -> usize {
    ALL_SOURCES.iter().position(|s| *s == src).unwrap()
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
struct PendingEntry {
    priority: u32,
    source_id: usize,
}

/// Priority-sorted pending queue plus the IPRA/IPRB/IPRC registers
/// (spec.md §4.4). `pending` is kept sorted ascending by (priority,
/// source_id) at all times, tail = highest priority — the literal
/// ordering the testable property in spec.md §8 asks for.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Intc {
    pending: Vec<PendingEntry>,
    ipr: [u16; 3],
    /// Mirrors `sh4r.int_pending`: true iff the tail's priority exceeds
    /// SR.IMASK and SR.BL=0, recomputed by `mask_changed`.
    pub int_pending: bool,
}

impl Intc {
    pub fn new() -> Self {
        Intc {
            pending: Vec::new(),
            ipr: [0; 3],
            int_pending: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Intc::new();
    }

    pub fn set_ipr(&mut self, reg: usize, value: u16) {
        self.ipr[reg] = value;
    }

    pub fn ipr(&self, reg: usize) -> u16 {
        self.ipr[reg]
    }

    fn priority(&self, src: IntSource) -> u32 {
        match source_info(src).1 {
            PrioritySource::Fixed(p) => p,
            PrioritySource::Ipr(reg, shift) => ((self.ipr[reg] as u32) >> shift) & 0xF,
        }
    }

    fn insert_sorted(&mut self, entry: PendingEntry) {
        let pos = self
            .pending
            .partition_point(|e| (e.priority, e.source_id) < (entry.priority, entry.source_id));
        self.pending.insert(pos, entry);
    }

    /// `raise(which)` (spec.md §4.4): rejects a masked (priority 0) or
    /// already-queued source; otherwise inserts preserving order.
    pub fn raise(&mut self, src: IntSource, imask: u32, block_bit: bool) {
        let pri = self.priority(src);
        if pri == 0 {
            return;
        }
        let source_id = index_of(src);
        if self.pending.iter().any(|e| e.source_id == source_id) {
            return;
        }
        self.insert_sorted(PendingEntry {
            priority: pri,
            source_id,
        });
        self.recompute_pending(imask, block_bit);
    }

    /// `clear(which)` (spec.md §4.4): linear-scan remove; re-evaluates
    /// `int_pending` if the cleared entry was the tail.
    pub fn clear(&mut self, src: IntSource, imask: u32, block_bit: bool) {
        let source_id = index_of(src);
        self.pending.retain(|e| e.source_id != source_id);
        self.recompute_pending(imask, block_bit);
    }

    /// `mask_changed()` (spec.md §4.4): called whenever SR/IMASK/BL change.
    pub fn recompute_pending(&mut self, imask: u32, block_bit: bool) {
        self.int_pending = !block_bit
            && self
                .pending
                .last()
                .map_or(false, |e| e.priority > imask);
    }

    /// `accept()`: returns the tail entry's vector code without popping it
    /// — the caller pops via `clear` after successful vectoring.
    pub fn accept(&self) -> Option<u32> {
        self.pending
            .last()
            .map(|e| source_info(ALL_SOURCES[e.source_id]).0)
    }

    pub fn accepted_source(&self) -> Option<IntSource> {
        self.pending.last().map(|e| ALL_SOURCES[e.source_id])
    }

    /// Invariant checked by the §8 INTC-ordering property: `pending` is
    /// sorted ascending by (priority, source_id).
    #[cfg(test)]
    fn is_sorted(&self) -> bool {
        self.pending
            .windows(2)
            .all(|w| (w[0].priority, w[0].source_id) <= (w[1].priority, w[1].source_id))
    }
}

impl Default for Intc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_source_accepted_first() {
        let mut intc = Intc::new();
        intc.set_ipr(0, 0x1200); // TUNI0 priority 1, TUNI1 priority 2
        intc.raise(IntSource::TmuTuni0, 0, false);
        intc.raise(IntSource::TmuTuni1, 0, false);
        let code = intc.accept().unwrap();
        assert_eq!(code, 0x420); // TUNI1 wins (priority 2 > 1)
        assert!(intc.is_sorted());
    }

    #[test]
    fn zero_priority_source_never_accepted() {
        let mut intc = Intc::new();
        intc.raise(IntSource::ScifRxi, 0, false);
        assert!(intc.accept().is_none());
    }

    #[test]
    fn fixed_priority_irq_pin_ignores_ipr() {
        // IRQ0 carries a fixed priority (15) per intc.c's intc_sources
        // table; no IPR register ever gates it, unlike an on-chip source
        // such as TUNI0 (priority 0/masked until IPRA is programmed).
        let mut intc = Intc::new();
        intc.raise(IntSource::TmuTuni0, 0, false);
        assert!(intc.accept().is_none());
        intc.raise(IntSource::Irq0, 0, false);
        assert_eq!(intc.accept().unwrap(), 0x200);
    }

    #[test]
    fn scif_sub_vectors_are_distinct_sources() {
        let mut intc = Intc::new();
        intc.set_ipr(2, 0x00F0); // SCIF group priority 15
        intc.raise(IntSource::ScifRxi, 0, false);
        assert_eq!(intc.accept().unwrap(), 0x720);
        intc.clear(IntSource::ScifRxi, 0, false);
        intc.raise(IntSource::ScifTxi, 0, false);
        assert_eq!(intc.accept().unwrap(), 0x760);
    }

    #[test]
    fn clear_drops_pending_entry_and_updates_int_pending() {
        let mut intc = Intc::new();
        intc.set_ipr(0, 0x1000);
        intc.raise(IntSource::TmuTuni0, 0, false);
        assert!(intc.int_pending);
        intc.clear(IntSource::TmuTuni0, 0, false);
        assert!(intc.accept().is_none());
        assert!(!intc.int_pending);
    }

    #[test]
    fn int_pending_false_when_priority_below_imask() {
        let mut intc = Intc::new();
        intc.set_ipr(0, 0x1000); // TUNI0 priority 1
        intc.raise(IntSource::TmuTuni0, 2, false);
        assert!(!intc.int_pending);
    }

    #[test]
    fn int_pending_false_when_block_bit_set() {
        let mut intc = Intc::new();
        intc.set_ipr(0, 0x1000);
        intc.raise(IntSource::TmuTuni0, 0, true);
        assert!(!intc.int_pending);
    }

    #[test]
    fn duplicate_raise_does_not_double_queue() {
        let mut intc = Intc::new();
        intc.set_ipr(0, 0x1000);
        intc.raise(IntSource::TmuTuni0, 0, false);
        intc.raise(IntSource::TmuTuni0, 0, false);
        assert_eq!(intc.pending.len(), 1);
    }
}
