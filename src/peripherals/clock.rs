// L0 clock tracker: cpu/bus/peripheral frequencies and periods, plus the
// FRQCR-driven divider tables. Grounded on `examples/original_source/src/sh4/timer.c`
// (`sh4_cpu_period`/`sh4_bus_period`/`sh4_peripheral_period`, `ifc_divider`/
// `pfc_divider`-style recomputation on FRQCR writes). spec.md's Clock
// component (§2 L0) is named but left unspecified beyond "tracks cpu/bus/
// peripheral frequencies and periods"; the divider tables are a supplement
// from `original_source/` per SPEC_FULL.md §C.

/// Divider values indexed by the 3-bit IFC/BFC/PFC fields of FRQCR.
const DIVIDER_TABLE: [u32; 8] = [1, 2, 3, 4, 5, 6, 8, 1];

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Clock {
    pub input_freq_hz: u64,
    pub cpu_period_ns: u64,
    pub bus_period_ns: u64,
    pub peripheral_period_ns: u64,
    pub frqcr: u32,
}

impl Clock {
    pub fn new(input_freq_hz: u64) -> Self {
        let mut clock = Clock {
            input_freq_hz,
            cpu_period_ns: 0,
            bus_period_ns: 0,
            peripheral_period_ns: 0,
            frqcr: 0,
        };
        clock.recompute();
        clock
    }

    pub fn reset(&mut self) {
        let freq = self.input_freq_hz;
        *self = Clock::new(freq);
    }

    fn divider(&self, field_shift: u32) -> u32 {
        DIVIDER_TABLE[((self.frqcr >> field_shift) & 0x7) as usize]
    }

    /// Recomputes the three periods from FRQCR's IFC (bits 0-2), BFC (bits
    /// 3-5) and PFC (bits 6-8) divider fields. A write to FRQCR cascades
    /// into `SCIF::update_line_speed` via the peripheral owner (mod.rs).
    pub fn recompute(&mut self) {
        let ifc = self.divider(0) as u64;
        let bfc = self.divider(3) as u64;
        let pfc = self.divider(6) as u64;
        self.cpu_period_ns = 1_000_000_000 * ifc / self.input_freq_hz;
        self.bus_period_ns = 1_000_000_000 * bfc / self.input_freq_hz;
        self.peripheral_period_ns = 1_000_000_000 * pfc / self.input_freq_hz;
    }

    pub fn write_frqcr(&mut self, value: u32) {
        self.frqcr = value & 0x3FFF;
        self.recompute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_periods_are_nonzero_at_200mhz() {
        let clock = Clock::new(200_000_000);
        assert!(clock.cpu_period_ns >= 1);
    }

    #[test]
    fn frqcr_write_rescales_periods() {
        let mut clock = Clock::new(200_000_000);
        let base = clock.cpu_period_ns;
        clock.write_frqcr(0x3); // IFC divider 4
        assert!(clock.cpu_period_ns >= base);
    }
}
