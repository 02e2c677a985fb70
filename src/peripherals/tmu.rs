// Timer unit: three down-counters (TCNT0-2) with reload (TCOR0-2) and
// control (TCR0-2), ticked by the peripheral clock. Grounded on
// `examples/original_source/src/sh4/timer.c` (`TMU_set_timer_control`'s
// period table, `TMU_run_slice`'s carry/underflow accounting).

use super::intc::{IntSource, Intc};

pub const TCR_UNF: u32 = 0x0100;
pub const TCR_UNIE: u32 = 0x0020;
pub const TCR_PRESCALER_MASK: u32 = 0x0007;

const TMU_COUNT: usize = 3;

#[derive(Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
struct Timer {
    tcnt: u32,
    tcor: u32,
    tcr: u32,
    enabled: bool,
    /// Leftover nanoseconds from the previous `run_slice` tick, per
    /// spec.md §4.5's `carry` accumulator.
    carry: u64,
}

impl Timer {
    /// `period = peripheral_period << (2*prescaler)` for prescaler in
    /// 0..=4, `rtc_output_period` for 6, `peripheral_period` for 7
    /// (spec.md §4.5; prescaler value 5 is reserved/illegal on hardware,
    /// treated the same as the original: falls through to a large shift).
    fn period_ns(&self, peripheral_period_ns: u64, rtc_output_period_ns: u64) -> u64 {
        match self.tcr & TCR_PRESCALER_MASK {
            0 => peripheral_period_ns << 2,
            1 => peripheral_period_ns << 4,
            2 => peripheral_period_ns << 6,
            3 => peripheral_period_ns << 8,
            4 => peripheral_period_ns << 10,
            6 => rtc_output_period_ns,
            7 => peripheral_period_ns,
            _ => peripheral_period_ns << 12,
        }
    }
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Tmu {
    timers: [Timer; TMU_COUNT],
    pub rtc_output_period_ns: u64,
}

const UNI_SOURCES: [IntSource; 3] = [IntSource::TmuTuni0, IntSource::TmuTuni1, IntSource::TmuTuni2];

impl Tmu {
    pub fn new() -> Self {
        Tmu {
            timers: [Timer::default(); TMU_COUNT],
            rtc_output_period_ns: 1000,
        }
    }

    pub fn reset(&mut self) {
        let rtc = self.rtc_output_period_ns;
        *self = Tmu::new();
        self.rtc_output_period_ns = rtc;
    }

    pub fn start(&mut self, index: usize, running: bool) {
        self.timers[index].enabled = running;
    }

    pub fn write_tcor(&mut self, index: usize, value: u32) {
        self.timers[index].tcor = value;
    }

    pub fn write_tcnt(&mut self, index: usize, value: u32) {
        self.timers[index].tcnt = value;
    }

    pub fn read_tcor(&self, index: usize) -> u32 {
        self.timers[index].tcor
    }

    pub fn read_tcnt(&self, index: usize) -> u32 {
        self.timers[index].tcnt
    }

    pub fn write_tcr(&mut self, index: usize, value: u32) {
        // Hardware only allows software to clear UNF, never set it.
        let old_unf = self.timers[index].tcr & TCR_UNF;
        self.timers[index].tcr = (value & !TCR_UNF) | (old_unf & value & TCR_UNF);
    }

    pub fn read_tcr(&self, index: usize) -> u32 {
        self.timers[index].tcr
    }

    /// `run_slice(nanos)` (spec.md §4.5): advances every enabled timer by
    /// `nanos`, raising `INT_TMU_TUNI<i>` through `intc` on underflow.
    pub fn run_slice(&mut self, nanos: u64, peripheral_period_ns: u64, intc: &mut Intc, imask: u32, block_bit: bool) {
        for i in 0..TMU_COUNT {
            if !self.timers[i].enabled {
                continue;
            }
            let period = self.timers[i]
                .period_ns(peripheral_period_ns, self.rtc_output_period_ns)
                .max(1);
            let delta = nanos + self.timers[i].carry;
            let ticks = delta / period;
            self.timers[i].carry = delta % period;
            if ticks == 0 {
                continue;
            }
            if ticks > self.timers[i].tcnt as u64 {
                self.timers[i].tcr |= TCR_UNF;
                let reset = self.timers[i].tcor;
                let remaining = ticks - self.timers[i].tcnt as u64;
                self.timers[i].tcnt = if reset == 0 {
                    0
                } else {
                    reset - (remaining % reset as u64) as u32
                };
                if self.timers[i].tcr & TCR_UNIE != 0 {
                    intc.raise(UNI_SOURCES[i], imask, block_bit);
                }
            } else {
                self.timers[i].tcnt -= ticks as u32;
            }
        }
    }
}

impl Default for Tmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underflow_reloads_and_raises_interrupt() {
        // spec.md §8 scenario 5: TCOR0=10, TCNT0=2, prescaler=0, UNIE=1.
        let mut tmu = Tmu::new();
        tmu.write_tcor(0, 10);
        tmu.write_tcnt(0, 2);
        tmu.write_tcr(0, TCR_UNIE);
        tmu.start(0, true);
        let mut intc = Intc::new();
        intc.set_ipr(0, 0x1000); // TUNI0 priority nonzero so raise() isn't masked
        let peripheral_period_ns = 5;
        let nanos = 3 * peripheral_period_ns * 4; // 3 prescaler-0 ticks
        tmu.run_slice(nanos, peripheral_period_ns, &mut intc, 0, false);
        assert_eq!(tmu.read_tcr(0) & TCR_UNF, TCR_UNF);
        assert!(intc.int_pending);
        assert_eq!(tmu.read_tcnt(0), 9); // reloaded to 10, minus 1 remaining tick
    }

    #[test]
    fn disabled_timer_does_not_tick() {
        let mut tmu = Tmu::new();
        tmu.write_tcnt(0, 5);
        tmu.run_slice(1_000_000, 5, &mut Intc::new(), 0, false);
        assert_eq!(tmu.read_tcnt(0), 5);
    }
}
