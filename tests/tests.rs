// End-to-end scenarios against the public `sh4` driver API, mirroring
// spec.md §8's literal test scenarios. Unit-level coverage for each
// module's own invariants lives in that module's `#[cfg(test)]` block;
// these exercise the whole `Sh4::run_slice` dispatch path instead.

use sh4::config::Sh4Config;
use sh4::fields::OpResult;
use sh4::peripherals::tmu::TCR_UNIE;
use sh4::registers::{SR_BL, SR_IMASK};
use sh4::{BreakpointKind, Sh4};

fn boot_config() -> Sh4Config {
    Sh4Config {
        ram_size: 0x10_0000,
        ..Sh4Config::default()
    }
}

#[test]
fn scenario_1_boot_state() {
    let sh4 = Sh4::new(boot_config()).unwrap();
    let regs = &sh4.cpu().regs;
    assert_eq!(regs.pc, 0xA000_0000);
    assert_eq!(regs.sr, 0x7000_00F0);
    assert_eq!(regs.vbr, 0);
    assert_eq!(regs.fpscr, 0x0004_0001);
}

#[test]
fn scenario_2_immediate_add() {
    let mut sh4 = Sh4::new(boot_config()).unwrap();
    sh4.cpu_mut().mem.write_phys(0x0C01_0000, OpResult::Word(0x7A05)); // ADD #5,R10
    sh4.cpu_mut().regs.pc = 0x8C01_0000;
    sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
    sh4.cpu_mut().regs.r[10] = 0;

    let period = sh4.cpu().cpu_period_ns;
    sh4.run_slice(period * 2).unwrap();
    assert_eq!(sh4.cpu().regs.r[10], 5);
    assert_eq!(sh4.cpu().regs.pc, 0x8C01_0002);
}

#[test]
fn scenario_3_delayed_jsr() {
    let mut sh4 = Sh4::new(boot_config()).unwrap();
    sh4.cpu_mut().mem.write_phys(0x0C01_0000, OpResult::Word(0x400B)); // JSR @R0
    sh4.cpu_mut().mem.write_phys(0x0C01_0002, OpResult::Word(0x0009)); // NOP (delay slot)
    sh4.cpu_mut().regs.pc = 0x8C01_0000;
    sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
    sh4.cpu_mut().regs.r[0] = 0x8C02_0000;

    let period = sh4.cpu().cpu_period_ns;
    sh4.run_slice(period * 3).unwrap();
    assert_eq!(sh4.cpu().regs.pc, 0x8C02_0000);
    assert_eq!(sh4.cpu().regs.pr, 0x8C01_0004);
}

#[test]
fn scenario_4_trapa() {
    let mut sh4 = Sh4::new(boot_config()).unwrap();
    sh4.cpu_mut().mem.write_phys(0x0C01_0000, OpResult::Word(0xC312)); // TRAPA #18
    sh4.cpu_mut().regs.pc = 0x8C01_0000;
    sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
    sh4.cpu_mut().regs.vbr = 0x8C00_0000;

    let period = sh4.cpu().cpu_period_ns;
    sh4.run_slice(period * 2).unwrap();
    assert_eq!(sh4.cpu().regs.tra, 0x48);
    assert_eq!(sh4.cpu().regs.pc, 0x8C00_0100);
    assert_eq!(sh4.cpu().regs.expevt, 0x160);
}

#[test]
fn scenario_5_tmu_underflow_raises_interrupt() {
    let mut sh4 = Sh4::new(boot_config()).unwrap();
    sh4.cpu_mut().regs.vbr = 0x8C00_0000;
    // Reset boots with BL=1 and IMASK=0xF (all interrupts blocked); an
    // OS core would clear both during boot before unmasking TUNI0.
    sh4.cpu_mut().regs.sr &= !(SR_BL | SR_IMASK);
    sh4.cpu_mut().peripherals.intc.set_ipr(0, 0x1000); // TUNI0 priority 1
    sh4.cpu_mut().peripherals.tmu.write_tcor(0, 10);
    sh4.cpu_mut().peripherals.tmu.write_tcnt(0, 2);
    sh4.cpu_mut().peripherals.tmu.write_tcr(0, TCR_UNIE);
    sh4.cpu_mut().peripherals.tmu.start(0, true);

    // First slice ticks the TMU past underflow; `int_pending` only
    // becomes visible to the next slice's stepping loop (spec.md §4.9:
    // peripheral clocks advance after dispatch, not interleaved with it).
    sh4.run_slice(200).unwrap();
    assert!(sh4.cpu().regs.int_pending);

    sh4.run_slice(200).unwrap();
    assert_eq!(sh4.cpu().regs.intevt, 0x400); // TUNI0 vector code
}

#[test]
fn scenario_6_shadow_verified_translator_execution() {
    let mut sh4 = Sh4::new(boot_config()).unwrap();
    sh4.set_use_xlat(true);
    sh4.set_shadow_verify(true);
    sh4.cpu_mut().mem.write_phys(0x0C01_0000, OpResult::Word(0x7A05)); // ADD #5,R10
    sh4.cpu_mut().mem.write_phys(0x0C01_0002, OpResult::Word(0x000B)); // RTS
    sh4.cpu_mut().mem.write_phys(0x0C01_0004, OpResult::Word(0x0009)); // NOP
    sh4.cpu_mut().regs.pc = 0x8C01_0000;
    sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
    sh4.cpu_mut().regs.pr = 0x8C02_0000;
    sh4.cpu_mut().regs.r[10] = 0;

    let consumed = sh4.run_slice(1).unwrap();
    assert!(consumed > 0);
    assert_eq!(sh4.cpu().regs.r[10], 5);
    assert_eq!(sh4.cpu().regs.pc, 0x8C02_0000);
}

#[test]
fn one_shot_breakpoint_halts_the_driver_at_the_armed_address() {
    let mut sh4 = Sh4::new(boot_config()).unwrap();
    sh4.cpu_mut().mem.write_phys(0x0C01_0000, OpResult::Word(0x0009));
    sh4.cpu_mut().mem.write_phys(0x0C01_0002, OpResult::Word(0x0009));
    sh4.cpu_mut().regs.pc = 0x8C01_0000;
    sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
    sh4.set_breakpoint(0x8C01_0002, BreakpointKind::OneShot);

    let period = sh4.cpu().cpu_period_ns;
    sh4.run_slice(period * 20).unwrap();
    assert_eq!(sh4.cpu().regs.pc, 0x8C01_0002);
    assert!(sh4.get_breakpoint(0x8C01_0002).is_none());
}
