// Top-level driver, generalising the teacher's `Emulator`/`Configuration`
// pair (`lib.rs`) from a single fixed m68k `CPU` + `Debugger` into the
// dual interpreter/translator dispatch spec.md §2 and §6 describe: one
// `Sh4` owns a `Cpu`, a `TranslationCache`, the breakpoint set, and the
// `use_translator`/shadow-verify toggles, and exposes the module API
// (`init`/`reset`/`stop`/`run_slice`/`save_state`/`load_state`/
// `set_breakpoint`/`set_use_xlat`) as the crate's single public surface.

pub mod cache;
pub mod config;
pub mod error;
pub mod exception;
pub mod fields;
pub mod instructions;
pub mod interpreter;
pub mod memory;
pub mod mmu;
mod parser;
pub mod peripherals;
pub mod registers;
pub mod shadow;
pub mod state;
pub mod translator;

use config::Sh4Config;
use error::Sh4Error;
use interpreter::Cpu;
use log::info;
use translator::TranslationCache;

/// A debugger breakpoint's lifetime (spec.md §5): `OneShot` removes itself
/// the moment it's hit (a "run to address" request), `Permanent` stays
/// armed across hits. Generalises the teacher's interactive `Debugger`
/// breakpoint set (`processor.rs`) into a first-class driver API rather
/// than a TUI-only feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    OneShot,
    Permanent,
}

#[derive(Debug, Clone, Copy)]
struct Breakpoint {
    pc: u32,
    kind: BreakpointKind,
}

/// The crate's single public entry point. Owns the architectural CPU, the
/// translation cache, and the driver-level concerns (breakpoints, engine
/// selection, shadow verification) that spec.md §6 describes as sitting
/// above the core itself.
pub struct Sh4 {
    cpu: Cpu,
    translator: TranslationCache,
    use_translator: bool,
    shadow_verify: bool,
    breakpoints: Vec<Breakpoint>,
    stopped: bool,
}

impl Sh4 {
    /// Builds a core from `config`, loading the configured ROM image (if
    /// any) and applying `boot_vbr`/`input_clock_hz` before the first
    /// `run_slice`.
    pub fn new(config: Sh4Config) -> Result<Self, Sh4Error> {
        let cpu_period_ns = 1_000_000_000 / config.cpu_clock_hz.max(1);
        let mut cpu = Cpu::new(config.ram_size, cpu_period_ns);
        cpu.peripherals.clock = peripherals::clock::Clock::new(config.input_clock_hz);
        cpu.reset();
        cpu.regs.vbr = config.boot_vbr;

        if let Some(rom) = &config.rom_image {
            let bytes = std::fs::read(&rom.path)
                .map_err(|e| Sh4Error::BadSaveState(format!("failed to read rom {:?}: {e}", rom.path)))?;
            cpu.mem.load_rom(&bytes, rom.base, rom.expected_crc)?;
        }

        Ok(Sh4 {
            cpu,
            translator: TranslationCache::new(),
            use_translator: config.use_translator,
            shadow_verify: false,
            breakpoints: Vec::new(),
            stopped: false,
        })
    }

    /// Re-arms the core after construction or a prior `reset` (spec.md §6
    /// `init()`): currently just logs the boot PC, since `new` already
    /// performs the reset proper.
    pub fn init(&mut self) {
        info!("sh4 core initialised, pc={:08x}", self.cpu.regs.pc);
    }

    /// Returns every architectural register, MMU/cache/peripheral state to
    /// its post-reset value and clears the translation cache (spec.md §6
    /// `reset()`). Breakpoints and the translator/shadow toggles survive a
    /// reset — they're driver configuration, not core state.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.translator.reset();
        self.stopped = false;
    }

    /// Marks the core stopped; subsequent `run_slice` calls return
    /// `Sh4Error::CoreStopped` until the next `reset` (spec.md §6 `stop()`).
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Toggles between the interpreter-only loop and the translator loop
    /// (spec.md §6 `set_use_xlat`). Has no effect while any breakpoint is
    /// armed — see `run_slice`'s doc comment for why.
    pub fn set_use_xlat(&mut self, use_xlat: bool) {
        self.use_translator = use_xlat;
    }

    /// Enables or disables the lockstep shadow harness (spec.md §4.8):
    /// when on, every translated block this slice runs is also replayed
    /// through the interpreter and diffed before its result is trusted.
    pub fn set_shadow_verify(&mut self, verify: bool) {
        self.shadow_verify = verify;
    }

    pub fn set_breakpoint(&mut self, pc: u32, kind: BreakpointKind) {
        if let Some(bp) = self.breakpoints.iter_mut().find(|b| b.pc == pc) {
            bp.kind = kind;
        } else {
            self.breakpoints.push(Breakpoint { pc, kind });
        }
    }

    pub fn clear_breakpoint(&mut self, pc: u32) {
        self.breakpoints.retain(|b| b.pc != pc);
    }

    pub fn get_breakpoint(&self, pc: u32) -> Option<BreakpointKind> {
        self.breakpoints.iter().find(|b| b.pc == pc).map(|b| b.kind)
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Runs for up to `nanos` nanoseconds of simulated time (spec.md §6
    /// `run_slice(nanos) -> u64`, §4.1/§4.2's stepping loops). Dispatches
    /// to the translator loop when `use_translator` is set and no
    /// breakpoint is armed; falls back to the interpreter's per-instruction
    /// loop otherwise, since a breakpoint's "stop between instructions"
    /// contract has no answer for a whole basic block replayed in one shot.
    /// Returns the nanoseconds actually consumed (may be less than `nanos`
    /// if the core suspended or a breakpoint fired).
    pub fn run_slice(&mut self, nanos: u64) -> Result<u64, Sh4Error> {
        if self.stopped {
            return Err(Sh4Error::CoreStopped);
        }
        self.cpu.regs.slice_cycle = 0;
        let xlat_eligible = self.use_translator && self.breakpoints.is_empty();

        while self.cpu.regs.slice_cycle < nanos {
            if !self.cpu.ready_to_run() {
                break;
            }
            if xlat_eligible {
                let retired = self.run_one_block()?;
                if retired == 0 {
                    break;
                }
                self.cpu.regs.slice_cycle = self
                    .cpu
                    .regs
                    .slice_cycle
                    .saturating_add(retired.saturating_mul(self.cpu.cpu_period_ns));
            } else {
                if self.cpu.step_one() == interpreter::StepOutcome::Suspended {
                    break;
                }
                if self.breakpoint_hit() {
                    break;
                }
            }
        }

        let consumed = self.cpu.regs.slice_cycle.min(nanos);
        self.cpu.peripherals.run_slice(consumed, &mut self.cpu.regs);
        Ok(consumed)
    }

    fn run_one_block(&mut self) -> Result<u64, Sh4Error> {
        if self.shadow_verify {
            match shadow::run_lockstep(&mut self.cpu, &mut self.translator) {
                shadow::ShadowVerdict::Equivalent { instructions_retired } => Ok(instructions_retired),
                verdict @ shadow::ShadowVerdict::Diverged { .. } => {
                    self.stopped = true;
                    Err(Sh4Error::ShadowDivergence(format!("{:?}", verdict)))
                }
            }
        } else {
            Ok(self.translator.run_block(&mut self.cpu))
        }
    }

    /// Checks the current pc against the armed breakpoint set, clearing a
    /// matched `OneShot` entry (spec.md §5: breakpoints are checked between
    /// instructions only, never mid-delay-slot).
    fn breakpoint_hit(&mut self) -> bool {
        let pc = self.cpu.regs.pc;
        if let Some(idx) = self.breakpoints.iter().position(|b| b.pc == pc) {
            if self.breakpoints[idx].kind == BreakpointKind::OneShot {
                self.breakpoints.remove(idx);
            }
            true
        } else {
            false
        }
    }

    pub fn save_state(&self, sink: &mut Vec<u8>) -> Result<(), Sh4Error> {
        state::save_state(&self.cpu, sink)
    }

    pub fn load_state(&mut self, source: &[u8]) -> Result<(), Sh4Error> {
        state::load_state(&mut self.cpu, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Sh4Config {
        Sh4Config {
            ram_size: 0x10_0000,
            ..Sh4Config::default()
        }
    }

    #[test]
    fn new_core_boots_at_reset_pc() {
        let sh4 = Sh4::new(test_config()).unwrap();
        assert_eq!(sh4.cpu().regs.pc, registers::RESET_PC);
    }

    #[test]
    fn run_slice_after_stop_is_an_error() {
        let mut sh4 = Sh4::new(test_config()).unwrap();
        sh4.stop();
        assert!(matches!(sh4.run_slice(1000), Err(Sh4Error::CoreStopped)));
    }

    #[test]
    fn interpreter_slice_executes_immediate_add() {
        let mut sh4 = Sh4::new(test_config()).unwrap();
        sh4.cpu_mut().mem.write_phys(0x0C01_0000, fields::OpResult::Word(0x7A05));
        sh4.cpu_mut().regs.pc = 0x8C01_0000;
        sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
        sh4.cpu_mut().regs.r[10] = 0;
        let period = sh4.cpu().cpu_period_ns;
        sh4.run_slice(period * 2).unwrap();
        assert_eq!(sh4.cpu().regs.r[10], 5);
    }

    #[test]
    fn one_shot_breakpoint_stops_the_slice_and_then_clears() {
        let mut sh4 = Sh4::new(test_config()).unwrap();
        sh4.cpu_mut().mem.write_phys(0x0C01_0000, fields::OpResult::Word(0x0009)); // NOP
        sh4.cpu_mut().mem.write_phys(0x0C01_0002, fields::OpResult::Word(0x0009)); // NOP
        sh4.cpu_mut().regs.pc = 0x8C01_0000;
        sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
        sh4.set_breakpoint(0x8C01_0002, BreakpointKind::OneShot);

        let period = sh4.cpu().cpu_period_ns;
        sh4.run_slice(period * 10).unwrap();
        assert_eq!(sh4.cpu().regs.pc, 0x8C01_0002);
        assert!(sh4.get_breakpoint(0x8C01_0002).is_none());
    }

    #[test]
    fn translator_path_disabled_while_a_breakpoint_is_armed() {
        let mut sh4 = Sh4::new(test_config()).unwrap();
        sh4.set_use_xlat(true);
        sh4.set_breakpoint(0x8C01_0002, BreakpointKind::Permanent);
        sh4.cpu_mut().mem.write_phys(0x0C01_0000, fields::OpResult::Word(0x0009));
        sh4.cpu_mut().regs.pc = 0x8C01_0000;
        sh4.cpu_mut().regs.new_pc = 0x8C01_0002;
        // Runs via the interpreter path (breakpoints disable xlat
        // eligibility) and must still stop exactly at the breakpoint.
        let period = sh4.cpu().cpu_period_ns;
        sh4.run_slice(period * 4).unwrap();
        assert_eq!(sh4.cpu().regs.pc, 0x8C01_0002);
    }

    #[test]
    fn save_and_load_state_round_trip_through_the_driver() {
        let mut sh4 = Sh4::new(test_config()).unwrap();
        sh4.cpu_mut().regs.r[4] = 0xCAFE_0000;
        let mut blob = Vec::new();
        sh4.save_state(&mut blob).unwrap();

        let mut other = Sh4::new(test_config()).unwrap();
        other.load_state(&blob).unwrap();
        assert_eq!(other.cpu().regs.r[4], 0xCAFE_0000);
    }
}
