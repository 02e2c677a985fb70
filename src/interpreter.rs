// The single-step SH4 executor (`execute_instruction()` in spec.md §4.1).
// Plays the role of the teacher's `CPU::clock_cycle()` (`processor.rs`):
// decode the next opcode, dispatch, and fold in delay-slot/exception
// housekeeping — but modelled as the explicit two-step state machine
// spec.md §9 calls for (`DelaySlotState::{Normal, InDelaySlot}`) instead of
// the original's "execute the next instruction inside the branch" trick,
// and returning `Result<StepOutcome, Exception>` instead of panicking.

use crate::cache::CacheModel;
use crate::exception::{Exception, ExceptionClass};
use crate::fields::{sign_extend16, OpResult, Size};
use crate::instructions::Instruction;
use crate::memory::AddressSpace;
use crate::mmu::{AccessMode, Mmu};
use crate::parser::decode;
use crate::peripherals::Peripherals;
use crate::registers::{DelaySlotState, Sh4Registers, SH4_STATE_RUNNING, SH4_STATE_SLEEP, SH4_STATE_STANDBY, SR_BL, SR_MD, SR_RB};
use log::{trace, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Suspended,
}

pub struct Cpu {
    pub regs: Sh4Registers,
    pub mem: AddressSpace,
    pub mmu: Mmu,
    pub cache: CacheModel,
    pub peripherals: Peripherals,
    pub cpu_period_ns: u64,
}

impl Cpu {
    pub fn new(ram_size: u32, cpu_period_ns: u64) -> Self {
        Cpu {
            regs: Sh4Registers::new(),
            mem: AddressSpace::new(ram_size),
            mmu: Mmu::new(),
            cache: CacheModel::new(),
            peripherals: Peripherals::new(),
            cpu_period_ns,
        }
    }

    pub fn reset(&mut self) {
        self.regs.reset();
        self.mmu.reset();
        self.cache.reset();
        self.peripherals.reset();
    }

    fn user_mode(&self) -> bool {
        self.regs.sr & SR_MD == 0
    }

    /// Reads a 16-bit opcode at the current (virtual) PC. spec.md §4.1
    /// describes an instruction-cache fastpath here; this core always goes
    /// through the full translate+read path, which is correct but slower
    /// (the non-goal on cycle-exact timing licenses this).
    pub(crate) fn fetch(&mut self, vma: u32) -> Result<u16, Exception> {
        AddressSpace::check_alignment(vma, Size::Word, false)?;
        let phys = self.mmu.translate(vma, AccessMode::Read, self.user_mode())?;
        Ok(self.mem.read_phys(phys, Size::Word).inner() as u16)
    }

    pub fn read_mem(&mut self, vma: u32, size: Size) -> Result<OpResult, Exception> {
        AddressSpace::check_alignment(vma, size, false)?;
        if crate::peripherals::Peripherals::covers(vma) {
            return Ok(self.peripherals.read(vma, size));
        }
        let phys = self.mmu.translate(vma, AccessMode::Read, self.user_mode())?;
        Ok(self.mem.read_phys(phys, size))
    }

    pub fn write_mem(&mut self, vma: u32, value: OpResult) -> Result<(), Exception> {
        AddressSpace::check_alignment(vma, value.size(), true)?;
        if (0xE000_0000..0xE000_0040).contains(&vma) {
            self.cache.store_queue_write(vma, value.inner());
            return Ok(());
        }
        if crate::peripherals::Peripherals::covers(vma) {
            self.peripherals.write(vma, value, &self.regs);
            return Ok(());
        }
        let phys = self.mmu.translate(vma, AccessMode::Write, self.user_mode())?;
        self.mem.write_phys(phys, value);
        Ok(())
    }

    fn require_privileged(&self) -> Result<(), Exception> {
        if self.regs.is_privileged() {
            Ok(())
        } else {
            Err(Exception::new(self.slot_aware(ExceptionClass::Illegal, ExceptionClass::SlotIllegal)))
        }
    }

    fn slot_aware(&self, normal: ExceptionClass, slot: ExceptionClass) -> ExceptionClass {
        if matches!(self.regs.delay_slot, DelaySlotState::InDelaySlot { .. }) {
            slot
        } else {
            normal
        }
    }

    pub(crate) fn is_branch_class(insn: &Instruction) -> bool {
        matches!(
            insn,
            Instruction::Bra { .. }
                | Instruction::Braf { .. }
                | Instruction::Bsr { .. }
                | Instruction::Bsrf { .. }
                | Instruction::Bt { .. }
                | Instruction::Bf { .. }
                | Instruction::BtS { .. }
                | Instruction::BfS { .. }
                | Instruction::Jmp { .. }
                | Instruction::Jsr { .. }
                | Instruction::Rts
                | Instruction::Rte
                | Instruction::Trapa { .. }
        )
    }

    /// spec.md §4.1: "FPU ops are gated by SR.FD=0; otherwise raise
    /// EXC_FPU_DISABLED (slot variant in a delay slot)". `LDS/STS FPUL`
    /// and `LDS/STS FPSCR` are bank-control moves, not FPU arithmetic, and
    /// stay ungated like the real chip.
    fn is_fpu_class(insn: &Instruction) -> bool {
        matches!(
            insn,
            Instruction::FMov { .. }
                | Instruction::FLdS { .. }
                | Instruction::FStS { .. }
                | Instruction::FAdd { .. }
                | Instruction::FSub { .. }
                | Instruction::FMul { .. }
                | Instruction::FDiv { .. }
                | Instruction::FCmpEq { .. }
                | Instruction::FCmpGt { .. }
                | Instruction::Float { .. }
                | Instruction::FTrc { .. }
                | Instruction::FNeg { .. }
                | Instruction::FAbs { .. }
                | Instruction::FSqrt { .. }
                | Instruction::FCnvDS { .. }
                | Instruction::FCnvSD { .. }
                | Instruction::FIpr { .. }
                | Instruction::FTrv { .. }
                | Instruction::FSca { .. }
                | Instruction::Frchg
                | Instruction::Fschg
        )
    }

    /// Accepts the pending interrupt at the head of `peripherals.intc`
    /// (spec.md §4.4 `accept()`): writes SSR/SPC/SGR, jumps to VBR+0x600.
    pub(crate) fn accept_pending_interrupt(&mut self) -> Result<(), Exception> {
        if let Some(code) = self.peripherals.intc.accept() {
            let source = self.peripherals.intc.accepted_source();
            self.deliver_exception(Exception::new(ExceptionClass::Interrupt(code)))?;
            if let Some(src) = source {
                let imask = self.regs.imask();
                let block_bit = self.regs.sr & SR_BL != 0;
                self.peripherals.intc.clear(src, imask, block_bit);
            }
            self.regs.int_pending = self.peripherals.intc.int_pending;
        }
        Ok(())
    }

    fn deliver_exception(&mut self, exc: Exception) -> Result<(), Exception> {
        let (code, vector) = exc.class.code_and_vector();
        if self.regs.vbr == 0 {
            warn!("fatal: exception raised with VBR unset (code {:#x})", code);
            self.regs.sh4_state = SH4_STATE_SLEEP; // treat as halted
            return Err(exc);
        }
        let was_in_slot = matches!(self.regs.delay_slot, DelaySlotState::InDelaySlot { .. });
        self.regs.ssr = self.regs.sr;
        self.regs.spc = if was_in_slot {
            self.regs.pc.wrapping_sub(2)
        } else {
            self.regs.pc
        };
        self.regs.sgr = self.regs.r[15];
        self.regs.tra = exc.tra.unwrap_or(self.regs.tra);
        if exc.class.is_tlb_class() {
            self.regs.intevt = code;
        } else {
            match exc.class {
                ExceptionClass::Interrupt(_) => self.regs.intevt = code,
                _ => self.regs.expevt = code,
            }
        }
        self.regs.write_sr(self.regs.sr | SR_MD | SR_BL | SR_RB);
        self.regs.pc = self.regs.vbr.wrapping_add(vector);
        self.regs.new_pc = self.regs.pc.wrapping_add(2);
        self.regs.delay_slot = DelaySlotState::Normal;
        Ok(())
    }

    /// Executes exactly one instruction. Returns Ok(()) on success (with
    /// registers fully updated including pc/new_pc), or Err(exception) if
    /// an exception was raised and delivered.
    pub fn execute_instruction(&mut self) -> Result<(), Exception> {
        let pc = self.regs.pc;
        let opcode = match self.fetch(pc) {
            Ok(op) => op,
            Err(exc) => {
                self.deliver_exception(exc)?;
                return Ok(());
            }
        };
        let insn = decode(opcode);
        trace!("{:08x}: {:04x} {:?}", pc, opcode, insn);
        self.run_decoded(&insn)
    }

    /// Runs one already-decoded instruction: the shared tail of
    /// `execute_instruction` and the translator's compiled block bodies
    /// (spec.md §4.2 "bodies never call back into the interpreter" — here
    /// that means skipping the fetch+decode this method's caller already
    /// did, not skipping the dispatch/exception-delivery logic itself).
    pub(crate) fn run_decoded(&mut self, insn: &Instruction) -> Result<(), Exception> {
        // Captured before `dispatch` so it reflects whether *this*
        // instruction is the delay-slot instruction itself, not whatever
        // `dispatch` is about to do to `delay_slot` (e.g. arm a fresh one).
        let was_in_slot = matches!(self.regs.delay_slot, DelaySlotState::InDelaySlot { .. });
        if was_in_slot && Self::is_branch_class(insn) {
            let exc = Exception::new(ExceptionClass::SlotIllegal);
            self.deliver_exception(exc)?;
            return Ok(());
        }
        if Self::is_fpu_class(insn) && self.regs.is_fpu_disabled() {
            let exc = Exception::new(self.slot_aware(ExceptionClass::FpuDisabled, ExceptionClass::SlotFpuDisabled));
            self.deliver_exception(exc)?;
            return Ok(());
        }

        match self.dispatch(insn) {
            Ok(()) => {
                self.advance_pc(was_in_slot);
                Ok(())
            }
            Err(exc) => {
                self.deliver_exception(exc)?;
                Ok(())
            }
        }
    }

    /// Moves `pc`/`new_pc` past the just-dispatched instruction (spec.md
    /// §4.1/§9's delay-slot state machine). `was_in_slot` is whether the
    /// instruction just executed was itself the delay-slot instruction
    /// (captured by the caller *before* `dispatch`, since a branch's own
    /// dispatch call is what arms `delay_slot` for the next step).
    fn advance_pc(&mut self, was_in_slot: bool) {
        if was_in_slot {
            // Exiting the slot: `new_pc` already holds the branch target
            // (stashed there when the slot was armed below) — land on it.
            self.regs.pc = self.regs.new_pc;
            self.regs.new_pc = self.regs.pc.wrapping_add(2);
            self.regs.delay_slot = DelaySlotState::Normal;
            return;
        }
        match self.regs.delay_slot {
            DelaySlotState::InDelaySlot { target } => {
                // Just armed by this step's branch dispatch: pc moves onto
                // the delay-slot instruction's address; new_pc stashes the
                // eventual target until that instruction itself executes.
                // `delay_slot` stays InDelaySlot so the next step's
                // `was_in_slot` reads true for the slot instruction.
                self.regs.pc = self.regs.new_pc;
                self.regs.new_pc = target;
            }
            DelaySlotState::Normal => {
                self.regs.pc = self.regs.new_pc;
                self.regs.new_pc = self.regs.pc.wrapping_add(2);
            }
        }
    }

    /// Accepts a pending interrupt if one is queued and BL=0, then reports
    /// whether the core is still in the running state. Shared by this
    /// module's own `run_slice` and the top-level driver (`Sh4::run_slice`
    /// in lib.rs), so both loops make the identical accept/suspend decision
    /// every step.
    pub(crate) fn ready_to_run(&mut self) -> bool {
        if self.regs.int_pending && self.regs.sr & SR_BL == 0 {
            let _ = self.accept_pending_interrupt();
        }
        self.regs.sh4_state == SH4_STATE_RUNNING
    }

    /// One iteration of the stepping loop's body (spec.md §4.1): accept a
    /// pending interrupt if queued and BL=0, then execute exactly one
    /// instruction. Shared by `run_slice`'s own loop and the top-level
    /// driver (`Sh4::run_slice` in lib.rs), so a breakpoint check can be
    /// interleaved between steps without duplicating the interrupt-accept
    /// logic.
    pub(crate) fn step_one(&mut self) -> StepOutcome {
        if !self.ready_to_run() {
            return StepOutcome::Suspended;
        }
        let _ = self.execute_instruction();
        self.regs.slice_cycle += self.cpu_period_ns;
        if self.regs.sh4_state == SH4_STATE_SLEEP || self.regs.sh4_state == SH4_STATE_STANDBY {
            StepOutcome::Suspended
        } else {
            StepOutcome::Continue
        }
    }

    /// Runs the stepping loop for up to `nanos` nanoseconds (spec.md §4.1
    /// "Stepping loop" / §2 `run_slice`). Returns consumed nanoseconds.
    pub fn run_slice(&mut self, nanos: u64) -> u64 {
        self.regs.slice_cycle = 0;
        while self.regs.slice_cycle < nanos {
            if self.step_one() == StepOutcome::Suspended {
                break;
            }
        }
        let consumed = self.regs.slice_cycle.min(nanos);
        self.peripherals.run_slice(consumed, &mut self.regs);
        consumed
    }

    fn dispatch(&mut self, insn: &Instruction) -> Result<(), Exception> {
        use Instruction::*;
        match *insn {
            Nop => {}
            ClrT => self.regs.set_t(false),
            SetT => self.regs.set_t(true),
            ClrMac => self.regs.mac = 0,
            ClrS => self.regs.sr &= !crate::registers::SR_S,
            SetS => self.regs.sr |= crate::registers::SR_S,
            Sleep => self.regs.sh4_state = SH4_STATE_SLEEP,
            Illegal => return Err(Exception::new(self.slot_aware(ExceptionClass::Illegal, ExceptionClass::SlotIllegal))),

            Rts => {
                self.regs.delay_slot = DelaySlotState::InDelaySlot { target: self.regs.pr };
            }
            Rte => {
                self.require_privileged()?;
                let target = self.regs.spc;
                self.regs.write_sr(self.regs.ssr);
                self.regs.delay_slot = DelaySlotState::InDelaySlot { target };
            }
            Trapa { imm } => {
                return Err(Exception::trapa(imm));
            }

            Bra { disp } => self.take_branch(disp as i64),
            Braf { rn } => {
                let target = self.regs.pc.wrapping_add(4).wrapping_add(self.regs.r[rn]);
                self.regs.delay_slot = DelaySlotState::InDelaySlot { target };
            }
            Bsr { disp } => {
                self.regs.pr = self.regs.pc.wrapping_add(4);
                self.take_branch(disp as i64);
            }
            Bsrf { rn } => {
                self.regs.pr = self.regs.pc.wrapping_add(4);
                let target = self.regs.pc.wrapping_add(4).wrapping_add(self.regs.r[rn]);
                self.regs.delay_slot = DelaySlotState::InDelaySlot { target };
            }
            Bt { disp } => {
                // Taken BT has no delay slot (spec.md §4.1): stash the
                // target in new_pc and let `advance_pc`'s ordinary
                // (non-delay-slot) path move pc onto it, same as a
                // fallthrough instruction. Not taken: leave new_pc alone.
                if self.regs.t() {
                    self.regs.new_pc = self.regs.pc.wrapping_add(disp as u32);
                }
            }
            Bf { disp } => {
                if !self.regs.t() {
                    self.regs.new_pc = self.regs.pc.wrapping_add(disp as u32);
                }
            }
            BtS { disp } => {
                if self.regs.t() {
                    self.take_branch(disp as i64);
                }
            }
            BfS { disp } => {
                if !self.regs.t() {
                    self.take_branch(disp as i64);
                }
            }
            Jmp { rn } => {
                let target = self.regs.r[rn];
                self.regs.delay_slot = DelaySlotState::InDelaySlot { target };
            }
            Jsr { rn } => {
                self.regs.pr = self.regs.pc.wrapping_add(4);
                let target = self.regs.r[rn];
                self.regs.delay_slot = DelaySlotState::InDelaySlot { target };
            }

            MovImm { rn, imm } => self.regs.r[rn] = imm as u32,
            MovWPcRel { rn, disp } => {
                let base = (self.regs.pc.wrapping_add(4)) & !1;
                let v = self.read_mem(base.wrapping_add(disp), Size::Word)?;
                self.regs.r[rn] = sign_extend16(v.inner()) as u32;
            }
            MovLPcRel { rn, disp } => {
                let base = (self.regs.pc.wrapping_add(4)) & !3;
                let v = self.read_mem(base.wrapping_add(disp), Size::Long)?;
                self.regs.r[rn] = v.inner();
            }
            MovRegReg { rn, rm } => self.regs.r[rn] = self.regs.r[rm],
            MovA { disp } => {
                let base = (self.regs.pc.wrapping_add(4)) & !3;
                self.regs.r[0] = base.wrapping_add(disp);
            }
            MovT { rn } => self.regs.r[rn] = self.regs.t() as u32,

            MovBLoad { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm], Size::Byte)?;
                self.regs.r[rn] = v.sign_extend() as u32;
            }
            MovWLoad { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm], Size::Word)?;
                self.regs.r[rn] = v.sign_extend() as u32;
            }
            MovLLoad { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm], Size::Long)?;
                self.regs.r[rn] = v.inner();
            }
            MovBStore { rn, rm } => self.write_mem(self.regs.r[rn], OpResult::Byte(self.regs.r[rm] as u8))?,
            MovWStore { rn, rm } => self.write_mem(self.regs.r[rn], OpResult::Word(self.regs.r[rm] as u16))?,
            MovLStore { rn, rm } => self.write_mem(self.regs.r[rn], OpResult::Long(self.regs.r[rm]))?,

            MovBLoadDec { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm], Size::Byte)?;
                self.regs.r[rn] = v.sign_extend() as u32;
                if rn != rm {
                    self.regs.r[rm] = self.regs.r[rm].wrapping_sub(1);
                }
            }
            MovWLoadDec { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm], Size::Word)?;
                self.regs.r[rn] = v.sign_extend() as u32;
                if rn != rm {
                    self.regs.r[rm] = self.regs.r[rm].wrapping_sub(2);
                }
            }
            MovLLoadDec { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm], Size::Long)?;
                self.regs.r[rn] = v.inner();
                if rn != rm {
                    self.regs.r[rm] = self.regs.r[rm].wrapping_sub(4);
                }
            }
            MovBStoreInc { rn, rm } => {
                self.regs.r[rn] = self.regs.r[rn].wrapping_sub(1);
                self.write_mem(self.regs.r[rn], OpResult::Byte(self.regs.r[rm] as u8))?;
            }
            MovWStoreInc { rn, rm } => {
                self.regs.r[rn] = self.regs.r[rn].wrapping_sub(2);
                self.write_mem(self.regs.r[rn], OpResult::Word(self.regs.r[rm] as u16))?;
            }
            MovLStoreInc { rn, rm } => {
                self.regs.r[rn] = self.regs.r[rn].wrapping_sub(4);
                self.write_mem(self.regs.r[rn], OpResult::Long(self.regs.r[rm]))?;
            }
            MovBDisp { rm, disp } => {
                let v = self.read_mem(self.regs.r[rm].wrapping_add(disp), Size::Byte)?;
                self.regs.r[0] = v.sign_extend() as u32;
            }
            MovWDisp { rm, disp } => {
                let v = self.read_mem(self.regs.r[rm].wrapping_add(disp), Size::Word)?;
                self.regs.r[0] = v.sign_extend() as u32;
            }
            MovLDisp { rn, rm, disp } => {
                let v = self.read_mem(self.regs.r[rm].wrapping_add(disp), Size::Long)?;
                self.regs.r[rn] = v.inner();
            }
            MovBDispStore { rn, disp } => {
                self.write_mem(self.regs.r[rn].wrapping_add(disp), OpResult::Byte(self.regs.r[0] as u8))?
            }
            MovWDispStore { rn, disp } => {
                self.write_mem(self.regs.r[rn].wrapping_add(disp), OpResult::Word(self.regs.r[0] as u16))?
            }
            MovLDispStore { rn, rm, disp } => {
                self.write_mem(self.regs.r[rn].wrapping_add(disp), OpResult::Long(self.regs.r[rm]))?
            }
            MovBR0 { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm].wrapping_add(self.regs.r[0]), Size::Byte)?;
                self.regs.r[rn] = v.sign_extend() as u32;
            }
            MovWR0 { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm].wrapping_add(self.regs.r[0]), Size::Word)?;
                self.regs.r[rn] = v.sign_extend() as u32;
            }
            MovLR0 { rn, rm } => {
                let v = self.read_mem(self.regs.r[rm].wrapping_add(self.regs.r[0]), Size::Long)?;
                self.regs.r[rn] = v.inner();
            }
            MovBR0Store { rn, rm } => {
                self.write_mem(self.regs.r[rn].wrapping_add(self.regs.r[0]), OpResult::Byte(self.regs.r[rm] as u8))?
            }
            MovWR0Store { rn, rm } => {
                self.write_mem(self.regs.r[rn].wrapping_add(self.regs.r[0]), OpResult::Word(self.regs.r[rm] as u16))?
            }
            MovLR0Store { rn, rm } => {
                self.write_mem(self.regs.r[rn].wrapping_add(self.regs.r[0]), OpResult::Long(self.regs.r[rm]))?
            }
            MovBGbr { disp } => {
                let v = self.read_mem(self.regs.gbr.wrapping_add(disp), Size::Byte)?;
                self.regs.r[0] = v.sign_extend() as u32;
            }
            MovWGbr { disp } => {
                let v = self.read_mem(self.regs.gbr.wrapping_add(disp), Size::Word)?;
                self.regs.r[0] = v.sign_extend() as u32;
            }
            MovLGbr { disp } => {
                let v = self.read_mem(self.regs.gbr.wrapping_add(disp), Size::Long)?;
                self.regs.r[0] = v.inner();
            }
            MovBGbrStore { disp } => self.write_mem(self.regs.gbr.wrapping_add(disp), OpResult::Byte(self.regs.r[0] as u8))?,
            MovWGbrStore { disp } => self.write_mem(self.regs.gbr.wrapping_add(disp), OpResult::Word(self.regs.r[0] as u16))?,
            MovLGbrStore { disp } => self.write_mem(self.regs.gbr.wrapping_add(disp), OpResult::Long(self.regs.r[0]))?,

            Swap { size_word, rn, rm } => {
                let v = self.regs.r[rm];
                self.regs.r[rn] = if size_word {
                    (v << 16) | (v >> 16)
                } else {
                    (v & 0xFFFF_0000) | ((v & 0xFF) << 8) | ((v >> 8) & 0xFF)
                };
            }
            Xtrct { rn, rm } => {
                self.regs.r[rn] = (self.regs.r[rn] >> 16) | (self.regs.r[rm] << 16);
            }

            Add { rn, rm } => self.regs.r[rn] = self.regs.r[rn].wrapping_add(self.regs.r[rm]),
            AddImm { rn, imm } => self.regs.r[rn] = (self.regs.r[rn] as i32).wrapping_add(imm) as u32,
            Addc { rn, rm } => {
                let (r1, c1) = self.regs.r[rn].overflowing_add(self.regs.r[rm]);
                let (r2, c2) = r1.overflowing_add(self.regs.t() as u32);
                self.regs.r[rn] = r2;
                self.regs.set_t(c1 || c2);
            }
            Addv { rn, rm } => {
                let a = self.regs.r[rn] as i32;
                let b = self.regs.r[rm] as i32;
                let (res, overflow) = a.overflowing_add(b);
                self.regs.r[rn] = res as u32;
                self.regs.set_t(overflow);
            }
            Sub { rn, rm } => self.regs.r[rn] = self.regs.r[rn].wrapping_sub(self.regs.r[rm]),
            Subc { rn, rm } => {
                let (r1, b1) = self.regs.r[rn].overflowing_sub(self.regs.r[rm]);
                let (r2, b2) = r1.overflowing_sub(self.regs.t() as u32);
                self.regs.r[rn] = r2;
                self.regs.set_t(b1 || b2);
            }
            Subv { rn, rm } => {
                let a = self.regs.r[rn] as i32;
                let b = self.regs.r[rm] as i32;
                let (res, overflow) = a.overflowing_sub(b);
                self.regs.r[rn] = res as u32;
                self.regs.set_t(overflow);
            }
            Neg { rn, rm } => self.regs.r[rn] = (self.regs.r[rm] as i32).wrapping_neg() as u32,
            Negc { rn, rm } => {
                let (r1, b1) = 0u32.overflowing_sub(self.regs.r[rm]);
                let (r2, b2) = r1.overflowing_sub(self.regs.t() as u32);
                self.regs.r[rn] = r2;
                self.regs.set_t(b1 || b2);
            }
            MulL { rn, rm } => self.regs.mac = (self.regs.mac & !0xFFFF_FFFF) | (self.regs.r[rn].wrapping_mul(self.regs.r[rm]) as u64),
            Muls { rn, rm } => {
                let p = (self.regs.r[rn] as i16 as i32) * (self.regs.r[rm] as i16 as i32);
                self.regs.mac = (self.regs.mac & !0xFFFF_FFFF) | (p as u32 as u64);
            }
            Mulu { rn, rm } => {
                let p = (self.regs.r[rn] as u16 as u32) * (self.regs.r[rm] as u16 as u32);
                self.regs.mac = (self.regs.mac & !0xFFFF_FFFF) | (p as u64);
            }
            Dmuls { rn, rm } => {
                let p = (self.regs.r[rn] as i32 as i64).wrapping_mul(self.regs.r[rm] as i32 as i64);
                self.regs.mac = p as u64;
            }
            Dmulu { rn, rm } => {
                let p = (self.regs.r[rn] as u64).wrapping_mul(self.regs.r[rm] as u64);
                self.regs.mac = p;
            }
            Div0s { rn, rm } => {
                let m = (self.regs.r[rm] >> 31) & 1;
                let q = (self.regs.r[rn] >> 31) & 1;
                self.regs.sr = (self.regs.sr & !(crate::registers::SR_M | crate::registers::SR_Q))
                    | (m << 9)
                    | (q << 8);
                self.regs.set_t(m != q);
            }
            Div0u => {
                self.regs.sr &= !(crate::registers::SR_M | crate::registers::SR_Q);
                self.regs.set_t(false);
            }
            Div1 { rn, rm } => self.div1_step(rn, rm),
            MacL { rn, rm } => {
                let a = self.read_mem(self.regs.r[rn], Size::Long)?.inner() as i32 as i64;
                let b = self.read_mem(self.regs.r[rm], Size::Long)?.inner() as i32 as i64;
                self.regs.r[rn] = self.regs.r[rn].wrapping_add(4);
                self.regs.r[rm] = self.regs.r[rm].wrapping_add(4);
                self.regs.mac = (self.regs.mac as i64).wrapping_add(a * b) as u64;
                if self.regs.sr & crate::registers::SR_S != 0 {
                    self.regs.saturate_mac_48();
                }
            }
            MacW { rn, rm } => {
                let a = self.read_mem(self.regs.r[rn], Size::Word)?.sign_extend() as i64;
                let b = self.read_mem(self.regs.r[rm], Size::Word)?.sign_extend() as i64;
                self.regs.r[rn] = self.regs.r[rn].wrapping_add(2);
                self.regs.r[rm] = self.regs.r[rm].wrapping_add(2);
                let sum = (self.regs.mac as i64).wrapping_add(a * b);
                if self.regs.sr & crate::registers::SR_S != 0 {
                    self.regs.mac = sum.clamp(i32::MIN as i64, i32::MAX as i64) as u32 as u64;
                } else {
                    self.regs.mac = sum as u64;
                }
            }
            Dt { rn } => {
                self.regs.r[rn] = self.regs.r[rn].wrapping_sub(1);
                self.regs.set_t(self.regs.r[rn] == 0);
            }

            CmpEq { rn, rm } => self.regs.set_t(self.regs.r[rn] == self.regs.r[rm]),
            CmpHs { rn, rm } => self.regs.set_t(self.regs.r[rn] >= self.regs.r[rm]),
            CmpGe { rn, rm } => self.regs.set_t((self.regs.r[rn] as i32) >= (self.regs.r[rm] as i32)),
            CmpHi { rn, rm } => self.regs.set_t(self.regs.r[rn] > self.regs.r[rm]),
            CmpGt { rn, rm } => self.regs.set_t((self.regs.r[rn] as i32) > (self.regs.r[rm] as i32)),
            CmpPl { rn } => self.regs.set_t((self.regs.r[rn] as i32) > 0),
            CmpPz { rn } => self.regs.set_t((self.regs.r[rn] as i32) >= 0),
            CmpStr { rn, rm } => {
                let x = self.regs.r[rn] ^ self.regs.r[rm];
                let eq = (x & 0xFF == 0) || (x & 0xFF00 == 0) || (x & 0x00FF_0000 == 0) || (x & 0xFF00_0000 == 0);
                self.regs.set_t(eq);
            }
            CmpImm { imm } => self.regs.set_t((self.regs.r[0] as i32) == imm),
            Tst { rn, rm } => self.regs.set_t(self.regs.r[rn] & self.regs.r[rm] == 0),
            TstImm { imm } => self.regs.set_t(self.regs.r[0] & imm == 0),

            And { rn, rm } => self.regs.r[rn] &= self.regs.r[rm],
            AndImm { imm } => self.regs.r[0] &= imm,
            Or { rn, rm } => self.regs.r[rn] |= self.regs.r[rm],
            OrImm { imm } => self.regs.r[0] |= imm,
            Xor { rn, rm } => self.regs.r[rn] ^= self.regs.r[rm],
            XorImm { imm } => self.regs.r[0] ^= imm,
            Not { rn, rm } => self.regs.r[rn] = !self.regs.r[rm],

            ShlL { rn } => {
                self.regs.set_t(self.regs.r[rn] & 0x8000_0000 != 0);
                self.regs.r[rn] <<= 1;
            }
            ShlR { rn } => {
                self.regs.set_t(self.regs.r[rn] & 1 != 0);
                self.regs.r[rn] >>= 1;
            }
            ShaL { rn } => {
                self.regs.set_t(self.regs.r[rn] & 0x8000_0000 != 0);
                self.regs.r[rn] = ((self.regs.r[rn] as i32) << 1) as u32;
            }
            ShaR { rn } => {
                self.regs.set_t(self.regs.r[rn] & 1 != 0);
                self.regs.r[rn] = ((self.regs.r[rn] as i32) >> 1) as u32;
            }
            Shll2 { rn } => self.regs.r[rn] <<= 2,
            Shlr2 { rn } => self.regs.r[rn] >>= 2,
            Shll8 { rn } => self.regs.r[rn] <<= 8,
            Shlr8 { rn } => self.regs.r[rn] >>= 8,
            Shll16 { rn } => self.regs.r[rn] <<= 16,
            Shlr16 { rn } => self.regs.r[rn] >>= 16,
            RotL { rn } => {
                self.regs.set_t(self.regs.r[rn] & 0x8000_0000 != 0);
                self.regs.r[rn] = self.regs.r[rn].rotate_left(1);
            }
            RotR { rn } => {
                self.regs.set_t(self.regs.r[rn] & 1 != 0);
                self.regs.r[rn] = self.regs.r[rn].rotate_right(1);
            }
            RotCL { rn } => {
                let carry = self.regs.t() as u32;
                let new_t = self.regs.r[rn] & 0x8000_0000 != 0;
                self.regs.r[rn] = (self.regs.r[rn] << 1) | carry;
                self.regs.set_t(new_t);
            }
            RotCR { rn } => {
                let carry = self.regs.t() as u32;
                let new_t = self.regs.r[rn] & 1 != 0;
                self.regs.r[rn] = (self.regs.r[rn] >> 1) | (carry << 31);
                self.regs.set_t(new_t);
            }
            ExtuB { rn, rm } => self.regs.r[rn] = self.regs.r[rm] & 0xFF,
            ExtuW { rn, rm } => self.regs.r[rn] = self.regs.r[rm] & 0xFFFF,
            ExtsB { rn, rm } => self.regs.r[rn] = (self.regs.r[rm] as i8) as u32,
            ExtsW { rn, rm } => self.regs.r[rn] = (self.regs.r[rm] as i16) as u32,
            Tas { rn } => {
                let v = self.read_mem(self.regs.r[rn], Size::Byte)?;
                self.regs.set_t(v.inner() == 0);
                self.write_mem(self.regs.r[rn], OpResult::Byte(v.inner() as u8 | 0x80))?;
            }

            StcSr { rn } => { self.require_privileged()?; self.regs.r[rn] = self.regs.sr; }
            StcGbr { rn } => self.regs.r[rn] = self.regs.gbr,
            StcVbr { rn } => { self.require_privileged()?; self.regs.r[rn] = self.regs.vbr; }
            StcSsr { rn } => { self.require_privileged()?; self.regs.r[rn] = self.regs.ssr; }
            StcSpc { rn } => { self.require_privileged()?; self.regs.r[rn] = self.regs.spc; }
            StcSgr { rn } => { self.require_privileged()?; self.regs.r[rn] = self.regs.sgr; }
            StcDbr { rn } => { self.require_privileged()?; self.regs.r[rn] = self.regs.dbr; }
            StcRBank { rn, bank } => { self.require_privileged()?; self.regs.r[rn] = self.regs.r_bank[bank]; }
            LdcSr { rn } => { self.require_privileged()?; self.regs.write_sr(self.regs.r[rn]); }
            LdcGbr { rn } => self.regs.gbr = self.regs.r[rn],
            LdcVbr { rn } => { self.require_privileged()?; self.regs.vbr = self.regs.r[rn]; }
            LdcSsr { rn } => { self.require_privileged()?; self.regs.ssr = self.regs.r[rn]; }
            LdcSpc { rn } => { self.require_privileged()?; self.regs.spc = self.regs.r[rn]; }
            LdcDbr { rn } => { self.require_privileged()?; self.regs.dbr = self.regs.r[rn]; }
            LdcRBank { rn, bank } => { self.require_privileged()?; self.regs.r_bank[bank] = self.regs.r[rn]; }
            LdsMach { rn } => self.regs.mac = (self.regs.mac & 0xFFFF_FFFF) | ((self.regs.r[rn] as u64) << 32),
            LdsMacl { rn } => self.regs.mac = (self.regs.mac & !0xFFFF_FFFF) | (self.regs.r[rn] as u64),
            LdsPr { rn } => self.regs.pr = self.regs.r[rn],
            StsMach { rn } => self.regs.r[rn] = (self.regs.mac >> 32) as u32,
            StsMacl { rn } => self.regs.r[rn] = self.regs.mac as u32,
            StsPr { rn } => self.regs.r[rn] = self.regs.pr,
            LdsFpscr { rn } => self.regs.fpscr = self.regs.r[rn] & 0x003F_FFFF,
            StsFpscr { rn } => self.regs.r[rn] = self.regs.fpscr,
            LdsFpul { rn } => self.regs.fpul = self.regs.r[rn],
            StsFpul { rn } => self.regs.r[rn] = self.regs.fpul,
            LdTlb => { self.require_privileged()?; self.mmu.ldtlb(0); }
            Pref { rn } => self.do_pref(self.regs.r[rn])?,
            Ocbi { .. } | Ocbp { .. } | Ocbwb { .. } | MovCa { .. } => {
                // Cache-management ops are non-functional under the
                // tags+ORAM-only cache model (spec.md non-goal).
            }

            FMov { rn, rm } => { let v = self.regs.load_fr(rm); self.regs.store_fr(rn, v); }
            FLdS { rn } => self.regs.fpul = self.regs.load_fr(rn),
            FStS { rn } => self.regs.store_fr(rn, self.regs.fpul),
            FAdd { rn, rm } => self.fpu_binop(rn, rm, |a, b| a + b),
            FSub { rn, rm } => self.fpu_binop(rn, rm, |a, b| a - b),
            FMul { rn, rm } => self.fpu_binop(rn, rm, |a, b| a * b),
            FDiv { rn, rm } => self.fpu_binop(rn, rm, |a, b| a / b),
            FCmpEq { rn, rm } => self.regs.set_t(self.regs.load_fr_f32(rn) == self.regs.load_fr_f32(rm)),
            FCmpGt { rn, rm } => self.regs.set_t(self.regs.load_fr_f32(rn) > self.regs.load_fr_f32(rm)),
            Float { rn } => { let v = self.regs.fpul as i32 as f32; self.regs.store_fr_f32(rn, v); }
            FTrc { rn } => { self.regs.fpul = self.regs.load_fr_f32(rn) as i32 as u32; }
            FNeg { rn } => { let v = -self.regs.load_fr_f32(rn); self.regs.store_fr_f32(rn, v); }
            FAbs { rn } => { let v = self.regs.load_fr_f32(rn).abs(); self.regs.store_fr_f32(rn, v); }
            FSqrt { rn } => { let v = self.regs.load_fr_f32(rn).sqrt(); self.regs.store_fr_f32(rn, v); }
            FCnvDS { rn } => {
                if self.regs.fpscr & crate::registers::FPSCR_SZ == 0 {
                    self.regs.fpul = self.regs.load_fr_f32(rn).to_bits();
                }
            }
            FCnvSD { rn } => {
                if self.regs.fpscr & crate::registers::FPSCR_SZ == 0 {
                    self.regs.store_fr_f32(rn, f32::from_bits(self.regs.fpul));
                }
            }
            FIpr { rn, rm } => self.fipr(rn, rm),
            FTrv { rn } => self.ftrv(rn),
            FSca { rn } => self.fsca(rn),
            Frchg => self.regs.fpscr ^= crate::registers::FPSCR_FR,
            Fschg => self.regs.fpscr ^= crate::registers::FPSCR_SZ,
        }
        Ok(())
    }

    fn take_branch(&mut self, disp: i64) {
        let target = (self.regs.pc as i64 + disp) as u32;
        self.regs.delay_slot = DelaySlotState::InDelaySlot { target };
    }

    fn do_pref(&mut self, addr: u32) -> Result<(), Exception> {
        if (0xE000_0000..0xE000_0040).contains(&addr) {
            let target = if self.mmu.translation_enabled() {
                self.mmu.translate(addr, AccessMode::Prefetch, self.user_mode())?
            } else {
                self.cache.store_queue_flush_target(addr)
            };
            let data = self.cache.store_queue_burst_data(addr);
            self.mem.write_burst_phys(target, &data);
        }
        Ok(())
    }

    fn div1_step(&mut self, rn: usize, rm: usize) {
        // Non-restoring division step, grounded on the SH4 DIV1 algorithm
        // using the M, Q and T bits (spec.md §4.1).
        let old_q = self.regs.sr & crate::registers::SR_Q != 0;
        let m = self.regs.sr & crate::registers::SR_M != 0;
        let q = self.regs.r[rn] & 0x8000_0000 != 0;
        let mut rn_val = (self.regs.r[rn] << 1) | (self.regs.t() as u32);
        let tmp0 = rn_val;
        if !old_q {
            if !m {
                let (res, carry) = rn_val.overflowing_sub(self.regs.r[rm]);
                rn_val = res;
                let new_q = if !carry { q ^ m } else { q ^ !m ^ (tmp0 < self.regs.r[rm]) };
                self.set_q(new_q);
            } else {
                let (res, carry) = rn_val.overflowing_add(self.regs.r[rm]);
                rn_val = res;
                let new_q = q ^ m ^ carry;
                self.set_q(new_q);
            }
        } else if !m {
            let (res, carry) = rn_val.overflowing_add(self.regs.r[rm]);
            rn_val = res;
            let new_q = q ^ m ^ carry;
            self.set_q(new_q);
        } else {
            let (res, carry) = rn_val.overflowing_sub(self.regs.r[rm]);
            rn_val = res;
            let new_q = if !carry { q ^ m } else { q ^ !m ^ (tmp0 < self.regs.r[rm]) };
            self.set_q(new_q);
        }
        self.regs.r[rn] = rn_val;
        let q_final = self.regs.sr & crate::registers::SR_Q != 0;
        self.regs.set_t(q_final == m);
    }

    fn set_q(&mut self, q: bool) {
        if q {
            self.regs.sr |= crate::registers::SR_Q;
        } else {
            self.regs.sr &= !crate::registers::SR_Q;
        }
    }

    fn fpu_binop(&mut self, rn: usize, rm: usize, op: impl Fn(f32, f32) -> f32) {
        let a = self.regs.load_fr_f32(rn);
        let b = self.regs.load_fr_f32(rm);
        self.regs.store_fr_f32(rn, op(a, b));
    }

    /// FIPR: dot product of FV(n) and FV(m), result in the last element of FV(n).
    fn fipr(&mut self, n_group: usize, m_group: usize) {
        let base_n = n_group * 4;
        let base_m = m_group * 4;
        let mut sum = 0f32;
        for i in 0..4 {
            sum += self.regs.load_fr_f32(base_n + i) * self.regs.load_fr_f32(base_m + i);
        }
        self.regs.store_fr_f32(base_n + 3, sum);
    }

    /// FTRV: multiplies the XF 4x4 matrix by FV(n) (spec.md §4.1).
    fn ftrv(&mut self, n_group: usize) {
        let base_n = n_group * 4;
        let mut v = [0f32; 4];
        for i in 0..4 {
            v[i] = self.regs.load_fr_f32(base_n + i);
        }
        let mut out = [0f32; 4];
        for row in 0..4 {
            let mut sum = 0f32;
            for col in 0..4 {
                let xf_index = col * 4 + row;
                let bank = self.regs.xf_bank();
                let raw = self.regs.fr[bank][xf_index ^ 1];
                sum += f32::from_bits(raw) * v[col];
            }
            out[row] = sum;
        }
        for i in 0..4 {
            self.regs.store_fr_f32(base_n + i, out[i]);
        }
    }

    /// FSCA: computes (sin, cos) of theta = (fpul & 0xFFFF)/65536 * 2*pi
    /// into the double-precision-register pair FR(n), FR(n+1).
    fn fsca(&mut self, n: usize) {
        let frac = (self.regs.fpul & 0xFFFF) as f64 / 65536.0;
        let theta = frac * std::f64::consts::TAU;
        self.regs.store_fr_f32(n, theta.sin() as f32);
        self.regs.store_fr_f32(n + 1, theta.cos() as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_cpu() -> Cpu {
        Cpu::new(0x10_0000, 5)
    }

    #[test]
    fn boot_state_matches_scenario_1() {
        let cpu = new_cpu();
        assert_eq!(cpu.regs.pc, 0xA000_0000);
        assert_eq!(cpu.regs.new_pc, 0xA000_0002);
        assert_eq!(cpu.regs.sr, 0x7000_00F0);
        assert_eq!(cpu.regs.vbr, 0);
        assert_eq!(cpu.regs.fpscr, 0x0004_0001);
    }

    #[test]
    fn run_slice_zero_is_a_noop() {
        let mut cpu = new_cpu();
        let pc_before = cpu.regs.pc;
        let consumed = cpu.run_slice(0);
        assert_eq!(consumed, 0);
        assert_eq!(cpu.regs.pc, pc_before);
    }

    #[test]
    fn immediate_add_scenario() {
        let mut cpu = new_cpu();
        cpu.mem.write_phys(0x0C01_0000, OpResult::Word(0x7A05));
        cpu.regs.pc = 0x8C01_0000;
        cpu.regs.new_pc = 0x8C01_0002;
        cpu.regs.r[10] = 0;
        cpu.execute_instruction().unwrap();
        assert_eq!(cpu.regs.r[10], 5);
        assert_eq!(cpu.regs.pc, 0x8C01_0002);
    }

    #[test]
    fn delayed_jsr_scenario() {
        let mut cpu = new_cpu();
        cpu.mem.write_phys(0x0C01_0000, OpResult::Word(0x400B)); // JSR @R0
        cpu.mem.write_phys(0x0C01_0002, OpResult::Word(0x0009)); // NOP
        cpu.regs.pc = 0x8C01_0000;
        cpu.regs.new_pc = 0x8C01_0002;
        cpu.regs.r[0] = 0x8C02_0000;
        cpu.execute_instruction().unwrap();
        cpu.execute_instruction().unwrap();
        assert_eq!(cpu.regs.pc, 0x8C02_0000);
        assert_eq!(cpu.regs.pr, 0x8C01_0004);
        assert!(matches!(cpu.regs.delay_slot, DelaySlotState::Normal));
    }

    #[test]
    fn trapa_scenario() {
        let mut cpu = new_cpu();
        cpu.mem.write_phys(0x0C01_0000, OpResult::Word(0xC312)); // TRAPA #18
        cpu.regs.pc = 0x8C01_0000;
        cpu.regs.new_pc = 0x8C01_0002;
        cpu.regs.vbr = 0x8C00_0000;
        let sr_before = cpu.regs.sr;
        cpu.execute_instruction().unwrap();
        assert_eq!(cpu.regs.tra, 0x48);
        assert_eq!(cpu.regs.pc, 0x8C00_0100);
        assert_eq!(cpu.regs.ssr, sr_before);
        assert_eq!(cpu.regs.sr & (SR_MD | SR_BL | SR_RB), SR_MD | SR_BL | SR_RB);
        assert_eq!(cpu.regs.expevt, 0x160);
    }

    #[test]
    fn delay_slot_branch_is_slot_illegal() {
        let mut cpu = new_cpu();
        // JSR @R0 then BRA in the delay slot: second instruction is a branch
        // class opcode while in_delay_slot, must raise EXC_SLOT_ILLEGAL.
        cpu.mem.write_phys(0x0C01_0000, OpResult::Word(0x400B)); // JSR @R0
        cpu.mem.write_phys(0x0C01_0002, OpResult::Word(0xA000)); // BRA +0
        cpu.regs.pc = 0x8C01_0000;
        cpu.regs.new_pc = 0x8C01_0002;
        cpu.regs.r[0] = 0x8C02_0000;
        cpu.regs.vbr = 0x8C00_0000;
        cpu.execute_instruction().unwrap();
        cpu.execute_instruction().unwrap();
        assert_eq!(cpu.regs.expevt, 0x1A0);
    }

    #[test]
    fn mac_l_saturates_with_s_flag_set() {
        let mut cpu = new_cpu();
        cpu.regs.sr |= crate::registers::SR_S;
        cpu.regs.r[1] = 0x0C01_0000;
        cpu.regs.r[2] = 0x0C02_0000;
        cpu.mem.write_phys(0x0C01_0000, OpResult::Long(0x7FFF_FFFF));
        cpu.mem.write_phys(0x0C02_0000, OpResult::Long(0x7FFF_FFFF));
        for _ in 0..8 {
            cpu.dispatch(&Instruction::MacL { rn: 1, rm: 2 }).unwrap();
            cpu.regs.r[1] = 0x0C01_0000;
            cpu.regs.r[2] = 0x0C02_0000;
        }
        let mac = cpu.regs.mac as i64;
        assert!(mac <= 0x0000_7FFF_FFFF_FFFF);
        assert!(mac >= -0x0000_8000_0000_0000);
    }
}
