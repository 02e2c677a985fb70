// The decoded-instruction sum type. Mirrors the teacher's flat
// `Instruction` enum (`instructions.rs`) — one variant per opcode form,
// carrying only the raw field values the parser extracted — regrounded
// for the SH4 ISA. Coverage is representative rather than exhaustive: see
// DESIGN.md for the list of opcode groups implemented and the ones left
// as a documented gap (the full SH4 ISA is ~450 opcode forms; this core
// implements the architecturally load-bearing subset needed to exercise
// every contract in spec.md §4.1 — delay slots, exceptions, MAC
// saturation, FPU gating, bank swap, privilege checks — plus a broad,
// directly useful slice of the integer/logic/branch/FPU space).

#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    // --- System / control ---
    Nop,
    ClrT,
    SetT,
    ClrMac,
    ClrS,
    SetS,
    Sleep,
    Rte,
    Rts,
    Trapa { imm: u32 },
    Illegal,

    // --- Branches ---
    Bra { disp: i32 },
    Braf { rn: usize },
    Bsr { disp: i32 },
    Bsrf { rn: usize },
    Bt { disp: i32 },
    Bf { disp: i32 },
    BtS { disp: i32 },
    BfS { disp: i32 },
    Jmp { rn: usize },
    Jsr { rn: usize },

    // --- Data movement: register/immediate ---
    MovImm { rn: usize, imm: i32 },
    MovWPcRel { rn: usize, disp: u32 },
    MovLPcRel { rn: usize, disp: u32 },
    MovRegReg { rn: usize, rm: usize },
    MovA { disp: u32 },
    MovT { rn: usize },

    // --- Data movement: memory ---
    MovBLoad { rn: usize, rm: usize },
    MovWLoad { rn: usize, rm: usize },
    MovLLoad { rn: usize, rm: usize },
    MovBStore { rn: usize, rm: usize },
    MovWStore { rn: usize, rm: usize },
    MovLStore { rn: usize, rm: usize },
    MovBLoadDec { rn: usize, rm: usize },
    MovWLoadDec { rn: usize, rm: usize },
    MovLLoadDec { rn: usize, rm: usize },
    MovBStoreInc { rn: usize, rm: usize },
    MovWStoreInc { rn: usize, rm: usize },
    MovLStoreInc { rn: usize, rm: usize },
    MovBDisp { rm: usize, disp: u32 },
    MovWDisp { rm: usize, disp: u32 },
    MovLDisp { rn: usize, rm: usize, disp: u32 },
    MovBDispStore { rn: usize, disp: u32 },
    MovWDispStore { rn: usize, disp: u32 },
    MovLDispStore { rn: usize, rm: usize, disp: u32 },
    MovBR0 { rn: usize, rm: usize },
    MovWR0 { rn: usize, rm: usize },
    MovLR0 { rn: usize, rm: usize },
    MovBR0Store { rn: usize, rm: usize },
    MovWR0Store { rn: usize, rm: usize },
    MovLR0Store { rn: usize, rm: usize },
    MovBGbr { disp: u32 },
    MovWGbr { disp: u32 },
    MovLGbr { disp: u32 },
    MovBGbrStore { disp: u32 },
    MovWGbrStore { disp: u32 },
    MovLGbrStore { disp: u32 },
    Swap { size_word: bool, rn: usize, rm: usize },
    Xtrct { rn: usize, rm: usize },

    // --- Arithmetic ---
    Add { rn: usize, rm: usize },
    AddImm { rn: usize, imm: i32 },
    Addc { rn: usize, rm: usize },
    Addv { rn: usize, rm: usize },
    Sub { rn: usize, rm: usize },
    Subc { rn: usize, rm: usize },
    Subv { rn: usize, rm: usize },
    Neg { rn: usize, rm: usize },
    Negc { rn: usize, rm: usize },
    MulL { rn: usize, rm: usize },
    Muls { rn: usize, rm: usize },
    Mulu { rn: usize, rm: usize },
    Dmuls { rn: usize, rm: usize },
    Dmulu { rn: usize, rm: usize },
    Div0s { rn: usize, rm: usize },
    Div0u,
    Div1 { rn: usize, rm: usize },
    MacL { rn: usize, rm: usize },
    MacW { rn: usize, rm: usize },
    Dt { rn: usize },

    // --- Compare ---
    CmpEq { rn: usize, rm: usize },
    CmpHs { rn: usize, rm: usize },
    CmpGe { rn: usize, rm: usize },
    CmpHi { rn: usize, rm: usize },
    CmpGt { rn: usize, rm: usize },
    CmpPl { rn: usize },
    CmpPz { rn: usize },
    CmpStr { rn: usize, rm: usize },
    CmpImm { imm: i32 },
    Tst { rn: usize, rm: usize },
    TstImm { imm: u32 },

    // --- Logic ---
    And { rn: usize, rm: usize },
    AndImm { imm: u32 },
    Or { rn: usize, rm: usize },
    OrImm { imm: u32 },
    Xor { rn: usize, rm: usize },
    XorImm { imm: u32 },
    Not { rn: usize, rm: usize },

    // --- Shift / rotate ---
    ShlL { rn: usize },
    ShlR { rn: usize },
    ShaL { rn: usize },
    ShaR { rn: usize },
    Shll2 { rn: usize },
    Shlr2 { rn: usize },
    Shll8 { rn: usize },
    Shlr8 { rn: usize },
    Shll16 { rn: usize },
    Shlr16 { rn: usize },
    RotL { rn: usize },
    RotR { rn: usize },
    RotCL { rn: usize },
    RotCR { rn: usize },
    ExtuB { rn: usize, rm: usize },
    ExtuW { rn: usize, rm: usize },
    ExtsB { rn: usize, rm: usize },
    ExtsW { rn: usize, rm: usize },
    Tas { rn: usize },

    // --- System/control registers ---
    StcSr { rn: usize },
    StcGbr { rn: usize },
    StcVbr { rn: usize },
    StcSsr { rn: usize },
    StcSpc { rn: usize },
    StcSgr { rn: usize },
    StcDbr { rn: usize },
    StcRBank { rn: usize, bank: usize },
    LdcSr { rn: usize },
    LdcGbr { rn: usize },
    LdcVbr { rn: usize },
    LdcSsr { rn: usize },
    LdcSpc { rn: usize },
    LdcDbr { rn: usize },
    LdcRBank { rn: usize, bank: usize },
    LdsMach { rn: usize },
    LdsMacl { rn: usize },
    LdsPr { rn: usize },
    StsMach { rn: usize },
    StsMacl { rn: usize },
    StsPr { rn: usize },
    LdsFpscr { rn: usize },
    StsFpscr { rn: usize },
    LdsFpul { rn: usize },
    StsFpul { rn: usize },
    LdTlb,
    Pref { rn: usize },
    Ocbi { rn: usize },
    Ocbp { rn: usize },
    Ocbwb { rn: usize },
    MovCa { rn: usize },

    // --- FPU ---
    FMov { rn: usize, rm: usize },
    FLdS { rn: usize },
    FStS { rn: usize },
    FAdd { rn: usize, rm: usize },
    FSub { rn: usize, rm: usize },
    FMul { rn: usize, rm: usize },
    FDiv { rn: usize, rm: usize },
    FCmpEq { rn: usize, rm: usize },
    FCmpGt { rn: usize, rm: usize },
    Float { rn: usize },
    FTrc { rn: usize },
    FNeg { rn: usize },
    FAbs { rn: usize },
    FSqrt { rn: usize },
    FCnvDS { rn: usize },
    FCnvSD { rn: usize },
    FIpr { rn: usize, rm: usize },
    FTrv { rn: usize },
    FSca { rn: usize },
    Frchg,
    Fschg,
}
