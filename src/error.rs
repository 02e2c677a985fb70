// Crate error type for the small set of conditions spec.md §7 allows to
// propagate out of the core as opposed to being swallowed with a warning:
// malformed save-state data, ROM CRC mismatches, and driver misuse. Uses
// `thiserror` the way the rest of the retrieved corpus (`wilsonzlin-aero`,
// `amoljassal-sis-kernel-showcase`) builds its error enums, rather than the
// teacher's bare `panic!`s.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Sh4Error {
    #[error("ROM CRC mismatch: expected {expected:08x}, got {actual:08x}")]
    RomCrcMismatch { expected: u32, actual: u32 },

    #[error("save state is truncated or malformed: {0}")]
    BadSaveState(String),

    #[error("run_slice called after stop()")]
    CoreStopped,

    #[error("shadow verification diverged: {0}")]
    ShadowDivergence(String),

    #[error("fatal exception with VBR unset (code {0:#x})")]
    UnhandledExceptionNoVbr(u32),
}
