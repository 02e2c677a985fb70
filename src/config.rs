// Driver-facing configuration, generalising the teacher's `Configuration`
// struct (`lib.rs`: `base_address`, `start_address`, `initial_ssp`, `bus`,
// `memory_layout`) to SH4 terms (spec.md §B.3). `Sh4Config::default()`
// matches spec.md §8 scenario 1's post-reset values.

use std::path::PathBuf;

/// A ROM image to load at boot, with the expected CRC32 spec.md §6's
/// `load_rom(file, base, size, crc)` checks against.
#[derive(Clone, Debug)]
pub struct RomImage {
    pub path: PathBuf,
    pub base: u32,
    pub expected_crc: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Sh4Config {
    pub ram_size: u32,
    pub boot_vbr: u32,
    pub rom_image: Option<RomImage>,
    pub cpu_clock_hz: u64,
    /// Feeds the L0 `Clock` module; bus/peripheral periods derive from this
    /// via FRQCR, so only the input oscillator frequency is configured
    /// here (spec.md's Clock component, §2 L0).
    pub input_clock_hz: u64,
    pub use_translator: bool,
}

impl Default for Sh4Config {
    fn default() -> Self {
        Sh4Config {
            ram_size: 16 * 1024 * 1024,
            boot_vbr: 0,
            rom_image: None,
            cpu_clock_hz: 200_000_000,
            input_clock_hz: 200_000_000,
            use_translator: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ram_size_is_nonzero() {
        let config = Sh4Config::default();
        assert!(config.ram_size > 0);
        assert!(!config.use_translator);
    }
}
