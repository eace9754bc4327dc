//! Host-facing configuration, run results, and context snapshots.

use crate::encoding::Mode;
use crate::state::{HaltReason, RegisterFile};

/// Default upper bound on instructions scanned when sizing a basic block.
pub const DEFAULT_MAX_BLOCK_INSTRUCTIONS: u32 = 512;

/// Top-level configuration for an emulator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EmulatorConfig {
    /// Mode used when a run starts at an even address.
    pub mode: Mode,
    /// Block scan limit for block-hook `size` reporting.
    pub max_block_instructions: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Arm,
            max_block_instructions: DEFAULT_MAX_BLOCK_INSTRUCTIONS,
        }
    }
}

impl EmulatorConfig {
    /// Default configuration starting in `mode`.
    #[must_use]
    pub const fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            max_block_instructions: DEFAULT_MAX_BLOCK_INSTRUCTIONS,
        }
    }
}

/// Per-run limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunOptions {
    /// Maximum number of instructions to execute; `None` runs until `until`.
    pub count: Option<u64>,
}

impl RunOptions {
    /// Limits the run to `count` instructions.
    #[must_use]
    pub const fn count(count: u64) -> Self {
        Self { count: Some(count) }
    }
}

/// Result of executing exactly one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepOutcome {
    /// Address the instruction was fetched from.
    pub address: u32,
    /// Encoded length in bytes.
    pub size: u8,
    /// Mode the instruction executed in.
    pub mode: Mode,
    /// `false` when the condition check failed.
    pub executed: bool,
    /// The instruction started a new basic block.
    pub block_start: bool,
    /// Software interrupt raised by the instruction.
    pub interrupt: Option<u32>,
    /// A hook called [`HookContext::stop`](crate::HookContext::stop).
    pub stop_requested: bool,
}

/// Totals for a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunSummary {
    /// Instructions executed, including condition-failed ones.
    pub instructions: u64,
    /// Basic blocks entered.
    pub blocks: u64,
    /// Why the run ended.
    pub halt: HaltReason,
}

/// Stable context snapshot wire-version identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum ContextVersion {
    /// Initial layout: core registers, `APSR`, mode.
    #[default]
    V1 = 1,
}

impl ContextVersion {
    /// Converts wire value to known context version.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }
}

/// Serializable CPU context used by `context_save` / `context_restore`.
///
/// Memory is not part of the context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuContext {
    /// Snapshot schema version.
    pub version: ContextVersion,
    /// Complete register state, including the mode.
    pub registers: RegisterFile,
}
