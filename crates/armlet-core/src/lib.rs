//! Core ARM/Thumb instruction emulator for armlet.
//!
//! An [`Emulator`] owns a sparse guest address space, a register file, and a
//! set of trace hooks. Programs are written into mapped memory and run with
//! [`Emulator::start`] or [`Emulator::step`].

/// Sparse guest address space with per-region permissions.
pub mod memory;
pub use memory::{
    AccessError, AccessKind, Memory, MemoryError, MemoryRegion, Permissions, PAGE_SIZE,
};

/// Host-facing configuration, run results, and context snapshots.
pub mod api;
pub use api::{
    ContextVersion, CpuContext, EmulatorConfig, RunOptions, RunSummary, StepOutcome,
    DEFAULT_MAX_BLOCK_INSTRUCTIONS,
};

/// Architectural CPU state and engine run-state primitives.
pub mod state;
pub use state::{EngineState, HaltReason, Register, RegisterError, RegisterFile};

/// Instruction-set modes, condition codes, and opcode classification.
pub mod encoding;
pub use encoding::{Condition, Mode, Opcode, OpcodeClass, ShiftKind};

/// ARM and Thumb instruction decoding.
pub mod decoder;
pub use decoder::{DecodeError, DecodedInstruction, Decoder, Operands};

/// Fault taxonomy and the top-level error type.
pub mod fault;
pub use fault::{EmuError, Fault, FaultClass, FaultCode};

/// Instruction execution pipeline.
pub mod execute;
pub use execute::{commit_execution, execute_instruction, ExecuteState, FlagsUpdate};

/// Trace hook traits and dispatch.
pub mod hooks;
pub use hooks::{
    AddressRange, BlockHook, CodeHook, HookContext, HookError, HookId, HookKind, InterruptHook,
    MemoryAccess, MemoryHook,
};

/// The fetch/decode/execute loop.
pub mod engine;
pub use engine::Emulator;

#[cfg(test)]
use proptest as _;
