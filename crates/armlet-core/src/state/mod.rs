//! Architectural CPU state and engine run-state primitives.

/// Register file types and storage model.
pub mod registers;
/// Engine execution-state machine.
pub mod run_state;

pub use registers::{Register, RegisterError, RegisterFile};
pub use run_state::{EngineState, HaltReason};
