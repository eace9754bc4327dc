use crate::fault::Fault;

/// Why a run ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HaltReason {
    /// The program counter reached the requested end address.
    UntilReached,
    /// The configured instruction count was exhausted.
    CountExhausted,
    /// A hook asked the engine to stop.
    StopRequested,
}

/// Engine execution-state machine: `Ready -> Running -> {Halted, Faulted}`.
///
/// A halted or faulted engine may be started again; the previous state is
/// left in place for inspection until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EngineState {
    /// Created and not yet started.
    #[default]
    Ready,
    /// Executing instructions.
    Running,
    /// Stopped cleanly.
    Halted(HaltReason),
    /// Stopped on a fault; registers and memory reflect the last committed instruction.
    Faulted(Fault),
}

impl EngineState {
    /// Returns the latched fault, if this state is faulted.
    #[must_use]
    pub const fn fault(self) -> Option<Fault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            Self::Ready | Self::Running | Self::Halted(_) => None,
        }
    }

    /// Returns `true` when a run has ended, cleanly or not.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Halted(_) | Self::Faulted(_))
    }
}
