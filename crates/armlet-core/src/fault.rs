use thiserror::Error;

use crate::decoder::DecodeError;
use crate::hooks::HookError;
use crate::memory::{AccessError, AccessKind, MemoryError};
use crate::state::RegisterError;

/// Fault classes used for aggregation and host policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Decoder rejected an instruction encoding.
    Decode,
    /// Fetch or data access hit unmapped or protected memory.
    Memory,
    /// Software interrupt with nobody to service it.
    Interrupt,
    /// A registered trace hook returned an error.
    Hook,
}

/// Stable fault taxonomy for conditions that terminate an emulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultCode {
    /// Undefined or unsupported instruction encoding.
    #[error("illegal instruction encoding")]
    IllegalEncoding = 0x01,
    /// Instruction fetch from an address with no mapped region.
    #[error("instruction fetch from unmapped memory")]
    UnmappedFetch = 0x02,
    /// Instruction fetch from a region without execute permission.
    #[error("instruction fetch from non-executable memory")]
    NonExecutableFetch = 0x03,
    /// Data load from an address with no mapped region.
    #[error("read from unmapped memory")]
    UnmappedRead = 0x04,
    /// Data store to an address with no mapped region.
    #[error("write to unmapped memory")]
    UnmappedWrite = 0x05,
    /// Data load from a region without read permission.
    #[error("read from non-readable memory")]
    ProtectedRead = 0x06,
    /// Data store to a region without write permission.
    #[error("write to non-writable memory")]
    ProtectedWrite = 0x07,
    /// `SVC` executed while no interrupt hook was registered.
    #[error("unhandled software interrupt")]
    UnhandledInterrupt = 0x08,
    /// A trace hook reported failure.
    #[error("trace hook failed")]
    HookFailed = 0x09,
}

impl FaultCode {
    /// Converts a fault code to its stable byte value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte value back into a fault code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalEncoding),
            0x02 => Some(Self::UnmappedFetch),
            0x03 => Some(Self::NonExecutableFetch),
            0x04 => Some(Self::UnmappedRead),
            0x05 => Some(Self::UnmappedWrite),
            0x06 => Some(Self::ProtectedRead),
            0x07 => Some(Self::ProtectedWrite),
            0x08 => Some(Self::UnhandledInterrupt),
            0x09 => Some(Self::HookFailed),
            _ => None,
        }
    }

    /// Returns the fault class for this fault code.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::IllegalEncoding => FaultClass::Decode,
            Self::UnmappedFetch
            | Self::NonExecutableFetch
            | Self::UnmappedRead
            | Self::UnmappedWrite
            | Self::ProtectedRead
            | Self::ProtectedWrite => FaultClass::Memory,
            Self::UnhandledInterrupt => FaultClass::Interrupt,
            Self::HookFailed => FaultClass::Hook,
        }
    }

    /// Maps a failed engine access to its fault code.
    #[must_use]
    pub const fn for_access_error(error: &AccessError) -> Self {
        match error {
            AccessError::Protected { access, .. } => match access {
                AccessKind::Fetch => Self::NonExecutableFetch,
                AccessKind::Read => Self::ProtectedRead,
                AccessKind::Write => Self::ProtectedWrite,
            },
            AccessError::Unmapped { access, .. } => match access {
                AccessKind::Fetch => Self::UnmappedFetch,
                AccessKind::Read => Self::UnmappedRead,
                AccessKind::Write => Self::UnmappedWrite,
            },
        }
    }
}

/// A latched fault: what went wrong and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{code} at pc {pc:#010x}")]
pub struct Fault {
    /// Fault taxonomy code.
    pub code: FaultCode,
    /// Address of the instruction that faulted.
    pub pc: u32,
    /// Data or fetch address involved, when the fault is memory related.
    pub address: Option<u32>,
}

impl Fault {
    /// Creates a fault without an associated data address.
    #[must_use]
    pub const fn new(code: FaultCode, pc: u32) -> Self {
        Self {
            code,
            pc,
            address: None,
        }
    }

    /// Creates a fault from a failed engine access.
    #[must_use]
    pub const fn from_access(pc: u32, error: &AccessError) -> Self {
        Self {
            code: FaultCode::for_access_error(error),
            pc,
            address: Some(error.address()),
        }
    }
}

/// Top-level error surfaced by fallible emulator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmuError {
    /// Host-side memory operation failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Host-side register access failed.
    #[error(transparent)]
    Register(#[from] RegisterError),
    /// Raw decode request failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The run stopped on a fault; state is left as it was before the faulting instruction.
    #[error("emulation faulted: {0}")]
    Fault(Fault),
    /// A hook failed; the engine is latched in the faulted state.
    #[error("emulation faulted: {fault}")]
    HookFailed {
        /// The latched fault record.
        fault: Fault,
        /// The error returned by the hook.
        #[source]
        source: HookError,
    },
}

impl EmuError {
    /// Returns the latched fault when this error ended an emulation run.
    #[must_use]
    pub const fn fault(&self) -> Option<Fault> {
        match self {
            Self::Fault(fault) | Self::HookFailed { fault, .. } => Some(*fault),
            Self::Memory(_) | Self::Register(_) | Self::Decode(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EmuError, Fault, FaultClass, FaultCode};
    use crate::hooks::HookError;
    use crate::memory::{AccessError, AccessKind, MemoryError};

    #[test]
    fn stable_code_roundtrip_is_bijective_for_defined_values() {
        for code in 0x01u8..=0x09 {
            let fault = FaultCode::from_u8(code).expect("defined taxonomy code");
            assert_eq!(fault.as_u8(), code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(FaultCode::from_u8(0x00).is_none());
        assert!(FaultCode::from_u8(0x0A).is_none());
        assert!(FaultCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn class_mapping_matches_fault_taxonomy() {
        assert_eq!(FaultCode::IllegalEncoding.class(), FaultClass::Decode);
        assert_eq!(FaultCode::UnmappedFetch.class(), FaultClass::Memory);
        assert_eq!(FaultCode::ProtectedWrite.class(), FaultClass::Memory);
        assert_eq!(FaultCode::UnhandledInterrupt.class(), FaultClass::Interrupt);
        assert_eq!(FaultCode::HookFailed.class(), FaultClass::Hook);
    }

    #[test]
    fn memory_errors_map_by_access_kind() {
        let unmapped_write = AccessError::Unmapped {
            address: 0x20,
            len: 4,
            access: AccessKind::Write,
        };
        let fault = Fault::from_access(0x1000, &unmapped_write);
        assert_eq!(fault.code, FaultCode::UnmappedWrite);
        assert_eq!(fault.address, Some(0x20));
        assert_eq!(fault.pc, 0x1000);

        let protected_fetch = AccessError::Protected {
            address: 0x40,
            len: 2,
            access: AccessKind::Fetch,
        };
        assert_eq!(
            FaultCode::for_access_error(&protected_fetch),
            FaultCode::NonExecutableFetch
        );
    }

    #[test]
    fn fault_display_names_code_and_pc() {
        let fault = Fault::new(FaultCode::IllegalEncoding, 0x0001_0000);
        assert_eq!(
            fault.to_string(),
            "illegal instruction encoding at pc 0x00010000"
        );
    }

    #[test]
    fn only_run_errors_carry_a_fault() {
        let fault = Fault::new(FaultCode::HookFailed, 4);
        let hook = EmuError::HookFailed {
            fault,
            source: HookError::new("boom"),
        };
        assert_eq!(hook.fault(), Some(fault));
        assert_eq!(EmuError::Fault(fault).fault(), Some(fault));

        let mapping = EmuError::Memory(MemoryError::NotMapped {
            address: 0,
            size: 0x1000,
        });
        assert!(mapping.fault().is_none());
    }
}
