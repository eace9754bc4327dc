use std::fmt;

use crate::state::registers::{APSR_C, APSR_N, APSR_V, APSR_Z};

/// Instruction-set mode: selects the encoding width and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Mode {
    /// 32-bit fixed-width ARM encodings.
    #[default]
    Arm,
    /// 16-bit Thumb encodings (plus the 32-bit `BL`/`BLX` pair).
    Thumb,
}

impl Mode {
    /// Width of the basic encoding unit in bytes.
    #[must_use]
    pub const fn unit_bytes(self) -> u8 {
        match self {
            Self::Arm => 4,
            Self::Thumb => 2,
        }
    }

    /// Offset added to the instruction address when `PC` is read as an operand.
    #[must_use]
    pub const fn pc_read_offset(self) -> u32 {
        match self {
            Self::Arm => 8,
            Self::Thumb => 4,
        }
    }

    /// Mode selected by bit 0 of an interworking branch target.
    #[must_use]
    pub const fn from_target(target: u32) -> Self {
        if target & 1 == 0 {
            Self::Arm
        } else {
            Self::Thumb
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Arm => "ARM",
            Self::Thumb => "Thumb",
        })
    }
}

/// Condition field evaluated against the `APSR` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Condition {
    Eq = 0x0,
    Ne = 0x1,
    Cs = 0x2,
    Cc = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    Al = 0xE,
}

impl Condition {
    /// Converts a 4-bit condition field; `0b1111` is not a condition.
    #[must_use]
    pub const fn from_u4(bits: u32) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Eq),
            0x1 => Some(Self::Ne),
            0x2 => Some(Self::Cs),
            0x3 => Some(Self::Cc),
            0x4 => Some(Self::Mi),
            0x5 => Some(Self::Pl),
            0x6 => Some(Self::Vs),
            0x7 => Some(Self::Vc),
            0x8 => Some(Self::Hi),
            0x9 => Some(Self::Ls),
            0xA => Some(Self::Ge),
            0xB => Some(Self::Lt),
            0xC => Some(Self::Gt),
            0xD => Some(Self::Le),
            0xE => Some(Self::Al),
            _ => None,
        }
    }

    /// Returns `true` when the condition holds for the given `APSR` value.
    #[must_use]
    pub const fn passed(self, apsr: u32) -> bool {
        let n = apsr & APSR_N != 0;
        let z = apsr & APSR_Z != 0;
        let c = apsr & APSR_C != 0;
        let v = apsr & APSR_V != 0;

        match self {
            Self::Eq => z,
            Self::Ne => !z,
            Self::Cs => c,
            Self::Cc => !c,
            Self::Mi => n,
            Self::Pl => !n,
            Self::Vs => v,
            Self::Vc => !v,
            Self::Hi => c && !z,
            Self::Ls => !c || z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
            Self::Al => true,
        }
    }
}

/// Barrel-shifter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
    /// Rotate right by one through carry.
    Rrx,
}

impl ShiftKind {
    /// Converts the 2-bit shift-type field.
    #[must_use]
    pub const fn from_u2(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

/// Broad instruction classes used for dispatch and block analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OpcodeClass {
    DataProcessing,
    Multiply,
    WideMove,
    Extend,
    LoadStore,
    LoadStoreMultiple,
    Branch,
    Exception,
    Hint,
}

/// Operations the core knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
    /// `PC`-relative address: `Add` with the `PC` operand word-aligned.
    Adr,
    Mul,
    Mla,
    Movw,
    Movt,
    Sxth,
    Sxtb,
    Uxth,
    Uxtb,
    Ldr,
    Str,
    Ldrb,
    Strb,
    Ldrh,
    Strh,
    Ldrsb,
    Ldrsh,
    Ldm,
    Stm,
    B,
    Bl,
    Bx,
    Blx,
    Svc,
    Nop,
}

/// ARM data-processing opcode field (bits 24..21) to operation.
///
/// The Thumb data-processing forms reuse the same operations.
pub const DATA_PROCESSING_TABLE: [Opcode; 16] = [
    Opcode::And,
    Opcode::Eor,
    Opcode::Sub,
    Opcode::Rsb,
    Opcode::Add,
    Opcode::Adc,
    Opcode::Sbc,
    Opcode::Rsc,
    Opcode::Tst,
    Opcode::Teq,
    Opcode::Cmp,
    Opcode::Cmn,
    Opcode::Orr,
    Opcode::Mov,
    Opcode::Bic,
    Opcode::Mvn,
];

impl Opcode {
    /// Looks up the data-processing operation for a 4-bit opcode field.
    #[must_use]
    pub const fn data_processing(bits: u32) -> Self {
        DATA_PROCESSING_TABLE[(bits & 0xF) as usize]
    }

    /// Returns the dispatch class for this operation.
    #[must_use]
    pub const fn class(self) -> OpcodeClass {
        match self {
            Self::And
            | Self::Eor
            | Self::Sub
            | Self::Rsb
            | Self::Add
            | Self::Adc
            | Self::Sbc
            | Self::Rsc
            | Self::Tst
            | Self::Teq
            | Self::Cmp
            | Self::Cmn
            | Self::Orr
            | Self::Mov
            | Self::Bic
            | Self::Mvn
            | Self::Adr => OpcodeClass::DataProcessing,
            Self::Mul | Self::Mla => OpcodeClass::Multiply,
            Self::Movw | Self::Movt => OpcodeClass::WideMove,
            Self::Sxth | Self::Sxtb | Self::Uxth | Self::Uxtb => OpcodeClass::Extend,
            Self::Ldr
            | Self::Str
            | Self::Ldrb
            | Self::Strb
            | Self::Ldrh
            | Self::Strh
            | Self::Ldrsb
            | Self::Ldrsh => OpcodeClass::LoadStore,
            Self::Ldm | Self::Stm => OpcodeClass::LoadStoreMultiple,
            Self::B | Self::Bl | Self::Bx | Self::Blx => OpcodeClass::Branch,
            Self::Svc => OpcodeClass::Exception,
            Self::Nop => OpcodeClass::Hint,
        }
    }

    /// Data-processing operations that only update flags.
    #[must_use]
    pub const fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }

    /// Loads (as opposed to stores) among the load/store operations.
    #[must_use]
    pub const fn is_load(self) -> bool {
        matches!(
            self,
            Self::Ldr | Self::Ldrb | Self::Ldrh | Self::Ldrsb | Self::Ldrsh | Self::Ldm
        )
    }

    /// Transfer width in bytes for single load/store operations.
    #[must_use]
    pub const fn access_size(self) -> u8 {
        match self {
            Self::Ldrb | Self::Strb | Self::Ldrsb => 1,
            Self::Ldrh | Self::Strh | Self::Ldrsh => 2,
            _ => 4,
        }
    }
}
