//! Instruction decoder for the ARM and Thumb instruction sets.
//!
//! Decoding is a pure function of a byte window and a [`Mode`]: it never
//! touches registers or memory, and every encoding the core cannot execute is
//! rejected here rather than at execution time.

mod arm;
mod thumb;

use thiserror::Error;

use crate::encoding::{Condition, Mode, Opcode, OpcodeClass, ShiftKind};
use crate::state::Register;

/// Decoder failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DecodeError {
    /// Encoding is undefined, unpredictable, or outside the supported subset.
    #[error("undefined {mode} instruction {word:#010x}")]
    Undefined {
        /// Raw encoding (Thumb pairs as `first << 16 | second`).
        word: u32,
        /// Mode the bytes were decoded in.
        mode: Mode,
    },
    /// The byte window is shorter than the encoding it starts.
    #[error("{mode} instruction needs {needed} bytes, only {available} available")]
    Truncated {
        /// Mode the bytes were decoded in.
        mode: Mode,
        /// Bytes the encoding requires.
        needed: u8,
        /// Bytes supplied.
        available: usize,
    },
}

/// Second operand of a data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShifterOperand {
    /// Immediate value, already rotated into place.
    Immediate {
        /// Operand value.
        value: u32,
        /// Whether the encoding used a non-zero rotation (the shifter carry-out is then bit 31).
        rotated: bool,
    },
    /// Register shifted by an immediate amount (`0..=32`).
    Register {
        /// Source register.
        rm: Register,
        /// Shift operation.
        shift: ShiftKind,
        /// Shift amount, already normalised (`LSR/ASR #0` encode 32).
        amount: u8,
    },
    /// Register shifted by the bottom byte of another register.
    RegisterShifted {
        /// Source register.
        rm: Register,
        /// Shift operation.
        shift: ShiftKind,
        /// Register holding the shift amount.
        rs: Register,
    },
}

impl ShifterOperand {
    /// Unshifted register operand.
    #[must_use]
    pub const fn register(rm: Register) -> Self {
        Self::Register {
            rm,
            shift: ShiftKind::Lsl,
            amount: 0,
        }
    }

    /// Unrotated immediate operand.
    #[must_use]
    pub const fn immediate(value: u32) -> Self {
        Self::Immediate {
            value,
            rotated: false,
        }
    }
}

/// Offset part of a load/store address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Unsigned immediate byte offset.
    Immediate(u32),
    /// Register offset scaled by an immediate shift.
    Register {
        /// Offset register.
        rm: Register,
        /// Shift operation.
        shift: ShiftKind,
        /// Normalised shift amount.
        amount: u8,
    },
}

/// How the offset combines with the base register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indexing {
    /// Access `base ± offset`, base unchanged.
    Offset,
    /// Access `base ± offset`, then write it back to base.
    PreIndexed,
    /// Access `base`, then write `base ± offset` back to base.
    PostIndexed,
}

/// Complete load/store addressing description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressMode {
    /// Base register.
    pub base: Register,
    /// Offset added to (or subtracted from) the base.
    pub offset: Offset,
    /// Subtract the offset instead of adding it.
    pub subtract: bool,
    /// Indexing and writeback behaviour.
    pub indexing: Indexing,
}

/// Address stepping of a load/store-multiple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BlockMode {
    IncrementAfter,
    IncrementBefore,
    DecrementAfter,
    DecrementBefore,
}

/// Destination of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchTarget {
    /// Signed byte offset from the `PC` operand value.
    Relative(i32),
    /// Interworking target held in a register.
    Register(Register),
}

/// Operand fields of a decoded instruction, by instruction shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operands {
    /// No operands.
    None,
    /// `rd = rn <op> operand`.
    DataProcessing {
        /// Destination register (ignored by test operations).
        rd: Register,
        /// First source register (ignored by moves).
        rn: Register,
        /// Second source operand.
        operand: ShifterOperand,
    },
    /// `rd = rm * rs (+ accumulate)`.
    Multiply {
        /// Destination register.
        rd: Register,
        /// First factor.
        rm: Register,
        /// Second factor.
        rs: Register,
        /// Addend for multiply-accumulate.
        accumulate: Option<Register>,
    },
    /// 16-bit immediate move into the low or high half.
    Wide {
        /// Destination register.
        rd: Register,
        /// Immediate half-word.
        imm16: u16,
    },
    /// Sign or zero extension.
    Extend {
        /// Destination register.
        rd: Register,
        /// Source register.
        rm: Register,
    },
    /// Single load or store.
    Memory {
        /// Transfer register.
        rt: Register,
        /// Addressing description.
        address: AddressMode,
    },
    /// Load or store of a register list.
    Multiple {
        /// Base register.
        rn: Register,
        /// Register list, bit `n` selects `Rn`.
        registers: u16,
        /// Address stepping.
        mode: BlockMode,
        /// Write the final address back to the base.
        writeback: bool,
    },
    /// Branch destination.
    Branch(BranchTarget),
    /// Bare immediate (`SVC` number).
    Immediate(u32),
}

/// Fully validated instruction, ready for execution. Immutable once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedInstruction {
    /// Operation to perform.
    pub opcode: Opcode,
    /// Operand fields.
    pub operands: Operands,
    /// Execution condition.
    pub condition: Condition,
    /// Update `APSR` flags from the result.
    pub set_flags: bool,
    /// Encoded length in bytes.
    pub len: u8,
    /// Mode the instruction was decoded in.
    pub mode: Mode,
}

impl DecodedInstruction {
    /// Returns `true` when executing this instruction may write `PC`.
    #[must_use]
    pub const fn writes_pc(&self) -> bool {
        match self.operands {
            Operands::DataProcessing { rd, .. } => {
                matches!(rd, Register::Pc) && !self.opcode.is_test()
            }
            Operands::Memory { rt, .. } => matches!(rt, Register::Pc) && self.opcode.is_load(),
            Operands::Multiple { registers, .. } => {
                matches!(self.opcode, Opcode::Ldm) && registers & (1 << 15) != 0
            }
            Operands::Branch(_) => true,
            Operands::None
            | Operands::Multiply { .. }
            | Operands::Wide { .. }
            | Operands::Extend { .. }
            | Operands::Immediate(_) => false,
        }
    }

    /// Returns `true` when this instruction terminates a basic block.
    #[must_use]
    pub const fn ends_block(&self) -> bool {
        matches!(
            self.opcode.class(),
            OpcodeClass::Branch | OpcodeClass::Exception
        ) || self.writes_pc()
    }
}

/// Instruction decoder for both instruction-set modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder;

impl Decoder {
    /// Decodes one instruction from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] when `bytes` is shorter than the
    /// encoding and [`DecodeError::Undefined`] for encodings outside the
    /// supported subset.
    pub fn decode(bytes: &[u8], mode: Mode) -> Result<DecodedInstruction, DecodeError> {
        match mode {
            Mode::Arm => {
                let word = read_unit::<4>(bytes, mode)?;
                arm::decode(u32::from_le_bytes(word))
            }
            Mode::Thumb => {
                let first = u16::from_le_bytes(read_unit::<2>(bytes, mode)?);
                if thumb::is_wide_prefix(first) {
                    let pair = read_unit::<4>(bytes, mode)?;
                    thumb::decode_wide(first, u16::from_le_bytes([pair[2], pair[3]]))
                } else {
                    thumb::decode_narrow(first)
                }
            }
        }
    }

    /// Length of the instruction whose first encoding unit is `first_unit`.
    ///
    /// For ARM this is always 4; for Thumb it is 4 for the `BL`/`BLX` prefix
    /// space and 2 otherwise.
    #[must_use]
    pub const fn encoded_len(first_unit: u16, mode: Mode) -> u8 {
        match mode {
            Mode::Arm => 4,
            Mode::Thumb => {
                if thumb::is_wide_prefix(first_unit) {
                    4
                } else {
                    2
                }
            }
        }
    }
}

fn read_unit<const N: usize>(bytes: &[u8], mode: Mode) -> Result<[u8; N], DecodeError> {
    bytes
        .get(..N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or(DecodeError::Truncated {
            mode,
            needed: u8::try_from(N).unwrap_or(u8::MAX),
            available: bytes.len(),
        })
}

/// Sign-extends the low `bits` bits of `value`.
#[allow(clippy::cast_possible_wrap)]
pub(crate) const fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Normalises an immediate shift field: `LSR/ASR #0` mean 32, `ROR #0` means `RRX`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn immediate_shift(kind_bits: u32, amount: u32) -> (ShiftKind, u8) {
    let amount = (amount & 0x1F) as u8;
    match (ShiftKind::from_u2(kind_bits), amount) {
        (ShiftKind::Lsr, 0) => (ShiftKind::Lsr, 32),
        (ShiftKind::Asr, 0) => (ShiftKind::Asr, 32),
        (ShiftKind::Ror, 0) => (ShiftKind::Rrx, 1),
        (kind, amount) => (kind, amount),
    }
}

/// Decoder output before the mode-specific wrapper fills in length and mode.
struct Form {
    opcode: Opcode,
    operands: Operands,
    condition: Condition,
    set_flags: bool,
}

impl Form {
    const fn plain(opcode: Opcode, operands: Operands) -> Self {
        Self {
            opcode,
            operands,
            condition: Condition::Al,
            set_flags: false,
        }
    }

    const fn flags(opcode: Opcode, operands: Operands, set_flags: bool) -> Self {
        Self {
            opcode,
            operands,
            condition: Condition::Al,
            set_flags,
        }
    }

    const fn finish(self, len: u8, mode: Mode) -> DecodedInstruction {
        DecodedInstruction {
            opcode: self.opcode,
            operands: self.operands,
            condition: self.condition,
            set_flags: self.set_flags,
            len,
            mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        immediate_shift, sign_extend, DecodeError, Decoder, Operands, ShifterOperand,
    };
    use crate::encoding::{Condition, Mode, Opcode, ShiftKind};
    use crate::state::Register;

    #[test]
    fn sign_extension_handles_both_signs() {
        assert_eq!(sign_extend(0x1FC, 9), -4);
        assert_eq!(sign_extend(0x0FC, 9), 0xFC);
        assert_eq!(sign_extend(0x3FF_FFFC, 26), -4);
    }

    #[test]
    fn immediate_shift_normalisation() {
        assert_eq!(immediate_shift(0, 0), (ShiftKind::Lsl, 0));
        assert_eq!(immediate_shift(1, 0), (ShiftKind::Lsr, 32));
        assert_eq!(immediate_shift(2, 0), (ShiftKind::Asr, 32));
        assert_eq!(immediate_shift(3, 0), (ShiftKind::Rrx, 1));
        assert_eq!(immediate_shift(3, 4), (ShiftKind::Ror, 4));
    }

    #[test]
    fn truncated_windows_are_reported() {
        assert_eq!(
            Decoder::decode(&[0x37, 0x00, 0xA0], Mode::Arm),
            Err(DecodeError::Truncated {
                mode: Mode::Arm,
                needed: 4,
                available: 3,
            })
        );
        assert_eq!(
            Decoder::decode(&[], Mode::Thumb),
            Err(DecodeError::Truncated {
                mode: Mode::Thumb,
                needed: 2,
                available: 0,
            })
        );
        // BL prefix without its suffix
        assert_eq!(
            Decoder::decode(&[0x00, 0xF0], Mode::Thumb),
            Err(DecodeError::Truncated {
                mode: Mode::Thumb,
                needed: 4,
                available: 2,
            })
        );
    }

    #[test]
    fn same_bytes_decode_differently_per_mode() {
        let bytes = [0x83, 0xB0, 0x00, 0x00];
        let thumb = Decoder::decode(&bytes, Mode::Thumb).expect("sub sp, #0xc");
        assert_eq!(thumb.len, 2);
        assert_eq!(thumb.mode, Mode::Thumb);
        assert_eq!(thumb.opcode, Opcode::Sub);

        let arm = Decoder::decode(&bytes, Mode::Arm);
        assert_eq!(arm.map(|i| i.len).unwrap_or(4), 4);
    }

    #[test]
    fn decoding_is_deterministic() {
        let bytes = [0x83, 0xB0];
        let first = Decoder::decode(&bytes, Mode::Thumb).expect("decodes");
        for _ in 0..16 {
            assert_eq!(Decoder::decode(&bytes, Mode::Thumb), Ok(first));
        }
        assert_eq!(
            first.operands,
            Operands::DataProcessing {
                rd: Register::Sp,
                rn: Register::Sp,
                operand: ShifterOperand::immediate(0xC),
            }
        );
        assert_eq!(first.condition, Condition::Al);
        assert!(!first.set_flags);
    }

    #[test]
    fn encoded_len_follows_prefix_space() {
        assert_eq!(Decoder::encoded_len(0xB083, Mode::Thumb), 2);
        assert_eq!(Decoder::encoded_len(0xF000, Mode::Thumb), 4);
        assert_eq!(Decoder::encoded_len(0xB083, Mode::Arm), 4);
    }
}
