//! 32-bit ARM encodings.

use super::{
    immediate_shift, sign_extend, AddressMode, BlockMode, BranchTarget, DecodeError,
    DecodedInstruction, Form, Indexing, Offset, Operands, ShifterOperand,
};
use crate::encoding::{Condition, Mode, Opcode, ShiftKind};
use crate::state::Register;

const fn bit(word: u32, n: u32) -> bool {
    (word >> n) & 1 != 0
}

const fn reg(word: u32, lsb: u32) -> Register {
    Register::core(word >> lsb)
}

pub(super) fn decode(word: u32) -> Result<DecodedInstruction, DecodeError> {
    let undefined = DecodeError::Undefined {
        word,
        mode: Mode::Arm,
    };

    let Some(condition) = Condition::from_u4(word >> 28) else {
        return decode_unconditional(word)
            .map(|form| form.finish(4, Mode::Arm))
            .ok_or(undefined);
    };

    let form = match (word >> 25) & 0b111 {
        0b000 => decode_group_zero(word),
        0b001 => decode_immediate_group(word),
        0b010 | 0b011 => decode_single_transfer(word),
        0b100 => decode_block_transfer(word),
        0b101 => Some(Form::plain(
            if bit(word, 24) { Opcode::Bl } else { Opcode::B },
            Operands::Branch(BranchTarget::Relative(sign_extend(
                (word & 0x00FF_FFFF) << 2,
                26,
            ))),
        )),
        0b111 if bit(word, 24) => Some(Form::plain(
            Opcode::Svc,
            Operands::Immediate(word & 0x00FF_FFFF),
        )),
        _ => None,
    };

    form.map(|form| Form { condition, ..form }.finish(4, Mode::Arm))
        .ok_or(undefined)
}

// Only BLX (immediate) lives in the unconditional space here.
fn decode_unconditional(word: u32) -> Option<Form> {
    if (word >> 25) & 0b111 != 0b101 {
        return None;
    }
    let halfword = ((word >> 24) & 1) << 1;
    let offset = sign_extend(((word & 0x00FF_FFFF) << 2) | halfword, 26);
    Some(Form::plain(
        Opcode::Blx,
        Operands::Branch(BranchTarget::Relative(offset)),
    ))
}

fn decode_group_zero(word: u32) -> Option<Form> {
    if word & 0x0FC0_00F0 == 0x0000_0090 {
        return decode_multiply(word);
    }
    if word & 0x90 == 0x90 {
        return decode_extra_transfer(word);
    }
    if word & 0x0F90_0000 == 0x0100_0000 {
        return decode_misc(word);
    }

    let rm = reg(word, 0);
    let kind_bits = (word >> 5) & 0b11;
    let operand = if bit(word, 4) {
        let rs = reg(word, 8);
        if matches!(rm, Register::Pc)
            || matches!(rs, Register::Pc)
            || matches!(reg(word, 12), Register::Pc)
            || matches!(reg(word, 16), Register::Pc)
        {
            return None;
        }
        ShifterOperand::RegisterShifted {
            rm,
            shift: ShiftKind::from_u2(kind_bits),
            rs,
        }
    } else {
        let (shift, amount) = immediate_shift(kind_bits, word >> 7);
        ShifterOperand::Register { rm, shift, amount }
    };

    data_processing(word, operand)
}

fn decode_immediate_group(word: u32) -> Option<Form> {
    if word & 0x0FFF_00FF == 0x0320_F000 {
        return Some(Form::plain(Opcode::Nop, Operands::None));
    }

    let wide = match word & 0x0FF0_0000 {
        0x0300_0000 => Some(Opcode::Movw),
        0x0340_0000 => Some(Opcode::Movt),
        _ => None,
    };
    if let Some(opcode) = wide {
        let rd = reg(word, 12);
        if matches!(rd, Register::Pc) {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let imm16 = (((word >> 4) & 0xF000) | (word & 0x0FFF)) as u16;
        return Some(Form::plain(opcode, Operands::Wide { rd, imm16 }));
    }

    if word & 0x0190_0000 == 0x0100_0000 {
        // MSR immediate and the remaining hint space.
        return None;
    }

    let rotation = ((word >> 8) & 0xF) * 2;
    let operand = ShifterOperand::Immediate {
        value: (word & 0xFF).rotate_right(rotation),
        rotated: rotation != 0,
    };
    data_processing(word, operand)
}

fn data_processing(word: u32, operand: ShifterOperand) -> Option<Form> {
    let opcode = Opcode::data_processing(word >> 21);
    let set_flags = bit(word, 20);
    let rd = reg(word, 12);

    // Flag-setting writes to PC are exception returns, which need banked state.
    if set_flags && matches!(rd, Register::Pc) && !opcode.is_test() {
        return None;
    }

    Some(Form::flags(
        opcode,
        Operands::DataProcessing {
            rd,
            rn: reg(word, 16),
            operand,
        },
        set_flags,
    ))
}

fn decode_multiply(word: u32) -> Option<Form> {
    let rd = reg(word, 16);
    let acc = reg(word, 12);
    let rs = reg(word, 8);
    let rm = reg(word, 0);
    let accumulate = bit(word, 21);

    if [rd, rs, rm].iter().any(|r| matches!(r, Register::Pc))
        || (accumulate && matches!(acc, Register::Pc))
    {
        return None;
    }

    Some(Form::flags(
        if accumulate { Opcode::Mla } else { Opcode::Mul },
        Operands::Multiply {
            rd,
            rm,
            rs,
            accumulate: accumulate.then_some(acc),
        },
        bit(word, 20),
    ))
}

fn decode_misc(word: u32) -> Option<Form> {
    let opcode = match word & 0x0FFF_FFF0 {
        0x012F_FF10 => Opcode::Bx,
        0x012F_FF30 => Opcode::Blx,
        _ => return None,
    };
    let rm = reg(word, 0);
    if matches!(opcode, Opcode::Blx) && matches!(rm, Register::Pc) {
        return None;
    }
    Some(Form::plain(
        opcode,
        Operands::Branch(BranchTarget::Register(rm)),
    ))
}

fn indexing(word: u32) -> Option<Indexing> {
    match (bit(word, 24), bit(word, 21)) {
        (true, false) => Some(Indexing::Offset),
        (true, true) => Some(Indexing::PreIndexed),
        (false, false) => Some(Indexing::PostIndexed),
        // Unprivileged (T) variants.
        (false, true) => None,
    }
}

fn transfer(opcode: Opcode, word: u32, offset: Offset) -> Option<Form> {
    let indexing = indexing(word)?;
    let base = reg(word, 16);
    let rt = reg(word, 12);

    if !matches!(indexing, Indexing::Offset)
        && (matches!(base, Register::Pc) || base == rt)
    {
        return None;
    }
    if let Offset::Register { rm, .. } = offset {
        if matches!(rm, Register::Pc) {
            return None;
        }
    }

    Some(Form::plain(
        opcode,
        Operands::Memory {
            rt,
            address: AddressMode {
                base,
                offset,
                subtract: !bit(word, 23),
                indexing,
            },
        },
    ))
}

fn decode_extra_transfer(word: u32) -> Option<Form> {
    let load = bit(word, 20);
    let opcode = match ((word >> 5) & 0b11, load) {
        (0b01, false) => Opcode::Strh,
        (0b01, true) => Opcode::Ldrh,
        (0b10, true) => Opcode::Ldrsb,
        (0b11, true) => Opcode::Ldrsh,
        // Swaps and doubleword transfers.
        _ => return None,
    };
    if matches!(reg(word, 12), Register::Pc) {
        return None;
    }

    let offset = if bit(word, 22) {
        Offset::Immediate(((word >> 4) & 0xF0) | (word & 0xF))
    } else {
        Offset::Register {
            rm: reg(word, 0),
            shift: ShiftKind::Lsl,
            amount: 0,
        }
    };
    transfer(opcode, word, offset)
}

fn decode_single_transfer(word: u32) -> Option<Form> {
    let register_offset = bit(word, 25);
    if register_offset && bit(word, 4) {
        // Media instructions.
        return None;
    }

    let opcode = match (bit(word, 22), bit(word, 20)) {
        (false, false) => Opcode::Str,
        (false, true) => Opcode::Ldr,
        (true, false) => Opcode::Strb,
        (true, true) => Opcode::Ldrb,
    };
    if opcode.access_size() == 1 && matches!(reg(word, 12), Register::Pc) {
        return None;
    }

    let offset = if register_offset {
        let (shift, amount) = immediate_shift((word >> 5) & 0b11, word >> 7);
        Offset::Register {
            rm: reg(word, 0),
            shift,
            amount,
        }
    } else {
        Offset::Immediate(word & 0x0FFF)
    };
    transfer(opcode, word, offset)
}

fn decode_block_transfer(word: u32) -> Option<Form> {
    let rn = reg(word, 16);
    #[allow(clippy::cast_possible_truncation)]
    let registers = (word & 0xFFFF) as u16;
    // User-bank transfers are not modelled.
    if bit(word, 22) || registers == 0 || matches!(rn, Register::Pc) {
        return None;
    }

    let mode = match (bit(word, 24), bit(word, 23)) {
        (false, true) => BlockMode::IncrementAfter,
        (true, true) => BlockMode::IncrementBefore,
        (false, false) => BlockMode::DecrementAfter,
        (true, false) => BlockMode::DecrementBefore,
    };

    Some(Form::plain(
        if bit(word, 20) { Opcode::Ldm } else { Opcode::Stm },
        Operands::Multiple {
            rn,
            registers,
            mode,
            writeback: bit(word, 21),
        },
    ))
}
