//! 16-bit Thumb encodings and the 32-bit `BL`/`BLX` pair.

use super::{
    immediate_shift, sign_extend, AddressMode, BlockMode, BranchTarget, DecodeError,
    DecodedInstruction, Form, Indexing, Offset, Operands, ShifterOperand,
};
use crate::encoding::{Condition, Mode, Opcode, ShiftKind};
use crate::state::Register;

const REGISTER_OFFSET_OPS: [Opcode; 8] = [
    Opcode::Str,
    Opcode::Strh,
    Opcode::Strb,
    Opcode::Ldrsb,
    Opcode::Ldr,
    Opcode::Ldrh,
    Opcode::Ldrb,
    Opcode::Ldrsh,
];

const EXTEND_OPS: [Opcode; 4] = [Opcode::Sxth, Opcode::Sxtb, Opcode::Uxth, Opcode::Uxtb];

const fn bit(hw: u16, n: u32) -> bool {
    (hw >> n) & 1 != 0
}

#[allow(clippy::cast_lossless)]
const fn low(hw: u16, lsb: u32) -> Register {
    Register::core(((hw >> lsb) & 0x7) as u32)
}

/// First half-words in `0b11101..=0b11111 << 11` start a 32-bit encoding.
pub(super) const fn is_wide_prefix(hw: u16) -> bool {
    hw >> 11 >= 0b11101
}

pub(super) fn decode_narrow(hw: u16) -> Result<DecodedInstruction, DecodeError> {
    let form = match hw >> 13 {
        0b000 => Some(shift_or_add_sub(hw)),
        0b001 => Some(immediate_op(hw)),
        0b010 => group_two(hw),
        0b011 => Some(immediate_transfer(hw)),
        0b100 => Some(halfword_or_sp_transfer(hw)),
        0b101 => address_or_misc(hw),
        0b110 => multiple_or_branch(hw),
        _ if hw >> 11 == 0b11100 => Some(Form::plain(
            Opcode::B,
            Operands::Branch(BranchTarget::Relative(sign_extend(
                u32::from(hw & 0x07FF) << 1,
                12,
            ))),
        )),
        _ => None,
    };

    form.map(|form| form.finish(2, Mode::Thumb))
        .ok_or(DecodeError::Undefined {
            word: u32::from(hw),
            mode: Mode::Thumb,
        })
}

pub(super) fn decode_wide(first: u16, second: u16) -> Result<DecodedInstruction, DecodeError> {
    let undefined = DecodeError::Undefined {
        word: (u32::from(first) << 16) | u32::from(second),
        mode: Mode::Thumb,
    };
    if first >> 11 != 0b11110 {
        return Err(undefined);
    }

    let opcode = match second >> 11 {
        0b11111 => Opcode::Bl,
        // BLX targets ARM code, so the offset must be word aligned.
        0b11101 if second & 1 == 0 => Opcode::Blx,
        _ => return Err(undefined),
    };
    let offset = sign_extend(
        (u32::from(first & 0x07FF) << 12) | (u32::from(second & 0x07FF) << 1),
        23,
    );

    Ok(Form::plain(opcode, Operands::Branch(BranchTarget::Relative(offset))).finish(4, Mode::Thumb))
}

fn shift_or_add_sub(hw: u16) -> Form {
    let rd = low(hw, 0);
    let rn = low(hw, 3);

    if (hw >> 11) & 0b11 == 0b11 {
        let operand = if bit(hw, 10) {
            ShifterOperand::immediate(u32::from((hw >> 6) & 0x7))
        } else {
            ShifterOperand::register(low(hw, 6))
        };
        let opcode = if bit(hw, 9) { Opcode::Sub } else { Opcode::Add };
        return Form::flags(opcode, Operands::DataProcessing { rd, rn, operand }, true);
    }

    let (shift, amount) = immediate_shift(u32::from((hw >> 11) & 0b11), u32::from(hw >> 6));
    Form::flags(
        Opcode::Mov,
        Operands::DataProcessing {
            rd,
            rn: rd,
            operand: ShifterOperand::Register {
                rm: rn,
                shift,
                amount,
            },
        },
        true,
    )
}

fn immediate_op(hw: u16) -> Form {
    let rd = low(hw, 8);
    let opcode = match (hw >> 11) & 0b11 {
        0 => Opcode::Mov,
        1 => Opcode::Cmp,
        2 => Opcode::Add,
        _ => Opcode::Sub,
    };
    Form::flags(
        opcode,
        Operands::DataProcessing {
            rd,
            rn: rd,
            operand: ShifterOperand::immediate(u32::from(hw & 0xFF)),
        },
        true,
    )
}

fn group_two(hw: u16) -> Option<Form> {
    match hw >> 10 {
        0b01_0000 => Some(alu(hw)),
        0b01_0001 => high_register(hw),
        _ if hw >> 11 == 0b01001 => Some(Form::plain(
            Opcode::Ldr,
            Operands::Memory {
                rt: low(hw, 8),
                address: AddressMode {
                    base: Register::Pc,
                    offset: Offset::Immediate(u32::from(hw & 0xFF) * 4),
                    subtract: false,
                    indexing: Indexing::Offset,
                },
            },
        )),
        _ => Some(Form::plain(
            REGISTER_OFFSET_OPS[usize::from((hw >> 9) & 0x7)],
            Operands::Memory {
                rt: low(hw, 0),
                address: AddressMode {
                    base: low(hw, 3),
                    offset: Offset::Register {
                        rm: low(hw, 6),
                        shift: ShiftKind::Lsl,
                        amount: 0,
                    },
                    subtract: false,
                    indexing: Indexing::Offset,
                },
            },
        )),
    }
}

fn alu(hw: u16) -> Form {
    let rdn = low(hw, 0);
    let rm = low(hw, 3);
    let shifted = |shift| Operands::DataProcessing {
        rd: rdn,
        rn: rdn,
        operand: ShifterOperand::RegisterShifted { rm: rdn, shift, rs: rm },
    };

    let (opcode, operands) = match (hw >> 6) & 0xF {
        0x2 => (Opcode::Mov, shifted(ShiftKind::Lsl)),
        0x3 => (Opcode::Mov, shifted(ShiftKind::Lsr)),
        0x4 => (Opcode::Mov, shifted(ShiftKind::Asr)),
        0x7 => (Opcode::Mov, shifted(ShiftKind::Ror)),
        0x9 => (
            Opcode::Rsb,
            Operands::DataProcessing {
                rd: rdn,
                rn: rm,
                operand: ShifterOperand::immediate(0),
            },
        ),
        0xD => (
            Opcode::Mul,
            Operands::Multiply {
                rd: rdn,
                rm,
                rs: rdn,
                accumulate: None,
            },
        ),
        op => {
            let opcode = match op {
                0x0 => Opcode::And,
                0x1 => Opcode::Eor,
                0x5 => Opcode::Adc,
                0x6 => Opcode::Sbc,
                0x8 => Opcode::Tst,
                0xA => Opcode::Cmp,
                0xB => Opcode::Cmn,
                0xC => Opcode::Orr,
                0xE => Opcode::Bic,
                _ => Opcode::Mvn,
            };
            (
                opcode,
                Operands::DataProcessing {
                    rd: rdn,
                    rn: rdn,
                    operand: ShifterOperand::register(rm),
                },
            )
        }
    };
    Form::flags(opcode, operands, true)
}

fn high_register(hw: u16) -> Option<Form> {
    let rm = Register::core(u32::from((hw >> 3) & 0xF));
    let rdn = Register::core(u32::from(((hw >> 4) & 0x8) | (hw & 0x7)));
    let operands = Operands::DataProcessing {
        rd: rdn,
        rn: rdn,
        operand: ShifterOperand::register(rm),
    };

    match (hw >> 8) & 0b11 {
        0 => Some(Form::plain(Opcode::Add, operands)),
        1 if rm != Register::Pc && rdn != Register::Pc => {
            Some(Form::flags(Opcode::Cmp, operands, true))
        }
        2 => Some(Form::plain(Opcode::Mov, operands)),
        3 if hw & 0x7 == 0 => {
            let opcode = if bit(hw, 7) { Opcode::Blx } else { Opcode::Bx };
            if opcode == Opcode::Blx && rm == Register::Pc {
                return None;
            }
            Some(Form::plain(
                opcode,
                Operands::Branch(BranchTarget::Register(rm)),
            ))
        }
        _ => None,
    }
}

fn immediate_transfer(hw: u16) -> Form {
    let byte = bit(hw, 12);
    let opcode = match (byte, bit(hw, 11)) {
        (false, false) => Opcode::Str,
        (false, true) => Opcode::Ldr,
        (true, false) => Opcode::Strb,
        (true, true) => Opcode::Ldrb,
    };
    let imm5 = u32::from((hw >> 6) & 0x1F);
    let scale = if byte { 1 } else { 4 };
    Form::plain(opcode, memory(low(hw, 0), low(hw, 3), imm5 * scale))
}

fn halfword_or_sp_transfer(hw: u16) -> Form {
    let load = bit(hw, 11);
    if bit(hw, 12) {
        let opcode = if load { Opcode::Ldr } else { Opcode::Str };
        Form::plain(
            opcode,
            memory(low(hw, 8), Register::Sp, u32::from(hw & 0xFF) * 4),
        )
    } else {
        let opcode = if load { Opcode::Ldrh } else { Opcode::Strh };
        Form::plain(
            opcode,
            memory(low(hw, 0), low(hw, 3), u32::from((hw >> 6) & 0x1F) * 2),
        )
    }
}

const fn memory(rt: Register, base: Register, offset: u32) -> Operands {
    Operands::Memory {
        rt,
        address: AddressMode {
            base,
            offset: Offset::Immediate(offset),
            subtract: false,
            indexing: Indexing::Offset,
        },
    }
}

fn address_or_misc(hw: u16) -> Option<Form> {
    if !bit(hw, 12) {
        let (opcode, rn) = if bit(hw, 11) {
            (Opcode::Add, Register::Sp)
        } else {
            (Opcode::Adr, Register::Pc)
        };
        return Some(Form::plain(
            opcode,
            Operands::DataProcessing {
                rd: low(hw, 8),
                rn,
                operand: ShifterOperand::immediate(u32::from(hw & 0xFF) * 4),
            },
        ));
    }

    match (hw >> 8) & 0xF {
        0x0 => Some(Form::plain(
            if bit(hw, 7) { Opcode::Sub } else { Opcode::Add },
            Operands::DataProcessing {
                rd: Register::Sp,
                rn: Register::Sp,
                operand: ShifterOperand::immediate(u32::from(hw & 0x7F) * 4),
            },
        )),
        0x2 => Some(Form::plain(
            EXTEND_OPS[usize::from((hw >> 6) & 0b11)],
            Operands::Extend {
                rd: low(hw, 0),
                rm: low(hw, 3),
            },
        )),
        0x4 | 0x5 => Some(Form::plain(
            Opcode::Stm,
            Operands::Multiple {
                rn: Register::Sp,
                registers: (hw & 0xFF) | (u16::from(bit(hw, 8)) << 14),
                mode: BlockMode::DecrementBefore,
                writeback: true,
            },
        )),
        0xC | 0xD => Some(Form::plain(
            Opcode::Ldm,
            Operands::Multiple {
                rn: Register::Sp,
                registers: (hw & 0xFF) | (u16::from(bit(hw, 8)) << 15),
                mode: BlockMode::IncrementAfter,
                writeback: true,
            },
        )),
        // NOP, YIELD, WFE, WFI and SEV all retire as no-ops; IT blocks are not modelled.
        0xF if hw & 0xF == 0 && (hw >> 4) & 0xF <= 4 => {
            Some(Form::plain(Opcode::Nop, Operands::None))
        }
        _ => None,
    }
    .filter(|form| !matches!(form.operands, Operands::Multiple { registers: 0, .. }))
}

fn multiple_or_branch(hw: u16) -> Option<Form> {
    if !bit(hw, 12) {
        let rn = low(hw, 8);
        let registers = hw & 0xFF;
        if registers == 0 {
            return None;
        }
        let load = bit(hw, 11);
        let base_listed = registers & (1 << (rn as u16)) != 0;
        return Some(Form::plain(
            if load { Opcode::Ldm } else { Opcode::Stm },
            Operands::Multiple {
                rn,
                registers,
                mode: BlockMode::IncrementAfter,
                writeback: !(load && base_listed),
            },
        ));
    }

    match (hw >> 8) & 0xF {
        0xE => None,
        0xF => Some(Form::plain(
            Opcode::Svc,
            Operands::Immediate(u32::from(hw & 0xFF)),
        )),
        cond => Condition::from_u4(u32::from(cond)).map(|condition| Form {
            opcode: Opcode::B,
            operands: Operands::Branch(BranchTarget::Relative(sign_extend(
                u32::from(hw & 0xFF) << 1,
                9,
            ))),
            condition,
            set_flags: false,
        }),
    }
}
