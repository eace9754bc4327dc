//! Barrel shifter, adder, and extension helpers shared by the execute paths.

use crate::encoding::ShiftKind;

/// Applies a barrel-shifter operation, returning the result and the carry-out.
///
/// `amount` is the effective shift distance; register-specified shifts pass
/// the bottom byte of the register, so values above 32 are meaningful.
#[must_use]
pub fn shift_with_carry(value: u32, kind: ShiftKind, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 && kind != ShiftKind::Rrx {
        return (value, carry_in);
    }

    match kind {
        ShiftKind::Lsl => match amount {
            1..=31 => (value << amount, (value >> (32 - amount)) & 1 != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        ShiftKind::Lsr => match amount {
            1..=31 => (value >> amount, (value >> (amount - 1)) & 1 != 0),
            32 => (0, value >> 31 != 0),
            _ => (0, false),
        },
        ShiftKind::Asr => {
            let signed = value as i32;
            if amount >= 32 {
                let fill = (signed >> 31) as u32;
                (fill, fill != 0)
            } else {
                ((signed >> amount) as u32, (value >> (amount - 1)) & 1 != 0)
            }
        }
        ShiftKind::Ror => {
            let result = value.rotate_right(amount % 32);
            (result, result >> 31 != 0)
        }
        ShiftKind::Rrx => ((u32::from(carry_in) << 31) | (value >> 1), value & 1 != 0),
    }
}

/// Adds with carry-in, returning `(result, carry_out, overflow)`.
#[must_use]
pub const fn add_with_carry(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let wide = a as u64 + b as u64 + carry_in as u64;
    let result = wide as u32;
    let overflow = ((a ^ result) & (b ^ result)) >> 31 != 0;
    (result, wide > u32::MAX as u64, overflow)
}

/// Sign-extends the low byte.
#[must_use]
pub const fn sign_extend_byte(value: u32) -> u32 {
    value as u8 as i8 as i32 as u32
}

/// Sign-extends the low half-word.
#[must_use]
pub const fn sign_extend_half(value: u32) -> u32 {
    value as u16 as i16 as i32 as u32
}
