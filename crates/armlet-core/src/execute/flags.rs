//! APSR update behaviors for different instruction classes.

use crate::state::registers::{APSR_C, APSR_N, APSR_V, APSR_Z};

/// Describes how `APSR` should be updated after an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsUpdate {
    /// No change to the flags.
    #[default]
    None,
    /// Multiplies: `N` and `Z` only.
    NegativeZero {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
    },
    /// Logical operations: `N`, `Z`, and the shifter carry-out; `V` unchanged.
    Logical {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
        /// Carry flag.
        carry: bool,
    },
    /// Arithmetic operations: all of `NZCV` from the adder.
    Arithmetic {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
        /// Carry flag.
        carry: bool,
        /// Overflow flag.
        overflow: bool,
    },
}

impl FlagsUpdate {
    /// Logical update for `result` with shifter carry-out `carry`.
    #[must_use]
    pub const fn logical(result: u32, carry: bool) -> Self {
        Self::Logical {
            negative: result & APSR_N != 0,
            zero: result == 0,
            carry,
        }
    }

    /// Arithmetic update for `result` with adder carry and overflow.
    #[must_use]
    pub const fn arithmetic(result: u32, carry: bool, overflow: bool) -> Self {
        Self::Arithmetic {
            negative: result & APSR_N != 0,
            zero: result == 0,
            carry,
            overflow,
        }
    }

    /// `N`/`Z` update for `result`.
    #[must_use]
    pub const fn negative_zero(result: u32) -> Self {
        Self::NegativeZero {
            negative: result & APSR_N != 0,
            zero: result == 0,
        }
    }

    /// Returns `apsr` with this update applied.
    #[must_use]
    pub const fn apply(self, apsr: u32) -> u32 {
        const fn put(apsr: u32, flag: u32, set: bool) -> u32 {
            if set {
                apsr | flag
            } else {
                apsr & !flag
            }
        }

        match self {
            Self::None => apsr,
            Self::NegativeZero { negative, zero } => put(put(apsr, APSR_N, negative), APSR_Z, zero),
            Self::Logical {
                negative,
                zero,
                carry,
            } => put(put(put(apsr, APSR_N, negative), APSR_Z, zero), APSR_C, carry),
            Self::Arithmetic {
                negative,
                zero,
                carry,
                overflow,
            } => put(
                put(put(put(apsr, APSR_N, negative), APSR_Z, zero), APSR_C, carry),
                APSR_V,
                overflow,
            ),
        }
    }
}
