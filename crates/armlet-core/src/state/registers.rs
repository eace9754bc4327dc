use thiserror::Error;

use crate::encoding::Mode;

/// Number of core registers (`R0..R12`, `SP`, `LR`, `PC`).
pub const CORE_REGISTER_COUNT: usize = 16;
/// `APSR` bit for negative result.
pub const APSR_N: u32 = 1 << 31;
/// `APSR` bit for zero result.
pub const APSR_Z: u32 = 1 << 30;
/// `APSR` bit for carry/not-borrow.
pub const APSR_C: u32 = 1 << 29;
/// `APSR` bit for signed overflow.
pub const APSR_V: u32 = 1 << 28;
/// `APSR` sticky saturation bit.
pub const APSR_Q: u32 = 1 << 27;
/// Mask of the `APSR` bits this core models (`N/Z/C/V/Q`).
pub const APSR_MASK: u32 = APSR_N | APSR_Z | APSR_C | APSR_V | APSR_Q;
/// `CPSR` Thumb execution-state bit.
pub const CPSR_T: u32 = 1 << 5;
/// `CPSR` mode field value for User mode, the only mode modelled.
pub const CPSR_MODE_USER: u32 = 0x10;

/// Host-visible register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Register {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    Sp = 13,
    Lr = 14,
    Pc = 15,
    Apsr = 16,
    Cpsr = 17,
}

impl Register {
    /// Core registers in encoding order.
    pub const CORE: [Self; CORE_REGISTER_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::Sp,
        Self::Lr,
        Self::Pc,
    ];

    /// Decodes a 4-bit register field; only the low four bits are used.
    #[must_use]
    pub const fn core(bits: u32) -> Self {
        Self::CORE[(bits & 0xF) as usize]
    }

    /// Stable numeric id used by [`RegisterFile::read`] and [`RegisterFile::write`].
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Looks up a register by numeric id.
    #[must_use]
    pub const fn from_id(id: u32) -> Option<Self> {
        match id {
            0..=15 => Some(Self::core(id)),
            16 => Some(Self::Apsr),
            17 => Some(Self::Cpsr),
            _ => None,
        }
    }

    /// Returns the core register index (`0..=15`), or `None` for status registers.
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::Apsr | Self::Cpsr => None,
            other => Some(other as usize),
        }
    }
}

/// Host register access failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegisterError {
    /// The numeric id does not name a modelled register.
    #[error("invalid register id {0}")]
    Invalid(u32),
}

/// Complete register state: core registers, status flags, and execution mode.
///
/// Every register exists and reads as zero from construction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    core: [u32; CORE_REGISTER_COUNT],
    apsr: u32,
    mode: Mode,
}

impl RegisterFile {
    /// Creates a zeroed register file in the given mode.
    #[must_use]
    pub const fn new(mode: Mode) -> Self {
        Self {
            core: [0; CORE_REGISTER_COUNT],
            apsr: 0,
            mode,
        }
    }

    /// Reads a register by numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Invalid`] when `id` is unknown.
    pub fn read(&self, id: u32) -> Result<u32, RegisterError> {
        Register::from_id(id)
            .map(|reg| self.get(reg))
            .ok_or(RegisterError::Invalid(id))
    }

    /// Writes a register by numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Invalid`] when `id` is unknown.
    pub fn write(&mut self, id: u32, value: u32) -> Result<(), RegisterError> {
        let reg = Register::from_id(id).ok_or(RegisterError::Invalid(id))?;
        self.set(reg, value);
        Ok(())
    }

    /// Reads a register.
    #[must_use]
    pub const fn get(&self, reg: Register) -> u32 {
        match reg {
            Register::Apsr => self.apsr(),
            Register::Cpsr => self.cpsr(),
            core => self.core[core as usize],
        }
    }

    /// Writes a register. `APSR` keeps only the modelled flag bits; `CPSR`
    /// additionally updates the execution mode from its `T` bit.
    pub const fn set(&mut self, reg: Register, value: u32) {
        match reg {
            Register::Apsr => self.set_apsr(value),
            Register::Cpsr => self.set_cpsr(value),
            core => self.core[core as usize] = value,
        }
    }

    /// Reads the program counter.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.core[Register::Pc as usize]
    }

    /// Writes the program counter.
    pub const fn set_pc(&mut self, value: u32) {
        self.core[Register::Pc as usize] = value;
    }

    /// Reads the stack pointer.
    #[must_use]
    pub const fn sp(&self) -> u32 {
        self.core[Register::Sp as usize]
    }

    /// Reads the `APSR` flag bits.
    #[must_use]
    pub const fn apsr(&self) -> u32 {
        self.apsr
    }

    /// Writes the `APSR`; bits outside [`APSR_MASK`] are dropped.
    pub const fn set_apsr(&mut self, value: u32) {
        self.apsr = value & APSR_MASK;
    }

    /// Reads the `CPSR` view: flags, `T` bit, and User mode.
    #[must_use]
    pub const fn cpsr(&self) -> u32 {
        let t = match self.mode {
            Mode::Arm => 0,
            Mode::Thumb => CPSR_T,
        };
        self.apsr | t | CPSR_MODE_USER
    }

    /// Writes the `CPSR`: flags and the `T` bit; the mode field is fixed.
    pub const fn set_cpsr(&mut self, value: u32) {
        self.set_apsr(value);
        self.mode = if value & CPSR_T == 0 {
            Mode::Arm
        } else {
            Mode::Thumb
        };
    }

    /// Returns `true` when a specific `APSR` bit is set.
    #[must_use]
    pub const fn flag(&self, flag: u32) -> bool {
        self.apsr & flag != 0
    }

    /// Sets or clears a specific `APSR` bit.
    pub const fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.apsr |= flag & APSR_MASK;
        } else {
            self.apsr &= !(flag & APSR_MASK);
        }
    }

    /// Current instruction-set mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Switches the instruction-set mode.
    pub const fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}
