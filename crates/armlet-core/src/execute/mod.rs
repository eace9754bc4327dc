//! Instruction execution pipeline.
//!
//! Execution is split in two phases so faults stay precise:
//! 1. [`execute_instruction`] reads operands, computes results, performs data
//!    loads, and validates every store, recording all effects in an
//!    [`ExecuteState`] without touching the machine.
//! 2. [`commit_execution`] applies the recorded stores, register writes,
//!    flag update, and `PC`/mode change.
//!
//! A faulting instruction never reaches phase two, so it leaves no partial
//! side effects.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]

mod flags;
mod helpers;

pub use flags::FlagsUpdate;
pub use helpers::{add_with_carry, shift_with_carry, sign_extend_byte, sign_extend_half};

use crate::decoder::{
    AddressMode, BlockMode, BranchTarget, DecodedInstruction, Indexing, Offset, Operands,
    ShifterOperand,
};
use crate::encoding::{Mode, Opcode};
use crate::fault::{Fault, FaultCode};
use crate::hooks::MemoryAccess;
use crate::memory::{AccessError, AccessKind, Memory};
use crate::state::registers::APSR_C;
use crate::state::{Register, RegisterFile};

/// A store validated during execution, applied at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingStore {
    /// Target address.
    pub address: u32,
    /// Value, truncated to `size` bytes on write.
    pub value: u32,
    /// Access width in bytes.
    pub size: u8,
}

/// Side effects accumulated while executing one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteState {
    /// Address of the next instruction.
    pub next_pc: u32,
    /// Instruction-set mode after this instruction.
    pub next_mode: Mode,
    /// Register writes in program order (never `PC`; see `next_pc`).
    pub register_writes: Vec<(Register, u32)>,
    /// Flag update to apply.
    pub flags_update: FlagsUpdate,
    /// Validated stores in program order.
    pub stores: Vec<PendingStore>,
    /// Data accesses in program order, for memory hooks.
    pub accesses: Vec<MemoryAccess>,
    /// Software interrupt number raised by `SVC`.
    pub interrupt: Option<u32>,
    /// `false` when the condition check failed and the instruction did nothing.
    pub condition_passed: bool,
}

impl ExecuteState {
    /// Creates a state that simply falls through to `next_pc`.
    #[must_use]
    pub const fn new(next_pc: u32, mode: Mode) -> Self {
        Self {
            next_pc,
            next_mode: mode,
            register_writes: Vec::new(),
            flags_update: FlagsUpdate::None,
            stores: Vec::new(),
            accesses: Vec::new(),
            interrupt: None,
            condition_passed: true,
        }
    }
}

/// Operand reads for the instruction at a known address.
struct Operand<'a> {
    regs: &'a RegisterFile,
    address: u32,
    mode: Mode,
}

impl Operand<'_> {
    /// Register value as seen by the instruction; `PC` reads ahead of the instruction.
    fn read(&self, reg: Register) -> u32 {
        match reg {
            Register::Pc => self.pc(),
            other => self.regs.get(other),
        }
    }

    const fn pc(&self) -> u32 {
        self.address.wrapping_add(self.mode.pc_read_offset())
    }

    /// `PC` operand rounded down to a word, as used by literal loads and `ADR`.
    const fn aligned_pc(&self) -> u32 {
        self.pc() & !3
    }

    fn carry(&self) -> bool {
        self.regs.flag(APSR_C)
    }

    fn shifter(&self, operand: ShifterOperand) -> (u32, bool) {
        match operand {
            ShifterOperand::Immediate { value, rotated } => {
                let carry = if rotated {
                    value >> 31 != 0
                } else {
                    self.carry()
                };
                (value, carry)
            }
            ShifterOperand::Register { rm, shift, amount } => {
                shift_with_carry(self.read(rm), shift, u32::from(amount), self.carry())
            }
            ShifterOperand::RegisterShifted { rm, shift, rs } => {
                shift_with_carry(self.read(rm), shift, self.read(rs) & 0xFF, self.carry())
            }
        }
    }
}

/// Executes one decoded instruction located at `address` against the current
/// machine state, without modifying it.
///
/// # Errors
///
/// Returns a [`Fault`] for data accesses to unmapped or protected memory.
/// The machine is untouched in that case.
pub fn execute_instruction(
    instr: &DecodedInstruction,
    address: u32,
    regs: &RegisterFile,
    memory: &Memory,
) -> Result<ExecuteState, Fault> {
    let next_pc = address.wrapping_add(u32::from(instr.len));
    let mut exec = ExecuteState::new(next_pc, instr.mode);

    if !instr.condition.passed(regs.apsr()) {
        exec.condition_passed = false;
        return Ok(exec);
    }

    let ops = Operand {
        regs,
        address,
        mode: instr.mode,
    };

    match instr.operands {
        Operands::DataProcessing { rd, rn, operand } => {
            execute_data_processing(instr, &ops, &mut exec, rd, rn, operand)?;
        }
        Operands::Multiply {
            rd,
            rm,
            rs,
            accumulate,
        } => {
            let addend = accumulate.map_or(0, |acc| ops.read(acc));
            let result = ops.read(rm).wrapping_mul(ops.read(rs)).wrapping_add(addend);
            exec.register_writes.push((rd, result));
            if instr.set_flags {
                exec.flags_update = FlagsUpdate::negative_zero(result);
            }
        }
        Operands::Wide { rd, imm16 } => {
            let value = match instr.opcode {
                Opcode::Movt => (ops.read(rd) & 0xFFFF) | (u32::from(imm16) << 16),
                _ => u32::from(imm16),
            };
            exec.register_writes.push((rd, value));
        }
        Operands::Extend { rd, rm } => {
            let value = ops.read(rm);
            let extended = match instr.opcode {
                Opcode::Sxth => sign_extend_half(value),
                Opcode::Sxtb => sign_extend_byte(value),
                Opcode::Uxth => value & 0xFFFF,
                _ => value & 0xFF,
            };
            exec.register_writes.push((rd, extended));
        }
        Operands::Memory { rt, address: mode } => {
            execute_transfer(instr, &ops, memory, &mut exec, rt, mode)?;
        }
        Operands::Multiple {
            rn,
            registers,
            mode,
            writeback,
        } => execute_block_transfer(
            instr,
            &ops,
            memory,
            &mut exec,
            rn,
            registers,
            mode,
            writeback,
        )?,
        Operands::Branch(target) => execute_branch(instr, &ops, &mut exec, target),
        Operands::Immediate(number) => {
            if instr.opcode == Opcode::Svc {
                exec.interrupt = Some(number);
            }
        }
        Operands::None => {}
    }

    Ok(exec)
}

/// Applies the side effects recorded by [`execute_instruction`].
///
/// # Errors
///
/// Stores were validated during execution, so this only fails if the memory
/// map or its permissions changed in between; registers are untouched in that case.
pub fn commit_execution(
    regs: &mut RegisterFile,
    memory: &mut Memory,
    exec: &ExecuteState,
) -> Result<(), AccessError> {
    for store in &exec.stores {
        let bytes = store.value.to_le_bytes();
        memory.store(store.address, &bytes[..usize::from(store.size)])?;
    }

    for &(reg, value) in &exec.register_writes {
        regs.set(reg, value);
    }
    regs.set_apsr(exec.flags_update.apply(regs.apsr()));
    regs.set_pc(exec.next_pc);
    regs.set_mode(exec.next_mode);
    Ok(())
}

/// Branch that may switch instruction sets on bit 0 of the target.
fn interwork(exec: &mut ExecuteState, target: u32) {
    let mode = Mode::from_target(target);
    exec.next_mode = mode;
    exec.next_pc = match mode {
        Mode::Arm => target & !3,
        Mode::Thumb => target & !1,
    };
}

/// Plain `PC` write from a data-processing result; stays in the current mode.
fn write_pc(exec: &mut ExecuteState, mode: Mode, value: u32) {
    exec.next_pc = match mode {
        Mode::Arm => value & !3,
        Mode::Thumb => value & !1,
    };
}

fn execute_data_processing(
    instr: &DecodedInstruction,
    ops: &Operand<'_>,
    exec: &mut ExecuteState,
    rd: Register,
    rn: Register,
    operand: ShifterOperand,
) -> Result<(), Fault> {
    let (op2, shifter_carry) = ops.shifter(operand);
    let carry_in = ops.carry();
    let a = match instr.opcode {
        Opcode::Adr => ops.aligned_pc(),
        _ => ops.read(rn),
    };

    let logical = |result: u32| (result, FlagsUpdate::logical(result, shifter_carry));
    let arithmetic = |(result, carry, overflow): (u32, bool, bool)| {
        (result, FlagsUpdate::arithmetic(result, carry, overflow))
    };

    let (result, flags) = match instr.opcode {
        Opcode::And | Opcode::Tst => logical(a & op2),
        Opcode::Eor | Opcode::Teq => logical(a ^ op2),
        Opcode::Orr => logical(a | op2),
        Opcode::Bic => logical(a & !op2),
        Opcode::Mov => logical(op2),
        Opcode::Mvn => logical(!op2),
        Opcode::Add | Opcode::Cmn | Opcode::Adr => arithmetic(add_with_carry(a, op2, false)),
        Opcode::Adc => arithmetic(add_with_carry(a, op2, carry_in)),
        Opcode::Sub | Opcode::Cmp => arithmetic(add_with_carry(a, !op2, true)),
        Opcode::Sbc => arithmetic(add_with_carry(a, !op2, carry_in)),
        Opcode::Rsb => arithmetic(add_with_carry(op2, !a, true)),
        Opcode::Rsc => arithmetic(add_with_carry(op2, !a, carry_in)),
        _ => return Err(Fault::new(FaultCode::IllegalEncoding, ops.address)),
    };

    if instr.set_flags {
        exec.flags_update = flags;
    }
    if !instr.opcode.is_test() {
        if rd == Register::Pc {
            write_pc(exec, instr.mode, result);
        } else {
            exec.register_writes.push((rd, result));
        }
    }
    Ok(())
}

fn execute_transfer(
    instr: &DecodedInstruction,
    ops: &Operand<'_>,
    memory: &Memory,
    exec: &mut ExecuteState,
    rt: Register,
    mode: AddressMode,
) -> Result<(), Fault> {
    let base = match (mode.base, instr.mode) {
        (Register::Pc, Mode::Thumb) => ops.aligned_pc(),
        (base, _) => ops.read(base),
    };
    let offset = match mode.offset {
        Offset::Immediate(value) => value,
        Offset::Register { rm, shift, amount } => {
            shift_with_carry(ops.read(rm), shift, u32::from(amount), ops.carry()).0
        }
    };
    let offset_address = if mode.subtract {
        base.wrapping_sub(offset)
    } else {
        base.wrapping_add(offset)
    };
    let target = match mode.indexing {
        Indexing::PostIndexed => base,
        Indexing::Offset | Indexing::PreIndexed => offset_address,
    };
    if mode.indexing != Indexing::Offset {
        exec.register_writes.push((mode.base, offset_address));
    }

    let size = instr.opcode.access_size();
    if instr.opcode.is_load() {
        let raw = memory
            .load(target, size)
            .map_err(|err| Fault::from_access(ops.address, &err))?;
        let value = match instr.opcode {
            Opcode::Ldrsb => sign_extend_byte(raw),
            Opcode::Ldrsh => sign_extend_half(raw),
            _ => raw,
        };
        exec.accesses.push(MemoryAccess::new(AccessKind::Read, target, size, raw));
        if rt == Register::Pc {
            interwork(exec, value);
        } else {
            exec.register_writes.push((rt, value));
        }
    } else {
        memory
            .check_store(target, usize::from(size))
            .map_err(|err| Fault::from_access(ops.address, &err))?;
        let value = match size {
            1 => ops.read(rt) & 0xFF,
            2 => ops.read(rt) & 0xFFFF,
            _ => ops.read(rt),
        };
        exec.stores.push(PendingStore {
            address: target,
            value,
            size,
        });
        exec.accesses.push(MemoryAccess::new(AccessKind::Write, target, size, value));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn execute_block_transfer(
    instr: &DecodedInstruction,
    ops: &Operand<'_>,
    memory: &Memory,
    exec: &mut ExecuteState,
    rn: Register,
    registers: u16,
    mode: BlockMode,
    writeback: bool,
) -> Result<(), Fault> {
    let base = ops.read(rn);
    let span = registers.count_ones() * 4;
    let (start, end) = match mode {
        BlockMode::IncrementAfter => (base, base.wrapping_add(span)),
        BlockMode::IncrementBefore => (base.wrapping_add(4), base.wrapping_add(span)),
        BlockMode::DecrementAfter => (
            base.wrapping_sub(span).wrapping_add(4),
            base.wrapping_sub(span),
        ),
        BlockMode::DecrementBefore => (base.wrapping_sub(span), base.wrapping_sub(span)),
    };
    // Queued before the loads so a loaded base register wins.
    if writeback {
        exec.register_writes.push((rn, end));
    }

    let load = instr.opcode == Opcode::Ldm;
    let mut cursor = start;
    for reg in Register::CORE
        .into_iter()
        .filter(|reg| registers & (1 << (*reg as u16)) != 0)
    {
        if load {
            let value = memory
                .load(cursor, 4)
                .map_err(|err| Fault::from_access(ops.address, &err))?;
            exec.accesses.push(MemoryAccess::new(AccessKind::Read, cursor, 4, value));
            if reg == Register::Pc {
                interwork(exec, value);
            } else {
                exec.register_writes.push((reg, value));
            }
        } else {
            memory
                .check_store(cursor, 4)
                .map_err(|err| Fault::from_access(ops.address, &err))?;
            let value = ops.read(reg);
            exec.stores.push(PendingStore {
                address: cursor,
                value,
                size: 4,
            });
            exec.accesses.push(MemoryAccess::new(AccessKind::Write, cursor, 4, value));
        }
        cursor = cursor.wrapping_add(4);
    }
    Ok(())
}

fn execute_branch(
    instr: &DecodedInstruction,
    ops: &Operand<'_>,
    exec: &mut ExecuteState,
    target: BranchTarget,
) {
    let link = match instr.mode {
        Mode::Arm => exec.next_pc,
        Mode::Thumb => exec.next_pc | 1,
    };
    if matches!(instr.opcode, Opcode::Bl | Opcode::Blx) {
        exec.register_writes.push((Register::Lr, link));
    }

    match (instr.opcode, target) {
        (Opcode::Blx, BranchTarget::Relative(offset)) => match instr.mode {
            Mode::Arm => {
                exec.next_pc = ops.pc().wrapping_add_signed(offset) & !1;
                exec.next_mode = Mode::Thumb;
            }
            Mode::Thumb => {
                exec.next_pc = ops.aligned_pc().wrapping_add_signed(offset) & !3;
                exec.next_mode = Mode::Arm;
            }
        },
        (_, BranchTarget::Relative(offset)) => {
            exec.next_pc = ops.pc().wrapping_add_signed(offset);
        }
        (_, BranchTarget::Register(rm)) => interwork(exec, ops.read(rm)),
    }
}

#[cfg(test)]
mod tests {
    use super::{commit_execution, execute_instruction, ExecuteState, FlagsUpdate, PendingStore};
    use crate::decoder::Decoder;
    use crate::encoding::Mode;
    use crate::fault::{Fault, FaultCode};
    use crate::hooks::MemoryAccess;
    use crate::memory::{AccessKind, Memory, Permissions, PAGE_SIZE};
    use crate::state::registers::{APSR_C, APSR_N, APSR_V, APSR_Z};
    use crate::state::{Register, RegisterFile};

    const CODE: u32 = 0x0001_0000;
    const DATA: u32 = 0x0002_0000;

    fn machine(mode: Mode) -> (RegisterFile, Memory) {
        let mut memory = Memory::new();
        memory.map(CODE, PAGE_SIZE).expect("map code");
        memory.map(DATA, PAGE_SIZE).expect("map data");
        (RegisterFile::new(mode), memory)
    }

    fn arm(word: u32, regs: &RegisterFile, memory: &Memory) -> Result<ExecuteState, Fault> {
        let instr = Decoder::decode(&word.to_le_bytes(), Mode::Arm).expect("valid ARM encoding");
        execute_instruction(&instr, CODE, regs, memory)
    }

    fn thumb(bytes: &[u8], regs: &RegisterFile, memory: &Memory) -> Result<ExecuteState, Fault> {
        let instr = Decoder::decode(bytes, Mode::Thumb).expect("valid Thumb encoding");
        execute_instruction(&instr, CODE, regs, memory)
    }

    fn run_arm(word: u32, regs: &mut RegisterFile, memory: &mut Memory) {
        let exec = arm(word, regs, memory).expect("executes");
        commit_execution(regs, memory, &exec).expect("commits");
    }

    #[test]
    fn mov_and_sub_compute_results() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set(Register::R2, 0x6789);
        regs.set(Register::R3, 0x3333);

        run_arm(0xE3A0_0037, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R0), 0x37);
        assert_eq!(regs.pc(), CODE + 4);

        run_arm(0xE042_1003, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R1), 0x3456);
    }

    #[test]
    fn non_flag_setting_ops_leave_apsr_alone() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set_apsr(0xFFFF_FFFF);
        let before = regs.apsr();
        run_arm(0xE3A0_0000, &mut regs, &mut memory);
        assert_eq!(regs.apsr(), before);
    }

    #[test]
    fn compare_updates_all_flags() {
        let (mut regs, memory) = machine(Mode::Arm);
        regs.set(Register::R0, 3);
        regs.set(Register::R1, 5);
        // cmp r0, r1
        let exec = arm(0xE150_0001, &regs, &memory).expect("executes");
        assert_eq!(
            exec.flags_update,
            FlagsUpdate::Arithmetic {
                negative: true,
                zero: false,
                carry: false,
                overflow: false,
            }
        );
        assert!(exec.register_writes.is_empty());
    }

    #[test]
    fn adds_reports_signed_overflow() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set(Register::R1, 0x7FFF_FFFF);
        // adds r0, r1, #1
        run_arm(0xE291_0001, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R0), 0x8000_0000);
        assert_eq!(regs.apsr(), APSR_N | APSR_V);
    }

    #[test]
    fn logical_shift_sets_carry_from_shifter() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set(Register::R1, 0x8000_0000);
        // movs r0, r1, lsl #1
        run_arm(0xE1B0_0081, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R0), 0);
        assert_eq!(regs.apsr(), APSR_Z | APSR_C);
    }

    #[test]
    fn failed_condition_only_advances_pc() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        // moveq r0, #1 with Z clear
        let exec = arm(0x03A0_0001, &regs, &memory).expect("executes");
        assert!(!exec.condition_passed);
        assert_eq!(exec.next_pc, CODE + 4);
        commit_execution(&mut regs, &mut memory, &exec).expect("commits");
        assert_eq!(regs.get(Register::R0), 0);
    }

    #[test]
    fn multiply_accumulate() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set(Register::R1, 6);
        regs.set(Register::R2, 7);
        regs.set_apsr(APSR_C | APSR_V);
        // mlas r0, r1, r2, r1
        run_arm(0xE030_1291, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R0), 48);
        assert_eq!(regs.apsr(), APSR_C | APSR_V);
    }

    #[test]
    fn wide_moves_build_a_constant() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        run_arm(0xE301_1234, &mut regs, &mut memory);
        run_arm(0xE345_1678, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R1), 0x5678_1234);
    }

    #[test]
    fn loads_and_stores_move_data() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set(Register::R0, DATA);
        regs.set(Register::R1, 0xCAFE_F00D);

        // str r1, [r0, #4]
        let exec = arm(0xE580_1004, &regs, &memory).expect("executes");
        assert_eq!(
            exec.stores,
            [PendingStore {
                address: DATA + 4,
                value: 0xCAFE_F00D,
                size: 4,
            }]
        );
        assert_eq!(
            exec.accesses,
            [MemoryAccess::new(AccessKind::Write, DATA + 4, 4, 0xCAFE_F00D)]
        );
        commit_execution(&mut regs, &mut memory, &exec).expect("commits");
        assert_eq!(memory.read_u32(DATA + 4), Ok(0xCAFE_F00D));

        // ldrsh r1, [r0, #4]
        run_arm(0xE1D0_10F4, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R1), 0xFFFF_F00D);

        // ldr r1, [r0], #4
        run_arm(0xE490_1004, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R1), 0);
        assert_eq!(regs.get(Register::R0), DATA + 4);
    }

    #[test]
    fn faulting_store_produces_no_effects() {
        let (mut regs, memory) = machine(Mode::Arm);
        regs.set(Register::R0, 0x0800_0000);
        // str r1, [r0, #4]!
        let fault = arm(0xE5A0_1004, &regs, &memory).expect_err("unmapped store");
        assert_eq!(fault.code, FaultCode::UnmappedWrite);
        assert_eq!(fault.pc, CODE);
        assert_eq!(fault.address, Some(0x0800_0004));
    }

    #[test]
    fn protected_load_faults() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        memory
            .protect(DATA, PAGE_SIZE, Permissions::WRITE)
            .expect("protect");
        regs.set(Register::R0, DATA);
        let fault = arm(0xE590_1000, &regs, &memory).expect_err("protected load");
        assert_eq!(fault.code, FaultCode::ProtectedRead);
    }

    #[test]
    fn push_then_pop_restores_registers_and_returns() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set(Register::Sp, DATA + 0x100);
        regs.set(Register::R4, 0x44);
        regs.set(Register::Lr, CODE + 0x40);

        // push {r4, lr}
        run_arm(0xE92D_4010, &mut regs, &mut memory);
        assert_eq!(regs.sp(), DATA + 0xF8);
        assert_eq!(memory.read_u32(DATA + 0xF8), Ok(0x44));
        assert_eq!(memory.read_u32(DATA + 0xFC), Ok(CODE + 0x40));

        regs.set(Register::R4, 0);
        // pop {r4, pc}
        run_arm(0xE8BD_8010, &mut regs, &mut memory);
        assert_eq!(regs.get(Register::R4), 0x44);
        assert_eq!(regs.sp(), DATA + 0x100);
        assert_eq!(regs.pc(), CODE + 0x40);
        assert_eq!(regs.mode(), Mode::Arm);
    }

    #[test]
    fn branch_with_link_records_return_address() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        // bl +4 (to CODE + 8 + 4)
        run_arm(0xEB00_0001, &mut regs, &mut memory);
        assert_eq!(regs.pc(), CODE + 12);
        assert_eq!(regs.get(Register::Lr), CODE + 4);
    }

    #[test]
    fn bx_switches_to_thumb_on_odd_target() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        regs.set(Register::R3, CODE + 0x21);
        // bx r3
        run_arm(0xE12F_FF13, &mut regs, &mut memory);
        assert_eq!(regs.pc(), CODE + 0x20);
        assert_eq!(regs.mode(), Mode::Thumb);
    }

    #[test]
    fn blx_immediate_toggles_instruction_set() {
        let (mut regs, mut memory) = machine(Mode::Arm);
        // blx +2 from ARM lands on a half-word in Thumb
        run_arm(0xFB00_0000, &mut regs, &mut memory);
        assert_eq!(regs.pc(), CODE + 10);
        assert_eq!(regs.mode(), Mode::Thumb);
        assert_eq!(regs.get(Register::Lr), CODE + 4);

        let (mut regs, mut memory) = machine(Mode::Thumb);
        // blx +4 from Thumb at CODE: align(CODE + 4) + 4
        let exec = thumb(&[0x00, 0xF0, 0x02, 0xE8], &regs, &memory).expect("executes");
        commit_execution(&mut regs, &mut memory, &exec).expect("commits");
        assert_eq!(regs.pc(), CODE + 8);
        assert_eq!(regs.mode(), Mode::Arm);
        assert_eq!(regs.get(Register::Lr), (CODE + 4) | 1);
    }

    #[test]
    fn thumb_sub_sp_immediate() {
        let (mut regs, mut memory) = machine(Mode::Thumb);
        regs.set(Register::Sp, 0x1234);
        let exec = thumb(&[0x83, 0xB0], &regs, &memory).expect("executes");
        assert_eq!(exec.next_pc, CODE + 2);
        commit_execution(&mut regs, &mut memory, &exec).expect("commits");
        assert_eq!(regs.sp(), 0x1228);
        assert_eq!(regs.mode(), Mode::Thumb);
    }

    #[test]
    fn thumb_literal_load_aligns_pc() {
        let (mut regs, mut memory) = machine(Mode::Thumb);
        memory.write_u32(CODE + 8, 0x1122_3344).expect("seed literal");
        // ldr r0, [pc, #4] at CODE + 2: align(CODE + 6) + 4
        let instr = Decoder::decode(&[0x01, 0x48], Mode::Thumb).expect("decodes");
        let exec = execute_instruction(&instr, CODE + 2, &regs, &memory).expect("executes");
        commit_execution(&mut regs, &mut memory, &exec).expect("commits");
        assert_eq!(regs.get(Register::R0), 0x1122_3344);
    }

    #[test]
    fn thumb_bl_links_with_thumb_bit() {
        let (mut regs, mut memory) = machine(Mode::Thumb);
        let exec = thumb(&[0x00, 0xF0, 0x00, 0xF8], &regs, &memory).expect("executes");
        commit_execution(&mut regs, &mut memory, &exec).expect("commits");
        assert_eq!(regs.pc(), CODE + 4);
        assert_eq!(regs.get(Register::Lr), (CODE + 4) | 1);
    }

    #[test]
    fn svc_raises_interrupt_number() {
        let (regs, memory) = machine(Mode::Arm);
        let exec = arm(0xEF00_0011, &regs, &memory).expect("executes");
        assert_eq!(exec.interrupt, Some(0x11));
        assert_eq!(exec.next_pc, CODE + 4);
    }
}
