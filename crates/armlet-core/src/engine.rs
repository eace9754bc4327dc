//! Execution engine: the fetch/decode/execute loop, block tracking, and hook dispatch.

use tracing::{debug, trace, warn};

use crate::api::{ContextVersion, CpuContext, EmulatorConfig, RunOptions, RunSummary, StepOutcome};
use crate::decoder::{DecodedInstruction, Decoder};
use crate::encoding::Mode;
use crate::execute::{commit_execution, execute_instruction};
use crate::fault::{EmuError, Fault, FaultCode};
use crate::hooks::{
    AddressRange, BlockHook, CodeHook, HookContext, HookError, HookId, HookKind, HookRegistry,
    InterruptHook, MemoryHook,
};
use crate::memory::{Memory, Permissions};
use crate::state::{EngineState, HaltReason, RegisterFile};

/// An emulated CPU: address space, registers, engine state, and hooks.
#[derive(Debug)]
pub struct Emulator {
    config: EmulatorConfig,
    memory: Memory,
    registers: RegisterFile,
    state: EngineState,
    hooks: HookRegistry,
    block_pending: bool,
    until: Option<u32>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new(EmulatorConfig::default())
    }
}

impl Emulator {
    /// Creates an emulator with an empty address space and zeroed registers.
    #[must_use]
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            memory: Memory::new(),
            registers: RegisterFile::new(config.mode),
            state: EngineState::Ready,
            hooks: HookRegistry::default(),
            block_pending: true,
            until: None,
        }
    }

    /// Configuration this emulator was created with.
    #[must_use]
    pub const fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Guest address space.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Mutable guest address space.
    pub const fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Register file.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Mutable register file.
    pub const fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    /// Current engine state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Current instruction-set mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.registers.mode()
    }

    /// Maps a zero-filled read/write/execute region.
    ///
    /// # Errors
    ///
    /// See [`Memory::map`].
    pub fn mem_map(&mut self, address: u32, size: u32) -> Result<(), EmuError> {
        Ok(self.memory.map(address, size)?)
    }

    /// Maps a zero-filled region with explicit permissions.
    ///
    /// # Errors
    ///
    /// See [`Memory::map_with_perms`].
    pub fn mem_map_with_perms(
        &mut self,
        address: u32,
        size: u32,
        perms: Permissions,
    ) -> Result<(), EmuError> {
        Ok(self.memory.map_with_perms(address, size, perms)?)
    }

    /// Unmaps the region mapped exactly at `address..address + size`.
    ///
    /// # Errors
    ///
    /// See [`Memory::unmap`].
    pub fn mem_unmap(&mut self, address: u32, size: u32) -> Result<(), EmuError> {
        Ok(self.memory.unmap(address, size)?)
    }

    /// Changes the permissions of the region mapped exactly at `address..address + size`.
    ///
    /// # Errors
    ///
    /// See [`Memory::protect`].
    pub fn mem_protect(
        &mut self,
        address: u32,
        size: u32,
        perms: Permissions,
    ) -> Result<(), EmuError> {
        Ok(self.memory.protect(address, size, perms)?)
    }

    /// Host write into guest memory.
    ///
    /// # Errors
    ///
    /// See [`Memory::write`].
    pub fn mem_write(&mut self, address: u32, bytes: &[u8]) -> Result<(), EmuError> {
        Ok(self.memory.write(address, bytes)?)
    }

    /// Host read from guest memory.
    ///
    /// # Errors
    ///
    /// See [`Memory::read`].
    pub fn mem_read(&self, address: u32, len: usize) -> Result<Vec<u8>, EmuError> {
        Ok(self.memory.read(address, len)?)
    }

    /// Reads a register by numeric id.
    ///
    /// # Errors
    ///
    /// See [`RegisterFile::read`].
    pub fn reg_read(&self, id: u32) -> Result<u32, EmuError> {
        Ok(self.registers.read(id)?)
    }

    /// Writes a register by numeric id.
    ///
    /// # Errors
    ///
    /// See [`RegisterFile::write`].
    pub fn reg_write(&mut self, id: u32, value: u32) -> Result<(), EmuError> {
        Ok(self.registers.write(id, value)?)
    }

    /// Decodes the instruction at `address` in the current mode without executing it.
    ///
    /// # Errors
    ///
    /// Returns [`EmuError::Memory`] when the bytes are not mapped and
    /// [`EmuError::Decode`] when they do not form a supported instruction.
    pub fn decode_at(&self, address: u32) -> Result<DecodedInstruction, EmuError> {
        let mode = self.registers.mode();
        let mut buf = self.memory.read(address, usize::from(mode.unit_bytes()))?;
        let first_unit = u16::from_le_bytes([buf[0], buf[1]]);
        if Decoder::encoded_len(first_unit, mode) > mode.unit_bytes() {
            buf.extend(self.memory.read(address.wrapping_add(2), 2)?);
        }
        Ok(Decoder::decode(&buf, mode)?)
    }

    /// Registers a basic-block hook.
    pub fn add_block_hook(
        &mut self,
        range: AddressRange,
        hook: impl BlockHook + 'static,
    ) -> HookId {
        self.hooks.add_block(range, Box::new(hook))
    }

    /// Registers a hook called before each instruction in `range` executes.
    pub fn add_code_hook(&mut self, range: AddressRange, hook: impl CodeHook + 'static) -> HookId {
        self.hooks.add_code(HookKind::Code, range, Box::new(hook))
    }

    /// Registers a hook called after each instruction in `range` commits.
    pub fn add_retired_hook(
        &mut self,
        range: AddressRange,
        hook: impl CodeHook + 'static,
    ) -> HookId {
        self.hooks.add_code(HookKind::Retired, range, Box::new(hook))
    }

    /// Registers a hook for data loads whose address falls in `range`.
    pub fn add_mem_read_hook(
        &mut self,
        range: AddressRange,
        hook: impl MemoryHook + 'static,
    ) -> HookId {
        self.hooks.add_memory(HookKind::MemRead, range, Box::new(hook))
    }

    /// Registers a hook for data stores whose address falls in `range`.
    pub fn add_mem_write_hook(
        &mut self,
        range: AddressRange,
        hook: impl MemoryHook + 'static,
    ) -> HookId {
        self.hooks.add_memory(HookKind::MemWrite, range, Box::new(hook))
    }

    /// Registers a software-interrupt hook.
    pub fn add_interrupt_hook(&mut self, hook: impl InterruptHook + 'static) -> HookId {
        self.hooks.add_interrupt(Box::new(hook))
    }

    /// Unregisters a hook. Returns `false` when `id` is unknown.
    pub fn remove_hook(&mut self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    /// Number of registered hooks of one kind.
    #[must_use]
    pub fn hook_count(&self, kind: HookKind) -> usize {
        self.hooks.len(kind)
    }

    /// Snapshots the CPU registers and mode.
    #[must_use]
    pub fn context_save(&self) -> CpuContext {
        CpuContext {
            version: ContextVersion::V1,
            registers: self.registers.clone(),
        }
    }

    /// Restores a snapshot taken by [`Emulator::context_save`]. Memory is untouched.
    pub fn context_restore(&mut self, context: &CpuContext) {
        self.registers = context.registers.clone();
        self.block_pending = true;
    }

    /// Runs from `begin` until `PC == until`, the count limit, a stop request, or a fault.
    ///
    /// Bit 0 of `begin` selects Thumb mode; otherwise the configured mode is used.
    ///
    /// # Errors
    ///
    /// Returns [`EmuError::Fault`] or [`EmuError::HookFailed`] when the run
    /// faults. The engine is then [`EngineState::Faulted`] and the machine
    /// reflects the last committed instruction.
    pub fn start(
        &mut self,
        begin: u32,
        until: u32,
        options: RunOptions,
    ) -> Result<RunSummary, EmuError> {
        let mode = if begin & 1 == 0 {
            self.config.mode
        } else {
            Mode::Thumb
        };
        self.registers.set_mode(mode);
        self.registers.set_pc(begin & !1);
        self.state = EngineState::Running;
        self.block_pending = true;
        self.until = Some(until);
        debug!(
            begin = format_args!("{:#010x}", begin & !1),
            until = format_args!("{until:#010x}"),
            %mode,
            "emulation started"
        );

        let mut instructions = 0_u64;
        let mut blocks = 0_u64;
        let halt = loop {
            if self.registers.pc() == until {
                break HaltReason::UntilReached;
            }
            if options.count.is_some_and(|limit| instructions >= limit) {
                break HaltReason::CountExhausted;
            }

            let outcome = self.execute_one()?;
            instructions += 1;
            blocks += u64::from(outcome.block_start);
            if outcome.stop_requested {
                break HaltReason::StopRequested;
            }
        };

        self.state = EngineState::Halted(halt);
        self.until = None;
        debug!(instructions, blocks, ?halt, "emulation stopped");
        Ok(RunSummary {
            instructions,
            blocks,
            halt,
        })
    }

    /// Executes exactly one instruction at the current `PC` and mode.
    ///
    /// # Errors
    ///
    /// Same as [`Emulator::start`].
    pub fn step(&mut self) -> Result<StepOutcome, EmuError> {
        self.state = EngineState::Running;
        let outcome = self.execute_one()?;
        self.state = EngineState::Halted(if outcome.stop_requested {
            HaltReason::StopRequested
        } else {
            HaltReason::CountExhausted
        });
        Ok(outcome)
    }

    fn execute_one(&mut self) -> Result<StepOutcome, EmuError> {
        let address = self.registers.pc();
        let mode = self.registers.mode();
        let (buf, len) = self
            .fetch(address, mode)
            .map_err(|fault| self.latch(fault))?;
        let instr = Decoder::decode(&buf[..len], mode).map_err(|err| {
            warn!(
                address = format_args!("{address:#010x}"),
                error = %err,
                "undecodable instruction"
            );
            self.latch(Fault {
                code: FaultCode::IllegalEncoding,
                pc: address,
                address: Some(address),
            })
        })?;
        let size = u32::from(instr.len);
        let mut stop = false;

        // Cleared only on commit, so a retried step re-enters the block.
        let block_start = self.block_pending;
        if block_start {
            let block_size = self.scan_block(address, mode, &instr);
            trace!(address = format_args!("{address:#010x}"), block_size, "block");
            stop |= self.dispatch(address, |hooks, ctx| hooks.block(ctx, address, block_size))?;
        }

        stop |= self.dispatch(address, |hooks, ctx| {
            hooks.code(HookKind::Code, ctx, address, size)
        })?;

        trace!(
            address = format_args!("{address:#010x}"),
            opcode = ?instr.opcode,
            condition = ?instr.condition,
            "execute"
        );
        let exec = execute_instruction(&instr, address, &self.registers, &self.memory)
            .map_err(|fault| self.latch(fault))?;

        for access in &exec.accesses {
            stop |= self.dispatch(address, |hooks, ctx| hooks.memory(ctx, access))?;
        }

        if exec.interrupt.is_some() && self.hooks.len(HookKind::Interrupt) == 0 {
            return Err(self.latch(Fault::new(FaultCode::UnhandledInterrupt, address)));
        }

        commit_execution(&mut self.registers, &mut self.memory, &exec)
            .map_err(|err| self.latch(Fault::from_access(address, &err)))?;
        let fell_through = exec.next_pc == address.wrapping_add(size) && exec.next_mode == mode;
        self.block_pending = instr.ends_block() || !fell_through;

        if let Some(number) = exec.interrupt {
            trace!(number, "interrupt");
            stop |= self.dispatch(address, |hooks, ctx| hooks.interrupt(ctx, number))?;
        }

        stop |= self.dispatch(address, |hooks, ctx| {
            hooks.code(HookKind::Retired, ctx, address, size)
        })?;

        Ok(StepOutcome {
            address,
            size: instr.len,
            mode,
            executed: exec.condition_passed,
            block_start,
            interrupt: exec.interrupt,
            stop_requested: stop,
        })
    }

    /// Fetches the encoding at `address`, returning the bytes and their length.
    fn fetch(&self, address: u32, mode: Mode) -> Result<([u8; 4], usize), Fault> {
        let mut buf = [0_u8; 4];
        let unit = usize::from(mode.unit_bytes());
        self.memory
            .fetch(address, &mut buf[..unit])
            .map_err(|err| Fault::from_access(address, &err))?;

        let len = usize::from(Decoder::encoded_len(u16::from_le_bytes([buf[0], buf[1]]), mode));
        if len > unit {
            self.memory
                .fetch(address.wrapping_add(2), &mut buf[unit..len])
                .map_err(|err| Fault::from_access(address, &err))?;
        }
        Ok((buf, len))
    }

    /// Byte length of the block starting at `address`, scanning ahead without executing.
    fn scan_block(&self, address: u32, mode: Mode, first: &DecodedInstruction) -> u32 {
        let limit = self.config.max_block_instructions.max(1);
        let mut instr = *first;
        let mut pc = address;
        let mut size = 0_u32;

        for _ in 0..limit {
            size += u32::from(instr.len);
            pc = pc.wrapping_add(u32::from(instr.len));
            if instr.ends_block() || self.until == Some(pc) {
                break;
            }
            let Some(next) = self
                .fetch(pc, mode)
                .ok()
                .and_then(|(buf, len)| Decoder::decode(&buf[..len], mode).ok())
            else {
                break;
            };
            instr = next;
        }
        size
    }

    /// Runs hooks with a fresh context; returns whether a stop was requested.
    fn dispatch(
        &mut self,
        pc: u32,
        call: impl FnOnce(&mut HookRegistry, &mut HookContext<'_>) -> Result<(), HookError>,
    ) -> Result<bool, EmuError> {
        let mut ctx = HookContext::new(&self.registers, &self.memory);
        let result = call(&mut self.hooks, &mut ctx);
        let stop = ctx.stop_requested();

        match result {
            Ok(()) => Ok(stop),
            Err(source) => {
                let fault = Fault::new(FaultCode::HookFailed, pc);
                self.state = EngineState::Faulted(fault);
                self.until = None;
                warn!(pc = format_args!("{pc:#010x}"), error = %source, "hook failed");
                Err(EmuError::HookFailed { fault, source })
            }
        }
    }

    fn latch(&mut self, fault: Fault) -> EmuError {
        self.state = EngineState::Faulted(fault);
        self.until = None;
        warn!(
            code = ?fault.code,
            pc = format_args!("{:#010x}", fault.pc),
            address = ?fault.address,
            "emulation faulted"
        );
        EmuError::Fault(fault)
    }
}
