//! Trace hooks: typed callbacks the engine invokes synchronously while it runs.
//!
//! Hooks are registered on an [`Emulator`](crate::Emulator) and keep their own
//! state in the implementing type. Every hook receives a [`HookContext`] with
//! read-only access to the machine and the ability to request a stop.
//! Closures with the matching signature implement the traits directly.

use std::fmt;

use thiserror::Error;

use crate::encoding::Mode;
use crate::memory::{AccessKind, Memory, MemoryError};
use crate::state::{RegisterError, RegisterFile};

/// Error returned by a hook to abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("hook failed: {message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    /// Creates a hook error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message supplied by the hook.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One data access performed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryAccess {
    /// [`AccessKind::Read`] or [`AccessKind::Write`].
    pub kind: AccessKind,
    /// First byte accessed.
    pub address: u32,
    /// Width in bytes.
    pub size: u8,
    /// Value loaded (zero-extended, before any sign extension) or stored.
    pub value: u32,
}

impl MemoryAccess {
    /// Creates an access record.
    #[must_use]
    pub const fn new(kind: AccessKind, address: u32, size: u8, value: u32) -> Self {
        Self {
            kind,
            address,
            size,
            value,
        }
    }
}

/// Inclusive address filter for a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AddressRange {
    /// Every address.
    #[default]
    All,
    /// `begin..=end`.
    Span {
        /// First matching address.
        begin: u32,
        /// Last matching address.
        end: u32,
    },
}

impl AddressRange {
    /// Builds a range; `begin > end` selects every address.
    #[must_use]
    pub const fn new(begin: u32, end: u32) -> Self {
        if begin > end {
            Self::All
        } else {
            Self::Span { begin, end }
        }
    }

    /// Range matching exactly one address.
    #[must_use]
    pub const fn single(address: u32) -> Self {
        Self::Span {
            begin: address,
            end: address,
        }
    }

    /// Returns `true` when `address` passes the filter.
    #[must_use]
    pub const fn contains(self, address: u32) -> bool {
        match self {
            Self::All => true,
            Self::Span { begin, end } => begin <= address && address <= end,
        }
    }
}

/// Handle returned by hook registration, used with
/// [`Emulator::remove_hook`](crate::Emulator::remove_hook).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HookId(u32);

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook#{}", self.0)
    }
}

/// Event a hook subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HookKind {
    /// Start of a basic block.
    Block,
    /// Before an instruction executes.
    Code,
    /// After an instruction commits.
    Retired,
    /// Data load.
    MemRead,
    /// Data store.
    MemWrite,
    /// `SVC`.
    Interrupt,
}

/// What a hook may see and do while it runs.
pub struct HookContext<'a> {
    registers: &'a RegisterFile,
    memory: &'a Memory,
    stop_requested: bool,
}

impl<'a> HookContext<'a> {
    pub(crate) const fn new(registers: &'a RegisterFile, memory: &'a Memory) -> Self {
        Self {
            registers,
            memory,
            stop_requested: false,
        }
    }

    /// Register state at the time of the event.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        self.registers
    }

    /// Address space at the time of the event.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        self.memory
    }

    /// Current instruction-set mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.registers.mode()
    }

    /// Reads a register by numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Invalid`] when `id` is unknown.
    pub fn read_register(&self, id: u32) -> Result<u32, RegisterError> {
        self.registers.read(id)
    }

    /// Reads guest memory.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] when any byte is outside the mapped regions.
    pub fn read_memory(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        self.memory.read(address, len)
    }

    /// Asks the engine to halt once the current instruction has completed.
    pub const fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub(crate) const fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("pc", &self.registers.pc())
            .field("mode", &self.registers.mode())
            .field("stop_requested", &self.stop_requested)
            .finish_non_exhaustive()
    }
}

/// Called when execution enters a basic block.
pub trait BlockHook {
    /// `size` is the byte length of the block as scanned ahead of execution.
    ///
    /// # Errors
    ///
    /// Any error aborts the run with [`FaultCode::HookFailed`](crate::FaultCode::HookFailed).
    fn on_block(
        &mut self,
        ctx: &mut HookContext<'_>,
        address: u32,
        size: u32,
    ) -> Result<(), HookError>;
}

/// Called for a single instruction, before it executes or after it retires.
pub trait CodeHook {
    /// `size` is the encoded instruction length.
    ///
    /// # Errors
    ///
    /// Any error aborts the run with [`FaultCode::HookFailed`](crate::FaultCode::HookFailed).
    fn on_code(
        &mut self,
        ctx: &mut HookContext<'_>,
        address: u32,
        size: u32,
    ) -> Result<(), HookError>;
}

/// Called for every data access.
pub trait MemoryHook {
    /// # Errors
    ///
    /// Any error aborts the run with [`FaultCode::HookFailed`](crate::FaultCode::HookFailed).
    fn on_memory(
        &mut self,
        ctx: &mut HookContext<'_>,
        access: &MemoryAccess,
    ) -> Result<(), HookError>;
}

/// Called for every `SVC`.
pub trait InterruptHook {
    /// # Errors
    ///
    /// Any error aborts the run with [`FaultCode::HookFailed`](crate::FaultCode::HookFailed).
    fn on_interrupt(&mut self, ctx: &mut HookContext<'_>, number: u32) -> Result<(), HookError>;
}

impl<F> BlockHook for F
where
    F: FnMut(&mut HookContext<'_>, u32, u32) -> Result<(), HookError>,
{
    fn on_block(
        &mut self,
        ctx: &mut HookContext<'_>,
        address: u32,
        size: u32,
    ) -> Result<(), HookError> {
        self(ctx, address, size)
    }
}

impl<F> CodeHook for F
where
    F: FnMut(&mut HookContext<'_>, u32, u32) -> Result<(), HookError>,
{
    fn on_code(
        &mut self,
        ctx: &mut HookContext<'_>,
        address: u32,
        size: u32,
    ) -> Result<(), HookError> {
        self(ctx, address, size)
    }
}

impl<F> MemoryHook for F
where
    F: FnMut(&mut HookContext<'_>, &MemoryAccess) -> Result<(), HookError>,
{
    fn on_memory(
        &mut self,
        ctx: &mut HookContext<'_>,
        access: &MemoryAccess,
    ) -> Result<(), HookError> {
        self(ctx, access)
    }
}

impl<F> InterruptHook for F
where
    F: FnMut(&mut HookContext<'_>, u32) -> Result<(), HookError>,
{
    fn on_interrupt(&mut self, ctx: &mut HookContext<'_>, number: u32) -> Result<(), HookError> {
        self(ctx, number)
    }
}

struct Entry<H: ?Sized> {
    id: HookId,
    range: AddressRange,
    hook: Box<H>,
}

fn dispatch<H: ?Sized>(
    entries: &mut [Entry<H>],
    address: u32,
    mut call: impl FnMut(&mut H) -> Result<(), HookError>,
) -> Result<(), HookError> {
    entries
        .iter_mut()
        .filter(|entry| entry.range.contains(address))
        .try_for_each(|entry| call(&mut *entry.hook))
}

/// Registered hooks by event kind, each list in registration order.
#[derive(Default)]
pub(crate) struct HookRegistry {
    next_id: u32,
    block: Vec<Entry<dyn BlockHook>>,
    code: Vec<Entry<dyn CodeHook>>,
    retired: Vec<Entry<dyn CodeHook>>,
    mem_read: Vec<Entry<dyn MemoryHook>>,
    mem_write: Vec<Entry<dyn MemoryHook>>,
    interrupt: Vec<Entry<dyn InterruptHook>>,
}

impl HookRegistry {
    fn allocate(&mut self) -> HookId {
        let id = HookId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub(crate) fn add_block(&mut self, range: AddressRange, hook: Box<dyn BlockHook>) -> HookId {
        let id = self.allocate();
        self.block.push(Entry { id, range, hook });
        id
    }

    pub(crate) fn add_code(
        &mut self,
        kind: HookKind,
        range: AddressRange,
        hook: Box<dyn CodeHook>,
    ) -> HookId {
        let id = self.allocate();
        let list = if kind == HookKind::Retired {
            &mut self.retired
        } else {
            &mut self.code
        };
        list.push(Entry { id, range, hook });
        id
    }

    pub(crate) fn add_memory(
        &mut self,
        kind: HookKind,
        range: AddressRange,
        hook: Box<dyn MemoryHook>,
    ) -> HookId {
        let id = self.allocate();
        let list = if kind == HookKind::MemWrite {
            &mut self.mem_write
        } else {
            &mut self.mem_read
        };
        list.push(Entry { id, range, hook });
        id
    }

    pub(crate) fn add_interrupt(&mut self, hook: Box<dyn InterruptHook>) -> HookId {
        let id = self.allocate();
        self.interrupt.push(Entry {
            id,
            range: AddressRange::All,
            hook,
        });
        id
    }

    /// Removes a hook; returns `false` when the id is unknown.
    pub(crate) fn remove(&mut self, id: HookId) -> bool {
        fn drop_id<H: ?Sized>(list: &mut Vec<Entry<H>>, id: HookId) -> bool {
            let before = list.len();
            list.retain(|entry| entry.id != id);
            list.len() != before
        }

        drop_id(&mut self.block, id)
            || drop_id(&mut self.code, id)
            || drop_id(&mut self.retired, id)
            || drop_id(&mut self.mem_read, id)
            || drop_id(&mut self.mem_write, id)
            || drop_id(&mut self.interrupt, id)
    }

    pub(crate) fn len(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::Block => self.block.len(),
            HookKind::Code => self.code.len(),
            HookKind::Retired => self.retired.len(),
            HookKind::MemRead => self.mem_read.len(),
            HookKind::MemWrite => self.mem_write.len(),
            HookKind::Interrupt => self.interrupt.len(),
        }
    }

    pub(crate) fn block(
        &mut self,
        ctx: &mut HookContext<'_>,
        address: u32,
        size: u32,
    ) -> Result<(), HookError> {
        dispatch(&mut self.block, address, |hook| hook.on_block(ctx, address, size))
    }

    pub(crate) fn code(
        &mut self,
        kind: HookKind,
        ctx: &mut HookContext<'_>,
        address: u32,
        size: u32,
    ) -> Result<(), HookError> {
        let list = if kind == HookKind::Retired {
            &mut self.retired
        } else {
            &mut self.code
        };
        dispatch(list, address, |hook| hook.on_code(ctx, address, size))
    }

    pub(crate) fn memory(
        &mut self,
        ctx: &mut HookContext<'_>,
        access: &MemoryAccess,
    ) -> Result<(), HookError> {
        let list = if access.kind == AccessKind::Write {
            &mut self.mem_write
        } else {
            &mut self.mem_read
        };
        dispatch(list, access.address, |hook| hook.on_memory(ctx, access))
    }

    pub(crate) fn interrupt(
        &mut self,
        ctx: &mut HookContext<'_>,
        number: u32,
    ) -> Result<(), HookError> {
        dispatch(&mut self.interrupt, 0, |hook| hook.on_interrupt(ctx, number))
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("block", &self.block.len())
            .field("code", &self.code.len())
            .field("retired", &self.retired.len())
            .field("mem_read", &self.mem_read.len())
            .field("mem_write", &self.mem_write.len())
            .field("interrupt", &self.interrupt.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{AddressRange, HookContext, HookError, HookKind, HookRegistry, MemoryAccess};
    use crate::memory::{AccessKind, Memory};
    use crate::state::RegisterFile;

    #[test]
    fn address_range_filtering() {
        assert!(AddressRange::All.contains(0));
        assert!(AddressRange::new(0x10, 0x20).contains(0x20));
        assert!(!AddressRange::new(0x10, 0x20).contains(0x21));
        assert_eq!(AddressRange::new(1, 0), AddressRange::All);
        assert!(AddressRange::single(0x1000).contains(0x1000));
        assert!(!AddressRange::single(0x1000).contains(0x1002));
    }

    #[test]
    fn dispatch_follows_registration_order_and_range() {
        let registers = RegisterFile::default();
        let memory = Memory::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut registry = HookRegistry::default();

        for (tag, range) in [
            ("all", AddressRange::All),
            ("narrow", AddressRange::single(0x100)),
            ("late", AddressRange::All),
        ] {
            let calls = Rc::clone(&calls);
            registry.add_code(
                HookKind::Code,
                range,
                Box::new(move |_: &mut HookContext<'_>, address: u32, _: u32| {
                    calls.borrow_mut().push((tag, address));
                    Ok::<(), HookError>(())
                }),
            );
        }

        let mut ctx = HookContext::new(&registers, &memory);
        registry
            .code(HookKind::Code, &mut ctx, 0x100, 4)
            .expect("hooks succeed");
        registry
            .code(HookKind::Code, &mut ctx, 0x104, 4)
            .expect("hooks succeed");
        registry
            .code(HookKind::Retired, &mut ctx, 0x104, 4)
            .expect("no retired hooks");

        assert_eq!(
            *calls.borrow(),
            [("all", 0x100), ("narrow", 0x100), ("late", 0x100), ("all", 0x104), ("late", 0x104)]
        );
    }

    #[test]
    fn first_error_short_circuits() {
        let registers = RegisterFile::default();
        let memory = Memory::new();
        let reached = Rc::new(RefCell::new(false));
        let mut registry = HookRegistry::default();

        registry.add_block(
            AddressRange::All,
            Box::new(|_: &mut HookContext<'_>, _: u32, _: u32| -> Result<(), HookError> {
                Err(HookError::new("boom"))
            }),
        );
        let flag = Rc::clone(&reached);
        registry.add_block(
            AddressRange::All,
            Box::new(move |_: &mut HookContext<'_>, _: u32, _: u32| -> Result<(), HookError> {
                *flag.borrow_mut() = true;
                Ok(())
            }),
        );

        let mut ctx = HookContext::new(&registers, &memory);
        let err = registry.block(&mut ctx, 0, 4).expect_err("first hook fails");
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "hook failed: boom");
        assert!(!*reached.borrow());
    }

    #[test]
    fn memory_hooks_split_by_direction() {
        let registers = RegisterFile::default();
        let memory = Memory::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = HookRegistry::default();

        let reads = Rc::clone(&seen);
        registry.add_memory(
            HookKind::MemRead,
            AddressRange::All,
            Box::new(move |_: &mut HookContext<'_>, access: &MemoryAccess| {
                reads.borrow_mut().push(access.kind);
                Ok::<(), HookError>(())
            }),
        );

        let mut ctx = HookContext::new(&registers, &memory);
        registry
            .memory(&mut ctx, &MemoryAccess::new(AccessKind::Write, 0, 4, 1))
            .expect("no write hooks");
        registry
            .memory(&mut ctx, &MemoryAccess::new(AccessKind::Read, 0, 4, 1))
            .expect("read hook succeeds");
        assert_eq!(*seen.borrow(), [AccessKind::Read]);
    }

    #[test]
    fn removal_by_id() {
        let mut registry = HookRegistry::default();
        let id = registry.add_interrupt(Box::new(
            |_: &mut HookContext<'_>, _: u32| -> Result<(), HookError> { Ok(()) },
        ));
        assert_eq!(registry.len(HookKind::Interrupt), 1);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.len(HookKind::Interrupt), 0);
    }

    #[test]
    fn stop_request_is_latched_on_context() {
        let registers = RegisterFile::default();
        let memory = Memory::new();
        let mut ctx = HookContext::new(&registers, &memory);
        assert!(!ctx.stop_requested());
        ctx.stop();
        assert!(ctx.stop_requested());
        assert_eq!(ctx.read_register(99).ok(), None);
    }
}
