//! Trace hook dispatch as observed through full emulation runs.

use std::cell::RefCell;
use std::rc::Rc;

use armlet_core::{
    AccessKind, AddressRange, EmuError, Emulator, EngineState, FaultCode, HaltReason,
    HookContext, HookError, HookKind, MemoryAccess, Register, RunOptions,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const ADDRESS: u32 = 0x0001_0000;

type Log<T> = Rc<RefCell<Vec<T>>>;

fn load(code: &[u32]) -> Emulator {
    let mut emu = Emulator::default();
    emu.mem_map(ADDRESS, 0x20_0000).expect("map");
    let bytes: Vec<u8> = code.iter().flat_map(|word| word.to_le_bytes()).collect();
    emu.mem_write(ADDRESS, &bytes).expect("write program");
    emu
}

fn end_of(code: &[u32]) -> u32 {
    ADDRESS + u32::try_from(code.len() * 4).expect("small program")
}

fn record_code(emu: &mut Emulator, range: AddressRange) -> Log<(u32, u32)> {
    let log: Log<(u32, u32)> = Rc::default();
    let sink = Rc::clone(&log);
    emu.add_code_hook(
        range,
        move |_ctx: &mut HookContext<'_>, address: u32, size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push((address, size));
            Ok(())
        },
    );
    log
}

const SAMPLE: [u32; 2] = [0xE3A0_0037, 0xE042_1003];

#[test]
fn code_hook_fires_once_per_instruction() {
    let mut emu = load(&SAMPLE);
    let code = record_code(&mut emu, AddressRange::All);

    emu.start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect("runs");

    assert_eq!(*code.borrow(), vec![(ADDRESS, 4), (ADDRESS + 4, 4)]);
}

#[test]
fn block_hook_reports_scanned_block_size() {
    let mut emu = load(&SAMPLE);
    let blocks: Log<(u32, u32)> = Rc::default();
    let sink = Rc::clone(&blocks);
    emu.add_block_hook(
        AddressRange::All,
        move |_ctx: &mut HookContext<'_>, address: u32, size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push((address, size));
            Ok(())
        },
    );

    emu.start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect("runs");

    assert_eq!(*blocks.borrow(), vec![(ADDRESS, 8)]);
}

#[test]
fn range_filter_limits_code_hook_to_first_instruction() {
    let mut emu = load(&SAMPLE);
    let first = record_code(&mut emu, AddressRange::single(ADDRESS));
    let inverted = record_code(&mut emu, AddressRange::new(1, 0));

    emu.start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect("runs");

    assert_eq!(*first.borrow(), vec![(ADDRESS, 4)]);
    assert_eq!(inverted.borrow().len(), 2);
}

#[test]
fn block_hook_runs_before_code_hook() {
    let mut emu = load(&SAMPLE);
    let order: Log<&'static str> = Rc::default();

    let sink = Rc::clone(&order);
    emu.add_code_hook(
        AddressRange::All,
        move |_ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push("code");
            Ok(())
        },
    );
    let sink = Rc::clone(&order);
    emu.add_block_hook(
        AddressRange::All,
        move |_ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push("block");
            Ok(())
        },
    );
    let sink = Rc::clone(&order);
    emu.add_retired_hook(
        AddressRange::All,
        move |_ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push("retired");
            Ok(())
        },
    );

    emu.start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect("runs");

    assert_eq!(
        *order.borrow(),
        vec!["block", "code", "retired", "code", "retired"]
    );
}

#[test]
fn hooks_observe_machine_state() {
    let mut emu = load(&SAMPLE);
    let seen: Log<(u32, u32)> = Rc::default();

    let sink = Rc::clone(&seen);
    emu.add_code_hook(
        AddressRange::single(ADDRESS + 4),
        move |ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            let r0 = ctx
                .read_register(Register::R0.id())
                .map_err(|err| HookError::new(err.to_string()))?;
            let word = ctx
                .read_memory(ctx.registers().pc(), 4)
                .map_err(|err| HookError::new(err.to_string()))?;
            let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            sink.borrow_mut().push((r0, word));
            Ok(())
        },
    );

    emu.start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect("runs");

    assert_eq!(*seen.borrow(), vec![(0x37, 0xE042_1003)]);
}

#[test]
fn retired_hook_sees_committed_result() {
    let mut emu = load(&SAMPLE);
    let seen: Log<u32> = Rc::default();
    let sink = Rc::clone(&seen);
    emu.add_retired_hook(
        AddressRange::single(ADDRESS),
        move |ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push(ctx.registers().get(Register::R0));
            Ok(())
        },
    );

    emu.start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect("runs");

    assert_eq!(*seen.borrow(), vec![0x37]);
}

#[test]
fn stop_from_hook_halts_after_current_instruction() {
    let code = [0xE3A0_0001, 0xE3A0_0002, 0xE3A0_0003];
    let mut emu = load(&code);
    emu.add_code_hook(
        AddressRange::single(ADDRESS + 4),
        |ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            ctx.stop();
            Ok(())
        },
    );

    let summary = emu
        .start(ADDRESS, end_of(&code), RunOptions::default())
        .expect("runs");

    assert_eq!(summary.halt, HaltReason::StopRequested);
    assert_eq!(summary.instructions, 2);
    assert_eq!(emu.registers().get(Register::R0), 2);
    assert_eq!(emu.registers().pc(), ADDRESS + 8);
    assert_eq!(emu.state(), EngineState::Halted(HaltReason::StopRequested));
}

#[test]
fn failing_hook_faults_before_the_instruction_executes() {
    let mut emu = load(&SAMPLE);
    emu.add_code_hook(
        AddressRange::single(ADDRESS + 4),
        |_ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            Err(HookError::new("refused"))
        },
    );

    let err = emu
        .start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect_err("hook fails");

    let EmuError::HookFailed { fault, source } = &err else {
        panic!("expected a hook failure, got {err:?}");
    };
    assert_eq!(fault.code, FaultCode::HookFailed);
    assert_eq!(fault.pc, ADDRESS + 4);
    assert_eq!(source.message(), "refused");
    assert_eq!(emu.state(), EngineState::Faulted(*fault));
    assert_eq!(emu.registers().get(Register::R0), 0x37);
    assert_eq!(emu.registers().get(Register::R1), 0);
}

fn record_blocks(emu: &mut Emulator) -> Log<(u32, u32)> {
    let log: Log<(u32, u32)> = Rc::default();
    let sink = Rc::clone(&log);
    emu.add_block_hook(
        AddressRange::All,
        move |_ctx: &mut HookContext<'_>, address: u32, size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push((address, size));
            Ok(())
        },
    );
    log
}

#[test]
fn retry_after_failed_block_hook_reenters_the_block() {
    let mut emu = load(&SAMPLE);
    let refusing = emu.add_block_hook(
        AddressRange::All,
        |_ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            Err(HookError::new("refused"))
        },
    );
    let err = emu
        .start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect_err("block hook fails");
    assert_eq!(err.fault().map(|f| f.pc), Some(ADDRESS));
    assert_eq!(emu.registers().get(Register::R0), 0);

    assert!(emu.remove_hook(refusing));
    let blocks = record_blocks(&mut emu);
    let outcome = emu.step().expect("retry executes");

    assert!(outcome.block_start);
    assert_eq!(outcome.address, ADDRESS);
    assert_eq!(blocks.borrow().first().map(|&(address, _)| address), Some(ADDRESS));
    assert_eq!(emu.registers().get(Register::R0), 0x37);
}

#[test]
fn faulted_run_does_not_bound_later_block_scans() {
    let mut emu = load(&SAMPLE);
    let blocks = record_blocks(&mut emu);
    let refusing = emu.add_code_hook(
        AddressRange::All,
        |_ctx: &mut HookContext<'_>, _address: u32, _size: u32| -> Result<(), HookError> {
            Err(HookError::new("refused"))
        },
    );
    let run = emu.start(ADDRESS, ADDRESS + 4, RunOptions::default());
    assert!(run.is_err());
    assert!(emu.remove_hook(refusing));

    emu.step().expect("steps");

    let blocks = blocks.borrow();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0], (ADDRESS, 4));
    assert_eq!(blocks[1].0, ADDRESS);
    assert!(blocks[1].1 >= 8, "scan stopped at a stale until: {blocks:?}");
}

#[test]
fn memory_hooks_see_loads_and_stores() {
    let code = [
        0xE3A0_0037, // mov r0, #0x37
        0xE3A0_1802, // mov r1, #0x20000
        0xE581_0004, // str r0, [r1, #4]
        0xE591_2004, // ldr r2, [r1, #4]
    ];
    let mut emu = load(&code);
    let accesses: Log<MemoryAccess> = Rc::default();

    let sink = Rc::clone(&accesses);
    emu.add_mem_write_hook(
        AddressRange::All,
        move |_ctx: &mut HookContext<'_>, access: &MemoryAccess| -> Result<(), HookError> {
            sink.borrow_mut().push(*access);
            Ok(())
        },
    );
    let sink = Rc::clone(&accesses);
    emu.add_mem_read_hook(
        AddressRange::new(0x0002_0000, 0x0002_0FFF),
        move |_ctx: &mut HookContext<'_>, access: &MemoryAccess| -> Result<(), HookError> {
            sink.borrow_mut().push(*access);
            Ok(())
        },
    );

    emu.start(ADDRESS, end_of(&code), RunOptions::default())
        .expect("runs");

    assert_eq!(
        *accesses.borrow(),
        vec![
            MemoryAccess::new(AccessKind::Write, 0x0002_0004, 4, 0x37),
            MemoryAccess::new(AccessKind::Read, 0x0002_0004, 4, 0x37),
        ]
    );
}

#[test]
fn interrupt_hook_receives_svc_number() {
    let code = [0xEF00_0011, 0xE3A0_0001]; // svc #0x11; mov r0, #1
    let mut emu = load(&code);
    let numbers: Log<u32> = Rc::default();
    let sink = Rc::clone(&numbers);
    emu.add_interrupt_hook(
        move |_ctx: &mut HookContext<'_>, number: u32| -> Result<(), HookError> {
            sink.borrow_mut().push(number);
            Ok(())
        },
    );

    let summary = emu
        .start(ADDRESS, end_of(&code), RunOptions::default())
        .expect("runs");

    assert_eq!(*numbers.borrow(), vec![0x11]);
    assert_eq!(summary.instructions, 2);
    assert_eq!(summary.blocks, 2);
    assert_eq!(emu.registers().get(Register::R0), 1);
}

#[test]
fn svc_without_interrupt_hook_faults() {
    let code = [0xEF00_0011];
    let mut emu = load(&code);

    let err = emu
        .start(ADDRESS, end_of(&code), RunOptions::default())
        .expect_err("nobody services the interrupt");

    assert_eq!(
        err.fault().map(|fault| (fault.code, fault.pc)),
        Some((FaultCode::UnhandledInterrupt, ADDRESS))
    );
    assert_eq!(emu.registers().pc(), ADDRESS);
}

#[test]
fn removed_hook_is_no_longer_called() {
    let mut emu = load(&SAMPLE);
    let calls: Log<u32> = Rc::default();
    let sink = Rc::clone(&calls);
    let id = emu.add_code_hook(
        AddressRange::All,
        move |_ctx: &mut HookContext<'_>, address: u32, _size: u32| -> Result<(), HookError> {
            sink.borrow_mut().push(address);
            Ok(())
        },
    );
    assert_eq!(emu.hook_count(HookKind::Code), 1);

    assert!(emu.remove_hook(id));
    assert!(!emu.remove_hook(id));
    assert_eq!(emu.hook_count(HookKind::Code), 0);

    emu.start(ADDRESS, end_of(&SAMPLE), RunOptions::default())
        .expect("runs");
    assert!(calls.borrow().is_empty());
}
