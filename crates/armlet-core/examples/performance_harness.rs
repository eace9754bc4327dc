//! Throughput harness for the armlet execution engine.
//!
//! ```sh
//! cargo run --release -p armlet-core --example performance_harness
//! ```
//!
//! Runs a counted ARM loop with and without a code hook and reports
//! instructions per second for each configuration.

#![allow(clippy::pedantic)]

use armlet_core::{
    AddressRange, Emulator, HookContext, HookError, Register, RunOptions, RunSummary,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

use std::time::{Duration, Instant};

const BASE: u32 = 0x0001_0000;
const ITERATIONS: u32 = 0x00FF_0000;

/// `mov r0, #ITERATIONS; loop: add r1, r1, r0; subs r0, r0, #1; bne loop`
fn program() -> Vec<u8> {
    let words: [u32; 4] = [
        0xE3A0_08FF, // mov r0, #0xFF0000
        0xE081_1000, // add r1, r1, r0
        0xE250_0001, // subs r0, r0, #1
        0x1AFF_FFFC, // bne loop
    ];
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn build(with_hook: bool) -> Emulator {
    let mut emu = Emulator::default();
    emu.mem_map(BASE, 0x1000).expect("map code");
    emu.mem_write(BASE, &program()).expect("write code");
    if with_hook {
        emu.add_code_hook(
            AddressRange::All,
            |_ctx: &mut HookContext<'_>, address: u32, _size: u32| -> Result<(), HookError> {
                std::hint::black_box(address);
                Ok(())
            },
        );
    }
    emu
}

fn measure(label: &str, with_hook: bool) -> (RunSummary, Duration) {
    let mut emu = build(with_hook);
    let started = Instant::now();
    let summary = emu
        .start(BASE, BASE + 16, RunOptions::default())
        .expect("loop runs to completion");
    let elapsed = started.elapsed();

    let ips = summary.instructions as f64 / elapsed.as_secs_f64();
    println!(
        "{label:<12} {:>12} instructions {:>10} blocks {:>8.3}s {:>14.0} instr/s",
        summary.instructions,
        summary.blocks,
        elapsed.as_secs_f64(),
        ips
    );
    assert_eq!(emu.registers().get(Register::R0), 0);
    (summary, elapsed)
}

fn main() {
    println!("loop iterations: {ITERATIONS:#x}");
    let (plain, _) = measure("no hooks", false);
    let (hooked, _) = measure("code hook", true);
    assert_eq!(plain.instructions, hooked.instructions);
}
