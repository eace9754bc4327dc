//! CLI entry point for the armlet demonstration driver.

use std::env;
use std::ffi::OsString;

use armlet_core::{
    AddressRange, Emulator, EmulatorConfig, HookContext, HookError, Mode, Register, RunOptions,
    RunSummary,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Load address for every demo program.
const ADDRESS: u32 = 0x0001_0000;
/// Size of the mapped code and data region.
const MAP_SIZE: u32 = 2 * 1024 * 1024;

/// `mov r0, #0x37; sub r1, r2, r3`
const ARM_CODE: [u8; 8] = [0x37, 0x00, 0xA0, 0xE3, 0x03, 0x10, 0x42, 0xE0];
/// `sub sp, #0xc`
const THUMB_CODE: [u8; 2] = [0x83, 0xB0];

const USAGE_TEXT: &str = "\
Usage: armlet-demo <command> [options]

Commands:
  arm                    Run the ARM sample (mov r0, #0x37; sub r1, r2, r3)
  thumb                  Run the Thumb sample (sub sp, #0xc)
  run --code <hex>       Run an ad-hoc program and print every register

Run options:
  --code <hex>           Program bytes as a hex string, e.g. 3700a0e3
  --thumb                Start in Thumb mode
  --set <REG>=<VALUE>    Preset a register before the run (repeatable)
  --count <N>            Stop after N instructions

Options:
  -v, --verbose          Enable debug logging (RUST_LOG overrides)
  -h, --help             Show this help message

Examples:
  armlet-demo arm
  armlet-demo run --code 3700a0e3031042e0 --set r2=0x6789 --set r3=0x3333
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Arm,
    Thumb,
    Run(RunArgs),
}

#[derive(Debug, PartialEq, Eq, Default)]
struct RunArgs {
    code: Vec<u8>,
    thumb: bool,
    assignments: Vec<(Register, u32)>,
    count: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    command: Command,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Invocation(Invocation),
    Help,
}

fn parse_args(args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut verbose = false;
    let mut rest = Vec::new();
    for arg in args {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }
        if arg == "--verbose" || arg == "-v" {
            verbose = true;
            continue;
        }
        rest.push(arg.to_string_lossy().to_string());
    }

    let mut rest = rest.into_iter();
    let command = rest.next().ok_or_else(|| "missing command".to_string())?;
    let command = match command.as_str() {
        "arm" | "thumb" => {
            if let Some(extra) = rest.next() {
                return Err(format!("unexpected argument: {extra}"));
            }
            if command == "arm" {
                Command::Arm
            } else {
                Command::Thumb
            }
        }
        "run" => Command::Run(parse_run_args(rest)?),
        other => return Err(format!("unknown command: {other}")),
    };

    Ok(ParseResult::Invocation(Invocation { command, verbose }))
}

#[allow(clippy::while_let_on_iterator)]
fn parse_run_args(mut args: impl Iterator<Item = String>) -> Result<RunArgs, String> {
    let mut parsed = RunArgs::default();
    let mut code = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--thumb" => parsed.thumb = true,
            "--code" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --code".to_string())?;
                code = Some(parse_hex(&value)?);
            }
            "--set" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --set".to_string())?;
                parsed.assignments.push(parse_assignment(&value)?);
            }
            "--count" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --count".to_string())?;
                let count = value
                    .parse()
                    .map_err(|_| format!("invalid instruction count: {value}"))?;
                parsed.count = Some(count);
            }
            other => return Err(format!("unknown option: {other}")),
        }
    }

    parsed.code = code.ok_or_else(|| "missing --code".to_string())?;
    Ok(parsed)
}

fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(format!("code must be a non-empty even-length hex string: {text}"));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex byte at offset {i}: {text}"))
        })
        .collect()
}

fn parse_register(name: &str) -> Result<Register, String> {
    let lower = name.to_ascii_lowercase();
    let register = match lower.as_str() {
        "sp" => Register::Sp,
        "lr" => Register::Lr,
        "pc" => Register::Pc,
        "apsr" => Register::Apsr,
        other => other
            .strip_prefix('r')
            .and_then(|index| index.parse::<u32>().ok())
            .filter(|index| *index < 16)
            .map(Register::core)
            .ok_or_else(|| format!("unknown register: {name}"))?,
    };
    Ok(register)
}

fn parse_value(text: &str) -> Result<u32, String> {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .map_or_else(|| text.parse(), |hex| u32::from_str_radix(hex, 16))
        .map_err(|_| format!("invalid register value: {text}"))
}

fn parse_assignment(text: &str) -> Result<(Register, u32), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected REG=VALUE, got: {text}"))?;
    Ok((parse_register(name)?, parse_value(value)?))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(code: &[u8], config: EmulatorConfig) -> Result<Emulator, String> {
    let mut emu = Emulator::new(config);
    emu.mem_map(ADDRESS, MAP_SIZE)
        .map_err(|err| format!("failed to map memory: {err}"))?;
    emu.mem_write(ADDRESS, code)
        .map_err(|err| format!("failed to write code: {err}"))?;
    Ok(emu)
}

fn add_tracing_hooks(emu: &mut Emulator, code_range: AddressRange) {
    emu.add_block_hook(
        AddressRange::All,
        |_ctx: &mut HookContext<'_>, address: u32, size: u32| -> Result<(), HookError> {
            println!(">>> Tracing basic block at {address:#x}, block size = {size:#x}");
            Ok(())
        },
    );
    emu.add_code_hook(
        code_range,
        |_ctx: &mut HookContext<'_>, address: u32, size: u32| -> Result<(), HookError> {
            println!(">>> Tracing instruction at {address:#x}, instruction size = {size:#x}");
            Ok(())
        },
    );
}

fn execute(
    emu: &mut Emulator,
    begin: u32,
    len: usize,
    count: Option<u64>,
) -> Result<RunSummary, String> {
    let len = u32::try_from(len).map_err(|_| "program too large".to_string())?;
    let options = count.map_or_else(RunOptions::default, RunOptions::count);
    emu.start(begin, ADDRESS.wrapping_add(len), options)
        .map_err(|err| err.to_string())
}

fn run_arm() -> Result<(), String> {
    println!("Emulate ARM code");
    let mut emu = load(&ARM_CODE, EmulatorConfig::default())?;
    let registers = emu.registers_mut();
    registers.set(Register::R0, 0x1234);
    registers.set(Register::R2, 0x6789);
    registers.set(Register::R3, 0x3333);
    registers.set_apsr(0xFFFF_FFFF);
    add_tracing_hooks(&mut emu, AddressRange::single(ADDRESS));

    execute(&mut emu, ADDRESS, ARM_CODE.len(), None)?;

    println!(">>> Emulation done. Below is the CPU context");
    println!(">>> R0 = {:#x}", emu.registers().get(Register::R0));
    println!(">>> R1 = {:#x}", emu.registers().get(Register::R1));
    Ok(())
}

fn run_thumb() -> Result<(), String> {
    println!("Emulate THUMB code");
    let mut emu = load(&THUMB_CODE, EmulatorConfig::with_mode(Mode::Thumb))?;
    emu.registers_mut().set(Register::Sp, 0x1234);
    add_tracing_hooks(&mut emu, AddressRange::All);

    execute(&mut emu, ADDRESS | 1, THUMB_CODE.len(), None)?;

    println!(">>> Emulation done. Below is the CPU context");
    println!(">>> SP = {:#x}", emu.registers().sp());
    Ok(())
}

fn run_program(args: &RunArgs) -> Result<(), String> {
    let mut emu = load(&args.code, EmulatorConfig::default())?;
    for &(register, value) in &args.assignments {
        emu.reg_write(register.id(), value)
            .map_err(|err| err.to_string())?;
    }

    let begin = if args.thumb { ADDRESS | 1 } else { ADDRESS };
    info!(
        bytes = args.code.len(),
        thumb = args.thumb,
        count = ?args.count,
        "running program"
    );
    let summary = execute(&mut emu, begin, args.code.len(), args.count)?;

    println!(
        ">>> Executed {} instructions in {} blocks ({:?})",
        summary.instructions, summary.blocks, summary.halt
    );
    for register in Register::CORE {
        println!(">>> {register:?} = {:#010x}", emu.registers().get(register));
    }
    println!(">>> APSR = {:#010x}", emu.registers().apsr());
    println!(">>> mode = {}", emu.mode());
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Invocation(invocation)) => {
            init_tracing(invocation.verbose);
            let result = match &invocation.command {
                Command::Arm => run_arm(),
                Command::Thumb => run_thumb(),
                Command::Run(args) => run_program(args),
            };
            match result {
                Ok(()) => 0,
                Err(error) => {
                    eprintln!("ERROR: {error}");
                    1
                }
            }
        }
        Err(error) => {
            eprintln!("ERROR: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}
