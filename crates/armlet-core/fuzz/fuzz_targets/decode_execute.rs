#![no_main]

use armlet_core::{Decoder, Emulator, Mode, RunOptions, PAGE_SIZE};
use libfuzzer_sys::fuzz_target;

const BASE: u32 = 0x0001_0000;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, code)) = data.split_first() else {
        return;
    };
    if code.len() > PAGE_SIZE as usize {
        return;
    }

    let mode = if selector & 1 == 0 { Mode::Arm } else { Mode::Thumb };
    let _ = Decoder::decode(code, mode);

    let mut emu = Emulator::default();
    if emu.mem_map(BASE, 2 * PAGE_SIZE).is_err() || emu.mem_write(BASE, code).is_err() {
        return;
    }
    let begin = if mode == Mode::Thumb { BASE | 1 } else { BASE };
    let _ = emu.start(begin, BASE + 2 * PAGE_SIZE, RunOptions::count(256));
});
