// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level access to the RP2040 watchdog block, plus the vendor
//! SDK calls that drive it.

use core::ptr::{read_volatile, write_volatile};

const WATCHDOG_BASE: usize = 0x4005_8000;
/// SCRATCH0 lives at +0x0C; SCRATCH4-7 beyond it belong to the boot ROM.
const SCRATCH0: usize = WATCHDOG_BASE + 0x0C;

mod sdk {
    extern "C" {
        pub fn watchdog_enable(delay_ms: u32, pause_on_debug: bool);
        pub fn watchdog_update();
        pub fn watchdog_reboot(pc: u32, sp: u32, delay_ms: u32);
        pub fn watchdog_caused_reboot() -> bool;
    }
}

pub fn set(index: usize, value: u32) {
    debug_assert!(index < 4);
    unsafe { write_volatile((SCRATCH0 + index * 4) as *mut u32, value) };
}

pub fn get(index: usize) -> u32 {
    debug_assert!(index < 4);
    unsafe { read_volatile((SCRATCH0 + index * 4) as *const u32) }
}

/// Arms the hardware watchdog. `pause_on_debug` keeps an attached
/// debugger from eating spurious resets at breakpoints.
pub fn watchdog_enable(delay_ms: u32, pause_on_debug: bool) {
    unsafe { sdk::watchdog_enable(delay_ms, pause_on_debug) };
}

pub fn watchdog_feed() {
    unsafe { sdk::watchdog_update() };
}

/// True when the last reset came from the watchdog — the only case in
/// which scratch contents are meaningful.
pub fn watchdog_caused_reboot() -> bool {
    unsafe { sdk::watchdog_caused_reboot() }
}

/// Requests a controlled reset through the watchdog (scratch slots 0-3
/// are untouched by this) and parks the core in case the reset takes a
/// moment to land.
pub fn trigger_reset() -> ! {
    unsafe { sdk::watchdog_reboot(0, 0, 1) };
    loop {
        core::hint::spin_loop();
    }
}
