// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot orchestrator and application tasks.
//!
//! Initialization order matters and is fixed: transport and logging
//! first so every later failure has somewhere to go; then the
//! filesystem and config; then the crash reporter (it needs both); then
//! the watchdog layer and the tasks it will monitor; the scheduler
//! last. Every failure on this path downgrades to defaults-and-log —
//! a box that boots with reduced function beats one that halts.

use core::ffi::c_void;

use panic_halt as _;

mod sdk {
    extern "C" {
        pub fn stdio_init_all() -> bool;
        pub fn gpio_init(pin: u32);
        pub fn gpio_set_dir(pin: u32, out: bool);
    }
}

/// Stable task numbers: these appear in crash records and telemetry and
/// must never be renumbered.
const TASK_NUM_BLINKY: u16 = 1;
const TASK_NUM_VITALS: u16 = 2;
const TASK_NUM_MONITOR: u16 = 3;

/// Cooperative watchdog bits, one per monitored task.
const WDG_BIT_BLINKY: u32 = 1 << 0;
const WDG_BIT_SUPERVISOR: u32 = 1 << 1;

const BLINKY_STACK_WORDS: u32 = 512;
const BLINKY_PRIORITY: u32 = 1;
const LED_PIN: u32 = 25;

/// SIO GPIO_OUT_XOR: single-cycle LED toggle, no read-modify-write.
const SIO_GPIO_OUT_XOR: *mut u32 = 0xD000_001C as *mut u32;

const fn parse_u32_dec(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut v: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        v = v.wrapping_mul(10).wrapping_add((bytes[i] - b'0') as u32);
        i += 1;
    }
    v
}

/// Derived by the build script from the full set of log format strings;
/// the host decoder checks it against its CSV on the first packet.
const BUILD_ID: u32 = parse_u32_dec(env!("AILOG_BUILD_ID"));

#[no_mangle]
pub extern "C" fn main() -> i32 {
    unsafe { sdk::stdio_init_all() };
    drv_rtt::init();
    ailog::info!("BUILD_ID: %x", BUILD_ID);

    confstore::init();
    blackbox::report_boot_crash();

    let cfg = confstore::config();
    task_dogsitter::init(cfg.watchdog_timeout_ms);

    if rtos::create_task(
        blinky_entry,
        b"blinky\0",
        BLINKY_STACK_WORDS,
        BLINKY_PRIORITY,
        TASK_NUM_BLINKY,
    ) {
        task_dogsitter::register(WDG_BIT_BLINKY);
    } else {
        ailog::error!("blinky task allocation failed");
    }

    if rtos::create_task(
        vitals_entry,
        b"vitals\0",
        task_vitals::STACK_WORDS,
        task_vitals::PRIORITY,
        TASK_NUM_VITALS,
    ) {
        task_dogsitter::register(WDG_BIT_SUPERVISOR);
    } else {
        ailog::error!("telemetry supervisor allocation failed");
    }

    if task_dogsitter::registered() != 0 && !task_dogsitter::start(TASK_NUM_MONITOR) {
        ailog::error!("watchdog monitor allocation failed");
    }

    ailog::info!("boot complete, starting scheduler");
    rtos::start_scheduler()
}

extern "C" fn blinky_entry(_: *mut c_void) {
    unsafe {
        sdk::gpio_init(LED_PIN);
        sdk::gpio_set_dir(LED_PIN, true);
    }
    let delay = rtos::ms_to_ticks(confstore::config().blink_delay_ms);
    let mut last_wake = rtos::tick_count();
    loop {
        unsafe { core::ptr::write_volatile(SIO_GPIO_OUT_XOR, 1 << LED_PIN) };
        ailog::debug!("blink");
        task_dogsitter::checkin(WDG_BIT_BLINKY);
        rtos::delay_until(&mut last_wake, delay);
    }
}

extern "C" fn vitals_entry(_: *mut c_void) {
    task_vitals::run(WDG_BIT_SUPERVISOR)
}
