// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-in: scratch slots in atomics, reset and reboot-reason as
//! observable flags tests can stage and inspect.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

static SLOTS: [AtomicU32; 4] = [
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
];
static WATCHDOG_ENABLED: AtomicBool = AtomicBool::new(false);
static WATCHDOG_TIMEOUT_MS: AtomicU32 = AtomicU32::new(0);
static FEED_COUNT: AtomicU32 = AtomicU32::new(0);
static CAUSED_REBOOT: AtomicBool = AtomicBool::new(false);

pub fn set(index: usize, value: u32) {
    SLOTS[index].store(value, Ordering::SeqCst);
}

pub fn get(index: usize) -> u32 {
    SLOTS[index].load(Ordering::SeqCst)
}

pub fn watchdog_enable(delay_ms: u32, _pause_on_debug: bool) {
    WATCHDOG_TIMEOUT_MS.store(delay_ms, Ordering::SeqCst);
    WATCHDOG_ENABLED.store(true, Ordering::SeqCst);
}

pub fn watchdog_feed() {
    FEED_COUNT.fetch_add(1, Ordering::SeqCst);
}

pub fn watchdog_caused_reboot() -> bool {
    CAUSED_REBOOT.load(Ordering::SeqCst)
}

/// Panics instead of resetting so host tests can observe the request
/// with `catch_unwind`.
pub fn trigger_reset() -> ! {
    panic!("controlled reset requested");
}

pub fn set_watchdog_caused_reboot(v: bool) {
    CAUSED_REBOOT.store(v, Ordering::SeqCst);
}

pub fn watchdog_enabled() -> (bool, u32) {
    (
        WATCHDOG_ENABLED.load(Ordering::SeqCst),
        WATCHDOG_TIMEOUT_MS.load(Ordering::SeqCst),
    )
}

pub fn feed_count() -> u32 {
    FEED_COUNT.load(Ordering::SeqCst)
}
