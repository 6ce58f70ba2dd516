// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative watchdog: the layer that knows *which* task hung.
//!
//! The hardware watchdog resets the chip when nobody feeds it, but it
//! cannot say why. Here every monitored task owns one event bit and
//! proves liveness by [`checkin`]; the monitor task feeds the hardware
//! only when the whole set has checked in within the period. When a bit
//! goes missing, the guilty set is written to the scratch registers
//! *before* the hardware window runs out, so the next boot can name the
//! hung task. The monitor keeps looping after a miss: if the stuck task
//! recovers inside the remaining hardware window, the system rides
//! through with nothing worse than a log line.
//!
//! The hardware watchdog is armed from the monitor task's first
//! iteration, not from boot: arming earlier would leave a window where
//! nothing can feed it yet.

#![cfg_attr(not(test), no_std)]

use core::ffi::c_void;
use core::sync::atomic::{AtomicU32, Ordering};

use drv_scratch_api::CrashRecord;
use rtos::EventGroup;

/// Monitor wait period: well under the hardware timeout (8 s default)
/// so one missed round still leaves the hardware window to recover in.
pub const CHECK_PERIOD_MS: u32 = 5_000;

/// Event groups carry 24 usable bits on this kernel.
pub const MAX_BIT: u32 = 1 << 23;

const MONITOR_STACK_WORDS: u32 = 512;

static FLAGS: EventGroup = EventGroup::new();
static EXPECTED: AtomicU32 = AtomicU32::new(0);
static HW_TIMEOUT_MS: AtomicU32 = AtomicU32::new(0);

/// Creates the event-flag set and records the hardware timeout. The
/// hardware watchdog itself stays disarmed until the monitor runs.
pub fn init(hw_timeout_ms: u32) {
    FLAGS.init();
    HW_TIMEOUT_MS.store(hw_timeout_ms, Ordering::Relaxed);
}

/// Adds a task's bit to the expected set. Pre-scheduler only; the
/// critical section stands in for read-modify-write on a core without
/// atomic RMW.
pub fn register(bit: u32) {
    debug_assert!(bit != 0 && bit <= MAX_BIT && bit.is_power_of_two());
    rtos::critical(|| {
        let cur = EXPECTED.load(Ordering::Relaxed);
        EXPECTED.store(cur | bit, Ordering::Relaxed);
    });
}

/// Liveness proof, callable from any task, cheap enough for inner loops.
pub fn checkin(bit: u32) {
    FLAGS.set_bits(bit);
}

/// The expected mask so far. A monitor over an empty set would feed the
/// hardware unconditionally, so boot skips `start` when this is zero.
pub fn registered() -> u32 {
    EXPECTED.load(Ordering::Relaxed)
}

/// Spawns the monitor at the highest application priority so a runaway
/// lower-priority task cannot starve the watchdog logic itself.
pub fn start(task_number: u16) -> bool {
    rtos::create_task(
        monitor_entry,
        b"dogsitter\0",
        MONITOR_STACK_WORDS,
        rtos::PRIORITY_MAX_APP,
        task_number,
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Feed,
    Starved { missing: u32 },
}

/// The monitor's whole decision, pure: which bits were owed and did not
/// arrive.
pub fn assess(expected: u32, received: u32) -> Verdict {
    if received & expected == expected {
        Verdict::Feed
    } else {
        Verdict::Starved { missing: expected & !received }
    }
}

/// One monitor round: wait for the full set, then feed or report.
fn service(expected: u32) -> Verdict {
    let received = FLAGS.wait_all_clear(expected, rtos::ms_to_ticks(CHECK_PERIOD_MS));
    let verdict = assess(expected, received);
    match verdict {
        Verdict::Feed => drv_scratch::watchdog_feed(),
        Verdict::Starved { missing } => {
            drv_scratch::store_record(&CrashRecord::WatchdogTimeout {
                missing,
                tick: rtos::tick_count(),
                registered: expected,
            });
            ailog::error!("watchdog starved, missing bits %x", missing);
            // No feed: either the stragglers show up next round or the
            // hardware resets us with the record already in scratch.
        }
    }
    verdict
}

extern "C" fn monitor_entry(_: *mut c_void) {
    let timeout = HW_TIMEOUT_MS.load(Ordering::Relaxed);
    drv_scratch::watchdog_enable(timeout, true);
    ailog::info!("watchdog armed, %u ms window", timeout);
    loop {
        service(EXPECTED.load(Ordering::Relaxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_scratch_api::MAGIC_WATCHDOG_TIMEOUT;

    const BIT_BLINKY: u32 = 1 << 0;
    const BIT_SUPERVISOR: u32 = 1 << 1;

    #[test]
    fn assess_names_the_guilty_bits() {
        assert_eq!(assess(0b11, 0b11), Verdict::Feed);
        assert_eq!(assess(0b11, 0b111), Verdict::Feed);
        assert_eq!(assess(0b11, 0b10), Verdict::Starved { missing: 0b01 });
        assert_eq!(assess(0b11, 0), Verdict::Starved { missing: 0b11 });
    }

    // One stateful test: the flag set, expected mask and fake watchdog
    // are process-wide.
    #[test]
    fn monitor_rounds() {
        init(8000);
        register(BIT_BLINKY);
        register(BIT_SUPERVISOR);
        let expected = EXPECTED.load(Ordering::Relaxed);
        assert_eq!(expected, BIT_BLINKY | BIT_SUPERVISOR);

        // Everyone checks in: exactly one feed, bits consumed.
        let fed = drv_scratch::fake::feed_count();
        checkin(BIT_BLINKY);
        checkin(BIT_SUPERVISOR);
        assert_eq!(service(expected), Verdict::Feed);
        assert_eq!(drv_scratch::fake::feed_count(), fed + 1);

        // The clear-on-exit consumed last round's bits: a round with
        // only one check-in starves and records the guilty set.
        rtos::fake::set_ticks(123_456);
        checkin(BIT_SUPERVISOR);
        assert_eq!(
            service(expected),
            Verdict::Starved { missing: BIT_BLINKY }
        );
        assert_eq!(drv_scratch::fake::feed_count(), fed + 1); // no feed
        assert_eq!(drv_scratch::get(0), MAGIC_WATCHDOG_TIMEOUT);
        assert_eq!(
            drv_scratch::take_record(),
            Some(CrashRecord::WatchdogTimeout {
                missing: BIT_BLINKY,
                tick: 123_456,
                registered: expected,
            })
        );

        // Recovery: the straggler comes back and feeding resumes.
        checkin(BIT_BLINKY);
        checkin(BIT_SUPERVISOR);
        assert_eq!(service(expected), Verdict::Feed);
        assert_eq!(drv_scratch::fake::feed_count(), fed + 2);
    }
}
