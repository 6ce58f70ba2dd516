// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The only legal path for mutating flash.
//!
//! Erasing or programming flash pauses execute-in-place, so both cores
//! must be parked first. The vendor SDK's `flash_safe_execute` does that
//! coordination — but only once the scheduler is running: before that
//! there is no second core to park and no lockout task to schedule, and
//! calling it would wait forever. [`safe_flash`] picks the right
//! discipline for the moment it is called, and feeds the hardware
//! watchdog on the way in because a worst-case sector erase eats a real
//! fraction of the watchdog window.

#![cfg_attr(not(test), no_std)]

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        mod vendor;
        use vendor as imp;
        pub use vendor::XipFlash;
    } else {
        mod fake;
        use fake as imp;
    }
}

/// Runs `f` with flash writable. Returns `false` when the vendor
/// primitive reports failure; callers treat that as an I/O error on
/// whatever they were persisting.
pub fn safe_flash<F: FnOnce()>(f: F) -> bool {
    // A sector erase can approach 400 ms; start from a full window.
    drv_scratch::watchdog_feed();
    if !rtos::scheduler_running() {
        // Single core, nothing else running: a plain IRQ-disabled
        // section is the whole requirement, and the vendor primitive
        // would deadlock here.
        rtos::critical(f);
        return true;
    }
    imp::execute(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_scheduler_path_runs_inline_and_feeds() {
        let fed_before = drv_scratch::fake::feed_count();
        let mut ran = false;
        assert!(safe_flash(|| ran = true));
        assert!(ran);
        assert_eq!(drv_scratch::fake::feed_count(), fed_before + 1);
    }
}
