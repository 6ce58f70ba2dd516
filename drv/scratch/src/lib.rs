// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Watchdog peripheral driver: scratch slots, feeding, and the
//! controlled reset.
//!
//! The four scratch slots this firmware owns are the cross-reboot
//! mailbox for crash records. The write side runs in fault context, so
//! everything here is a handful of volatile register accesses: no locks,
//! no allocation, nothing that can sleep.

#![cfg_attr(not(test), no_std)]

use drv_scratch_api::CrashRecord;

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        mod hw;
        use hw as imp;
    } else {
        pub mod fake;
        use fake as imp;
    }
}

pub use imp::{
    get, set, trigger_reset, watchdog_caused_reboot, watchdog_enable, watchdog_feed,
};

/// Stores a crash record: payload slots first, the discriminating magic
/// last, so a reset racing the writes can never expose a magic with a
/// half-written payload.
pub fn store_record(record: &CrashRecord) {
    let words = record.to_words();
    set(1, words[1]);
    set(2, words[2]);
    set(3, words[3]);
    set(0, words[0]);
}

/// Reads and consumes the crash record, clearing slot 0 so a later
/// non-crash reset cannot re-report it. `None` when no known magic is
/// present.
pub fn take_record() -> Option<CrashRecord> {
    let words = [get(0), get(1), get(2), get(3)];
    let record = CrashRecord::from_words(words)?;
    set(0, 0);
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_scratch_api::MAGIC_STACK_OVERFLOW;

    // One test: the fake slots are process-wide and the harness runs
    // tests concurrently.
    #[test]
    fn mailbox_protocol() {
        let rec = CrashRecord::StackOverflow { core: 1, task: 3 };
        store_record(&rec);
        assert_eq!(get(0), MAGIC_STACK_OVERFLOW);

        assert_eq!(take_record(), Some(rec));
        assert_eq!(get(0), 0);
        assert_eq!(take_record(), None);

        // An unknown magic is not ours to clear: scratch contents after
        // power-on are undefined and the reporter never trusts them.
        set(0, 0x1234_5678);
        set(1, 9);
        assert_eq!(take_record(), None);
        assert_eq!(get(0), 0x1234_5678);
        set(0, 0);
    }
}
