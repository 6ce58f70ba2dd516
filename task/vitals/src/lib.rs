// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The health telemetry supervisor task.
//!
//! A drift-free periodic loop at `idle + 1`: enumerate the live tasks,
//! turn run-time counter deltas into CPU percentages, pack one
//! fixed-width packet, push it at the probe, check in with the watchdog.
//! Everything is sized for the worst case up front — the enumeration
//! array and the packet buffer live on this task's (deliberately
//! generous) stack, and a full channel just costs one sample.
//!
//! CPU share is a *delta* against the previous sample, so the first
//! sample reports zero and a wrap of the 32-bit run-time counter (about
//! every 71 minutes at 1 MHz) resets the baseline instead of producing
//! a garbage ratio.

#![cfg_attr(not(test), no_std)]

use rtos::TaskSnapshot;
use vitals_wire::{pack, Header, TaskEntry, KIND_VITALS, MAX_TASKS};
use zerocopy::little_endian::{U16, U32};

/// Stack for the supervisor task: the system-state enumeration is the
/// deepest frame in the firmware.
pub const STACK_WORDS: u32 = 1024;

/// Priority just above idle; telemetry must never crowd real work.
pub const PRIORITY: u32 = rtos::PRIORITY_IDLE + 1;

/// Per-task CPU accounting between samples.
pub struct CpuTracker {
    prev_runtime: [(u16, u32); MAX_TASKS],
    prev_len: usize,
    prev_total: u32,
    primed: bool,
}

impl CpuTracker {
    pub const fn new() -> Self {
        Self {
            prev_runtime: [(0, 0); MAX_TASKS],
            prev_len: 0,
            prev_total: 0,
            primed: false,
        }
    }

    /// Computes each task's share of the run-time delta since the last
    /// call, 0-100 into `pct`. The first call and any counter wrap
    /// yield zeros and re-baseline.
    pub fn update(&mut self, snaps: &[TaskSnapshot], total: u32, pct: &mut [u8]) {
        debug_assert!(snaps.len() <= MAX_TASKS && pct.len() >= snaps.len());
        let delta_total = total.wrapping_sub(self.prev_total);
        let usable = self.primed && total >= self.prev_total && delta_total > 0;

        for (i, snap) in snaps.iter().enumerate() {
            let share = if usable {
                let prev = self
                    .prev_runtime[..self.prev_len]
                    .iter()
                    .find(|(n, _)| *n == snap.number)
                    .map(|(_, r)| *r);
                match prev {
                    // A task first seen this round has no baseline.
                    None => 0,
                    Some(prev) if snap.runtime < prev => 0, // per-task wrap
                    Some(prev) => {
                        let delta = (snap.runtime - prev) as u64;
                        ((delta * 100) / delta_total as u64).min(100) as u8
                    }
                }
            } else {
                0
            };
            pct[i] = share;
        }

        for (slot, snap) in self.prev_runtime.iter_mut().zip(snaps) {
            *slot = (snap.number, snap.runtime);
        }
        self.prev_len = snaps.len();
        self.prev_total = total;
        self.primed = true;
    }
}

impl Default for CpuTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// One sample: enumerate, account, pack, emit. Split from the loop so
/// the host tests can drive it tick by tick.
pub fn sample_and_emit(tracker: &mut CpuTracker) {
    let mut snaps = [TaskSnapshot::default(); rtos::MAX_SNAPSHOT];
    let (n, total) = rtos::task_snapshot(&mut snaps);
    let snaps = &snaps[..n.min(MAX_TASKS)];

    let mut pct = [0u8; MAX_TASKS];
    tracker.update(snaps, total, &mut pct);

    let header = Header {
        kind: KIND_VITALS,
        tick: U32::new(rtos::tick_count()),
        free_heap: U32::new(rtos::free_heap()),
        min_free_heap: U32::new(rtos::min_free_heap()),
        task_count: snaps.len() as u8,
    };
    let mut entries = [TaskEntry {
        number: 0,
        state: 0,
        priority: 0,
        stack_hwm_words: U16::new(0),
        cpu_pct: 0,
        runtime_lo16: U16::new(0),
    }; MAX_TASKS];
    for (i, snap) in snaps.iter().enumerate() {
        entries[i] = TaskEntry {
            number: snap.number as u8,
            state: snap.state,
            priority: snap.priority,
            stack_hwm_words: U16::new(snap.stack_hwm_words),
            cpu_pct: pct[i],
            runtime_lo16: U16::new(snap.runtime as u16),
        };
    }

    let mut buf = [0u8; vitals_wire::MAX_PACKET];
    if let Some(len) = pack(&header, &entries[..snaps.len()], &mut buf) {
        // Drop-if-full: a lost sample under pressure beats a delayed one.
        drv_rtt::write(drv_rtt::Channel::Vitals, &buf[..len]);
    }
}

/// The supervisor task body. `checkin_bit` is this task's own liveness
/// bit with the cooperative watchdog.
pub fn run(checkin_bit: u32) -> ! {
    let interval = rtos::ms_to_ticks(confstore::config().telemetry_interval_ms);
    let mut tracker = CpuTracker::new();
    let mut last_wake = rtos::tick_count();
    loop {
        rtos::delay_until(&mut last_wake, interval);
        sample_and_emit(&mut tracker);
        task_dogsitter::checkin(checkin_bit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(number: u16, runtime: u32) -> TaskSnapshot {
        TaskSnapshot {
            number,
            state: 1,
            priority: 1,
            stack_hwm_words: 300,
            runtime,
        }
    }

    #[test]
    fn first_sample_is_all_zero() {
        let mut t = CpuTracker::new();
        let mut pct = [0xFFu8; MAX_TASKS];
        t.update(&[snap(1, 500), snap(2, 500)], 1000, &mut pct);
        assert_eq!(&pct[..2], &[0, 0]);
    }

    #[test]
    fn deltas_make_percentages() {
        let mut t = CpuTracker::new();
        let mut pct = [0u8; MAX_TASKS];
        t.update(&[snap(1, 0), snap(2, 0)], 1000, &mut pct);
        // Over the next 1000 counts, task 1 ran 250, task 2 ran 700.
        t.update(&[snap(1, 250), snap(2, 700)], 2000, &mut pct);
        assert_eq!(&pct[..2], &[25, 70]);
    }

    #[test]
    fn counter_wrap_rebaselines() {
        let mut t = CpuTracker::new();
        let mut pct = [0u8; MAX_TASKS];
        t.update(&[snap(1, u32::MAX - 10)], u32::MAX - 5, &mut pct);
        t.update(&[snap(1, 20)], 30, &mut pct);
        assert_eq!(pct[0], 0);
        // After the re-baseline the math resumes.
        t.update(&[snap(1, 70)], 130, &mut pct);
        assert_eq!(pct[0], 50);
    }

    #[test]
    fn unseen_task_reports_zero() {
        let mut t = CpuTracker::new();
        let mut pct = [0u8; MAX_TASKS];
        t.update(&[snap(1, 0)], 100, &mut pct);
        t.update(&[snap(1, 50), snap(9, 40)], 200, &mut pct);
        assert_eq!(&pct[..2], &[50, 0]);
    }

    // Stateful end-to-end sample on the fake kernel; one test because
    // the staged task table and capture channel are process-wide.
    #[test]
    fn packet_on_the_wire() {
        rtos::fake::set_ticks(500);
        rtos::fake::set_heap(96_000, 90_112);
        rtos::fake::set_tasks(&[snap(1, 100), snap(2, 300)], 1000);
        drv_rtt::fake::drain(drv_rtt::Channel::Vitals);

        let mut tracker = CpuTracker::new();
        sample_and_emit(&mut tracker);
        rtos::fake::set_tasks(&[snap(1, 600), snap(2, 800)], 2000);
        rtos::fake::set_ticks(1000);
        sample_and_emit(&mut tracker);

        let stream = drv_rtt::fake::drain(drv_rtt::Channel::Vitals);
        let (h1, _, n1, used) = vitals_wire::parse(&stream).unwrap();
        assert_eq!(h1.tick.get(), 500);
        assert_eq!(h1.free_heap.get(), 96_000);
        assert_eq!(n1, 2);

        let (h2, e2, n2, _) = vitals_wire::parse(&stream[used..]).unwrap();
        assert_eq!(h2.tick.get(), 1000);
        assert_eq!(n2, 2);
        assert_eq!(e2[0].cpu_pct, 50); // 500 of 1000 counts
        assert_eq!(e2[1].cpu_pct, 50);
        assert_eq!(e2[0].number, 1);
        assert_eq!(e2[0].stack_hwm_words.get(), 300);
    }
}
