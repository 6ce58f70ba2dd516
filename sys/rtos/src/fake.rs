// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-in for the kernel binding.
//!
//! Behaves like the pre-scheduler boot window: single logical thread,
//! no-op locks, a manually advanced tick. Test hooks (`set_*`) let unit
//! tests stage heap numbers, task tables and the calling task's number.
//! The critical section is a real spin lock so multi-threaded host tests
//! can exercise packet-granularity exclusion; it is not reentrant, which
//! mirrors the target rule that critical sections never nest here.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex as SpinMutex;

use crate::{TaskSnapshot, MAX_SNAPSHOT};

static TICKS: AtomicU32 = AtomicU32::new(0);
static CURRENT_TASK: AtomicU32 = AtomicU32::new(0);
static FREE_HEAP: AtomicU32 = AtomicU32::new(96 * 1024);
static MIN_FREE_HEAP: AtomicU32 = AtomicU32::new(90 * 1024);
static CRITICAL: SpinMutex<()> = SpinMutex::new(());
static TASKS: SpinMutex<(heapless::Vec<TaskSnapshot, MAX_SNAPSHOT>, u32)> =
    SpinMutex::new((heapless::Vec::new(), 0));

pub fn scheduler_running() -> bool {
    false
}

pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    let _guard = CRITICAL.lock();
    f()
}

pub fn tick_count() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

pub fn delay_until(prev_wake: &mut u32, increment: u32) {
    *prev_wake = prev_wake.wrapping_add(increment);
    TICKS.fetch_max(*prev_wake, Ordering::Relaxed);
}

pub fn create_task(
    _entry: extern "C" fn(*mut core::ffi::c_void),
    name: &'static [u8],
    _stack_words: u32,
    _priority: u32,
    _number: u16,
) -> bool {
    debug_assert_eq!(name.last(), Some(&0));
    true
}

pub fn start_scheduler() -> ! {
    panic!("scheduler start is target-only");
}

pub fn current_task_number() -> u16 {
    CURRENT_TASK.load(Ordering::Relaxed) as u16
}

pub fn task_number_of(_handle: crate::RawTaskHandle) -> u16 {
    CURRENT_TASK.load(Ordering::Relaxed) as u16
}

pub fn core_id() -> u8 {
    0
}

pub fn free_heap() -> u32 {
    FREE_HEAP.load(Ordering::Relaxed)
}

pub fn min_free_heap() -> u32 {
    MIN_FREE_HEAP.load(Ordering::Relaxed)
}

pub fn task_snapshot(out: &mut [TaskSnapshot]) -> (usize, u32) {
    let staged = TASKS.lock();
    let n = staged.0.len().min(out.len());
    out[..n].copy_from_slice(&staged.0[..n]);
    (n, staged.1)
}

pub fn set_ticks(t: u32) {
    TICKS.store(t, Ordering::Relaxed);
}

pub fn set_current_task(number: u16) {
    CURRENT_TASK.store(number as u32, Ordering::Relaxed);
}

pub fn set_heap(free: u32, min_free: u32) {
    FREE_HEAP.store(free, Ordering::Relaxed);
    MIN_FREE_HEAP.store(min_free, Ordering::Relaxed);
}

pub fn set_tasks(tasks: &[TaskSnapshot], total_runtime: u32) {
    let mut staged = TASKS.lock();
    staged.0.clear();
    for t in tasks.iter().take(MAX_SNAPSHOT) {
        let _ = staged.0.push(*t);
    }
    staged.1 = total_runtime;
}

/// Event flags without a blocking wait: `wait_all_clear` returns the
/// current bits immediately, satisfied or not, which is what the
/// monitor-decision tests need.
pub struct EventGroup(AtomicU32);

impl EventGroup {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn init(&self) {}

    pub fn set_bits(&self, bits: u32) {
        self.0.fetch_or(bits, Ordering::SeqCst);
    }

    pub fn wait_all_clear(&self, bits: u32, _timeout_ticks: u32) -> u32 {
        let current = self.0.load(Ordering::SeqCst);
        if current & bits == bits {
            self.0.fetch_and(!bits, Ordering::SeqCst);
        }
        current
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RawMutex {
    locked: AtomicBool,
}

impl RawMutex {
    pub const fn new() -> Self {
        Self { locked: AtomicBool::new(false) }
    }

    pub fn init(&self) {}

    pub fn acquire(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}
