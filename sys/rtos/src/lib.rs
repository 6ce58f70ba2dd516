// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed interface to the SMP kernel.
//!
//! The kernel itself is an external collaborator; this crate is the one
//! place its C ABI is spelled out. Everything above it sees ordinary Rust
//! functions and types. On `target_os = "none"` the backend is the real
//! FFI surface; everywhere else a functional fake stands in so the rest
//! of the workspace builds and tests on the host.
//!
//! The interface assumes the kernel is built with the trace facility,
//! run-time stats, a 1 kHz tick, and `configSTACK_DEPTH_TYPE` /
//! `UBaseType_t` both 32 bits wide, which is how the board image
//! configures it.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        mod port;
        use port as imp;
    } else {
        pub mod fake;
        use fake as imp;
    }
}

/// Kernel tick frequency. The drift-free delay and all timeout math are
/// expressed in these ticks.
pub const TICK_HZ: u32 = 1_000;

pub const fn ms_to_ticks(ms: u32) -> u32 {
    // 1 kHz tick: one tick per millisecond.
    ms * (TICK_HZ / 1_000)
}

/// Priorities. The kernel is configured for eight levels; the top one is
/// reserved for the watchdog monitor so nothing can starve it.
pub const PRIORITY_IDLE: u32 = 0;
pub const PRIORITY_MAX_APP: u32 = 7;

/// One row of the task enumeration. `state` uses the kernel's reporting
/// order (running, ready, blocked, suspended, deleted, invalid).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub number: u16,
    pub state: u8,
    pub priority: u8,
    pub stack_hwm_words: u16,
    pub runtime: u32,
}

/// Up to this many tasks come back from [`task_snapshot`].
pub const MAX_SNAPSHOT: usize = 16;

/// Opaque kernel task handle, as hooks receive it from the C side.
pub type RawTaskHandle = *mut core::ffi::c_void;

pub use imp::{
    core_id, create_task, critical, current_task_number, delay_until, free_heap,
    min_free_heap, scheduler_running, start_scheduler, task_number_of, task_snapshot,
    tick_count, EventGroup,
};

/// A kernel-backed mutex around a value.
///
/// `init` creates the underlying kernel object and must run before the
/// scheduler starts (the boot sequence is single-threaded, so locking is
/// a no-op until then anyway). After the scheduler is up, `lock` blocks
/// in the kernel.
pub struct Mutex<T> {
    raw: imp::RawMutex,
    cell: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: imp::RawMutex::new(),
            cell: UnsafeCell::new(value),
        }
    }

    /// Creates the kernel mutex object. Call once, pre-scheduler.
    pub fn init(&self) {
        self.raw.init();
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.acquire();
        MutexGuard { mutex: self }
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the raw mutex serializes access while the guard lives.
        unsafe { &*self.mutex.cell.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.cell.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.release();
    }
}
