// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The real kernel binding, linked against the C kernel and its RP2040
//! SMP port.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::{TaskSnapshot, MAX_SNAPSHOT};

type BaseType = i32;
type UBaseType = u32;
type TickType = u32;

const SCHEDULER_RUNNING: BaseType = 2;
const MAX_DELAY: TickType = 0xFFFF_FFFF;
const QUEUE_TYPE_MUTEX: u8 = 1;
const SEND_TO_BACK: BaseType = 0;

/// Row layout of the kernel's system-state enumeration, matching a build
/// with trace facility, run-time stats and 32-bit stack depths.
#[repr(C)]
#[allow(dead_code)] // mirrors the C struct; not every field is consumed
struct TaskStatus {
    handle: *mut c_void,
    name: *const u8,
    kernel_number: UBaseType,
    state: u32,
    current_priority: UBaseType,
    base_priority: UBaseType,
    runtime: u32,
    stack_base: *mut u8,
    stack_high_water: u32,
}

extern "C" {
    fn vTaskEnterCritical();
    fn vTaskExitCritical();
    fn xTaskGetSchedulerState() -> BaseType;
    fn xTaskGetTickCount() -> TickType;
    fn xTaskDelayUntil(prev_wake: *mut TickType, increment: TickType) -> BaseType;
    fn xTaskCreate(
        entry: extern "C" fn(*mut c_void),
        name: *const u8,
        stack_depth: u32,
        param: *mut c_void,
        priority: UBaseType,
        created: *mut *mut c_void,
    ) -> BaseType;
    fn vTaskStartScheduler();
    fn vTaskSetTaskNumber(task: *mut c_void, number: UBaseType);
    fn uxTaskGetTaskNumber(task: *mut c_void) -> UBaseType;
    fn xTaskGetCurrentTaskHandle() -> *mut c_void;
    fn uxTaskGetSystemState(
        statuses: *mut TaskStatus,
        len: UBaseType,
        total_runtime: *mut u32,
    ) -> UBaseType;
    fn xPortGetFreeHeapSize() -> usize;
    fn xPortGetMinimumEverFreeHeapSize() -> usize;
    fn xEventGroupCreate() -> *mut c_void;
    fn xEventGroupSetBits(group: *mut c_void, bits: u32) -> u32;
    fn xEventGroupWaitBits(
        group: *mut c_void,
        bits: u32,
        clear_on_exit: BaseType,
        wait_for_all: BaseType,
        ticks: TickType,
    ) -> u32;
    fn xQueueCreateMutex(kind: u8) -> *mut c_void;
    fn xQueueSemaphoreTake(queue: *mut c_void, ticks: TickType) -> BaseType;
    fn xQueueGenericSend(
        queue: *mut c_void,
        item: *const c_void,
        ticks: TickType,
        position: BaseType,
    ) -> BaseType;
    fn vTaskSuspendAll();
    fn xTaskResumeAll() -> BaseType;
}

pub fn scheduler_running() -> bool {
    unsafe { xTaskGetSchedulerState() == SCHEDULER_RUNNING }
}

/// The scheduler-level critical section: a hardware spinlock plus an IRQ
/// disable on the executing core, which is the only exclusion that holds
/// against the other core. Before the scheduler starts the other core is
/// not running and this degrades to a plain IRQ disable.
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    if scheduler_running() {
        unsafe { vTaskEnterCritical() };
        let r = f();
        unsafe { vTaskExitCritical() };
        r
    } else {
        let was_active = cortex_m::register::primask::read().is_active();
        cortex_m::interrupt::disable();
        let r = f();
        if was_active {
            // Safety: we were the ones who masked.
            unsafe { cortex_m::interrupt::enable() };
        }
        r
    }
}

pub fn tick_count() -> u32 {
    unsafe { xTaskGetTickCount() }
}

/// Drift-free periodic delay: sleeps until `*prev_wake + increment` and
/// advances `prev_wake`, so a slow iteration does not shift the cadence.
pub fn delay_until(prev_wake: &mut u32, increment: u32) {
    unsafe {
        xTaskDelayUntil(prev_wake, increment);
    }
}

/// Creates a task and stamps it with a stable application-assigned
/// number (the kernel keeps its own ordinal; ours is the one crash and
/// telemetry records carry). `name` must be NUL-terminated.
pub fn create_task(
    entry: extern "C" fn(*mut c_void),
    name: &'static [u8],
    stack_words: u32,
    priority: u32,
    number: u16,
) -> bool {
    debug_assert_eq!(name.last(), Some(&0));
    let mut handle: *mut c_void = ptr::null_mut();
    let ok = unsafe {
        xTaskCreate(
            entry,
            name.as_ptr(),
            stack_words,
            ptr::null_mut(),
            priority,
            &mut handle,
        )
    } == 1;
    if ok {
        unsafe { vTaskSetTaskNumber(handle, number as UBaseType) };
    }
    ok
}

pub fn start_scheduler() -> ! {
    unsafe { vTaskStartScheduler() };
    // Only reached if the kernel could not allocate its idle task.
    loop {
        cortex_m::asm::wfi();
    }
}

/// Application-assigned number of the calling task; 0 before the
/// scheduler runs. Safe from fault context: on this port it is a pair of
/// pointer reads on the current core.
pub fn current_task_number() -> u16 {
    let handle = unsafe { xTaskGetCurrentTaskHandle() };
    if handle.is_null() {
        0
    } else {
        unsafe { uxTaskGetTaskNumber(handle) as u16 }
    }
}

/// Number of an arbitrary task, for hooks that receive a raw handle.
pub fn task_number_of(handle: crate::RawTaskHandle) -> u16 {
    if handle.is_null() {
        0
    } else {
        unsafe { uxTaskGetTaskNumber(handle) as u16 }
    }
}

/// Which of the two cores is executing, from the SIO CPUID register.
pub fn core_id() -> u8 {
    const SIO_CPUID: *const u32 = 0xD000_0000 as *const u32;
    unsafe { ptr::read_volatile(SIO_CPUID) as u8 }
}

pub fn free_heap() -> u32 {
    unsafe { xPortGetFreeHeapSize() as u32 }
}

pub fn min_free_heap() -> u32 {
    unsafe { xPortGetMinimumEverFreeHeapSize() as u32 }
}

/// Enumerates live tasks into `out`, returning the count and the total
/// run-time counter for CPU-share math.
pub fn task_snapshot(out: &mut [TaskSnapshot]) -> (usize, u32) {
    let mut raw: [TaskStatus; MAX_SNAPSHOT] = unsafe { core::mem::zeroed() };
    let mut total_runtime: u32 = 0;
    let n = unsafe {
        uxTaskGetSystemState(raw.as_mut_ptr(), MAX_SNAPSHOT as UBaseType, &mut total_runtime)
    } as usize;
    let n = n.min(out.len()).min(MAX_SNAPSHOT);
    for (dst, src) in out.iter_mut().zip(&raw[..n]) {
        *dst = TaskSnapshot {
            number: unsafe { uxTaskGetTaskNumber(src.handle) as u16 },
            state: src.state as u8,
            priority: src.current_priority as u8,
            stack_hwm_words: src.stack_high_water as u16,
            runtime: src.runtime,
        };
    }
    (n, total_runtime)
}

/// A kernel event-flag group. Construction is const so groups can live in
/// statics; the kernel object appears at `init`.
pub struct EventGroup(AtomicPtr<c_void>);

unsafe impl Send for EventGroup {}
unsafe impl Sync for EventGroup {}

impl EventGroup {
    pub const fn new() -> Self {
        Self(AtomicPtr::new(ptr::null_mut()))
    }

    /// Creates the kernel object. Call once, pre-scheduler.
    pub fn init(&self) {
        self.0.store(unsafe { xEventGroupCreate() }, Ordering::Release);
    }

    pub fn set_bits(&self, bits: u32) {
        let h = self.0.load(Ordering::Acquire);
        if !h.is_null() {
            unsafe { xEventGroupSetBits(h, bits) };
        }
    }

    /// Blocks until all of `bits` are set (clearing them on exit) or the
    /// timeout elapses. Returns the group's bits at the moment of
    /// return, which on timeout is the partial set that did arrive.
    pub fn wait_all_clear(&self, bits: u32, timeout_ticks: u32) -> u32 {
        let h = self.0.load(Ordering::Acquire);
        if h.is_null() {
            return 0;
        }
        unsafe { xEventGroupWaitBits(h, bits, 1, 1, timeout_ticks) }
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Backing for [`crate::Mutex`]: a kernel mutex, falling back to
/// scheduler suspension if `init` never ran, and to nothing before the
/// scheduler starts.
pub struct RawMutex {
    handle: AtomicPtr<c_void>,
}

impl RawMutex {
    pub const fn new() -> Self {
        Self { handle: AtomicPtr::new(ptr::null_mut()) }
    }

    pub fn init(&self) {
        if self.handle.load(Ordering::Acquire).is_null() {
            self.handle
                .store(unsafe { xQueueCreateMutex(QUEUE_TYPE_MUTEX) }, Ordering::Release);
        }
    }

    pub fn acquire(&self) {
        if !scheduler_running() {
            return;
        }
        let h = self.handle.load(Ordering::Acquire);
        if h.is_null() {
            unsafe { vTaskSuspendAll() };
        } else {
            unsafe { xQueueSemaphoreTake(h, MAX_DELAY) };
        }
    }

    pub fn release(&self) {
        if !scheduler_running() {
            return;
        }
        let h = self.handle.load(Ordering::Acquire);
        if h.is_null() {
            unsafe { xTaskResumeAll() };
        } else {
            unsafe { xQueueGenericSend(h, ptr::null(), 0, SEND_TO_BACK) };
        }
    }
}
