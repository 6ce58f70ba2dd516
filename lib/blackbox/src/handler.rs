// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The capture half: hard fault vector, extractor, and kernel hooks.
//!
//! Rules of this module: no locks, no heap, no kernel call that can
//! sleep. Allowed reads are the stacked exception frame, the CPUID
//! register, and the current task's number (pointer reads on this
//! core). The fault path is placed in RAM via the `.time_critical`
//! sections so it stays executable while a flash operation has paused
//! execute-in-place.

use core::arch::global_asm;
use core::ffi::c_void;

use drv_scratch_api::CrashRecord;

// The vector stub. On exception entry the core has pushed
// {r0-r3, r12, lr, pc, xpsr} onto whichever stack was active, and LR
// holds EXC_RETURN; bit 2 says which stack that was. armv6-m cannot
// `tst` a high register, so LR moves low first. The matching stack
// pointer becomes the extractor's first argument, then a tail call.
// Overrides the SDK runtime's weak `isr_hardfault`.
global_asm!(
    r#"
    .syntax unified
    .cpu cortex-m0plus
    .section .time_critical.isr_hardfault, "ax"
    .global isr_hardfault
    .type isr_hardfault, %function
    .thumb_func
isr_hardfault:
    mov r0, lr
    movs r1, #4
    tst r0, r1
    bne 1f
    mrs r0, msp
    b 2f
1:
    mrs r0, psp
2:
    ldr r1, =hard_fault_c
    bx r1
    .ltorg
"#
);

/// C-level extractor, tail-called from the stub with the faulting stack
/// pointer. Stack frame words: 5 = LR, 6 = PC, 7 = xPSR.
#[no_mangle]
#[inline(never)]
#[link_section = ".time_critical.hard_fault_c"]
pub extern "C" fn hard_fault_c(frame: *const u32) -> ! {
    let (pc, lr, xpsr) = unsafe {
        (
            frame.add(6).read_volatile(),
            frame.add(5).read_volatile(),
            frame.add(7).read_volatile(),
        )
    };
    drv_scratch::store_record(&CrashRecord::HardFault {
        pc,
        lr,
        xpsr_hi: (xpsr >> 16) as u16,
        core: rtos::core_id(),
        task: rtos::current_task_number(),
    });
    drv_scratch::trigger_reset()
}

/// Kernel out-of-memory hook: record how much heap was left and reboot
/// into the reporter instead of limping on.
#[no_mangle]
pub extern "C" fn vApplicationMallocFailedHook() {
    drv_scratch::store_record(&CrashRecord::AllocFailure {
        free_bytes: rtos::free_heap(),
        core: rtos::core_id(),
    });
    drv_scratch::trigger_reset()
}

/// Kernel stack-overflow hook: the offending task's handle arrives from
/// the kernel's stack check; its number goes into the record.
#[no_mangle]
pub extern "C" fn vApplicationStackOverflowHook(task: *mut c_void, _name: *const u8) {
    drv_scratch::store_record(&CrashRecord::StackOverflow {
        core: rtos::core_id(),
        task: rtos::task_number_of(task),
    });
    drv_scratch::trigger_reset()
}
