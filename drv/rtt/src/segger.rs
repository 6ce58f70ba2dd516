// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binding to the vendor RTT transport library.
//!
//! Buffer storage lives here, statically, and is handed to the control
//! block at init. The `*NoLock` entry point is deliberate: the library's
//! own lock is single-core-only, and callers of [`write_nolock`] hold the
//! scheduler-level critical section instead.

use core::ffi::c_void;
use core::ptr::addr_of_mut;

use crate::Channel;

/// Up-buffer mode: drop the whole write when it does not fit.
const MODE_NO_BLOCK_SKIP: u32 = 1;

extern "C" {
    fn SEGGER_RTT_Init();
    fn SEGGER_RTT_ConfigUpBuffer(
        index: u32,
        name: *const u8,
        buffer: *mut c_void,
        size: u32,
        flags: u32,
    ) -> i32;
    fn SEGGER_RTT_WriteSkipNoLock(index: u32, data: *const c_void, len: u32) -> u32;
}

static mut TERMINAL_BUF: [u8; Channel::Terminal.buffer_len()] =
    [0; Channel::Terminal.buffer_len()];
static mut AILOG_BUF: [u8; Channel::AiLog.buffer_len()] = [0; Channel::AiLog.buffer_len()];
static mut VITALS_BUF: [u8; Channel::Vitals.buffer_len()] = [0; Channel::Vitals.buffer_len()];

static TERMINAL_NAME: &[u8] = b"Terminal\0";
static AILOG_NAME: &[u8] = b"AiLog\0";
static VITALS_NAME: &[u8] = b"Vitals\0";

pub fn init() {
    unsafe {
        SEGGER_RTT_Init();
        SEGGER_RTT_ConfigUpBuffer(
            Channel::Terminal.index(),
            TERMINAL_NAME.as_ptr(),
            addr_of_mut!(TERMINAL_BUF) as *mut c_void,
            Channel::Terminal.buffer_len() as u32,
            MODE_NO_BLOCK_SKIP,
        );
        SEGGER_RTT_ConfigUpBuffer(
            Channel::AiLog.index(),
            AILOG_NAME.as_ptr(),
            addr_of_mut!(AILOG_BUF) as *mut c_void,
            Channel::AiLog.buffer_len() as u32,
            MODE_NO_BLOCK_SKIP,
        );
        SEGGER_RTT_ConfigUpBuffer(
            Channel::Vitals.index(),
            VITALS_NAME.as_ptr(),
            addr_of_mut!(VITALS_BUF) as *mut c_void,
            Channel::Vitals.buffer_len() as u32,
            MODE_NO_BLOCK_SKIP,
        );
    }
}

/// Caller holds the critical section.
pub fn write_nolock(ch: Channel, bytes: &[u8]) -> bool {
    let written = unsafe {
        SEGGER_RTT_WriteSkipNoLock(ch.index(), bytes.as_ptr() as *const c_void, bytes.len() as u32)
    };
    written == bytes.len() as u32
}
