// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binding to the vendor SDK flash primitives, plus the flash-backed
//! storage the filesystem mounts on.

use core::ffi::c_void;

use sectorfs::{Error, Storage};

const PICO_OK: i32 = 0;
const XIP_BASE: usize = 0x1000_0000;

mod sdk {
    use core::ffi::c_void;

    extern "C" {
        pub fn flash_safe_execute(
            func: extern "C" fn(*mut c_void),
            param: *mut c_void,
            timeout_ms: u32,
        ) -> i32;
        pub fn flash_range_erase(offset: u32, count: usize);
        pub fn flash_range_program(offset: u32, data: *const u8, count: usize);
    }
}

extern "C" fn trampoline<F: FnOnce()>(param: *mut c_void) {
    // Safety: param is the `Option<F>` slot on the caller's frame, alive
    // for the whole `flash_safe_execute` call.
    let slot = unsafe { &mut *(param as *mut Option<F>) };
    if let Some(f) = slot.take() {
        f();
    }
}

pub fn execute<F: FnOnce()>(f: F) -> bool {
    let mut slot = Some(f);
    let rc = unsafe {
        // The operation itself is bounded by flash timing; the lockout
        // handshake gets an effectively infinite wait.
        sdk::flash_safe_execute(
            trampoline::<F>,
            &mut slot as *mut Option<F> as *mut c_void,
            u32::MAX,
        )
    };
    rc == PICO_OK
}

/// The filesystem region at the high end of flash, as a [`Storage`].
///
/// Reads come straight out of the XIP window (byte granularity);
/// programs and erases detour through [`crate::safe_flash`].
pub struct XipFlash {
    /// Offset of the region from the start of flash.
    base: u32,
    blocks: usize,
}

impl XipFlash {
    pub const fn new(base: u32, blocks: usize) -> Self {
        Self { base, blocks }
    }
}

impl Storage for XipFlash {
    const PROG_SIZE: usize = 256;
    const ERASE_SIZE: usize = 4096;

    fn block_count(&self) -> usize {
        self.blocks
    }

    fn read(&mut self, off: u32, buf: &mut [u8]) -> Result<(), Error> {
        let src = (XIP_BASE + self.base as usize + off as usize) as *const u8;
        // Safety: the region is memory-mapped and owned by this
        // filesystem; bounds are the caller's geometry.
        unsafe { core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn program(&mut self, off: u32, data: &[u8]) -> Result<(), Error> {
        let flash_off = self.base + off;
        let ok = crate::safe_flash(|| unsafe {
            sdk::flash_range_program(flash_off, data.as_ptr(), data.len());
        });
        if ok {
            Ok(())
        } else {
            Err(Error::Io)
        }
    }

    fn erase(&mut self, block: u32) -> Result<(), Error> {
        let flash_off = self.base + block * Self::ERASE_SIZE as u32;
        let ok = crate::safe_flash(|| unsafe {
            sdk::flash_range_erase(flash_off, Self::ERASE_SIZE);
        });
        if ok {
            Ok(())
        } else {
            Err(Error::Io)
        }
    }
}
