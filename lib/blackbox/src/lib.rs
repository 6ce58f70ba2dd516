// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash capture and next-boot reporting.
//!
//! Two halves, linked by the scratch registers:
//!
//! - The *capture* half runs in the worst possible context — hard fault,
//!   out-of-memory, stack overflow — and is restricted accordingly: a
//!   few register reads, four scratch writes, a reset request. The hard
//!   fault path (asm stub plus extractor) lives in RAM so it stays
//!   reachable while execute-in-place is paused for a flash write.
//! - The *reporter* half runs early on the next boot in a friendly
//!   context: it prints a human-readable block on the terminal channel,
//!   persists a JSON record for the host tools, and clears the mailbox
//!   so one crash reports exactly once.

#![cfg_attr(not(test), no_std)]

use core::fmt::Write as _;

use drv_scratch_api::{CrashKind, CrashRecord};
use heapless::String;
use serde::Serialize;

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod handler;

/// The persisted crash record at `/crash/latest.json`, hex fields as
/// literal strings so the host side never guesses at widths.
#[derive(Serialize)]
struct CrashJson {
    magic: String<12>,
    pc: String<12>,
    lr: String<12>,
    xpsr: String<12>,
    core_id: u8,
    task_number: u16,
    version: u32,
}

const CRASH_SCHEMA_VERSION: u32 = 1;

fn hex(v: u32) -> String<12> {
    let mut s = String::new();
    // Infallible: "0x" + 8 digits fits the capacity.
    let _ = write!(s, "0x{v:08X}");
    s
}

fn crash_json(record: &CrashRecord) -> CrashJson {
    let (pc, lr, xpsr, core_id, task_number) = match *record {
        CrashRecord::HardFault { pc, lr, xpsr_hi, core, task } => {
            (pc, lr, (xpsr_hi as u32) << 16, core, task)
        }
        CrashRecord::StackOverflow { core, task } => (0, 0, 0, core, task),
        CrashRecord::AllocFailure { core, .. } => (0, 0, 0, core, 0),
        CrashRecord::WatchdogTimeout { .. } => (0, 0, 0, 0, 0),
    };
    CrashJson {
        magic: hex(record.kind().magic()),
        pc: hex(pc),
        lr: hex(lr),
        xpsr: hex(xpsr),
        core_id,
        task_number,
        version: CRASH_SCHEMA_VERSION,
    }
}

fn print_report(record: &CrashRecord) {
    let mut term = drv_rtt::terminal();
    let _ = writeln!(term, "+----------------------------------------------+");
    let _ = writeln!(term, "| CRASH REPORT                                 |");
    let kind = record.kind();
    let _ = writeln!(term, "| Type:  {} ({})", kind.name(), hex(kind.magic()));
    match *record {
        CrashRecord::HardFault { pc, lr, xpsr_hi, core, task } => {
            let _ = writeln!(term, "| Core:  {core}   Task#: {task}");
            let _ = writeln!(term, "| PC:    {}", hex(pc));
            let _ = writeln!(term, "| LR:    {}", hex(lr));
            let _ = writeln!(term, "| xPSR:  {}", hex((xpsr_hi as u32) << 16));
        }
        CrashRecord::StackOverflow { core, task } => {
            let _ = writeln!(term, "| Core:  {core}   Task#: {task}");
        }
        CrashRecord::AllocFailure { free_bytes, core } => {
            let _ = writeln!(term, "| Core:  {core}   Free heap: {free_bytes} bytes");
        }
        CrashRecord::WatchdogTimeout { missing, tick, registered } => {
            let _ = writeln!(term, "| Missing bits:    {}", hex(missing));
            let _ = writeln!(term, "| Registered bits: {}", hex(registered));
            let _ = writeln!(term, "| At tick:         {tick}");
        }
    }
    let _ = writeln!(term, "+----------------------------------------------+");
}

/// Next-boot reporter. Call after log init and filesystem mount.
///
/// Returns the kind of the crash that ended the previous life, or `None`
/// for a clean boot. A reset that the watchdog did not initiate is a
/// clean boot by definition — scratch contents after power-on are
/// undefined and never inspected.
pub fn report_boot_crash() -> Option<CrashKind> {
    if !drv_scratch::watchdog_caused_reboot() {
        return None;
    }
    // `take_record` clears the magic: a later non-crash reset must not
    // replay this report.
    let record = drv_scratch::take_record()?;

    print_report(&record);

    let json = crash_json(&record);
    let mut buf = [0u8; 256];
    let persisted = match serde_json_core::to_slice(&json, &mut buf) {
        Ok(n) => confstore::write_file(confstore::CRASH_PATH, &buf[..n]),
        Err(_) => false,
    };
    if !persisted {
        // Filesystem trouble reduces the crash to a log-only event.
        ailog::warn!("crash record not persisted");
    }
    ailog::error!("previous boot crashed, magic %x", record.kind().magic());
    Some(record.kind())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_scratch::fake;
    use serde_json::Value;

    // One test: scratch, reboot-reason flag, filesystem and terminal
    // capture are all process-wide.
    #[test]
    fn reporter_round_trip() {
        assert!(confstore::init());

        // A reset the watchdog did not cause is a clean boot, whatever
        // junk scratch holds; the junk is left untouched.
        fake::set_watchdog_caused_reboot(false);
        drv_scratch::store_record(&CrashRecord::StackOverflow { core: 0, task: 2 });
        assert_eq!(report_boot_crash(), None);
        assert_ne!(drv_scratch::get(0), 0);

        // Watchdog reset + valid magic: full report.
        fake::set_watchdog_caused_reboot(true);
        drv_scratch::store_record(&CrashRecord::HardFault {
            pc: 0x1000_52A6,
            lr: 0x1000_0D43,
            xpsr_hi: 0x6100,
            core: 0,
            task: 1,
        });
        drv_rtt::fake::drain(drv_rtt::Channel::Terminal);
        assert_eq!(report_boot_crash(), Some(CrashKind::HardFault));

        // Slot 0 cleared: the same crash can never report twice.
        assert_eq!(drv_scratch::get(0), 0);
        assert_eq!(report_boot_crash(), None);

        let report = drv_rtt::fake::drain(drv_rtt::Channel::Terminal);
        let text = core::str::from_utf8(&report).unwrap();
        assert!(text.contains("HardFault (0xDEADFA11)"));
        assert!(text.contains("Core:  0   Task#: 1"));
        assert!(text.contains("PC:    0x100052A6"));

        let mut buf = [0u8; 256];
        let n = confstore::read_file(confstore::CRASH_PATH, &mut buf).unwrap();
        let v: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(v["magic"], "0xDEADFA11");
        assert_eq!(v["pc"], "0x100052A6");
        assert_eq!(v["lr"], "0x10000D43");
        assert_eq!(v["xpsr"], "0x61000000");
        assert_eq!(v["core_id"], 0);
        assert_eq!(v["task_number"], 1);
        assert_eq!(v["version"], 1);

        // A watchdog record prints the guilty bits instead of a PC.
        drv_scratch::store_record(&CrashRecord::WatchdogTimeout {
            missing: 0b01,
            tick: 777,
            registered: 0b11,
        });
        drv_rtt::fake::drain(drv_rtt::Channel::Terminal);
        assert_eq!(report_boot_crash(), Some(CrashKind::WatchdogTimeout));
        let report = drv_rtt::fake::drain(drv_rtt::Channel::Terminal);
        let text = core::str::from_utf8(&report).unwrap();
        assert!(text.contains("WatchdogTimeout"));
        assert!(text.contains("Missing bits:    0x00000001"));
        assert!(text.contains("At tick:         777"));

        fake::set_watchdog_caused_reboot(false);
    }
}
