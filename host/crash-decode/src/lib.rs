// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash record annotation: resolve the persisted PC/LR through the
//! cross-toolchain's addr2line against the firmware ELF.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use drv_scratch_api::{
    MAGIC_ALLOC_FAILURE, MAGIC_HARD_FAULT, MAGIC_STACK_OVERFLOW, MAGIC_WATCHDOG_TIMEOUT,
};
use serde::Deserialize;

/// The on-filesystem record, as the firmware's reporter wrote it.
#[derive(Clone, Debug, Deserialize)]
pub struct CrashJson {
    pub magic: String,
    pub pc: String,
    pub lr: String,
    pub xpsr: String,
    pub core_id: u8,
    pub task_number: u16,
    pub version: u32,
}

pub fn parse_hex(s: &str) -> Result<u32> {
    let trimmed = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(trimmed, 16).with_context(|| format!("bad hex field {s:?}"))
}

pub fn kind_name(magic: u32) -> &'static str {
    match magic {
        MAGIC_HARD_FAULT => "HardFault",
        MAGIC_STACK_OVERFLOW => "StackOverflow",
        MAGIC_ALLOC_FAILURE => "AllocFailure",
        MAGIC_WATCHDOG_TIMEOUT => "WatchdogTimeout",
        _ => "Unknown",
    }
}

/// A code address resolved to its function and source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub address: u32,
    pub function: String,
    pub source: String,
}

impl Resolved {
    pub fn unresolved(address: u32) -> Self {
        Self { address, function: "??".into(), source: "??:0".into() }
    }
}

/// Parses `addr2line -f -C` output: pairs of lines, function then
/// `file:line`, one pair per requested address.
pub fn parse_addr2line(output: &str, addresses: &[u32]) -> Vec<Resolved> {
    let mut lines = output.lines();
    addresses
        .iter()
        .map(|&address| {
            let function = lines.next().unwrap_or("??").trim().to_string();
            let source = lines.next().unwrap_or("??:0").trim().to_string();
            Resolved { address, function, source }
        })
        .collect()
}

/// Runs the resolver on the given addresses. Zero addresses (crash
/// kinds that carry no PC) are reported unresolved without bothering
/// the tool.
pub fn resolve(addr2line: &Path, elf: &Path, addresses: &[u32]) -> Result<Vec<Resolved>> {
    let live: Vec<u32> = addresses.iter().copied().filter(|&a| a != 0).collect();
    if live.is_empty() {
        return Ok(addresses.iter().map(|&a| Resolved::unresolved(a)).collect());
    }
    let mut cmd = Command::new(addr2line);
    cmd.arg("-e").arg(elf).arg("-f").arg("-C");
    for a in &live {
        cmd.arg(format!("0x{a:08x}"));
    }
    let out = cmd.output().with_context(|| format!("running {}", addr2line.display()))?;
    if !out.status.success() {
        bail!(
            "{} failed: {}",
            addr2line.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    let resolved = parse_addr2line(&String::from_utf8_lossy(&out.stdout), &live);
    let mut by_addr = resolved.into_iter();
    Ok(addresses
        .iter()
        .map(|&a| {
            if a == 0 {
                Resolved::unresolved(a)
            } else {
                by_addr.next().unwrap_or_else(|| Resolved::unresolved(a))
            }
        })
        .collect())
}

const TOOL: &str = "arm-none-eabi-addr2line";

/// Locates the cross addr2line: an explicit path wins, then the
/// `PICO_TOOLCHAIN_PATH` install, then `$PATH`, then the conventional
/// versioned install directories.
pub fn find_addr2line(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path);
        }
        bail!("addr2line not found at {}", path.display());
    }
    if let Ok(toolchain) = std::env::var("PICO_TOOLCHAIN_PATH") {
        let candidate = Path::new(&toolchain).join("bin").join(TOOL);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(TOOL);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    for pattern in ["/opt/gcc-arm-none-eabi-*/bin", "/usr/local/gcc-arm-none-eabi-*/bin"] {
        if let Ok(hits) = glob::glob(&format!("{pattern}/{TOOL}")) {
            if let Some(Ok(hit)) = hits.into_iter().next() {
                return Ok(hit);
            }
        }
    }
    bail!("no {TOOL} found; pass --addr2line or set PICO_TOOLCHAIN_PATH")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_fields_parse() {
        assert_eq!(parse_hex("0xDEADFA11").unwrap(), 0xDEAD_FA11);
        assert_eq!(parse_hex("0x00000000").unwrap(), 0);
        assert_eq!(parse_hex("1000").unwrap(), 0x1000);
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn record_deserializes() {
        let text = r#"{
            "magic": "0xDEADFA11", "pc": "0x100052A6", "lr": "0x10000D43",
            "xpsr": "0x61000000", "core_id": 0, "task_number": 1, "version": 1
        }"#;
        let rec: CrashJson = serde_json::from_str(text).unwrap();
        assert_eq!(kind_name(parse_hex(&rec.magic).unwrap()), "HardFault");
        assert_eq!(parse_hex(&rec.pc).unwrap(), 0x1000_52A6);
        assert_eq!(rec.version, 1);
    }

    #[test]
    fn addr2line_pairs_parse() {
        let out = "blinky_entry\n/work/app/pico/src/fw.rs:113\nmain\n??:0\n";
        let r = parse_addr2line(out, &[0x1000_52A6, 0x1000_0D43]);
        assert_eq!(r[0].function, "blinky_entry");
        assert_eq!(r[0].source, "/work/app/pico/src/fw.rs:113");
        assert_eq!(r[1].function, "main");
        assert_eq!(r[1].source, "??:0");
    }

    #[test]
    fn zero_addresses_skip_resolution() {
        // A watchdog record has no PC; the resolver must not be run on
        // address zero.
        let r = resolve(Path::new("/definitely/not/a/tool"), Path::new("x.elf"), &[0, 0])
            .unwrap();
        assert_eq!(r[0], Resolved::unresolved(0));
        assert_eq!(r[1], Resolved::unresolved(0));
    }
}
