// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash decoder CLI: take the persisted crash record, annotate PC and
//! LR against the firmware ELF, print JSON (default) or a bordered
//! block.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crash_decode::{find_addr2line, kind_name, parse_hex, resolve, CrashJson, Resolved};

#[derive(Parser)]
#[clap(name = "crash-decode", about = "Annotate a persisted crash record")]
struct Args {
    /// The crash record JSON pulled from /crash/latest.json.
    #[clap(long)]
    json: PathBuf,

    /// The firmware ELF the crash came from.
    #[clap(long)]
    elf: PathBuf,

    /// Explicit addr2line path (otherwise auto-discovered).
    #[clap(long)]
    addr2line: Option<PathBuf>,

    /// Print a bordered text block instead of JSON.
    #[clap(long)]
    text: bool,
}

fn site_json(r: &Resolved) -> serde_json::Value {
    serde_json::json!({
        "address": format!("0x{:08X}", r.address),
        "function": r.function,
        "source": r.source,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.json)
        .with_context(|| format!("reading {}", args.json.display()))?;
    let record: CrashJson = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.json.display()))?;

    let magic = parse_hex(&record.magic)?;
    let pc = parse_hex(&record.pc)?;
    let lr = parse_hex(&record.lr)?;

    let sites = match find_addr2line(args.addr2line.clone()) {
        Ok(tool) => resolve(&tool, &args.elf, &[pc, lr])?,
        // Nothing to resolve anyway (e.g. a watchdog timeout).
        Err(_) if pc == 0 && lr == 0 => {
            vec![Resolved::unresolved(pc), Resolved::unresolved(lr)]
        }
        Err(e) => return Err(e),
    };

    if args.text {
        println!("+----------------------------------------------+");
        println!("| CRASH: {} ({})", kind_name(magic), record.magic);
        println!("| Core:  {}   Task#: {}", record.core_id, record.task_number);
        println!("| xPSR:  {}", record.xpsr);
        println!("| PC:    0x{:08X}  {}", sites[0].address, sites[0].function);
        println!("|        {}", sites[0].source);
        println!("| LR:    0x{:08X}  {}", sites[1].address, sites[1].function);
        println!("|        {}", sites[1].source);
        println!("+----------------------------------------------+");
    } else {
        println!(
            "{}",
            serde_json::json!({
                "kind": kind_name(magic),
                "magic": record.magic,
                "pc": site_json(&sites[0]),
                "lr": site_json(&sites[1]),
                "xpsr": record.xpsr,
                "core": record.core_id,
                "task": record.task_number,
                "version": record.version,
            })
        );
    }
    Ok(())
}
