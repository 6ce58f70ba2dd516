// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI front end: scan a tree, write the CSV, print the build id.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[clap(name = "tokendb", about = "Generate the log token database CSV")]
struct Args {
    /// Workspace (or source tree) to scan.
    #[clap(long, default_value = ".")]
    src: PathBuf,

    /// Where to write the CSV.
    #[clap(long, default_value = "tokens.csv")]
    out: PathBuf,

    /// Print the summary as JSON.
    #[clap(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let db = tokendb::scan_workspace(&args.src)?;
    std::fs::write(&args.out, db.to_csv())?;
    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "entries": db.entries.len(),
                "build_id": format!("0x{:08X}", db.build_id()),
                "csv": args.out.display().to_string(),
            })
        );
    } else {
        println!(
            "{} call sites, build id 0x{:08X} -> {}",
            db.entries.len(),
            db.build_id(),
            args.out.display()
        );
    }
    Ok(())
}
