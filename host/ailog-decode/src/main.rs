// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live log decoder: attaches to the probe bridge's channel-1 port and
//! turns the binary stream back into messages.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::net::TcpStream;
use std::path::PathBuf;

use ailog_decode::{BuildIdStatus, Decoder, Record};
use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize as _;
use tokendb::TokenDb;

#[derive(Parser)]
#[clap(name = "ailog-decode", about = "Decode the tokenized log stream")]
struct Args {
    /// Probe bridge host.
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Probe bridge port for channel 1.
    #[clap(long, default_value_t = 9091)]
    port: u16,

    /// Token database CSV from the build.
    #[clap(long)]
    csv: PathBuf,

    /// Append JSON records to this file as well.
    #[clap(long)]
    output: Option<PathBuf>,

    /// Emit JSON lines on stdout instead of human text.
    #[clap(long)]
    json: bool,
}

fn record_json(r: &Record) -> serde_json::Value {
    serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "level": r.level,
        "msg": r.msg,
        "token": format!("0x{:08X}", r.token),
        "file": r.file,
        "line": r.line,
        "args": r.args,
        "raw": r.raw.as_ref().map(|b| b.iter().map(|x| format!("{x:02x}")).collect::<Vec<_>>()),
    })
}

fn status_json(s: &BuildIdStatus) -> serde_json::Value {
    serde_json::json!({
        "build_id_mismatch": s.mismatch,
        "expected": format!("0x{:08X}", s.expected),
        "seen": s.seen.map(|v| format!("0x{v:08X}")),
    })
}

fn print_human(r: &Record) {
    let level = match r.level.as_str() {
        "ERROR" => r.level.red().bold(),
        "WARN" => r.level.yellow(),
        "INFO" => r.level.green(),
        "DEBUG" => r.level.dimmed(),
        _ => r.level.magenta(),
    };
    let site = if r.file.is_empty() {
        String::new()
    } else {
        format!(" {}:{}", r.file, r.line)
    };
    println!(
        "{} {:5}{} {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        level,
        site.dimmed(),
        r.msg
    );
}

fn main() -> Result<()> {
    let args = Args::parse();
    let csv = std::fs::read_to_string(&args.csv)
        .with_context(|| format!("reading {}", args.csv.display()))?;
    let db = TokenDb::from_csv(&csv)?;

    let addr = format!("{}:{}", args.host, args.port);
    let mut stream =
        TcpStream::connect(&addr).with_context(|| format!("connecting to {addr}"))?;

    let mut sink = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };

    let mut decoder = Decoder::new(&db);
    while let Some(record) = decoder.next_record(&mut stream)? {
        let json = record_json(&record);
        if let Some(status) = decoder.take_build_id_status() {
            if status.mismatch {
                // Warn, then keep decoding best-effort.
                let status = status_json(&status);
                if args.json {
                    println!("{status}");
                } else {
                    eprintln!("{} {status}", "build id mismatch:".yellow().bold());
                }
            }
        }
        if args.json {
            println!("{json}");
        } else {
            print_human(&record);
        }
        if let Some(sink) = sink.as_mut() {
            writeln!(sink, "{json}")?;
            sink.flush()?;
        }
    }
    Ok(())
}
