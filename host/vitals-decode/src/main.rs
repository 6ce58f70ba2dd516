// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live telemetry decoder for the channel-2 port: raw packet dumps, an
//! end-of-run summary, or threshold alerts.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgEnum, Parser};
use colored::Colorize as _;
use vitals_decode::{alerts_for, next_sample, state_letter, Sample, Summary};

#[derive(Copy, Clone, Debug, ArgEnum)]
enum Mode {
    Raw,
    Summary,
    Alert,
}

#[derive(Parser)]
#[clap(name = "vitals-decode", about = "Decode the telemetry stream")]
struct Args {
    /// Probe bridge host.
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Probe bridge port for channel 2.
    #[clap(long, default_value_t = 9092)]
    port: u16,

    #[clap(long, arg_enum, default_value = "raw")]
    mode: Mode,

    /// Stop after this many seconds (otherwise runs until the stream
    /// closes).
    #[clap(long)]
    duration: Option<u64>,

    /// Emit JSON lines instead of human text.
    #[clap(long)]
    json: bool,
}

fn sample_json(s: &Sample) -> serde_json::Value {
    serde_json::json!({
        "tick": s.header.tick.get(),
        "free_heap": s.header.free_heap.get(),
        "min_free_heap": s.header.min_free_heap.get(),
        "tasks": s.entries.iter().map(|e| serde_json::json!({
            "number": e.number,
            "state": state_letter(e.state).to_string(),
            "priority": e.priority,
            "stack_hwm_words": e.stack_hwm_words.get(),
            "cpu_pct": e.cpu_pct,
        })).collect::<Vec<_>>(),
    })
}

fn print_raw(s: &Sample) {
    print!(
        "tick {:>10}  heap {:>6}/{:>6}  ",
        s.header.tick.get(),
        s.header.free_heap.get(),
        s.header.min_free_heap.get()
    );
    for e in &s.entries {
        print!(
            "[{}:{} {}% hwm {}] ",
            e.number,
            state_letter(e.state),
            e.cpu_pct,
            e.stack_hwm_words.get()
        );
    }
    println!();
}

fn print_summary(summary: &Summary, json: bool) {
    if json {
        let tasks: Vec<_> = summary
            .tasks
            .iter()
            .map(|(n, t)| {
                serde_json::json!({
                    "number": n,
                    "samples": t.samples,
                    "cpu_avg": summary.cpu_avg(*n),
                    "cpu_max": t.cpu_max,
                    "min_stack_hwm_words": t.min_stack_hwm,
                    "priority": t.priority,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "packets": summary.packets,
                "min_free_heap": summary.min_free_heap,
                "tasks": tasks,
            })
        );
        return;
    }
    println!("{} packets, min free heap {} bytes", summary.packets, summary.min_free_heap);
    println!("task  prio  samples  cpu avg  cpu max  min stack hwm");
    for (n, t) in &summary.tasks {
        println!(
            "{:>4}  {:>4}  {:>7}  {:>6.1}%  {:>6}%  {:>10} words",
            n,
            t.priority,
            t.samples,
            summary.cpu_avg(*n),
            t.cpu_max,
            t.min_stack_hwm
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let mut stream =
        TcpStream::connect(&addr).with_context(|| format!("connecting to {addr}"))?;
    if args.duration.is_some() {
        // A short read timeout lets the duration cutoff fire even on a
        // quiet stream.
        stream.set_read_timeout(Some(Duration::from_millis(500)))?;
    }

    let started = Instant::now();
    let deadline = args.duration.map(Duration::from_secs);
    let mut summary = Summary::default();

    loop {
        if let Some(limit) = deadline {
            if started.elapsed() >= limit {
                break;
            }
        }
        let Some(sample) = next_sample(&mut stream)? else {
            if deadline.is_some() {
                continue; // timeout tick, keep waiting out the window
            }
            break; // stream closed
        };
        summary.update(&sample);
        match args.mode {
            Mode::Raw => {
                if args.json {
                    println!("{}", sample_json(&sample));
                } else {
                    print_raw(&sample);
                }
            }
            Mode::Summary => {}
            Mode::Alert => {
                for alert in alerts_for(&sample) {
                    if args.json {
                        println!(
                            "{}",
                            serde_json::json!({
                                "tick": sample.header.tick.get(),
                                "alert": alert.to_string(),
                            })
                        );
                    } else {
                        println!("{} {alert}", "ALERT".red().bold());
                    }
                }
            }
        }
    }

    if matches!(args.mode, Mode::Summary) {
        print_summary(&summary, args.json);
    }
    Ok(())
}
