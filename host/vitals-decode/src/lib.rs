// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stream reader and aggregation for the telemetry channel.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};

use anyhow::{bail, Result};
use vitals_wire::{Header, TaskEntry, TaskState, KIND_VITALS, MAX_TASKS};

/// One parsed packet.
#[derive(Clone, Debug)]
pub struct Sample {
    pub header: Header,
    pub entries: Vec<TaskEntry>,
}

/// Reads the next vitals packet. Packet kinds this decoder predates
/// (including the reserved task-stats kind) are skipped byte-wise until
/// a vitals header frames again; `None` is clean end-of-stream.
pub fn next_sample<R: Read>(input: &mut R) -> Result<Option<Sample>> {
    loop {
        let mut kind = [0u8; 1];
        match input.read(&mut kind) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        }
        if kind[0] != KIND_VITALS {
            // Unknown kind: no length field to trust, so resync on the
            // next byte that looks like a header.
            continue;
        }

        let mut rest = [0u8; 13];
        read_fully(input, &mut rest)?;
        let mut packet = vec![kind[0]];
        packet.extend_from_slice(&rest);
        let task_count = rest[12] as usize;
        if task_count > MAX_TASKS {
            bail!("implausible task count {task_count}; stream out of sync");
        }
        let mut entries = vec![0u8; task_count * 8];
        read_fully(input, &mut entries)?;
        packet.extend_from_slice(&entries);

        let (header, entries, count, _) =
            vitals_wire::parse(&packet).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        return Ok(Some(Sample { header, entries: entries[..count].to_vec() }));
    }
}

fn read_fully<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut at = 0;
    while at < buf.len() {
        match input.read(&mut buf[at..]) {
            Ok(0) => bail!("stream ended mid-packet"),
            Ok(n) => at += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            // Mid-packet, a timeout just means the rest is in flight.
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Per-task aggregation over a capture window.
#[derive(Clone, Debug, Default)]
pub struct TaskStats {
    pub samples: u32,
    pub cpu_sum: u64,
    pub cpu_max: u8,
    pub min_stack_hwm: u16,
    pub last_state: u8,
    pub priority: u8,
}

#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub packets: u32,
    pub min_free_heap: u32,
    pub tasks: BTreeMap<u8, TaskStats>,
}

impl Summary {
    pub fn update(&mut self, sample: &Sample) {
        self.packets += 1;
        let free = sample.header.min_free_heap.get();
        if self.packets == 1 || free < self.min_free_heap {
            self.min_free_heap = free;
        }
        for e in &sample.entries {
            let stats = self.tasks.entry(e.number).or_default();
            if stats.samples == 0 || e.stack_hwm_words.get() < stats.min_stack_hwm {
                stats.min_stack_hwm = e.stack_hwm_words.get();
            }
            stats.samples += 1;
            stats.cpu_sum += e.cpu_pct as u64;
            stats.cpu_max = stats.cpu_max.max(e.cpu_pct);
            stats.last_state = e.state;
            stats.priority = e.priority;
        }
    }

    pub fn cpu_avg(&self, number: u8) -> f64 {
        self.tasks
            .get(&number)
            .filter(|s| s.samples > 0)
            .map(|s| s.cpu_sum as f64 / s.samples as f64)
            .unwrap_or(0.0)
    }
}

/// Alert thresholds: these are the "wake a human" numbers, deliberately
/// conservative.
pub const ALERT_MIN_STACK_WORDS: u16 = 64;
pub const ALERT_MIN_HEAP_BYTES: u32 = 4096;
pub const ALERT_CPU_PCT: u8 = 90;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Alert {
    LowStack { task: u8, words: u16 },
    LowHeap { free: u32 },
    CpuSaturated { task: u8, pct: u8 },
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Alert::LowStack { task, words } => {
                write!(f, "task {task}: stack high-water down to {words} words")
            }
            Alert::LowHeap { free } => write!(f, "free heap down to {free} bytes"),
            Alert::CpuSaturated { task, pct } => {
                write!(f, "task {task}: {pct}% CPU since last sample")
            }
        }
    }
}

pub fn alerts_for(sample: &Sample) -> Vec<Alert> {
    let mut out = Vec::new();
    if sample.header.free_heap.get() < ALERT_MIN_HEAP_BYTES {
        out.push(Alert::LowHeap { free: sample.header.free_heap.get() });
    }
    for e in &sample.entries {
        if e.stack_hwm_words.get() < ALERT_MIN_STACK_WORDS {
            out.push(Alert::LowStack { task: e.number, words: e.stack_hwm_words.get() });
        }
        if e.cpu_pct >= ALERT_CPU_PCT {
            out.push(Alert::CpuSaturated { task: e.number, pct: e.cpu_pct });
        }
    }
    out
}

pub fn state_letter(state: u8) -> char {
    TaskState::from_u8(state).letter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use vitals_wire::{pack, KIND_TASK_STATS};
    use zerocopy::little_endian::{U16, U32};

    fn sample_bytes(tick: u32, entries: &[TaskEntry]) -> Vec<u8> {
        let header = Header {
            kind: KIND_VITALS,
            tick: U32::new(tick),
            free_heap: U32::new(50_000),
            min_free_heap: U32::new(48_000),
            task_count: entries.len() as u8,
        };
        let mut buf = [0u8; vitals_wire::MAX_PACKET];
        let n = pack(&header, entries, &mut buf).unwrap();
        buf[..n].to_vec()
    }

    fn entry(number: u8, pct: u8, hwm: u16) -> TaskEntry {
        TaskEntry {
            number,
            state: 2,
            priority: 1,
            stack_hwm_words: U16::new(hwm),
            cpu_pct: pct,
            runtime_lo16: U16::new(0),
        }
    }

    #[test]
    fn frames_consecutive_packets() {
        let mut stream = sample_bytes(100, &[entry(1, 10, 300)]);
        stream.extend(sample_bytes(200, &[entry(1, 20, 280), entry(2, 5, 900)]));
        let mut cursor = Cursor::new(stream);

        let s1 = next_sample(&mut cursor).unwrap().unwrap();
        assert_eq!(s1.header.tick.get(), 100);
        assert_eq!(s1.entries.len(), 1);
        let s2 = next_sample(&mut cursor).unwrap().unwrap();
        assert_eq!(s2.entries.len(), 2);
        assert!(next_sample(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn reserved_kind_is_skipped() {
        let mut stream = vec![KIND_TASK_STATS];
        stream.extend(sample_bytes(300, &[entry(1, 1, 500)]));
        let mut cursor = Cursor::new(stream);
        let s = next_sample(&mut cursor).unwrap().unwrap();
        assert_eq!(s.header.tick.get(), 300);
    }

    #[test]
    fn summary_aggregates_per_task() {
        let mut summary = Summary::default();
        for (pct, hwm) in [(10u8, 300u16), (30, 280), (20, 290)] {
            let bytes = sample_bytes(1, &[entry(7, pct, hwm)]);
            let s = next_sample(&mut Cursor::new(bytes)).unwrap().unwrap();
            summary.update(&s);
        }
        assert_eq!(summary.packets, 3);
        let t = &summary.tasks[&7];
        assert_eq!(t.min_stack_hwm, 280);
        assert_eq!(t.cpu_max, 30);
        assert!((summary.cpu_avg(7) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn alerts_fire_on_thresholds() {
        let bytes = sample_bytes(1, &[entry(1, 95, 32), entry(2, 5, 500)]);
        let s = next_sample(&mut Cursor::new(bytes)).unwrap().unwrap();
        let alerts = alerts_for(&s);
        assert!(alerts.contains(&Alert::LowStack { task: 1, words: 32 }));
        assert!(alerts.contains(&Alert::CpuSaturated { task: 1, pct: 95 }));
        assert_eq!(alerts.len(), 2);
    }
}
