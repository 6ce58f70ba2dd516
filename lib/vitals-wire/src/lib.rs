// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-width wire structs for the health telemetry channel.
//!
//! A telemetry packet is a [`Header`] followed by `task_count` packed
//! [`TaskEntry`] records, no padding anywhere. Multi-byte fields are
//! little-endian `zerocopy` integers so the same structs serve the
//! firmware packer and the host parser.

#![cfg_attr(not(test), no_std)]

use static_assertions::const_assert_eq;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Packet kind for periodic vitals samples.
pub const KIND_VITALS: u8 = 0x01;

/// Reserved for a future task-stats record. Never emitted; the decoder
/// skips it without complaint so old hosts survive new firmware.
pub const KIND_TASK_STATS: u8 = 0x02;

/// The sampler never reports more tasks than this; the stack-resident
/// enumeration array in the supervisor is sized to match.
pub const MAX_TASKS: usize = 16;

/// Worst-case packet, comfortably inside the 512-byte channel buffer.
pub const MAX_PACKET: usize =
    core::mem::size_of::<Header>() + MAX_TASKS * core::mem::size_of::<TaskEntry>();

#[derive(Copy, Clone, Debug, PartialEq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Header {
    pub kind: u8,
    pub tick: U32,
    pub free_heap: U32,
    pub min_free_heap: U32,
    pub task_count: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct TaskEntry {
    pub number: u8,
    pub state: u8,
    pub priority: u8,
    /// Smallest free-stack depth ever observed, in 32-bit words.
    pub stack_hwm_words: U16,
    /// CPU share since the previous sample, 0-100.
    pub cpu_pct: u8,
    pub runtime_lo16: U16,
}

const_assert_eq!(core::mem::size_of::<Header>(), 14);
const_assert_eq!(core::mem::size_of::<TaskEntry>(), 8);

/// Task scheduling state, mirroring the kernel's reporting enum order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Running = 0,
    Ready = 1,
    Blocked = 2,
    Suspended = 3,
    Deleted = 4,
    Invalid = 5,
}

impl TaskState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Running,
            1 => TaskState::Ready,
            2 => TaskState::Blocked,
            3 => TaskState::Suspended,
            4 => TaskState::Deleted,
            _ => TaskState::Invalid,
        }
    }

    pub fn letter(self) -> char {
        match self {
            TaskState::Running => 'X',
            TaskState::Ready => 'R',
            TaskState::Blocked => 'B',
            TaskState::Suspended => 'S',
            TaskState::Deleted => 'D',
            TaskState::Invalid => '?',
        }
    }
}

/// Packs a header and entries into `out`, returning the packet length.
/// `None` when `entries` exceeds [`MAX_TASKS`] or `out` is undersized.
pub fn pack(header: &Header, entries: &[TaskEntry], out: &mut [u8]) -> Option<usize> {
    if entries.len() > MAX_TASKS {
        return None;
    }
    let need = core::mem::size_of::<Header>() + core::mem::size_of_val(entries);
    let out = out.get_mut(..need)?;
    let (h, rest) = out.split_at_mut(core::mem::size_of::<Header>());
    h.copy_from_slice(header.as_bytes());
    rest.copy_from_slice(entries.as_bytes());
    Some(need)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Not a vitals packet; `kind` is carried so callers can skip
    /// reserved record types by length.
    UnknownKind(u8),
    Truncated,
}

/// Parses one packet from the front of `bytes`, returning the header, the
/// entry table, the live entry count, and the total bytes consumed.
pub fn parse(bytes: &[u8]) -> Result<(Header, [TaskEntry; MAX_TASKS], usize, usize), ParseError> {
    let (header, mut rest) =
        Header::read_from_prefix(bytes).map_err(|_| ParseError::Truncated)?;
    if header.kind != KIND_VITALS {
        return Err(ParseError::UnknownKind(header.kind));
    }
    let count = (header.task_count as usize).min(MAX_TASKS);
    let mut entries = [TaskEntry {
        number: 0,
        state: TaskState::Invalid as u8,
        priority: 0,
        stack_hwm_words: U16::new(0),
        cpu_pct: 0,
        runtime_lo16: U16::new(0),
    }; MAX_TASKS];
    for slot in entries.iter_mut().take(count) {
        let (e, r) = TaskEntry::read_from_prefix(rest).map_err(|_| ParseError::Truncated)?;
        *slot = e;
        rest = r;
    }
    let used = bytes.len() - rest.len();
    Ok((header, entries, count, used))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(number: u8, pct: u8) -> TaskEntry {
        TaskEntry {
            number,
            state: TaskState::Ready as u8,
            priority: 1,
            stack_hwm_words: U16::new(420),
            cpu_pct: pct,
            runtime_lo16: U16::new(0xBEEF),
        }
    }

    #[test]
    fn header_layout_is_packed_little_endian() {
        let h = Header {
            kind: KIND_VITALS,
            tick: U32::new(0x0403_0201),
            free_heap: U32::new(0x1000),
            min_free_heap: U32::new(0x0800),
            task_count: 2,
        };
        assert_eq!(
            h.as_bytes(),
            &[
                0x01, 0x01, 0x02, 0x03, 0x04, 0x00, 0x10, 0x00, 0x00, 0x00,
                0x08, 0x00, 0x00, 0x02
            ]
        );
    }

    #[test]
    fn entry_layout_is_packed_little_endian() {
        let e = entry(3, 42);
        assert_eq!(e.as_bytes(), &[3, 1, 1, 0xA4, 0x01, 42, 0xEF, 0xBE]);
    }

    #[test]
    fn pack_parse_round_trip() {
        let h = Header {
            kind: KIND_VITALS,
            tick: U32::new(500),
            free_heap: U32::new(96_000),
            min_free_heap: U32::new(90_112),
            task_count: 3,
        };
        let entries = [entry(1, 2), entry(2, 11), entry(3, 87)];
        let mut buf = [0u8; MAX_PACKET];
        let n = pack(&h, &entries, &mut buf).unwrap();
        assert_eq!(n, 14 + 3 * 8);

        let (gh, ge, count, used) = parse(&buf[..n]).unwrap();
        assert_eq!(used, n);
        assert_eq!(count, 3);
        assert_eq!(gh.tick.get(), 500);
        assert_eq!(ge[0].number, 1);
        assert_eq!(ge[2].cpu_pct, 87);
    }

    #[test]
    fn reserved_kind_is_reported_not_decoded() {
        let mut buf = [0u8; 14];
        buf[0] = KIND_TASK_STATS;
        assert_eq!(parse(&buf), Err(ParseError::UnknownKind(KIND_TASK_STATS)));
    }

    #[test]
    fn truncated_entry_table() {
        let h = Header {
            kind: KIND_VITALS,
            tick: U32::new(1),
            free_heap: U32::new(1),
            min_free_heap: U32::new(1),
            task_count: 2,
        };
        let entries = [entry(1, 0), entry(2, 0)];
        let mut buf = [0u8; MAX_PACKET];
        let n = pack(&h, &entries, &mut buf).unwrap();
        assert_eq!(parse(&buf[..n - 1]), Err(ParseError::Truncated));
    }

    #[test]
    fn overlong_task_list_is_refused() {
        let h = Header {
            kind: KIND_VITALS,
            tick: U32::new(1),
            free_heap: U32::new(1),
            min_free_heap: U32::new(1),
            task_count: 17,
        };
        let entries = [entry(0, 0); MAX_TASKS + 1];
        let mut buf = [0u8; 2 * MAX_PACKET];
        assert_eq!(pack(&h, &entries, &mut buf), None);
    }
}
