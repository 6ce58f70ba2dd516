// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The three real-time transfer channels to the debug probe.
//!
//! All three are unidirectional up-buffers in skip mode: a packet that
//! does not fit is dropped whole, never split, so the host side can
//! always re-frame. The transport library's own locking only masks
//! interrupts on one core, which is useless on this part; every write
//! here goes through the scheduler-level critical section (hardware
//! spinlock plus IRQ disable) and uses the library's no-lock entry
//! point.
//!
//! On the host the channels are in-memory capture buffers with the same
//! sizes and the same drop-whole-packets behavior, which is what the
//! framing tests bang on.

#![cfg_attr(not(test), no_std)]

use core::fmt;

/// The fixed channel map. Index, buffer size and name are part of the
/// host-side contract (the probe bridge exposes them on ports 9090-9092
/// in this order).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    /// UTF-8 text: stdout and crash reports.
    Terminal = 0,
    /// Tokenized binary log records.
    AiLog = 1,
    /// Fixed-width telemetry packets.
    Vitals = 2,
}

impl Channel {
    pub const fn index(self) -> u32 {
        self as u32
    }

    pub const fn buffer_len(self) -> usize {
        match self {
            Channel::Terminal => 1024,
            Channel::AiLog => 2048,
            Channel::Vitals => 512,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Channel::Terminal => "Terminal",
            Channel::AiLog => "AiLog",
            Channel::Vitals => "Vitals",
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        mod segger;
        use segger as imp;
    } else {
        pub mod fake;
        use fake as imp;
    }
}

/// Registers the up-buffers with the transport. Call once, before the
/// first log emission.
pub fn init() {
    imp::init();
}

/// Writes one packet atomically. Returns `false` when the channel was
/// full and the packet was dropped; producers treat that as expected
/// loss, not an error.
pub fn write(ch: Channel, bytes: &[u8]) -> bool {
    rtos::critical(|| imp::write_nolock(ch, bytes))
}

/// `core::fmt` adapter for the terminal channel. Output is best-effort:
/// a full buffer drops text rather than blocking a task on the probe.
pub struct Terminal;

impl fmt::Write for Terminal {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write(Channel::Terminal, s.as_bytes());
        Ok(())
    }
}

pub fn terminal() -> Terminal {
    Terminal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_are_never_split() {
        fake::drain(Channel::Vitals);
        let big = [0xABu8; 400];
        assert!(write(Channel::Vitals, &big));
        // 400 in a 512-byte channel: the second one must drop whole.
        assert!(!write(Channel::Vitals, &big));
        let captured = fake::drain(Channel::Vitals);
        assert_eq!(captured.len(), 400);
    }

    #[test]
    fn terminal_text_flows() {
        use core::fmt::Write as _;
        fake::drain(Channel::Terminal);
        writeln!(terminal(), "boot {}", 7).unwrap();
        let captured = fake::drain(Channel::Terminal);
        assert_eq!(core::str::from_utf8(&captured).unwrap(), "boot 7\n");
    }
}
