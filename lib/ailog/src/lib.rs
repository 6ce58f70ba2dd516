// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tokenized logging for the firmware side.
//!
//! ```ignore
//! ailog::info!("mounted filesystem, %u entries", count);
//! ailog::error!("flash write failed at %x", addr);
//! ```
//!
//! The format string is hashed to its 32-bit token at compile time and
//! never occupies flash or wire bytes; arguments are varint/float
//! encoded into a stack buffer and the whole packet goes out over
//! channel 1 in one critical section. A call is legal anywhere except
//! fault context: before the scheduler starts the critical section
//! degrades to an IRQ disable, and a full channel drops the packet
//! rather than blocking.
//!
//! The macros also check, at compile time, that the argument count
//! matches the `%`-placeholders — a mismatch is a build error, not a
//! garbled message.

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicU8, Ordering};

use ailog_wire::{encode_packet, pack_header, MAX_PACKET, PREAMBLE};
pub use ailog_wire::{count_placeholders, fnv1a32, Arg, Level};
use drv_rtt::Channel;

/// Compile-time level floor from the `max-level-*` features.
pub const MAX_LEVEL: u8 = if cfg!(feature = "max-level-error") {
    0
} else if cfg!(feature = "max-level-warn") {
    1
} else if cfg!(feature = "max-level-info") {
    2
} else {
    3
};

// Boot messages flow before the config record is loaded; start wide
// open and let `set_runtime_level` narrow it.
static RUNTIME_LEVEL: AtomicU8 = AtomicU8::new(Level::Debug as u8);

/// Applies the config record's `log_level` as a runtime floor on top of
/// the compile-time one.
pub fn set_runtime_level(level: u8) {
    RUNTIME_LEVEL.store(level.min(Level::Debug as u8), Ordering::Relaxed);
}

#[doc(hidden)]
pub fn runtime_level() -> u8 {
    RUNTIME_LEVEL.load(Ordering::Relaxed)
}

/// Encodes and emits one record. Not part of the public surface; call
/// sites go through the macros so tokens and argument checks exist.
#[doc(hidden)]
pub fn emit(token: u32, level: Level, args: &[Arg]) {
    let mut buf = [0u8; MAX_PACKET];
    if let Some(n) = encode_packet(token, level, args, &mut buf) {
        drv_rtt::write(Channel::AiLog, &buf[..n]);
    }
}

/// Zero-argument fast path: five fixed bytes, no encoder.
#[doc(hidden)]
pub fn emit0(token: u32, level: Level) {
    let mut buf = [0u8; PREAMBLE];
    buf[..4].copy_from_slice(&token.to_le_bytes());
    buf[4] = pack_header(level, 0);
    drv_rtt::write(Channel::AiLog, &buf);
}

#[doc(hidden)]
#[macro_export]
macro_rules! __unit {
    ($x:expr) => {
        ()
    };
}

#[macro_export]
macro_rules! log {
    ($level:expr, $fmt:literal) => {{
        const _: () = assert!(
            $crate::count_placeholders($fmt) == 0,
            "format placeholders do not match argument count"
        );
        if ($level as u8) <= $crate::MAX_LEVEL && ($level as u8) <= $crate::runtime_level() {
            const TOKEN: u32 = $crate::fnv1a32($fmt.as_bytes());
            $crate::emit0(TOKEN, $level);
        }
    }};
    ($level:expr, $fmt:literal, $($arg:expr),+ $(,)?) => {{
        const ARGC: usize = <[()]>::len(&[$($crate::__unit!($arg)),+]);
        const _: () = assert!(
            $crate::count_placeholders($fmt) == ARGC,
            "format placeholders do not match argument count"
        );
        if ($level as u8) <= $crate::MAX_LEVEL && ($level as u8) <= $crate::runtime_level() {
            const TOKEN: u32 = $crate::fnv1a32($fmt.as_bytes());
            $crate::emit(TOKEN, $level, &[$($crate::Arg::from($arg)),+]);
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($t:tt)*) => { $crate::log!($crate::Level::Error, $($t)*) };
}

#[macro_export]
macro_rules! warn {
    ($($t:tt)*) => { $crate::log!($crate::Level::Warn, $($t)*) };
}

#[macro_export]
macro_rules! info {
    ($($t:tt)*) => { $crate::log!($crate::Level::Info, $($t)*) };
}

#[macro_export]
macro_rules! debug {
    ($($t:tt)*) => { $crate::log!($crate::Level::Debug, $($t)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use ailog_wire::{unpack_header, varint_decode, zigzag_decode};
    use drv_rtt::fake;

    fn frame_zero_or_one_arg(stream: &[u8]) -> Vec<(u32, Level, Option<i32>)> {
        // Re-frames a capture of packets whose tokens tell us the arg
        // count, the way the host decoder uses the token database.
        let mut out = Vec::new();
        let mut at = 0;
        while at < stream.len() {
            let token = u32::from_le_bytes(stream[at..at + 4].try_into().unwrap());
            let (level, argc) = unpack_header(stream[at + 4]).unwrap();
            at += 5;
            let arg = match argc {
                0 => None,
                1 => {
                    let (z, n) = varint_decode(&stream[at..]).unwrap();
                    at += n;
                    Some(zigzag_decode(z))
                }
                _ => panic!("unexpected arg count {argc}"),
            };
            out.push((token, level, arg));
        }
        out
    }

    // Single test: the runtime level and the capture channel are
    // process-wide.
    #[test]
    fn emission_filtering_and_framing() {
        const T_PLAIN: u32 = fnv1a32(b"supervisor started");
        const T_TICK: u32 = fnv1a32(b"tick %d");

        // Baseline emission, zero-arg fast path included.
        fake::drain(drv_rtt::Channel::AiLog);
        crate::info!("supervisor started");
        crate::debug!("tick %d", -5);
        let records = frame_zero_or_one_arg(&fake::drain(drv_rtt::Channel::AiLog));
        assert_eq!(
            records,
            vec![
                (T_PLAIN, Level::Info, None),
                (T_TICK, Level::Debug, Some(-5)),
            ]
        );

        // Runtime floor: INFO call produces no wire bytes under WARN,
        // an ERROR call still produces a level-0 packet.
        set_runtime_level(Level::Warn as u8);
        crate::info!("supervisor started");
        crate::error!("tick %d", 1);
        let records = frame_zero_or_one_arg(&fake::drain(drv_rtt::Channel::AiLog));
        assert_eq!(records, vec![(T_TICK, Level::Error, Some(1))]);
        set_runtime_level(Level::Debug as u8);

        // Concurrent producers: whatever lands in the channel must
        // re-frame into whole packets with only the two known tokens.
        let writers: Vec<_> = (0..4)
            .map(|i| {
                std::thread::spawn(move || {
                    for k in 0..200 {
                        if (i + k) % 2 == 0 {
                            crate::info!("supervisor started");
                        } else {
                            crate::debug!("tick %d", k);
                        }
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        let stream = fake::drain(drv_rtt::Channel::AiLog);
        assert!(!stream.is_empty());
        for (token, _, arg) in frame_zero_or_one_arg(&stream) {
            match token {
                T_PLAIN => assert!(arg.is_none()),
                T_TICK => assert!(arg.is_some()),
                other => panic!("corrupt token {other:#x} in stream"),
            }
        }
    }

    #[test]
    fn token_matches_wire_const() {
        assert_eq!(
            fnv1a32(ailog_wire::BUILD_ID_FMT.as_bytes()),
            ailog_wire::build_id_token()
        );
    }
}
