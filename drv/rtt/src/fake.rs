// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host capture backend: same sizes, same drop-whole-packet behavior,
//! but the bytes land in memory where tests can re-frame them.

use spin::Mutex;

use crate::Channel;

type Capture = heapless::Vec<u8, 2048>;

static TERMINAL: Mutex<Capture> = Mutex::new(heapless::Vec::new());
static AILOG: Mutex<Capture> = Mutex::new(heapless::Vec::new());
static VITALS: Mutex<Capture> = Mutex::new(heapless::Vec::new());

fn capture(ch: Channel) -> &'static Mutex<Capture> {
    match ch {
        Channel::Terminal => &TERMINAL,
        Channel::AiLog => &AILOG,
        Channel::Vitals => &VITALS,
    }
}

pub fn init() {}

/// Caller holds the (fake) critical section, but the capture has its own
/// lock so test helpers can drain concurrently.
pub fn write_nolock(ch: Channel, bytes: &[u8]) -> bool {
    let mut buf = capture(ch).lock();
    if buf.len() + bytes.len() > ch.buffer_len() {
        return false;
    }
    buf.extend_from_slice(bytes).is_ok()
}

/// Takes everything captured on a channel so far.
pub fn drain(ch: Channel) -> Capture {
    let mut buf = capture(ch).lock();
    let out = buf.clone();
    buf.clear();
    out
}
