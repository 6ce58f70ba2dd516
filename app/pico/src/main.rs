// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The board image: boot orchestration for the RP2040 target, a stub
//! everywhere else (the logic all lives in the library crates, which
//! build and test on the host through their fake backends).

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod fw;

#[cfg(not(target_os = "none"))]
fn main() {
    println!("app-pico is the RP2040 firmware image; build for thumbv6m-none-eabi");
}
