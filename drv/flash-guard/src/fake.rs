// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-in: there is no second core and no XIP pause to worry
//! about, so the operation just runs.

pub fn execute<F: FnOnce()>(f: F) -> bool {
    f();
    true
}
