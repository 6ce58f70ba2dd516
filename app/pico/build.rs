// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Derives the BUILD_ID from the same source scan that produces the
//! token database CSV, and injects it into the firmware environment.
//! A token collision anywhere in the firmware tree fails the build
//! right here.

use std::path::Path;

fn main() {
    let manifest = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR");
    let root = Path::new(&manifest).join("../..");
    for dir in tokendb::FIRMWARE_DIRS {
        println!("cargo:rerun-if-changed={}", root.join(dir).display());
    }

    let db = tokendb::scan_workspace(&root).expect("log token scan");
    println!("cargo:rustc-env=AILOG_BUILD_ID={}", db.build_id());
}
