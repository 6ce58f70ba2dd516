// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The persistent configuration store and filesystem singleton.
//!
//! `init` runs once, pre-scheduler: mount (formatting a virgin region on
//! the way), ensure the directories exist, load the config record or
//! write defaults back. After that the active config is a
//! process-lifetime borrow — `save_config` persists new values for the
//! *next* boot, because producers cache the borrow and a half-applied
//! config is worse than a stale one.
//!
//! Every failure in here degrades: no filesystem means defaults and an
//! ERROR on the log channel, never a halt.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use sectorfs::Filesystem;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        type Backing = drv_flash_guard::XipFlash;

        fn backing() -> Backing {
            drv_flash_guard::XipFlash::new(FS_BASE, FS_BLOCKS)
        }
    } else {
        type Backing = sectorfs::RamStorage<FS_BLOCKS>;

        fn backing() -> Backing {
            sectorfs::RamStorage::new()
        }
    }
}

/// Flash geometry: the filesystem owns the last 256 KiB of the 2 MiB
/// part. The linker script caps the image at [`FIRMWARE_MAX_BYTES`];
/// the assertion keeps the two numbers honest in one place.
pub const FLASH_BYTES: u32 = 2 * 1024 * 1024;
pub const FS_BYTES: u32 = 256 * 1024;
pub const FS_BASE: u32 = FLASH_BYTES - FS_BYTES;
pub const FS_BLOCKS: usize = (FS_BYTES / 4096) as usize;
pub const FIRMWARE_MAX_BYTES: u32 = 1536 * 1024;
const_assert!(FIRMWARE_MAX_BYTES <= FS_BASE);

pub const CONFIG_DIR: &str = "/config";
pub const CONFIG_PATH: &str = "/config/app.json";
pub const CRASH_DIR: &str = "/crash";
pub const CRASH_PATH: &str = "/crash/latest.json";

/// The application config record. Missing JSON fields take the
/// compile-time defaults, so a record written by older firmware still
/// loads after the schema grows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_blink_delay")]
    pub blink_delay_ms: u32,
    #[serde(default = "default_log_level")]
    pub log_level: u32,
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_ms: u32,
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_ms: u32,
}

impl Config {
    pub const DEFAULT: Config = Config {
        blink_delay_ms: 500,
        log_level: 2,
        telemetry_interval_ms: 500,
        watchdog_timeout_ms: 8000,
    };
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn default_blink_delay() -> u32 {
    Config::DEFAULT.blink_delay_ms
}

fn default_log_level() -> u32 {
    Config::DEFAULT.log_level
}

fn default_telemetry_interval() -> u32 {
    Config::DEFAULT.telemetry_interval_ms
}

fn default_watchdog_timeout() -> u32 {
    Config::DEFAULT.watchdog_timeout_ms
}

/// Scratch size for a serialized config or crash record.
const JSON_BUF: usize = 256;

// The active config: written once during `init`, then read-only for the
// life of the process. A plain flag-guarded cell keeps the read path
// lock-free on a core with no compare-and-swap.
struct ConfigCell {
    set: AtomicBool,
    value: UnsafeCell<Config>,
}

unsafe impl Sync for ConfigCell {}

static CONFIG: ConfigCell = ConfigCell {
    set: AtomicBool::new(false),
    value: UnsafeCell::new(Config::DEFAULT),
};

impl ConfigCell {
    fn install(&self, c: Config) {
        rtos::critical(|| {
            // Safety: pre-scheduler, single-threaded; nothing has handed
            // out a borrow until `set` goes true.
            unsafe { *self.value.get() = c };
            self.set.store(true, Ordering::Release);
        });
    }

    fn get(&'static self) -> &'static Config {
        if self.set.load(Ordering::Acquire) {
            // Safety: immutable after `install`.
            unsafe { &*self.value.get() }
        } else {
            &Config::DEFAULT
        }
    }
}

static FS: rtos::Mutex<Option<Filesystem<Backing>>> = rtos::Mutex::new(None);

/// The active configuration, valid for the life of the process.
pub fn config() -> &'static Config {
    CONFIG.get()
}

/// Mounts the filesystem and loads the config record. Returns `false`
/// when persistence is unavailable; the caller keeps going on defaults.
pub fn init() -> bool {
    FS.init();

    let fs = match Filesystem::mount(backing()) {
        Ok(fs) => {
            ailog::info!("Mounted existing filesystem");
            Some(fs)
        }
        Err((_, mut storage)) => {
            // First boot (all 0xFF) or a region too damaged to read:
            // one format, one retry.
            ailog::warn!("filesystem mount failed, formatting");
            if Filesystem::format(&mut storage).is_ok() {
                Filesystem::mount(storage).ok()
            } else {
                None
            }
        }
    };

    let Some(mut fs) = fs else {
        ailog::error!("filesystem unusable, running with defaults");
        CONFIG.install(Config::DEFAULT);
        return false;
    };

    if fs.create_dir(CONFIG_DIR).is_err() {
        ailog::error!("cannot create config directory");
    }
    if fs.create_dir(CRASH_DIR).is_err() {
        ailog::error!("cannot create crash directory");
    }

    let mut buf = [0u8; JSON_BUF];
    let loaded = match fs.read_file(CONFIG_PATH, &mut buf) {
        Ok(n) => match serde_json_core::from_slice::<Config>(&buf[..n]) {
            Ok((c, _)) => Some(c),
            Err(_) => {
                ailog::warn!("config record unreadable, rewriting defaults");
                None
            }
        },
        Err(_) => {
            ailog::warn!("no config record, writing defaults");
            None
        }
    };

    let cfg = loaded.unwrap_or_else(|| {
        if write_config_to(&mut fs, &Config::DEFAULT).is_err() {
            ailog::error!("failed to persist default config");
        }
        Config::DEFAULT
    });

    CONFIG.install(cfg);
    ailog::set_runtime_level(cfg.log_level as u8);
    *FS.lock() = Some(fs);
    true
}

fn write_config_to(
    fs: &mut Filesystem<Backing>,
    cfg: &Config,
) -> Result<(), sectorfs::Error> {
    let mut buf = [0u8; JSON_BUF];
    let n = serde_json_core::to_slice(cfg, &mut buf).map_err(|_| sectorfs::Error::TooLarge)?;
    fs.write_file(CONFIG_PATH, &buf[..n])
}

/// Persists a new config record. The in-memory record is untouched; the
/// new values take effect on the next boot.
pub fn save_config(cfg: &Config) -> bool {
    let mut guard = FS.lock();
    match guard.as_mut() {
        Some(fs) => write_config_to(fs, cfg).is_ok(),
        None => false,
    }
}

/// Writes an arbitrary small file (the crash reporter's persistence
/// path). `false` when the filesystem never mounted or the write failed.
pub fn write_file(path: &str, data: &[u8]) -> bool {
    let mut guard = FS.lock();
    match guard.as_mut() {
        Some(fs) => fs.write_file(path, data).is_ok(),
        None => false,
    }
}

/// Reads a small file back. Mostly for the reporter's tests; the host
/// tools read these records over the probe, not through this crate.
pub fn read_file(path: &str, out: &mut [u8]) -> Option<usize> {
    let mut guard = FS.lock();
    guard.as_mut()?.read_file(path, out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test: the filesystem and config cell are process-wide.
    #[test]
    fn first_boot_defaults_then_update() {
        assert!(init());

        // Virgin region: formatted, defaults installed and persisted.
        let cfg = config();
        assert_eq!(*cfg, Config::DEFAULT);
        let mut buf = [0u8; JSON_BUF];
        let n = read_file(CONFIG_PATH, &mut buf).unwrap();
        let (reread, _) = serde_json_core::from_slice::<Config>(&buf[..n]).unwrap();
        assert_eq!(reread, Config::DEFAULT);

        // An update persists new values without touching the active
        // borrow.
        let newer = Config { blink_delay_ms: 600, log_level: 3, ..Config::DEFAULT };
        assert!(save_config(&newer));
        assert_eq!(config().blink_delay_ms, 500);
        let n = read_file(CONFIG_PATH, &mut buf).unwrap();
        let (reread, _) = serde_json_core::from_slice::<Config>(&buf[..n]).unwrap();
        assert_eq!(reread, newer);

        // Partial JSON: missing fields take defaults.
        let (partial, _) =
            serde_json_core::from_slice::<Config>(b"{\"blink_delay_ms\":123}").unwrap();
        assert_eq!(partial.blink_delay_ms, 123);
        assert_eq!(partial.watchdog_timeout_ms, 8000);

        // Crash persistence path goes through the same store.
        assert!(write_file(CRASH_PATH, b"{\"version\":1}"));
        let n = read_file(CRASH_PATH, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"{\"version\":1}");
    }
}
