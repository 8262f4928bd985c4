//! Device settings
//!
//! Settings live in a key-value store addressed by section and name. The
//! firmware keeps them in RAM ([`MemorySettings`]) seeded with defaults; the
//! runtime only ever reads timeouts, cadences and the radio identity.

use embassy_time::Duration;
use heapless::{FnvIndexMap, String};

use crate::ble::{DeviceName, DEFAULT_DEVICE_NAME, DEFAULT_PASSKEY};
use crate::error::{Error, Result};
use crate::power::Intervals;

pub const DEVICE_SETTINGS: &str = "DEVICE_SETTINGS";

pub const SCREEN_TIMEOUT_MS: &str = "screen_timeout_ms";
pub const DEEPSLEEP_TIMEOUT_MS: &str = "deepsleep_timeout_ms";
pub const PWR_SAVE_BOOT: &str = "pwr_save_boot";
pub const GPS_ACTIVE_INTERVAL_MS: &str = "gps_active_interval_ms";
pub const GPS_IDLE_INTERVAL_MS: &str = "gps_idle_interval_ms";
pub const BLE_ACTIVE_INTERVAL_MS: &str = "ble_active_interval_ms";
pub const BLE_IDLE_INTERVAL_MS: &str = "ble_idle_interval_ms";
pub const DEVICE_NAME: &str = "device_name";
pub const PASSKEY: &str = "passkey";

pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 30_000;
pub const DEFAULT_DEEP_SLEEP_TIMEOUT_MS: u32 = 480_000;
/// Floor on the idle timeout, whatever the store says
pub const MIN_IDLE_TIMEOUT_MS: u32 = 5_000;

pub const DEFAULT_ACTIVE_INTERVALS: Intervals = Intervals {
    gps_poll_ms: 1_000,
    notify_ms: 1_000,
};
pub const DEFAULT_IDLE_INTERVALS: Intervals = Intervals {
    gps_poll_ms: 30_000,
    notify_ms: 30_000,
};

const KEY_LEN: usize = 24;
const TEXT_LEN: usize = 32;
const MAX_SETTINGS: usize = 16;

type Key = String<KEY_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
    Text(String<TEXT_LEN>),
}

impl SettingValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            SettingValue::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(v) => Some(*v),
            SettingValue::Int(v) => Some(*v != 0),
            SettingValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn text(s: &str) -> Result<Self> {
        String::try_from(s)
            .map(SettingValue::Text)
            .map_err(|_| Error::Settings)
    }
}

/// Key-value settings, addressed by section and name
pub trait SettingsStore {
    fn get(&self, section: &str, name: &str) -> Option<SettingValue>;
    fn set(&mut self, section: &str, name: &str, value: SettingValue) -> Result<()>;
}

/// RAM-backed settings store
#[derive(Debug, Default)]
pub struct MemorySettings {
    entries: FnvIndexMap<(Key, Key), SettingValue, MAX_SETTINGS>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with every default the runtime reads
    pub fn with_defaults() -> Result<Self> {
        let mut store = Self::new();
        let ints = [
            (SCREEN_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS),
            (DEEPSLEEP_TIMEOUT_MS, DEFAULT_DEEP_SLEEP_TIMEOUT_MS),
            (GPS_ACTIVE_INTERVAL_MS, DEFAULT_ACTIVE_INTERVALS.gps_poll_ms),
            (GPS_IDLE_INTERVAL_MS, DEFAULT_IDLE_INTERVALS.gps_poll_ms),
            (BLE_ACTIVE_INTERVAL_MS, DEFAULT_ACTIVE_INTERVALS.notify_ms),
            (BLE_IDLE_INTERVAL_MS, DEFAULT_IDLE_INTERVALS.notify_ms),
            (PASSKEY, DEFAULT_PASSKEY),
        ];
        for (name, value) in ints {
            store.set(DEVICE_SETTINGS, name, SettingValue::Int(i64::from(value)))?;
        }
        store.set(DEVICE_SETTINGS, PWR_SAVE_BOOT, SettingValue::Bool(false))?;
        store.set(DEVICE_SETTINGS, DEVICE_NAME, SettingValue::text(DEFAULT_DEVICE_NAME)?)?;
        Ok(store)
    }

    fn key(section: &str, name: &str) -> Result<(Key, Key)> {
        let section = Key::try_from(section).map_err(|_| Error::Settings)?;
        let name = Key::try_from(name).map_err(|_| Error::Settings)?;
        Ok((section, name))
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, section: &str, name: &str) -> Option<SettingValue> {
        let key = Self::key(section, name).ok()?;
        self.entries.get(&key).cloned()
    }

    fn set(&mut self, section: &str, name: &str, value: SettingValue) -> Result<()> {
        let key = Self::key(section, name)?;
        self.entries
            .insert(key, value)
            .map(|_| ())
            .map_err(|_| Error::Settings)
    }
}

fn read_u32<S: SettingsStore + ?Sized>(store: &S, name: &str, default: u32) -> u32 {
    match store.get(DEVICE_SETTINGS, name) {
        Some(value) => value.as_u32().unwrap_or_else(|| {
            log_warn!("setting {} has the wrong type, using default", name);
            default
        }),
        None => default,
    }
}

/// Timeouts and cadences driving the power controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerConfig {
    pub idle_timeout: Duration,
    pub deep_sleep_timeout: Duration,
    pub power_save_on_boot: bool,
    pub active: Intervals,
    pub idle: Intervals,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(u64::from(DEFAULT_IDLE_TIMEOUT_MS)),
            deep_sleep_timeout: Duration::from_millis(u64::from(DEFAULT_DEEP_SLEEP_TIMEOUT_MS)),
            power_save_on_boot: false,
            active: DEFAULT_ACTIVE_INTERVALS,
            idle: DEFAULT_IDLE_INTERVALS,
        }
    }
}

impl PowerConfig {
    pub fn from_store<S: SettingsStore + ?Sized>(store: &S) -> Self {
        let idle_ms = read_u32(store, SCREEN_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS);
        let deep_sleep_ms = read_u32(store, DEEPSLEEP_TIMEOUT_MS, DEFAULT_DEEP_SLEEP_TIMEOUT_MS);
        let power_save_on_boot = store
            .get(DEVICE_SETTINGS, PWR_SAVE_BOOT)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Self {
            idle_timeout: idle_timeout(idle_ms),
            deep_sleep_timeout: Duration::from_millis(u64::from(deep_sleep_ms)),
            power_save_on_boot,
            active: Intervals {
                gps_poll_ms: read_u32(store, GPS_ACTIVE_INTERVAL_MS, DEFAULT_ACTIVE_INTERVALS.gps_poll_ms),
                notify_ms: read_u32(store, BLE_ACTIVE_INTERVAL_MS, DEFAULT_ACTIVE_INTERVALS.notify_ms),
            },
            idle: Intervals {
                gps_poll_ms: read_u32(store, GPS_IDLE_INTERVAL_MS, DEFAULT_IDLE_INTERVALS.gps_poll_ms),
                notify_ms: read_u32(store, BLE_IDLE_INTERVAL_MS, DEFAULT_IDLE_INTERVALS.notify_ms),
            },
        }
    }
}

/// Idle timeout with the floor applied
pub fn idle_timeout(ms: u32) -> Duration {
    Duration::from_millis(u64::from(ms.max(MIN_IDLE_TIMEOUT_MS)))
}

/// Radio identity: advertised name and pairing passkey
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    pub device_name: DeviceName,
    pub passkey: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            device_name: default_name(),
            passkey: DEFAULT_PASSKEY,
        }
    }
}

impl RadioConfig {
    pub fn from_store<S: SettingsStore + ?Sized>(store: &S) -> Self {
        let device_name = store
            .get(DEVICE_SETTINGS, DEVICE_NAME)
            .and_then(|v| v.as_text().and_then(|s| DeviceName::try_from(s).ok()))
            .unwrap_or_else(default_name);

        let passkey = read_u32(store, PASSKEY, DEFAULT_PASSKEY);
        let passkey = if passkey > 999_999 {
            log_warn!("passkey {} out of range, using default", passkey);
            DEFAULT_PASSKEY
        } else {
            passkey
        };

        Self {
            device_name,
            passkey,
        }
    }
}

fn default_name() -> DeviceName {
    let mut name = DeviceName::new();
    // Fits by construction of the constant
    let _ = name.push_str(DEFAULT_DEVICE_NAME);
    name
}
