use std::collections::VecDeque;

use embassy_time::{Duration, Instant};

use gnss_beacon::ble::{
    AdvertisingParams, AttrHandle, GattService, PairingConfig, Radio, RadioEvent,
    PLACEHOLDER_ALTITUDE, PLACEHOLDER_POSITIONING,
};
use gnss_beacon::boot::BootRecord;
use gnss_beacon::config::{
    MemorySettings, SettingValue, SettingsStore, DEVICE_SETTINGS, SCREEN_TIMEOUT_MS,
};
use gnss_beacon::error::{ConnHandle, RadioError, Result, SerialError};
use gnss_beacon::gps::SerialSource;
use gnss_beacon::power::{Board, PowerState, Step};
use gnss_beacon::runtime::{Runtime, Shared};
use gnss_beacon::state::FixStatus;

const RMC: &str = "$GNRMC,123519.00,A,4807.038,N,01131.000,E,022.4,084.4,230394,,,A*4C";
const GGA: &str = "$GNGGA,123519.00,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*77";

/// Hands out queued chunks, one per read
#[derive(Default)]
struct Script {
    chunks: VecDeque<Vec<u8>>,
}

impl Script {
    fn push_line(&mut self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        // Split mid-sentence to exercise line reassembly
        let tail = bytes.split_off(bytes.len() / 2);
        self.chunks.push_back(bytes);
        self.chunks.push_back(tail);
    }
}

impl SerialSource for Script {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, SerialError> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.chunks.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

#[derive(Default)]
struct Recorder {
    enabled: bool,
    advertised: usize,
    writes: Vec<Vec<u8>>,
    notified: Vec<ConnHandle>,
    disconnected: Vec<ConnHandle>,
}

impl Recorder {
    fn last_value(&self) -> Option<&str> {
        self.writes
            .last()
            .map(|w| std::str::from_utf8(w).expect("frame is ASCII"))
    }
}

impl Radio for Recorder {
    fn set_enabled(&mut self, enabled: bool) -> core::result::Result<(), RadioError> {
        self.enabled = enabled;
        Ok(())
    }

    fn register(&mut self, _: &GattService) -> core::result::Result<AttrHandle, RadioError> {
        Ok(42)
    }

    fn configure_pairing(&mut self, _: &PairingConfig) -> core::result::Result<(), RadioError> {
        Ok(())
    }

    fn advertise(
        &mut self,
        _: &AdvertisingParams,
        _: &[u8],
    ) -> core::result::Result<(), RadioError> {
        self.advertised += 1;
        Ok(())
    }

    fn write(&mut self, _: AttrHandle, value: &[u8]) -> core::result::Result<(), RadioError> {
        self.writes.push(value.to_vec());
        Ok(())
    }

    fn notify(&mut self, conn: ConnHandle, _: AttrHandle) -> core::result::Result<(), RadioError> {
        self.notified.push(conn);
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle) -> core::result::Result<(), RadioError> {
        self.disconnected.push(conn);
        Ok(())
    }
}

#[derive(Default)]
struct Rails {
    display: bool,
    gnss: bool,
    wake_armed: bool,
}

impl Board for Rails {
    fn set_display_power(&mut self, on: bool) -> Result<()> {
        self.display = on;
        Ok(())
    }

    fn set_gnss_power(&mut self, on: bool) -> Result<()> {
        self.gnss = on;
        Ok(())
    }

    fn arm_wake_source(&mut self) -> Result<()> {
        self.wake_armed = true;
        Ok(())
    }
}

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

fn runtime<'a>(
    shared: &'a Shared,
    settings: &MemorySettings,
    serial: Script,
) -> Runtime<'a, Script, Recorder, Rails> {
    let mut rt = Runtime::new(
        serial,
        Recorder::default(),
        Rails::default(),
        settings,
        BootRecord::default(),
        shared,
        at(0),
    );
    rt.start(at(0));
    rt
}

#[test]
fn receiver_output_reaches_connected_central() {
    let shared = Shared::new();
    let settings = MemorySettings::with_defaults().unwrap();
    let mut serial = Script::default();
    serial.push_line("$GPGSV,1,1,01,05,40,083,46*40");
    serial.push_line(RMC);
    serial.push_line(GGA);
    let mut rt = runtime(&shared, &settings, serial);

    shared.events.try_send(RadioEvent::Connected(1)).unwrap();
    assert_eq!(rt.poll(at(10)), Step::Stay);

    let fix = rt.snapshot();
    assert_eq!(fix.fix_status, FixStatus::Valid);
    assert!((fix.latitude.unwrap() - 48.1173).abs() < 1e-4);
    assert!((fix.longitude.unwrap() - 11.516_666).abs() < 1e-4);
    assert_eq!(fix.satellite_count, Some(8));
    assert_eq!(fix.altitude_m, Some(545.4));
    assert_eq!(fix.satellites_in_view, Some(1));
    assert_eq!(fix.raw.other_len(), 1);

    let radio = rt.notifier().radio();
    assert_eq!(radio.last_value(), Some(format!("{RMC}\r\n{GGA}").as_str()));
    assert_eq!(radio.notified, [1]);
    assert_eq!(rt.reader().parser().stats().decoded, 3);
}

#[test]
fn fresh_device_serves_placeholders() {
    let shared = Shared::new();
    let settings = MemorySettings::with_defaults().unwrap();
    let mut rt = runtime(&shared, &settings, Script::default());

    // Registration writes an empty value first
    assert_eq!(rt.notifier().radio().writes, [Vec::<u8>::new()]);

    rt.poll(at(1));
    let expected = format!("{PLACEHOLDER_ALTITUDE}\r\n{PLACEHOLDER_POSITIONING}");
    assert_eq!(rt.notifier().radio().last_value(), Some(expected.as_str()));
}

#[test]
fn notify_follows_cadence() {
    let shared = Shared::new();
    let settings = MemorySettings::with_defaults().unwrap();
    let mut rt = runtime(&shared, &settings, Script::default());

    shared.events.try_send(RadioEvent::Connected(3)).unwrap();
    rt.poll(at(0));
    rt.poll(at(999));
    assert_eq!(rt.notifier().radio().notified, [3]);
    rt.poll(at(1_000));
    assert_eq!(rt.notifier().radio().notified, [3, 3]);
}

#[test]
fn newer_central_replaces_older() {
    let shared = Shared::new();
    let settings = MemorySettings::with_defaults().unwrap();
    let mut rt = runtime(&shared, &settings, Script::default());
    let advertised = rt.notifier().radio().advertised;

    shared.events.try_send(RadioEvent::Connected(1)).unwrap();
    shared.events.try_send(RadioEvent::Connected(2)).unwrap();
    rt.poll(at(5));
    assert_eq!(rt.notifier().radio().disconnected, [1]);
    assert!(rt.notifier().connections().contains(2));
    assert_eq!(rt.notifier().connections().len(), 1);

    // Stale disconnect of the evicted link keeps advertising off
    shared.events.try_send(RadioEvent::Disconnected(1)).unwrap();
    rt.poll(at(6));
    assert_eq!(rt.notifier().radio().advertised, advertised);

    shared.events.try_send(RadioEvent::Disconnected(2)).unwrap();
    rt.poll(at(7));
    assert!(rt.notifier().connections().is_empty());
    assert_eq!(rt.notifier().radio().advertised, advertised + 1);
}

#[test]
fn inactivity_leads_to_deep_sleep_and_wake() {
    let shared = Shared::new();
    let settings = MemorySettings::with_defaults().unwrap();
    let mut rt = runtime(&shared, &settings, Script::default());
    assert!(rt.board().display);
    assert_eq!(rt.wait_plan().total(), Duration::from_millis(1_000));

    assert_eq!(rt.poll(at(29_999)), Step::Stay);
    assert_eq!(rt.poll(at(30_000)), Step::Entered(PowerState::Idle));
    assert!(!rt.board().display);
    assert_eq!(shared.cadence.gps_poll_ms(), 30_000);
    assert_eq!(rt.wait_plan().total(), Duration::from_millis(30_000));

    assert_eq!(rt.poll(at(509_999)), Step::Stay);
    assert_eq!(rt.poll(at(510_000)), Step::Suspend);
    assert_eq!(rt.power_state(), PowerState::DeepSleep);
    assert!(!rt.notifier().is_active());
    assert!(!rt.notifier().radio().enabled);
    assert!(!rt.board().gnss);
    assert!(rt.board().wake_armed);

    assert_eq!(rt.external_wake(at(600_000)), Step::Entered(PowerState::Active));
    assert!(rt.notifier().is_active());
    assert!(rt.board().gnss);
    assert!(rt.board().display);
    assert_eq!(shared.cadence.gps_poll_ms(), 1_000);
}

#[test]
fn interaction_keeps_device_active() {
    let shared = Shared::new();
    let mut settings = MemorySettings::with_defaults().unwrap();
    settings
        .set(DEVICE_SETTINGS, SCREEN_TIMEOUT_MS, SettingValue::Int(10_000))
        .unwrap();
    let mut rt = runtime(&shared, &settings, Script::default());

    assert_eq!(rt.user_interaction(at(8_000)), Step::Stay);
    assert_eq!(rt.poll(at(10_000)), Step::Stay);
    assert_eq!(rt.poll(at(18_000)), Step::Entered(PowerState::Idle));

    assert_eq!(rt.user_interaction(at(20_000)), Step::Entered(PowerState::Active));
    assert!(rt.board().display);
    assert_eq!(shared.cadence.notify_ms(), 1_000);
}

#[test]
fn active_cadence_resumes_right_after_idle() {
    let shared = Shared::new();
    let settings = MemorySettings::with_defaults().unwrap();
    let mut rt = runtime(&shared, &settings, Script::default());
    shared.events.try_send(RadioEvent::Connected(1)).unwrap();

    let mut now = 0;
    while now < 30_000 {
        rt.poll(at(now));
        now += 1_000;
    }
    assert_eq!(rt.poll(at(30_000)), Step::Entered(PowerState::Idle));
    let before = rt.notifier().radio().notified.len();

    assert_eq!(rt.user_interaction(at(31_000)), Step::Entered(PowerState::Active));
    rt.poll(at(31_000));
    assert_eq!(rt.notifier().radio().notified.len(), before + 1);
    rt.poll(at(32_000));
    assert_eq!(rt.notifier().radio().notified.len(), before + 2);
}
