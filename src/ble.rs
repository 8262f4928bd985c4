//! BLE notifier
//!
//! One location service (0x1819) with one NMEA characteristic (0x2A8E). The
//! characteristic carries the latest positioning and altitude sentences as
//! CRLF-joined ASCII, refreshed on the notify cadence and on every read.
//!
//! Only one client is served at a time: a new connection evicts whoever was
//! connected before. Stack callbacks never touch the connection set; they
//! queue a [`RadioEvent`] that the main loop hands to [`Notifier::handle_event`].

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant};
use heapless::{String, Vec};

use crate::config::RadioConfig;
use crate::error::{ConnHandle, RadioError, Result};
use crate::power::RadioPower;
use crate::state::{RawSentenceCache, MAX_SENTENCE_LEN};

pub const LOCATION_SERVICE_UUID: u16 = 0x1819;
pub const NMEA_CHARACTERISTIC_UUID: u16 = 0x2A8E;
/// Generic location and navigation display device
pub const APPEARANCE: u16 = 0x0541;
/// LE general discoverable, BR/EDR not supported
pub const ADV_FLAGS: u8 = 0x06;
pub const ADVERTISING_DURATION: Duration = Duration::from_secs(30);

pub const DEFAULT_PASSKEY: u32 = 1234;
pub const DEFAULT_DEVICE_NAME: &str = "ESP32-GNSS-GPS";

pub const MAX_ADV_LEN: usize = 31;
pub const MAX_DEVICE_NAME_LEN: usize = MAX_ADV_LEN - 2;
pub const MAX_FRAME_LEN: usize = 2 * MAX_SENTENCE_LEN + 2;
pub const MAX_CONNECTIONS: usize = 1;
pub const RADIO_EVENT_QUEUE_LEN: usize = 8;

pub const PLACEHOLDER_ALTITUDE: &str =
    "$GNGGA,000000.00,0000.0000,N,00000.0000,E,0,00,99.99,0.0,M,,M,,*56";
pub const PLACEHOLDER_POSITIONING: &str =
    "$GNRMC,000000.00,V,0000.0000,N,000000.0000,E,0.0,0.0,010170,,,N*48";

const AD_FLAGS: u8 = 0x01;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_APPEARANCE: u8 = 0x19;

pub type AttrHandle = u16;
pub type DeviceName = String<MAX_DEVICE_NAME_LEN>;
pub type Frame = String<MAX_FRAME_LEN>;
pub type AdvPayload = Vec<u8, MAX_ADV_LEN>;

/// Hand-off queue from the BLE stack to the main loop
pub type RadioEvents = Channel<CriticalSectionRawMutex, RadioEvent, RADIO_EVENT_QUEUE_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    Connected(ConnHandle),
    Disconnected(ConnHandle),
    ReadRequest(ConnHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicProps {
    pub read: bool,
    pub notify: bool,
    pub indicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattService {
    pub service_uuid: u16,
    pub characteristic_uuid: u16,
    pub properties: CharacteristicProps,
}

pub const LOCATION_SERVICE: GattService = GattService {
    service_uuid: LOCATION_SERVICE_UUID,
    characteristic_uuid: NMEA_CHARACTERISTIC_UUID,
    properties: CharacteristicProps {
        read: true,
        notify: true,
        indicate: true,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoCapability {
    DisplayOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingConfig {
    pub mitm: bool,
    pub bonding: bool,
    pub le_secure: bool,
    pub passkey: u32,
    pub io_capability: IoCapability,
}

impl PairingConfig {
    pub const fn fixed_passkey(passkey: u32) -> Self {
        Self {
            mitm: true,
            bonding: true,
            le_secure: true,
            passkey,
            io_capability: IoCapability::DisplayOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParams {
    pub duration: Duration,
    pub connectable: bool,
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        Self {
            duration: ADVERTISING_DURATION,
            connectable: true,
        }
    }
}

/// BLE controller and GATT server operations the notifier needs
pub trait Radio {
    fn set_enabled(&mut self, enabled: bool) -> core::result::Result<(), RadioError>;
    /// Allocate the service and return the characteristic value handle
    fn register(&mut self, service: &GattService) -> core::result::Result<AttrHandle, RadioError>;
    fn configure_pairing(&mut self, pairing: &PairingConfig) -> core::result::Result<(), RadioError>;
    fn advertise(
        &mut self,
        params: &AdvertisingParams,
        payload: &[u8],
    ) -> core::result::Result<(), RadioError>;
    fn write(&mut self, attr: AttrHandle, value: &[u8]) -> core::result::Result<(), RadioError>;
    fn notify(&mut self, conn: ConnHandle, attr: AttrHandle) -> core::result::Result<(), RadioError>;
    fn disconnect(&mut self, conn: ConnHandle) -> core::result::Result<(), RadioError>;
}

fn push_ad(payload: &mut AdvPayload, kind: u8, data: &[u8]) {
    // Callers size `data` so the structure always fits
    let _ = payload.push(data.len() as u8 + 1);
    let _ = payload.push(kind);
    let _ = payload.extend_from_slice(data);
}

/// Flags, name, service UUID and appearance, in that order. A name that does
/// not fit is cut and sent as a shortened name.
pub fn advertising_payload(name: &str) -> AdvPayload {
    let mut payload = AdvPayload::new();
    push_ad(&mut payload, AD_FLAGS, &[ADV_FLAGS]);

    // flags (3) + uuid (4) + appearance (4) + name header (2)
    let room = MAX_ADV_LEN - 13;
    let name = name.as_bytes();
    if !name.is_empty() {
        if name.len() <= room {
            push_ad(&mut payload, AD_COMPLETE_NAME, name);
        } else {
            push_ad(&mut payload, AD_SHORT_NAME, &name[..room]);
        }
    }

    push_ad(&mut payload, AD_UUID16_COMPLETE, &LOCATION_SERVICE_UUID.to_le_bytes());
    push_ad(&mut payload, AD_APPEARANCE, &APPEARANCE.to_le_bytes());
    payload
}

fn sentence(line: Option<&str>) -> Option<&str> {
    line.map(str::trim).filter(|l| l.starts_with('$'))
}

/// Characteristic value for the current cache.
///
/// Positioning line then altitude line, each preferring the GN talker. With
/// neither available the two placeholder sentences go out instead.
pub fn build_frame(raw: &RawSentenceCache) -> Frame {
    let positioning = sentence(raw.positioning());
    let altitude = sentence(raw.altitude());

    let lines: [Option<&str>; 2] = match (positioning, altitude) {
        (None, None) => [Some(PLACEHOLDER_ALTITUDE), Some(PLACEHOLDER_POSITIONING)],
        found => [found.0, found.1],
    };

    let mut frame = Frame::new();
    for line in lines.into_iter().flatten() {
        if !frame.is_empty() {
            let _ = frame.push_str("\r\n");
        }
        // Two cached sentences plus the separator always fit
        let _ = frame.push_str(line);
    }
    frame
}

/// Connections currently admitted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSet {
    handles: Vec<ConnHandle, MAX_CONNECTIONS>,
}

impl ConnectionSet {
    pub const fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, conn: ConnHandle) -> bool {
        self.handles.contains(&conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = ConnHandle> + '_ {
        self.handles.iter().copied()
    }

    pub fn remove(&mut self, conn: ConnHandle) -> bool {
        match self.handles.iter().position(|&h| h == conn) {
            Some(i) => {
                self.handles.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Empty the set, returning what it held
    pub fn take(&mut self) -> Vec<ConnHandle, MAX_CONNECTIONS> {
        core::mem::take(&mut self.handles)
    }

    fn admit(&mut self, conn: ConnHandle) {
        self.handles.clear();
        // Capacity is at least one and the set was just cleared
        let _ = self.handles.push(conn);
    }
}

pub struct Notifier<R> {
    radio: R,
    pairing: PairingConfig,
    advertising: AdvertisingParams,
    payload: AdvPayload,
    attr: Option<AttrHandle>,
    powered: bool,
    active: bool,
    connections: ConnectionSet,
    last_refresh: Option<Instant>,
}

impl<R: Radio> Notifier<R> {
    pub fn new(radio: R, config: &RadioConfig) -> Self {
        Self {
            radio,
            pairing: PairingConfig::fixed_passkey(config.passkey),
            advertising: AdvertisingParams::default(),
            payload: advertising_payload(&config.device_name),
            attr: None,
            powered: false,
            active: false,
            connections: ConnectionSet::new(),
            last_refresh: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Power the radio and start advertising. The service is registered on
    /// the first call only.
    pub fn activate(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }

        self.radio.set_enabled(true)?;
        self.powered = true;

        if self.attr.is_none() {
            let attr = self.radio.register(&LOCATION_SERVICE)?;
            self.radio.write(attr, &[])?;
            self.attr = Some(attr);
            log_info!("location service registered, value handle {}", attr);
        }

        self.radio.configure_pairing(&self.pairing)?;
        self.radio.advertise(&self.advertising, &self.payload)?;
        self.active = true;
        self.last_refresh = None;
        log_info!("BLE advertising");
        Ok(())
    }

    /// Power the radio down and forget every connection. Bonds are kept by
    /// the host stack.
    pub fn deactivate(&mut self) -> Result<()> {
        self.active = false;
        self.connections.take();
        if self.powered {
            self.radio.set_enabled(false)?;
            self.powered = false;
            log_info!("BLE off");
        }
        Ok(())
    }

    pub fn handle_event(&mut self, event: RadioEvent, raw: &RawSentenceCache) -> Result<()> {
        match event {
            RadioEvent::Connected(conn) => {
                for old in self.connections.take() {
                    if old == conn {
                        continue;
                    }
                    log_info!("evicting connection {}", old);
                    if let Err(e) = self.radio.disconnect(old) {
                        log_warn!("disconnect {} failed: {:?}", old, e);
                    }
                }
                self.connections.admit(conn);
                log_info!("connection {} admitted", conn);
            }
            RadioEvent::Disconnected(conn) => {
                self.connections.remove(conn);
                log_info!("connection {} closed", conn);
                if self.active && self.connections.is_empty() {
                    self.radio.advertise(&self.advertising, &self.payload)?;
                }
            }
            RadioEvent::ReadRequest(_) => self.refresh(raw)?,
        }
        Ok(())
    }

    /// Process everything queued by the stack since the last call
    pub fn drain_events(&mut self, events: &RadioEvents, raw: &RawSentenceCache) -> Result<()> {
        while let Ok(event) = events.try_receive() {
            self.handle_event(event, raw)?;
        }
        Ok(())
    }

    /// Write the current frame and notify every connection. A connection
    /// that cannot be notified is dropped.
    pub fn refresh(&mut self, raw: &RawSentenceCache) -> Result<()> {
        let Some(attr) = self.attr.filter(|_| self.active) else {
            return Ok(());
        };

        let frame = build_frame(raw);
        self.radio.write(attr, frame.as_bytes())?;

        let mut failed: Vec<ConnHandle, MAX_CONNECTIONS> = Vec::new();
        for conn in self.connections.iter() {
            if let Err(e) = self.radio.notify(conn, attr) {
                log_warn!("notify {} failed: {:?}", conn, e);
                let _ = failed.push(conn);
            }
        }
        for conn in failed {
            self.connections.remove(conn);
        }
        Ok(())
    }

    /// Refresh once `interval` has passed since the last one. The interval
    /// is taken per call, so a cadence change applies immediately. Returns
    /// whether a refresh went out.
    pub fn tick(&mut self, now: Instant, interval: Duration, raw: &RawSentenceCache) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        if self
            .last_refresh
            .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return Ok(false);
        }
        self.last_refresh = Some(now);
        self.refresh(raw)?;
        Ok(true)
    }
}

impl<R: Radio> RadioPower for Notifier<R> {
    fn activate(&mut self) -> Result<()> {
        Notifier::activate(self)
    }

    fn deactivate(&mut self) -> Result<()> {
        Notifier::deactivate(self)
    }
}
