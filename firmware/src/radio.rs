//! trouble-host binding for the notifier's [`Radio`] seam
//!
//! The GATT server and its attribute table are static and built once in
//! `main`; characteristic writes happen directly from the main loop.
//! Everything that needs a live connection (notify, disconnect), the
//! advertiser or the security manager goes through [`RadioCommands`] to the
//! BLE future in [`run`].
//!
//! The security manager picks its own display passkey. MITM is enforced here
//! instead: until a link reaches authenticated encryption every GATT request
//! on it is answered with an insufficient-authentication error.

use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use trouble_host::prelude::*;
use trouble_host::types::gatt_traits::{AsGatt, FromGatt, FromGattError};

use gnss_beacon::ble::{
    AdvPayload, AdvertisingParams, AttrHandle, GattService, IoCapability, PairingConfig, Radio,
    RadioEvent, RadioEvents, LOCATION_SERVICE, MAX_FRAME_LEN,
};
use gnss_beacon::error::{ConnHandle, RadioError};

pub const RADIO_COMMAND_QUEUE_LEN: usize = 8;

/// NMEA text carried by the characteristic, variable length
#[derive(Clone, Copy)]
pub struct NmeaFrame {
    len: usize,
    bytes: [u8; MAX_FRAME_LEN],
}

impl Default for NmeaFrame {
    fn default() -> Self {
        Self {
            len: 0,
            bytes: [0u8; MAX_FRAME_LEN],
        }
    }
}

impl AsGatt for NmeaFrame {
    const MIN_SIZE: usize = 0;
    const MAX_SIZE: usize = MAX_FRAME_LEN;

    fn as_gatt(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl FromGatt for NmeaFrame {
    fn from_gatt(data: &[u8]) -> Result<Self, FromGattError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(FromGattError::InvalidLength);
        }
        let mut frame = Self::default();
        frame.bytes[..data.len()].copy_from_slice(data);
        frame.len = data.len();
        Ok(frame)
    }
}

/// Location and Navigation service
#[gatt_service(uuid = "1819")]
pub struct LocationService {
    /// CRLF-joined RMC and GGA sentences
    #[characteristic(uuid = "2a8e", read, notify, indicate)]
    pub nmea: NmeaFrame,
}

#[gatt_server]
pub struct BeaconServer {
    pub location: LocationService,
}

pub enum RadioCommand {
    Enable(bool),
    Pairing(PairingConfig),
    Advertise {
        payload: AdvPayload,
        window: Duration,
    },
    Notify(ConnHandle),
    Disconnect(ConnHandle),
}

pub type RadioCommands = Channel<CriticalSectionRawMutex, RadioCommand, RADIO_COMMAND_QUEUE_LEN>;

/// Main-loop handle on the BLE stack
pub struct BleRadio {
    server: &'static BeaconServer<'static>,
    commands: &'static RadioCommands,
    enabled: bool,
}

impl BleRadio {
    pub fn new(server: &'static BeaconServer<'static>, commands: &'static RadioCommands) -> Self {
        Self {
            server,
            commands,
            enabled: false,
        }
    }

    fn send(&self, command: RadioCommand) -> Result<(), RadioError> {
        self.commands
            .try_send(command)
            .map_err(|_| RadioError::QueueFull)
    }
}

impl Radio for BleRadio {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.send(RadioCommand::Enable(enabled))?;
        self.enabled = enabled;
        Ok(())
    }

    fn register(&mut self, service: &GattService) -> Result<AttrHandle, RadioError> {
        // The attribute table is static; registration only hands out the handle
        if *service != LOCATION_SERVICE {
            return Err(RadioError::Registration);
        }
        info!(
            "service {:04x} characteristic {:04x}",
            service.service_uuid, service.characteristic_uuid
        );
        Ok(self.server.location.nmea.handle)
    }

    fn configure_pairing(&mut self, pairing: &PairingConfig) -> Result<(), RadioError> {
        // IO capability is fixed on the stack in main; LE secure connections
        // are the only pairing method trouble-host offers.
        if pairing.io_capability != IoCapability::DisplayOnly || !pairing.le_secure {
            return Err(RadioError::Pairing);
        }
        self.send(RadioCommand::Pairing(*pairing))
    }

    fn advertise(&mut self, params: &AdvertisingParams, payload: &[u8]) -> Result<(), RadioError> {
        if !self.enabled {
            return Err(RadioError::NotPowered);
        }
        let payload = AdvPayload::from_slice(payload).map_err(|_| RadioError::Advertising)?;
        self.send(RadioCommand::Advertise {
            payload,
            window: params.duration,
        })
    }

    fn write(&mut self, attr: AttrHandle, value: &[u8]) -> Result<(), RadioError> {
        let nmea = &self.server.location.nmea;
        if attr != nmea.handle {
            return Err(RadioError::Write);
        }
        let frame = NmeaFrame::from_gatt(value).map_err(|_| RadioError::Write)?;
        nmea.set(self.server, &frame).map_err(|_| RadioError::Write)
    }

    fn notify(&mut self, conn: ConnHandle, _attr: AttrHandle) -> Result<(), RadioError> {
        if !self.enabled {
            return Err(RadioError::NotPowered);
        }
        self.send(RadioCommand::Notify(conn))
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), RadioError> {
        self.send(RadioCommand::Disconnect(conn))
    }
}

fn post(events: &RadioEvents, event: RadioEvent) {
    if events.try_send(event).is_err() {
        warn!("radio event queue full, dropped {:?}", event);
    }
}

struct Link {
    enabled: bool,
    pending: Option<(AdvPayload, Duration)>,
    pairing: Option<PairingConfig>,
}

impl Link {
    fn requires_mitm(&self) -> bool {
        self.pairing.is_some_and(|p| p.mitm)
    }

    fn apply(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::Enable(on) => {
                self.enabled = on;
                if !on {
                    self.pending = None;
                }
            }
            RadioCommand::Pairing(pairing) => {
                info!(
                    "pairing: mitm={} bonding={} passkey shown by the stack",
                    pairing.mitm, pairing.bonding
                );
                self.pairing = Some(pairing);
            }
            RadioCommand::Advertise { payload, window } => self.pending = Some((payload, window)),
            RadioCommand::Notify(conn) | RadioCommand::Disconnect(conn) => {
                warn!("no link for connection {}", conn);
            }
        }
    }
}

/// BLE peripheral loop: advertise when asked, serve one central at a time
pub async fn run<C: Controller>(
    peripheral: &mut Peripheral<'_, C, DefaultPacketPool>,
    server: &'static BeaconServer<'static>,
    commands: &'static RadioCommands,
    events: &'static RadioEvents,
) -> ! {
    let mut link = Link {
        enabled: false,
        pending: None,
        pairing: None,
    };

    loop {
        let (payload, window) = match (link.enabled, link.pending.take()) {
            (true, Some(adv)) => adv,
            (_, keep) => {
                link.pending = keep;
                link.apply(commands.receive().await);
                continue;
            }
        };

        let params = AdvertisementParameters {
            timeout: Some(window),
            ..Default::default()
        };
        let advertiser = match peripheral
            .advertise(
                &params,
                Advertisement::ConnectableScannableUndirected {
                    adv_data: &payload,
                    scan_data: &[],
                },
            )
            .await
        {
            Ok(advertiser) => advertiser,
            Err(e) => {
                warn!("advertising failed: {:?}", e);
                link.pending = Some((payload, window));
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };

        let conn = match select(advertiser.accept(), commands.receive()).await {
            Either::First(Ok(conn)) => conn,
            Either::First(Err(_)) => {
                // Window closed without a central; stay discoverable
                link.pending = Some((payload, window));
                continue;
            }
            Either::Second(command) => {
                link.pending = Some((payload, window));
                link.apply(command);
                continue;
            }
        };

        let conn = match conn.with_attribute_server(server) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("GATT connection failed: {:?}", e);
                link.pending = Some((payload, window));
                continue;
            }
        };

        let handle = conn.raw().handle().raw();
        if let Some(pairing) = link.pairing {
            if let Err(e) = conn.raw().set_bondable(pairing.bonding) {
                warn!("bondable on {} failed: {:?}", handle, e);
            }
            if pairing.mitm {
                if let Err(e) = conn.raw().request_security() {
                    warn!("security request on {} failed: {:?}", handle, e);
                }
            }
        }
        let mut authenticated = !link.requires_mitm();
        post(events, RadioEvent::Connected(handle));

        loop {
            match select(conn.next(), commands.receive()).await {
                Either::First(GattConnectionEvent::Disconnected { reason }) => {
                    info!("central {} disconnected: {:?}", handle, reason);
                    post(events, RadioEvent::Disconnected(handle));
                    break;
                }
                Either::First(GattConnectionEvent::PassKeyDisplay(key)) => {
                    info!("passkey for {}: {:?}", handle, key);
                }
                Either::First(GattConnectionEvent::PairingComplete { security_level, .. }) => {
                    info!("central {} paired: {:?}", handle, security_level);
                    authenticated = authenticated
                        || security_level == SecurityLevel::EncryptedAuthenticated;
                }
                Either::First(GattConnectionEvent::PairingFailed(e)) => {
                    warn!("pairing with {} failed: {:?}", handle, e);
                    conn.raw().disconnect();
                }
                Either::First(GattConnectionEvent::Gatt { event }) => {
                    let reply = if authenticated {
                        if matches!(event, GattEvent::Read(_)) {
                            post(events, RadioEvent::ReadRequest(handle));
                        }
                        event.accept()
                    } else {
                        event.reject(AttErrorCode::INSUFFICIENT_AUTHENTICATION)
                    };
                    match reply {
                        Ok(reply) => reply.send().await,
                        Err(e) => warn!("GATT reply failed: {:?}", e),
                    }
                }
                Either::First(_) => {}
                Either::Second(RadioCommand::Notify(conn_handle)) if conn_handle == handle => {
                    if !authenticated {
                        continue;
                    }
                    let Ok(frame) = server.location.nmea.get(server) else {
                        continue;
                    };
                    if server.location.nmea.notify(&conn, &frame).await.is_err() {
                        warn!("notify {} failed", handle);
                        conn.raw().disconnect();
                        post(events, RadioEvent::Disconnected(handle));
                        break;
                    }
                }
                Either::Second(RadioCommand::Disconnect(conn_handle)) if conn_handle == handle => {
                    conn.raw().disconnect();
                }
                Either::Second(command) => {
                    link.apply(command);
                    if !link.enabled {
                        conn.raw().disconnect();
                    }
                }
            }
        }
    }
}
