#![deny(unsafe_code)]
#![no_main]
#![no_std]

use core::cell::RefCell;
use core::ptr::addr_of_mut;

use bt_hci::controller::ExternalController;
use critical_section::Mutex;
use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_futures::join::join4;
use embassy_futures::select::{select, Either};
use embassy_time::{Instant, Timer};
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock,
    gpio::{
        Event, Input, InputConfig, Io, Level, Output, OutputConfig, Pull, RtcPinWithResistors,
    },
    handler,
    interrupt::software::SoftwareInterruptControl,
    rng::{Trng, TrngSource},
    rtc_cntl::{
        sleep::{RtcioWakeupSource, WakeupLevel},
        Rtc,
    },
    timer::timg::TimerGroup,
    uart::{Config as UartConfig, Uart},
};
use esp_println as _;
use esp_radio::ble::controller::BleConnector;
use static_cell::StaticCell;
use trouble_host::prelude::*;

use gnss_beacon::ble::DeviceName;
use gnss_beacon::boot::{BootRecord, BOOT_RECORD_LEN};
use gnss_beacon::config::{MemorySettings, RadioConfig};
use gnss_beacon::power::Step;
use gnss_beacon::runtime::{Runtime, Shared};

mod board;
mod pins;
mod radio;
mod serial;

use board::EspBoard;
use radio::{BeaconServer, BleRadio, RadioCommands};
use serial::{GnssLink, PipeSerial};

extern crate alloc;

const CONNECTIONS_MAX: usize = 1;
const L2CAP_CHANNELS_MAX: usize = 2;

esp_bootloader_esp_idf::esp_app_desc!();

static SHARED: Shared = Shared::new();
static GNSS_LINK: GnssLink = GnssLink::new();
static RADIO_COMMANDS: RadioCommands = RadioCommands::new();

/// PPS input, parked here so the GPIO handler can acknowledge the edge
static PPS: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

#[allow(unsafe_code)]
#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut BOOT_RECORD: [u8; BOOT_RECORD_LEN] = [0; BOOT_RECORD_LEN];

/// Bump the boot counter held in RTC memory
#[allow(unsafe_code)]
fn next_boot_record() -> BootRecord {
    // Only touched here, once, before any other task runs
    let retained = unsafe { &mut *addr_of_mut!(BOOT_RECORD) };
    let record = BootRecord::load(retained).next();
    if let Err(e) = record.store(retained) {
        error!("boot record not saved: {:?}", e);
    }
    record
}

#[handler]
fn gpio_handler() {
    let now = Instant::now();
    critical_section::with(|cs| {
        if let Some(pps) = PPS.borrow_ref_mut(cs).as_mut() {
            if pps.is_interrupt_set() {
                pps.clear_interrupt();
                SHARED.pulse.on_rising_edge(now);
            }
        }
    });
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    let pins = pins::get_beacon_pins_v001(peripherals);

    let timg0 = TimerGroup::new(pins.timg);
    let sw_interrupt = SoftwareInterruptControl::new(pins.sw_interrupt);
    esp_rtos::start(timg0.timer0, sw_interrupt.software_interrupt0);

    info!("Initializing");

    let boot = next_boot_record();
    let settings = match MemorySettings::with_defaults() {
        Ok(settings) => settings,
        Err(e) => defmt::panic!("default settings rejected: {:?}", e),
    };

    // Setup UART for GNSS
    let uart_config = UartConfig::default().with_baudrate(9600);
    let uart = match Uart::new(pins.uart, uart_config) {
        Ok(uart) => uart
            .with_rx(pins.gnss_rx)
            .with_tx(pins.gnss_tx)
            .into_async(),
        Err(e) => defmt::panic!("GNSS UART config rejected: {:?}", e),
    };
    let (gnss_rx, _gnss_tx) = uart.split();

    // PPS edge interrupt
    let mut io = Io::new(pins.io_mux);
    io.set_interrupt_handler(gpio_handler);
    let mut pps = Input::new(pins.gnss_pps, InputConfig::default().with_pull(Pull::Down));
    critical_section::with(|cs| {
        pps.listen(Event::RisingEdge);
        PPS.borrow_ref_mut(cs).replace(pps);
    });

    // Supply rails start on; the runtime takes over from here
    let display = Output::new(pins.display_enable, Level::High, OutputConfig::default());
    let gnss = Output::new(pins.gnss_enable, Level::High, OutputConfig::default());
    let board = EspBoard::new(display, gnss);

    // Setup BLE
    let radio_init = match esp_radio::init() {
        Ok(init) => init,
        Err(e) => defmt::panic!("BLE controller init failed: {:?}", e),
    };
    let transport = match BleConnector::new(&radio_init, pins.bt, Default::default()) {
        Ok(transport) => transport,
        Err(e) => defmt::panic!("BLE connector failed: {:?}", e),
    };
    let controller = ExternalController::<_, 20>::new(transport);

    static HOST_RESOURCES: StaticCell<
        HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX>,
    > = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    // Pairing keys need a cryptographic seed
    let _trng_source = TrngSource::new(pins.rng, pins.adc);
    let mut trng = match Trng::try_new() {
        Ok(trng) => trng,
        Err(e) => defmt::panic!("TRNG unavailable: {:?}", e),
    };

    let stack = trouble_host::new(controller, resources).set_random_generator_seed(&mut trng);
    stack.set_io_capabilities(IoCapabilities::DisplayOnly);
    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    static DEVICE_NAME: StaticCell<DeviceName> = StaticCell::new();
    let device_name: &'static DeviceName =
        DEVICE_NAME.init(RadioConfig::from_store(&settings).device_name);
    let name = device_name.as_str();

    static SERVER: StaticCell<BeaconServer> = StaticCell::new();
    let server: &'static BeaconServer = SERVER.init(
        match BeaconServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
            name,
            appearance: &appearance::outdoor_sports_activity::LOCATION_AND_NAVIGATION_DISPLAY_DEVICE,
        })) {
            Ok(server) => server,
            Err(e) => defmt::panic!("GATT server failed: {:?}", e),
        },
    );

    info!("Initializing complete");

    let mut runtime = Runtime::new(
        PipeSerial::new(&GNSS_LINK),
        BleRadio::new(server, &RADIO_COMMANDS),
        board,
        &settings,
        boot,
        &SHARED,
        Instant::now(),
    );
    runtime.start(Instant::now());

    let runner_task = async {
        if let Err(e) = runner.run().await {
            error!("BLE host stopped: {:?}", e);
        }
    };

    let mut button_pin = pins.button;
    let lpwr = pins.lpwr;

    let main_loop = async move {
        let mut button = Input::new(
            button_pin.reborrow(),
            InputConfig::default().with_pull(Pull::Up),
        );

        loop {
            if runtime.poll(Instant::now()) == Step::Suspend {
                break;
            }

            // Light sleep stalls the BLE controller; both shares idle in WFI
            let plan = runtime.wait_plan();
            let wait = async {
                Timer::after(plan.responsive).await;
                Timer::after(plan.low_power).await;
            };
            if let Either::Second(_) = select(wait, button.wait_for_falling_edge()).await {
                runtime.user_interaction(Instant::now());
            }
        }

        drop(button);
        if !runtime.board().wake_armed() {
            warn!("sleeping without an armed wake source");
        }
        info!("Deep sleep until button press");
        let mut rtc = Rtc::new(lpwr);
        let mut wake_pins: [(&mut dyn RtcPinWithResistors, WakeupLevel); 1] =
            [(&mut button_pin, WakeupLevel::Low)];
        let wake = RtcioWakeupSource::new(&mut wake_pins);
        rtc.sleep_deep(&[&wake]);
    };

    join4(
        runner_task,
        radio::run(&mut peripheral, server, &RADIO_COMMANDS, &SHARED.events),
        serial::pump(gnss_rx, &GNSS_LINK),
        main_loop,
    )
    .await;

    #[allow(clippy::empty_loop)]
    loop {}
}
