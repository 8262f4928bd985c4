#![deny(unsafe_code)]

use esp_hal::{
    gpio::AnyPin,
    peripherals::{Peripherals, ADC1, BT, GPIO3, IO_MUX, LPWR, RNG, SW_INTERRUPT, TIMG0, UART1},
};

/// Everything the beacon board wires to the ESP32-C3
pub struct BeaconPins {
    pub gnss_rx: AnyPin<'static>,
    pub gnss_tx: AnyPin<'static>,
    pub gnss_pps: AnyPin<'static>,
    pub gnss_enable: AnyPin<'static>,

    pub display_enable: AnyPin<'static>,
    pub button: GPIO3<'static>,

    pub io_mux: IO_MUX<'static>,
    pub timg: TIMG0<'static>,
    pub sw_interrupt: SW_INTERRUPT<'static>,
    pub uart: UART1<'static>,
    pub bt: BT<'static>,
    pub rng: RNG<'static>,
    pub adc: ADC1<'static>,
    pub lpwr: LPWR<'static>,
}

pub fn get_beacon_pins_v001(p: Peripherals) -> BeaconPins {
    BeaconPins {
        gnss_rx: p.GPIO20.into(),
        gnss_tx: p.GPIO21.into(),
        gnss_pps: p.GPIO4.into(),
        gnss_enable: p.GPIO6.into(),

        display_enable: p.GPIO7.into(),
        // Deep-sleep wake needs an RTC-capable pin (GPIO0..=5 on the C3)
        button: p.GPIO3,

        io_mux: p.IO_MUX,
        timg: p.TIMG0,
        sw_interrupt: p.SW_INTERRUPT,
        uart: p.UART1,
        bt: p.BT,
        rng: p.RNG,
        adc: p.ADC1,
        lpwr: p.LPWR,
    }
}
