use defmt::info;
use esp_hal::gpio::{Level, Output};

use gnss_beacon::error::Result;
use gnss_beacon::power::Board;

/// Load switches on the display and GNSS supply rails
pub struct EspBoard {
    display: Output<'static>,
    gnss: Output<'static>,
    wake_armed: bool,
}

impl EspBoard {
    pub fn new(display: Output<'static>, gnss: Output<'static>) -> Self {
        Self {
            display,
            gnss,
            wake_armed: false,
        }
    }

    pub fn wake_armed(&self) -> bool {
        self.wake_armed
    }
}

fn level(on: bool) -> Level {
    if on {
        Level::High
    } else {
        Level::Low
    }
}

impl Board for EspBoard {
    fn set_display_power(&mut self, on: bool) -> Result<()> {
        self.display.set_level(level(on));
        Ok(())
    }

    fn set_gnss_power(&mut self, on: bool) -> Result<()> {
        self.gnss.set_level(level(on));
        Ok(())
    }

    fn arm_wake_source(&mut self) -> Result<()> {
        // The RTC wake source is configured by the sleep call itself
        info!("wake on button armed");
        self.wake_armed = true;
        Ok(())
    }
}
