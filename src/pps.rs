//! Pulse-per-second capture
//!
//! The GNSS module raises its PPS line once per second. The GPIO interrupt
//! calls [`PulseCapture::on_rising_edge`] with the current monotonic time;
//! the main loop copies [`PulseCapture::latest`] into the fix snapshot.

use core::cell::Cell;

use critical_section::Mutex;
use embassy_time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PulseTiming {
    /// Monotonic timestamp of the latest pulse, microseconds
    pub last_pulse_us: Option<u64>,
    /// Signed distance between the latest two pulses, microseconds
    pub interval_us: Option<i64>,
}

impl PulseTiming {
    pub fn record(&mut self, now_us: u64) {
        if let Some(previous) = self.last_pulse_us {
            self.interval_us = Some(now_us as i64 - previous as i64);
        }
        self.last_pulse_us = Some(now_us);
    }
}

/// Pulse timing cell shared between the PPS interrupt and the main loop
pub struct PulseCapture {
    timing: Mutex<Cell<PulseTiming>>,
}

impl PulseCapture {
    pub const fn new() -> Self {
        Self {
            timing: Mutex::new(Cell::new(PulseTiming {
                last_pulse_us: None,
                interval_us: None,
            })),
        }
    }

    /// Interrupt entry point. Allocation free and constant time.
    pub fn on_rising_edge(&self, now: Instant) {
        critical_section::with(|cs| {
            let cell = self.timing.borrow(cs);
            let mut timing = cell.get();
            timing.record(now.as_micros());
            cell.set(timing);
        });
    }

    pub fn latest(&self) -> PulseTiming {
        critical_section::with(|cs| self.timing.borrow(cs).get())
    }
}

impl Default for PulseCapture {
    fn default() -> Self {
        Self::new()
    }
}
