use core::sync::atomic::{AtomicU8, Ordering};

use defmt::warn;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::{Pipe, TryReadError};
use embedded_io_async::Read;
use esp_hal::uart::{RxError, UartRx};
use esp_hal::Async;

use gnss_beacon::error::SerialError;
use gnss_beacon::gps::SerialSource;

/// Bytes buffered between the UART and the main loop. About two seconds of
/// receiver output at 9600 baud.
pub const GNSS_PIPE_LEN: usize = 2048;

const NO_FAULT: u8 = 0;
const OVERRUN: u8 = 1;
const FRAMING: u8 = 2;

/// UART bytes plus the last loss the pump saw, cleared when reported
pub struct GnssLink {
    pipe: Pipe<CriticalSectionRawMutex, GNSS_PIPE_LEN>,
    fault: AtomicU8,
}

impl GnssLink {
    pub const fn new() -> Self {
        Self {
            pipe: Pipe::new(),
            fault: AtomicU8::new(NO_FAULT),
        }
    }

    fn flag(&self, fault: SerialError) {
        let code = match fault {
            SerialError::Framing => FRAMING,
            _ => OVERRUN,
        };
        self.fault.store(code, Ordering::Release);
    }

    fn take_fault(&self) -> Option<SerialError> {
        match self.fault.swap(NO_FAULT, Ordering::Acquire) {
            OVERRUN => Some(SerialError::Overrun),
            FRAMING => Some(SerialError::Framing),
            _ => None,
        }
    }
}

/// Copies UART bytes into the pipe. When the main loop falls behind, stale
/// bytes are thrown away in favour of fresh ones and the loss is flagged.
pub async fn pump(mut rx: UartRx<'static, Async>, link: &'static GnssLink) -> ! {
    let mut chunk = [0u8; 64];

    loop {
        let n = match Read::read(&mut rx, &mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                warn!("GNSS UART error: {:?}", e);
                link.flag(match e {
                    RxError::FifoOverflowed => SerialError::Overrun,
                    _ => SerialError::Framing,
                });
                continue;
            }
        };

        let mut pending = &chunk[..n];
        while !pending.is_empty() {
            match link.pipe.try_write(pending) {
                Ok(written) => pending = &pending[written..],
                Err(_) => {
                    link.flag(SerialError::Overrun);
                    link.pipe.clear();
                }
            }
        }
    }
}

/// Main-loop side of the link
pub struct PipeSerial {
    link: &'static GnssLink,
}

impl PipeSerial {
    pub fn new(link: &'static GnssLink) -> Self {
        Self { link }
    }
}

impl SerialSource for PipeSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        if let Some(fault) = self.link.take_fault() {
            return Err(fault);
        }
        match self.link.pipe.try_read(buf) {
            Ok(n) => Ok(n),
            Err(TryReadError::Empty) => Ok(0),
        }
    }
}
