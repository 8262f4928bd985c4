//! Error types
//!
//! Every fallible operation in the crate returns [`Result`]. Faults are
//! recoverable by construction; the runtime decides what to do with them
//! (see `Runtime::handle_fault`).

use core::fmt;

/// Result type for runtime operations
pub type Result<T> = core::result::Result<T, Error>;

/// Radio connection handle as reported by the BLE stack
pub type ConnHandle = u16;

/// Runtime-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Serial (GNSS UART) problem
    Serial(SerialError),
    /// BLE stack or controller problem
    Radio(RadioError),
    /// A collaborator failed to change power state
    Peripheral(Peripheral),
    /// Settings value missing or of the wrong type
    Settings,
    /// Boot record could not be encoded into retained memory
    Encoding,
}

/// Serial source errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialError {
    /// UART not initialized or powered down
    Unavailable,
    /// Receive FIFO overflowed
    Overrun,
    /// Framing or parity error on the line
    Framing,
}

/// BLE errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Operation requires the controller to be powered
    NotPowered,
    /// Controller refused to power up or down
    Power,
    /// GATT service registration failed
    Registration,
    /// Security manager rejected the pairing parameters
    Pairing,
    /// Advertising could not be started
    Advertising,
    /// Characteristic value write failed
    Write,
    /// Notification to the given connection failed
    Notify(ConnHandle),
    /// Command or event queue towards the stack is full
    QueueFull,
}

/// Collaborators whose power state the controller drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Peripheral {
    Display,
    Gnss,
    Radio,
    WakeSource,
}

impl Error {
    /// Faults that the top level answers with a radio restart
    pub fn is_radio(&self) -> bool {
        matches!(self, Error::Radio(_) | Error::Peripheral(Peripheral::Radio))
    }
}

impl From<SerialError> for Error {
    fn from(e: SerialError) -> Self {
        Error::Serial(e)
    }
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Error::Radio(e)
    }
}

impl From<Peripheral> for Error {
    fn from(p: Peripheral) -> Self {
        Error::Peripheral(p)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Serial(e) => write!(f, "serial: {:?}", e),
            Error::Radio(e) => write!(f, "radio: {:?}", e),
            Error::Peripheral(p) => write!(f, "peripheral {:?} failed", p),
            Error::Settings => write!(f, "invalid setting"),
            Error::Encoding => write!(f, "boot record encoding failed"),
        }
    }
}
