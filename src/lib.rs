#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// Must come first so the log_* macros are visible to every module below
#[macro_use]
mod logging;

pub mod ble;
pub mod boot;
pub mod config;
pub mod error;
pub mod gps;
pub mod power;
pub mod pps;
pub mod runtime;
pub mod state;
