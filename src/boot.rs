//! Boot record kept in retained memory across deep sleep
//!
//! Deep sleep ends the runtime instance; the next start reads this record to
//! learn how many times the device has booted.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bytes reserved in retained memory
pub const BOOT_RECORD_LEN: usize = 16;

const BOOT_MAGIC: u32 = 0x4742_4E31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootRecord {
    magic: u32,
    pub boot_count: u32,
}

impl Default for BootRecord {
    fn default() -> Self {
        Self {
            magic: BOOT_MAGIC,
            boot_count: 0,
        }
    }
}

impl BootRecord {
    /// Decode a record, or start a fresh one if memory holds anything else
    pub fn load(bytes: &[u8]) -> Self {
        match postcard::from_bytes::<BootRecord>(bytes) {
            Ok(record) if record.magic == BOOT_MAGIC => record,
            _ => {
                log_info!("no boot record in retained memory, starting fresh");
                Self::default()
            }
        }
    }

    pub fn next(self) -> Self {
        Self {
            boot_count: self.boot_count.wrapping_add(1),
            ..self
        }
    }

    /// Encode into `buf`, returning the number of bytes written
    pub fn store(&self, buf: &mut [u8]) -> Result<usize> {
        postcard::to_slice(self, buf)
            .map(|used| used.len())
            .map_err(|_| Error::Encoding)
    }
}
