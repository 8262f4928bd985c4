//! Fix snapshot shared by the parser and the notifier
//!
//! Pure data. The parser writes it, the notifier reads the raw sentence cache
//! out of it, the runtime folds pulse timing into it.

use heapless::{Deque, String, Vec};

use crate::pps::PulseTiming;

/// Longest sentence we keep. NMEA caps sentences at 82 characters including
/// CR LF; some receivers run a little over on proprietary sentences.
pub const MAX_SENTENCE_LEN: usize = 96;

/// Capacity of the FIFO holding sentences without a dedicated cache slot
pub const OTHER_CAPACITY: usize = 10;

/// Satellites kept from a single satellite-detail sentence
pub const MAX_SATELLITES: usize = 16;

pub type SentenceText = String<MAX_SENTENCE_LEN>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FixStatus {
    #[default]
    NoFix,
    /// Receiver reports a fix but a coordinate failed to decode
    Partial,
    Valid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SatelliteInfo {
    pub id: u16,
    pub elevation: Option<i16>,
    pub azimuth: Option<u16>,
    pub snr: Option<u8>,
}

/// Sentence types with a dedicated slot in the raw cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CachedKey {
    Gprmc,
    Gnrmc,
    Gpgga,
    Gngga,
}

impl CachedKey {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "GPRMC" => Some(CachedKey::Gprmc),
            "GNRMC" => Some(CachedKey::Gnrmc),
            "GPGGA" => Some(CachedKey::Gpgga),
            "GNGGA" => Some(CachedKey::Gngga),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CachedKey::Gprmc => "GPRMC",
            CachedKey::Gnrmc => "GNRMC",
            CachedKey::Gpgga => "GPGGA",
            CachedKey::Gngga => "GNGGA",
        }
    }
}

/// Latest raw text per cached key, plus a bounded FIFO for everything else
#[derive(Debug, Clone)]
pub struct RawSentenceCache {
    gprmc: Option<SentenceText>,
    gnrmc: Option<SentenceText>,
    gpgga: Option<SentenceText>,
    gngga: Option<SentenceText>,
    other: Deque<SentenceText, OTHER_CAPACITY>,
}

impl RawSentenceCache {
    pub const fn new() -> Self {
        Self {
            gprmc: None,
            gnrmc: None,
            gpgga: None,
            gngga: None,
            other: Deque::new(),
        }
    }

    pub fn get(&self, key: CachedKey) -> Option<&str> {
        self.slot(key).as_ref().map(|s| s.as_str())
    }

    /// Store `text` under its 5-character type code.
    ///
    /// Codes without a slot go to the FIFO, evicting the oldest entry once it
    /// holds `OTHER_CAPACITY` sentences. Text longer than `MAX_SENTENCE_LEN`
    /// is ignored.
    pub fn store(&mut self, code: &str, text: &str) {
        let Ok(text) = SentenceText::try_from(text) else {
            return;
        };

        match CachedKey::from_code(code) {
            Some(key) => *self.slot_mut(key) = Some(text),
            None => {
                if self.other.is_full() {
                    self.other.pop_front();
                }
                // Cannot fail: a slot was just freed
                let _ = self.other.push_back(text);
            }
        }
    }

    /// Latest positioning sentence, multi-constellation variant first
    pub fn positioning(&self) -> Option<&str> {
        self.get(CachedKey::Gnrmc).or_else(|| self.get(CachedKey::Gprmc))
    }

    /// Latest altitude sentence, multi-constellation variant first
    pub fn altitude(&self) -> Option<&str> {
        self.get(CachedKey::Gngga).or_else(|| self.get(CachedKey::Gpgga))
    }

    /// Uncached sentences, oldest first
    pub fn other(&self) -> impl Iterator<Item = &str> {
        self.other.iter().map(|s| s.as_str())
    }

    pub fn other_len(&self) -> usize {
        self.other.len()
    }

    fn slot(&self, key: CachedKey) -> &Option<SentenceText> {
        match key {
            CachedKey::Gprmc => &self.gprmc,
            CachedKey::Gnrmc => &self.gnrmc,
            CachedKey::Gpgga => &self.gpgga,
            CachedKey::Gngga => &self.gngga,
        }
    }

    fn slot_mut(&mut self, key: CachedKey) -> &mut Option<SentenceText> {
        match key {
            CachedKey::Gprmc => &mut self.gprmc,
            CachedKey::Gnrmc => &mut self.gnrmc,
            CachedKey::Gpgga => &mut self.gpgga,
            CachedKey::Gngga => &mut self.gngga,
        }
    }
}

impl Default for RawSentenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for RawSentenceCache {
    fn eq(&self, other: &Self) -> bool {
        self.gprmc == other.gprmc
            && self.gnrmc == other.gnrmc
            && self.gpgga == other.gpgga
            && self.gngga == other.gngga
            && self.other().eq(other.other())
    }
}

/// Latest decoded receiver state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixSnapshot {
    pub fix_status: FixStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_m: Option<f32>,
    pub hdop: Option<f32>,
    pub satellite_count: Option<u8>,
    pub speed_knots: Option<f32>,
    pub course_deg: Option<f32>,
    /// `hh:mm:ss`
    pub utc_time: Option<String<8>>,
    /// `20YY-MM-DD`
    pub utc_date: Option<String<10>>,
    pub satellites_in_view: Option<u8>,
    pub satellites: Vec<SatelliteInfo, MAX_SATELLITES>,
    pub raw: RawSentenceCache,
    pub pulse: PulseTiming,
}

impl FixSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fix(&self) -> bool {
        self.fix_status == FixStatus::Valid
    }
}
