//! NMEA sentence ingestion
//!
//! The receiver streams RMC, GGA and GSV sentences (GP and GN talkers) at
//! 9600 baud. [`GpsReader`] assembles UART bytes into lines and hands each one
//! to [`SentenceParser::ingest`], which decodes it into the [`FixSnapshot`].
//!
//! Decoding is forgiving: a malformed field becomes "no value", a malformed
//! line is dropped, and neither ever surfaces as an error. A `*hh` checksum is
//! optional, but one that is present has to match.

use core::cmp::{max, min};

use embassy_time::Duration;
use heapless::{String, Vec};

use crate::error::{Result, SerialError};
use crate::state::{FixSnapshot, FixStatus, SatelliteInfo, MAX_SENTENCE_LEN};

/// Raw line buffer, large enough for a sentence plus stray bytes around it
pub const LINE_BUFFER_LEN: usize = 128;

/// Floor on the polling interval
pub const MIN_UPDATE_INTERVAL_MS: u32 = 100;

/// Upper bound on comma-separated fields looked at per sentence
const MAX_FIELDS: usize = 40;

const POSITIONING_MIN_FIELDS: usize = 7;
const ALTITUDE_MIN_FIELDS: usize = 10;
const SATELLITE_DETAIL_MIN_FIELDS: usize = 4;

/// Sentence classes the parser decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SentenceClass {
    /// RMC: fix validity, time, date, position, speed, course
    Positioning,
    /// GGA: altitude, satellites used, HDOP
    Altitude,
    /// GSV: satellites in view
    SatelliteDetail,
}

impl SentenceClass {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "GPRMC" | "GNRMC" => Some(SentenceClass::Positioning),
            "GPGGA" | "GNGGA" => Some(SentenceClass::Altitude),
            "GPGSV" | "GNGSV" => Some(SentenceClass::SatelliteDetail),
            _ => None,
        }
    }
}

/// What happened to one ingested line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ingest {
    /// Not an NMEA sentence; nothing changed
    Dropped,
    /// Cached, but too few fields to decode
    Rejected(SentenceClass),
    /// Cached and decoded
    Decoded(SentenceClass),
    /// Well-formed but not decoded; kept in the raw cache only
    Cached,
    /// Checksum present and wrong; nothing changed
    Corrupt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub decoded: u32,
    pub cached: u32,
    pub rejected: u32,
    pub dropped: u32,
    pub corrupt: u32,
}

#[derive(Debug, Default)]
pub struct SentenceParser {
    stats: ParserStats,
}

impl SentenceParser {
    pub const fn new() -> Self {
        Self {
            stats: ParserStats {
                decoded: 0,
                cached: 0,
                rejected: 0,
                dropped: 0,
                corrupt: 0,
            },
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Decode one raw line into `snapshot`.
    pub fn ingest(&mut self, snapshot: &mut FixSnapshot, raw: &[u8]) -> Ingest {
        let outcome = ingest_line(snapshot, raw);
        match outcome {
            Ingest::Decoded(_) => self.stats.decoded += 1,
            Ingest::Cached => self.stats.cached += 1,
            Ingest::Rejected(class) => {
                self.stats.rejected += 1;
                log_debug!("NMEA {:?} sentence too short, ignored", class);
            }
            Ingest::Dropped => self.stats.dropped += 1,
            Ingest::Corrupt => {
                self.stats.corrupt += 1;
                log_debug!("NMEA checksum mismatch, line dropped");
            }
        }
        outcome
    }
}

fn ingest_line(snapshot: &mut FixSnapshot, raw: &[u8]) -> Ingest {
    let mut ascii: Vec<u8, LINE_BUFFER_LEN> = Vec::new();
    for &b in raw.iter().filter(|b| b.is_ascii()) {
        if ascii.push(b).is_err() {
            return Ingest::Dropped;
        }
    }

    // Only ASCII bytes were kept
    let Ok(line) = core::str::from_utf8(&ascii) else {
        return Ingest::Dropped;
    };
    let line = line.trim();

    if line.len() > MAX_SENTENCE_LEN || !line.starts_with('$') {
        return Ingest::Dropped;
    }
    let Some(code) = line.get(1..6) else {
        return Ingest::Dropped;
    };
    if !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Ingest::Dropped;
    }

    if !checksum_matches(line) {
        return Ingest::Corrupt;
    }

    snapshot.raw.store(code, line);

    let Some(class) = SentenceClass::from_code(code) else {
        return Ingest::Cached;
    };

    let body = line.split('*').next().unwrap_or(line);
    let fields: Vec<&str, MAX_FIELDS> = body.split(',').take(MAX_FIELDS).collect();

    let decoded = match class {
        SentenceClass::Positioning => apply_positioning(snapshot, &fields),
        SentenceClass::Altitude => apply_altitude(snapshot, &fields),
        SentenceClass::SatelliteDetail => apply_satellite_detail(snapshot, &fields),
    };

    if decoded {
        Ingest::Decoded(class)
    } else {
        Ingest::Rejected(class)
    }
}

/// XOR of everything between `$` and `*` against the two hex digits after
/// `*`. A line without `*` passes.
fn checksum_matches(line: &str) -> bool {
    let Some((body, suffix)) = line.split_once('*') else {
        return true;
    };
    if suffix.len() != 2 {
        return false;
    }
    let Ok(expected) = u8::from_str_radix(suffix, 16) else {
        return false;
    };
    let actual = body.bytes().skip(1).fold(0u8, |acc, b| acc ^ b);
    actual == expected
}

/// RMC: `$xxRMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,x.x,x.x,ddmmyy,...`
fn apply_positioning(snapshot: &mut FixSnapshot, f: &[&str]) -> bool {
    if f.len() < POSITIONING_MIN_FIELDS {
        return false;
    }

    if f[2] != "A" {
        snapshot.fix_status = FixStatus::NoFix;
        return true;
    }

    if let Some(time) = parse_clock(f[1]) {
        snapshot.utc_time = Some(time);
    }
    if let Some(date) = f.get(9).and_then(|d| parse_date(d)) {
        snapshot.utc_date = Some(date);
    }

    let latitude = degrees_minutes(f[3]).map(|v| apply_hemisphere(v, f[4], "S"));
    let longitude = degrees_minutes(f[5]).map(|v| apply_hemisphere(v, f[6], "W"));

    if latitude.is_some() {
        snapshot.latitude = latitude;
    }
    if longitude.is_some() {
        snapshot.longitude = longitude;
    }
    snapshot.fix_status = if latitude.is_some() && longitude.is_some() {
        FixStatus::Valid
    } else {
        FixStatus::Partial
    };

    snapshot.speed_knots = f.get(7).and_then(|v| parse_f32(v));
    snapshot.course_deg = f.get(8).and_then(|v| parse_f32(v));

    true
}

/// GGA: `$xxGGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,q,nn,h.h,alt,M,...`
fn apply_altitude(snapshot: &mut FixSnapshot, f: &[&str]) -> bool {
    if f.len() < ALTITUDE_MIN_FIELDS {
        return false;
    }

    snapshot.satellite_count = parse_u8(f[7]);
    snapshot.hdop = parse_f32(f[8]);
    snapshot.altitude_m = parse_f32(f[9]);

    true
}

/// GSV: `$xxGSV,total,num,in_view,(id,elev,azim,snr){1..4}`
///
/// The satellite list only reflects the latest sentence; multi-sentence
/// groups are not merged.
fn apply_satellite_detail(snapshot: &mut FixSnapshot, f: &[&str]) -> bool {
    if f.len() < SATELLITE_DETAIL_MIN_FIELDS {
        return false;
    }

    snapshot.satellites_in_view = parse_u8(f[3]);
    snapshot.satellites.clear();

    for group in f[4..].chunks_exact(4) {
        let Some(id) = parse_int::<u16>(group[0]) else {
            continue;
        };
        let info = SatelliteInfo {
            id,
            elevation: parse_int(group[1]),
            azimuth: parse_int(group[2]),
            snr: parse_int(group[3]),
        };
        if snapshot.satellites.push(info).is_err() {
            break;
        }
    }

    true
}

/// Convert NMEA `(d)ddmm.mmmm` into decimal degrees.
///
/// Degrees are every integer digit except the last two; minutes are the last
/// two integer digits plus the fraction. Anything else yields `None`.
pub fn degrees_minutes(token: &str) -> Option<f64> {
    let token = token.trim();
    let (int_part, frac_part) = token.split_once('.')?;

    if int_part.len() < 3
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let split = int_part.len() - 2;
    let degrees: f64 = int_part[..split].parse().ok()?;
    let minutes: f64 = token[split..].parse().ok()?;

    Some(degrees + minutes / 60.0)
}

fn apply_hemisphere(value: f64, hemisphere: &str, negative: &str) -> f64 {
    if hemisphere.trim() == negative {
        -value
    } else {
        value
    }
}

fn leading_digits(s: &str, n: usize) -> Option<&str> {
    let digits = s.get(..n)?;
    digits.bytes().all(|b| b.is_ascii_digit()).then_some(digits)
}

/// `hhmmss[.ss]` to `hh:mm:ss`
fn parse_clock(s: &str) -> Option<String<8>> {
    let d = leading_digits(s.trim(), 6)?;
    let mut out = String::new();
    for part in [&d[0..2], ":", &d[2..4], ":", &d[4..6]] {
        out.push_str(part).ok()?;
    }
    Some(out)
}

/// `ddmmyy` to `20yy-mm-dd`
fn parse_date(s: &str) -> Option<String<10>> {
    let d = leading_digits(s.trim(), 6)?;
    let mut out = String::new();
    for part in ["20", &d[4..6], "-", &d[2..4], "-", &d[0..2]] {
        out.push_str(part).ok()?;
    }
    Some(out)
}

fn parse_f32(s: &str) -> Option<f32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

fn parse_u8(s: &str) -> Option<u8> {
    parse_int(s)
}

fn parse_int<T: core::str::FromStr>(s: &str) -> Option<T> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

/// How long the main loop sleeps between serial polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPlan {
    /// Executor stays responsive to interrupts and radio events
    pub responsive: Duration,
    /// Light-sleep share of the interval
    pub low_power: Duration,
}

impl WaitPlan {
    pub fn for_interval(interval_ms: u32) -> Self {
        let interval = max(interval_ms, MIN_UPDATE_INTERVAL_MS);
        Self {
            responsive: Duration::from_millis(u64::from(interval - MIN_UPDATE_INTERVAL_MS)),
            low_power: Duration::from_millis(u64::from(min(interval, MIN_UPDATE_INTERVAL_MS))),
        }
    }

    pub fn total(&self) -> Duration {
        self.responsive + self.low_power
    }
}

/// Splits a byte stream into `\n`-terminated lines.
///
/// A line longer than the buffer is discarded up to its terminator.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8, LINE_BUFFER_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Forget the partial line. Used when bytes were lost upstream.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = true;
    }

    pub fn feed<F: FnMut(&[u8])>(&mut self, bytes: &[u8], mut on_line: F) {
        for &b in bytes {
            if b == b'\n' {
                if !self.overflowed && !self.buffer.is_empty() {
                    on_line(&self.buffer);
                }
                self.buffer.clear();
                self.overflowed = false;
                continue;
            }

            if self.overflowed {
                continue;
            }
            if self.buffer.push(b).is_err() {
                self.buffer.clear();
                self.overflowed = true;
            }
        }
    }
}

/// Non-blocking byte source for the GNSS UART
pub trait SerialSource {
    /// Copy whatever is buffered into `buf` and return the count, 0 if idle.
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, SerialError>;
}

/// Chunks drained per poll. 4 KiB is several seconds of receiver output at
/// 9600 baud, so a poll normally ends on an empty source.
const MAX_CHUNKS_PER_POLL: usize = 64;

pub struct GpsReader<S> {
    source: S,
    lines: LineAssembler,
    parser: SentenceParser,
}

impl<S: SerialSource> GpsReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            lines: LineAssembler::new(),
            parser: SentenceParser::new(),
        }
    }

    /// Drain buffered bytes and ingest every complete line. Returns the
    /// number of lines handed to the parser.
    ///
    /// Lost bytes (overrun, framing) discard the line in progress so two
    /// sentence fragments are never joined; reading then carries on.
    pub fn poll(&mut self, snapshot: &mut FixSnapshot) -> Result<usize> {
        let mut chunk = [0u8; 64];
        let mut lines = 0;

        for _ in 0..MAX_CHUNKS_PER_POLL {
            let n = match self.source.read(&mut chunk) {
                Ok(n) => n,
                Err(e @ (SerialError::Overrun | SerialError::Framing)) => {
                    log_warn!("GNSS bytes lost: {:?}", e);
                    self.lines.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                break;
            }
            let parser = &mut self.parser;
            self.lines.feed(&chunk[..n], |line| {
                parser.ingest(snapshot, line);
                lines += 1;
            });
        }

        Ok(lines)
    }

    pub fn parser(&self) -> &SentenceParser {
        &self.parser
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CachedKey, OTHER_CAPACITY};

    const RMC: &[u8] = b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    const GGA: &[u8] = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
    const GSV: &[u8] =
        b"$GPGSV,2,1,08,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75\r\n";

    fn ingest(snapshot: &mut FixSnapshot, line: &[u8]) -> Ingest {
        SentenceParser::new().ingest(snapshot, line)
    }

    #[test]
    fn test_degrees_minutes() {
        let lat = degrees_minutes("4807.038").unwrap();
        assert!((lat - 48.1173).abs() < 1e-4);
        let lon = degrees_minutes("01131.000").unwrap();
        assert!((lon - 11.516_666).abs() < 1e-4);
    }

    #[test]
    fn test_degrees_minutes_rejects_malformed() {
        assert_eq!(degrees_minutes("7.5"), None);
        assert_eq!(degrees_minutes("07.5"), None);
        assert_eq!(degrees_minutes("4807"), None);
        assert_eq!(degrees_minutes("48a7.038"), None);
        assert_eq!(degrees_minutes("4807.03.8"), None);
        assert_eq!(degrees_minutes(""), None);
    }

    #[test]
    fn test_hemisphere_negates() {
        let mut snapshot = FixSnapshot::new();
        ingest(
            &mut snapshot,
            b"$GNRMC,010203,A,4807.038,S,01131.000,W,0.5,12.0,010124,,,A*53",
        );
        assert!((snapshot.latitude.unwrap() + 48.1173).abs() < 1e-4);
        assert!((snapshot.longitude.unwrap() + 11.516_666).abs() < 1e-4);
    }

    #[test]
    fn test_positioning_sentence() {
        let mut snapshot = FixSnapshot::new();
        assert_eq!(
            ingest(&mut snapshot, RMC),
            Ingest::Decoded(SentenceClass::Positioning)
        );
        assert_eq!(snapshot.fix_status, FixStatus::Valid);
        assert_eq!(snapshot.utc_time.as_deref(), Some("12:35:19"));
        assert_eq!(snapshot.utc_date.as_deref(), Some("2094-03-23"));
        assert_eq!(snapshot.speed_knots, Some(22.4));
        assert_eq!(snapshot.course_deg, Some(84.4));
        assert_eq!(
            snapshot.raw.get(CachedKey::Gprmc),
            Some(core::str::from_utf8(RMC).unwrap().trim())
        );
    }

    #[test]
    fn test_positioning_is_idempotent() {
        let mut snapshot = FixSnapshot::new();
        ingest(&mut snapshot, RMC);
        let first = snapshot.clone();
        ingest(&mut snapshot, RMC);
        assert_eq!(snapshot, first);
    }

    #[test]
    fn test_void_fix_only_updates_status() {
        let mut snapshot = FixSnapshot::new();
        ingest(&mut snapshot, RMC);
        ingest(
            &mut snapshot,
            b"$GPRMC,130000,V,4900.000,N,01200.000,E,1.0,1.0,240394,,*0E",
        );
        assert_eq!(snapshot.fix_status, FixStatus::NoFix);
        assert!((snapshot.latitude.unwrap() - 48.1173).abs() < 1e-4);
        assert_eq!(snapshot.utc_time.as_deref(), Some("12:35:19"));
    }

    #[test]
    fn test_bad_coordinate_is_partial() {
        let mut snapshot = FixSnapshot::new();
        ingest(&mut snapshot, RMC);
        ingest(
            &mut snapshot,
            b"$GPRMC,130000,A,48.07,N,01200.000,E,,,240394,,*2F",
        );
        assert_eq!(snapshot.fix_status, FixStatus::Partial);
        assert!((snapshot.latitude.unwrap() - 48.1173).abs() < 1e-4);
        assert!((snapshot.longitude.unwrap() - 12.0).abs() < 1e-9);
        assert_eq!(snapshot.speed_knots, None);
        assert_eq!(snapshot.course_deg, None);
    }

    #[test]
    fn test_short_positioning_sentence_leaves_fields() {
        let mut snapshot = FixSnapshot::new();
        ingest(&mut snapshot, RMC);
        let before = snapshot.clone();
        assert_eq!(
            ingest(&mut snapshot, b"$GNRMC,000000,V,0000.000"),
            Ingest::Rejected(SentenceClass::Positioning)
        );
        assert_eq!(snapshot.fix_status, before.fix_status);
        assert_eq!(snapshot.latitude, before.latitude);
        assert_eq!(snapshot.utc_time, before.utc_time);
    }

    #[test]
    fn test_altitude_sentence() {
        let mut snapshot = FixSnapshot::new();
        assert_eq!(
            ingest(&mut snapshot, GGA),
            Ingest::Decoded(SentenceClass::Altitude)
        );
        assert_eq!(snapshot.altitude_m, Some(545.4));
        assert_eq!(snapshot.satellite_count, Some(8));
        assert_eq!(snapshot.hdop, Some(0.9));
        assert_eq!(snapshot.latitude, None);
        assert_eq!(snapshot.fix_status, FixStatus::NoFix);
    }

    #[test]
    fn test_altitude_fields_are_independent() {
        let mut snapshot = FixSnapshot::new();
        ingest(&mut snapshot, b"$GNGGA,123519,,,,,1,,0.9,545.4,M,,M,,*7D");
        assert_eq!(snapshot.altitude_m, Some(545.4));
        assert_eq!(snapshot.hdop, Some(0.9));
        assert_eq!(snapshot.satellite_count, None);
    }

    #[test]
    fn test_short_altitude_sentence_leaves_fields() {
        let mut snapshot = FixSnapshot::new();
        ingest(&mut snapshot, GGA);
        assert_eq!(
            ingest(&mut snapshot, b"$GPGGA,123519,4807.038,N,01131.000,E,1,09,1.9"),
            Ingest::Rejected(SentenceClass::Altitude)
        );
        assert_eq!(snapshot.satellite_count, Some(8));
        assert_eq!(snapshot.altitude_m, Some(545.4));
    }

    #[test]
    fn test_classes_write_disjoint_fields() {
        let mut snapshot = FixSnapshot::new();
        ingest(&mut snapshot, RMC);
        let positioned = snapshot.clone();
        ingest(&mut snapshot, GGA);
        assert_eq!(snapshot.latitude, positioned.latitude);
        assert_eq!(snapshot.longitude, positioned.longitude);
        assert_eq!(snapshot.utc_time, positioned.utc_time);
        assert_eq!(snapshot.utc_date, positioned.utc_date);
        assert_eq!(snapshot.fix_status, positioned.fix_status);

        let altitude = (snapshot.altitude_m, snapshot.hdop, snapshot.satellite_count);
        ingest(&mut snapshot, RMC);
        assert_eq!(
            (snapshot.altitude_m, snapshot.hdop, snapshot.satellite_count),
            altitude
        );
    }

    #[test]
    fn test_satellite_detail_replaces_list() {
        let mut snapshot = FixSnapshot::new();
        assert_eq!(
            ingest(&mut snapshot, GSV),
            Ingest::Decoded(SentenceClass::SatelliteDetail)
        );
        assert_eq!(snapshot.satellites_in_view, Some(8));
        assert_eq!(snapshot.satellites.len(), 4);
        assert_eq!(
            snapshot.satellites[3],
            SatelliteInfo {
                id: 14,
                elevation: Some(22),
                azimuth: Some(228),
                snr: Some(45),
            }
        );

        ingest(&mut snapshot, b"$GPGSV,2,2,08,32,,,*70");
        assert_eq!(snapshot.satellites.len(), 1);
        assert_eq!(
            snapshot.satellites[0],
            SatelliteInfo {
                id: 32,
                elevation: None,
                azimuth: None,
                snr: None,
            }
        );
    }

    #[test]
    fn test_satellite_detail_skips_blank_and_bad_ids() {
        let mut snapshot = FixSnapshot::new();
        ingest(
            &mut snapshot,
            b"$GNGSV,1,1,03,,10,100,20,x7,11,110,21,09,zz,120,*10",
        );
        assert_eq!(snapshot.satellites.len(), 1);
        assert_eq!(snapshot.satellites[0].id, 9);
        assert_eq!(snapshot.satellites[0].elevation, None);
        assert_eq!(snapshot.satellites[0].azimuth, Some(120));
        assert_eq!(snapshot.satellites[0].snr, None);
    }

    #[test]
    fn test_non_sentences_are_dropped() {
        let mut snapshot = FixSnapshot::new();
        assert_eq!(ingest(&mut snapshot, b"INVALID DATA\r\n"), Ingest::Dropped);
        assert_eq!(ingest(&mut snapshot, b"$GP"), Ingest::Dropped);
        assert_eq!(ingest(&mut snapshot, b"$GP,RMC,1"), Ingest::Dropped);
        assert_eq!(ingest(&mut snapshot, b""), Ingest::Dropped);
        assert_eq!(snapshot, FixSnapshot::new());
    }

    #[test]
    fn test_non_ascii_bytes_are_ignored() {
        let mut snapshot = FixSnapshot::new();
        let mut line = std::vec::Vec::from(&b"\xff\xfe"[..]);
        line.extend_from_slice(GGA);
        assert_eq!(
            ingest(&mut snapshot, &line),
            Ingest::Decoded(SentenceClass::Altitude)
        );
        assert_eq!(snapshot.satellite_count, Some(8));
    }

    #[test]
    fn test_unrecognized_sentences_fill_fifo() {
        let mut snapshot = FixSnapshot::new();
        let mut parser = SentenceParser::new();
        for i in 0..15 {
            let line = std::format!("$GPTXT,01,01,02,msg {}", i);
            assert_eq!(parser.ingest(&mut snapshot, line.as_bytes()), Ingest::Cached);
        }
        assert_eq!(snapshot.raw.other_len(), OTHER_CAPACITY);
        let kept: std::vec::Vec<&str> = snapshot.raw.other().collect();
        assert_eq!(kept[0], "$GPTXT,01,01,02,msg 5");
        assert_eq!(kept[9], "$GPTXT,01,01,02,msg 14");
        assert_eq!(parser.stats().cached, 15);
        assert_eq!(parser.stats().decoded, 0);
    }

    #[test]
    fn test_wait_plan_enforces_floor() {
        let plan = WaitPlan::for_interval(20);
        assert_eq!(plan.responsive, Duration::from_millis(0));
        assert_eq!(plan.low_power, Duration::from_millis(100));

        let plan = WaitPlan::for_interval(30_000);
        assert_eq!(plan.responsive, Duration::from_millis(29_900));
        assert_eq!(plan.low_power, Duration::from_millis(100));
        assert_eq!(plan.total(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_line_assembler_splits_and_discards_overflow() {
        let mut assembler = LineAssembler::new();
        let mut lines: std::vec::Vec<std::vec::Vec<u8>> = std::vec::Vec::new();

        assembler.feed(b"$GPGGA,1\r\n$GPR", |l| lines.push(l.to_vec()));
        assembler.feed(b"MC,2\r\n", |l| lines.push(l.to_vec()));
        assert_eq!(lines, [b"$GPGGA,1\r".to_vec(), b"$GPRMC,2\r".to_vec()]);

        lines.clear();
        let long = [b'A'; LINE_BUFFER_LEN + 10];
        assembler.feed(&long, |l| lines.push(l.to_vec()));
        assembler.feed(b"\n$GNGGA\n", |l| lines.push(l.to_vec()));
        assert_eq!(lines, [b"$GNGGA".to_vec()]);
    }

    struct ScriptedSerial {
        chunks: std::vec::Vec<core::result::Result<std::vec::Vec<u8>, SerialError>>,
    }

    impl SerialSource for ScriptedSerial {
        fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, SerialError> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0)?;
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_reader_ingests_lines_across_chunks() {
        let mut data = RMC.to_vec();
        data.extend_from_slice(GGA);
        let chunks = data.chunks(50).map(|c| Ok(c.to_vec())).collect();
        let mut reader = GpsReader::new(ScriptedSerial { chunks });
        let mut snapshot = FixSnapshot::new();

        let mut total = 0;
        for _ in 0..4 {
            total += reader.poll(&mut snapshot).unwrap();
        }
        assert_eq!(total, 2);
        assert!(snapshot.has_fix());
        assert_eq!(snapshot.altitude_m, Some(545.4));
    }

    #[test]
    fn test_wrong_checksum_is_dropped() {
        let mut snapshot = FixSnapshot::new();
        let mut parser = SentenceParser::new();
        let line = b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6B";
        assert_eq!(parser.ingest(&mut snapshot, line), Ingest::Corrupt);
        assert_eq!(parser.ingest(&mut snapshot, b"$GPGGA,1,2*4"), Ingest::Corrupt);
        assert_eq!(snapshot, FixSnapshot::new());
        assert_eq!(parser.stats().corrupt, 2);
    }

    #[test]
    fn test_missing_checksum_is_accepted() {
        let mut snapshot = FixSnapshot::new();
        assert_eq!(
            ingest(
                &mut snapshot,
                b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W"
            ),
            Ingest::Decoded(SentenceClass::Positioning)
        );
        assert!(snapshot.has_fix());
    }

    #[test]
    fn test_joined_fragments_fail_checksum() {
        let chunks = std::vec![
            Ok(b"$GPRMC,123519,A,48".to_vec()),
            Ok(b"1.000,E,022.4,084.4,230394,003.1,W*6A\r\n".to_vec()),
        ];
        let mut reader = GpsReader::new(ScriptedSerial { chunks });
        let mut snapshot = FixSnapshot::new();

        assert_eq!(reader.poll(&mut snapshot), Ok(1));
        assert_eq!(reader.parser().stats().corrupt, 1);
        assert_eq!(snapshot, FixSnapshot::new());
    }

    #[test]
    fn test_lost_bytes_discard_partial_line() {
        let mut tail = b"07.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n".to_vec();
        tail.extend_from_slice(GGA);
        let chunks = std::vec![
            Ok(b"$GPRMC,123519,A,48".to_vec()),
            Err(SerialError::Overrun),
            Ok(tail),
            Ok(b"$GPRMC,1235".to_vec()),
            Err(SerialError::Framing),
            Ok(RMC.to_vec()),
        ];
        let mut reader = GpsReader::new(ScriptedSerial { chunks });
        let mut snapshot = FixSnapshot::new();

        // After each loss everything up to the next line end is skipped
        assert_eq!(reader.poll(&mut snapshot), Ok(1));
        assert_eq!(snapshot.latitude, None);
        assert_eq!(snapshot.altitude_m, Some(545.4));
        assert_eq!(reader.parser().stats().corrupt, 0);
    }

    #[test]
    fn test_reader_drains_whole_backlog() {
        let mut data = std::vec::Vec::new();
        for _ in 0..12 {
            data.extend_from_slice(GGA);
        }
        assert!(data.len() > 8 * 64);
        let chunks = data.chunks(64).map(|c| Ok(c.to_vec())).collect();
        let mut reader = GpsReader::new(ScriptedSerial { chunks });
        let mut snapshot = FixSnapshot::new();

        assert_eq!(reader.poll(&mut snapshot), Ok(12));
    }

    #[test]
    fn test_reader_reports_unavailable_source() {
        let mut reader = GpsReader::new(ScriptedSerial {
            chunks: std::vec![Err(SerialError::Unavailable)],
        });
        let mut snapshot = FixSnapshot::new();
        assert_eq!(
            reader.poll(&mut snapshot),
            Err(crate::error::Error::Serial(SerialError::Unavailable))
        );
        assert_eq!(snapshot, FixSnapshot::new());
    }
}
