//! Two-line element set parsing and validation
//!
//! Lines are the fixed 69-column NORAD format. Every field is range-checked and
//! both checksums are verified; nothing is clamped.

use crate::time::{add_seconds, julian_date_jan0, Epoch, SECONDS_PER_DAY};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LINE_LENGTH: usize = 69;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TleError {
    #[error("Malformed TLE field `{field}`: {reason}")]
    Malformed { field: &'static str, reason: String },
}

impl TleError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        TleError::Malformed {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            TleError::Malformed { field, .. } => field,
        }
    }
}

/// A satellite as submitted by a caller; the TLE lines are authoritative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Satellite {
    pub norad_id: u32,
    pub name: String,
    pub tle_line1: String,
    pub tle_line2: String,
}

impl Satellite {
    pub fn new(name: impl Into<String>, line1: impl Into<String>, line2: impl Into<String>) -> Self {
        let tle_line1 = line1.into();
        let norad_id = tle_line1
            .get(2..7)
            .and_then(|s| parse_catalog_number(s).ok())
            .unwrap_or_default();

        Self {
            norad_id,
            name: name.into(),
            tle_line1,
            tle_line2: line2.into(),
        }
    }

    /// Parse and validate this satellite's element set
    pub fn elements(&self) -> Result<OrbitalElements, TleError> {
        parse(&self.tle_line1, &self.tle_line2)
    }
}

/// Mean orbital elements decoded from a TLE
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrbitalElements {
    pub norad_id: u32,
    pub classification: char,
    pub international_designator: String,
    pub epoch: Epoch,
    /// Julian date of the element epoch, kept at full precision for the propagator
    pub epoch_jd: f64,
    /// First derivative of mean motion divided by two, rev/day²
    pub mean_motion_dot: f64,
    /// Second derivative of mean motion divided by six, rev/day³
    pub mean_motion_ddot: f64,
    /// Drag term, inverse Earth radii
    pub bstar: f64,
    pub element_set_number: u32,
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub eccentricity: f64,
    pub arg_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    /// Revolutions per day
    pub mean_motion: f64,
    pub revolution_number: u32,
}

/// Parse and validate a TLE line pair
pub fn parse(line1: &str, line2: &str) -> Result<OrbitalElements, TleError> {
    let l1 = check_line(line1, '1', "line1")?;
    let l2 = check_line(line2, '2', "line2")?;

    let norad_id = parse_catalog_number(&l1[2..7]).map_err(|r| TleError::new("norad_id", r))?;
    let norad_id2 = parse_catalog_number(&l2[2..7]).map_err(|r| TleError::new("norad_id", r))?;
    if norad_id != norad_id2 {
        return Err(TleError::new(
            "norad_id",
            format!("line 1 has {} but line 2 has {}", norad_id, norad_id2),
        ));
    }

    let classification = l1.as_bytes()[7] as char;
    if !matches!(classification, 'U' | 'C' | 'S' | ' ') {
        return Err(TleError::new(
            "classification",
            format!("unknown classification '{}'", classification),
        ));
    }

    let international_designator = l1[9..17].trim().to_string();

    let epoch_year = parse_int(&l1[18..20], "epoch_year")? as i32;
    let epoch_day = parse_float(&l1[20..32], "epoch_day")?;
    if !(1.0..367.0).contains(&epoch_day) {
        return Err(TleError::new(
            "epoch_day",
            format!("{} is outside 1..367", epoch_day),
        ));
    }
    let year = if epoch_year < 57 {
        2000 + epoch_year
    } else {
        1900 + epoch_year
    };
    let epoch = element_epoch(year, epoch_day).ok_or_else(|| TleError::new("epoch_day", "epoch is not representable"))?;
    let epoch_jd = julian_date_jan0(year) + epoch_day;

    let mean_motion_dot = parse_float(&l1[33..43], "mean_motion_dot")?;
    let mean_motion_ddot = parse_implied_exponent(&l1[44..52], "mean_motion_ddot")?;
    let bstar = parse_implied_exponent(&l1[53..61], "bstar")?;

    let ephemeris_type = l1.as_bytes()[62] as char;
    if !matches!(ephemeris_type, '0' | ' ') {
        return Err(TleError::new(
            "ephemeris_type",
            format!("only SGP4 element sets (type 0) are supported, got '{}'", ephemeris_type),
        ));
    }
    let element_set_number = parse_int_or_blank(&l1[64..68], "element_set_number")?;

    let inclination_deg = parse_float(&l2[8..16], "inclination")?;
    check_range(inclination_deg, 0.0, 180.0, "inclination")?;
    let raan_deg = parse_float(&l2[17..25], "raan")?;
    check_range(raan_deg, 0.0, 360.0, "raan")?;
    let eccentricity = parse_implied_decimal(&l2[26..33], "eccentricity")?;
    if !(0.0..1.0).contains(&eccentricity) {
        return Err(TleError::new(
            "eccentricity",
            format!("{} is outside [0, 1)", eccentricity),
        ));
    }
    let arg_perigee_deg = parse_float(&l2[34..42], "arg_perigee")?;
    check_range(arg_perigee_deg, 0.0, 360.0, "arg_perigee")?;
    let mean_anomaly_deg = parse_float(&l2[43..51], "mean_anomaly")?;
    check_range(mean_anomaly_deg, 0.0, 360.0, "mean_anomaly")?;
    let mean_motion = parse_float(&l2[52..63], "mean_motion")?;
    if mean_motion <= 0.0 || mean_motion >= 20.0 {
        return Err(TleError::new(
            "mean_motion",
            format!("{} rev/day is outside (0, 20)", mean_motion),
        ));
    }
    let revolution_number = parse_int_or_blank(&l2[63..68], "revolution_number")?;

    Ok(OrbitalElements {
        norad_id,
        classification,
        international_designator,
        epoch,
        epoch_jd,
        mean_motion_dot,
        mean_motion_ddot,
        bstar,
        element_set_number,
        inclination_deg,
        raan_deg,
        eccentricity,
        arg_perigee_deg,
        mean_anomaly_deg,
        mean_motion,
        revolution_number,
    })
}

/// Split text holding two- or three-line element sets into satellites.
///
/// A line that does not start with `1 ` or `2 ` is taken as the name of the
/// following set. Blank lines are ignored. Lines are not validated here.
pub fn parse_sets(text: &str) -> Result<Vec<Satellite>, TleError> {
    let mut satellites = Vec::new();
    let mut name: Option<String> = None;
    let mut lines = text.lines().map(|l| l.trim_end()).filter(|l| !l.is_empty());

    while let Some(line) = lines.next() {
        if line.starts_with("1 ") {
            let line2 = lines
                .next()
                .ok_or_else(|| TleError::new("line2", "missing second line"))?;
            let label = name.take().unwrap_or_default();
            satellites.push(Satellite::new(label, line, line2));
        } else if line.starts_with("2 ") {
            return Err(TleError::new("line1", "second line without a first line"));
        } else {
            name = Some(line.trim_start_matches("0 ").trim().to_string());
        }
    }

    Ok(satellites)
}

/// Mod-10 checksum over the first 68 columns: digits count their value, `-` counts 1
pub fn checksum(line: &str) -> u32 {
    line.bytes()
        .take(LINE_LENGTH - 1)
        .map(|b| match b {
            b'0'..=b'9' => u32::from(b - b'0'),
            b'-' => 1,
            _ => 0,
        })
        .sum::<u32>()
        % 10
}

/// Decode a five-column catalogue number, including the Alpha-5 extension
/// (`A0000` = 100000, letters I and O are skipped).
pub fn parse_catalog_number(field: &str) -> Result<u32, String> {
    let field = field.trim();
    let mut chars = field.chars();
    let first = chars
        .next()
        .ok_or_else(|| "catalogue number is blank".to_string())?;

    if first.is_ascii_uppercase() {
        if first == 'I' || first == 'O' {
            return Err(format!("'{}' is not a valid Alpha-5 prefix", first));
        }
        let rest = chars.as_str();
        if rest.len() != 4 || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{}' is not a valid Alpha-5 number", field));
        }
        let mut value = u32::from(first as u8 - b'A') + 10;
        if first > 'I' {
            value -= 1;
        }
        if first > 'O' {
            value -= 1;
        }
        let tail: u32 = rest.parse().map_err(|_| format!("'{}' is not numeric", rest))?;
        return Ok(value * 10_000 + tail);
    }

    field
        .parse::<u32>()
        .map_err(|_| format!("'{}' is not a catalogue number", field))
}

fn check_line<'a>(line: &'a str, number: char, field: &'static str) -> Result<&'a str, TleError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.is_ascii() {
        return Err(TleError::new(field, "contains non-ASCII characters"));
    }
    // Some producers pad with trailing spaces after the checksum
    let line = if line.len() > LINE_LENGTH {
        line.trim_end()
    } else {
        line
    };
    if line.len() != LINE_LENGTH {
        return Err(TleError::new(
            field,
            format!("expected {} columns, got {}", LINE_LENGTH, line.len()),
        ));
    }
    if !line.starts_with(number) || line.as_bytes()[1] != b' ' {
        return Err(TleError::new(
            field,
            format!("line must start with \"{} \"", number),
        ));
    }

    let expected = line.as_bytes()[LINE_LENGTH - 1];
    if !expected.is_ascii_digit() {
        return Err(TleError::new(field, "checksum column is not a digit"));
    }
    let actual = checksum(line);
    if u32::from(expected - b'0') != actual {
        return Err(TleError::new(
            field,
            format!("checksum mismatch: expected {}, computed {}", expected - b'0', actual),
        ));
    }

    Ok(line)
}

fn element_epoch(year: i32, day_of_year: f64) -> Option<Epoch> {
    let jan1 = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
    add_seconds(jan1, (day_of_year - 1.0) * SECONDS_PER_DAY)
}

fn check_range(value: f64, min: f64, max: f64, field: &'static str) -> Result<(), TleError> {
    if value < min || value > max {
        return Err(TleError::new(
            field,
            format!("{} is outside [{}, {}]", value, min, max),
        ));
    }
    Ok(())
}

fn parse_float(raw: &str, field: &'static str) -> Result<f64, TleError> {
    let trimmed = raw.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| TleError::new(field, format!("'{}' is not a number", trimmed)))?;
    if !value.is_finite() {
        return Err(TleError::new(field, "value is not finite"));
    }
    Ok(value)
}

fn parse_int(raw: &str, field: &'static str) -> Result<u32, TleError> {
    let trimmed = raw.trim();
    trimmed
        .parse()
        .map_err(|_| TleError::new(field, format!("'{}' is not an integer", trimmed)))
}

fn parse_int_or_blank(raw: &str, field: &'static str) -> Result<u32, TleError> {
    if raw.trim().is_empty() {
        return Ok(0);
    }
    parse_int(raw, field)
}

/// Digits with an implied leading decimal point, e.g. `1859667` = 0.1859667
fn parse_implied_decimal(raw: &str, field: &'static str) -> Result<f64, TleError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TleError::new(
            field,
            format!("'{}' is not an implied-decimal value", raw),
        ));
    }
    parse_float(&format!("0.{}", trimmed), field)
}

/// Implied-decimal mantissa with a signed exponent, e.g. ` 28098-4` = 0.28098e-4
fn parse_implied_exponent(raw: &str, field: &'static str) -> Result<f64, TleError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    let invalid = || TleError::new(field, format!("'{}' is not an exponent field", raw));

    let (sign, body) = match trimmed.as_bytes()[0] {
        b'-' => (-1.0, &trimmed[1..]),
        b'+' => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    if body.len() < 3 {
        return Err(invalid());
    }
    let (mantissa, exponent) = body.split_at(body.len() - 2);
    let mantissa = mantissa.trim();
    if mantissa.is_empty() || !mantissa.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let exp_sign = match exponent.as_bytes()[0] {
        b'-' => -1,
        b'+' | b' ' => 1,
        _ => return Err(invalid()),
    };
    let exp_digit = exponent.as_bytes()[1];
    if !exp_digit.is_ascii_digit() {
        return Err(invalid());
    }
    let exp = exp_sign * i32::from(exp_digit - b'0');

    let mantissa: f64 = format!("0.{}", mantissa).parse().map_err(|_| invalid())?;
    Ok(sign * mantissa * 10f64.powi(exp))
}
