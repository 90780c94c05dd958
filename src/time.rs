//! Time scales used across the service
//!
//! - `Epoch` is a UTC instant with nanosecond resolution
//! - DS50: fractional days since 1950-01-01T12:00:00Z (wire time scale)
//! - MSE: fractional minutes since a TLE element-set epoch
//! - Julian dates for the astronomical models

use chrono::{DateTime, TimeDelta, Utc};

pub type Epoch = DateTime<Utc>;

pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const MINUTES_PER_DAY: f64 = 1_440.0;

/// Julian date of the Unix epoch
pub const JD_UNIX_EPOCH: f64 = 2_440_587.5;

/// Julian date of J2000.0 (2000-01-01T12:00:00 TT)
pub const JD_J2000: f64 = 2_451_545.0;

/// Unix timestamp of the DS50 reference instant
const DS50_REFERENCE_UNIX: i64 = -631_108_800;

// Offsets beyond this are far outside any element set's useful life
const MAX_OFFSET_SECONDS: f64 = 1.0e11;

/// The DS50 reference instant, 1950-01-01T12:00:00Z
pub fn ds50_reference() -> Epoch {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(DS50_REFERENCE_UNIX)
}

/// Signed seconds from `from` to `to`
pub fn seconds_between(from: Epoch, to: Epoch) -> f64 {
    let delta = to - from;
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) * 1e-9
}

/// Signed minutes from `from` to `to`
pub fn minutes_between(from: Epoch, to: Epoch) -> f64 {
    seconds_between(from, to) / 60.0
}

/// Shift an epoch by a fractional number of seconds, rounded to the nanosecond
pub fn add_seconds(epoch: Epoch, seconds: f64) -> Option<Epoch> {
    if !seconds.is_finite() || seconds.abs() > MAX_OFFSET_SECONDS {
        return None;
    }

    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as i64;
    let delta = TimeDelta::try_seconds(whole as i64)? + TimeDelta::nanoseconds(nanos);

    epoch.checked_add_signed(delta)
}

/// Shift an epoch by a fractional number of minutes
pub fn add_minutes(epoch: Epoch, minutes: f64) -> Option<Epoch> {
    add_seconds(epoch, minutes * 60.0)
}

pub fn to_ds50(epoch: Epoch) -> f64 {
    seconds_between(ds50_reference(), epoch) / SECONDS_PER_DAY
}

pub fn from_ds50(ds50: f64) -> Option<Epoch> {
    add_seconds(ds50_reference(), ds50 * SECONDS_PER_DAY)
}

/// Julian date (UTC) of an epoch
pub fn julian_date(epoch: Epoch) -> f64 {
    JD_UNIX_EPOCH + seconds_between(DateTime::<Utc>::UNIX_EPOCH, epoch) / SECONDS_PER_DAY
}

/// Julian date of 00:00 UTC on a Gregorian calendar date, Vallado's `jday`.
/// Day 0 is the last day of the previous month.
pub fn julian_day(year: i32, month: u32, day: u32) -> f64 {
    let (y, m, d) = (f64::from(year), f64::from(month), f64::from(day));
    367.0 * y - (7.0 * (y + ((m + 9.0) / 12.0).floor()) * 0.25).floor()
        + (275.0 * m / 9.0).floor()
        + d
        + 1_721_013.5
}

/// Julian date of 00:00 UTC on January 0 (December 31 of the previous year)
pub fn julian_date_jan0(year: i32) -> f64 {
    julian_day(year, 1, 0)
}
