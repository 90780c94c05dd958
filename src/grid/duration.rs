//! ISO-8601 durations (`PnYnMnWnDTnHnMnS`)
//!
//! Calendar units are nominal: a year is 365 days and a month 30 days. Either
//! `.` or `,` may be the decimal separator, and only the last component may
//! carry a fraction. The result is exact to the nanosecond.

use super::GridError;
use chrono::TimeDelta;

const NANOS_PER_SECOND: i128 = 1_000_000_000;
const NANOS_PER_DAY: i128 = 86_400 * NANOS_PER_SECOND;

// (designator, nanoseconds) in the order they must appear
const DATE_UNITS: [(u8, i128); 4] = [
    (b'Y', 365 * NANOS_PER_DAY),
    (b'M', 30 * NANOS_PER_DAY),
    (b'W', 7 * NANOS_PER_DAY),
    (b'D', NANOS_PER_DAY),
];
const TIME_UNITS: [(u8, i128); 3] = [
    (b'H', 3_600 * NANOS_PER_SECOND),
    (b'M', 60 * NANOS_PER_SECOND),
    (b'S', NANOS_PER_SECOND),
];

/// Parse an ISO-8601 duration such as `PT8.5M` or `P1DT12H`
pub fn parse_iso_duration(text: &str) -> Result<TimeDelta, GridError> {
    let fail = |reason: &'static str| GridError::InvalidStepFormat {
        value: text.to_string(),
        reason,
    };

    let mut rest = text.trim().as_bytes();
    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    rest = rest
        .strip_prefix(b"P")
        .ok_or_else(|| fail("duration must start with 'P'"))?;
    if rest.is_empty() {
        return Err(fail("duration has no components"));
    }

    let mut total: i128 = 0;
    let mut in_time = false;
    let mut next_unit = 0;
    let mut seen_fraction = false;
    let mut components = 0;

    while !rest.is_empty() {
        if rest[0] == b'T' {
            if in_time {
                return Err(fail("duplicate 'T' separator"));
            }
            in_time = true;
            next_unit = 0;
            rest = &rest[1..];
            if rest.is_empty() {
                return Err(fail("'T' must be followed by a time component"));
            }
            continue;
        }

        if seen_fraction {
            return Err(fail("only the last component may have a fraction"));
        }

        let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
        let (whole, tail) = rest.split_at(digits);
        let (fraction, tail) = match tail.first() {
            Some(b'.') | Some(b',') => {
                let n = tail[1..].iter().take_while(|b| b.is_ascii_digit()).count();
                if n == 0 {
                    return Err(fail("decimal separator must be followed by digits"));
                }
                seen_fraction = true;
                tail[1..].split_at(n)
            }
            _ => (&tail[..0], tail),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(fail("component is missing its number"));
        }

        let designator = *tail.first().ok_or_else(|| fail("component is missing its designator"))?;
        let units: &[(u8, i128)] = if in_time { &TIME_UNITS } else { &DATE_UNITS };
        let position = units[next_unit..]
            .iter()
            .position(|(d, _)| *d == designator)
            .ok_or_else(|| fail("unknown or out-of-order designator"))?;
        let unit_nanos = units[next_unit + position].1;
        next_unit += position + 1;

        total = total
            .checked_add(component_nanos(whole, fraction, unit_nanos).ok_or_else(|| fail("duration is too long"))?)
            .ok_or_else(|| fail("duration is too long"))?;
        components += 1;
        rest = &tail[1..];
    }

    if components == 0 {
        return Err(fail("duration has no components"));
    }

    let nanos = i64::try_from(if negative { -total } else { total })
        .map_err(|_| fail("duration is too long"))?;
    Ok(TimeDelta::nanoseconds(nanos))
}

fn component_nanos(whole: &[u8], fraction: &[u8], unit_nanos: i128) -> Option<i128> {
    let mut value: i128 = 0;
    for digit in whole {
        value = value.checked_mul(10)?.checked_add(i128::from(digit - b'0'))?;
    }
    let mut nanos = value.checked_mul(unit_nanos)?;

    // Fraction digits beyond nanosecond resolution are truncated
    let mut scale = unit_nanos;
    for digit in fraction {
        if scale < 10 {
            break;
        }
        scale /= 10;
        nanos = nanos.checked_add(i128::from(digit - b'0') * scale)?;
    }
    Some(nanos)
}
