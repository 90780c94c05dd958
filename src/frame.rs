//! Reference frame conversion between TEME and J2000
//!
//! TEME (the native SGP4 frame) is taken to the true-of-date frame by the
//! equation of the equinoxes, then to mean-of-date by IAU-1980 nutation and to
//! J2000 by IAU-1976 precession. Nutation uses the ten largest series terms,
//! which is well below the accuracy of the element sets themselves.

use crate::propagation::StateVector;
use crate::time::{julian_date, Epoch, JD_J2000, SECONDS_PER_DAY};
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

type Matrix = [[f64; 3]; 3];

const ARCSEC: f64 = PI / (180.0 * 3600.0);
const DEG: f64 = PI / 180.0;

/// TT - UTC used for the precession and nutation arguments
const TT_MINUS_UTC_SECONDS: f64 = 69.184;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Frame {
    /// True equator, mean equinox of date
    Teme,
    /// Mean equator and equinox of J2000.0
    J2000,
}

impl Frame {
    /// Frame for a wire `EphemType` code
    pub fn from_code(code: i32) -> Result<Self, FrameError> {
        match code {
            1 => Ok(Frame::Teme),
            2 => Ok(Frame::J2000),
            other => Err(FrameError::UnsupportedFrame(format!("ephem type {}", other))),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Frame::Teme => 1,
            Frame::J2000 => 2,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Teme => write!(f, "TEME"),
            Frame::J2000 => write!(f, "J2000"),
        }
    }
}

impl FromStr for Frame {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eci" | "teme" => Ok(Frame::Teme),
            "j2k" | "j2000" => Ok(Frame::J2000),
            _ => Err(FrameError::UnsupportedFrame(s.to_string())),
        }
    }
}

/// Express `state` in `target`. Vectors already in `target` are returned unchanged.
pub fn convert(state: &StateVector, target: Frame) -> StateVector {
    let rotation = match (state.frame, target) {
        (Frame::Teme, Frame::J2000) => teme_to_j2000(state.epoch),
        (Frame::J2000, Frame::Teme) => transpose(&teme_to_j2000(state.epoch)),
        _ => return *state,
    };

    StateVector {
        position: apply(&rotation, &state.position),
        velocity: apply(&rotation, &state.velocity),
        frame: target,
        ..*state
    }
}

/// Rotation taking TEME coordinates at `epoch` to J2000
pub fn teme_to_j2000(epoch: Epoch) -> Matrix {
    let t = julian_centuries_tt(epoch);

    let precession = precession(t);
    let (nutation, dpsi, eps_mean) = nutation(t);
    let eqeq = dpsi * eps_mean.cos();

    multiply(
        &multiply(&transpose(&precession), &transpose(&nutation)),
        &rot3(-eqeq),
    )
}

fn julian_centuries_tt(epoch: Epoch) -> f64 {
    let jd_tt = julian_date(epoch) + TT_MINUS_UTC_SECONDS / SECONDS_PER_DAY;
    (jd_tt - JD_J2000) / 36_525.0
}

/// IAU-1976 precession, J2000 to mean-of-date
fn precession(t: f64) -> Matrix {
    let t2 = t * t;
    let t3 = t2 * t;
    let zeta = (2306.2181 * t + 0.30188 * t2 + 0.017998 * t3) * ARCSEC;
    let theta = (2004.3109 * t - 0.42665 * t2 - 0.041833 * t3) * ARCSEC;
    let z = (2306.2181 * t + 1.09468 * t2 + 0.018203 * t3) * ARCSEC;

    multiply(&multiply(&rot3(-z), &rot2(theta)), &rot3(-zeta))
}

// Multipliers of (l, l', F, D, Omega), then longitude and obliquity
// coefficients with their rates, in units of 0.0001 arcsec
const NUTATION_TERMS: [([i8; 5], f64, f64, f64, f64); 10] = [
    ([0, 0, 0, 0, 1], -171_996.0, -174.2, 92_025.0, 8.9),
    ([0, 0, 2, -2, 2], -13_187.0, -1.6, 5_736.0, -3.1),
    ([0, 0, 2, 0, 2], -2_274.0, -0.2, 977.0, -0.5),
    ([0, 0, 0, 0, 2], 2_062.0, 0.2, -895.0, 0.5),
    ([0, 1, 0, 0, 0], 1_426.0, -3.4, 54.0, -0.1),
    ([1, 0, 0, 0, 0], 712.0, 0.1, -7.0, 0.0),
    ([0, 1, 2, -2, 2], -517.0, 1.2, 224.0, -0.6),
    ([0, 0, 2, 0, 1], -386.0, -0.4, 200.0, 0.0),
    ([1, 0, 2, 0, 2], -301.0, 0.0, 129.0, -0.1),
    ([0, -1, 2, -2, 2], 217.0, -0.5, -95.0, 0.3),
];

/// IAU-1980 nutation, mean-of-date to true-of-date.
///
/// Returns the matrix, the nutation in longitude and the mean obliquity.
fn nutation(t: f64) -> (Matrix, f64, f64) {
    let t2 = t * t;
    let t3 = t2 * t;
    let angle = |deg: f64| (deg % 360.0) * DEG;

    let args = [
        angle(134.96298139 + (1325.0 * 360.0 + 198.8673981) * t + 0.0086972 * t2 + 1.78e-5 * t3),
        angle(357.52772333 + (99.0 * 360.0 + 359.0503400) * t - 0.0001603 * t2 - 3.3e-6 * t3),
        angle(93.27191028 + (1342.0 * 360.0 + 82.0175381) * t - 0.0036825 * t2 + 3.1e-6 * t3),
        angle(297.85036306 + (1236.0 * 360.0 + 307.1114800) * t - 0.0019142 * t2 + 5.3e-6 * t3),
        angle(125.04452222 - (5.0 * 360.0 + 134.1362608) * t + 0.0020708 * t2 + 2.2e-6 * t3),
    ];

    let (mut dpsi, mut deps) = (0.0, 0.0);
    for (multipliers, a, a1, b, b1) in NUTATION_TERMS.iter() {
        let arg: f64 = multipliers
            .iter()
            .zip(args.iter())
            .map(|(m, x)| f64::from(*m) * x)
            .sum();
        dpsi += (a + a1 * t) * arg.sin();
        deps += (b + b1 * t) * arg.cos();
    }
    let dpsi = dpsi * 1e-4 * ARCSEC;
    let deps = deps * 1e-4 * ARCSEC;

    let eps_mean = (84_381.448 - 46.8150 * t - 0.00059 * t2 + 0.001813 * t3) * ARCSEC;
    let matrix = multiply(
        &multiply(&rot1(-(eps_mean + deps)), &rot3(-dpsi)),
        &rot1(eps_mean),
    );

    (matrix, dpsi, eps_mean)
}

fn rot1(a: f64) -> Matrix {
    let (s, c) = a.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, s], [0.0, -s, c]]
}

fn rot2(a: f64) -> Matrix {
    let (s, c) = a.sin_cos();
    [[c, 0.0, -s], [0.0, 1.0, 0.0], [s, 0.0, c]]
}

fn rot3(a: f64) -> Matrix {
    let (s, c) = a.sin_cos();
    [[c, s, 0.0], [-s, c, 0.0], [0.0, 0.0, 1.0]]
}

fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn transpose(m: &Matrix) -> Matrix {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            out[j][i] = *value;
        }
    }
    out
}

fn apply(m: &Matrix, v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn teme_state(epoch: Epoch, position: [f64; 3], velocity: [f64; 3]) -> StateVector {
        StateVector {
            epoch,
            position,
            velocity,
            frame: Frame::Teme,
            stale: false,
        }
    }

    fn norm(v: &[f64; 3]) -> f64 {
        v.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    #[test]
    fn test_teme_to_j2000_reference_case() {
        // 2004-04-06 07:51:28.386009 UTC
        let epoch = Utc.with_ymd_and_hms(2004, 4, 6, 7, 51, 28).unwrap()
            + TimeDelta::nanoseconds(386_009_000);
        let teme = teme_state(
            epoch,
            [5094.18016210, 6127.64465950, 6380.34453270],
            [-4.746131487, 0.785818041, 5.531931288],
        );

        let j2k = convert(&teme, Frame::J2000);
        assert_eq!(j2k.frame, Frame::J2000);
        let expected_r = [5102.50895790, 6123.01140070, 6378.13692820];
        let expected_v = [-4.743220157, 0.790536497, 5.533755727];
        for i in 0..3 {
            assert!((j2k.position[i] - expected_r[i]).abs() < 5e-3);
            assert!((j2k.velocity[i] - expected_v[i]).abs() < 5e-6);
        }
    }

    #[test]
    fn test_round_trip_is_invertible() {
        let epoch = Utc.with_ymd_and_hms(2025, 12, 18, 6, 30, 0).unwrap();
        let original = teme_state(epoch, [-2637.2566, -3758.4655, -4898.4836], [6.935978, -3.032982, -1.407462]);

        let back = convert(&convert(&original, Frame::J2000), Frame::Teme);
        assert_eq!(back.frame, Frame::Teme);
        for i in 0..3 {
            let dr = (back.position[i] - original.position[i]).abs();
            let dv = (back.velocity[i] - original.velocity[i]).abs();
            assert!(dr <= 1e-9 * norm(&original.position), "position drift {}", dr);
            assert!(dv <= 1e-9 * norm(&original.velocity), "velocity drift {}", dv);
        }
    }

    #[test]
    fn test_rotation_preserves_magnitude() {
        let epoch = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let s = teme_state(epoch, [7000.0, -1200.0, 300.0], [1.0, 7.0, -0.5]);
        let j = convert(&s, Frame::J2000);
        assert!((norm(&j.position) - norm(&s.position)).abs() < 1e-9);
        assert!((norm(&j.velocity) - norm(&s.velocity)).abs() < 1e-12);
    }

    #[test]
    fn test_same_frame_is_identity() {
        let epoch = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let s = teme_state(epoch, [1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);
        assert_eq!(convert(&s, Frame::Teme), s);
    }

    #[test]
    fn test_frame_codes_and_names() {
        assert_eq!(Frame::from_code(1).unwrap(), Frame::Teme);
        assert_eq!(Frame::from_code(2).unwrap(), Frame::J2000);
        assert!(matches!(Frame::from_code(0), Err(FrameError::UnsupportedFrame(_))));
        assert!(matches!(Frame::from_code(7), Err(FrameError::UnsupportedFrame(_))));

        assert_eq!("eci".parse::<Frame>().unwrap(), Frame::Teme);
        assert_eq!("J2K".parse::<Frame>().unwrap(), Frame::J2000);
        assert!("itrf".parse::<Frame>().is_err());
        assert_eq!(Frame::J2000.to_string(), "J2000");
    }
}
