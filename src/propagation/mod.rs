//! Orbit propagation from TLE mean elements
//!
//! [`Propagator`] drives the `sgp4` crate's SGP4/SDP4 model, initialised the
//! way `sgp4::Constants::from_elements` does it (WGS-72, IAU sidereal time),
//! and turns its output into [`StateVector`]s in the TEME frame, applying the
//! decay and staleness policy. A propagator is immutable after construction
//! and can be shared between threads freely; deep-space resonance is
//! integrated from the element epoch on every call.

use crate::error::ErrorCode;
use crate::frame::Frame;
use crate::time::{add_minutes, minutes_between, Epoch, JD_J2000};
use crate::tle::OrbitalElements;
use chrono::TimeDelta;
use serde::Serialize;
use sgp4::{Constants, MinutesSinceEpoch, Orbit, WGS72};
use std::f64::consts::{PI, TAU};
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_DECAY_ALTITUDE_KM: f64 = 100.0;
pub const DEFAULT_STALE_AFTER_DAYS: i64 = 30;

/// WGS-72 equatorial radius
pub const EARTH_RADIUS_KM: f64 = 6378.135;
/// WGS-72 sqrt(GM) in Earth radii^1.5 per minute
const XKE: f64 = 0.074_366_916_133_173_42;
const DEEP_SPACE_PERIOD_MINUTES: f64 = 225.0;
const DAYS_PER_JULIAN_YEAR: f64 = 365.25;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropagationError {
    #[error("Orbital decay at {minutes:.3} min from epoch: {reason}")]
    OrbitalDecay { minutes: f64, reason: String },

    #[error("Propagation diverged at {minutes:.3} min from epoch: {reason}")]
    Divergence { minutes: f64, reason: String },
}

impl PropagationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PropagationError::OrbitalDecay { .. } => ErrorCode::OrbitalDecay,
            PropagationError::Divergence { .. } => ErrorCode::PropagationDivergence,
        }
    }

    /// Minutes from the element epoch at which the failure occurred
    pub fn minutes(&self) -> f64 {
        match self {
            PropagationError::OrbitalDecay { minutes, .. }
            | PropagationError::Divergence { minutes, .. } => *minutes,
        }
    }
}

/// Thresholds applied on top of the raw theory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationLimits {
    /// Mean perigee altitude below which the orbit counts as decayed
    pub decay_altitude_km: f64,
    /// Distance from the element epoch beyond which states are flagged stale
    pub stale_after: TimeDelta,
}

impl Default for PropagationLimits {
    fn default() -> Self {
        Self {
            decay_altitude_km: DEFAULT_DECAY_ALTITUDE_KM,
            stale_after: TimeDelta::days(DEFAULT_STALE_AFTER_DAYS),
        }
    }
}

/// Position (km) and velocity (km/s) at an epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateVector {
    pub epoch: Epoch,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub frame: Frame,
    /// Epoch lies far outside the element set's useful span
    pub stale: bool,
}

struct Model {
    constants: Constants,
    /// Brouwer mean motion, rad/min
    mean_motion: f64,
    /// Mean perigee altitude at epoch, km
    perigee_altitude_km: f64,
}

impl Model {
    fn new(el: &OrbitalElements) -> Result<Self, String> {
        if !el.mean_motion.is_finite() || el.mean_motion <= 0.0 {
            return Err(format!("mean motion {} rev/day is not positive", el.mean_motion));
        }

        let orbit = Orbit::from_kozai_elements(
            &WGS72,
            el.inclination_deg.to_radians(),
            el.raan_deg.to_radians(),
            el.eccentricity,
            el.arg_perigee_deg.to_radians(),
            el.mean_anomaly_deg.to_radians(),
            el.mean_motion * PI / 720.0,
        )
        .map_err(|e| e.to_string())?;

        let mean_motion = orbit.mean_motion;
        let semi_major_axis = (XKE / mean_motion).powf(2.0 / 3.0);
        let perigee_altitude_km = (semi_major_axis * (1.0 - el.eccentricity) - 1.0) * EARTH_RADIUS_KM;

        let constants = Constants::new(
            WGS72,
            sgp4::iau_epoch_to_sidereal_time,
            (el.epoch_jd - JD_J2000) / DAYS_PER_JULIAN_YEAR,
            el.bstar,
            orbit,
        )
        .map_err(|e| e.to_string())?;

        Ok(Self {
            constants,
            mean_motion,
            perigee_altitude_km,
        })
    }
}

/// Initialised propagator for one element set
pub struct Propagator {
    elements: OrbitalElements,
    // Initialisation failures surface as divergence at every epoch
    model: Result<Model, String>,
    limits: PropagationLimits,
}

impl fmt::Debug for Propagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagator")
            .field("norad_id", &self.elements.norad_id)
            .field("epoch", &self.elements.epoch)
            .field("period_minutes", &self.period_minutes())
            .field("limits", &self.limits)
            .finish()
    }
}

impl Propagator {
    pub fn new(elements: OrbitalElements, limits: PropagationLimits) -> Self {
        let model = Model::new(&elements);
        if let Err(e) = &model {
            debug!(
                "SGP4 initialisation failed for {}: {}",
                elements.norad_id,
                e
            );
        }
        Self {
            elements,
            model,
            limits,
        }
    }

    pub fn elements(&self) -> &OrbitalElements {
        &self.elements
    }

    /// Element set epoch
    pub fn epoch(&self) -> Epoch {
        self.elements.epoch
    }

    /// Nodal period in minutes; NaN when the model could not be initialised
    pub fn period_minutes(&self) -> f64 {
        match &self.model {
            Ok(model) => TAU / model.mean_motion,
            Err(_) => f64::NAN,
        }
    }

    pub fn is_deep_space(&self) -> bool {
        self.period_minutes() >= DEEP_SPACE_PERIOD_MINUTES
    }

    /// Minutes since the element epoch (MSE) of `epoch`
    pub fn minutes_since_epoch(&self, epoch: Epoch) -> f64 {
        minutes_between(self.elements.epoch, epoch)
    }

    /// TEME state at `epoch`
    pub fn propagate(&self, epoch: Epoch) -> Result<StateVector, PropagationError> {
        self.evaluate(epoch, self.minutes_since_epoch(epoch))
    }

    /// TEME state `minutes` after the element epoch
    pub fn propagate_minutes(&self, minutes: f64) -> Result<StateVector, PropagationError> {
        let epoch = add_minutes(self.elements.epoch, minutes).ok_or_else(|| {
            PropagationError::Divergence {
                minutes,
                reason: "target epoch is not representable".to_string(),
            }
        })?;
        self.evaluate(epoch, minutes)
    }

    fn evaluate(&self, epoch: Epoch, minutes: f64) -> Result<StateVector, PropagationError> {
        let diverged = |reason: String| PropagationError::Divergence { minutes, reason };
        let decayed = |reason: &str| PropagationError::OrbitalDecay {
            minutes,
            reason: reason.to_string(),
        };

        let model = self.model.as_ref().map_err(|e| diverged(e.clone()))?;
        if model.perigee_altitude_km < self.limits.decay_altitude_km {
            return Err(decayed("mean perigee is below the decay altitude"));
        }

        let prediction = model
            .constants
            .propagate(MinutesSinceEpoch(minutes))
            .map_err(|e| diverged(e.to_string()))?;

        let finite = prediction
            .position
            .iter()
            .chain(prediction.velocity.iter())
            .all(|c| c.is_finite());
        if !finite {
            return Err(diverged("state vector is not finite".to_string()));
        }

        let radius = prediction.position.iter().map(|c| c * c).sum::<f64>().sqrt();
        if radius < EARTH_RADIUS_KM {
            return Err(decayed("orbit radius fell below the Earth's surface"));
        }

        let stale = (epoch - self.elements.epoch).abs() > self.limits.stale_after;

        Ok(StateVector {
            epoch,
            position: prediction.position,
            velocity: prediction.velocity,
            frame: Frame::Teme,
            stale,
        })
    }
}

/// One-shot propagation with default limits
pub fn propagate(elements: &OrbitalElements, epoch: Epoch) -> Result<StateVector, PropagationError> {
    Propagator::new(elements.clone(), PropagationLimits::default()).propagate(epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tle::parse;
    use chrono::{TimeZone, Utc};

    const VANGUARD_L1: &str =
        "1 00005U 58002B   00179.78495062  .00000023  00000-0  28098-4 0  4753";
    const VANGUARD_L2: &str =
        "2 00005  34.2682 348.7242 1859667 331.7664  19.3264 10.82419157413667";
    const MOLNIYA_L1: &str =
        "1 08195U 75081A   06176.33215444  .00000099  00000-0  11873-3 0   813";
    const MOLNIYA_L2: &str =
        "2 08195  64.1586 279.0717 6877146 264.7651  20.2257  2.00491383225656";
    const SAT_65271_L1: &str =
        "1 65271U 25183A   25282.36302114 0.00010000  00000-0  55866-4 0    07";
    const SAT_65271_L2: &str =
        "2 65271  48.7951   8.5514 0002000  85.4867 277.3551 15.78566782    05";

    fn propagator(l1: &str, l2: &str) -> Propagator {
        Propagator::new(parse(l1, l2).unwrap(), PropagationLimits::default())
    }

    fn assert_close(actual: [f64; 3], expected: [f64; 3], tol: f64) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < tol, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_vanguard_reference_states() {
        let p = propagator(VANGUARD_L1, VANGUARD_L2);
        assert!(!p.is_deep_space());

        let s = p.propagate_minutes(0.0).unwrap();
        assert_close(s.position, [7022.46529266, -1400.08296755, 0.03995155], 1e-4);
        assert_close(s.velocity, [1.893841015, 6.405893759, 4.534807250], 1e-6);

        let s = p.propagate_minutes(360.0).unwrap();
        assert_close(s.position, [-7154.03120202, -3783.17682504, -3536.19412294], 1e-4);
        assert_close(s.velocity, [4.741887409, -4.151817765, -2.093935425], 1e-6);

        let s = p.propagate_minutes(1440.0).unwrap();
        assert_close(s.position, [-938.55923943, -6268.18748831, -4294.02924751], 1e-4);

        let s = p.propagate_minutes(4320.0).unwrap();
        assert_close(s.position, [-9060.47373569, 4658.70952502, 813.68673153], 1e-4);
        assert_close(s.velocity, [-2.232832783, -4.110453490, -3.157345433], 1e-6);
    }

    #[test]
    fn test_molniya_deep_space_reference_states() {
        let p = propagator(MOLNIYA_L1, MOLNIYA_L2);
        assert!(p.is_deep_space());
        assert!(p.period_minutes() > 225.0);

        let s = p.propagate_minutes(0.0).unwrap();
        assert_close(s.position, [2349.89483350, -14785.93811562, 0.02119378], 1e-4);
        assert_close(s.velocity, [2.721488096, -3.256811655, 4.498416672], 1e-6);

        let s = p.propagate_minutes(120.0).unwrap();
        assert_close(s.position, [15223.91713658, -17852.95881713, 25280.39558224], 1e-4);

        let s = p.propagate_minutes(1440.0).unwrap();
        assert_close(s.position, [2890.80638268, -15446.43952300, 948.77010176], 1e-4);
        assert_close(s.velocity, [2.654407490, -2.909344895, 4.486437362], 1e-6);
    }

    #[test]
    fn test_propagation_is_deterministic() {
        let p = propagator(MOLNIYA_L1, MOLNIYA_L2);
        let epoch = Utc.with_ymd_and_hms(2006, 7, 1, 3, 0, 0).unwrap();

        let a = p.propagate(epoch).unwrap();
        let b = p.propagate(epoch).unwrap();
        // A later evaluation must not disturb an earlier one
        let _ = p.propagate(Utc.with_ymd_and_hms(2006, 8, 1, 0, 0, 0).unwrap());
        let c = p.propagate(epoch).unwrap();

        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_stale_flag() {
        let p = propagator(VANGUARD_L1, VANGUARD_L2);
        assert!(!p.propagate_minutes(10.0 * 1440.0).unwrap().stale);
        assert!(p.propagate_minutes(31.0 * 1440.0).unwrap().stale);
        assert!(p.propagate_minutes(-31.0 * 1440.0).unwrap().stale);
    }

    #[test]
    fn test_decay_altitude_threshold() {
        let el = parse(VANGUARD_L1, VANGUARD_L2).unwrap();
        let limits = PropagationLimits {
            decay_altitude_km: 10_000.0,
            ..PropagationLimits::default()
        };
        let p = Propagator::new(el, limits);
        let err = p.propagate_minutes(0.0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OrbitalDecay);
        assert_eq!(err.minutes(), 0.0);
    }

    #[test]
    fn test_scenario_grid_propagates_without_errors() {
        let p = propagator(SAT_65271_L1, SAT_65271_L2);
        let start = Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap();

        let first = p.propagate(start).unwrap();
        assert!(first.stale);
        assert_close(first.position, [-2637.25658808, -3758.46548845, -4898.48357845], 1e-3);
        assert_close(first.velocity, [6.935978224, -3.032981975, -1.407461679], 1e-4);

        for i in 0..1695 {
            let epoch = start + TimeDelta::milliseconds(510_000 * i);
            let s = p.propagate(epoch).unwrap();
            let r = s.position.iter().map(|c| c * c).sum::<f64>().sqrt();
            assert!(r - EARTH_RADIUS_KM > 300.0);
        }
    }

    #[test]
    fn test_failed_initialisation_diverges_everywhere() {
        let mut el = parse(VANGUARD_L1, VANGUARD_L2).unwrap();
        el.mean_motion = -1.0;
        let p = Propagator::new(el, PropagationLimits::default());

        assert!(p.period_minutes().is_nan());
        assert!(!p.is_deep_space());
        for minutes in [0.0, 90.0, -90.0] {
            let err = p.propagate_minutes(minutes).unwrap_err();
            assert_eq!(err.code(), ErrorCode::PropagationDivergence);
            assert_eq!(err.minutes(), minutes);
        }
    }

    #[test]
    fn test_free_function_matches_propagator() {
        let el = parse(VANGUARD_L1, VANGUARD_L2).unwrap();
        let epoch = el.epoch + TimeDelta::minutes(90);
        let a = propagate(&el, epoch).unwrap();
        let b = propagator(VANGUARD_L1, VANGUARD_L2).propagate(epoch).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.frame, Frame::Teme);
    }
}
