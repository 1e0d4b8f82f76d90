use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest pressure the barometer reports, in hPa.
pub const PRESSURE_MIN_HPA: f64 = 260.0;
/// Highest pressure the barometer reports, in hPa.
pub const PRESSURE_MAX_HPA: f64 = 1260.0;
pub const AIR_TEMP_MIN_C: f64 = -60.0;
pub const AIR_TEMP_MAX_C: f64 = 85.0;
/// Bound on any angle, in degrees, either sign.
pub const ANGLE_LIMIT_DEG: f64 = 360.0;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct EulerAngle {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl EulerAngle {
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Converts a fused IMU attitude into degrees, each axis wrapped into [0, 360).
    pub fn from_quaternion(quat: UnitQuaternion<f64>) -> Self {
        let (roll, pitch, yaw) = quat.euler_angles();
        Self {
            yaw: wrap_degrees(yaw.to_degrees()),
            pitch: wrap_degrees(pitch.to_degrees()),
            roll: wrap_degrees(roll.to_degrees()),
        }
    }
}

/// Wraps an angle into [0, 360).
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// One sample of every instrument, taken at the start of a broadcast cycle.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct ReadingSnapshot {
    pub pressure_hpa: f64,
    pub air_temp_c: f64,
    /// in degrees magnetic
    pub heading_magnetic_deg: f64,
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
}

impl Default for ReadingSnapshot {
    fn default() -> Self {
        ReadingSnapshot {
            pressure_hpa: 1013.0,
            air_temp_c: 20.0,
            heading_magnetic_deg: 0.0,
            yaw_deg: 0.0,
            pitch_deg: 0.0,
            roll_deg: 0.0,
        }
    }
}

impl ReadingSnapshot {
    pub fn orientation(&self) -> EulerAngle {
        EulerAngle::new(self.yaw_deg, self.pitch_deg, self.roll_deg)
    }

    /// Rejects values the encoder must never see.
    pub fn validate(&self) -> Result<()> {
        check_range("pressure_hpa", self.pressure_hpa, PRESSURE_MIN_HPA, PRESSURE_MAX_HPA)?;
        check_range("air_temp_c", self.air_temp_c, AIR_TEMP_MIN_C, AIR_TEMP_MAX_C)?;
        for (quantity, value) in [
            ("heading_magnetic_deg", self.heading_magnetic_deg),
            ("yaw_deg", self.yaw_deg),
            ("pitch_deg", self.pitch_deg),
            ("roll_deg", self.roll_deg),
        ] {
            check_range(quantity, value, -ANGLE_LIMIT_DEG, ANGLE_LIMIT_DEG)?;
        }
        Ok(())
    }
}

fn check_finite(quantity: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidReading { quantity, value })
    }
}

fn check_range(quantity: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    check_finite(quantity, value)?;
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidReading { quantity, value })
    }
}

/// Instrument package queried once per cycle.
///
/// Accessors are synchronous: every implementation either reads a register
/// over a local bus or computes a value in memory.
pub trait ReadingSource {
    /// Barometric pressure in hPa.
    fn pressure_hpa(&mut self) -> anyhow::Result<f64>;
    /// Air temperature in °C, taken from the pressure sensor's thermometer.
    fn temperature_from_pressure(&mut self) -> anyhow::Result<f64>;
    /// Magnetic compass heading in degrees.
    fn compass_heading(&mut self) -> anyhow::Result<f64>;
    fn orientation(&mut self) -> anyhow::Result<EulerAngle>;
}

impl<S: ReadingSource + ?Sized> ReadingSource for Box<S> {
    fn pressure_hpa(&mut self) -> anyhow::Result<f64> {
        (**self).pressure_hpa()
    }
    fn temperature_from_pressure(&mut self) -> anyhow::Result<f64> {
        (**self).temperature_from_pressure()
    }
    fn compass_heading(&mut self) -> anyhow::Result<f64> {
        (**self).compass_heading()
    }
    fn orientation(&mut self) -> anyhow::Result<EulerAngle> {
        (**self).orientation()
    }
}

/// Samples every instrument and returns a validated snapshot.
///
/// The compass heading is rounded to whole degrees before it is stored, so
/// 359.6° is reported as 0°.
pub fn read_snapshot<S: ReadingSource + ?Sized>(source: &mut S) -> Result<ReadingSnapshot> {
    let air_temp_c = source.temperature_from_pressure()?;
    let pressure_hpa = source.pressure_hpa()?;
    let heading_magnetic_deg = wrap_degrees(source.compass_heading()?.round());
    let EulerAngle { yaw, pitch, roll } = source.orientation()?;

    let snapshot = ReadingSnapshot {
        pressure_hpa,
        air_temp_c,
        heading_magnetic_deg,
        yaw_deg: yaw,
        pitch_deg: pitch,
        roll_deg: roll,
    };
    snapshot.validate()?;
    Ok(snapshot)
}

/// Deterministic instrument stand-in.
///
/// Every call to [`ReadingSource::orientation`] advances one step; the other
/// readings drift sinusoidally around `base` with the configured amplitude.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    base: ReadingSnapshot,
    amplitude: f64,
    step: u64,
}

impl SimulatedSource {
    pub fn new(base: ReadingSnapshot) -> Self {
        Self {
            base,
            amplitude: 0.0,
            step: 0,
        }
    }

    /// Enables drift; `amplitude` is in the reading's own unit.
    pub fn with_drift(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    fn wobble(&self, phase: f64) -> f64 {
        self.amplitude * (self.step as f64 * 0.05 + phase).sin()
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(ReadingSnapshot::default()).with_drift(1.0)
    }
}

impl ReadingSource for SimulatedSource {
    fn pressure_hpa(&mut self) -> anyhow::Result<f64> {
        Ok(self.base.pressure_hpa + self.wobble(0.0))
    }

    fn temperature_from_pressure(&mut self) -> anyhow::Result<f64> {
        Ok(self.base.air_temp_c + self.wobble(1.0))
    }

    fn compass_heading(&mut self) -> anyhow::Result<f64> {
        Ok(wrap_degrees(self.base.heading_magnetic_deg + 10.0 * self.wobble(2.0)))
    }

    fn orientation(&mut self) -> anyhow::Result<EulerAngle> {
        let angles = EulerAngle {
            yaw: wrap_degrees(self.base.yaw_deg + 10.0 * self.wobble(2.0)),
            pitch: wrap_degrees(self.base.pitch_deg + self.wobble(3.0)),
            roll: wrap_degrees(self.base.roll_deg + self.wobble(4.0)),
        };
        self.step = self.step.wrapping_add(1);
        Ok(angles)
    }
}
