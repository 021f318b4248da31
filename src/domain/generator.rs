// Synthetic telemetry generator
//
// Every field is drawn independently from its own closed interval. The
// intervals, the fault probability and the DTC catalog are product choices
// rather than vehicle facts, so they all live in a configurable profile.
use crate::domain::snapshot::{default_catalog, DiagnosticCode, TelemetrySnapshot};
use chrono::{DateTime, Utc};
use rand::distr::uniform::SampleUniform;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

const FLOAT_DECIMALS: i32 = 2;
const DISTANCE_DECIMALS: i32 = 1;

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("invalid interval for {field}: min {min} is greater than max {max}")]
    InvalidInterval { field: &'static str, min: f64, max: f64 },
    #[error("fault probability {0} is outside [0, 1]")]
    InvalidProbability(f64),
    #[error("duplicate code {0} in DTC catalog")]
    DuplicateCode(String),
}

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T>
where
    T: SampleUniform + PartialOrd + Copy,
{
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    /// Uniform sample. A degenerate or inverted interval yields `min`
    /// unchanged; `GeneratorProfile::validate` rejects inverted ones.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        if self.min >= self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

impl Interval<f64> {
    fn sample_rounded<R: Rng + ?Sized>(&self, rng: &mut R, decimals: i32) -> f64 {
        if self.min >= self.max {
            return self.min;
        }
        let factor = 10f64.powi(decimals);
        let value = (self.sample(rng) * factor).round() / factor;
        value.clamp(self.min, self.max)
    }
}

/// Sampling constants for the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorProfile {
    pub fault_probability: f64,
    pub max_fault_codes: usize,
    pub catalog: Vec<DiagnosticCode>,

    pub rpm: Interval<u32>,
    pub speed: Interval<u32>,
    pub throttle_position: Interval<f64>,
    pub engine_load: Interval<f64>,
    pub coolant_temp: Interval<i32>,
    pub intake_temp: Interval<i32>,
    pub oil_temp: Interval<i32>,
    pub fuel_level: Interval<f64>,
    pub fuel_pressure: Interval<f64>,
    pub fuel_rate: Interval<f64>,
    pub maf: Interval<f64>,
    pub intake_pressure: Interval<f64>,
    pub battery_voltage: Interval<f64>,
    pub ambient_temp: Interval<i32>,
    pub barometric_pressure: Interval<f64>,
    pub distance: Interval<f64>,
    pub runtime: Interval<u32>,
}

impl Default for GeneratorProfile {
    fn default() -> Self {
        Self {
            fault_probability: 1.0 / 3.0,
            max_fault_codes: 3,
            catalog: default_catalog(),

            rpm: Interval::new(700, 3500),
            speed: Interval::new(0, 120),
            throttle_position: Interval::new(0.0, 100.0),
            engine_load: Interval::new(10.0, 90.0),
            coolant_temp: Interval::new(75, 105),
            intake_temp: Interval::new(20, 60),
            oil_temp: Interval::new(80, 110),
            fuel_level: Interval::new(10.0, 95.0),
            fuel_pressure: Interval::new(200.0, 400.0),
            fuel_rate: Interval::new(0.5, 15.0),
            maf: Interval::new(2.0, 25.0),
            intake_pressure: Interval::new(30.0, 100.0),
            battery_voltage: Interval::new(12.5, 14.5),
            ambient_temp: Interval::new(15, 35),
            barometric_pressure: Interval::new(95.0, 105.0),
            distance: Interval::new(0.0, 50000.0),
            runtime: Interval::new(0, 10000),
        }
    }
}

impl GeneratorProfile {
    pub fn validate(&self) -> Result<(), ProfileError> {
        if !(0.0..=1.0).contains(&self.fault_probability) {
            return Err(ProfileError::InvalidProbability(self.fault_probability));
        }

        let mut seen = HashSet::new();
        for dtc in &self.catalog {
            if !seen.insert(dtc.code.as_str()) {
                return Err(ProfileError::DuplicateCode(dtc.code.clone()));
            }
        }

        for (field, min, max) in self.bounds() {
            if !(min <= max) {
                return Err(ProfileError::InvalidInterval { field, min, max });
            }
        }

        Ok(())
    }

    /// `(field, min, max)` for every sampled numeric field.
    pub fn bounds(&self) -> Vec<(&'static str, f64, f64)> {
        fn b<T: Into<f64> + Copy>(field: &'static str, i: &Interval<T>) -> (&'static str, f64, f64) {
            (field, i.min.into(), i.max.into())
        }

        vec![
            b("rpm", &self.rpm),
            b("speed", &self.speed),
            b("throttle_position", &self.throttle_position),
            b("engine_load", &self.engine_load),
            b("coolant_temp", &self.coolant_temp),
            b("intake_temp", &self.intake_temp),
            b("oil_temp", &self.oil_temp),
            b("fuel_level", &self.fuel_level),
            b("fuel_pressure", &self.fuel_pressure),
            b("fuel_rate", &self.fuel_rate),
            b("maf", &self.maf),
            b("intake_pressure", &self.intake_pressure),
            b("battery_voltage", &self.battery_voltage),
            b("ambient_temp", &self.ambient_temp),
            b("barometric_pressure", &self.barometric_pressure),
            b("distance", &self.distance),
            b("runtime", &self.runtime),
        ]
    }

    /// Upper bound on DTCs in one snapshot.
    pub fn fault_limit(&self) -> usize {
        self.max_fault_codes.min(self.catalog.len())
    }
}

/// Generate a snapshot stamped with the current wall-clock time.
pub fn generate_sample<R: Rng + ?Sized>(rng: &mut R, profile: &GeneratorProfile) -> TelemetrySnapshot {
    generate_sample_at(rng, profile, Utc::now())
}

/// Generate a snapshot stamped with `at`.
pub fn generate_sample_at<R: Rng + ?Sized>(
    rng: &mut R,
    profile: &GeneratorProfile,
    at: DateTime<Utc>,
) -> TelemetrySnapshot {
    let has_fault = rng.random::<f64>() < profile.fault_probability;
    let dtcs = if has_fault {
        pick_codes(rng, profile)
    } else {
        Vec::new()
    };

    TelemetrySnapshot {
        rpm: profile.rpm.sample(rng),
        speed: profile.speed.sample(rng),
        throttle_position: profile.throttle_position.sample_rounded(rng, FLOAT_DECIMALS),
        engine_load: profile.engine_load.sample_rounded(rng, FLOAT_DECIMALS),
        coolant_temp: profile.coolant_temp.sample(rng),
        intake_temp: profile.intake_temp.sample(rng),
        oil_temp: profile.oil_temp.sample(rng),
        fuel_level: profile.fuel_level.sample_rounded(rng, FLOAT_DECIMALS),
        fuel_pressure: profile.fuel_pressure.sample_rounded(rng, FLOAT_DECIMALS),
        fuel_rate: profile.fuel_rate.sample_rounded(rng, FLOAT_DECIMALS),
        maf: profile.maf.sample_rounded(rng, FLOAT_DECIMALS),
        intake_pressure: profile.intake_pressure.sample_rounded(rng, FLOAT_DECIMALS),
        battery_voltage: profile.battery_voltage.sample_rounded(rng, FLOAT_DECIMALS),
        ambient_temp: profile.ambient_temp.sample(rng),
        barometric_pressure: profile.barometric_pressure.sample_rounded(rng, FLOAT_DECIMALS),
        distance: profile.distance.sample_rounded(rng, DISTANCE_DECIMALS),
        runtime: profile.runtime.sample(rng),
        mil_status: !dtcs.is_empty(),
        dtc_count: dtcs.len() as u32,
        dtcs,
        timestamp: at,
        unix_timestamp: at.timestamp(),
    }
}

fn pick_codes<R: Rng + ?Sized>(rng: &mut R, profile: &GeneratorProfile) -> Vec<DiagnosticCode> {
    let limit = profile.fault_limit();
    if limit == 0 {
        return Vec::new();
    }

    let count = rng.random_range(1..=limit);
    profile.catalog.choose_multiple(rng, count).cloned().collect()
}
