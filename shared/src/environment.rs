//! Environment Generator
//!
//! Produces the wind, dust and turbulence readings for a tick. A reading is a
//! pure function of the generator seed and the tick index, so a seeded run can
//! be replayed exactly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::limits;
use crate::protocol::SensorStatus;

/// Ranges and thresholds for environment sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Upper bound (inclusive) for wind speed and dust level
    pub max_reading: u32,
    /// Chance that a tick falls inside a sandstorm
    pub storm_probability: f64,
    /// Wind and dust boost during a sandstorm
    pub storm_boost: u32,
    pub dust_yellow: u32,
    pub dust_red: u32,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            max_reading: limits::ENV_MAX_READING,
            storm_probability: limits::STORM_PROBABILITY,
            storm_boost: limits::STORM_BOOST,
            dust_yellow: limits::DUST_YELLOW,
            dust_red: limits::DUST_RED,
        }
    }
}

impl EnvironmentConfig {
    /// Sensor degradation caused by dust alone
    pub fn dust_status(&self, dust_level: u32) -> SensorStatus {
        if dust_level > self.dust_red {
            SensorStatus::Red
        } else if dust_level > self.dust_yellow {
            SensorStatus::Yellow
        } else {
            SensorStatus::Green
        }
    }
}

/// One tick's environmental conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    pub wind_speed: u32,
    pub dust_level: u32,
    /// Dust-derived sensor contribution
    pub sensor_status: SensorStatus,
    /// Gust direction during a sandstorm: -1 headwind, 1 tailwind, 0 calm
    pub gust: i8,
    /// Per-axis turbulence samples in [-1, 1]
    pub turbulence: [f64; 3],
}

impl EnvironmentReading {
    pub fn is_storm(&self) -> bool {
        self.gust != 0
    }
}

/// Seeded generator of environment readings
#[derive(Debug, Clone)]
pub struct EnvironmentGenerator {
    seed: u64,
    config: EnvironmentConfig,
}

impl EnvironmentGenerator {
    pub fn new(seed: u64, config: EnvironmentConfig) -> Self {
        Self { seed, config }
    }

    /// Generator with a random seed
    pub fn from_entropy(config: EnvironmentConfig) -> Self {
        Self::new(rand::random(), config)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Sample the environment for `tick`
    pub fn sample(&self, tick: u64) -> EnvironmentReading {
        let mut rng = ChaCha8Rng::seed_from_u64(mix(self.seed, tick));
        let max = self.config.max_reading;

        let mut wind_speed = rng.gen_range(0..=max);
        let mut dust_level = rng.gen_range(0..=max);

        let turbulence = [
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        ];

        let mut gust = 0;
        if rng.gen_bool(self.config.storm_probability.clamp(0.0, 1.0)) {
            wind_speed = wind_speed.saturating_add(self.config.storm_boost).min(max);
            dust_level = dust_level.saturating_add(self.config.storm_boost).min(max);
            gust = if rng.gen_bool(0.5) { 1 } else { -1 };
        }

        EnvironmentReading {
            wind_speed,
            dust_level,
            sensor_status: self.config.dust_status(dust_level),
            gust,
            turbulence,
        }
    }
}

/// SplitMix64 finalizer over seed and tick
fn mix(seed: u64, tick: u64) -> u64 {
    let mut z = seed ^ tick.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
