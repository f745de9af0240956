use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::{
    control_loop::{RecoveryPolicy, RetryPolicy},
    models::UnitSystem,
};

const CONFIG_PATH_VAR: &str = "SMART_HOME_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
/// One week.
const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Units {
    pub system: UnitSystem,
}

/// Thresholds and setpoints for the HVAC decision tree, expressed in the
/// configured unit system.
#[derive(Debug, Clone, Deserialize)]
pub struct Climate {
    pub heat_threshold: f64,
    pub cool_threshold: f64,
    pub heat_setpoint: f64,
    pub cool_setpoint: f64,
    pub setback: f64,
    pub comfort_zone_tolerance: f64,
    pub humidity_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Irrigation {
    pub freeze_threshold: f64,
    pub wilt_threshold: f64,
    pub capacity_threshold: f64,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default = "default_rain_probability")]
    pub rain_probability_threshold: f64,
    #[serde(default = "default_forecast_horizon")]
    pub forecast_horizon: usize,
}

impl Irrigation {
    /// `None` when the configured value does not fit a [`chrono::TimeDelta`].
    pub fn cooldown(&self) -> Option<chrono::TimeDelta> {
        i64::try_from(self.cooldown_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
    }
}

fn default_rain_probability() -> f64 {
    0.40
}

fn default_forecast_horizon() -> usize {
    12
}

#[derive(Debug, Clone, Deserialize)]
pub struct Calendar {
    pub summer_start_month: u32,
    pub summer_end_month: u32,
    pub morning_hour: u32,
    pub night_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Control {
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub recovery: RecoveryPolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Control {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mqtt {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub outdoor_topic: String,
    pub indoor_topic: String,
    pub soil_topic: String,
    pub sensor_max_age_secs: u64,
    pub dashboard_topic: Option<String>,
}

impl Mqtt {
    pub fn sensor_max_age(&self) -> Duration {
        Duration::from_secs(self.sensor_max_age_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Forecast {
    pub endpoint: String,
    pub timeout_secs: u64,
}

/// Static configuration, loaded once at process start.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub units: Units,
    pub climate: Climate,
    pub irrigation: Irrigation,
    pub calendar: Calendar,
    pub control: Control,
    pub mqtt: Mqtt,
    pub forecast: Forecast,
}

impl Settings {
    /// Load the settings from the file named by `SMART_HOME_CONFIG`, falling
    /// back to the bundled default file.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::from_file(path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(contents).context("Failed to parse configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.logger.level.parse::<tracing::Level>().is_err() {
            bail!("logger level {:?} is not a tracing level", self.logger.level);
        }

        let climate = &self.climate;
        if climate.heat_threshold >= climate.cool_threshold {
            bail!(
                "heat_threshold ({}) must be below cool_threshold ({})",
                climate.heat_threshold,
                climate.cool_threshold
            );
        }
        if climate.comfort_zone_tolerance < 0.0 || climate.setback < 0.0 {
            bail!("setback and comfort_zone_tolerance cannot be negative");
        }

        let irrigation = &self.irrigation;
        if irrigation.wilt_threshold >= irrigation.capacity_threshold {
            bail!(
                "wilt_threshold ({}) must be below capacity_threshold ({})",
                irrigation.wilt_threshold,
                irrigation.capacity_threshold
            );
        }
        if !(0.0..=1.0).contains(&irrigation.rain_probability_threshold) {
            bail!("rain_probability_threshold must be a probability between 0 and 1");
        }
        if irrigation.cooldown_secs > MAX_COOLDOWN_SECS {
            bail!(
                "cooldown_secs ({}) must not exceed {MAX_COOLDOWN_SECS}",
                irrigation.cooldown_secs
            );
        }
        if irrigation.forecast_horizon == 0 {
            bail!("forecast_horizon must be at least one hour");
        }

        let calendar = &self.calendar;
        for month in [calendar.summer_start_month, calendar.summer_end_month] {
            if !(1..=12).contains(&month) {
                bail!("month {month} is outside 1..=12");
            }
        }
        if calendar.summer_start_month > calendar.summer_end_month {
            bail!("summer_start_month must not come after summer_end_month");
        }
        for hour in [calendar.morning_hour, calendar.night_hour] {
            if hour > 23 {
                bail!("hour {hour} is outside 0..=23");
            }
        }

        if self.control.cycle_interval_secs == 0 {
            bail!("cycle_interval_secs must be positive");
        }

        Ok(())
    }
}
