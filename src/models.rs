use chrono::NaiveDateTime;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};

/// Measurement system used for thresholds, setpoints and reported values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[strum(serialize = "metric")]
    Metric,
    #[strum(serialize = "imperial")]
    Imperial,
}

impl UnitSystem {
    /// Convert a temperature in degrees Celsius into this unit system.
    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            UnitSystem::Metric => celsius,
            UnitSystem::Imperial => 1.8 * celsius + 32.0,
        }
    }
}

/// A temperature/humidity sample as published by a climate probe.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Getters)]
pub struct Measurement {
    /// Degrees Celsius.
    temperature: f64,
    /// Relative humidity in percent.
    humidity: f64,
}

impl Measurement {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    pub fn temperature_in(&self, units: UnitSystem) -> f64 {
        units.from_celsius(self.temperature)
    }
}

/// A soil moisture sample, in percent of sensor range.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Getters)]
pub struct SoilMoisture {
    level: f64,
}

impl SoilMoisture {
    pub fn new(level: f64) -> Self {
        Self { level }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::AsRefStr, strum::Display)]
pub enum HvacMode {
    #[strum(serialize = "idle")]
    Idle,
    #[strum(serialize = "heat")]
    Heat,
    #[strum(serialize = "cool")]
    Cool,
}

/// Describes whether the HVAC unit should be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::AsRefStr, strum::Display)]
pub enum HvacState {
    #[strum(serialize = "off")]
    Off,
    #[strum(serialize = "on")]
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Getters)]
pub struct HvacDecision {
    mode: HvacMode,
    setpoint: f64,
}

impl HvacDecision {
    pub fn new(mode: HvacMode, setpoint: f64) -> Self {
        Self { mode, setpoint }
    }
}

/// Everything the dashboard needs to show about the climate module.
#[derive(Debug, Clone, PartialEq, Serialize, Getters)]
pub struct ClimateSnapshot {
    decision: HvacDecision,
    state: HvacState,
    units: UnitSystem,
    indoor_temperature: f64,
    outdoor_temperature: f64,
    outdoor_humidity: f64,
}

impl ClimateSnapshot {
    pub fn new(
        decision: HvacDecision,
        state: HvacState,
        units: UnitSystem,
        indoor: &Measurement,
        outdoor: &Measurement,
    ) -> Self {
        Self {
            decision,
            state,
            units,
            indoor_temperature: indoor.temperature_in(units),
            outdoor_temperature: outdoor.temperature_in(units),
            outdoor_humidity: *outdoor.humidity(),
        }
    }
}

/// The irrigation latch. `last_water_time` is only present while watering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IrrigationState {
    needs_water: bool,
    last_water_time: Option<NaiveDateTime>,
}

impl IrrigationState {
    pub fn needs_water(&self) -> bool {
        self.needs_water
    }

    pub fn last_water_time(&self) -> Option<NaiveDateTime> {
        self.last_water_time
    }

    pub(crate) fn start_watering(&mut self, now: NaiveDateTime) {
        self.needs_water = true;
        self.last_water_time = Some(now);
    }

    pub(crate) fn stop_watering(&mut self) {
        self.needs_water = false;
        self.last_water_time = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Getters)]
pub struct IrrigationSnapshot {
    state: IrrigationState,
    moisture: f64,
    rain_expected: bool,
}

impl IrrigationSnapshot {
    pub fn new(state: IrrigationState, moisture: f64, rain_expected: bool) -> Self {
        Self {
            state,
            moisture,
            rain_expected,
        }
    }
}
