use crate::{
    fault::Fault,
    models::{ClimateSnapshot, HvacDecision, HvacMode, HvacState, Measurement, UnitSystem},
    sensors::ClimateSensor,
    settings,
    time_context::{Season, TimeContext},
};

/// Heating and cooling decisions from the outdoor/indoor probes.
pub struct ClimateController {
    config: settings::Climate,
    units: UnitSystem,
    outdoor_sensor: Box<dyn ClimateSensor>,
    indoor_sensor: Box<dyn ClimateSensor>,
    outdoor: Option<Measurement>,
    indoor: Option<Measurement>,
}

impl ClimateController {
    pub fn new(
        config: settings::Climate,
        units: UnitSystem,
        outdoor_sensor: Box<dyn ClimateSensor>,
        indoor_sensor: Box<dyn ClimateSensor>,
    ) -> Self {
        Self {
            config,
            units,
            outdoor_sensor,
            indoor_sensor,
            outdoor: None,
            indoor: None,
        }
    }

    /// Read both probes. Each stored reading is replaced by the fresh result,
    /// so a probe that fails leaves no reading behind.
    #[tracing::instrument(skip(self))]
    pub async fn read_sensors(&mut self) -> Result<(), Fault> {
        self.outdoor = self.outdoor_sensor.read().await;
        self.indoor = self.indoor_sensor.read().await;

        if self.outdoor.is_none() {
            return Err(Fault::OutdoorSensorFailure);
        }
        if self.indoor.is_none() {
            return Err(Fault::IndoorSensorFailure);
        }

        tracing::debug!(outdoor = ?self.outdoor, indoor = ?self.indoor, "Climate sensors read");
        Ok(())
    }

    /// Outdoor temperature in the configured unit system, if the last read
    /// succeeded.
    pub fn outdoor_temperature(&self) -> Option<f64> {
        self.outdoor.map(|m| m.temperature_in(self.units))
    }

    /// Run the decision tree and the on/off check for the current readings.
    ///
    /// Only valid after a successful [`ClimateController::read_sensors`].
    #[tracing::instrument(skip(self))]
    pub fn decide(&self, time: &TimeContext) -> Option<ClimateSnapshot> {
        let (Some(outdoor), Some(indoor)) = (self.outdoor, self.indoor) else {
            tracing::warn!("Decision requested without a complete sensor reading");
            return None;
        };

        let decision = self.make_hvac_decision(&outdoor, time);
        let state = hvac_state(
            indoor.temperature_in(self.units),
            *decision.setpoint(),
            self.config.comfort_zone_tolerance,
        );
        tracing::info!(mode = %decision.mode(), setpoint = decision.setpoint(), %state, "HVAC decision");

        Some(ClimateSnapshot::new(
            decision, state, self.units, &indoor, &outdoor,
        ))
    }

    fn make_hvac_decision(&self, outdoor: &Measurement, time: &TimeContext) -> HvacDecision {
        let config = &self.config;
        let temperature = outdoor.temperature_in(self.units);
        let humidity = *outdoor.humidity();

        if temperature < config.heat_threshold {
            if time.season == Season::Summer {
                return HvacDecision::new(HvacMode::Idle, temperature);
            }

            let setpoint = if time.is_night() {
                config.heat_setpoint - config.setback
            } else {
                config.heat_setpoint
            };
            HvacDecision::new(HvacMode::Heat, setpoint)
        } else if temperature > config.heat_threshold && temperature < config.cool_threshold {
            if humidity < config.humidity_threshold || time.is_night() {
                HvacDecision::new(HvacMode::Idle, temperature)
            } else {
                // Dehumidify pass.
                HvacDecision::new(HvacMode::Cool, temperature - config.setback)
            }
        } else {
            // Exactly heat_threshold or cool_threshold also lands here.
            let mut setpoint = config.cool_setpoint;
            if time.is_night() {
                setpoint += config.setback;
            }
            if humidity > config.humidity_threshold {
                setpoint -= config.setback;
            }
            HvacDecision::new(HvacMode::Cool, setpoint)
        }
    }
}

/// On when the indoor temperature is outside the comfort zone around the
/// setpoint.
pub fn hvac_state(indoor: f64, setpoint: f64, tolerance: f64) -> HvacState {
    if (indoor - setpoint).abs() > tolerance {
        HvacState::On
    } else {
        HvacState::Off
    }
}
