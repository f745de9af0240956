use chrono::NaiveDateTime;

use crate::{
    fault::Fault,
    forecast::ForecastProvider,
    models::{IrrigationSnapshot, IrrigationState, SoilMoisture},
    sensors::MoistureSensor,
    settings,
};

/// Decides whether the lawn needs watering.
///
/// The outdoor temperature is not read here; the control loop hands over the
/// reading taken by the climate module in the same cycle.
pub struct IrrigationController {
    config: settings::Irrigation,
    moisture_sensor: Box<dyn MoistureSensor>,
    forecast: Box<dyn ForecastProvider>,
    moisture: Option<SoilMoisture>,
    outdoor_temperature: Option<f64>,
    rain_expected: bool,
    state: IrrigationState,
}

impl IrrigationController {
    pub fn new(
        config: settings::Irrigation,
        moisture_sensor: Box<dyn MoistureSensor>,
        forecast: Box<dyn ForecastProvider>,
    ) -> Self {
        Self {
            config,
            moisture_sensor,
            forecast,
            moisture: None,
            outdoor_temperature: None,
            rain_expected: false,
            state: IrrigationState::default(),
        }
    }

    /// Read the soil probe and take over this cycle's outdoor temperature, in
    /// the same units as the freeze threshold.
    #[tracing::instrument(skip(self))]
    pub async fn read_sensors(&mut self, outdoor_temperature: f64) -> Result<(), Fault> {
        self.outdoor_temperature = Some(outdoor_temperature);
        self.moisture = self.moisture_sensor.read().await;

        match self.moisture {
            Some(moisture) => {
                tracing::debug!(level = moisture.level(), "Soil moisture read");
                Ok(())
            }
            None => Err(Fault::WaterSensorFailure),
        }
    }

    /// Refresh the rain outlook from the forecast service.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_forecast(&mut self) -> Result<(), Fault> {
        let payload = self
            .forecast
            .fetch()
            .await
            .map_err(|e| Fault::ForecastFetchFailure(e.to_string()))?;

        self.rain_expected = payload.rain_expected(
            self.config.forecast_horizon,
            self.config.rain_probability_threshold,
        );
        tracing::debug!(rain_expected = self.rain_expected, "Forecast refreshed");
        Ok(())
    }

    /// Update the watering latch.
    ///
    /// Freezing weather or expected rain always stops watering, ahead of the
    /// moisture checks, so an ongoing watering cycle is interrupted. Only valid
    /// after a successful [`IrrigationController::read_sensors`].
    #[tracing::instrument(skip(self))]
    pub fn decide(&mut self, now: NaiveDateTime) -> Option<IrrigationSnapshot> {
        let (Some(moisture), Some(outdoor_temperature)) = (self.moisture, self.outdoor_temperature)
        else {
            tracing::warn!("Decision requested without a complete sensor reading");
            return None;
        };
        let level = *moisture.level();

        if outdoor_temperature < self.config.freeze_threshold || self.rain_expected {
            self.state.stop_watering();
        } else if let Some(last_water_time) = self.state.last_water_time() {
            // A cooldown that overflows the calendar never elapses.
            let due = self
                .config
                .cooldown()
                .and_then(|cooldown| last_water_time.checked_add_signed(cooldown));
            if due.is_some_and(|due| now >= due) {
                if level > self.config.capacity_threshold {
                    self.state.stop_watering();
                } else {
                    self.state.start_watering(now);
                }
            }
        } else if level < self.config.wilt_threshold {
            self.state.start_watering(now);
        }

        tracing::info!(
            needs_water = self.state.needs_water(),
            moisture = level,
            rain_expected = self.rain_expected,
            "Watering decision"
        );
        Some(IrrigationSnapshot::new(self.state, level, self.rain_expected))
    }
}
