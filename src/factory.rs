use crate::{
    climate::ClimateController,
    control_loop::ModuleFactory,
    forecast::HttpForecastProvider,
    irrigation::IrrigationController,
    sensors::SensorHub,
    settings::Settings,
};

/// Builds modules wired to the MQTT telemetry topics and the HTTP forecast.
pub struct HubModuleFactory {
    settings: Settings,
    hub: SensorHub,
    forecast: HttpForecastProvider,
}

impl HubModuleFactory {
    pub fn new(settings: Settings, hub: SensorHub, forecast: HttpForecastProvider) -> Self {
        Self {
            settings,
            hub,
            forecast,
        }
    }
}

impl ModuleFactory for HubModuleFactory {
    fn climate(&self) -> ClimateController {
        let mqtt = &self.settings.mqtt;
        ClimateController::new(
            self.settings.climate.clone(),
            self.settings.units.system,
            Box::new(
                self.hub
                    .climate_sensor(&mqtt.outdoor_topic, mqtt.sensor_max_age()),
            ),
            Box::new(
                self.hub
                    .climate_sensor(&mqtt.indoor_topic, mqtt.sensor_max_age()),
            ),
        )
    }

    fn irrigation(&self) -> IrrigationController {
        let mqtt = &self.settings.mqtt;
        IrrigationController::new(
            self.settings.irrigation.clone(),
            Box::new(
                self.hub
                    .moisture_sensor(&mqtt.soil_topic, mqtt.sensor_max_age()),
            ),
            Box::new(self.forecast.clone()),
        )
    }
}
