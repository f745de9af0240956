use serde::Deserialize;

/// The two replaceable modules owned by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    #[strum(serialize = "climate")]
    Climate,
    #[strum(serialize = "irrigation")]
    Irrigation,
}

/// A fault reported by a module's read step. A fault-free step is `Ok(())`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("Outdoor temperature sensor returned no reading")]
    OutdoorSensorFailure,

    #[error("Indoor temperature sensor returned no reading")]
    IndoorSensorFailure,

    #[error("Soil moisture sensor returned no reading")]
    WaterSensorFailure,

    #[error("Failed to fetch weather forecast: {0}")]
    ForecastFetchFailure(String),
}

impl Fault {
    /// The module whose read step raised this fault.
    pub fn module(&self) -> Module {
        match self {
            Fault::OutdoorSensorFailure | Fault::IndoorSensorFailure => Module::Climate,
            Fault::WaterSensorFailure | Fault::ForecastFetchFailure(_) => Module::Irrigation,
        }
    }
}
