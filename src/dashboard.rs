use rumqttc::v5::{mqttbytes::QoS::AtMostOnce, AsyncClient};
use serde::Serialize;

use crate::models::{ClimateSnapshot, IrrigationSnapshot};

/// Presents the outcome of a successful cycle. Rendering is fire-and-forget:
/// nothing is reported back to the control loop.
#[cfg_attr(test, mockall::automock)]
pub trait Dashboard: Send {
    fn render(&mut self, climate: &ClimateSnapshot, irrigation: &IrrigationSnapshot);
}

/// Writes each snapshot to the log.
#[derive(Debug, Default)]
pub struct LogDashboard;

impl Dashboard for LogDashboard {
    fn render(&mut self, climate: &ClimateSnapshot, irrigation: &IrrigationSnapshot) {
        tracing::info!(
            hvac.mode = %climate.decision().mode(),
            hvac.setpoint = climate.decision().setpoint(),
            hvac.state = %climate.state(),
            indoor = climate.indoor_temperature(),
            outdoor = climate.outdoor_temperature(),
            outdoor_humidity = climate.outdoor_humidity(),
            needs_water = irrigation.state().needs_water(),
            moisture = irrigation.moisture(),
            rain_expected = irrigation.rain_expected(),
            "Snapshot"
        );
    }
}

#[derive(Serialize)]
struct SnapshotMessage<'a> {
    climate: &'a ClimateSnapshot,
    irrigation: &'a IrrigationSnapshot,
}

/// Publishes each snapshot as JSON so a remote display can pick it up.
pub struct MqttDashboard {
    client: AsyncClient,
    topic: String,
}

impl MqttDashboard {
    pub fn new(client: AsyncClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }
}

impl Dashboard for MqttDashboard {
    fn render(&mut self, climate: &ClimateSnapshot, irrigation: &IrrigationSnapshot) {
        let message = SnapshotMessage {
            climate,
            irrigation,
        };
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize snapshot");
                return;
            }
        };

        // try_publish never waits on the broker, so a slow display cannot
        // hold up the next cycle.
        if let Err(e) = self
            .client
            .try_publish(self.topic.as_str(), AtMostOnce, true, payload)
        {
            tracing::warn!(error = %e, topic = %self.topic, "Dropped snapshot");
        }
    }
}
