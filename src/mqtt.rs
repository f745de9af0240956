use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::{
    mqttbytes::{
        v5::{Packet, Publish},
        QoS::AtLeastOnce,
    },
    AsyncClient,
    Event::{Incoming, Outgoing},
    EventLoop, MqttOptions,
};

use crate::{sensors::SensorHub, settings};

/// Pumps the MQTT event loop and routes sensor telemetry into the hub.
pub struct MqttBridge {
    client: AsyncClient,
    eventloop: EventLoop,
    hub: SensorHub,
    topics: Vec<String>,
}

impl MqttBridge {
    pub fn new(config: &settings::Mqtt, hub: SensorHub) -> Self {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
        mqtt_options.set_keep_alive(Duration::from_secs(5));

        let (client, eventloop) = AsyncClient::new(mqtt_options, 10);

        Self {
            client,
            eventloop,
            hub,
            topics: vec![
                config.outdoor_topic.clone(),
                config.indoor_topic.clone(),
                config.soil_topic.clone(),
            ],
        }
    }

    /// A handle for publishing, shared with the dashboard.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Poll the connection forever. Topics are subscribed on every ConnAck,
    /// since a reconnect starts a clean session without them.
    pub async fn run_until_completion(mut self) -> Result<()> {
        loop {
            match self.eventloop.poll().await {
                Ok(Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to broker");
                    subscribe_all(&self.client, &self.topics)?;
                }
                Ok(Incoming(Packet::Publish(Publish { topic, payload, .. }))) => {
                    route(&self.hub, &self.topics, &topic, &payload).await;
                }
                Ok(Incoming(incoming)) => {
                    tracing::trace!(incoming = ?incoming, "Unhandled incoming message");
                }
                // Do nothing for outgoing requests
                Ok(Outgoing(_)) => {}
                Err(e) => {
                    tracing::error!(error = %e, "MQTT connection error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Queue a subscription for every sensor topic without waiting on the event
/// loop, which is the caller.
fn subscribe_all(client: &AsyncClient, topics: &[String]) -> Result<()> {
    for topic in topics {
        client
            .try_subscribe(topic.as_str(), AtLeastOnce)
            .with_context(|| format!("Failed to subscribe to {topic}"))?;
        tracing::debug!(topic, "Subscribed");
    }
    Ok(())
}

async fn route(hub: &SensorHub, topics: &[String], topic: &[u8], payload: &[u8]) {
    let Ok(topic) = std::str::from_utf8(topic) else {
        tracing::warn!("Dropping publish with non UTF-8 topic");
        return;
    };

    if topics.iter().any(|t| t == topic) {
        tracing::trace!(topic, "Sensor sample received");
        hub.record(topic, payload).await;
    } else {
        tracing::debug!(topic, "Ignoring publish on unknown topic");
    }
}
