use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::{sync::Mutex, time::Instant};

use crate::models::{Measurement, SoilMoisture};

/// A temperature/humidity probe. `None` means the probe could not be read.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClimateSensor: Send {
    async fn read(&mut self) -> Option<Measurement>;
}

/// A soil moisture probe. `None` means the probe could not be read.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MoistureSensor: Send {
    async fn read(&mut self) -> Option<SoilMoisture>;
}

#[derive(Debug)]
struct Sample {
    payload: Vec<u8>,
    received_at: Instant,
}

/// Latest raw payload per telemetry topic, written by the MQTT bridge and read
/// by the topic-backed sensors.
#[derive(Debug, Clone, Default)]
pub struct SensorHub {
    samples: Arc<Mutex<HashMap<String, Sample>>>,
}

impl SensorHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, topic: &str, payload: &[u8]) {
        self.samples.lock().await.insert(
            topic.to_string(),
            Sample {
                payload: payload.to_vec(),
                received_at: Instant::now(),
            },
        );
    }

    /// Decode the latest sample on `topic`, provided it arrived within
    /// `max_age`. Expired or malformed samples count as no reading.
    #[tracing::instrument(skip(self))]
    async fn latest<T: DeserializeOwned>(&self, topic: &str, max_age: Duration) -> Option<T> {
        let samples = self.samples.lock().await;
        let Some(sample) = samples.get(topic) else {
            tracing::debug!("No sample received yet");
            return None;
        };
        if sample.received_at.elapsed() > max_age {
            tracing::warn!(age = ?sample.received_at.elapsed(), "Sample is too old");
            return None;
        }

        match serde_json::from_slice(&sample.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode sample");
                None
            }
        }
    }

    pub fn climate_sensor(&self, topic: impl Into<String>, max_age: Duration) -> TopicSensor {
        TopicSensor::new(self.clone(), topic.into(), max_age)
    }

    pub fn moisture_sensor(&self, topic: impl Into<String>, max_age: Duration) -> TopicSensor {
        TopicSensor::new(self.clone(), topic.into(), max_age)
    }
}

/// A probe whose readings arrive as JSON on a telemetry topic.
#[derive(Debug)]
pub struct TopicSensor {
    hub: SensorHub,
    topic: String,
    max_age: Duration,
}

impl TopicSensor {
    fn new(hub: SensorHub, topic: String, max_age: Duration) -> Self {
        Self {
            hub,
            topic,
            max_age,
        }
    }
}

#[async_trait]
impl ClimateSensor for TopicSensor {
    async fn read(&mut self) -> Option<Measurement> {
        self.hub.latest(&self.topic, self.max_age).await
    }
}

#[async_trait]
impl MoistureSensor for TopicSensor {
    async fn read(&mut self) -> Option<SoilMoisture> {
        self.hub.latest(&self.topic, self.max_age).await
    }
}
