use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::Deserialize;

use crate::settings;

const MIN_HOURLY_POINTS: usize = 12;
const MIN_DAILY_POINTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Forecast request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Forecast payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Forecast payload has {found} {series} points, expected at least {expected}")]
    TooShort {
        series: &'static str,
        found: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
pub struct HourlyPoint {
    #[serde(rename = "time", with = "chrono::serde::ts_seconds")]
    timestamp: DateTime<Utc>,
    icon: String,
    temperature: f64,
    precip_probability: f64,
}

#[derive(Debug, Clone, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    #[serde(rename = "time", with = "chrono::serde::ts_seconds")]
    timestamp: DateTime<Utc>,
    icon: String,
    temperature_high: f64,
    precip_probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct Series<T> {
    data: Vec<T>,
}

/// Hourly and daily outlook, ordered oldest first.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastPayload {
    hourly: Series<HourlyPoint>,
    daily: Series<DailyPoint>,
}

impl ForecastPayload {
    pub fn from_slice(body: &[u8]) -> Result<Self, ForecastError> {
        let payload: Self = serde_json::from_slice(body)?;
        payload.check_length()?;
        Ok(payload)
    }

    fn check_length(&self) -> Result<(), ForecastError> {
        let hourly = self.hourly.data.len();
        if hourly < MIN_HOURLY_POINTS {
            return Err(ForecastError::TooShort {
                series: "hourly",
                found: hourly,
                expected: MIN_HOURLY_POINTS,
            });
        }
        let daily = self.daily.data.len();
        if daily < MIN_DAILY_POINTS {
            return Err(ForecastError::TooShort {
                series: "daily",
                found: daily,
                expected: MIN_DAILY_POINTS,
            });
        }
        Ok(())
    }

    pub fn hourly(&self) -> &[HourlyPoint] {
        &self.hourly.data
    }

    pub fn daily(&self) -> &[DailyPoint] {
        &self.daily.data
    }

    /// Whether any of the next `horizon` hours exceeds `threshold` chance of
    /// precipitation.
    pub fn rain_expected(&self, horizon: usize, threshold: f64) -> bool {
        self.hourly()
            .iter()
            .take(horizon)
            .any(|point| point.precip_probability > threshold)
    }
}

/// Remote weather forecast service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastProvider: Send {
    async fn fetch(&mut self) -> Result<ForecastPayload, ForecastError>;
}

/// Fetches a DarkSky style forecast over HTTP.
#[derive(Debug, Clone)]
pub struct HttpForecastProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpForecastProvider {
    pub fn new(config: &settings::Forecast) -> Result<Self, ForecastError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl ForecastProvider for HttpForecastProvider {
    #[tracing::instrument(skip(self))]
    async fn fetch(&mut self) -> Result<ForecastPayload, ForecastError> {
        let body = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        ForecastPayload::from_slice(&body)
    }
}
