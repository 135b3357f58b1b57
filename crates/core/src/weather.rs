//! Weather provider collaborator: one HTTP GET keyed by coordinates.

use async_trait::async_trait;
use serde::Deserialize;

/// A normalized current-conditions reading with unit strings.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub temperature: f64,
    pub temperature_units: String,
    pub wind_speed: f64,
    pub wind_speed_units: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn current(&self, lat: f64, lng: f64) -> anyhow::Result<WeatherReport>;
}

/// The open-meteo forecast endpoint.
pub struct OpenMeteo {
    http: reqwest::Client,
    base_url: String,
}

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.open-meteo.com";

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
    current_units: UnitsBlock,
}

#[derive(Deserialize)]
struct CurrentBlock {
    temperature_2m: f64,
    wind_speed_10m: f64,
}

#[derive(Deserialize)]
struct UnitsBlock {
    temperature_2m: String,
    wind_speed_10m: String,
}

impl OpenMeteo {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for OpenMeteo {
    fn default() -> Self {
        Self::new(DEFAULT_WEATHER_BASE_URL)
    }
}

#[async_trait]
impl WeatherApi for OpenMeteo {
    async fn current(&self, lat: f64, lng: f64) -> anyhow::Result<WeatherReport> {
        let url = format!(
            "{}/v1/forecast?latitude={lat}&longitude={lng}&current=temperature_2m,wind_speed_10m",
            self.base_url
        );
        let response: ForecastResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(WeatherReport {
            temperature: response.current.temperature_2m,
            temperature_units: response.current_units.temperature_2m,
            wind_speed: response.current.wind_speed_10m,
            wind_speed_units: response.current_units.wind_speed_10m,
        })
    }
}
