//! Weather lookup tool backed by open-meteo
//!
//! Failures never escape this tool: every upstream problem is turned into a
//! sentence the model can read back to the user.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use crate::Result;
use crate::config::WeatherConfig;
use crate::error::Error;
use super::{Tool, ToolRole};

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code";

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<Location>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Location {
    name: String,
    #[serde(default)]
    country: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentWeather>,
}

#[derive(Debug, Clone, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: u32,
}

enum Lookup {
    Report(String),
    NoLocation,
}

/// Map a WMO weather code to a description
pub fn describe_weather_code(code: u32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow",
        73 => "Moderate snow",
        75 => "Heavy snow",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

fn format_report(location: &Location, current: &CurrentWeather) -> String {
    format!(
        "Current weather in {}, {}: {}°C, {}. Humidity: {}%, Wind Speed: {} km/h",
        location.name,
        location.country,
        current.temperature_2m,
        describe_weather_code(current.weather_code),
        current.relative_humidity_2m,
        current.wind_speed_10m
    )
}

/// Fallback when a city cannot be resolved
pub fn no_location_message(city: &str) -> String {
    format!("No location found for {}. Please check the city name and try again.", city)
}

/// Fallback for every other upstream failure
pub fn unavailable_message(city: &str) -> String {
    format!("Weather information for {} is currently unavailable. Please try again later.", city)
}

/// Current weather for a city
pub struct WeatherTool {
    client: Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherTool {
    pub fn new(config: &WeatherConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            geocoding_url: config.geocoding_url.clone(),
            forecast_url: config.forecast_url.clone(),
        }
    }

    /// Always returns a presentable string
    pub async fn report(&self, city: &str) -> String {
        match self.fetch(city).await {
            Ok(Lookup::Report(report)) => report,
            Ok(Lookup::NoLocation) => {
                warn!("No location found for: {}", city);
                no_location_message(city)
            }
            Err(e) => {
                warn!("Weather lookup for {} failed: {}", city, e);
                unavailable_message(city)
            }
        }
    }

    async fn fetch(&self, city: &str) -> Result<Lookup> {
        let geocode: GeocodingResponse = self.client
            .get(&self.geocoding_url)
            .query(&[("name", city)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let location = match geocode.results.and_then(|r| r.into_iter().next()) {
            Some(location) => location,
            None => return Ok(Lookup::NoLocation),
        };
        debug!("Found location: {}, {}", location.name, location.country);

        let mut query = vec![
            ("latitude", location.latitude.to_string()),
            ("longitude", location.longitude.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
        ];
        if let Some(tz) = &location.timezone {
            query.push(("timezone", tz.clone()));
        }

        let forecast: ForecastResponse = self.client
            .get(&self.forecast_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let current = forecast.current
            .ok_or_else(|| Error::Tool("forecast response has no current conditions".to_string()))?;

        Ok(Lookup::Report(format_report(&location, &current)))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str { "lookup_weather" }
    fn description(&self) -> &str { "Get the current weather conditions for a city" }
    fn argument(&self) -> &str { "city" }
    fn argument_description(&self) -> &str { "City name, e.g. Paris" }
    fn role(&self) -> ToolRole { ToolRole::Lookup }

    async fn execute(&self, params: Value) -> Result<String> {
        let city = params.get("city")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Tool("Missing 'city' parameter".to_string()))?;

        Ok(self.report(city).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `body` as JSON to every request; returns the base URL
    async fn serve_json(body: Value) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = body.to_string();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{}/v1", addr)
    }

    fn tool(geocoding_url: String, forecast_url: String) -> WeatherTool {
        WeatherTool::new(&WeatherConfig { geocoding_url, forecast_url })
    }

    #[tokio::test]
    async fn test_report_for_known_city() {
        let geo = serve_json(json!({"results": [{
            "name": "Paris", "country": "France",
            "latitude": 48.85, "longitude": 2.35, "timezone": "Europe/Paris"
        }]})).await;
        let forecast = serve_json(json!({"current": {
            "temperature_2m": 18.5, "relative_humidity_2m": 60,
            "wind_speed_10m": 12.1, "weather_code": 2
        }})).await;

        let out = tool(geo, forecast).execute(json!({"city": "Paris"})).await.unwrap();
        assert_eq!(
            out,
            "Current weather in Paris, France: 18.5°C, Partly cloudy. Humidity: 60%, Wind Speed: 12.1 km/h"
        );
    }

    #[tokio::test]
    async fn test_no_location_is_stable_fallback() {
        let geo = serve_json(json!({"generationtime_ms": 0.5})).await;
        let weather = tool(geo, "http://127.0.0.1:1/unused".to_string());

        let first = weather.report("Atlantis").await;
        let second = weather.report("Atlantis").await;
        assert_eq!(first, no_location_message("Atlantis"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_network_failure_is_soft() {
        let weather = tool("http://127.0.0.1:1/geo".to_string(), "http://127.0.0.1:1/fc".to_string());
        let out = weather.execute(json!({"city": "Paris"})).await.unwrap();
        assert_eq!(out, unavailable_message("Paris"));
    }

    #[tokio::test]
    async fn test_malformed_forecast_is_soft() {
        let geo = serve_json(json!({"results": [{"name": "Oslo", "country": "Norway", "latitude": 59.9, "longitude": 10.7}]})).await;
        let forecast = serve_json(json!({"hourly": {}})).await;
        let out = tool(geo, forecast).report("Oslo").await;
        assert_eq!(out, unavailable_message("Oslo"));
    }

    #[test]
    fn test_weather_codes() {
        assert_eq!(describe_weather_code(0), "Clear sky");
        assert_eq!(describe_weather_code(99), "Thunderstorm with heavy hail");
        assert_eq!(describe_weather_code(42), "Unknown");
    }
}
