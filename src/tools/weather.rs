//! `getWeatherDetails`: OpenWeather current-conditions lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::ToolError;
use crate::tools::{execution_failed, invalid_params, Tool, ToolContext, ToolName, ToolOutcome};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct WeatherParams {
    location: String,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    name: String,
    sys: ConditionsSys,
    main: ConditionsMain,
    weather: Vec<ConditionsWeather>,
    wind: ConditionsWind,
}

#[derive(Debug, Deserialize)]
struct ConditionsSys {
    country: String,
}

#[derive(Debug, Deserialize)]
struct ConditionsMain {
    temp: f64,
    feels_like: f64,
    humidity: f64,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct ConditionsWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ConditionsWind {
    speed: f64,
}

fn summarize(conditions: &CurrentConditions) -> serde_json::Value {
    json!({
        "location": conditions.name,
        "country": conditions.sys.country,
        "temperature": conditions.main.temp,
        "feelsLike": conditions.main.feels_like,
        "humidity": conditions.main.humidity,
        "description": conditions
            .weather
            .first()
            .map(|w| w.description.as_str())
            .unwrap_or(""),
        "windSpeed": conditions.wind.speed,
        "pressure": conditions.main.pressure,
    })
}

pub struct WeatherTool {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl WeatherTool {
    pub fn new(base_url: Url, api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> ToolName {
        ToolName::GetWeatherDetails
    }

    fn description(&self) -> &str {
        "Get current weather information for a specific location. Use this tool when users ask about temperature, weather conditions, humidity, wind, or any weather-related information for a city."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name or location (e.g., 'New York', 'London', 'Hyderabad')"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let parsed: WeatherParams = serde_json::from_value(params)
            .map_err(|e| invalid_params(self.name(), e.to_string()))?;
        let location = parsed.location.trim();
        if location.is_empty() {
            return Err(invalid_params(self.name(), "location must not be empty"));
        }
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            execution_failed(self.name(), "OpenWeather API key not configured")
        })?;

        let base = self.base_url.as_str().trim_end_matches('/');
        let url = Url::parse(&format!("{base}/weather"))
            .map_err(|e| execution_failed(self.name(), e.to_string()))?;
        let response = self
            .client
            .get(url)
            .query(&[
                ("q", location),
                ("appid", api_key.expose_secret()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| execution_failed(self.name(), e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(execution_failed(
                self.name(),
                format!(
                    "Location \"{location}\" not found. Please check the spelling or try a more specific city name (e.g., \"Hyderabad, India\" instead of \"hyd\")"
                ),
            )),
            StatusCode::UNAUTHORIZED => Err(execution_failed(
                self.name(),
                "Weather API authentication failed. Please check the API key configuration.",
            )),
            status if !status.is_success() => Err(execution_failed(
                self.name(),
                format!("Weather API error: {status}"),
            )),
            _ => {
                let conditions: CurrentConditions = response
                    .json()
                    .await
                    .map_err(|e| execution_failed(self.name(), e.to_string()))?;
                Ok(ToolOutcome::Completed(summarize(&conditions)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_current_conditions() {
        let conditions: CurrentConditions = serde_json::from_value(json!({
            "name": "Hyderabad",
            "sys": { "country": "IN" },
            "main": { "temp": 29.4, "feels_like": 33.1, "humidity": 74.0, "pressure": 1008.0 },
            "weather": [{ "description": "light rain" }, { "description": "mist" }],
            "wind": { "speed": 3.6 }
        }))
        .expect("deserialize");

        let summary = summarize(&conditions);
        assert_eq!(summary["location"], "Hyderabad");
        assert_eq!(summary["country"], "IN");
        assert_eq!(summary["temperature"], 29.4);
        assert_eq!(summary["feelsLike"], 33.1);
        assert_eq!(summary["description"], "light rain");
        assert_eq!(summary["windSpeed"], 3.6);
        assert_eq!(summary["pressure"], 1008.0);
    }

    #[tokio::test]
    async fn missing_api_key_is_an_execution_error() {
        let tool = WeatherTool::new(Url::parse(DEFAULT_BASE_URL).expect("url"), None);
        let err = tool
            .execute(json!({"location": "London"}), &ToolContext::default())
            .await
            .expect_err("no key");
        assert!(err.to_string().contains("OpenWeather API key not configured"));
    }

    #[tokio::test]
    async fn empty_location_is_rejected_before_any_request() {
        let tool = WeatherTool::new(
            Url::parse(DEFAULT_BASE_URL).expect("url"),
            Some(SecretString::from("k")),
        );
        let err = tool
            .execute(json!({"location": "  "}), &ToolContext::default())
            .await
            .expect_err("empty location");
        assert!(err.to_string().contains("location"));
    }
}
