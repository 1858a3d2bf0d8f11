//! Weather context enrichment.
//!
//! Fetches the current conditions for the configured city at detection
//! time. Lookup failures never block a detection record: HTTP "not found"
//! and "unauthorized" responses, transport errors and malformed bodies all
//! degrade to the all-None report with a warning.

use std::time::Duration;

use serde::Deserialize;

const KELVIN_OFFSET: f64 = 273.15;

/// Conditions at detection time. All fields absent when the lookup failed
/// or the service is disabled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeatherReport {
    /// Celsius, rounded to 0.1.
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwmResponse {
    main: OwmMain,
    weather: Vec<OwmConditions>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    /// Kelvin.
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct OwmConditions {
    description: String,
}

/// OpenWeatherMap client. Disabled (always all-None) without an API key.
pub struct WeatherService {
    agent: ureq::Agent,
    base_url: String,
    city: String,
    api_key: Option<String>,
}

impl WeatherService {
    pub fn new(base_url: &str, city: &str, api_key: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build();
        Self {
            agent,
            base_url: base_url.to_string(),
            city: city.to_string(),
            api_key,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Current conditions, or the all-None report on any failure.
    pub fn fetch(&self) -> WeatherReport {
        let Some(api_key) = &self.api_key else {
            log::debug!("weather lookup disabled (no api key)");
            return WeatherReport::default();
        };

        let url = format!("{}?appid={}&q={}", self.base_url, api_key, self.city);
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(401, _)) => {
                log::warn!("weather lookup unauthorized; check the api key");
                return WeatherReport::default();
            }
            Err(ureq::Error::Status(404, _)) => {
                log::warn!("weather lookup: city '{}' not found", self.city);
                return WeatherReport::default();
            }
            Err(e) => {
                log::warn!("weather lookup failed: {}", e);
                return WeatherReport::default();
            }
        };

        match response.into_string() {
            Ok(body) => parse_report(&body).unwrap_or_else(|e| {
                log::warn!("weather response malformed: {}", e);
                WeatherReport::default()
            }),
            Err(e) => {
                log::warn!("weather response unreadable: {}", e);
                WeatherReport::default()
            }
        }
    }
}

fn parse_report(body: &str) -> Result<WeatherReport, serde_json::Error> {
    let parsed: OwmResponse = serde_json::from_str(body)?;
    let celsius = ((parsed.main.temp - KELVIN_OFFSET) * 10.0).round() / 10.0;
    Ok(WeatherReport {
        temperature: Some(celsius),
        humidity: Some(parsed.main.humidity),
        description: parsed.weather.first().map(|w| w.description.clone()),
    })
}
