//! National Weather Service tools: `get_forecast` and `get_alerts`.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{format_number, ToolContext};
use crate::discovery::{Registrar, ToolModule};
use crate::error::ToolError;
use crate::registry::{Arguments, ContentItem, InputSchema, ToolHandler};

/// The `weather` tool module.
pub struct WeatherModule;

impl ToolModule for WeatherModule {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn register(&self, ctx: &ToolContext, registrar: &mut Registrar<'_>) {
        let client = Arc::new(NwsClient {
            http: ctx.http.clone(),
            api_base: ctx.config.weather.api_base.trim_end_matches('/').to_string(),
            user_agent: ctx.config.weather.user_agent.clone(),
        });
        registrar.register(Arc::new(ForecastTool {
            client: Arc::clone(&client),
        }));
        registrar.register(Arc::new(AlertsTool { client }));
    }
}

struct NwsClient {
    http: reqwest::Client,
    api_base: String,
    user_agent: String,
}

impl NwsClient {
    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ToolError> {
        tracing::debug!(url, "NWS request");
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/geo+json")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    #[serde(default)]
    properties: PointProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointProperties {
    forecast: Option<String>,
    relative_location: Option<RelativeLocation>,
}

#[derive(Debug, Deserialize)]
struct RelativeLocation {
    #[serde(default)]
    properties: LocationProperties,
}

#[derive(Debug, Default, Deserialize)]
struct LocationProperties {
    city: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    properties: ForecastProperties,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Period {
    name: Option<String>,
    temperature: Option<f64>,
    temperature_unit: Option<String>,
    wind_speed: Option<String>,
    wind_direction: Option<String>,
    detailed_forecast: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    #[serde(default)]
    properties: AlertProperties,
}

#[derive(Debug, Default, Deserialize)]
struct AlertProperties {
    event: Option<String>,
    headline: Option<String>,
    description: Option<String>,
    instruction: Option<String>,
    severity: Option<String>,
    effective: Option<String>,
    expires: Option<String>,
}

/// Forecast for a coordinate.
struct ForecastTool {
    client: Arc<NwsClient>,
}

#[async_trait]
impl ToolHandler for ForecastTool {
    fn name(&self) -> &'static str {
        "get_forecast"
    }

    fn description(&self) -> &'static str {
        "Get the weather forecast for a location in the United States"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .required("latitude", "number", "Latitude of the location")
            .required("longitude", "number", "Longitude of the location")
            .optional("days", "number", "Number of days to forecast (default: 3)")
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let latitude = arguments.require_f64("latitude")?;
        let longitude = arguments.require_f64("longitude")?;
        let days = arguments.optional_u64("days")?.unwrap_or(3);

        let points: PointsResponse = self
            .client
            .get(&format!(
                "{}/points/{latitude:.4},{longitude:.4}",
                self.client.api_base
            ))
            .await?;
        let Some(forecast_url) = points.properties.forecast.as_deref() else {
            return Err(ToolError::Failed(
                "No forecast is available for this location; check the coordinates".to_string(),
            ));
        };
        let forecast: ForecastResponse = self.client.get(forecast_url).await?;

        Ok(vec![ContentItem::text(format_forecast(
            &points.properties,
            forecast.properties.periods,
            latitude,
            longitude,
            days,
        ))])
    }
}

fn format_forecast(
    point: &PointProperties,
    mut periods: Vec<Period>,
    latitude: f64,
    longitude: f64,
    days: u64,
) -> String {
    if days > 0 {
        periods.truncate(usize::try_from(days.saturating_mul(2)).unwrap_or(usize::MAX));
    }
    if periods.is_empty() {
        return "No forecast periods found".to_string();
    }

    let location = point
        .relative_location
        .as_ref()
        .map(|l| &l.properties);
    let city = location
        .and_then(|l| l.city.as_deref())
        .unwrap_or("Unknown city");
    let state = location
        .and_then(|l| l.state.as_deref())
        .unwrap_or("Unknown state");

    let mut out = format!("📍 {city}, {state} ({latitude:.4}, {longitude:.4}) forecast:\n\n");
    for period in &periods {
        let temperature = match (period.temperature, period.temperature_unit.as_deref()) {
            (Some(t), Some("F") | None) => {
                format!("{}°F ({:.1}°C)", format_number(t), (t - 32.0) * 5.0 / 9.0)
            }
            (Some(t), Some(unit)) => format!("{}°{unit}", format_number(t)),
            (None, _) => "unknown".to_string(),
        };
        let _ = write!(
            out,
            "⏰ {}:\n🌡️ Temperature: {temperature}\n💨 Wind: {} {}\n📝 {}\n\n",
            period.name.as_deref().unwrap_or("Unknown period"),
            period.wind_speed.as_deref().unwrap_or("unknown"),
            period.wind_direction.as_deref().unwrap_or(""),
            period
                .detailed_forecast
                .as_deref()
                .unwrap_or("No detailed forecast"),
        );
    }
    out
}

/// Active alerts for a state.
struct AlertsTool {
    client: Arc<NwsClient>,
}

#[async_trait]
impl ToolHandler for AlertsTool {
    fn name(&self) -> &'static str {
        "get_alerts"
    }

    fn description(&self) -> &'static str {
        "Get active weather alerts for a US state"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .required("state", "string", "Two-letter US state code, e.g. 'CA'")
            .optional("limit", "integer", "Maximum number of alerts (default: 5)")
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let state = normalise_state(arguments.require_str("state")?)?;
        let limit = arguments.optional_u64("limit")?.unwrap_or(5);

        let alerts: AlertsResponse = self
            .client
            .get(&format!(
                "{}/alerts/active/area/{state}",
                self.client.api_base
            ))
            .await?;

        Ok(vec![ContentItem::text(format_alerts(
            &state,
            &alerts.features,
            limit,
        ))])
    }
}

fn normalise_state(state: &str) -> Result<String, ToolError> {
    let state = state.trim().to_uppercase();
    if state.len() == 2 && state.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(state)
    } else {
        Err(ToolError::invalid(
            "state",
            "must be a two-letter state code, e.g. 'CA'",
        ))
    }
}

fn format_alerts(state: &str, features: &[AlertFeature], limit: u64) -> String {
    if features.is_empty() {
        return format!("🌈 No active weather alerts for {state}.");
    }
    let shown = if limit > 0 {
        &features[..features.len().min(usize::try_from(limit).unwrap_or(usize::MAX))]
    } else {
        features
    };

    let mut out = format!("⚠️ Active weather alerts for {state} ({}):\n\n", shown.len());
    for (i, feature) in shown.iter().enumerate() {
        let _ = writeln!(out, "--- Alert {} ---", i + 1);
        out.push_str(&format_alert(&feature.properties));
        out.push('\n');
    }
    if shown.len() < features.len() {
        let _ = write!(
            out,
            "\n(Showing the first {} of {} active alerts)",
            shown.len(),
            features.len()
        );
    }
    out
}

fn format_alert(alert: &AlertProperties) -> String {
    let mut out = format!(
        "⚠️ {} ({})\n📰 {}\n⏱️ Effective: {}\n⌛ Expires: {}\n📝 Description:\n{}\n",
        alert.event.as_deref().unwrap_or("Unknown event"),
        alert.severity.as_deref().unwrap_or("Unknown"),
        alert.headline.as_deref().unwrap_or("No headline"),
        format_timestamp(alert.effective.as_deref()),
        format_timestamp(alert.expires.as_deref()),
        ellipsize(alert.description.as_deref().unwrap_or("No description"), 500),
    );
    if let Some(instruction) = alert.instruction.as_deref().filter(|i| !i.is_empty()) {
        let _ = writeln!(out, "🔔 Instructions:\n{}", ellipsize(instruction, 300));
    }
    out
}

/// Renders an RFC 3339 timestamp as `YYYY-MM-DD HH:MM:SS` in its own offset.
fn format_timestamp(raw: Option<&str>) -> String {
    match raw {
        None => "unknown".to_string(),
        Some(raw) => DateTime::parse_from_rfc3339(raw).map_or_else(
            |_| raw.to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        ),
    }
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn periods(count: usize) -> Vec<Period> {
        let raw: Vec<_> = (0..count)
            .map(|i| {
                json!({
                    "name": format!("Period {i}"),
                    "temperature": 50,
                    "temperatureUnit": "F",
                    "windSpeed": "5 mph",
                    "windDirection": "NW",
                    "detailedForecast": "Sunny."
                })
            })
            .collect();
        serde_json::from_value(json!(raw)).unwrap()
    }

    #[test]
    fn forecast_shows_two_periods_per_day_in_both_units() {
        let point: PointProperties = serde_json::from_value(json!({
            "forecast": "https://api.weather.gov/gridpoints/MTR/1,1/forecast",
            "relativeLocation": {"properties": {"city": "San Francisco", "state": "CA"}}
        }))
        .unwrap();

        let text = format_forecast(&point, periods(10), 37.7749, -122.4194, 2);
        assert!(text.starts_with("📍 San Francisco, CA (37.7749, -122.4194) forecast:"));
        assert!(text.contains("Period 3"));
        assert!(!text.contains("Period 4"));
        assert!(text.contains("50°F (10.0°C)"));
        assert!(text.contains("💨 Wind: 5 mph NW"));
    }

    #[test]
    fn forecast_without_periods() {
        let text = format_forecast(&PointProperties::default(), Vec::new(), 0.0, 0.0, 3);
        assert_eq!(text, "No forecast periods found");
    }

    #[test]
    fn state_codes_are_upper_cased_and_validated() {
        assert_eq!(normalise_state(" ca ").unwrap(), "CA");
        assert!(normalise_state("California").is_err());
        assert!(normalise_state("C1").is_err());
    }

    #[test]
    fn alerts_are_limited_and_timestamps_reformatted() {
        let response: AlertsResponse = serde_json::from_value(json!({
            "features": [
                {"properties": {
                    "event": "Flood Warning",
                    "severity": "Severe",
                    "headline": "Flooding expected",
                    "description": "x".repeat(600),
                    "instruction": "Move to higher ground.",
                    "effective": "2024-03-01T10:15:00-08:00",
                    "expires": "not a date"
                }},
                {"properties": {}},
                {"properties": {}}
            ]
        }))
        .unwrap();

        let text = format_alerts("CA", &response.features, 2);
        assert!(text.starts_with("⚠️ Active weather alerts for CA (2):"));
        assert!(text.contains("⏱️ Effective: 2024-03-01 10:15:00"));
        assert!(text.contains("⌛ Expires: not a date"));
        assert!(text.contains(&format!("{}...", "x".repeat(500))));
        assert!(text.contains("🔔 Instructions:\nMove to higher ground."));
        assert!(text.contains("--- Alert 2 ---"));
        assert!(!text.contains("--- Alert 3 ---"));
        assert!(text.ends_with("(Showing the first 2 of 3 active alerts)"));
    }

    #[test]
    fn no_alerts() {
        assert_eq!(
            format_alerts("TX", &[], 5),
            "🌈 No active weather alerts for TX."
        );
    }
}
