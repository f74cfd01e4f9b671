//! Open-Meteo forecast client.
//!
//! Fetches current conditions plus hourly and daily point forecasts and
//! converts them to the shared `ForecastSeries` format.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use common::config::UpstreamConfig;
use common::{
    body_excerpt, CurrentConditions, DailySummary, Error, ForecastSeries, HourlyRecord, SourceId,
};
use serde::Deserialize;
use tracing::debug;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,precipitation,weather_code,\
cloud_cover,pressure_msl,wind_speed_10m,wind_direction_10m,wind_gusts_10m";
const HOURLY_FIELDS: &str = "temperature_2m,precipitation_probability,weather_code,cloud_cover,\
visibility,wind_speed_10m,wind_direction_10m,wind_gusts_10m";
const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,sunrise,sunset,\
precipitation_sum,wind_speed_10m_max,wind_gusts_10m_max,weather_code";

/// Open-Meteo API client.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    url: String,
    timezone: String,
    forecast_hours: usize,
    forecast_days: u32,
}

// ── Open-Meteo response types ─────────────────────────────────────────

/// Response from `/v1/forecast`. Every column is parallel to `time`.
#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    /// Offset of the requested timezone; every `time` is local.
    #[serde(default)]
    pub utc_offset_seconds: i64,
    #[serde(default)]
    pub current: Option<CurrentValues>,
    #[serde(default)]
    pub hourly: Option<HourlyColumns>,
    #[serde(default)]
    pub daily: Option<DailyColumns>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentValues {
    #[serde(default)]
    pub time: String,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub precipitation: Option<f64>,
    pub weather_code: Option<u32>,
    pub cloud_cover: Option<f64>,
    pub pressure_msl: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub wind_direction_10m: Option<f64>,
    pub wind_gusts_10m: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct HourlyColumns {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    pub weather_code: Vec<Option<u32>>,
    #[serde(default)]
    pub cloud_cover: Vec<Option<f64>>,
    /// Metres.
    #[serde(default)]
    pub visibility: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_direction_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_gusts_10m: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct DailyColumns {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    pub sunrise: Vec<Option<String>>,
    #[serde(default)]
    pub sunset: Vec<Option<String>>,
    #[serde(default)]
    pub precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_gusts_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub weather_code: Vec<Option<u32>>,
}

// ── Implementation ────────────────────────────────────────────────────

impl OpenMeteoClient {
    pub fn new(config: &UpstreamConfig, timezone: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("failed to build Open-Meteo HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.forecast_url.clone(),
            timezone: timezone.to_string(),
            forecast_hours: config.forecast_hours,
            forecast_days: config.forecast_days,
        })
    }

    /// Fetch the raw forecast columns for a point.
    pub async fn fetch_raw(&self, lat: f64, lon: f64) -> Result<ForecastResponse, Error> {
        let query = [
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("timezone", self.timezone.clone()),
            ("forecast_days", self.forecast_days.to_string()),
        ];

        debug!("Fetching Open-Meteo forecast: {} lat={} lon={}", self.url, lat, lon);

        let resp = self
            .client
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                Error::upstream(SourceId::Forecast, format!("HTTP error for ({lat},{lon}): {e}"))
            })?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(
                SourceId::Forecast,
                format!(
                    "Open-Meteo returned {} for ({lat},{lon}): {}",
                    status,
                    body_excerpt(&body)
                ),
            ));
        }

        resp.json().await.map_err(|e| {
            Error::upstream(
                SourceId::Forecast,
                format!("JSON parse error for ({lat},{lon}): {e}"),
            )
        })
    }

    /// Fetch and convert the forecast for a point.
    pub async fn get_forecast(&self, lat: f64, lon: f64) -> Result<ForecastSeries, Error> {
        let raw = self.fetch_raw(lat, lon).await?;
        let series = to_series(&raw, self.forecast_hours)?;

        debug!(
            "Got {} hourly / {} daily forecast records for ({lat},{lon})",
            series.hourly.len(),
            series.daily.len()
        );

        Ok(series)
    }
}

fn column<T: Clone>(values: &[Option<T>], idx: usize) -> Option<T> {
    values.get(idx).cloned().flatten()
}

fn parse_local(time: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M").ok()
}

/// Local provider time to UTC using the response offset.
fn to_utc(time: &str, utc_offset_seconds: i64) -> Option<DateTime<Utc>> {
    let local = parse_local(time)?;
    let utc = local.checked_sub_signed(chrono::Duration::seconds(utc_offset_seconds))?;
    Some(Utc.from_utc_datetime(&utc))
}

fn to_current(current: &CurrentValues, utc_offset_seconds: i64) -> CurrentConditions {
    CurrentConditions {
        time: current.time.clone(),
        observed_at: to_utc(&current.time, utc_offset_seconds),
        temperature_c: current.temperature_2m,
        humidity_pct: current.relative_humidity_2m,
        wind_speed_kmh: current.wind_speed_10m,
        wind_direction_deg: current.wind_direction_10m,
        wind_gust_kmh: current.wind_gusts_10m,
        pressure_hpa: current.pressure_msl,
        cloud_cover_pct: current.cloud_cover,
        precipitation_mm: current.precipitation,
        weather_code: current.weather_code,
    }
}

/// Convert parallel columns to records. Hourly steps start at the hour of
/// the current conditions (when present) and are capped at `max_hours`.
pub fn to_series(raw: &ForecastResponse, max_hours: usize) -> Result<ForecastSeries, Error> {
    let current = raw
        .current
        .as_ref()
        .map(|c| to_current(c, raw.utc_offset_seconds));

    let first_hour = current
        .as_ref()
        .and_then(|c| parse_local(&c.time))
        .and_then(|t| t.with_minute(0));

    let hourly = raw
        .hourly
        .as_ref()
        .map(|h| {
            h.time
                .iter()
                .enumerate()
                .filter(|(_, time)| match (first_hour, parse_local(time)) {
                    (Some(first), Some(at)) => at >= first,
                    _ => true,
                })
                .take(max_hours)
                .map(|(i, time)| HourlyRecord {
                    time: time.clone(),
                    temperature_c: column(&h.temperature_2m, i),
                    wind_speed_kmh: column(&h.wind_speed_10m, i),
                    wind_direction_deg: column(&h.wind_direction_10m, i),
                    wind_gust_kmh: column(&h.wind_gusts_10m, i),
                    cloud_cover_pct: column(&h.cloud_cover, i),
                    precipitation_probability_pct: column(&h.precipitation_probability, i),
                    visibility_km: column(&h.visibility, i).map(|m| m / 1000.0),
                    weather_code: column(&h.weather_code, i),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let daily = raw
        .daily
        .as_ref()
        .map(|d| {
            d.time
                .iter()
                .enumerate()
                .map(|(i, date)| DailySummary {
                    date: date.clone(),
                    temp_min_c: column(&d.temperature_2m_min, i),
                    temp_max_c: column(&d.temperature_2m_max, i),
                    wind_max_kmh: column(&d.wind_speed_10m_max, i),
                    wind_gust_max_kmh: column(&d.wind_gusts_10m_max, i),
                    precipitation_mm: column(&d.precipitation_sum, i),
                    sunrise: column(&d.sunrise, i),
                    sunset: column(&d.sunset, i),
                    weather_code: column(&d.weather_code, i),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let series = ForecastSeries {
        current,
        hourly,
        daily,
    };
    if series.is_empty() {
        return Err(Error::upstream(
            SourceId::Forecast,
            "response contained no forecast rows",
        ));
    }

    Ok(series)
}
