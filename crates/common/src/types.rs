//! Domain types shared across the briefing crates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ── Sources ───────────────────────────────────────────────────────────

/// Identifier of one upstream contribution to a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Metar,
    Taf,
    Forecast,
    Maps,
    Ai,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::Metar,
        SourceId::Taf,
        SourceId::Forecast,
        SourceId::Maps,
        SourceId::Ai,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceId::Metar => "metar",
            SourceId::Taf => "taf",
            SourceId::Forecast => "forecast",
            SourceId::Maps => "maps",
            SourceId::Ai => "ai",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Refresh cycles ────────────────────────────────────────────────────

/// Cache key of a refresh slot: the local date plus the slot's time of day.
///
/// Ordering is chronological, so the newest cycle is the maximum key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleKey {
    pub date: NaiveDate,
    pub slot: NaiveTime,
}

impl CycleKey {
    pub fn new(date: NaiveDate, slot: NaiveTime) -> Self {
        Self { date, slot }
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date.format("%Y-%m-%d"), self.slot.format("%H:%M"))
    }
}

/// A scheduled refresh slot resolved against the configured timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshCycle {
    pub key: CycleKey,
    /// Wall-clock instant the slot starts, in UTC.
    pub scheduled_at: DateTime<Utc>,
    /// Local slot label, e.g. "06:00".
    pub window_label: String,
}

// ── METAR ─────────────────────────────────────────────────────────────

/// Flight rules category derived from ceiling and visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
}

impl fmt::Display for FlightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlightCategory::Vfr => "VFR",
            FlightCategory::Mvfr => "MVFR",
            FlightCategory::Ifr => "IFR",
            FlightCategory::Lifr => "LIFR",
        };
        f.write_str(label)
    }
}

// ── Forecast ──────────────────────────────────────────────────────────

/// One hourly forecast step, in local time of the airfield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    /// Local ISO time as reported by the forecast provider ("2026-02-13T10:00").
    pub time: String,
    pub temperature_c: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub wind_gust_kmh: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub precipitation_probability_pct: Option<f64>,
    pub visibility_km: Option<f64>,
    pub weather_code: Option<u32>,
}

/// Per-day aggregate of the forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: String,
    pub temp_min_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub wind_max_kmh: Option<f64>,
    pub wind_gust_max_kmh: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
    pub weather_code: Option<u32>,
}

/// Model "current conditions" at the airfield position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    /// Local ISO time as reported by the forecast provider ("2026-02-13T10:15").
    pub time: String,
    pub observed_at: Option<DateTime<Utc>>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub wind_gust_kmh: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub weather_code: Option<u32>,
}

/// Ordered forecast records. Empty when the forecast source failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentConditions>,
    pub hourly: Vec<HourlyRecord>,
    pub daily: Vec<DailySummary>,
}

impl ForecastSeries {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.hourly.is_empty() && self.daily.is_empty()
    }
}

// ── Operating windows ─────────────────────────────────────────────────

/// Opening-hours season of the airfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    /// April to September.
    Summer,
    Winter,
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Season::Summer => "summer",
            Season::Winter => "winter",
        })
    }
}

/// Local time span, start before end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Opening hours of one forecast day and the part of them best suited to flying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub season: Season,
    pub opening: TimeRange,
    /// `None` when daylight leaves no clear window inside the opening hours.
    pub suggested: Option<TimeRange>,
}

// ── Bundle ────────────────────────────────────────────────────────────

/// The aggregated result of one refresh. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Cycle this bundle was built for.
    pub cycle: CycleKey,
    /// ICAO of the airfield the briefing is for.
    pub airfield: String,
    /// Station whose METAR/TAF is reported.
    pub metar_station: String,
    pub metar_text: Option<String>,
    pub taf_text: Option<String>,
    pub flight_category: Option<FlightCategory>,
    /// Unofficial METAR for the airfield itself, estimated from model current conditions.
    #[serde(default)]
    pub synthetic_metar: Option<String>,
    pub forecast_series: ForecastSeries,
    #[serde(default)]
    pub day_windows: Vec<DayWindow>,
    /// Day offset (0 = cycle date) → map image URL.
    pub map_urls: BTreeMap<u32, String>,
    pub ai_narrative: Option<String>,
    pub ai_model: Option<String>,
    /// Plain digest of the raw data, always present.
    pub basic_summary: String,
    pub built_at: DateTime<Utc>,
    pub source_errors: BTreeSet<SourceId>,
    /// True when this bundle is older than the cycle it was served for.
    #[serde(default)]
    pub stale: bool,
    /// Cycle the stale bundle was served for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_for: Option<CycleKey>,
}

impl Bundle {
    /// Whether any raw data section is populated.
    pub fn has_data(&self) -> bool {
        self.metar_text.is_some() || self.taf_text.is_some() || !self.forecast_series.is_empty()
    }

    /// Copy of this bundle annotated as served for a newer `current` cycle
    /// after `errors` prevented a fresh build.
    pub fn served_stale(&self, current: CycleKey, errors: &BTreeSet<SourceId>) -> Bundle {
        let mut copy = self.clone();
        copy.stale = true;
        copy.served_for = Some(current);
        copy.source_errors.extend(errors.iter().copied());
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(date: &str, slot: &str) -> CycleKey {
        CycleKey::new(
            NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid date"),
            NaiveTime::parse_from_str(slot, "%H:%M").expect("valid time"),
        )
    }

    #[test]
    fn test_cycle_key_display_and_order() {
        let morning = key("2026-03-01", "06:00");
        let evening = key("2026-03-01", "23:00");
        let next_day = key("2026-03-02", "06:00");

        assert_eq!(morning.to_string(), "2026-03-01T06:00");
        assert!(morning < evening);
        assert!(evening < next_day);
    }

    #[test]
    fn test_source_id_serializes_snake_case() {
        let json = serde_json::to_string(&SourceId::Forecast).expect("serializes");
        assert_eq!(json, "\"forecast\"");
        assert_eq!(SourceId::Ai.to_string(), "ai");
    }

    #[test]
    fn test_time_range_and_season_labels() {
        let range = TimeRange {
            start: NaiveTime::from_hms_opt(10, 31, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(16, 49, 0).expect("valid time"),
        };
        assert_eq!(range.to_string(), "10:31-16:49");
        assert_eq!(Season::Winter.to_string(), "winter");
        assert_eq!(serde_json::to_string(&Season::Summer).expect("serializes"), "\"summer\"");
    }

    #[test]
    fn test_served_stale_merges_errors() {
        let bundle = Bundle {
            cycle: key("2026-03-01", "06:00"),
            airfield: "LEMR".into(),
            metar_station: "LEAS".into(),
            metar_text: Some("LEAS 010600Z 27010KT CAVOK 12/08 Q1018".into()),
            taf_text: None,
            flight_category: Some(FlightCategory::Vfr),
            synthetic_metar: None,
            forecast_series: ForecastSeries::default(),
            day_windows: Vec::new(),
            map_urls: BTreeMap::new(),
            ai_narrative: None,
            ai_model: None,
            basic_summary: String::new(),
            built_at: Utc::now(),
            source_errors: BTreeSet::from([SourceId::Taf]),
            stale: false,
            served_for: None,
        };

        let current = key("2026-03-01", "07:00");
        let errors = BTreeSet::from([SourceId::Metar, SourceId::Forecast]);
        let served = bundle.served_stale(current, &errors);

        assert!(served.stale);
        assert_eq!(served.served_for, Some(current));
        assert_eq!(served.cycle, bundle.cycle);
        assert_eq!(
            served.source_errors,
            BTreeSet::from([SourceId::Metar, SourceId::Taf, SourceId::Forecast])
        );
        assert!(!bundle.stale, "original must not be mutated");
    }
}
