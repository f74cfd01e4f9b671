//! Bundle assembly. No I/O happens here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{Bundle, CycleKey, DayWindow, Error, ForecastSeries, SourceId};
use llm_client::AnalysisOutcome;
use metar_client::{classify_flight_category, synthetic_metar};

use crate::operations::day_windows;

const KMH_PER_KT: f64 = 1.852;

/// Everything fetched for one cycle.
#[derive(Debug)]
pub struct BundleInputs {
    pub cycle: CycleKey,
    pub airfield_name: String,
    pub airfield: String,
    pub elevation_m: f64,
    pub metar_station: String,
    pub metar: Result<String, Error>,
    pub taf: Result<String, Error>,
    pub forecast: Result<ForecastSeries, Error>,
    pub map_template: String,
    pub map_days: u32,
    /// `None` when the AI step was not run.
    pub analysis: Option<AnalysisOutcome>,
}

impl BundleInputs {
    /// Sources whose fetch failed, AI included.
    pub fn failed_sources(&self) -> BTreeSet<SourceId> {
        let mut failed = BTreeSet::new();
        if self.metar.is_err() {
            failed.insert(SourceId::Metar);
        }
        if self.taf.is_err() {
            failed.insert(SourceId::Taf);
        }
        if self.forecast.is_err() {
            failed.insert(SourceId::Forecast);
        }
        if self.analysis.as_ref().and_then(AnalysisOutcome::narrative).is_none() {
            failed.insert(SourceId::Ai);
        }
        failed
    }

    /// METAR and forecast both failed: nothing worth publishing.
    pub fn is_total_failure(&self) -> bool {
        self.metar.is_err() && self.forecast.is_err()
    }

    /// Estimated METAR for the airfield from the forecast's current conditions.
    pub fn synthetic_metar(&self) -> Option<String> {
        let current = self.forecast.as_ref().ok()?.current.as_ref()?;
        synthetic_metar(current, &self.airfield, self.elevation_m)
    }

    pub fn day_windows(&self) -> Vec<DayWindow> {
        self.forecast
            .as_ref()
            .map(|series| day_windows(&series.daily))
            .unwrap_or_default()
    }
}

/// Merge fetched data into a bundle. Identical inputs give identical
/// bundles apart from `built_at`.
pub fn build_bundle(inputs: &BundleInputs, built_at: DateTime<Utc>) -> Bundle {
    let metar_text = inputs.metar.as_ref().ok().cloned();
    let taf_text = inputs.taf.as_ref().ok().cloned();
    let forecast_series = inputs.forecast.as_ref().ok().cloned().unwrap_or_default();
    let flight_category = metar_text.as_deref().and_then(classify_flight_category);
    let map_urls = map_urls(&inputs.map_template, inputs.cycle.date, inputs.map_days);

    let (ai_narrative, ai_model) = match &inputs.analysis {
        Some(outcome) => (
            outcome.narrative().map(str::to_string),
            outcome.model_id().map(str::to_string),
        ),
        None => (None, None),
    };

    let mut bundle = Bundle {
        cycle: inputs.cycle,
        airfield: inputs.airfield.clone(),
        metar_station: inputs.metar_station.clone(),
        metar_text,
        taf_text,
        flight_category,
        synthetic_metar: inputs.synthetic_metar(),
        forecast_series,
        day_windows: inputs.day_windows(),
        map_urls,
        ai_narrative,
        ai_model,
        basic_summary: String::new(),
        built_at,
        source_errors: inputs.failed_sources(),
        stale: false,
        served_for: None,
    };
    bundle.basic_summary = basic_summary(&inputs.airfield_name, &bundle);
    bundle
}

/// Bundle for a cycle nothing has been fetched for yet.
pub fn placeholder_bundle(
    cycle: CycleKey,
    airfield_name: &str,
    airfield: &str,
    metar_station: &str,
    built_at: DateTime<Utc>,
) -> Bundle {
    let mut bundle = Bundle {
        cycle,
        airfield: airfield.to_string(),
        metar_station: metar_station.to_string(),
        metar_text: None,
        taf_text: None,
        flight_category: None,
        synthetic_metar: None,
        forecast_series: ForecastSeries::default(),
        day_windows: Vec::new(),
        map_urls: BTreeMap::new(),
        ai_narrative: None,
        ai_model: None,
        basic_summary: String::new(),
        built_at,
        source_errors: SourceId::ALL.into_iter().collect(),
        stale: false,
        served_for: None,
    };
    bundle.basic_summary = basic_summary(airfield_name, &bundle);
    bundle
}

/// Map URLs for day offsets `0..days` starting at `date`; `{date}` expands to `YYYYMMDD`.
pub fn map_urls(template: &str, date: NaiveDate, days: u32) -> BTreeMap<u32, String> {
    if template.is_empty() {
        return BTreeMap::new();
    }
    (0..days)
        .map(|offset| {
            let day = date + Duration::days(i64::from(offset));
            (offset, template.replace("{date}", &day.format("%Y%m%d").to_string()))
        })
        .collect()
}

/// Plain-text digest of the raw data. Shown when no narrative is available.
pub fn basic_summary(airfield_name: &str, bundle: &Bundle) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({}), cycle {}", airfield_name, bundle.airfield, bundle.cycle);

    match (&bundle.metar_text, bundle.flight_category) {
        (Some(metar), Some(category)) => {
            let _ = writeln!(out, "METAR {}: {} [{}]", bundle.metar_station, metar, category);
        }
        (Some(metar), None) => {
            let _ = writeln!(out, "METAR {}: {}", bundle.metar_station, metar);
        }
        (None, _) => {
            let _ = writeln!(out, "METAR {}: not available", bundle.metar_station);
        }
    }

    if bundle.taf_text.is_some() {
        let _ = writeln!(out, "TAF {}: available", bundle.metar_station);
    }

    if let Some(estimated) = &bundle.synthetic_metar {
        let _ = writeln!(out, "Estimated METAR {} (unofficial): {}", bundle.airfield, estimated);
    }

    for day in bundle.forecast_series.daily.iter().take(3) {
        let _ = write!(out, "{}:", day.date);
        if let (Some(min), Some(max)) = (day.temp_min_c, day.temp_max_c) {
            let _ = write!(out, " {min:.0}..{max:.0} °C");
        }
        if let Some(wind) = day.wind_max_kmh {
            let _ = write!(out, ", wind max {:.0} km/h ({:.0} kt)", wind, wind / KMH_PER_KT);
        }
        if let Some(gust) = day.wind_gust_max_kmh {
            let _ = write!(out, ", gusts {:.0} km/h ({:.0} kt)", gust, gust / KMH_PER_KT);
        }
        if let Some(precip) = day.precipitation_mm {
            let _ = write!(out, ", precip {precip:.1} mm");
        }
        let window = bundle
            .day_windows
            .iter()
            .find(|w| w.date.format("%Y-%m-%d").to_string() == day.date);
        if let Some(window) = window {
            match window.suggested {
                Some(range) => {
                    let _ = write!(out, ", flying window {range}");
                }
                None => {
                    let _ = write!(out, ", no clear flying window (open {})", window.opening);
                }
            }
        }
        out.push('\n');
    }

    if !bundle.source_errors.is_empty() {
        let failed: Vec<&str> = bundle.source_errors.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(out, "Unavailable: {}", failed.join(", "));
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use common::{CurrentConditions, DailySummary, FlightCategory, HourlyRecord};
    use llm_client::{AttemptRecord, AttemptResult};
    use common::config::ProviderKind;

    const TEMPLATE: &str = "https://maps.example/QGQE70LEMM1800________{date}.png";

    fn key() -> CycleKey {
        CycleKey::new(
            NaiveDate::from_ymd_opt(2026, 2, 13).expect("valid date"),
            NaiveTime::from_hms_opt(6, 0, 0).expect("valid time"),
        )
    }

    fn forecast() -> ForecastSeries {
        ForecastSeries {
            current: Some(CurrentConditions {
                time: "2026-02-13T07:00".into(),
                observed_at: DateTime::parse_from_rfc3339("2026-02-13T06:00:00Z")
                    .ok()
                    .map(|t| t.with_timezone(&Utc)),
                temperature_c: Some(7.5),
                humidity_pct: Some(85.0),
                wind_speed_kmh: Some(11.0),
                wind_direction_deg: Some(240.0),
                wind_gust_kmh: Some(24.0),
                pressure_hpa: Some(1022.2),
                cloud_cover_pct: Some(20.0),
                precipitation_mm: Some(0.0),
                weather_code: Some(1),
            }),
            hourly: vec![HourlyRecord {
                time: "2026-02-13T07:00".into(),
                temperature_c: Some(7.5),
                wind_speed_kmh: Some(11.0),
                wind_direction_deg: Some(240.0),
                wind_gust_kmh: Some(24.0),
                cloud_cover_pct: Some(20.0),
                precipitation_probability_pct: Some(5.0),
                visibility_km: Some(30.0),
                weather_code: Some(1),
            }],
            daily: vec![DailySummary {
                date: "2026-02-13".into(),
                temp_min_c: Some(4.0),
                temp_max_c: Some(15.0),
                wind_max_kmh: Some(18.52),
                wind_gust_max_kmh: Some(37.04),
                precipitation_mm: Some(0.0),
                sunrise: Some("08:21".into()),
                sunset: Some("18:39".into()),
                weather_code: Some(2),
            }],
        }
    }

    fn narrative() -> AnalysisOutcome {
        AnalysisOutcome::Narrative {
            text: "APTO por la mañana".into(),
            model_id: "gpt-4o".into(),
            attempts: vec![AttemptRecord {
                model_id: "gpt-4o".into(),
                provider: ProviderKind::Github,
                result: AttemptResult::Succeeded,
            }],
        }
    }

    fn inputs() -> BundleInputs {
        BundleInputs {
            cycle: key(),
            airfield_name: "Aeródromo de La Morgal".into(),
            airfield: "LEMR".into(),
            elevation_m: 180.0,
            metar_station: "LEAS".into(),
            metar: Ok("LEAS 130600Z 24006KT CAVOK 06/03 Q1022".into()),
            taf: Ok("TAF LEAS 130500Z 1306/1406 24008KT CAVOK".into()),
            forecast: Ok(forecast()),
            map_template: TEMPLATE.into(),
            map_days: 3,
            analysis: Some(narrative()),
        }
    }

    #[test]
    fn test_full_inputs_build_clean_bundle() {
        let bundle = build_bundle(&inputs(), Utc::now());

        assert!(bundle.source_errors.is_empty());
        assert_eq!(bundle.flight_category, Some(FlightCategory::Vfr));
        assert_eq!(bundle.ai_model.as_deref(), Some("gpt-4o"));
        assert_eq!(bundle.forecast_series.hourly.len(), 1);
        assert!(!bundle.stale);
    }

    #[test]
    fn test_build_is_idempotent_apart_from_built_at() {
        let inputs = inputs();
        let first = build_bundle(&inputs, Utc::now());
        let mut second = build_bundle(&inputs, Utc::now() + Duration::seconds(5));
        second.built_at = first.built_at;

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).expect("serializes"),
            serde_json::to_string(&second).expect("serializes")
        );
    }

    #[test]
    fn test_failed_forecast_degrades_gracefully() {
        let mut inputs = inputs();
        inputs.forecast = Err(Error::upstream(SourceId::Forecast, "HTTP 503"));

        let bundle = build_bundle(&inputs, Utc::now());

        assert!(bundle.forecast_series.is_empty());
        assert_eq!(bundle.source_errors, BTreeSet::from([SourceId::Forecast]));
        assert!(bundle.metar_text.is_some());
        assert!(bundle.ai_narrative.is_some());
        assert!(bundle.basic_summary.contains("Unavailable: forecast"));
    }

    #[test]
    fn test_missing_analysis_marks_ai_failed() {
        let mut inputs = inputs();
        inputs.analysis = Some(AnalysisOutcome::Unavailable { attempts: Vec::new() });
        let unavailable = build_bundle(&inputs, Utc::now());

        inputs.analysis = None;
        let skipped = build_bundle(&inputs, Utc::now());

        for bundle in [unavailable, skipped] {
            assert!(bundle.ai_narrative.is_none());
            assert!(bundle.source_errors.contains(&SourceId::Ai));
            assert!(bundle.basic_summary.contains("METAR LEAS: LEAS 130600Z"));
        }
    }

    #[test]
    fn test_map_urls_follow_cycle_date() {
        let urls = map_urls(TEMPLATE, key().date, 3);

        assert_eq!(urls.len(), 3);
        assert_eq!(urls[&0], "https://maps.example/QGQE70LEMM1800________20260213.png");
        assert_eq!(urls[&2], "https://maps.example/QGQE70LEMM1800________20260215.png");
        assert!(map_urls("", key().date, 3).is_empty());
    }

    #[test]
    fn test_basic_summary_converts_wind_to_knots() {
        let bundle = build_bundle(&inputs(), Utc::now());
        assert!(bundle
            .basic_summary
            .contains("2026-02-13: 4..15 °C, wind max 19 km/h (10 kt), gusts 37 km/h (20 kt)"));
        assert!(bundle.basic_summary.contains("[VFR]"));
    }

    #[test]
    fn test_bundle_carries_estimated_metar_and_windows() {
        let bundle = build_bundle(&inputs(), Utc::now());

        assert_eq!(
            bundle.synthetic_metar.as_deref(),
            Some("METAR LEMR 130600Z AUTO 24006G13KT 9999 FEW023 08/05 Q1022 NOSIG")
        );
        assert_eq!(bundle.day_windows.len(), 1);
        assert!(bundle
            .basic_summary
            .contains("Estimated METAR LEMR (unofficial): METAR LEMR 130600Z"));
        assert!(bundle.basic_summary.contains("precip 0.0 mm, flying window 10:21-16:39"));
    }

    #[test]
    fn test_failed_forecast_drops_estimated_metar() {
        let mut inputs = inputs();
        inputs.forecast = Err(Error::upstream(SourceId::Forecast, "HTTP 503"));

        let bundle = build_bundle(&inputs, Utc::now());

        assert!(bundle.synthetic_metar.is_none());
        assert!(bundle.day_windows.is_empty());
    }

    #[test]
    fn test_placeholder_marks_every_source_failed() {
        let bundle = placeholder_bundle(key(), "Aeródromo de La Morgal", "LEMR", "LEAS", Utc::now());

        assert!(!bundle.has_data());
        assert_eq!(bundle.source_errors.len(), SourceId::ALL.len());
        assert!(bundle.basic_summary.contains("METAR LEAS: not available"));
    }
}
