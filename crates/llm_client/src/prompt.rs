//! Prompt rendering for the operational narrative.
//!
//! Rendering is pure: the same context always yields the same prompt.

use std::fmt::Write as _;

use chrono::NaiveDateTime;
use common::HourlyRecord;

use crate::types::{AnalysisContext, AnalysisPrompt};

const HOURLY_LINES: usize = 12;
const DAILY_LINES: usize = 3;
const MAP_LINES: usize = 4;

const SYSTEM_PROMPT: &str = "You are an aviation meteorologist briefing ultralight (ULM) pilots \
flying VFR by day only.

Rules:
- METAR winds are in knots; forecast winds are in km/h. Convert before comparing (1 kt = 1.852 km/h).
- Gust spread above 10 kt or gusts above 20 kt are at the structural limit of an ultralight.
- Visibility below 5 km or a ceiling below 1000 ft AGL is marginal; active precipitation is no-go.
- Give a verdict per day: FLYABLE, CAUTION or NO-GO, citing wind, gusts, cloud, visibility and precipitation.
- Start with a one or two line plain-language reading of the METAR.
- Be concise. Do not invent data that is not in the briefing.";

/// Render the prompt for `ctx`.
pub fn render_prompt(ctx: &AnalysisContext, max_tokens: u32, temperature: f64) -> AnalysisPrompt {
    let mut user = String::new();

    let _ = writeln!(
        user,
        "Operational briefing for {} ({}), cycle {}.",
        ctx.airfield_name, ctx.airfield_icao, ctx.cycle
    );
    let _ = writeln!(user, "Local time: {}.", ctx.local_time);
    let _ = writeln!(user, "Write the answer in {}.", ctx.language);
    user.push('\n');

    let _ = writeln!(user, "METAR {}:", ctx.metar_station);
    let _ = writeln!(user, "{}", ctx.metar.as_deref().unwrap_or("not available"));
    if let Some(category) = ctx.flight_category {
        let _ = writeln!(user, "Flight category: {category}");
    }
    user.push('\n');

    if let Some(estimated) = &ctx.synthetic_metar {
        let _ = writeln!(
            user,
            "Estimated METAR {} (derived from model data, unofficial):",
            ctx.airfield_icao
        );
        let _ = writeln!(user, "{estimated}");
        user.push('\n');
    }

    let _ = writeln!(user, "TAF {}:", ctx.metar_station);
    let _ = writeln!(user, "{}", ctx.taf.as_deref().unwrap_or("not available"));
    user.push('\n');

    user.push_str("Daily forecast:\n");
    if ctx.forecast.daily.is_empty() {
        user.push_str("- no data\n");
    }
    for day in ctx.forecast.daily.iter().take(DAILY_LINES) {
        let _ = writeln!(
            user,
            "- {}: temp {}..{} °C, wind max {} km/h, gusts max {} km/h, precip {} mm, sunrise {}, sunset {}",
            day.date,
            fmt_opt(day.temp_min_c),
            fmt_opt(day.temp_max_c),
            fmt_opt(day.wind_max_kmh),
            fmt_opt(day.wind_gust_max_kmh),
            fmt_opt(day.precipitation_mm),
            day.sunrise.as_deref().unwrap_or("-"),
            day.sunset.as_deref().unwrap_or("-"),
        );
        let window = ctx
            .day_windows
            .iter()
            .find(|w| w.date.format("%Y-%m-%d").to_string() == day.date);
        if let Some(window) = window {
            match window.suggested {
                Some(range) => {
                    let _ = writeln!(
                        user,
                        "  opening hours {} ({}), suggested flying window {}",
                        window.opening, window.season, range
                    );
                }
                None => {
                    let _ = writeln!(
                        user,
                        "  opening hours {} ({}), no clear flying window",
                        window.opening, window.season
                    );
                }
            }
        }
    }
    user.push('\n');

    let upcoming: Vec<&HourlyRecord> = upcoming_hours(ctx).take(HOURLY_LINES).collect();
    user.push_str("Next hours:\n");
    if upcoming.is_empty() {
        user.push_str("- no data\n");
    }
    for hour in upcoming {
        let _ = writeln!(
            user,
            "- {}: wind {} km/h from {}°, gusts {} km/h, cloud {}%, precip prob {}%, visibility {} km",
            hour_label(&hour.time),
            fmt_opt(hour.wind_speed_kmh),
            fmt_opt(hour.wind_direction_deg),
            fmt_opt(hour.wind_gust_kmh),
            fmt_opt(hour.cloud_cover_pct),
            fmt_opt(hour.precipitation_probability_pct),
            fmt_opt(hour.visibility_km),
        );
    }

    if !ctx.map_urls.is_empty() {
        user.push('\n');
        user.push_str("Significant weather maps:\n");
        for url in ctx.map_urls.iter().take(MAP_LINES) {
            let _ = writeln!(user, "- {url}");
        }
    }

    AnalysisPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        max_tokens,
        temperature,
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.0}"),
        None => "-".into(),
    }
}

/// Hourly rows from the start of the cycle on. Rows with unreadable times are kept.
fn upcoming_hours(ctx: &AnalysisContext) -> impl Iterator<Item = &HourlyRecord> {
    let cycle_start = ctx.cycle.date.and_time(ctx.cycle.slot);
    ctx.forecast.hourly.iter().filter(move |hour| {
        NaiveDateTime::parse_from_str(&hour.time, "%Y-%m-%dT%H:%M")
            .map(|at| at >= cycle_start)
            .unwrap_or(true)
    })
}

/// "2026-02-13T10:00" -> "10:00".
fn hour_label(time: &str) -> &str {
    time.split_once('T').map(|(_, hm)| hm).unwrap_or(time)
}
