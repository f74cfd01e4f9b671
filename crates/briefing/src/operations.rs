//! Airfield opening hours and the daylight-clipped flying window per day.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use common::{DailySummary, DayWindow, Season, TimeRange};

/// Margin kept after sunrise and before sunset.
const DAYLIGHT_MARGIN_HOURS: i64 = 2;

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Opening hours for `date`: 09:00-21:45 from April to September, 09:00-20:00 otherwise.
pub fn operating_hours(date: NaiveDate) -> (Season, TimeRange) {
    if (4..=9).contains(&date.month()) {
        (
            Season::Summer,
            TimeRange {
                start: hm(9, 0),
                end: hm(21, 45),
            },
        )
    } else {
        (
            Season::Winter,
            TimeRange {
                start: hm(9, 0),
                end: hm(20, 0),
            },
        )
    }
}

/// Accepts "2026-02-13T08:31" as reported by the forecast provider, or a bare "08:31".
fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map(|dt| dt.time())
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// Opening hours of `day` narrowed to sunrise+2h .. sunset-2h. When the
/// margins leave nothing, the plain sunrise..sunset span is tried instead.
/// Returns `None` only when the day's date cannot be read.
pub fn day_window(day: &DailySummary) -> Option<DayWindow> {
    let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d").ok()?;
    let (season, opening) = operating_hours(date);
    let sunrise = day.sunrise.as_deref().and_then(parse_clock);
    let sunset = day.sunset.as_deref().and_then(parse_clock);
    let margin = Duration::hours(DAYLIGHT_MARGIN_HOURS);

    let mut start = opening.start;
    let mut end = opening.end;
    if let Some(sunrise) = sunrise {
        start = start.max(sunrise + margin);
    }
    if let Some(sunset) = sunset {
        end = end.min(sunset - margin);
    }

    if end <= start {
        if let Some(sunrise) = sunrise {
            start = opening.start.max(sunrise);
        }
        if let Some(sunset) = sunset {
            end = opening.end.min(sunset);
        }
    }

    let suggested = (start < end).then_some(TimeRange { start, end });
    Some(DayWindow {
        date,
        season,
        opening,
        suggested,
    })
}

/// Windows for every forecast day whose date parses.
pub fn day_windows(daily: &[DailySummary]) -> Vec<DayWindow> {
    daily.iter().filter_map(day_window).collect()
}
