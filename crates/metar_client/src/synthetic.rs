//! Estimated METAR built from model current conditions.
//!
//! For airfields without a reporting station. The result follows the ICAO
//! report layout and is always marked `AUTO`; it is not an observation.

use common::CurrentConditions;

const KT_PER_KMH: f64 = 0.539957;

/// Gusts are only reported when they exceed the mean wind by this much.
const GUST_SPREAD_KMH: f64 = 5.0;

/// Magnus-formula dew point. Out-of-range humidity falls back to `temp - 5`.
pub fn dew_point_c(temperature_c: f64, humidity_pct: f64) -> f64 {
    if humidity_pct <= 0.0 || humidity_pct > 100.0 {
        return temperature_c - 5.0;
    }
    let a = 17.27;
    let b = 237.7;
    let alpha = (a * temperature_c) / (b + temperature_c) + (humidity_pct / 100.0).ln();
    (b * alpha) / (a - alpha)
}

pub fn kmh_to_kt(kmh: f64) -> i64 {
    (kmh * KT_PER_KMH).round() as i64
}

/// Cloud group by cover. The base is a rough estimate from field elevation.
pub fn cloud_group(cover_pct: f64, elevation_m: f64) -> String {
    if cover_pct <= 12.0 {
        return "SKC".into();
    }
    let base_ft = 2000.0 + elevation_m * 2.0;
    let height = (base_ft / 100.0).max(0.0) as u32;
    let amount = if cover_pct <= 25.0 {
        "FEW"
    } else if cover_pct <= 50.0 {
        "SCT"
    } else if cover_pct <= 87.0 {
        "BKN"
    } else {
        "OVC"
    };
    format!("{amount}{height:03}")
}

/// Present-weather group for a WMO weather code; empty when nothing to report.
pub fn weather_phenomena(code: u32) -> &'static str {
    match code {
        45 | 48 => "FG",
        51 | 53 => "DZ",
        55 => "+DZ",
        56 => "-FZDZ",
        57 => "FZDZ",
        61 => "-RA",
        63 => "RA",
        65 => "+RA",
        66 => "-FZRA",
        67 => "FZRA",
        71 => "-SN",
        73 => "SN",
        75 => "+SN",
        77 => "SG",
        80 => "-SHRA",
        81 => "SHRA",
        82 => "+SHRA",
        85 => "-SHSN",
        86 => "+SHSN",
        95 => "TS",
        96 => "TSRA",
        99 => "+TSRA",
        _ => "",
    }
}

/// Visibility group estimated from the WMO weather code.
pub fn visibility_group(code: u32) -> &'static str {
    match code {
        45 | 48 => "0800",
        55 | 65 | 67 | 75 | 82 | 86 | 99 => "3000",
        53 | 63 | 73 | 81 => "6000",
        51 | 61 | 71 | 80 | 85 => "8000",
        _ => "9999",
    }
}

fn wind_group(speed_kmh: f64, direction_deg: f64, gust_kmh: Option<f64>) -> String {
    let speed_kt = kmh_to_kt(speed_kmh);
    if speed_kt < 1 {
        return "00000KT".into();
    }
    let direction = ((direction_deg / 10.0).round() * 10.0) as i64;
    match gust_kmh {
        Some(gust) if gust > speed_kmh + GUST_SPREAD_KMH => {
            format!("{direction:03}{speed_kt:02}G{:02}KT", kmh_to_kt(gust))
        }
        _ => format!("{direction:03}{speed_kt:02}KT"),
    }
}

fn signed_temp(value: f64) -> String {
    let rounded = value.round() as i64;
    if rounded < 0 {
        format!("M{:02}", rounded.abs())
    } else {
        format!("{rounded:02}")
    }
}

/// Estimated METAR for `icao`, or `None` when temperature, humidity, wind,
/// pressure or the observation time is missing.
pub fn synthetic_metar(current: &CurrentConditions, icao: &str, elevation_m: f64) -> Option<String> {
    let temperature = current.temperature_c?;
    let humidity = current.humidity_pct?;
    let wind_speed = current.wind_speed_kmh?;
    let wind_direction = current.wind_direction_deg?;
    let pressure = current.pressure_hpa?;
    let observed_at = current.observed_at?;
    let code = current.weather_code.unwrap_or(0);

    let mut groups = vec![
        "METAR".to_string(),
        icao.to_string(),
        observed_at.format("%d%H%MZ").to_string(),
        "AUTO".to_string(),
        wind_group(wind_speed, wind_direction, current.wind_gust_kmh),
        visibility_group(code).to_string(),
    ];
    let phenomena = weather_phenomena(code);
    if !phenomena.is_empty() {
        groups.push(phenomena.to_string());
    }
    groups.push(cloud_group(current.cloud_cover_pct.unwrap_or(0.0), elevation_m));
    groups.push(format!(
        "{}/{}",
        signed_temp(temperature),
        signed_temp(dew_point_c(temperature, humidity))
    ));
    groups.push(format!("Q{:04}", pressure.round() as i64));
    groups.push("NOSIG".to_string());

    Some(groups.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid timestamp")
    }

    fn conditions() -> CurrentConditions {
        CurrentConditions {
            time: "2026-02-13T10:15".into(),
            observed_at: Some(utc(2026, 2, 13, 9, 15)),
            temperature_c: Some(14.3),
            humidity_pct: Some(72.0),
            wind_speed_kmh: Some(22.0),
            wind_direction_deg: Some(247.0),
            wind_gust_kmh: Some(41.0),
            pressure_hpa: Some(1016.4),
            cloud_cover_pct: Some(40.0),
            precipitation_mm: Some(0.2),
            weather_code: Some(61),
        }
    }

    #[test]
    fn test_synthetic_metar_layout() {
        let metar = synthetic_metar(&conditions(), "LEMR", 180.0);

        assert_eq!(
            metar.as_deref(),
            Some("METAR LEMR 130915Z AUTO 25012G22KT 8000 -RA SCT023 14/09 Q1016 NOSIG")
        );
    }

    #[test]
    fn test_synthetic_metar_calm_fog_and_negative_temps() {
        let current = CurrentConditions {
            observed_at: Some(utc(2026, 1, 5, 6, 0)),
            temperature_c: Some(-2.6),
            humidity_pct: Some(90.0),
            wind_speed_kmh: Some(0.5),
            wind_gust_kmh: Some(3.0),
            pressure_hpa: Some(1008.6),
            cloud_cover_pct: Some(5.0),
            weather_code: Some(45),
            ..conditions()
        };

        assert_eq!(
            synthetic_metar(&current, "LEMR", 180.0).as_deref(),
            Some("METAR LEMR 050600Z AUTO 00000KT 0800 FG SKC M03/M04 Q1009 NOSIG")
        );
    }

    #[test]
    fn test_small_gust_spread_is_not_reported() {
        let current = CurrentConditions {
            wind_gust_kmh: Some(25.0),
            weather_code: Some(2),
            ..conditions()
        };

        let metar = synthetic_metar(&current, "LEMR", 180.0).expect("metar built");
        assert!(metar.contains(" 25012KT 9999 SCT023 "));
    }

    #[test]
    fn test_missing_critical_values_give_none() {
        let no_pressure = CurrentConditions {
            pressure_hpa: None,
            ..conditions()
        };
        let no_time = CurrentConditions {
            observed_at: None,
            ..conditions()
        };

        assert_eq!(synthetic_metar(&no_pressure, "LEMR", 180.0), None);
        assert_eq!(synthetic_metar(&no_time, "LEMR", 180.0), None);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(cloud_group(20.0, 180.0), "FEW023");
        assert_eq!(cloud_group(95.0, 0.0), "OVC020");
        assert_eq!(cloud_group(60.0, 600.0), "BKN032");
        assert_eq!(dew_point_c(10.0, 0.0), 5.0);
        assert!((dew_point_c(20.0, 100.0) - 20.0).abs() < 1e-9);
        assert_eq!(kmh_to_kt(37.04), 20);
    }
}
