//! Flight-rules category from a raw METAR.
//!
//! Uses the FAA thresholds: ceiling is the lowest BKN/OVC/VV layer,
//! visibility is the prevailing visibility group.

use common::FlightCategory;

const METRES_PER_STATUTE_MILE: f64 = 1609.344;

/// Groups after which the report describes trends or remarks, not observations.
const TREND_MARKERS: [&str; 5] = ["TEMPO", "BECMG", "NOSIG", "RMK", "FM"];

/// Classify `metar` as VFR/MVFR/IFR/LIFR.
///
/// Returns `None` when neither ceiling nor visibility can be read.
pub fn classify_flight_category(metar: &str) -> Option<FlightCategory> {
    let groups = observation_groups(metar);

    if groups.iter().any(|g| *g == "CAVOK") {
        return Some(FlightCategory::Vfr);
    }

    let visibility_sm = prevailing_visibility_sm(&groups);
    let ceiling_ft = ceiling_ft(&groups);
    let no_ceiling_reported = groups
        .iter()
        .any(|g| matches!(*g, "NSC" | "SKC" | "CLR" | "NCD"));

    if visibility_sm.is_none() && ceiling_ft.is_none() && !no_ceiling_reported {
        return None;
    }

    let by_ceiling = ceiling_ft.map(category_for_ceiling).unwrap_or(FlightCategory::Vfr);
    let by_visibility = visibility_sm
        .map(category_for_visibility)
        .unwrap_or(FlightCategory::Vfr);

    Some(worst(by_ceiling, by_visibility))
}

fn observation_groups(metar: &str) -> Vec<&str> {
    metar
        .split_whitespace()
        .take_while(|g| !TREND_MARKERS.contains(g) && !g.starts_with("FM"))
        .collect()
}

fn prevailing_visibility_sm(groups: &[&str]) -> Option<f64> {
    for (idx, group) in groups.iter().enumerate() {
        // ICAO metres: "9999", "0800", "4000NDV".
        let digits = group.strip_suffix("NDV").unwrap_or(group);
        if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
            let metres: f64 = digits.parse().ok()?;
            // 9999 means 10 km or more.
            let metres = if metres >= 9999.0 { 10_000.0 } else { metres };
            return Some(metres / METRES_PER_STATUTE_MILE);
        }

        // US statute miles: "10SM", "3/4SM", "M1/4SM", optionally preceded by a whole number.
        if let Some(raw) = group.strip_suffix("SM") {
            let raw = raw.trim_start_matches(['M', 'P']);
            let mut miles = parse_miles(raw)?;
            if raw.contains('/') {
                if let Some(whole) = idx
                    .checked_sub(1)
                    .and_then(|prev| groups.get(prev))
                    .and_then(|prev| prev.parse::<u32>().ok())
                {
                    miles += f64::from(whole);
                }
            }
            return Some(miles);
        }
    }
    None
}

fn parse_miles(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            Some(num / den)
        }
        None => raw.parse().ok(),
    }
}

fn ceiling_ft(groups: &[&str]) -> Option<u32> {
    groups
        .iter()
        .filter_map(|g| {
            let height = g
                .strip_prefix("BKN")
                .or_else(|| g.strip_prefix("OVC"))
                .or_else(|| g.strip_prefix("VV"))?;
            let hundreds: u32 = height.get(..3)?.parse().ok()?;
            Some(hundreds * 100)
        })
        .min()
}

fn category_for_ceiling(ceiling_ft: u32) -> FlightCategory {
    match ceiling_ft {
        0..=499 => FlightCategory::Lifr,
        500..=999 => FlightCategory::Ifr,
        1000..=3000 => FlightCategory::Mvfr,
        _ => FlightCategory::Vfr,
    }
}

fn category_for_visibility(visibility_sm: f64) -> FlightCategory {
    if visibility_sm < 1.0 {
        FlightCategory::Lifr
    } else if visibility_sm < 3.0 {
        FlightCategory::Ifr
    } else if visibility_sm <= 5.0 {
        FlightCategory::Mvfr
    } else {
        FlightCategory::Vfr
    }
}

fn severity(category: FlightCategory) -> u8 {
    match category {
        FlightCategory::Vfr => 0,
        FlightCategory::Mvfr => 1,
        FlightCategory::Ifr => 2,
        FlightCategory::Lifr => 3,
    }
}

fn worst(a: FlightCategory, b: FlightCategory) -> FlightCategory {
    if severity(a) >= severity(b) {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cavok_is_vfr() {
        assert_eq!(
            classify_flight_category("LEAS 131030Z 24012KT CAVOK 14/09 Q1016"),
            Some(FlightCategory::Vfr)
        );
    }

    #[test]
    fn test_low_broken_layer_is_ifr() {
        assert_eq!(
            classify_flight_category("LEAS 131030Z 24012KT 9999 BKN008 14/12 Q1010"),
            Some(FlightCategory::Ifr)
        );
    }

    #[test]
    fn test_scattered_layers_do_not_form_ceiling() {
        assert_eq!(
            classify_flight_category("LEAS 131030Z 24012KT 9999 FEW005 SCT010 14/12 Q1010"),
            Some(FlightCategory::Vfr)
        );
    }

    #[test]
    fn test_fog_visibility_is_lifr() {
        assert_eq!(
            classify_flight_category("LEAS 130630Z 00000KT 0300 FG VV001 08/08 Q1021"),
            Some(FlightCategory::Lifr)
        );
    }

    #[test]
    fn test_marginal_visibility_metres() {
        // 6000 m is about 3.7 SM.
        assert_eq!(
            classify_flight_category("LEAS 131030Z 24012KT 6000 -RA SCT040 14/12 Q1010"),
            Some(FlightCategory::Mvfr)
        );
    }

    #[test]
    fn test_statute_mile_fraction_with_whole_number() {
        assert_eq!(
            classify_flight_category("KSEA 131053Z 18008KT 1 1/2SM BR OVC020 09/08 A3002"),
            Some(FlightCategory::Ifr)
        );
    }

    #[test]
    fn test_trend_groups_are_ignored() {
        assert_eq!(
            classify_flight_category("LEAS 131030Z 24012KT 9999 SCT030 14/09 Q1016 TEMPO BKN004"),
            Some(FlightCategory::Vfr)
        );
    }

    #[test]
    fn test_unreadable_report() {
        assert_eq!(classify_flight_category("LEMR METAR NOT AVAILABLE"), None);
    }
}
