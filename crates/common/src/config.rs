//! Service configuration types.

use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The fixed airfield the briefing is built for.
    #[serde(default)]
    pub airfield: AirfieldConfig,

    /// Refresh cycle schedule and operating window.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Upstream endpoints and per-call limits.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// AI analysis fallback chain.
    #[serde(default)]
    pub ai: AiConfig,

    /// GitHub Models token (environment only).
    #[serde(default, skip_serializing)]
    pub github_token: String,

    /// OpenAI API key (environment only).
    #[serde(default, skip_serializing)]
    pub openai_api_key: String,

    /// Anthropic API key (environment only).
    #[serde(default, skip_serializing)]
    pub anthropic_api_key: String,
}

/// Fixed airfield description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirfieldConfig {
    /// Human-readable name.
    #[serde(default = "default_airfield_name")]
    pub name: String,
    /// ICAO code of the airfield itself.
    #[serde(default = "default_airfield_icao")]
    pub icao: String,
    /// Nearest station publishing METAR/TAF.
    #[serde(default = "default_metar_station")]
    pub metar_station: String,
    /// Latitude.
    #[serde(default = "default_lat")]
    pub lat: f64,
    /// Longitude.
    #[serde(default = "default_lon")]
    pub lon: f64,
    /// Field elevation in metres.
    #[serde(default = "default_elevation_m")]
    pub elevation_m: f64,
}

/// How concurrent callers are served while a cycle is being rebuilt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Callers wait for the in-flight build of their cycle.
    Blocking,
    /// Callers get the previous bundle at once while the build runs in the background.
    StaleWhileRevalidate,
}

/// Refresh schedule. Times are local "HH:MM" in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// IANA timezone identifier, e.g. "Europe/Madrid".
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// First minute of the daily operating window.
    #[serde(default = "default_window_start")]
    pub window_start: String,
    /// Last minute of the daily operating window (inclusive).
    #[serde(default = "default_window_end")]
    pub window_end: String,
    /// Ordered cycle start times.
    #[serde(default = "default_slots")]
    pub slots: Vec<String>,
    /// Serving policy during rebuilds.
    #[serde(default = "default_mode")]
    pub mode: RefreshMode,
    /// Minimum spacing between rebuild attempts of a cycle whose last build failed entirely.
    #[serde(default = "default_failure_retry")]
    pub failure_retry_secs: u64,
    /// Interval of the background cycle warmer.
    #[serde(default = "default_warmer_interval")]
    pub warmer_interval_secs: u64,
}

/// Upstream data source endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_metar_url")]
    pub metar_url: String,
    #[serde(default = "default_taf_url")]
    pub taf_url: String,
    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,
    /// Significant-weather map template; `{date}` expands to `YYYYMMDD`.
    #[serde(default = "default_map_template")]
    pub map_template: String,
    /// Number of day offsets to build map URLs for.
    #[serde(default = "default_map_days")]
    pub map_days: u32,
    /// Number of hourly forecast steps to keep.
    #[serde(default = "default_forecast_hours")]
    pub forecast_hours: usize,
    /// Number of forecast days requested.
    #[serde(default = "default_forecast_days")]
    pub forecast_days: u32,
    /// Per-call timeout for METAR/TAF/forecast requests.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Provider behind a model entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// GitHub Models (OpenAI-compatible endpoint).
    Github,
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Github => "github",
            ProviderKind::Openai => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "github" => Some(ProviderKind::Github),
            "openai" => Some(ProviderKind::Openai),
            "anthropic" => Some(ProviderKind::Anthropic),
            _ => None,
        }
    }
}

/// One entry of the AI fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model: String,
}

/// AI analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Models in priority order; the first success wins.
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
    /// Per-model call timeout.
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Language the narrative is written in.
    #[serde(default = "default_language")]
    pub language: String,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_airfield_name() -> String {
    "Aeródromo de La Morgal".into()
}
fn default_airfield_icao() -> String {
    "LEMR".into()
}
fn default_metar_station() -> String {
    "LEAS".into()
}
fn default_lat() -> f64 {
    43.43055
}
fn default_lon() -> f64 {
    -5.82695
}
fn default_elevation_m() -> f64 {
    180.0
}

fn default_timezone() -> String {
    "Europe/Madrid".into()
}
fn default_window_start() -> String {
    "06:00".into()
}
fn default_window_end() -> String {
    "23:00".into()
}
fn default_slots() -> Vec<String> {
    (6..=23).map(|h| format!("{h:02}:00")).collect()
}
fn default_mode() -> RefreshMode {
    RefreshMode::Blocking
}
fn default_failure_retry() -> u64 {
    300
}
fn default_warmer_interval() -> u64 {
    30
}

fn default_metar_url() -> String {
    "https://aviationweather.gov/api/data/metar".into()
}
fn default_taf_url() -> String {
    "https://aviationweather.gov/api/data/taf".into()
}
fn default_forecast_url() -> String {
    "https://api.open-meteo.com/v1/forecast".into()
}
fn default_map_template() -> String {
    "https://ama.aemet.es/o/estaticos/bbdd/imagenes/QGQE70LEMM1800________{date}.png".into()
}
fn default_map_days() -> u32 {
    3
}
fn default_forecast_hours() -> usize {
    24
}
fn default_forecast_days() -> u32 {
    3
}
fn default_upstream_timeout() -> u64 {
    10
}
fn default_user_agent() -> String {
    "airfield-briefing/0.1".into()
}

fn default_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            provider: ProviderKind::Github,
            model: "gpt-4o".into(),
        },
        ModelSpec {
            provider: ProviderKind::Github,
            model: "gpt-4o-mini".into(),
        },
    ]
}
fn default_ai_timeout() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    2500
}
fn default_temperature() -> f64 {
    0.4
}
fn default_language() -> String {
    "Spanish".into()
}

impl Default for AirfieldConfig {
    fn default() -> Self {
        Self {
            name: default_airfield_name(),
            icao: default_airfield_icao(),
            metar_station: default_metar_station(),
            lat: default_lat(),
            lon: default_lon(),
            elevation_m: default_elevation_m(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            window_start: default_window_start(),
            window_end: default_window_end(),
            slots: default_slots(),
            mode: default_mode(),
            failure_retry_secs: default_failure_retry(),
            warmer_interval_secs: default_warmer_interval(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            metar_url: default_metar_url(),
            taf_url: default_taf_url(),
            forecast_url: default_forecast_url(),
            map_template: default_map_template(),
            map_days: default_map_days(),
            forecast_hours: default_forecast_hours(),
            forecast_days: default_forecast_days(),
            timeout_secs: default_upstream_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            timeout_secs: default_ai_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            language: default_language(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            airfield: AirfieldConfig::default(),
            schedule: ScheduleConfig::default(),
            upstream: UpstreamConfig::default(),
            ai: AiConfig::default(),
            github_token: String::new(),
            openai_api_key: String::new(),
            anthropic_api_key: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_slots_are_hourly_six_to_twenty_three() {
        let slots = default_slots();
        assert_eq!(slots.len(), 18);
        assert_eq!(slots.first().map(String::as_str), Some("06:00"));
        assert_eq!(slots.last().map(String::as_str), Some("23:00"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [schedule]
            timezone = "Europe/Madrid"
            slots = ["06:00", "09:00", "12:00", "15:00", "18:00"]
            mode = "stale_while_revalidate"

            [[ai.models]]
            provider = "openai"
            model = "gpt-4o"
        "#;

        let config: AppConfig = toml::from_str(raw).expect("config should parse");

        assert_eq!(config.schedule.slots.len(), 5);
        assert_eq!(config.schedule.mode, RefreshMode::StaleWhileRevalidate);
        assert_eq!(config.schedule.window_start, "06:00");
        assert_eq!(config.airfield.icao, "LEMR");
        assert_eq!(config.ai.models.len(), 1);
        assert_eq!(config.ai.models[0].provider, ProviderKind::Openai);
        assert_eq!(config.upstream.timeout_secs, 10);
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse(" GitHub "), Some(ProviderKind::Github));
        assert_eq!(ProviderKind::parse("anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("azure"), None);
    }
}
