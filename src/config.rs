//! Configuration loader: merges env vars, .env file, and config.toml.

use std::path::Path;

use common::config::{ModelSpec, ProviderKind, RefreshMode};
use common::{AppConfig, Error};

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_mode(raw: &str) -> Result<RefreshMode, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "blocking" => Ok(RefreshMode::Blocking),
        "stale_while_revalidate" | "swr" => Ok(RefreshMode::StaleWhileRevalidate),
        _ => Err(Error::Config(
            "BRIEFING_MODE must be one of: blocking, stale_while_revalidate".into(),
        )),
    }
}

/// "github:gpt-4o,anthropic:claude-3-5-haiku-latest"
fn parse_models(raw: &str) -> Result<Vec<ModelSpec>, Error> {
    parse_list(raw)
        .into_iter()
        .map(|entry| {
            let (provider, model) = entry.split_once(':').ok_or_else(|| {
                Error::Config(format!("AI_MODELS entry '{entry}' must be provider:model"))
            })?;
            let provider = ProviderKind::parse(provider).ok_or_else(|| {
                Error::Config(format!(
                    "AI_MODELS entry '{entry}': provider must be one of github, openai, anthropic"
                ))
            })?;
            let model = model.trim();
            if model.is_empty() {
                return Err(Error::Config(format!("AI_MODELS entry '{entry}' has no model")));
            }
            Ok(ModelSpec {
                provider,
                model: model.to_string(),
            })
        })
        .collect()
}

fn credential_for(config: &AppConfig, provider: ProviderKind) -> &str {
    match provider {
        ProviderKind::Github => &config.github_token,
        ProviderKind::Openai => &config.openai_api_key,
        ProviderKind::Anthropic => &config.anthropic_api_key,
    }
}

fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.airfield.icao.trim().is_empty() {
        issues.push("airfield.icao must not be empty".into());
    }
    if config.airfield.metar_station.trim().is_empty() {
        issues.push("airfield.metar_station must not be empty".into());
    }
    if !(-90.0..=90.0).contains(&config.airfield.lat) {
        issues.push("airfield.lat must be in [-90,90]".into());
    }
    if !(-180.0..=180.0).contains(&config.airfield.lon) {
        issues.push("airfield.lon must be in [-180,180]".into());
    }

    // Timezone, window and slot consistency.
    if let Err(e) = briefing::Schedule::from_config(&config.schedule) {
        issues.push(format!("schedule: {e}"));
    }
    if config.schedule.failure_retry_secs == 0 {
        issues.push("schedule.failure_retry_secs must be > 0".into());
    }
    if config.schedule.warmer_interval_secs == 0 {
        issues.push("schedule.warmer_interval_secs must be > 0".into());
    }

    if config.upstream.timeout_secs == 0 {
        issues.push("upstream.timeout_secs must be > 0".into());
    }
    if config.upstream.forecast_hours == 0 {
        issues.push("upstream.forecast_hours must be > 0".into());
    }
    if config.upstream.forecast_days == 0 {
        issues.push("upstream.forecast_days must be > 0".into());
    }
    if config.upstream.map_days > 0 && !config.upstream.map_template.contains("{date}") {
        issues.push("upstream.map_template must contain {date}".into());
    }

    if config.ai.timeout_secs == 0 {
        issues.push("ai.timeout_secs must be > 0".into());
    }
    if config.ai.max_tokens == 0 {
        issues.push("ai.max_tokens must be > 0".into());
    }
    if !(0.0..=2.0).contains(&config.ai.temperature) {
        issues.push("ai.temperature must be in [0,2]".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Providers listed in `ai.models` that have no credential.
pub fn missing_credentials(config: &AppConfig) -> Vec<ProviderKind> {
    let mut missing: Vec<ProviderKind> = Vec::new();
    for spec in &config.ai.models {
        if credential_for(config, spec.provider).trim().is_empty() && !missing.contains(&spec.provider) {
            missing.push(spec.provider);
        }
    }
    missing
}

/// Apply environment overrides (highest priority).
fn apply_env(config: &mut AppConfig, var: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
    if let Some(tz) = var("BRIEFING_TIMEZONE") {
        config.schedule.timezone = tz.trim().to_string();
    }
    if let Some(start) = var("BRIEFING_WINDOW_START") {
        config.schedule.window_start = start.trim().to_string();
    }
    if let Some(end) = var("BRIEFING_WINDOW_END") {
        config.schedule.window_end = end.trim().to_string();
    }
    if let Some(slots) = var("BRIEFING_SLOTS") {
        config.schedule.slots = parse_list(&slots);
    }
    if let Some(mode) = var("BRIEFING_MODE") {
        config.schedule.mode = parse_mode(&mode)?;
    }
    if let Some(models) = var("AI_MODELS") {
        config.ai.models = parse_models(&models)?;
    }
    if let Some(raw) = var("AI_TIMEOUT_SECS") {
        config.ai.timeout_secs = parse_positive_u64(&raw, "AI_TIMEOUT_SECS")?;
    }
    if let Some(raw) = var("UPSTREAM_TIMEOUT_SECS") {
        config.upstream.timeout_secs = parse_positive_u64(&raw, "UPSTREAM_TIMEOUT_SECS")?;
    }
    if let Some(token) = var("GITHUB_TOKEN") {
        config.github_token = token;
    }
    if let Some(key) = var("OPENAI_API_KEY") {
        config.openai_api_key = key;
    }
    if let Some(key) = var("ANTHROPIC_API_KEY") {
        config.anthropic_api_key = key;
    }
    Ok(())
}

/// Load service configuration from environment and optional config file.
pub fn load_config() -> Result<AppConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = AppConfig::default();

    // 3. Try loading config.toml if it exists.
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 4. Override with environment variables.
    apply_env(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;

    Ok(config)
}
