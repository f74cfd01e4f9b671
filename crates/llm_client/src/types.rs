use common::config::ProviderKind;
use common::{CycleKey, DayWindow, FlightCategory, ForecastSeries};
use serde::Serialize;

/// One entry of the fallback chain. Lower rank is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelAttempt {
    pub model_id: String,
    pub priority_rank: u32,
    pub provider: ProviderKind,
}

/// Raw data the narrative is produced from.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContext {
    pub cycle: CycleKey,
    /// Local wall-clock label of the build, e.g. "2026-02-13 10:05 Europe/Madrid".
    pub local_time: String,
    pub airfield_name: String,
    pub airfield_icao: String,
    pub metar_station: String,
    pub metar: Option<String>,
    /// Estimated, unofficial METAR for the airfield itself.
    pub synthetic_metar: Option<String>,
    pub taf: Option<String>,
    pub flight_category: Option<FlightCategory>,
    pub forecast: ForecastSeries,
    pub day_windows: Vec<DayWindow>,
    pub map_urls: Vec<String>,
    /// Language the narrative should be written in.
    pub language: String,
}

/// Rendered prompt handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPrompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// A single model attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API request failed: {0}")]
    Api(String),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Timeout")]
    Timeout,
    #[error("empty output")]
    EmptyOutput,
    #[error("no credential configured for {0}")]
    NotConfigured(&'static str),
}

/// What happened to one model in one `analyze` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded,
    Failed(String),
    /// Skipped without a call: rate limited earlier in the same cycle.
    SkippedRateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub model_id: String,
    pub provider: ProviderKind,
    pub result: AttemptResult,
}

/// Result of walking the fallback chain. Never an error: exhaustion is `Unavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AnalysisOutcome {
    Narrative {
        text: String,
        model_id: String,
        attempts: Vec<AttemptRecord>,
    },
    Unavailable {
        attempts: Vec<AttemptRecord>,
    },
}

impl AnalysisOutcome {
    pub fn narrative(&self) -> Option<&str> {
        match self {
            AnalysisOutcome::Narrative { text, .. } => Some(text),
            AnalysisOutcome::Unavailable { .. } => None,
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            AnalysisOutcome::Narrative { model_id, .. } => Some(model_id),
            AnalysisOutcome::Unavailable { .. } => None,
        }
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            AnalysisOutcome::Narrative { attempts, .. } => attempts,
            AnalysisOutcome::Unavailable { attempts } => attempts,
        }
    }
}
