//! Ordered fallback across AI models.
//!
//! Each model gets exactly one call bounded by the configured timeout.
//! A rate-limited model is skipped for the rest of the cycle it was
//! rate limited in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::config::ProviderKind;
use common::{AppConfig, CycleKey};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::client::{AnalysisBackend, ProviderAdapter};
use crate::prompt::render_prompt;
use crate::types::{
    AnalysisContext, AnalysisOutcome, AttemptRecord, AttemptResult, ModelAttempt, ProviderError,
};

struct ChainEntry {
    attempt: ModelAttempt,
    backend: Arc<dyn AnalysisBackend>,
}

pub struct AnalysisGateway {
    chain: Vec<ChainEntry>,
    timeout: Duration,
    max_tokens: u32,
    temperature: f64,
    /// (provider, model) -> cycle in which it was rate limited.
    locked: Mutex<HashMap<(ProviderKind, String), CycleKey>>,
}

impl AnalysisGateway {
    /// Build the chain from `ai.models`, one shared adapter per provider.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.ai.timeout_secs);
        let mut adapters: HashMap<ProviderKind, Arc<dyn AnalysisBackend>> = HashMap::new();
        let mut entries = Vec::with_capacity(config.ai.models.len());

        for (rank, spec) in config.ai.models.iter().enumerate() {
            let backend = match adapters.get(&spec.provider) {
                Some(backend) => Arc::clone(backend),
                None => {
                    let credential = match spec.provider {
                        ProviderKind::Github => &config.github_token,
                        ProviderKind::Openai => &config.openai_api_key,
                        ProviderKind::Anthropic => &config.anthropic_api_key,
                    };
                    let adapter: Arc<dyn AnalysisBackend> =
                        Arc::new(ProviderAdapter::for_provider(spec.provider, credential, timeout)?);
                    adapters.insert(spec.provider, Arc::clone(&adapter));
                    adapter
                }
            };
            entries.push((
                ModelAttempt {
                    model_id: spec.model.clone(),
                    priority_rank: rank as u32,
                    provider: spec.provider,
                },
                backend,
            ));
        }

        Ok(Self::new(entries, timeout)
            .with_generation(config.ai.max_tokens, config.ai.temperature))
    }

    /// Gateway over an explicit chain. Entries are tried by ascending rank.
    pub fn new(entries: Vec<(ModelAttempt, Arc<dyn AnalysisBackend>)>, timeout: Duration) -> Self {
        let mut chain: Vec<ChainEntry> = entries
            .into_iter()
            .map(|(attempt, backend)| ChainEntry { attempt, backend })
            .collect();
        chain.sort_by_key(|entry| entry.attempt.priority_rank);

        Self {
            chain,
            timeout,
            max_tokens: 2500,
            temperature: 0.4,
            locked: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_generation(mut self, max_tokens: u32, temperature: f64) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Models in the order they are tried.
    pub fn chain(&self) -> Vec<ModelAttempt> {
        self.chain.iter().map(|entry| entry.attempt.clone()).collect()
    }

    /// Walk the chain until one model returns non-empty text.
    pub async fn analyze(&self, ctx: &AnalysisContext) -> AnalysisOutcome {
        let prompt = render_prompt(ctx, self.max_tokens, self.temperature);
        let mut attempts = Vec::with_capacity(self.chain.len());

        for entry in &self.chain {
            let model = &entry.attempt.model_id;
            let provider = entry.attempt.provider;
            let lock_key = (provider, model.clone());

            if self.is_locked(&lock_key, ctx.cycle).await {
                info!(
                    "AI {}:{} skipped: rate limited earlier in cycle {}",
                    provider.as_str(),
                    model,
                    ctx.cycle
                );
                attempts.push(record(&entry.attempt, AttemptResult::SkippedRateLimited));
                continue;
            }

            let result = match tokio::time::timeout(self.timeout, entry.backend.attempt(model, &prompt)).await {
                Ok(Ok(text)) if text.trim().is_empty() => Err(ProviderError::EmptyOutput),
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match result {
                Ok(text) => {
                    info!(
                        "AI narrative for cycle {} from {}:{} ({} chars)",
                        ctx.cycle,
                        provider.as_str(),
                        model,
                        text.len()
                    );
                    attempts.push(record(&entry.attempt, AttemptResult::Succeeded));
                    return AnalysisOutcome::Narrative {
                        text: text.trim().to_string(),
                        model_id: model.clone(),
                        attempts,
                    };
                }
                Err(e) => {
                    if matches!(e, ProviderError::RateLimited(_)) {
                        self.lock(lock_key, ctx.cycle).await;
                    }
                    warn!("AI {}:{} failed: {}", provider.as_str(), model, e);
                    attempts.push(record(&entry.attempt, AttemptResult::Failed(e.to_string())));
                }
            }
        }

        warn!(
            "AI analysis unavailable for cycle {}: {} model(s) exhausted",
            ctx.cycle,
            attempts.len()
        );
        AnalysisOutcome::Unavailable { attempts }
    }

    async fn is_locked(&self, key: &(ProviderKind, String), cycle: CycleKey) -> bool {
        self.locked.lock().await.get(key) == Some(&cycle)
    }

    async fn lock(&self, key: (ProviderKind, String), cycle: CycleKey) {
        self.locked.lock().await.insert(key, cycle);
    }
}

fn record(attempt: &ModelAttempt, result: AttemptResult) -> AttemptRecord {
    AttemptRecord {
        model_id: attempt.model_id.clone(),
        provider: attempt.provider,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use common::config::ModelSpec;
    use common::ForecastSeries;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::types::AnalysisPrompt;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Reply(&'static str),
        Fail,
        RateLimit,
        Hang,
    }

    struct ScriptedModel {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisBackend for ScriptedModel {
        async fn attempt(&self, _model: &str, _prompt: &AnalysisPrompt) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Reply(text) => Ok(text.to_string()),
                Behaviour::Fail => Err(ProviderError::HttpStatus {
                    status: 500,
                    body: "boom".into(),
                }),
                Behaviour::RateLimit => Err(ProviderError::RateLimited("slow down".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".into())
                }
            }
        }
    }

    fn attempt(model: &str, rank: u32) -> ModelAttempt {
        ModelAttempt {
            model_id: model.into(),
            priority_rank: rank,
            provider: ProviderKind::Github,
        }
    }

    fn gateway(models: &[(&str, Arc<ScriptedModel>)]) -> AnalysisGateway {
        let entries = models
            .iter()
            .enumerate()
            .map(|(rank, (name, backend))| {
                let backend: Arc<dyn AnalysisBackend> = backend.clone();
                (attempt(name, rank as u32), backend)
            })
            .collect();
        AnalysisGateway::new(entries, Duration::from_secs(60))
    }

    fn context(hour: u32) -> AnalysisContext {
        AnalysisContext {
            cycle: CycleKey::new(
                NaiveDate::from_ymd_opt(2026, 2, 13).expect("valid date"),
                NaiveTime::from_hms_opt(hour, 0, 0).expect("valid time"),
            ),
            local_time: format!("2026-02-13 {hour:02}:01 Europe/Madrid"),
            airfield_name: "Aeródromo de La Morgal".into(),
            airfield_icao: "LEMR".into(),
            metar_station: "LEAS".into(),
            metar: Some("LEAS 131000Z 24012KT CAVOK 14/09 Q1016".into()),
            synthetic_metar: None,
            taf: None,
            flight_category: None,
            forecast: ForecastSeries::default(),
            day_windows: Vec::new(),
            map_urls: Vec::new(),
            language: "Spanish".into(),
        }
    }

    #[tokio::test]
    async fn test_falls_back_in_order_until_success() {
        let a = ScriptedModel::new(Behaviour::Fail);
        let b = ScriptedModel::new(Behaviour::Fail);
        let c = ScriptedModel::new(Behaviour::Reply("APTO"));
        let gw = gateway(&[("a", a.clone()), ("b", b.clone()), ("c", c.clone())]);

        let outcome = gw.analyze(&context(10)).await;

        assert_eq!(outcome.narrative(), Some("APTO"));
        assert_eq!(outcome.model_id(), Some("c"));
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
        assert_eq!(outcome.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_first_success_stops_the_chain() {
        let a = ScriptedModel::new(Behaviour::Reply("APTO"));
        let b = ScriptedModel::new(Behaviour::Reply("NO APTO"));
        let gw = gateway(&[("a", a.clone()), ("b", b.clone())]);

        let outcome = gw.analyze(&context(10)).await;

        assert_eq!(outcome.model_id(), Some("a"));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_failures_yield_unavailable() {
        let a = ScriptedModel::new(Behaviour::Fail);
        let b = ScriptedModel::new(Behaviour::Reply("   \n"));
        let gw = gateway(&[("a", a.clone()), ("b", b.clone())]);

        let outcome = gw.analyze(&context(10)).await;

        assert!(outcome.narrative().is_none());
        let results: Vec<_> = outcome.attempts().iter().map(|r| r.result.clone()).collect();
        assert_eq!(
            results,
            vec![
                AttemptResult::Failed("HTTP status 500: boom".into()),
                AttemptResult::Failed("empty output".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_model_times_out_and_falls_through() {
        let slow = ScriptedModel::new(Behaviour::Hang);
        let fast = ScriptedModel::new(Behaviour::Reply("PRECAUCIÓN"));
        let gw = gateway(&[("slow", slow.clone()), ("fast", fast.clone())]);

        let outcome = gw.analyze(&context(10)).await;

        assert_eq!(outcome.model_id(), Some("fast"));
        assert_eq!(
            outcome.attempts()[0].result,
            AttemptResult::Failed("Timeout".into())
        );
    }

    #[tokio::test]
    async fn test_rate_limited_model_is_locked_for_the_cycle_only() {
        let primary = ScriptedModel::new(Behaviour::RateLimit);
        let backup = ScriptedModel::new(Behaviour::Reply("APTO"));
        let gw = gateway(&[("primary", primary.clone()), ("backup", backup.clone())]);

        gw.analyze(&context(10)).await;
        let second = gw.analyze(&context(10)).await;

        assert_eq!(primary.calls(), 1);
        assert_eq!(second.attempts()[0].result, AttemptResult::SkippedRateLimited);
        assert_eq!(second.model_id(), Some("backup"));

        // Next cycle: the primary is tried again.
        gw.analyze(&context(11)).await;
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let gw = AnalysisGateway::new(Vec::new(), Duration::from_secs(1));
        let outcome = gw.analyze(&context(10)).await;
        assert!(matches!(outcome, AnalysisOutcome::Unavailable { ref attempts } if attempts.is_empty()));
    }

    #[tokio::test]
    async fn test_from_config_marks_missing_credentials_unconfigured() {
        let mut config = AppConfig::default();
        config.ai.models = vec![
            ModelSpec {
                provider: ProviderKind::Openai,
                model: "gpt-4o".into(),
            },
            ModelSpec {
                provider: ProviderKind::Anthropic,
                model: "claude-3-5-haiku-latest".into(),
            },
        ];

        let gw = AnalysisGateway::from_config(&config).expect("gateway builds");
        let chain = gw.chain();
        assert_eq!(chain[0].model_id, "gpt-4o");
        assert_eq!(chain[1].priority_rank, 1);

        let outcome = gw.analyze(&context(10)).await;
        assert!(outcome.narrative().is_none());
        assert_eq!(
            outcome.attempts()[0].result,
            AttemptResult::Failed("no credential configured for openai".into())
        );
    }
}
