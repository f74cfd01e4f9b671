//! Refresh scheduler: decides when a cycle is rebuilt and serves bundles.
//!
//! Per cycle key the state moves `EMPTY -> BUILDING -> READY`. Exactly one
//! caller claims `BUILDING` through the in-flight map and spawns the build
//! on its own task; every blocking caller, the claimant included, waits on
//! that build's watch channel.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::config::{AirfieldConfig, RefreshMode, UpstreamConfig};
use common::{AppConfig, Bundle, CycleKey, Error, RefreshCycle, SourceId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use llm_client::{AnalysisContext, AttemptRecord};
use metar_client::classify_flight_category;
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::builder::{build_bundle, map_urls, placeholder_bundle, BundleInputs};
use crate::cache::CacheStore;
use crate::schedule::Schedule;
use crate::sources::Sources;

const EVENT_CAPACITY: usize = 64;
const MAX_RETRY_SECS: u64 = 7 * 24 * 3600;

type BuildSlot = watch::Receiver<Option<Arc<Bundle>>>;

/// How a build ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    /// A fresh bundle was published to the cache.
    Published,
    /// Every upstream failed; the previous bundle was served instead.
    StaleServed,
    /// Every upstream failed and nothing had been built before.
    Placeholder,
}

/// Summary of one build, kept for `status()` and journaled by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub build_id: Uuid,
    pub cycle: CycleKey,
    /// Cycle of the bundle handed to callers.
    pub served_cycle: CycleKey,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: BuildOutcome,
    pub source_errors: BTreeSet<SourceId>,
    pub ai_model: Option<String>,
    pub ai_attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshEvent {
    BuildStarted {
        build_id: Uuid,
        cycle: CycleKey,
        at: DateTime<Utc>,
    },
    BuildFinished(RefreshReport),
}

#[derive(Clone)]
struct FailedBuild {
    at: DateTime<Utc>,
    served: Arc<Bundle>,
}

struct Inner {
    airfield: AirfieldConfig,
    upstream: UpstreamConfig,
    language: String,
    mode: RefreshMode,
    failure_retry: chrono::Duration,
    upstream_timeout: Duration,
    schedule: Schedule,
    sources: Sources,
    cache: CacheStore,
    in_flight: DashMap<CycleKey, BuildSlot>,
    failures: DashMap<CycleKey, FailedBuild>,
    events: broadcast::Sender<RefreshEvent>,
    last_report: RwLock<Option<RefreshReport>>,
    builds: AtomicU64,
}

/// Removes the in-flight marker when the build finishes or is abandoned.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: CycleKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

struct Leader {
    tx: watch::Sender<Option<Arc<Bundle>>>,
    _guard: InFlightGuard,
}

enum Claim {
    Leader(Leader),
    Follower(BuildSlot),
}

/// Cheap to clone; clones share one cache and one in-flight map.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

impl RefreshScheduler {
    pub fn new(config: &AppConfig, sources: Sources) -> Result<Self, Error> {
        let schedule = Schedule::from_config(&config.schedule)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                airfield: config.airfield.clone(),
                upstream: config.upstream.clone(),
                language: config.ai.language.clone(),
                mode: config.schedule.mode,
                failure_retry: chrono::Duration::seconds(
                    config.schedule.failure_retry_secs.min(MAX_RETRY_SECS) as i64,
                ),
                upstream_timeout: Duration::from_secs(config.upstream.timeout_secs),
                schedule,
                sources,
                cache: CacheStore::new(),
                in_flight: DashMap::new(),
                failures: DashMap::new(),
                events,
                last_report: RwLock::new(None),
                builds: AtomicU64::new(0),
            }),
        })
    }

    /// Scheduler over the real HTTP upstreams.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let sources = Sources::from_config(config)?;
        Self::new(config, sources)
    }

    pub fn schedule(&self) -> &Schedule {
        &self.inner.schedule
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.inner.events.subscribe()
    }

    /// Report of the most recent build.
    pub async fn status(&self) -> Option<RefreshReport> {
        self.inner.last_report.read().await.clone()
    }

    /// Number of builds started since creation.
    pub fn builds_started(&self) -> u64 {
        self.inner.builds.load(Ordering::SeqCst)
    }

    /// Best available bundle for `now`. Never fails: upstream problems show
    /// up in `source_errors` and `stale`.
    #[instrument(skip(self), fields(cycle = tracing::field::Empty))]
    pub async fn get_current_bundle(&self, now: DateTime<Utc>) -> Arc<Bundle> {
        let cycle = self.inner.schedule.cycle_at(now);
        tracing::Span::current().record("cycle", tracing::field::display(cycle.key));

        if !self.inner.schedule.in_window(now) {
            debug!("Outside operating window at {}", self.inner.schedule.local_label(now));
            return self.last_good_or_placeholder(cycle.key, now);
        }

        loop {
            if let Some(ready) = self.ready(&cycle.key, now) {
                return ready;
            }

            match self.claim(cycle.key) {
                Claim::Leader(leader) => {
                    // A previous leader may have finished between the check and the claim.
                    if let Some(ready) = self.ready(&cycle.key, now) {
                        return ready;
                    }

                    // The build owns the claim, so dropping this caller never abandons it.
                    let stale = self.stale_answer(cycle.key);
                    let rx = leader.tx.subscribe();
                    let this = self.clone();
                    let building = cycle.clone();
                    tokio::spawn(
                        async move { this.build(building, now, leader).await }.in_current_span(),
                    );

                    if let Some(stale) = stale {
                        return stale;
                    }
                    if let Some(bundle) = wait_for_build(rx).await {
                        return bundle;
                    }
                }
                Claim::Follower(rx) => {
                    if let Some(stale) = self.stale_answer(cycle.key) {
                        return stale;
                    }
                    if let Some(bundle) = wait_for_build(rx).await {
                        return bundle;
                    }
                }
            }
            debug!("In-flight build for {} was abandoned, retrying", cycle.key);
        }
    }

    /// Previous bundle marked stale, when the mode allows answering before the build ends.
    fn stale_answer(&self, key: CycleKey) -> Option<Arc<Bundle>> {
        if self.inner.mode != RefreshMode::StaleWhileRevalidate {
            return None;
        }
        self.inner
            .cache
            .latest()
            .map(|previous| Arc::new(previous.bundle.served_stale(key, &BTreeSet::new())))
    }

    /// Bundle that can be served for `key` without building.
    fn ready(&self, key: &CycleKey, now: DateTime<Utc>) -> Option<Arc<Bundle>> {
        if let Some(entry) = self.inner.cache.read(key) {
            return Some(entry.bundle);
        }
        let failed = self.inner.failures.get(key).map(|f| f.value().clone())?;
        if now < failed.at + self.inner.failure_retry {
            Some(failed.served)
        } else {
            None
        }
    }

    fn claim(&self, key: CycleKey) -> Claim {
        match self.inner.in_flight.entry(key) {
            Entry::Occupied(slot) => Claim::Follower(slot.get().clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                Claim::Leader(Leader {
                    tx,
                    _guard: InFlightGuard {
                        inner: Arc::clone(&self.inner),
                        key,
                    },
                })
            }
        }
    }

    fn last_good_or_placeholder(&self, key: CycleKey, now: DateTime<Utc>) -> Arc<Bundle> {
        match self.inner.cache.latest() {
            Some(entry) => entry.bundle,
            None => Arc::new(self.placeholder(key, now)),
        }
    }

    fn placeholder(&self, key: CycleKey, now: DateTime<Utc>) -> Bundle {
        placeholder_bundle(
            key,
            &self.inner.airfield.name,
            &self.inner.airfield.icao,
            &self.inner.airfield.metar_station,
            now,
        )
    }

    async fn build(&self, cycle: RefreshCycle, now: DateTime<Utc>, leader: Leader) {
        let inner = &self.inner;
        let build_id = Uuid::new_v4();
        let started = Instant::now();
        inner.builds.fetch_add(1, Ordering::SeqCst);

        info!("Building bundle for cycle {} ({})", cycle.key, build_id);
        let _ = inner.events.send(RefreshEvent::BuildStarted {
            build_id,
            cycle: cycle.key,
            at: now,
        });

        let inputs = self.fetch(&cycle, now).await;
        let errors = inputs.failed_sources();

        let (bundle, outcome) = if inputs.is_total_failure() {
            let (served, outcome) = match inner.cache.latest() {
                Some(previous) => (
                    previous.bundle.served_stale(cycle.key, &errors),
                    BuildOutcome::StaleServed,
                ),
                None => (self.placeholder(cycle.key, now), BuildOutcome::Placeholder),
            };
            let served = Arc::new(served);
            warn!(
                "All upstreams failed for cycle {}; serving {} bundle, next attempt after {}s",
                cycle.key,
                served.cycle,
                inner.failure_retry.num_seconds()
            );
            inner.failures.retain(|key, _| *key >= cycle.key);
            inner.failures.insert(
                cycle.key,
                FailedBuild {
                    at: now,
                    served: Arc::clone(&served),
                },
            );
            (served, outcome)
        } else {
            let bundle = Arc::new(build_bundle(&inputs, now));
            inner.cache.publish(cycle.clone(), Arc::clone(&bundle), now);
            inner.failures.remove(&cycle.key);
            (bundle, BuildOutcome::Published)
        };

        let analysis = inputs.analysis.as_ref();
        let report = RefreshReport {
            build_id,
            cycle: cycle.key,
            served_cycle: bundle.cycle,
            started_at: now,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            source_errors: errors,
            ai_model: analysis.and_then(|a| a.model_id()).map(str::to_string),
            ai_attempts: analysis.map(|a| a.attempts().to_vec()).unwrap_or_default(),
        };
        info!(
            "Cycle {} build finished: {:?} in {}ms, failed sources: {:?}",
            report.cycle, report.outcome, report.elapsed_ms, report.source_errors
        );

        *inner.last_report.write().await = Some(report.clone());
        let _ = inner.events.send(RefreshEvent::BuildFinished(report));

        let _ = leader.tx.send(Some(bundle));
        drop(leader);
    }

    /// Fetch METAR, TAF and forecast concurrently, then run the AI step on
    /// whatever arrived.
    async fn fetch(&self, cycle: &RefreshCycle, now: DateTime<Utc>) -> BundleInputs {
        let inner = &self.inner;
        let station = inner.airfield.metar_station.as_str();
        let timeout = inner.upstream_timeout;

        let (metar, taf, forecast) = tokio::join!(
            bounded(SourceId::Metar, timeout, inner.sources.metar.metar(station)),
            bounded(SourceId::Taf, timeout, inner.sources.metar.taf(station)),
            bounded(
                SourceId::Forecast,
                timeout,
                inner.sources.forecast.forecast(inner.airfield.lat, inner.airfield.lon)
            ),
        );

        for err in [metar.as_ref().err(), taf.as_ref().err(), forecast.as_ref().err()]
            .into_iter()
            .flatten()
        {
            warn!("Cycle {}: {}", cycle.key, err);
        }

        let mut inputs = BundleInputs {
            cycle: cycle.key,
            airfield_name: inner.airfield.name.clone(),
            airfield: inner.airfield.icao.clone(),
            elevation_m: inner.airfield.elevation_m,
            metar_station: inner.airfield.metar_station.clone(),
            metar,
            taf,
            forecast,
            map_template: inner.upstream.map_template.clone(),
            map_days: inner.upstream.map_days,
            analysis: None,
        };

        if inputs.is_total_failure() {
            debug!("Cycle {}: no data to analyse, skipping AI", cycle.key);
            return inputs;
        }

        let metar_text = inputs.metar.as_ref().ok().cloned();
        let ctx = AnalysisContext {
            cycle: cycle.key,
            local_time: inner.schedule.local_label(now),
            airfield_name: inner.airfield.name.clone(),
            airfield_icao: inner.airfield.icao.clone(),
            metar_station: inner.airfield.metar_station.clone(),
            flight_category: metar_text.as_deref().and_then(classify_flight_category),
            metar: metar_text,
            synthetic_metar: inputs.synthetic_metar(),
            taf: inputs.taf.as_ref().ok().cloned(),
            forecast: inputs.forecast.as_ref().ok().cloned().unwrap_or_default(),
            day_windows: inputs.day_windows(),
            map_urls: map_urls(&inputs.map_template, cycle.key.date, inputs.map_days)
                .into_values()
                .collect(),
            language: inner.language.clone(),
        };

        inputs.analysis = Some(inner.sources.narrative.analyze(&ctx).await);
        inputs
    }
}

/// Result of the build behind `rx`, or `None` if it ended without one.
async fn wait_for_build(mut rx: BuildSlot) -> Option<Arc<Bundle>> {
    let finished = rx.wait_for(Option::is_some).await.ok().and_then(|slot| slot.clone());
    finished
}

/// Bound one upstream call; a timeout counts as that source failing.
async fn bounded<T>(
    source: SourceId,
    timeout: Duration,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::upstream(
            source,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}
