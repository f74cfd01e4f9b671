//! Upstream capabilities the scheduler builds from.
//!
//! The concrete clients implement these; tests substitute fakes.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AppConfig, Error, ForecastSeries};
use llm_client::{AnalysisContext, AnalysisGateway, AnalysisOutcome};
use metar_client::MetarClient;
use open_meteo_client::OpenMeteoClient;

#[async_trait]
pub trait MetarSource: Send + Sync {
    async fn metar(&self, station: &str) -> Result<String, Error>;
    async fn taf(&self, station: &str) -> Result<String, Error>;
}

#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn forecast(&self, lat: f64, lon: f64) -> Result<ForecastSeries, Error>;
}

#[async_trait]
pub trait NarrativeSource: Send + Sync {
    async fn analyze(&self, ctx: &AnalysisContext) -> AnalysisOutcome;
}

#[async_trait]
impl MetarSource for MetarClient {
    async fn metar(&self, station: &str) -> Result<String, Error> {
        self.fetch_metar(station).await
    }

    async fn taf(&self, station: &str) -> Result<String, Error> {
        self.fetch_taf(station).await
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoClient {
    async fn forecast(&self, lat: f64, lon: f64) -> Result<ForecastSeries, Error> {
        self.get_forecast(lat, lon).await
    }
}

#[async_trait]
impl NarrativeSource for AnalysisGateway {
    async fn analyze(&self, ctx: &AnalysisContext) -> AnalysisOutcome {
        AnalysisGateway::analyze(self, ctx).await
    }
}

/// The set of upstreams one scheduler uses.
#[derive(Clone)]
pub struct Sources {
    pub metar: Arc<dyn MetarSource>,
    pub forecast: Arc<dyn ForecastSource>,
    pub narrative: Arc<dyn NarrativeSource>,
}

impl Sources {
    /// Real HTTP clients built from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let metar = MetarClient::new(&config.upstream)?;
        let forecast = OpenMeteoClient::new(&config.upstream, &config.schedule.timezone)?;
        let narrative = AnalysisGateway::from_config(config)
            .map_err(|e| Error::Config(format!("AI gateway: {e}")))?;

        Ok(Self {
            metar: Arc::new(metar),
            forecast: Arc::new(forecast),
            narrative: Arc::new(narrative),
        })
    }
}
