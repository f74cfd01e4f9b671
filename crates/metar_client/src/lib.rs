//! aviationweather.gov METAR/TAF client.
//!
//! Fetches raw report text for a single station. Reports are returned
//! verbatim; interpretation lives in [`category`]. [`synthetic`] estimates
//! a report for fields without a station of their own.

pub mod category;
pub mod synthetic;

pub use category::classify_flight_category;
pub use synthetic::synthetic_metar;

use std::time::Duration;

use common::config::UpstreamConfig;
use common::{body_excerpt, Error, SourceId};
use tracing::debug;

/// Raw METAR/TAF text client with connection pooling.
#[derive(Debug, Clone)]
pub struct MetarClient {
    client: reqwest::Client,
    metar_url: String,
    taf_url: String,
}

impl MetarClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("failed to build METAR HTTP client: {e}")))?;

        Ok(Self {
            client,
            metar_url: config.metar_url.clone(),
            taf_url: config.taf_url.clone(),
        })
    }

    /// Fetch the latest METAR for `station`.
    pub async fn fetch_metar(&self, station: &str) -> Result<String, Error> {
        self.fetch_raw(
            SourceId::Metar,
            &self.metar_url,
            &[("ids", station), ("format", "raw"), ("taf", "false")],
            station,
        )
        .await
    }

    /// Fetch the current TAF for `station`.
    pub async fn fetch_taf(&self, station: &str) -> Result<String, Error> {
        self.fetch_raw(
            SourceId::Taf,
            &self.taf_url,
            &[("ids", station), ("format", "raw")],
            station,
        )
        .await
    }

    async fn fetch_raw(
        &self,
        source: SourceId,
        url: &str,
        query: &[(&str, &str)],
        station: &str,
    ) -> Result<String, Error> {
        debug!("Fetching {} for {}: {}", source, station, url);

        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::upstream(source, format!("HTTP error for {station}: {e}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(
                source,
                format!(
                    "{} returned {} for {}: {}",
                    url,
                    status,
                    station,
                    body_excerpt(&body)
                ),
            ));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::upstream(source, format!("body read error for {station}: {e}")))?;

        parse_report(&body).ok_or_else(|| {
            Error::upstream(source, format!("no {} available for {}", source, station))
        })
    }
}

/// Trim the response body; an empty body or a "No ..." notice means no report.
fn parse_report(body: &str) -> Option<String> {
    let report = body.trim();
    if report.is_empty() || report.starts_with("No") {
        return None;
    }
    Some(report.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            metar_url: format!("{}/api/data/metar", server.uri()),
            taf_url: format!("{}/api/data/taf", server.uri()),
            ..UpstreamConfig::default()
        }
    }

    #[test]
    fn test_parse_report_rejects_notices() {
        assert_eq!(parse_report("  \n"), None);
        assert_eq!(parse_report("No METAR found for LEXX"), None);
        assert_eq!(
            parse_report("LEAS 131030Z 24012KT 9999 FEW030 14/09 Q1016\n").as_deref(),
            Some("LEAS 131030Z 24012KT 9999 FEW030 14/09 Q1016")
        );
    }

    #[tokio::test]
    async fn test_fetch_metar_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/metar"))
            .and(query_param("ids", "LEAS"))
            .and(query_param("format", "raw"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("LEAS 131030Z 24012KT 9999 FEW030 14/09 Q1016\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = MetarClient::new(&config_for(&server)).expect("client builds");
        let metar = client.fetch_metar("LEAS").await.expect("metar fetched");

        assert_eq!(metar, "LEAS 131030Z 24012KT 9999 FEW030 14/09 Q1016");
    }

    #[tokio::test]
    async fn test_fetch_metar_server_error_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/metar"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = MetarClient::new(&config_for(&server)).expect("client builds");
        let err = client.fetch_metar("LEAS").await.expect_err("should fail");

        assert_eq!(err.provider(), Some(SourceId::Metar));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_error_body_with_multibyte_char_at_cut_is_reported() {
        let server = MockServer::start().await;
        let body = format!("{}é tail", "a".repeat(499));
        Mock::given(method("GET"))
            .and(path("/api/data/metar"))
            .respond_with(ResponseTemplate::new(503).set_body_string(body))
            .mount(&server)
            .await;

        let client = MetarClient::new(&config_for(&server)).expect("client builds");
        let err = client.fetch_metar("LEAS").await.expect_err("should fail");

        let message = err.to_string();
        assert_eq!(err.provider(), Some(SourceId::Metar));
        assert!(message.ends_with('é'));
        assert!(!message.contains("tail"));
    }

    #[tokio::test]
    async fn test_fetch_taf_empty_body_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/taf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let client = MetarClient::new(&config_for(&server)).expect("client builds");
        let err = client.fetch_taf("LEAS").await.expect_err("should fail");

        assert_eq!(err.provider(), Some(SourceId::Taf));
    }
}
