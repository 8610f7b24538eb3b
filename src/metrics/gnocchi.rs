use crate::metrics::{AggregationTarget, MetricsError, MetricsResult, MetricsService, Sample};
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::trace;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `[timestamp, granularity, value]` as returned by the API.
#[derive(Deserialize)]
struct RawSample(String, f64, f64);

fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

impl TryFrom<RawSample> for Sample {
    type Error = MetricsError;

    fn try_from(RawSample(timestamp, granularity, value): RawSample) -> MetricsResult<Self> {
        let timestamp = parse_timestamp(&timestamp).ok_or_else(|| {
            MetricsError::Unavailable(format!("invalid timestamp in response: '{timestamp}'"))
        })?;

        Ok(Sample {
            timestamp,
            granularity,
            value,
        })
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Client for the Gnocchi metrics HTTP API.
pub struct GnocchiClient {
    client: Client,
    base_url: Url,
}

impl GnocchiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> MetricsResult<Url> {
        let mut url = self.base_url.clone();

        url.path_segments_mut()
            .map_err(|_| {
                MetricsError::Unavailable(format!("invalid metrics base url: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> MetricsResult<Vec<Sample>> {
        let response = request
            .send()
            .await
            .map_err(|e| MetricsError::Unavailable(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::NotFound(body));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::Unavailable(format!("{status}: {body}")));
        }

        let raw: Vec<RawSample> = response
            .json()
            .await
            .map_err(|e| MetricsError::Unavailable(format!("invalid response body: {e}")))?;

        raw.into_iter().map(Sample::try_from).collect()
    }
}

impl MetricsService for GnocchiClient {
    async fn get_measures(
        &self,
        metric: &str,
        resource_id: &str,
        aggregation: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> MetricsResult<Vec<Sample>> {
        trace!("Fetching measures of {metric} for resource {resource_id}");

        let url = self.endpoint(&["v1", "resource", "generic", resource_id, "metric", metric, "measures"])?;

        let request = self.client.get(url).query(&[
            ("aggregation", aggregation.to_string()),
            ("start", format_timestamp(start)),
            ("stop", format_timestamp(stop)),
        ]);

        self.send(request).await
    }

    async fn aggregate(
        &self,
        target: AggregationTarget<'_>,
        aggregation: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> MetricsResult<Vec<Sample>> {
        let mut params = vec![
            ("aggregation", aggregation.to_string()),
            ("start", format_timestamp(start)),
            ("stop", format_timestamp(stop)),
        ];

        let request = match target {
            AggregationTarget::Metrics(ids) => {
                trace!("Aggregating metrics {ids:?}");

                params.extend(ids.iter().map(|id| ("metric", id.clone())));
                let url = self.endpoint(&["v1", "aggregation", "metric"])?;

                self.client.get(url).query(&params)
            }
            AggregationTarget::Resources {
                metric,
                resource_type,
                query,
            } => {
                trace!("Aggregating {metric} over {resource_type} resources matching {query}");

                params.push(("needed_overlap", "0".to_string()));
                let url = self.endpoint(&["v1", "aggregation", "resource", resource_type, "metric", metric])?;

                self.client.post(url).query(&params).json(query)
            }
        };

        self.send(request).await
    }
}
