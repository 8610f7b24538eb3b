pub mod gnocchi;

use crate::evaluator::alarm::{MetricSource, ThresholdRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One aggregated point of a metric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Seconds covered by the point.
    pub granularity: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    /// Transport failure or server side error, worth retrying.
    #[error("metrics service unavailable: {0}")]
    Unavailable(String),
    /// The metric or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Series selected by an aggregation query.
#[derive(Debug, Clone, Copy)]
pub enum AggregationTarget<'a> {
    Metrics(&'a [String]),
    Resources {
        metric: &'a str,
        resource_type: &'a str,
        query: &'a serde_json::Value,
    },
}

/// The external service holding metric measures.
///
/// Both queries return samples ordered by timestamp, oldest first.
pub trait MetricsService: Send + Sync {
    fn get_measures(
        &self,
        metric: &str,
        resource_id: &str,
        aggregation: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> impl Future<Output = MetricsResult<Vec<Sample>>> + Send;

    fn aggregate(
        &self,
        target: AggregationTarget<'_>,
        aggregation: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> impl Future<Output = MetricsResult<Vec<Sample>>> + Send;
}

/// Runs the query matching the rule's source shape.
pub async fn fetch_samples<M: MetricsService>(
    metrics: &M,
    rule: &ThresholdRule,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
) -> MetricsResult<Vec<Sample>> {
    let aggregation = rule.aggregation_method.as_str();

    match &rule.source {
        MetricSource::Resource {
            metric,
            resource_id,
            ..
        } => {
            metrics
                .get_measures(metric, resource_id, aggregation, start, stop)
                .await
        }
        MetricSource::Metrics { metrics: ids } => {
            metrics
                .aggregate(AggregationTarget::Metrics(ids), aggregation, start, stop)
                .await
        }
        MetricSource::ResourcesQuery {
            metric,
            resource_type,
            query,
        } => {
            let target = AggregationTarget::Resources {
                metric,
                resource_type,
                query,
            };
            metrics.aggregate(target, aggregation, start, stop).await
        }
    }
}
