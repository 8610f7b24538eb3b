use crate::evaluator::time_constraint::TimeConstraint;
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Disposition {
    #[serde(rename = "ok")]
    #[strum(serialize = "ok")]
    Ok,
    #[serde(rename = "alarm")]
    #[strum(serialize = "alarm")]
    Alarm,
    #[serde(rename = "insufficient data")]
    #[strum(serialize = "insufficient data")]
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComparisonOperator {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl ComparisonOperator {
    /// Whether `value` breaches `threshold`.
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
            Self::Ge => value >= threshold,
            Self::Gt => value > threshold,
        }
    }
}

/// Which series the metrics service should aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricSource {
    /// One metric of one resource.
    Resource {
        metric: String,
        resource_id: String,
        resource_type: String,
    },
    /// An explicit list of metric ids, aggregated together.
    Metrics { metrics: Vec<String> },
    /// One metric across every resource matching `query`.
    ResourcesQuery {
        metric: String,
        resource_type: String,
        query: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub comparison_operator: ComparisonOperator,
    pub threshold: f64,
    pub aggregation_method: String,
    pub evaluation_periods: u32,
    /// Seconds covered by each sample.
    pub granularity: u32,
    #[serde(flatten)]
    pub source: MetricSource,
}

/// Longest span a rule may evaluate over, in seconds.
const MAX_WINDOW_SECONDS: i64 = 366 * 24 * 3600;

impl ThresholdRule {
    /// Total time covered by the evaluated samples.
    pub fn window(&self) -> Result<TimeDelta> {
        self.span(u64::from(self.evaluation_periods))
    }

    /// Time covered by `periods` samples of this rule's granularity.
    pub fn span(&self, periods: u64) -> Result<TimeDelta> {
        i64::try_from(periods)
            .ok()
            .and_then(|periods| i64::from(self.granularity).checked_mul(periods))
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| anyhow!("{periods} periods of {}s are out of range", self.granularity))
    }

    pub fn validate(&self) -> Result<()> {
        if self.evaluation_periods < 1 {
            bail!("evaluation_periods must be at least 1");
        }
        if self.granularity < 1 {
            bail!("granularity must be at least 1 second");
        }
        if self.window()? > TimeDelta::seconds(MAX_WINDOW_SECONDS) {
            bail!("granularity * evaluation_periods cannot exceed {MAX_WINDOW_SECONDS}s");
        }
        if !self.threshold.is_finite() {
            bail!("threshold must be a finite number");
        }
        if self.aggregation_method.trim().is_empty() {
            bail!("aggregation_method cannot be empty");
        }

        match &self.source {
            MetricSource::Resource {
                metric,
                resource_id,
                resource_type,
            } => {
                if metric.is_empty() || resource_id.is_empty() || resource_type.is_empty() {
                    bail!("metric, resource_id and resource_type are required");
                }
            }
            MetricSource::Metrics { metrics } => {
                if metrics.is_empty() || metrics.iter().any(|m| m.is_empty()) {
                    bail!("metrics must be a non-empty list of metric ids");
                }
            }
            MetricSource::ResourcesQuery {
                metric,
                resource_type,
                query,
            } => {
                if metric.is_empty() || resource_type.is_empty() {
                    bail!("metric and resource_type are required");
                }
                if !query.is_object() {
                    bail!("query must be a JSON object");
                }
            }
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_disposition() -> Disposition {
    Disposition::InsufficientData
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub alarm_id: Uuid,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_disposition")]
    pub state: Disposition,
    #[serde(default = "Utc::now")]
    pub state_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub state_reason: Option<String>,
    #[serde(default)]
    pub repeat_actions: bool,
    #[serde(default)]
    pub time_constraints: Vec<TimeConstraint>,
    pub rule: ThresholdRule,
}

impl Alarm {
    /// Rejects alarms the evaluator cannot process.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("alarm {} has an empty name", self.alarm_id);
        }

        self.rule.validate()?;

        for constraint in &self.time_constraints {
            constraint.validate()?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn example(rule: ThresholdRule) -> Self {
        Self {
            alarm_id: Uuid::new_v4(),
            name: "instance_running_hot".to_string(),
            enabled: true,
            state: Disposition::InsufficientData,
            state_timestamp: DateTime::UNIX_EPOCH,
            state_reason: None,
            repeat_actions: false,
            time_constraints: Vec::new(),
            rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disposition_strings() -> Result<()> {
        assert_eq!(Disposition::InsufficientData.to_string(), "insufficient data");
        assert_eq!("alarm".parse::<Disposition>()?, Disposition::Alarm);
        assert_eq!(
            serde_json::to_value(Disposition::InsufficientData)?,
            json!("insufficient data")
        );

        Ok(())
    }

    #[test]
    fn test_comparison_operators() {
        use ComparisonOperator::*;

        assert!(Gt.compare(81.0, 80.0));
        assert!(!Gt.compare(80.0, 80.0));
        assert!(Ge.compare(80.0, 80.0));
        assert!(Lt.compare(9.0, 10.0));
        assert!(Le.compare(10.0, 10.0));
        assert!(Eq.compare(10.0, 10.0));
        assert!(Ne.compare(10.5, 10.0));
        assert!(!Ne.compare(10.0, 10.0));
    }

    #[test]
    fn test_deserialize_source_shapes() -> Result<()> {
        let alarm: Alarm = serde_json::from_value(json!({
            "alarm_id": "6f8c8ad2-2b8e-4c7b-9d43-8a6a3c0f7a11",
            "name": "instance_running_hot",
            "rule": {
                "comparison_operator": "gt",
                "threshold": 80.0,
                "aggregation_method": "mean",
                "evaluation_periods": 5,
                "granularity": 60,
                "metric": "cpu_util",
                "resource_type": "instance",
                "resource_id": "my_instance"
            }
        }))?;

        assert!(alarm.enabled);
        assert_eq!(alarm.state, Disposition::InsufficientData);
        assert!(matches!(alarm.rule.source, MetricSource::Resource { .. }));

        let rule: ThresholdRule = serde_json::from_value(json!({
            "comparison_operator": "le",
            "threshold": 10.0,
            "aggregation_method": "max",
            "evaluation_periods": 4,
            "granularity": 300,
            "metrics": ["0bb1604d-1193-4c0a-b4b8-74b170e35e83"]
        }))?;
        assert!(matches!(rule.source, MetricSource::Metrics { .. }));

        let rule: ThresholdRule = serde_json::from_value(json!({
            "comparison_operator": "gt",
            "threshold": 80.0,
            "aggregation_method": "mean",
            "evaluation_periods": 6,
            "granularity": 50,
            "metric": "cpu_util",
            "resource_type": "instance",
            "query": {"=": {"server_group": "my_autoscaling_group"}}
        }))?;
        assert!(matches!(rule.source, MetricSource::ResourcesQuery { .. }));
        assert_eq!(rule.window()?, TimeDelta::seconds(300));

        Ok(())
    }

    #[test]
    fn test_validate_rejects_malformed_rules() {
        let rule = ThresholdRule {
            comparison_operator: ComparisonOperator::Gt,
            threshold: 80.0,
            aggregation_method: "mean".to_string(),
            evaluation_periods: 5,
            granularity: 60,
            source: MetricSource::Metrics {
                metrics: vec!["m1".to_string()],
            },
        };
        assert!(Alarm::example(rule.clone()).validate().is_ok());

        let mut invalid = rule.clone();
        invalid.evaluation_periods = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = rule.clone();
        invalid.granularity = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = rule.clone();
        invalid.granularity = 4_000_000_000;
        invalid.evaluation_periods = 4_000_000_000;
        assert!(invalid.validate().is_err());

        let mut invalid = rule.clone();
        invalid.granularity = 86400;
        invalid.evaluation_periods = 367;
        assert!(invalid.validate().is_err());

        let mut invalid = rule.clone();
        invalid.threshold = f64::NAN;
        assert!(invalid.validate().is_err());

        let mut invalid = rule.clone();
        invalid.source = MetricSource::Metrics { metrics: vec![] };
        assert!(invalid.validate().is_err());

        let mut invalid = rule;
        invalid.source = MetricSource::ResourcesQuery {
            metric: "cpu_util".to_string(),
            resource_type: "instance".to_string(),
            query: serde_json::json!("not an object"),
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_window_out_of_range() -> Result<()> {
        let mut rule = ThresholdRule {
            comparison_operator: ComparisonOperator::Gt,
            threshold: 80.0,
            aggregation_method: "mean".to_string(),
            evaluation_periods: 4_000_000_000,
            granularity: 4_000_000_000,
            source: MetricSource::Metrics {
                metrics: vec!["m1".to_string()],
            },
        };
        assert!(rule.window().is_err());

        rule.granularity = 60;
        assert_eq!(rule.window()?, TimeDelta::seconds(240_000_000_000));
        assert!(rule.span(u64::MAX).is_err());

        Ok(())
    }
}
