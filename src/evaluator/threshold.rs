use crate::evaluator::alarm::{Disposition, ThresholdRule};
use crate::metrics::Sample;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Where samples sit relative to the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SampleDisposition {
    Inside,
    Outside,
    Unknown,
}

impl From<Disposition> for SampleDisposition {
    fn from(state: Disposition) -> Self {
        match state {
            Disposition::Ok => SampleDisposition::Inside,
            Disposition::Alarm => SampleDisposition::Outside,
            Disposition::InsufficientData => SampleDisposition::Unknown,
        }
    }
}

/// Structured reason attached to every notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonData {
    #[serde(rename = "type")]
    pub kind: String,
    pub disposition: SampleDisposition,
    pub count: usize,
    pub most_recent: Option<f64>,
}

impl ReasonData {
    fn new(disposition: SampleDisposition, count: usize, most_recent: Option<f64>) -> Self {
        Self {
            kind: "threshold".to_string(),
            disposition,
            count,
            most_recent,
        }
    }
}

/// What the samples of one pass say, before looking at the stored state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Fewer samples than evaluation periods.
    Insufficient { most_recent: Option<f64> },
    /// Every sample on the same side of the threshold.
    Unequivocal {
        state: Disposition,
        count: usize,
        most_recent: f64,
    },
    /// Samples on both sides.
    Equivocal { count: usize, most_recent: f64 },
}

/// Outcome of applying a verdict to an alarm's stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub state: Disposition,
    pub changed: bool,
    pub reason: String,
    pub reason_data: ReasonData,
}

/// Drops points of another granularity and keeps the latest
/// `evaluation_periods` ones, oldest first.
pub fn relevant_samples(rule: &ThresholdRule, mut samples: Vec<Sample>) -> Vec<Sample> {
    let granularity = f64::from(rule.granularity);

    samples.retain(|sample| sample.granularity == granularity);
    samples.sort_by_key(|sample| sample.timestamp);

    let keep = rule.evaluation_periods as usize;
    if samples.len() > keep {
        samples.drain(..samples.len() - keep);
    }

    samples
}

pub fn judge(rule: &ThresholdRule, samples: Vec<Sample>) -> Verdict {
    let samples = relevant_samples(rule, samples);
    let most_recent = samples.last().map(|sample| sample.value);

    let Some(most_recent) = most_recent.filter(|_| samples.len() >= rule.evaluation_periods as usize)
    else {
        return Verdict::Insufficient { most_recent };
    };

    let breaches: Vec<bool> = samples
        .iter()
        .map(|sample| rule.comparison_operator.compare(sample.value, rule.threshold))
        .collect();
    let count = breaches.len();

    if breaches.iter().all(|&breach| breach) {
        Verdict::Unequivocal {
            state: Disposition::Alarm,
            count,
            most_recent,
        }
    } else if breaches.iter().all(|&breach| !breach) {
        Verdict::Unequivocal {
            state: Disposition::Ok,
            count,
            most_recent,
        }
    } else {
        Verdict::Equivocal { count, most_recent }
    }
}

fn describe(prefix: &str, state: Disposition, count: usize, most_recent: f64) -> String {
    format!(
        "{prefix} {state} due to {count} samples {} threshold, most recent: {most_recent:?}",
        SampleDisposition::from(state)
    )
}

impl Verdict {
    /// Applies the verdict to an alarm currently in `current`.
    pub fn apply(self, current: Disposition, evaluation_periods: u32) -> Evaluation {
        match self {
            Verdict::Insufficient { most_recent } => {
                let count = evaluation_periods as usize;

                Evaluation {
                    state: Disposition::InsufficientData,
                    changed: current != Disposition::InsufficientData,
                    reason: format!("{count} datapoints are unknown"),
                    reason_data: ReasonData::new(SampleDisposition::Unknown, count, most_recent),
                }
            }
            Verdict::Unequivocal {
                state,
                count,
                most_recent,
            } => {
                let changed = state != current;
                let prefix = if changed { "Transition to" } else { "Remaining as" };

                Evaluation {
                    state,
                    changed,
                    reason: describe(prefix, state, count, most_recent),
                    reason_data: ReasonData::new(state.into(), count, Some(most_recent)),
                }
            }
            Verdict::Equivocal { count, most_recent } => Evaluation {
                state: current,
                changed: false,
                reason: describe("Remaining as", current, count, most_recent),
                reason_data: ReasonData::new(current.into(), count, Some(most_recent)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::alarm::{ComparisonOperator, MetricSource};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn rule() -> ThresholdRule {
        ThresholdRule {
            comparison_operator: ComparisonOperator::Gt,
            threshold: 80.0,
            aggregation_method: "mean".to_string(),
            evaluation_periods: 5,
            granularity: 60,
            source: MetricSource::Resource {
                metric: "cpu_util".to_string(),
                resource_id: "my_instance".to_string(),
                resource_type: "instance".to_string(),
            },
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 26, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| Sample {
                timestamp: at(i as i64),
                granularity: 60.0,
                value,
            })
            .collect()
    }

    #[test]
    fn test_all_outside_is_alarm() {
        let verdict = judge(&rule(), series(&[81.0, 82.0, 83.0, 84.0, 85.0]));

        assert_eq!(
            verdict,
            Verdict::Unequivocal {
                state: Disposition::Alarm,
                count: 5,
                most_recent: 85.0
            }
        );

        let evaluation = verdict.apply(Disposition::Ok, 5);
        assert!(evaluation.changed);
        assert_eq!(evaluation.state, Disposition::Alarm);
        assert_eq!(
            evaluation.reason,
            "Transition to alarm due to 5 samples outside threshold, most recent: 85.0"
        );
        assert_eq!(
            evaluation.reason_data,
            ReasonData::new(SampleDisposition::Outside, 5, Some(85.0))
        );
    }

    #[test]
    fn test_all_inside_remaining_ok() {
        let evaluation =
            judge(&rule(), series(&[1.5, 2.0, 8.0, 3.0, 8.0])).apply(Disposition::Ok, 5);

        assert!(!evaluation.changed);
        assert_eq!(
            evaluation.reason,
            "Remaining as ok due to 5 samples inside threshold, most recent: 8.0"
        );
    }

    #[test]
    fn test_insufficient_data() {
        let verdict = judge(&rule(), Vec::new());
        assert_eq!(verdict, Verdict::Insufficient { most_recent: None });

        let evaluation = verdict.apply(Disposition::Ok, 5);
        assert!(evaluation.changed);
        assert_eq!(evaluation.state, Disposition::InsufficientData);
        assert_eq!(evaluation.reason, "5 datapoints are unknown");
        assert_eq!(
            evaluation.reason_data,
            ReasonData::new(SampleDisposition::Unknown, 5, None)
        );

        let verdict = judge(&rule(), series(&[90.0, 91.0]));
        assert_eq!(verdict, Verdict::Insufficient { most_recent: Some(91.0) });
        assert!(!verdict.apply(Disposition::InsufficientData, 5).changed);
    }

    #[test]
    fn test_equivocal_keeps_stored_state() {
        let verdict = judge(&rule(), series(&[81.0, 70.0, 83.0, 84.0, 85.0]));
        assert_eq!(
            verdict,
            Verdict::Equivocal {
                count: 5,
                most_recent: 85.0
            }
        );

        for current in [Disposition::Ok, Disposition::Alarm, Disposition::InsufficientData] {
            let evaluation = verdict.apply(current, 5);
            assert!(!evaluation.changed);
            assert_eq!(evaluation.state, current);
        }

        let evaluation = verdict.apply(Disposition::Ok, 5);
        assert_eq!(
            evaluation.reason,
            "Remaining as ok due to 5 samples inside threshold, most recent: 85.0"
        );
    }

    #[test]
    fn test_relevant_samples() {
        let mut samples = series(&[10.0, 20.0, 81.0, 82.0, 83.0, 84.0, 85.0]);
        samples.push(Sample {
            timestamp: at(30),
            granularity: 300.0,
            value: 1.0,
        });
        samples.reverse();

        let relevant = relevant_samples(&rule(), samples);
        let values: Vec<f64> = relevant.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![81.0, 82.0, 83.0, 84.0, 85.0]);
    }

    #[test]
    fn test_granularity_mismatch_is_discarded() {
        let samples = series(&[81.0, 82.0, 83.0, 84.0, 85.0])
            .into_iter()
            .map(|sample| Sample {
                granularity: 300.0,
                ..sample
            })
            .collect();

        assert_eq!(
            judge(&rule(), samples),
            Verdict::Insufficient { most_recent: None }
        );
    }

    #[test]
    fn test_reason_data_wire_format() -> anyhow::Result<()> {
        let data = ReasonData::new(SampleDisposition::Unknown, 5, None);

        assert_eq!(
            serde_json::to_value(&data)?,
            serde_json::json!({
                "type": "threshold",
                "disposition": "unknown",
                "count": 5,
                "most_recent": null
            })
        );

        Ok(())
    }
}
