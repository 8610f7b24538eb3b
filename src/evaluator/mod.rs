//! Threshold alarm evaluation.
//!
//! Each pass fetches the recent samples of an alarm's series, decides whether
//! they breach the rule's threshold and moves the alarm between `ok`, `alarm`
//! and `insufficient data`, persisting transitions and notifying listeners.

pub mod alarm;
#[cfg(test)]
pub(crate) mod testing;
pub mod threshold;
pub mod time_constraint;

use crate::evaluator::alarm::{Alarm, Disposition, ThresholdRule};
use crate::evaluator::threshold::{ReasonData, judge};
use crate::evaluator::time_constraint::within_time_constraints;
use crate::metrics::{MetricsError, MetricsResult, MetricsService, Sample, fetch_samples};
use crate::notifier::Notifier;
use crate::storage::AlarmStore;
use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Extra attempts after a failed fetch, within one pass.
    pub fetch_retries: u32,
    pub retry_backoff: std::time::Duration,
    /// Periods queried beyond `evaluation_periods`.
    pub look_back: u32,
    pub max_concurrent: usize,
    /// Expected time between two passes over the same alarm.
    pub pass_interval: std::time::Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            fetch_retries: 1,
            retry_backoff: std::time::Duration::from_millis(500),
            look_back: 0,
            max_concurrent: 16,
            pass_interval: std::time::Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Disabled,
    OutsideTimeConstraint,
    /// Samples could not be obtained (or the new state not persisted); the
    /// alarm is retried on the next pass.
    Deferred,
    Transitioned {
        from: Disposition,
        to: Disposition,
    },
    Unchanged {
        notified: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub evaluated: usize,
    pub transitioned: usize,
    pub deferred: usize,
    pub skipped: usize,
}

impl BatchSummary {
    fn record(mut self, outcome: &PassOutcome) -> Self {
        match outcome {
            PassOutcome::Disabled | PassOutcome::OutsideTimeConstraint => self.skipped += 1,
            PassOutcome::Deferred => self.deferred += 1,
            PassOutcome::Transitioned { .. } => {
                self.evaluated += 1;
                self.transitioned += 1;
            }
            PassOutcome::Unchanged { .. } => self.evaluated += 1,
        }
        self
    }
}

/// A run of consecutive passes whose fetches all failed.
#[derive(Debug, Clone, Copy)]
struct FailureStreak {
    since: DateTime<Utc>,
    last: DateTime<Utc>,
}

pub struct Evaluator<M, S, N> {
    metrics: Arc<M>,
    store: Arc<S>,
    notifier: Arc<N>,
    config: EvaluatorConfig,
    failures: Mutex<HashMap<Uuid, FailureStreak>>,
}

impl<M, S, N> Evaluator<M, S, N>
where
    M: MetricsService,
    S: AlarmStore,
    N: Notifier,
{
    pub fn new(metrics: Arc<M>, store: Arc<S>, notifier: Arc<N>, config: EvaluatorConfig) -> Self {
        Self {
            metrics,
            store,
            notifier,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch_with_retry(
        &self,
        rule: &ThresholdRule,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> MetricsResult<Vec<Sample>> {
        let mut attempt = 0;

        loop {
            match fetch_samples(self.metrics.as_ref(), rule, start, stop).await {
                Err(MetricsError::Unavailable(e)) if attempt < self.config.fetch_retries => {
                    attempt += 1;
                    debug!("Fetch attempt {attempt} failed, retrying: {e}");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                result => return result,
            }
        }
    }

    /// Start of the query window and the span a failure streak must last.
    fn query_bounds(&self, rule: &ThresholdRule, now: DateTime<Utc>) -> Result<(DateTime<Utc>, TimeDelta)> {
        let periods = u64::from(rule.evaluation_periods) + u64::from(self.config.look_back);
        let start = now
            .checked_sub_signed(rule.span(periods)?)
            .ok_or_else(|| anyhow!("query window of {periods} periods starts before the earliest date"))?;

        Ok((start, rule.window()?))
    }

    /// Failures further apart than this belong to different streaks.
    fn max_failure_gap(&self, window: TimeDelta) -> TimeDelta {
        let between_passes = TimeDelta::from_std(self.config.pass_interval.saturating_mul(2))
            .unwrap_or(TimeDelta::MAX);

        window.max(between_passes)
    }

    /// `None` means the pass should be deferred.
    async fn samples_for(&self, alarm: &Alarm, now: DateTime<Utc>) -> Option<Vec<Sample>> {
        let rule = &alarm.rule;
        let (start, window) = match self.query_bounds(rule, now) {
            Ok(bounds) => bounds,
            Err(e) => {
                error!("Cannot evaluate alarm {}: {e:#}", alarm.alarm_id);
                return None;
            }
        };

        match self.fetch_with_retry(rule, start, now).await {
            Ok(samples) => {
                self.failures.lock().await.remove(&alarm.alarm_id);
                Some(samples)
            }
            Err(MetricsError::NotFound(e)) => {
                self.failures.lock().await.remove(&alarm.alarm_id);
                warn!("Series of alarm {} not found: {e}", alarm.alarm_id);
                Some(Vec::new())
            }
            Err(MetricsError::Unavailable(e)) => {
                let max_gap = self.max_failure_gap(window);
                let mut failures = self.failures.lock().await;
                let streak = failures
                    .entry(alarm.alarm_id)
                    .and_modify(|streak| {
                        if now - streak.last > max_gap {
                            streak.since = now;
                        }
                        streak.last = now;
                    })
                    .or_insert(FailureStreak { since: now, last: now });
                let since = streak.since;

                if now - since >= window {
                    warn!(
                        "Metrics unavailable for alarm {} since {since}, treating as no data: {e}",
                        alarm.alarm_id
                    );
                    Some(Vec::new())
                } else {
                    warn!("Deferring alarm {}, metrics unavailable: {e}", alarm.alarm_id);
                    None
                }
            }
        }
    }

    async fn notify(&self, alarm: &Alarm, previous: Disposition, reason: &str, reason_data: &ReasonData) {
        if let Err(e) = self
            .notifier
            .notify(alarm, previous, reason, reason_data)
            .await
        {
            error!("Failed to notify for alarm {}: {e:#}", alarm.alarm_id);
        }
    }

    /// Runs one evaluation pass, updating `alarm` in place on a transition.
    pub async fn evaluate(&self, alarm: &mut Alarm, now: DateTime<Utc>) -> PassOutcome {
        if !alarm.enabled {
            self.failures.lock().await.remove(&alarm.alarm_id);
            return PassOutcome::Disabled;
        }

        if !within_time_constraints(now, &alarm.time_constraints) {
            debug!("Alarm {} is outside its time constraints", alarm.alarm_id);
            self.failures.lock().await.remove(&alarm.alarm_id);
            return PassOutcome::OutsideTimeConstraint;
        }

        let Some(samples) = self.samples_for(alarm, now).await else {
            return PassOutcome::Deferred;
        };

        let previous = alarm.state;
        let evaluation = judge(&alarm.rule, samples).apply(previous, alarm.rule.evaluation_periods);

        if evaluation.changed {
            let mut updated = alarm.clone();
            updated.state = evaluation.state;
            updated.state_timestamp = now;
            updated.state_reason = Some(evaluation.reason.clone());

            if let Err(e) = self.store.update_alarm(&updated).await {
                error!("Failed to persist state of alarm {}: {e:#}", alarm.alarm_id);
                return PassOutcome::Deferred;
            }
            *alarm = updated;

            info!(
                "Alarm {} went from {previous} to {}",
                alarm.alarm_id, alarm.state
            );
            self.notify(alarm, previous, &evaluation.reason, &evaluation.reason_data)
                .await;

            return PassOutcome::Transitioned {
                from: previous,
                to: alarm.state,
            };
        }

        if alarm.repeat_actions {
            self.notify(alarm, previous, &evaluation.reason, &evaluation.reason_data)
                .await;
        }

        PassOutcome::Unchanged {
            notified: alarm.repeat_actions,
        }
    }

    /// Evaluates `alarms` concurrently. Failure streaks of alarms missing from
    /// the batch are dropped.
    pub async fn evaluate_batch(&self, alarms: Vec<Alarm>, now: DateTime<Utc>) -> BatchSummary {
        let batch: HashSet<Uuid> = alarms.iter().map(|alarm| alarm.alarm_id).collect();
        self.failures.lock().await.retain(|id, _| batch.contains(id));

        let outcomes: Vec<PassOutcome> = stream::iter(alarms)
            .map(|mut alarm| async move { self.evaluate(&mut alarm, now).await })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        let summary = outcomes
            .iter()
            .fold(BatchSummary::default(), BatchSummary::record);

        info!(
            "Evaluated {} alarms: {} transitioned, {} deferred, {} skipped",
            summary.evaluated, summary.transitioned, summary.deferred, summary.skipped
        );

        summary
    }
}
