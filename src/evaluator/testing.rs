//! Test doubles for the evaluator's collaborators.

use crate::evaluator::alarm::{Alarm, Disposition};
use crate::evaluator::threshold::ReasonData;
use crate::metrics::{AggregationTarget, MetricsResult, MetricsService, Sample};
use crate::notifier::Notifier;
use crate::storage::AlarmStore;
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub key: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

/// Replays scripted answers per series. Series are keyed by resource id,
/// by comma-joined metric ids, or by `resource_type/metric`. The last answer
/// of a script repeats forever; unscripted series have no samples.
#[derive(Default)]
pub struct ScriptedMetrics {
    scripts: Mutex<HashMap<String, VecDeque<MetricsResult<Vec<Sample>>>>>,
    queries: Mutex<Vec<Query>>,
}

impl ScriptedMetrics {
    pub fn script(&self, key: &str, answers: impl IntoIterator<Item = MetricsResult<Vec<Sample>>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(answers);
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }

    fn answer(&self, key: String, start: DateTime<Utc>, stop: DateTime<Utc>) -> MetricsResult<Vec<Sample>> {
        let mut scripts = self.scripts.lock().unwrap();
        let answer = match scripts.get_mut(&key) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap_or(Ok(Vec::new())),
            None => Ok(Vec::new()),
        };

        self.queries.lock().unwrap().push(Query { key, start, stop });
        answer
    }
}

impl MetricsService for ScriptedMetrics {
    async fn get_measures(
        &self,
        _metric: &str,
        resource_id: &str,
        _aggregation: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> MetricsResult<Vec<Sample>> {
        self.answer(resource_id.to_string(), start, stop)
    }

    async fn aggregate(
        &self,
        target: AggregationTarget<'_>,
        _aggregation: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> MetricsResult<Vec<Sample>> {
        let key = match target {
            AggregationTarget::Metrics(ids) => ids.join(","),
            AggregationTarget::Resources {
                metric,
                resource_type,
                ..
            } => format!("{resource_type}/{metric}"),
        };

        self.answer(key, start, stop)
    }
}

#[derive(Default)]
pub struct RecordingStore {
    alarms: Mutex<HashMap<Uuid, Alarm>>,
    updates: Mutex<Vec<Alarm>>,
    failing: AtomicBool,
}

impl RecordingStore {
    pub fn with_alarms(alarms: impl IntoIterator<Item = Alarm>) -> Self {
        let store = Self::default();
        store
            .alarms
            .lock()
            .unwrap()
            .extend(alarms.into_iter().map(|alarm| (alarm.alarm_id, alarm)));
        store
    }

    pub fn updates(&self) -> Vec<Alarm> {
        self.updates.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl AlarmStore for RecordingStore {
    async fn get_alarms(&self) -> Result<Vec<Alarm>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("store is down");
        }

        let mut alarms: Vec<Alarm> = self.alarms.lock().unwrap().values().cloned().collect();
        alarms.sort_by_key(|alarm| alarm.alarm_id);
        Ok(alarms)
    }

    async fn update_alarm(&self, alarm: &Alarm) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("store is down");
        }

        self.alarms
            .lock()
            .unwrap()
            .insert(alarm.alarm_id, alarm.clone());
        self.updates.lock().unwrap().push(alarm.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub alarm_id: Uuid,
    pub previous: Disposition,
    pub current: Disposition,
    pub reason: String,
    pub reason_data: ReasonData,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        alarm: &Alarm,
        previous: Disposition,
        reason: &str,
        reason_data: &ReasonData,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(Notification {
            alarm_id: alarm.alarm_id,
            previous,
            current: alarm.state,
            reason: reason.to_string(),
            reason_data: reason_data.clone(),
        });
        Ok(())
    }
}
