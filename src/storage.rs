use crate::evaluator::alarm::Alarm;
use anyhow::{Context, Result, bail};
use itertools::Itertools;
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistent home of alarm definitions and their evaluation state.
pub trait AlarmStore: Send + Sync {
    fn get_alarms(&self) -> impl Future<Output = Result<Vec<Alarm>>> + Send;

    /// Persists the state fields of an existing alarm.
    fn update_alarm(&self, alarm: &Alarm) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Default)]
pub struct MemoryAlarmStore {
    alarms: RwLock<BTreeMap<Uuid, Alarm>>,
}

impl MemoryAlarmStore {
    pub fn new(alarms: impl IntoIterator<Item = Alarm>) -> Self {
        let alarms = alarms
            .into_iter()
            .map(|alarm| (alarm.alarm_id, alarm))
            .collect();

        Self {
            alarms: RwLock::new(alarms),
        }
    }

    /// Parses a JSON array of alarms. Entries that fail to parse or validate
    /// are logged and left out.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(json).context("alarms must be a JSON array")?;

        let (alarms, rejected): (Vec<Alarm>, Vec<anyhow::Error>) = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| -> Result<Alarm> {
                let alarm: Alarm = serde_json::from_value(entry)
                    .with_context(|| format!("alarm #{index} is malformed"))?;
                alarm
                    .validate()
                    .with_context(|| format!("alarm #{index} ({}) is invalid", alarm.alarm_id))?;
                Ok(alarm)
            })
            .partition_result();

        for error in &rejected {
            warn!("Skipping alarm: {error:#}");
        }

        let unique = alarms.iter().unique_by(|alarm| alarm.alarm_id).count();
        if unique < alarms.len() {
            warn!("Some alarm ids appear more than once, keeping the last definition");
        }

        info!("Loaded {unique} alarms ({} rejected)", rejected.len());

        Ok(Self::new(alarms))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read alarms from {}", path.display()))?;

        Self::from_json(&json)
    }
}

impl AlarmStore for MemoryAlarmStore {
    async fn get_alarms(&self) -> Result<Vec<Alarm>> {
        Ok(self.alarms.read().await.values().cloned().collect())
    }

    async fn update_alarm(&self, alarm: &Alarm) -> Result<()> {
        let mut alarms = self.alarms.write().await;

        let Some(stored) = alarms.get_mut(&alarm.alarm_id) else {
            bail!("alarm {} does not exist", alarm.alarm_id);
        };
        stored.state = alarm.state;
        stored.state_timestamp = alarm.state_timestamp;
        stored.state_reason = alarm.state_reason.clone();

        Ok(())
    }
}
