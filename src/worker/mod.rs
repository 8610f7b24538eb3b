use crate::collab::backend::CoordinationBackend;
use crate::collab::partition::PartitionCoordinator;
use crate::evaluator::{BatchSummary, Evaluator};
use crate::metrics::MetricsService;
use crate::notifier::Notifier;
use crate::storage::AlarmStore;
use chrono::{DateTime, Utc};
use log::{debug, error};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

/// Periodically evaluates the enabled alarms this process owns.
pub struct Worker<B: CoordinationBackend, M, S, N> {
    partition: Arc<PartitionCoordinator<B>>,
    evaluator: Arc<Evaluator<M, S, N>>,
    store: Arc<S>,
    group_id: Option<String>,
    interval: Duration,
}

impl<B, M, S, N> Worker<B, M, S, N>
where
    B: CoordinationBackend,
    M: MetricsService + 'static,
    S: AlarmStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        partition: Arc<PartitionCoordinator<B>>,
        evaluator: Arc<Evaluator<M, S, N>>,
        store: Arc<S>,
        group_id: Option<String>,
        interval: Duration,
    ) -> Self {
        Self {
            partition,
            evaluator,
            store,
            group_id,
            interval,
        }
    }

    /// One evaluation cycle. `None` when the alarms could not be listed.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Option<BatchSummary> {
        let alarms = match self.store.get_alarms().await {
            Ok(alarms) => alarms,
            Err(e) => {
                error!("Failed to list alarms, skipping cycle: {e:#}");
                return None;
            }
        };

        let mut alarms: Vec<_> = alarms.into_iter().filter(|alarm| alarm.enabled).collect();
        let total = alarms.len();

        let ids: Vec<Uuid> = alarms.iter().map(|alarm| alarm.alarm_id).collect();
        let mine: HashSet<Uuid> = self
            .partition
            .extract_my_subset(self.group_id.as_deref(), ids)
            .await
            .into_iter()
            .collect();
        alarms.retain(|alarm| mine.contains(&alarm.alarm_id));

        debug!("Evaluating {} of {total} enabled alarms", alarms.len());

        Some(self.evaluator.evaluate_batch(alarms, now).await)
    }

    pub fn start(self) -> impl FnOnce() {
        let worker = Arc::new(self);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(worker.interval);
            // A slow batch postpones the next one instead of overlapping it
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                worker.run_once(Utc::now()).await;
            }
        });

        let close_function = move || {
            task.abort();
            log::info!("Worker stopped");
        };

        log::info!("Worker started");

        close_function
    }
}
