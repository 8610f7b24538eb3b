use crate::collab::backend::CoordinationBackend;
use crate::collab::membership::MembershipClient;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Keeps the coordination session alive on its own timer, independently of
/// the evaluation loop, and periodically runs membership watchers.
pub struct HeartbeatManager<B: CoordinationBackend> {
    membership: Arc<MembershipClient<B>>,
    interval: Duration,
    watchers_interval: Duration,
    task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<B: CoordinationBackend> HeartbeatManager<B> {
    pub fn new(
        membership: Arc<MembershipClient<B>>,
        interval: Duration,
        watchers_interval: Duration,
    ) -> Self {
        Self {
            membership,
            interval,
            watchers_interval,
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(&self) {
        let mut handle = self.task_handle.lock().await;

        if handle.is_some() {
            return;
        }

        let membership = self.membership.clone();
        let interval = self.interval;
        let watchers_interval = self.watchers_interval;

        let task = tokio::spawn(async move {
            let mut heartbeat_ticker = time::interval(interval);
            heartbeat_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut watchers_ticker = time::interval(watchers_interval);
            watchers_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = heartbeat_ticker.tick() => membership.heartbeat().await,
                    _ = watchers_ticker.tick() => membership.run_watchers().await,
                }
            }
        });

        *handle = Some(task);

        info!("HeartbeatManager started")
    }

    pub async fn stop(&self) {
        let mut handle = self.task_handle.lock().await;

        if let Some(task) = handle.take() {
            task.abort();
            info!("HeartbeatManager stopped")
        }
    }
}
