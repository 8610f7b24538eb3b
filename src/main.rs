mod collab;
mod database;
mod eager_env;
mod evaluator;
mod metrics;
mod notifier;
mod storage;
mod utils;
mod worker;

use crate::{
    collab::{
        BackendUrl,
        backend::CoordinationBackend,
        heartbeat::HeartbeatManager,
        membership::{MembershipClient, MembershipEvent},
        memory::InMemoryBackend,
        partition::PartitionCoordinator,
        scylla::ScyllaBackend,
    },
    eager_env::check_env,
    evaluator::{Evaluator, EvaluatorConfig},
    metrics::gnocchi::GnocchiClient,
    notifier::LogNotifier,
    storage::MemoryAlarmStore,
    worker::Worker,
};
use log::{error, info, warn};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();
    check_env();

    let backend_url = eager_env::COORDINATION_URL
        .as_deref()
        .map(BackendUrl::parse)
        .transpose()
        .expect("Invalid COORDINATION_URL");

    match backend_url {
        None => run::<InMemoryBackend>(None).await,
        Some(BackendUrl::Memory) => run(Some(InMemoryBackend::default())).await,
        Some(BackendUrl::Scylla {
            node_urls,
            keyspace,
        }) => {
            let backend = ScyllaBackend::new(
                node_urls,
                keyspace,
                Duration::from_secs(*eager_env::MEMBER_TIMEOUT_SECONDS),
            )
            .expect("Invalid MEMBER_TIMEOUT_SECONDS");
            run(Some(backend)).await
        }
    }
}

async fn start_membership<B: CoordinationBackend>(
    backend: B,
    node_id: &str,
    group_id: Option<&str>,
) -> (Arc<MembershipClient<B>>, HeartbeatManager<B>) {
    let membership = Arc::new(MembershipClient::new(backend, node_id));
    if !membership.start().await {
        warn!("Coordination backend unreachable, retrying on the next heartbeat");
    }

    if let Some(group_id) = group_id {
        membership.join_group(group_id).await;
        membership
            .watch_group(group_id, |event| match event {
                MembershipEvent::Joined { group, member } => {
                    info!("{member} joined {group}, alarms will be repartitioned")
                }
                MembershipEvent::Left { group, member } => {
                    info!("{member} left {group}, alarms will be repartitioned")
                }
            })
            .await;
    }

    let heartbeat = HeartbeatManager::new(
        membership.clone(),
        Duration::from_secs(*eager_env::HEARTBEAT_INTERVAL_SECONDS),
        Duration::from_secs(*eager_env::CHECK_WATCHERS_SECONDS),
    );
    heartbeat.start().await;

    (membership, heartbeat)
}

/// Without a backend the process owns every alarm.
async fn run<B: CoordinationBackend>(backend: Option<B>) {
    let node_id = eager_env::NODE_ID
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let group_id = eager_env::PARTITION_GROUP.clone();

    let coordination = match backend {
        Some(backend) => Some(start_membership(backend, &node_id, group_id.as_deref()).await),
        None => None,
    };

    let partition = match &coordination {
        Some((membership, _)) => PartitionCoordinator::new(membership.clone()),
        None => PartitionCoordinator::standalone(node_id.clone()),
    };
    let partition = Arc::new(partition);

    let metrics = GnocchiClient::new(
        eager_env::METRICS_URL.clone(),
        Duration::from_secs(*eager_env::METRICS_TIMEOUT_SECONDS),
    )
    .expect("failed to build the metrics client");

    let store = MemoryAlarmStore::load(&*eager_env::ALARMS_FILE)
        .await
        .expect("failed to load alarms");
    let store = Arc::new(store);

    let evaluator = Evaluator::new(
        Arc::new(metrics),
        store.clone(),
        Arc::new(LogNotifier),
        EvaluatorConfig {
            fetch_retries: *eager_env::FETCH_RETRIES,
            retry_backoff: Duration::from_millis(*eager_env::FETCH_RETRY_BACKOFF_MILLIS),
            look_back: *eager_env::LOOK_BACK_PERIODS,
            max_concurrent: *eager_env::MAX_CONCURRENT_EVALUATIONS,
            pass_interval: Duration::from_secs(*eager_env::EVALUATION_INTERVAL_SECONDS),
        },
    );

    let worker = Worker::new(
        partition,
        Arc::new(evaluator),
        store,
        group_id,
        Duration::from_secs(*eager_env::EVALUATION_INTERVAL_SECONDS),
    );
    let stop_worker = worker.start();

    info!("Evaluator {node_id} running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    stop_worker();

    if let Some((membership, heartbeat)) = coordination {
        heartbeat.stop().await;
        membership.stop().await;
    }
}
