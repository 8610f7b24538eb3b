use crate::collab::backend::{CoordinationBackend, MemberId};
use crate::collab::hash_ring::{DEFAULT_REPLICAS, HashRing};
use crate::collab::membership::MembershipClient;
use log::{debug, error};
use std::fmt::Display;
use std::sync::Arc;

/// Workload partitioning coordinator.
///
/// Every process hashes the same keys onto a ring built from the same group
/// members, so each key is claimed by exactly one live member. When the
/// coordination backend is down, [`PartitionCoordinator::extract_my_subset`]
/// returns nothing: skipping a cycle is preferred over double-processing.
pub struct PartitionCoordinator<B: CoordinationBackend> {
    node_id: MemberId,
    membership: Option<Arc<MembershipClient<B>>>,
    replicas: u32,
}

impl<B: CoordinationBackend> PartitionCoordinator<B> {
    pub fn new(membership: Arc<MembershipClient<B>>) -> Self {
        Self {
            node_id: membership.member_id().to_string(),
            membership: Some(membership),
            replicas: DEFAULT_REPLICAS,
        }
    }

    /// A coordinator without backend: this process owns every key.
    pub fn standalone(node_id: impl Into<MemberId>) -> Self {
        Self {
            node_id: node_id.into(),
            membership: None,
            replicas: DEFAULT_REPLICAS,
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Filters `keys`, returning only the ones assigned to this process.
    pub async fn extract_my_subset<K: Display>(&self, group_id: Option<&str>, keys: Vec<K>) -> Vec<K> {
        let Some(group_id) = group_id.filter(|g| !g.is_empty()) else {
            return keys;
        };

        let Some(membership) = &self.membership else {
            return keys;
        };

        if !membership.is_member(group_id).await {
            membership.join_group(group_id).await;
        }

        let Some(members) = membership.get_members(group_id).await else {
            error!("error getting membership of group {group_id} from coordination backend");
            return Vec::new();
        };

        debug!("Members of group {group_id}: {members:?}");

        let ring = HashRing::with_replicas(&members, self.replicas);
        let total = keys.len();

        let mine: Vec<K> = keys
            .into_iter()
            .filter(|key| ring.get_node(&key.to_string()) == Some(self.node_id.as_str()))
            .collect();

        debug!("My subset of group {group_id}: {} of {total} keys", mine.len());

        mine
    }
}
