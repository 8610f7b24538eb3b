use sha2::{Digest, Sha256};
use std::fmt::Display;

pub const DEFAULT_REPLICAS: u32 = 100;

pub type RingPosition = u32;

/// Consistent hash ring over a set of node identifiers.
///
/// Every node is placed `replicas` times on a `u32` ring. A key belongs to the
/// node owning the first position at or after the key's hash, wrapping around
/// past the last position.
///
/// The ring is built once from a membership snapshot and never mutated: every
/// process observing the same node set builds an identical ring.
#[derive(Debug, Clone)]
pub struct HashRing {
    positions: Vec<RingPosition>,
    owners: Vec<String>,
}

/// First four bytes of the SHA-256 digest, big-endian.
fn hash(key: &str) -> RingPosition {
    let digest = Sha256::digest(key.as_bytes());

    RingPosition::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

impl HashRing {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Display,
    {
        Self::with_replicas(nodes, DEFAULT_REPLICAS)
    }

    pub fn with_replicas<I, S>(nodes: I, replicas: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Display,
    {
        let mut virtual_nodes: Vec<(RingPosition, String)> = Vec::new();

        for node in nodes {
            let node = node.to_string();
            for replica in 0..replicas {
                virtual_nodes.push((hash(&format!("{node}-{replica}")), node.clone()));
            }
        }

        // Ties are broken by node id so that every process agrees on the owner
        virtual_nodes.sort();

        let (positions, owners) = virtual_nodes.into_iter().unzip();

        Self { positions, owners }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of virtual positions on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn get_node(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }

        let hashed = hash(key);
        let idx = self.positions.partition_point(|&position| position < hashed);
        let idx = if idx == self.positions.len() { 0 } else { idx };

        Some(&self.owners[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("alarm-{i}")).collect()
    }

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::new(Vec::<String>::new());

        assert!(ring.is_empty());
        assert_eq!(ring.get_node("anything"), None);
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = HashRing::new(["node-a"]);

        assert_eq!(ring.len(), DEFAULT_REPLICAS as usize);
        for key in keys(100) {
            assert_eq!(ring.get_node(&key), Some("node-a"));
        }
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let nodes = ["node-a", "node-b", "node-c"];
        let first = HashRing::new(nodes);
        // Insertion order must not matter
        let second = HashRing::new(["node-c", "node-a", "node-b"]);

        for key in keys(500) {
            let owner = first.get_node(&key);
            assert_eq!(owner, first.get_node(&key));
            assert_eq!(owner, second.get_node(&key));
        }
    }

    #[test]
    fn test_wraps_past_last_position() {
        let ring = HashRing::with_replicas(["node-a", "node-b"], 1);
        let last_owner = ring.owners[0].clone();

        // A key hashing beyond the highest position lands on the first one
        let key = (0..)
            .map(|i| format!("probe-{i}"))
            .find(|k| hash(k) > *ring.positions.last().expect("non-empty"))
            .expect("some key hashes past the last position");

        assert_eq!(ring.get_node(&key), Some(last_owner.as_str()));
    }

    #[test]
    fn test_balanced_distribution() {
        let nodes: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let ring = HashRing::new(&nodes);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for key in keys(8000) {
            *counts.entry(ring.get_node(&key).expect("non-empty")).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for (node, count) in counts {
            // Expected share is 2000, allow generous slack
            assert!(
                (1000..3000).contains(&count),
                "node {node} owns {count} keys"
            );
        }
    }

    #[test]
    fn test_adding_node_moves_a_minority_of_keys() {
        let before = HashRing::new(["node-a", "node-b", "node-c"]);
        let after = HashRing::new(["node-a", "node-b", "node-c", "node-d"]);

        let all = keys(4000);
        let moved: Vec<&String> = all
            .iter()
            .filter(|k| before.get_node(k) != after.get_node(k))
            .collect();

        // Only keys claimed by the new node change owner
        assert!(moved.iter().all(|k| after.get_node(k) == Some("node-d")));
        assert!(moved.len() < all.len() / 2, "{} keys moved", moved.len());
    }
}
