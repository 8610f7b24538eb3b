//! Workload partitioning across evaluator processes.
//!
//! Each process joins a named group in a coordination backend and heartbeats
//! to stay in it. To decide which alarms it owns, a process reads the current
//! members, builds a consistent hash ring over them and keeps the keys that
//! hash to itself. Membership is re-read lazily on every partition query, so
//! no push notification is needed for correctness.

pub mod backend;
pub mod hash_ring;
pub mod heartbeat;
pub mod membership;
pub mod memory;
pub mod partition;
pub mod scylla;

use crate::database::parse_database_urls;
use anyhow::{Result, bail};

/// Where the coordination backend lives, parsed from a URL such as
/// `memory://` or `scylla://10.0.0.1:9042,10.0.0.2:9042/coordination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendUrl {
    Memory,
    Scylla {
        node_urls: Vec<String>,
        keyspace: String,
    },
}

impl BackendUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let Some((scheme, rest)) = url.trim().split_once("://") else {
            bail!("invalid coordination backend url: '{url}'");
        };

        match scheme {
            "memory" => Ok(BackendUrl::Memory),
            "scylla" | "cassandra" => {
                let Some((nodes, keyspace)) = rest.split_once('/') else {
                    bail!("missing keyspace in coordination backend url: '{url}'");
                };

                let node_urls: Vec<String> = parse_database_urls(nodes)
                    .into_iter()
                    .map(String::from)
                    .collect();

                if node_urls.is_empty() {
                    bail!("missing nodes in coordination backend url: '{url}'");
                }
                if keyspace.is_empty() {
                    bail!("missing keyspace in coordination backend url: '{url}'");
                }

                Ok(BackendUrl::Scylla {
                    node_urls,
                    keyspace: keyspace.to_string(),
                })
            }
            _ => bail!("unsupported coordination backend: '{scheme}'"),
        }
    }
}
