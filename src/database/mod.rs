pub mod preparer;
#[cfg(test)]
pub mod testing;

use anyhow::Result;
use scylla::client::PoolSize;
use scylla::client::{session::Session, session_builder::SessionBuilder};
use scylla::{client::execution_profile::ExecutionProfile, statement::Consistency};
use std::num::NonZeroUsize;
use std::time::Duration;

pub type Database = Session;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn parse_database_urls(urls: &str) -> Vec<&str> {
    urls.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Opens a session with one connection per shard. Requests default to quorum
/// consistency, so a member row written through one node is visible to reads
/// through any other.
pub async fn open_session(node_urls: &[impl AsRef<str>], keyspace: Option<&str>) -> Result<Database> {
    let profile = ExecutionProfile::builder()
        .consistency(Consistency::Quorum)
        .request_timeout(Some(REQUEST_TIMEOUT))
        .build();

    let mut builder = SessionBuilder::new()
        .default_execution_profile_handle(profile.into_handle())
        .pool_size(PoolSize::PerShard(NonZeroUsize::MIN));

    for url in node_urls {
        builder = builder.known_node(url.as_ref());
    }

    if let Some(keyspace) = keyspace {
        builder = builder.use_keyspace(keyspace, true);
    }

    Ok(builder.build().await?)
}
