use super::Database;
use anyhow::Result;
use log::debug;
use scylla::{response::query_result::QueryResult, statement::prepared::PreparedStatement};
use tokio::sync::Mutex;

/// A CQL statement prepared lazily and cached for reuse.
///
/// Prepared statements belong to the session that prepared them: call
/// [`CachedPreparedStatement::prepare`] again after opening a new session.
pub struct CachedPreparedStatement {
    statement: &'static str,
    prepared: Mutex<Option<PreparedStatement>>,
}

impl CachedPreparedStatement {
    pub const fn new(statement: &'static str) -> Self {
        Self {
            statement,
            prepared: Mutex::const_new(None),
        }
    }

    async fn get_prepared_statement(&self, db: &Database) -> Result<PreparedStatement> {
        let mut lock = self.prepared.lock().await;

        if let Some(prepared) = &*lock {
            return Ok(prepared.clone());
        }

        let prepared = self.prepare_locked(db).await?;
        *lock = Some(prepared.clone());

        Ok(prepared)
    }

    async fn prepare_locked(&self, db: &Database) -> Result<PreparedStatement> {
        debug!("Preparing statement: {}", self.statement.replace('\n', " "));

        Ok(db.prepare(self.statement).await?)
    }

    /// (Re)prepares the statement on `db`, replacing any cached one.
    pub async fn prepare(&self, db: &Database) -> Result<()> {
        let mut lock = self.prepared.lock().await;
        *lock = Some(self.prepare_locked(db).await?);

        Ok(())
    }

    /// A thin wrapper around [`Database::execute_unpaged`].
    pub async fn execute_unpaged(
        &self,
        db: &Database,
        values: impl scylla::serialize::row::SerializeRow,
    ) -> Result<QueryResult> {
        let prepared = self.get_prepared_statement(db).await?;

        db.execute_unpaged(&prepared, &values)
            .await
            .map_err(Into::into)
    }
}
