//! Coordination backend storing groups and members in Scylla/Cassandra.
//!
//! Member rows are written with a TTL and refreshed by every heartbeat, so a
//! crashed process disappears from its groups once the TTL expires.

use crate::collab::backend::{
    CoordinationBackend, CoordinationError, CoordinationResult, CoordinationSession, GroupId,
    MemberId,
};
use crate::database::preparer::CachedPreparedStatement;
use crate::database::{Database, open_session};
use anyhow::{Context, Result, ensure};
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Mutex;

fn unavailable(error: anyhow::Error) -> CoordinationError {
    CoordinationError::ConnectionFailed(format!("{error:#}"))
}

struct Statements {
    select_group: CachedPreparedStatement,
    insert_group: CachedPreparedStatement,
    select_member: CachedPreparedStatement,
    insert_member: CachedPreparedStatement,
    delete_member: CachedPreparedStatement,
    select_members: CachedPreparedStatement,
}

impl Statements {
    const fn new() -> Self {
        Self {
            select_group: CachedPreparedStatement::new(
                "
                SELECT group_id
                FROM coordination_groups
                WHERE group_id = ?
                ",
            ),
            insert_group: CachedPreparedStatement::new(
                "
                INSERT INTO coordination_groups (group_id,
                                                 created_at)
                VALUES (?, ?)
                ",
            ),
            select_member: CachedPreparedStatement::new(
                "
                SELECT member_id
                FROM coordination_members
                WHERE group_id = ?
                  AND member_id = ?
                ",
            ),
            insert_member: CachedPreparedStatement::new(
                "
                INSERT INTO coordination_members (group_id,
                                                  member_id,
                                                  last_seen)
                VALUES (?, ?, ?)
                USING TTL ?
                ",
            ),
            delete_member: CachedPreparedStatement::new(
                "
                DELETE
                FROM coordination_members
                WHERE group_id = ?
                  AND member_id = ?
                ",
            ),
            select_members: CachedPreparedStatement::new(
                "
                SELECT member_id
                FROM coordination_members
                WHERE group_id = ?
                ",
            ),
        }
    }

    async fn prepare_all(&self, db: &Database) -> Result<()> {
        for statement in [
            &self.select_group,
            &self.insert_group,
            &self.select_member,
            &self.insert_member,
            &self.delete_member,
            &self.select_members,
        ] {
            statement.prepare(db).await?;
        }

        Ok(())
    }
}

pub struct ScyllaBackend {
    node_urls: Vec<String>,
    keyspace: String,
    /// Seconds, as bound to `USING TTL`.
    member_ttl: i32,
}

impl ScyllaBackend {
    /// Fails when `member_ttl` cannot be used as a CQL TTL.
    pub fn new(node_urls: Vec<String>, keyspace: impl Into<String>, member_ttl: Duration) -> Result<Self> {
        let member_ttl = i32::try_from(member_ttl.as_secs())
            .with_context(|| format!("member TTL of {}s is too large", member_ttl.as_secs()))?;
        // A zero TTL never expires
        ensure!(member_ttl > 0, "member TTL must be at least one second");

        Ok(Self {
            node_urls,
            keyspace: keyspace.into(),
            member_ttl,
        })
    }
}

impl CoordinationBackend for ScyllaBackend {
    type Session = ScyllaSession;

    async fn connect(&self, member_id: &str) -> CoordinationResult<ScyllaSession> {
        let db = open_session(&self.node_urls, Some(self.keyspace.as_str()))
            .await
            .map_err(unavailable)?;

        let statements = Statements::new();
        statements.prepare_all(&db).await.map_err(unavailable)?;

        Ok(ScyllaSession {
            db,
            statements,
            member_id: member_id.to_string(),
            member_ttl: self.member_ttl,
            joined: Mutex::new(BTreeSet::new()),
        })
    }
}

pub struct ScyllaSession {
    db: Database,
    statements: Statements,
    member_id: MemberId,
    member_ttl: i32,
    joined: Mutex<BTreeSet<GroupId>>,
}

impl ScyllaSession {
    async fn group_exists(&self, group_id: &str) -> Result<bool> {
        let rows = self
            .statements
            .select_group
            .execute_unpaged(&self.db, (group_id,))
            .await?
            .into_rows_result()?;

        Ok(rows.rows_num() > 0)
    }

    async fn member_exists(&self, group_id: &str) -> Result<bool> {
        let rows = self
            .statements
            .select_member
            .execute_unpaged(&self.db, (group_id, self.member_id.as_str()))
            .await?
            .into_rows_result()?;

        Ok(rows.rows_num() > 0)
    }

    async fn touch_member(&self, group_id: &str) -> Result<()> {
        self.statements
            .insert_member
            .execute_unpaged(
                &self.db,
                (
                    group_id,
                    self.member_id.as_str(),
                    Utc::now(),
                    self.member_ttl,
                ),
            )
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.db
            .query_unpaged("SELECT release_version FROM system.local", &[])
            .await?;

        Ok(())
    }
}

impl CoordinationSession for ScyllaSession {
    async fn heartbeat(&self) -> CoordinationResult<()> {
        let joined = self.joined.lock().await.clone();

        if joined.is_empty() {
            return self.ping().await.map_err(unavailable);
        }

        for group_id in joined {
            self.touch_member(&group_id).await.map_err(unavailable)?;
        }

        Ok(())
    }

    async fn create_group(&self, group_id: &str) -> CoordinationResult<()> {
        // Racing creators may both insert: the row is identical, so the
        // second insert is harmless
        if self.group_exists(group_id).await.map_err(unavailable)? {
            return Err(CoordinationError::GroupExists(group_id.to_string()));
        }

        self.statements
            .insert_group
            .execute_unpaged(&self.db, (group_id, Utc::now()))
            .await
            .map_err(unavailable)?;

        Ok(())
    }

    async fn join_group(&self, group_id: &str) -> CoordinationResult<()> {
        if !self.group_exists(group_id).await.map_err(unavailable)? {
            return Err(CoordinationError::GroupNotFound(group_id.to_string()));
        }

        let already_member = self.member_exists(group_id).await.map_err(unavailable)?;

        self.touch_member(group_id).await.map_err(unavailable)?;
        self.joined.lock().await.insert(group_id.to_string());

        if already_member {
            return Err(CoordinationError::MemberExists {
                group: group_id.to_string(),
                member: self.member_id.clone(),
            });
        }

        Ok(())
    }

    async fn leave_group(&self, group_id: &str) -> CoordinationResult<()> {
        self.joined.lock().await.remove(group_id);

        self.statements
            .delete_member
            .execute_unpaged(&self.db, (group_id, self.member_id.as_str()))
            .await
            .map_err(unavailable)?;

        Ok(())
    }

    async fn get_members(&self, group_id: &str) -> CoordinationResult<BTreeSet<MemberId>> {
        if !self.group_exists(group_id).await.map_err(unavailable)? {
            return Err(CoordinationError::GroupNotFound(group_id.to_string()));
        }

        let read = async {
            let rows = self
                .statements
                .select_members
                .execute_unpaged(&self.db, (group_id,))
                .await?
                .into_rows_result()?;

            let mut members = BTreeSet::new();
            for row in rows.rows::<(String,)>()? {
                let (member_id,) = row?;
                members.insert(member_id);
            }

            Ok::<_, anyhow::Error>(members)
        };

        read.await.map_err(unavailable)
    }

    async fn stop(&self) -> CoordinationResult<()> {
        self.joined.lock().await.clear();

        Ok(())
    }
}
