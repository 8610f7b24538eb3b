use crate::database::{Database, open_session, parse_database_urls};
use anyhow::{Context, Result};
use include_dir::{Dir, include_dir};
use rand::{Rng, rng};
use std::env;

static MIGRATIONS_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

pub fn test_database_urls() -> Vec<String> {
    let urls = env::var("TEST_DATABASE_NODE_URLS").unwrap_or_else(|_| "127.0.0.1:9042".to_string());

    parse_database_urls(&urls)
        .into_iter()
        .map(String::from)
        .collect()
}

/// CQL statements of every migration, in file order.
pub fn migration_statements() -> Vec<String> {
    let mut files: Vec<_> = MIGRATIONS_DIR.files().collect();
    files.sort_by(|a, b| a.path().cmp(b.path()));

    files
        .into_iter()
        .filter_map(|file| file.contents_utf8())
        .flat_map(|content| content.split(';'))
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(String::from)
        .collect()
}

/// Creates a keyspace with a random name and applies the migrations to it.
pub async fn create_test_database() -> Result<(Database, String)> {
    let keyspace = format!("test_coordination_{}", rng().random::<u32>());
    let session = open_session(&test_database_urls(), None).await?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
            ),
            &[],
        )
        .await?;
    session.use_keyspace(&keyspace, true).await?;

    for statement in migration_statements() {
        session
            .query_unpaged(statement.as_str(), &[])
            .await
            .with_context(|| format!("migration failed: {statement}"))?;
    }

    Ok((session, keyspace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded() {
        let statements = migration_statements();

        assert!(statements.iter().any(|s| s.contains("coordination_groups")));
        assert!(statements.iter().any(|s| s.contains("coordination_members")));
    }

    #[tokio::test]
    #[ignore = "requires a running Scylla node"]
    async fn cleanup_test_keyspaces() -> Result<()> {
        let session = open_session(&test_database_urls(), None).await?;

        let rows = session
            .query_unpaged("SELECT keyspace_name FROM system_schema.keyspaces", &[])
            .await?
            .into_rows_result()?;

        for row in rows.rows::<(String,)>()? {
            let (keyspace,) = row?;
            if keyspace.starts_with("test_coordination_") {
                session
                    .query_unpaged(format!("DROP KEYSPACE IF EXISTS {keyspace}"), &[])
                    .await?;
            }
        }

        Ok(())
    }
}
