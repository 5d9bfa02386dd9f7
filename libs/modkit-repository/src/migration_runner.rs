//! Schema migrations applied through a [`DbContext`].
//!
//! Each scope (usually one per bounded context or service) records its applied
//! migrations in its own history table named `repository_migrations__<scope>__<hash8>`,
//! where `<hash8>` is derived from the scope name with `xxh3_64`. Migrations are
//! applied in name order, each inside its own transaction together with its
//! history record, so re-running the same list is a no-op.

use std::collections::HashSet;

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DbErr, FromQueryResult, Statement, TransactionTrait,
};
use sea_orm_migration::{MigrationTrait, SchemaManager};
use thiserror::Error;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::context::DbContext;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to prepare migration history for scope '{scope}': {source}")]
    History { scope: String, source: DbErr },

    #[error("migration '{migration}' failed for scope '{scope}': {source}")]
    Failed {
        scope: String,
        migration: String,
        source: DbErr,
    },

    #[error("duplicate migration name '{name}' for scope '{scope}'")]
    DuplicateName { scope: String, name: String },
}

/// Summary of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationResult {
    pub applied: usize,
    pub skipped: usize,
    pub applied_names: Vec<String>,
}

#[derive(Debug, FromQueryResult)]
struct HistoryRow {
    version: String,
}

fn history_table(scope: &str) -> String {
    const PREFIX: &str = "repository_migrations__";
    const HASH_LEN: usize = 8;
    // Postgres identifier limit.
    const MAX_LEN: usize = 63;

    let sanitized: String = scope
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let hash = format!("{:016x}", xxh3_64(scope.as_bytes()));
    let room = MAX_LEN - PREFIX.len() - 2 - HASH_LEN;
    let head: String = sanitized.chars().take(room).collect();
    format!("{PREFIX}{head}__{}", &hash[..HASH_LEN])
}

fn quoted(backend: DatabaseBackend, table: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("`{table}`"),
        DatabaseBackend::Postgres | DatabaseBackend::Sqlite => format!("\"{table}\""),
    }
}

async fn ensure_history(conn: &impl ConnectionTrait, table: &str) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    let applied_at = match backend {
        DatabaseBackend::Postgres => "TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP",
        DatabaseBackend::MySql => "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
        DatabaseBackend::Sqlite => "TEXT NOT NULL DEFAULT (datetime('now'))",
    };
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (version VARCHAR(255) PRIMARY KEY, applied_at {applied_at})",
        quoted(backend, table)
    );
    conn.execute(Statement::from_string(backend, sql)).await?;
    Ok(())
}

async fn applied_versions(
    conn: &impl ConnectionTrait,
    table: &str,
) -> Result<HashSet<String>, DbErr> {
    let backend = conn.get_database_backend();
    let sql = format!("SELECT version FROM {}", quoted(backend, table));
    let rows = HistoryRow::find_by_statement(Statement::from_string(backend, sql))
        .all(conn)
        .await?;
    Ok(rows.into_iter().map(|r| r.version).collect())
}

async fn record(conn: &impl ConnectionTrait, table: &str, name: &str) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    let placeholder = match backend {
        DatabaseBackend::MySql => "?",
        DatabaseBackend::Postgres | DatabaseBackend::Sqlite => "$1",
    };
    let sql = format!(
        "INSERT INTO {} (version) VALUES ({placeholder})",
        quoted(backend, table)
    );
    conn.execute(Statement::from_sql_and_values(backend, &sql, [name.into()]))
        .await?;
    Ok(())
}

/// Apply every migration of `scope` that has not been applied yet.
///
/// # Errors
/// Returns [`RepositoryError::Disposed`](crate::RepositoryError::Disposed) for a
/// released context, or [`RepositoryError::Migration`](crate::RepositoryError::Migration)
/// when the history cannot be read or a migration fails. A failed migration is
/// rolled back together with its history record; earlier ones stay applied.
pub async fn apply_migrations(
    ctx: &DbContext,
    scope: &str,
    migrations: Vec<Box<dyn MigrationTrait>>,
) -> crate::Result<MigrationResult> {
    let conn = ctx.connection()?;
    Ok(run_scope(conn, scope, migrations).await?)
}

/// Names from `migrations` not yet recorded for `scope`. Creates the history
/// table when it does not exist.
///
/// # Errors
/// Same as [`apply_migrations`].
pub async fn pending_migrations(
    ctx: &DbContext,
    scope: &str,
    migrations: &[Box<dyn MigrationTrait>],
) -> crate::Result<Vec<String>> {
    let conn = ctx.connection()?;
    let table = history_table(scope);
    let history = async {
        ensure_history(conn, &table).await?;
        applied_versions(conn, &table).await
    }
    .await
    .map_err(|source| MigrationError::History {
        scope: scope.to_owned(),
        source,
    })?;
    Ok(migrations
        .iter()
        .map(|m| m.name().to_owned())
        .filter(|name| !history.contains(name))
        .collect())
}

async fn run_scope<C>(
    conn: &C,
    scope: &str,
    mut migrations: Vec<Box<dyn MigrationTrait>>,
) -> Result<MigrationResult, MigrationError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let mut result = MigrationResult::default();
    if migrations.is_empty() {
        debug!(scope, "no migrations to run");
        return Ok(result);
    }

    let mut seen = HashSet::new();
    for m in &migrations {
        if !seen.insert(m.name().to_owned()) {
            return Err(MigrationError::DuplicateName {
                scope: scope.to_owned(),
                name: m.name().to_owned(),
            });
        }
    }

    let table = history_table(scope);
    let history_err = |source| MigrationError::History {
        scope: scope.to_owned(),
        source,
    };
    ensure_history(conn, &table).await.map_err(history_err)?;
    let applied = applied_versions(conn, &table).await.map_err(history_err)?;

    migrations.sort_by(|a, b| a.name().cmp(b.name()));

    for migration in migrations {
        let name = migration.name().to_owned();
        if applied.contains(&name) {
            debug!(scope, migration = %name, "migration already applied");
            result.skipped += 1;
            continue;
        }

        info!(scope, migration = %name, "applying migration");
        let failed = |source| MigrationError::Failed {
            scope: scope.to_owned(),
            migration: name.clone(),
            source,
        };

        let txn = conn.begin().await.map_err(failed)?;
        let outcome = async {
            migration.up(&SchemaManager::new(&txn)).await?;
            record(&txn, &table, &name).await
        }
        .await;
        match outcome {
            Ok(()) => txn.commit().await.map_err(failed)?,
            Err(e) => {
                _ = txn.rollback().await;
                return Err(failed(e));
            }
        }

        result.applied += 1;
        result.applied_names.push(name);
    }

    info!(
        scope,
        applied = result.applied,
        skipped = result.skipped,
        "migration run complete"
    );
    Ok(result)
}
