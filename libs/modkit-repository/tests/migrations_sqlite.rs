#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{CreateCustomers, CreateTags, SCOPE, memory_context, migrations};
use modkit_repository::migration_runner::pending_migrations;
use modkit_repository::{DbContext, MigrationError, RepositoryError, apply_migrations};
use sea_orm::{ConnectionTrait, Database, DbErr, Statement};
use sea_orm_migration::prelude::*;

async fn bare_context() -> Arc<DbContext> {
    let mut opts = sea_orm::ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).sqlx_logging(false);
    Arc::new(DbContext::new(Database::connect(opts).await.unwrap()))
}

async fn table_exists(ctx: &DbContext, table: &str) -> bool {
    let conn = ctx.connection().unwrap();
    let row = conn
        .query_one(Statement::from_string(
            conn.get_database_backend(),
            format!("SELECT COUNT(*) AS n FROM sqlite_master WHERE type='table' AND name='{table}'"),
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get::<i32>("", "n").unwrap() > 0
}

struct Broken;

impl MigrationName for Broken {
    fn name(&self) -> &str {
        "m0003_broken"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Broken {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("CREATE TABLE broken (")
            .await
            .map(|_| ())
    }
}

#[tokio::test]
async fn second_run_skips_everything() {
    let ctx = memory_context().await;

    let again = apply_migrations(&ctx, SCOPE, migrations()).await.unwrap();
    assert_eq!(again.applied, 0);
    assert_eq!(again.skipped, 2);
    assert!(again.applied_names.is_empty());
}

#[tokio::test]
async fn migrations_apply_in_name_order() {
    let ctx = bare_context().await;

    let result = apply_migrations(
        &ctx,
        "ordering",
        vec![Box::new(CreateTags), Box::new(CreateCustomers)],
    )
    .await
    .unwrap();
    assert_eq!(result.applied, 2);
    assert_eq!(
        result.applied_names,
        vec!["m0001_create_customers", "m0002_create_tags"]
    );
    assert!(table_exists(&ctx, "customers").await);
    assert!(table_exists(&ctx, "tags").await);
}

#[tokio::test]
async fn scopes_keep_separate_history() {
    let ctx = bare_context().await;

    let first = apply_migrations(&ctx, "scope_a", vec![Box::new(CreateTags)])
        .await
        .unwrap();
    assert_eq!(first.applied, 1);

    // `if_not_exists` makes the DDL harmless; the history is what differs.
    let second = apply_migrations(&ctx, "scope_b", vec![Box::new(CreateTags)])
        .await
        .unwrap();
    assert_eq!(second.applied, 1);
}

#[tokio::test]
async fn pending_lists_unapplied_migrations() {
    let ctx = bare_context().await;

    let pending = pending_migrations(&ctx, "pending", &migrations()).await.unwrap();
    assert_eq!(pending, vec!["m0001_create_customers", "m0002_create_tags"]);

    apply_migrations(&ctx, "pending", vec![Box::new(CreateCustomers)])
        .await
        .unwrap();
    let pending = pending_migrations(&ctx, "pending", &migrations()).await.unwrap();
    assert_eq!(pending, vec!["m0002_create_tags"]);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let ctx = bare_context().await;

    let err = apply_migrations(
        &ctx,
        "dupes",
        vec![Box::new(CreateTags), Box::new(CreateTags)],
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Migration(MigrationError::DuplicateName { .. })
    ));
}

#[tokio::test]
async fn failing_migration_is_reported_and_not_recorded() {
    let ctx = bare_context().await;

    let err = apply_migrations(
        &ctx,
        "broken",
        vec![Box::new(CreateTags), Box::new(Broken)],
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Migration(MigrationError::Failed { ref migration, .. }) if migration == "m0003_broken"
    ));

    let all: Vec<Box<dyn MigrationTrait>> = vec![Box::new(CreateTags), Box::new(Broken)];
    let pending = pending_migrations(&ctx, "broken", &all).await.unwrap();
    assert_eq!(pending, vec!["m0003_broken"]);
}
