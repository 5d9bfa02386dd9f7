#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Tests for loading the persistence configuration.

use std::io::Write;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use modkit_repository::{PersistenceConfig, PoolConfig, RepositoryError, UnitOfWork};
use tempfile::NamedTempFile;

fn yaml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn yaml_overrides_defaults() {
    let file = yaml_file(
        r"
dsn: sqlite://app.db?mode=rwc
pool:
  max_conns: 4
  idle_timeout: 90s
  max_lifetime: 1h
sqlx_logging: true
",
    );
    let figment = Figment::new()
        .merge(Serialized::defaults(PersistenceConfig::default()))
        .merge(Yaml::file(file.path()));

    let cfg = PersistenceConfig::from_figment(&figment).unwrap();
    assert_eq!(cfg.dsn, "sqlite://app.db?mode=rwc");
    assert_eq!(cfg.pool.max_conns, 4);
    assert_eq!(cfg.pool.idle_timeout, Some(Duration::from_secs(90)));
    assert_eq!(cfg.pool.max_lifetime, Some(Duration::from_secs(3600)));
    // Untouched keys keep their defaults.
    assert_eq!(cfg.pool.acquire_timeout, Some(Duration::from_secs(30)));
    assert!(cfg.sqlx_logging);
}

#[test]
fn environment_overrides_yaml() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "persistence.yaml",
            r#"
dsn: "sqlite::memory:"
pool:
  max_conns: 8
"#,
        )?;
        jail.set_env("MODKIT_REPOSITORY__POOL__MAX_CONNS", "2");
        jail.set_env("MODKIT_REPOSITORY__POOL__ACQUIRE_TIMEOUT", "5s");

        let cfg = PersistenceConfig::load(Some(std::path::Path::new("persistence.yaml")))
            .map_err(|e| e.to_string())?;
        assert_eq!(cfg.pool.max_conns, 2);
        assert_eq!(cfg.pool.acquire_timeout, Some(Duration::from_secs(5)));
        assert_eq!(cfg.dsn, "sqlite::memory:");
        Ok(())
    });
}

#[test]
fn unknown_keys_are_rejected() {
    let file = yaml_file("pool:\n  max_connections: 4\n");
    let figment = Figment::new()
        .merge(Serialized::defaults(PersistenceConfig::default()))
        .merge(Yaml::file(file.path()));

    let err = PersistenceConfig::from_figment(&figment).unwrap_err();
    assert!(matches!(err, RepositoryError::Config(_)));
}

#[test]
fn malformed_duration_is_rejected() {
    let file = yaml_file("pool:\n  idle_timeout: soon\n");
    let figment = Figment::new()
        .merge(Serialized::defaults(PersistenceConfig::default()))
        .merge(Yaml::file(file.path()));

    assert!(PersistenceConfig::from_figment(&figment).is_err());
}

#[tokio::test]
async fn unit_of_work_connects_from_config() {
    let cfg = PersistenceConfig {
        pool: PoolConfig {
            max_conns: 1,
            ..PoolConfig::default()
        },
        ..PersistenceConfig::default()
    };
    let uow = UnitOfWork::connect(&cfg).await.unwrap();
    assert_eq!(uow.context().db_engine(), sea_orm::DatabaseBackend::Sqlite);
    uow.begin_transaction().await.unwrap();
    uow.rollback_transaction().await.unwrap();
    uow.dispose().await.unwrap();
}
