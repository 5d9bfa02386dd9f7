#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `ModKit` generic repository and unit of work.
//!
//! This crate provides a parametric data-access layer over `SeaORM`:
//! a [`Repository`] contract with a single [`GenericRepository`] implementation
//! usable for any entity, and a [`UnitOfWork`] that shares one [`DbContext`]
//! (connection, transaction, staged changes) between repositories.
//!
//! # Features
//! - `pg`, `mysql`, `sqlite`: enable the corresponding `SQLx` backend (`sqlite` by default)
//!
//! # Results
//! Repository operations return `Result<Outcome<T>, RepositoryError>`. Domain
//! conditions (not found, unknown field, invalid patch) are [`Outcome`] statuses;
//! store, transaction, cancellation and configuration failures are
//! [`RepositoryError`]s.
//!
//! # Example
//! ```ignore
//! use modkit_repository::{EntityDescriptor, GenericRepository, Repository, UnitOfWork};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut uow = UnitOfWork::connect(&PersistenceConfig::load(None)?).await?;
//! uow.register::<customer::Entity>(EntityDescriptor::new().with_identity());
//!
//! let cancel = CancellationToken::new();
//! let repo = uow
//!     .repository::<GenericRepository<customer::Entity>>()
//!     .ok_or_else(|| anyhow::anyhow!("not registered"))?;
//! let created = repo.upsert(customer, &cancel).await?;
//! assert!(created.is_success());
//! ```

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod migration_runner;
pub mod outcome;
pub mod patch;
pub mod repository;
pub mod unit_of_work;

pub use config::{PersistenceConfig, PoolConfig};
pub use context::{DbContext, DbSet, PrimaryKeyOf, Tracked, cancellable};
pub use entity::{EntityDescriptor, EntityModel, FieldError, FieldTable};
pub use error::{RepositoryError, Result};
pub use migration_runner::{MigrationError, MigrationResult, apply_migrations};
pub use outcome::{CrudResult, Outcome, OutcomeStatus};
pub use patch::{JsonPatch, MergePatch, PatchError, PatchOperation, PatchSpec};
pub use repository::{GenericRepository, MISSING_IDENTITY_MESSAGE, RepoResult, Repository};
pub use unit_of_work::UnitOfWork;
