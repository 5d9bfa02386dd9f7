//! Unit of work: one persistence context, the repositories bound to it, and the
//! transaction that spans them.
//!
//! ```ignore
//! let mut uow = UnitOfWork::connect(&config).await?;
//! uow.register::<customer::Entity>(EntityDescriptor::new().with_identity());
//! uow.register::<order::Entity>(EntityDescriptor::new());
//!
//! uow.begin_transaction().await?;
//! let customers = uow.repository::<GenericRepository<customer::Entity>>().unwrap();
//! customers.add(new_customer, &cancel).await?;
//! uow.commit_transaction().await?;
//! uow.dispose().await?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, IntoActiveModel};
use tracing::debug;

use crate::config::PersistenceConfig;
use crate::context::DbContext;
use crate::entity::EntityDescriptor;
use crate::error::Result;
use crate::repository::GenericRepository;

/// Coordinates repositories sharing one [`DbContext`] and its transaction.
///
/// Not meant for concurrent logical operations; registration needs `&mut self`.
pub struct UnitOfWork {
    ctx: Arc<DbContext>,
    repositories: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("ctx", &self.ctx)
            .field("repositories", &self.repositories.len())
            .finish()
    }
}

impl UnitOfWork {
    #[must_use]
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self {
            ctx,
            repositories: HashMap::new(),
        }
    }

    /// Connect a fresh context described by `config`.
    ///
    /// # Errors
    /// Returns [`RepositoryError::Db`](crate::RepositoryError::Db) when the store is unreachable.
    pub async fn connect(config: &PersistenceConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(DbContext::connect(config).await?)))
    }

    /// The context every registered repository must share.
    #[must_use]
    pub fn context(&self) -> Arc<DbContext> {
        Arc::clone(&self.ctx)
    }

    /// The registered repository of type `R`, if any.
    #[must_use]
    pub fn repository<R: Any + Send + Sync>(&self) -> Option<&R> {
        self.repositories
            .get(&TypeId::of::<R>())
            .and_then(|r| r.downcast_ref::<R>())
    }

    /// Register `repository` unless one of the same type is already present.
    /// Returns whether it was inserted.
    pub fn add_repository<R: Any + Send + Sync>(&mut self, repository: R) -> bool {
        let key = TypeId::of::<R>();
        if self.repositories.contains_key(&key) {
            debug!(
                repository = std::any::type_name::<R>(),
                "repository already registered, keeping the first"
            );
            return false;
        }
        self.repositories.insert(key, Box::new(repository));
        true
    }

    /// Build a [`GenericRepository`] for `E` bound to this unit's context and register it.
    pub fn register<E>(&mut self, descriptor: EntityDescriptor<E>) -> bool
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
    {
        let repository = GenericRepository::new(self.context(), descriptor);
        self.add_repository(repository)
    }

    /// # Errors
    /// [`RepositoryError::TransactionAlreadyActive`](crate::RepositoryError::TransactionAlreadyActive)
    /// when a transaction is open, or a store error.
    pub async fn begin_transaction(&self) -> Result<()> {
        self.ctx.begin_transaction().await
    }

    /// Commit the open transaction. On failure it is rolled back and the commit
    /// error returned; either way no transaction is open afterwards.
    ///
    /// # Errors
    /// [`RepositoryError::NoActiveTransaction`](crate::RepositoryError::NoActiveTransaction)
    /// or the commit failure.
    pub async fn commit_transaction(&self) -> Result<()> {
        self.ctx.commit_transaction().await
    }

    /// # Errors
    /// [`RepositoryError::NoActiveTransaction`](crate::RepositoryError::NoActiveTransaction)
    /// or a store error.
    pub async fn rollback_transaction(&self) -> Result<()> {
        self.ctx.rollback_transaction().await
    }

    pub async fn is_in_transaction(&self) -> bool {
        self.ctx.is_in_transaction().await
    }

    /// Release the context. Safe to call more than once.
    ///
    /// # Errors
    /// A store error while closing the pool.
    pub async fn dispose(&self) -> Result<()> {
        self.ctx.dispose().await
    }
}
