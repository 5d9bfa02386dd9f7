//! Repository contract and its generic SeaORM implementation.
//!
//! Every operation returns [`RepoResult`]: the outer `Result` carries
//! infrastructure failures ([`RepositoryError`]), the inner [`Outcome`] carries the
//! domain result (found, created, not found, bad request, ...). Mutating operations
//! stage their changes on the shared [`DbContext`] and issue exactly one
//! `save_changes`.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, EntityTrait,
    IntoActiveModel, ModelTrait, Order, QueryFilter, QueryOrder, QuerySelect, Select, Value,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{
    DbContext, DbSet, PrimaryKeyOf, cancellable, changed_columns, changed_keys, key_values,
};
use crate::entity::{EntityDescriptor, FieldError};
use crate::error::{RepositoryError, Result};
use crate::outcome::{CrudResult, Outcome};
use crate::patch::PatchSpec;

/// Result of every repository operation.
pub type RepoResult<T> = Result<Outcome<T>>;

/// Failure message of `upsert` on an entity registered without the identity capability.
pub const MISSING_IDENTITY_MESSAGE: &str = "Entity does not implement IEntityModel";

/// CRUD and query contract over one entity type.
///
/// Reads never track what they return. Filters are SeaORM [`Condition`]s; a
/// `limit` of `0` means "no limit" except for [`Repository::take_by`].
#[async_trait]
pub trait Repository<E: EntityTrait>: Send + Sync {
    /// `Found(model)` or `NotFound`.
    async fn get_by_id(
        &self,
        id: PrimaryKeyOf<E>,
        cancel: &CancellationToken,
    ) -> RepoResult<E::Model>;

    /// Every row; an empty table is still `Found`.
    async fn get_all(&self, cancel: &CancellationToken) -> RepoResult<Vec<E::Model>>;

    async fn get_by(
        &self,
        filter: Condition,
        limit: u64,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E::Model>>;

    /// Like [`Repository::get_by`], ordered by `order_by` before the limit applies.
    async fn get_by_ordered(
        &self,
        filter: Condition,
        order_by: E::Column,
        order: Order,
        limit: u64,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E::Model>>;

    /// At most `limit` matching rows; `0` returns nothing.
    async fn take_by(
        &self,
        filter: Condition,
        limit: u64,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E::Model>>;

    /// First matching row, `NotFound` when nothing matches.
    async fn first_or_default(
        &self,
        filter: Condition,
        cancel: &CancellationToken,
    ) -> RepoResult<E::Model>;

    /// Insert one row. The returned model includes store-generated values.
    async fn add(
        &self,
        model: E::Model,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>>;

    /// Insert several rows in one save.
    async fn add_range(
        &self,
        models: Vec<E::Model>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<Vec<E::Model>>>;

    /// Overwrite every non-key column of an existing row. Returns the model as given.
    async fn update(
        &self,
        model: E::Model,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>>;

    /// Hard delete. `NotFound` carries an empty [`CrudResult`].
    async fn delete(
        &self,
        id: PrimaryKeyOf<E>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>>;

    /// Soft delete: set the boolean field `active_field` to `false`.
    async fn soft_delete(
        &self,
        id: PrimaryKeyOf<E>,
        active_field: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>>;

    /// Apply `patch` to the stored row and persist the columns it changed.
    async fn patch(
        &self,
        id: PrimaryKeyOf<E>,
        patch: &dyn PatchSpec<E::Model>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>>;

    /// Copy the named fields of `model` onto the stored row with the same key.
    async fn update_fields(
        &self,
        model: E::Model,
        fields: &[&str],
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>>;

    /// Insert when the identifier is nil, update otherwise.
    async fn upsert(
        &self,
        model: E::Model,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>>;

    /// Batch [`Repository::upsert`] in one save; `Updated` if any element was updated.
    async fn upsert_range(
        &self,
        models: Vec<E::Model>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<Vec<E::Model>>>;
}

/// [`Repository`] implementation for any SeaORM entity.
pub struct GenericRepository<E: EntityTrait> {
    ctx: Arc<DbContext>,
    descriptor: EntityDescriptor<E>,
}

impl<E: EntityTrait> Clone for GenericRepository<E> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            descriptor: self.descriptor.clone(),
        }
    }
}

impl<E: EntityTrait> std::fmt::Debug for GenericRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericRepository")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(RepositoryError::Cancelled)
    } else {
        Ok(())
    }
}

impl<E> GenericRepository<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
{
    #[must_use]
    pub fn new(ctx: Arc<DbContext>, descriptor: EntityDescriptor<E>) -> Self {
        Self { ctx, descriptor }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<DbContext> {
        &self.ctx
    }

    #[must_use]
    pub fn descriptor(&self) -> &EntityDescriptor<E> {
        &self.descriptor
    }

    fn set(&self) -> DbSet<'_, E> {
        self.ctx.set::<E>()
    }

    fn table(&self) -> String {
        E::default().table_name().to_owned()
    }

    async fn list(
        &self,
        select: Select<E>,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E::Model>> {
        let rows = cancellable(cancel, self.set().fetch_all(select)).await?;
        debug!(entity = %self.table(), count = rows.len(), "query");
        Ok(Outcome::found(rows))
    }

    async fn lookup(
        &self,
        id: PrimaryKeyOf<E>,
        cancel: &CancellationToken,
    ) -> Result<Option<E::Model>> {
        cancellable(cancel, self.set().find(id)).await
    }

    /// Save whatever the current operation staged; staged changes never outlive a
    /// failed or cancelled save.
    async fn save(&self, cancel: &CancellationToken) -> Result<u64> {
        let res = cancellable(cancel, self.ctx.save_changes()).await;
        if res.is_err() {
            self.ctx.discard_changes();
        }
        res
    }
}

#[async_trait]
impl<E> Repository<E> for GenericRepository<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
{
    async fn get_by_id(
        &self,
        id: PrimaryKeyOf<E>,
        cancel: &CancellationToken,
    ) -> RepoResult<E::Model> {
        debug!(entity = %self.table(), ?id, "get_by_id");
        Ok(self.lookup(id, cancel).await?.into())
    }

    async fn get_all(&self, cancel: &CancellationToken) -> RepoResult<Vec<E::Model>> {
        self.list(E::find(), cancel).await
    }

    async fn get_by(
        &self,
        filter: Condition,
        limit: u64,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E::Model>> {
        let mut select = E::find().filter(filter);
        if limit > 0 {
            select = select.limit(limit);
        }
        self.list(select, cancel).await
    }

    async fn get_by_ordered(
        &self,
        filter: Condition,
        order_by: E::Column,
        order: Order,
        limit: u64,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E::Model>> {
        let mut select = E::find().filter(filter).order_by(order_by, order);
        if limit > 0 {
            select = select.limit(limit);
        }
        self.list(select, cancel).await
    }

    async fn take_by(
        &self,
        filter: Condition,
        limit: u64,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E::Model>> {
        self.list(E::find().filter(filter).limit(limit), cancel)
            .await
    }

    async fn first_or_default(
        &self,
        filter: Condition,
        cancel: &CancellationToken,
    ) -> RepoResult<E::Model> {
        let select = E::find().filter(filter);
        Ok(cancellable(cancel, self.set().fetch_one(select))
            .await?
            .into())
    }

    async fn add(
        &self,
        model: E::Model,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>> {
        ensure_live(cancel)?;
        let tracked = self.set().add(&model)?;
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, "add");
        Ok(Outcome::created(CrudResult::new(
            count,
            tracked.entity().unwrap_or(model),
        )))
    }

    async fn add_range(
        &self,
        models: Vec<E::Model>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<Vec<E::Model>>> {
        ensure_live(cancel)?;
        let tracked = self.set().add_range(&models)?;
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, "add_range");
        let saved = tracked
            .iter()
            .zip(models)
            .map(|(t, m)| t.entity().unwrap_or(m))
            .collect();
        Ok(Outcome::created(CrudResult::new(count, saved)))
    }

    async fn update(
        &self,
        model: E::Model,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>> {
        ensure_live(cancel)?;
        self.set().update(&model)?;
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, "update");
        Ok(Outcome::updated(CrudResult::new(count, model)))
    }

    async fn delete(
        &self,
        id: PrimaryKeyOf<E>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>> {
        let Some(model) = self.lookup(id, cancel).await? else {
            return Ok(Outcome::not_found_with(CrudResult::empty()));
        };
        self.set().remove(model.clone())?;
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, "delete");
        Ok(Outcome::deleted(CrudResult::new(count, model)))
    }

    async fn soft_delete(
        &self,
        id: PrimaryKeyOf<E>,
        active_field: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>> {
        let Some(model) = self.lookup(id, cancel).await? else {
            return Ok(Outcome::not_found_with(CrudResult::empty()));
        };
        let column = match self.descriptor.fields().resolve_writable(active_field) {
            Ok(column) => column,
            Err(e) => return Ok(Outcome::bad_request(e.to_string())),
        };
        if !matches!(model.get(column), Value::Bool(_)) {
            return Ok(Outcome::bad_request(
                FieldError::NotBoolean(active_field.to_owned()).to_string(),
            ));
        }

        let tracked = self
            .set()
            .update_columns(model.clone(), vec![(column, Value::Bool(Some(false)))])?;
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, field = active_field, "soft_delete");
        Ok(Outcome::deleted(CrudResult::new(
            count,
            tracked.entity().unwrap_or(model),
        )))
    }

    async fn patch(
        &self,
        id: PrimaryKeyOf<E>,
        patch: &dyn PatchSpec<E::Model>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>> {
        let Some(current) = self.lookup(id, cancel).await? else {
            return Ok(Outcome::not_found_with(CrudResult::empty()));
        };
        let mut next = current.clone();
        if let Err(e) = patch.apply_to(&mut next) {
            return Ok(Outcome::bad_request(e.to_string()));
        }
        if let Some(key) = changed_keys::<E>(&current, &next).into_iter().next() {
            return Ok(Outcome::bad_request(FieldError::ReadOnly(key).to_string()));
        }

        let changes = changed_columns::<E>(&current, &next);
        let tracked = self.set().update_columns(current, changes)?;
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, "patch");
        Ok(Outcome::updated(CrudResult::new(
            count,
            tracked.entity().unwrap_or(next),
        )))
    }

    async fn update_fields(
        &self,
        model: E::Model,
        fields: &[&str],
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>> {
        let by_key = key_values::<E>(&model)
            .into_iter()
            .fold(Condition::all(), |cond, (column, value)| {
                cond.add(column.eq(value))
            });
        let Some(stored) = cancellable(cancel, self.set().fetch_one(E::find().filter(by_key)))
            .await?
        else {
            return Ok(Outcome::not_found_with(CrudResult::empty()));
        };

        let mut columns = Vec::with_capacity(fields.len());
        for field in fields {
            match self.descriptor.fields().resolve_writable(field) {
                Ok(column) => columns.push(column),
                Err(e) => return Ok(Outcome::bad_request(e.to_string())),
            }
        }

        let changes = columns
            .into_iter()
            .map(|column| (column, model.get(column)))
            .collect();
        let tracked = self.set().update_columns(stored.clone(), changes)?;
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, ?fields, "update_fields");
        Ok(Outcome::updated(CrudResult::new(
            count,
            tracked.entity().unwrap_or(stored),
        )))
    }

    async fn upsert(
        &self,
        model: E::Model,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<E::Model>> {
        let Some(is_new) = self.descriptor.identity(&model).map(|m| m.is_new()) else {
            return Ok(Outcome::failure(MISSING_IDENTITY_MESSAGE));
        };
        ensure_live(cancel)?;

        let set = self.set();
        let tracked = if is_new {
            set.add(&model)?
        } else {
            set.update(&model)?
        };
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, inserted = is_new, "upsert");

        let result = CrudResult::new(count, tracked.entity().unwrap_or(model));
        Ok(if is_new {
            Outcome::created(result)
        } else {
            Outcome::updated(result)
        })
    }

    async fn upsert_range(
        &self,
        models: Vec<E::Model>,
        cancel: &CancellationToken,
    ) -> RepoResult<CrudResult<Vec<E::Model>>> {
        if !self.descriptor.has_identity() {
            return Ok(Outcome::failure(MISSING_IDENTITY_MESSAGE));
        }
        ensure_live(cancel)?;

        let set = self.set();
        let mut any_updated = false;
        let mut tracked = Vec::with_capacity(models.len());
        for model in &models {
            let is_new = self
                .descriptor
                .identity(model)
                .is_some_and(|m| m.is_new());
            any_updated |= !is_new;
            tracked.push(if is_new { set.add(model)? } else { set.update(model)? });
        }
        let count = self.save(cancel).await?;
        debug!(entity = %self.table(), count, any_updated, "upsert_range");

        let saved = tracked
            .iter()
            .zip(models)
            .map(|(t, m)| t.entity().unwrap_or(m))
            .collect();
        let result = CrudResult::new(count, saved);
        Ok(if any_updated {
            Outcome::updated(result)
        } else {
            Outcome::created(result)
        })
    }
}
