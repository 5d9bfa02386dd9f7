use std::marker::PhantomData;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, IdenStatic, IntoActiveModel,
    Iterable, ModelTrait, PrimaryKeyToColumn, PrimaryKeyTrait, Select, Value,
};

use super::{ChangeKind, DbContext, Tracked};
use crate::entity::is_primary_key;
use crate::error::Result;

/// Primary-key value type of entity `E`.
pub type PrimaryKeyOf<E> = <<E as EntityTrait>::PrimaryKey as PrimaryKeyTrait>::ValueType;

/// Typed view over the rows of one entity, bound to a [`DbContext`].
///
/// Queries run immediately and never register results with the change tracker.
/// `add`, `add_range`, `update`, `update_columns` and `remove` only stage
/// changes; nothing reaches the store before [`DbContext::save_changes`].
pub struct DbSet<'a, E: EntityTrait> {
    ctx: &'a DbContext,
    _entity: PhantomData<E>,
}

fn table_of<E: EntityTrait>() -> String {
    E::default().table_name().to_owned()
}

/// Active model with every column `Set` from `model`.
fn fully_set<E>(model: &E::Model, with_key: bool) -> E::ActiveModel
where
    E: EntityTrait,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior,
{
    let mut am = <E::ActiveModel as ActiveModelBehavior>::new();
    for column in E::Column::iter() {
        if with_key || !is_primary_key::<E>(column) {
            am.set(column, model.get(column));
        }
    }
    am
}

impl<'a, E: EntityTrait> DbSet<'a, E> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }
}

impl<E> DbSet<'_, E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
{
    /// Unfiltered select over the entity, to be refined by the caller.
    #[must_use]
    pub fn query(&self) -> Select<E> {
        E::find()
    }

    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed) or a store error.
    pub async fn fetch_all(&self, select: Select<E>) -> Result<Vec<E::Model>> {
        self.ctx.ensure_open()?;
        let slot = self.ctx.tx_slot().lock().await;
        let rows = match slot.as_ref() {
            Some(txn) => select.all(txn).await?,
            None => select.all(self.ctx.base()).await?,
        };
        Ok(rows)
    }

    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed) or a store error.
    pub async fn fetch_one(&self, select: Select<E>) -> Result<Option<E::Model>> {
        self.ctx.ensure_open()?;
        let slot = self.ctx.tx_slot().lock().await;
        let row = match slot.as_ref() {
            Some(txn) => select.one(txn).await?,
            None => select.one(self.ctx.base()).await?,
        };
        Ok(row)
    }

    /// Look a row up by primary key.
    ///
    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed) or a store error.
    pub async fn find(&self, id: PrimaryKeyOf<E>) -> Result<Option<E::Model>> {
        self.fetch_one(E::find_by_id(id)).await
    }

    /// Stage an insert. Auto-increment keys are left to the store.
    ///
    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed).
    pub fn add(&self, model: &E::Model) -> Result<Tracked<E::Model>> {
        self.ctx.ensure_open()?;
        let auto_key = <E::PrimaryKey as PrimaryKeyTrait>::auto_increment();
        let am = fully_set::<E>(model, !auto_key);
        let tracked = Tracked::pending();
        let out = tracked.clone();
        self.ctx
            .tracker()
            .stage(ChangeKind::Added, table_of::<E>(), move |txn| {
                Box::pin(async move {
                    let saved = am.insert(txn).await?;
                    out.fill(saved);
                    Ok(1)
                })
            });
        Ok(tracked)
    }

    /// Stage one insert per model, in order.
    ///
    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed).
    pub fn add_range<'m, I>(&self, models: I) -> Result<Vec<Tracked<E::Model>>>
    where
        I: IntoIterator<Item = &'m E::Model>,
        E::Model: 'm,
    {
        models.into_iter().map(|model| self.add(model)).collect()
    }

    /// Stage a full update of every non-key column. The row must exist at save time.
    ///
    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed).
    pub fn update(&self, model: &E::Model) -> Result<Tracked<E::Model>> {
        self.ctx.ensure_open()?;
        let mut am = model.clone().into_active_model();
        for column in E::Column::iter() {
            if !is_primary_key::<E>(column) {
                am.set(column, model.get(column));
            }
        }
        Ok(self.stage_update(am))
    }

    /// Stage an update of the given columns only.
    ///
    /// Columns whose new value equals the value in `original`, and key columns, are
    /// skipped. When nothing is left no change is staged and the returned handle
    /// already holds `original`.
    ///
    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed).
    pub fn update_columns(
        &self,
        original: E::Model,
        changes: Vec<(E::Column, Value)>,
    ) -> Result<Tracked<E::Model>> {
        self.ctx.ensure_open()?;
        let changes: Vec<_> = changes
            .into_iter()
            .filter(|(column, value)| {
                !is_primary_key::<E>(*column) && original.get(*column) != *value
            })
            .collect();
        if changes.is_empty() {
            return Ok(Tracked::resolved(original));
        }
        let mut am = original.into_active_model();
        for (column, value) in changes {
            am.set(column, value);
        }
        Ok(self.stage_update(am))
    }

    fn stage_update(&self, am: E::ActiveModel) -> Tracked<E::Model> {
        let tracked = Tracked::pending();
        let out = tracked.clone();
        self.ctx
            .tracker()
            .stage(ChangeKind::Modified, table_of::<E>(), move |txn| {
                Box::pin(async move {
                    let saved = am.update(txn).await?;
                    out.fill(saved);
                    Ok(1)
                })
            });
        tracked
    }

    /// Stage deletion of the row identified by `model`'s primary key.
    ///
    /// # Errors
    /// [`RepositoryError::Disposed`](crate::RepositoryError::Disposed).
    pub fn remove(&self, model: E::Model) -> Result<()> {
        self.ctx.ensure_open()?;
        let am = model.into_active_model();
        self.ctx
            .tracker()
            .stage(ChangeKind::Removed, table_of::<E>(), move |txn| {
                Box::pin(async move {
                    let res = am.delete(txn).await?;
                    Ok(res.rows_affected)
                })
            });
        Ok(())
    }
}

/// Key columns of `model` paired with their values.
pub fn key_values<E: EntityTrait>(model: &E::Model) -> Vec<(E::Column, Value)> {
    E::PrimaryKey::iter()
        .map(PrimaryKeyToColumn::into_column)
        .map(|column| (column, model.get(column)))
        .collect()
}

/// Non-key columns whose values differ between `before` and `after`.
pub fn changed_columns<E: EntityTrait>(
    before: &E::Model,
    after: &E::Model,
) -> Vec<(E::Column, Value)> {
    E::Column::iter()
        .filter(|column| {
            !is_primary_key::<E>(*column) && before.get(*column) != after.get(*column)
        })
        .map(|column| (column, after.get(column)))
        .collect()
}

/// Key columns whose values differ between `before` and `after`.
pub fn changed_keys<E: EntityTrait>(before: &E::Model, after: &E::Model) -> Vec<String> {
    E::PrimaryKey::iter()
        .map(PrimaryKeyToColumn::into_column)
        .filter(|column| before.get(*column) != after.get(*column))
        .map(|column| column.as_str().to_owned())
        .collect()
}
