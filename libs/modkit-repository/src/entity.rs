//! Entity-level capabilities used by the generic repository.
//!
//! - [`EntityModel`]: the optional identity contract (id, creation metadata,
//!   soft-delete flag). Only entities that opt into it can be upserted.
//! - [`FieldTable`]: name → column accessor table used wherever a caller addresses
//!   a field by name (soft delete, `update_fields`).
//! - [`EntityDescriptor`]: the per-entity registration bundle combining both.

use chrono::{DateTime, Utc};
use sea_orm::{EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn};
use thiserror::Error;
use uuid::Uuid;

/// Identity contract an entity model may implement.
///
/// # Example
///
/// ```ignore
/// impl EntityModel for customer::Model {
///     fn id(&self) -> Uuid { self.id }
///     fn created_on(&self) -> DateTime<Utc> { self.created_on }
///     fn created_by(&self) -> &str { &self.created_by }
///     fn active(&self) -> bool { self.active }
/// }
/// ```
pub trait EntityModel {
    /// Globally unique identifier. Nil means "not persisted yet".
    fn id(&self) -> Uuid;

    fn created_on(&self) -> DateTime<Utc>;

    /// Principal that created the record.
    fn created_by(&self) -> &str;

    /// Soft-delete flag; `false` means logically deleted.
    fn active(&self) -> bool;

    /// Upsert routing rule: a nil identifier is inserted, anything else updated.
    fn is_new(&self) -> bool {
        self.id().is_nil()
    }
}

/// Accessor exposing a model through its identity contract.
pub type IdentityAccessor<M> = fn(&M) -> &dyn EntityModel;

fn as_entity_model<M: EntityModel>(model: &M) -> &dyn EntityModel {
    model
}

/// Reasons a field name cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("unknown field '{0}'")]
    Unknown(String),

    #[error("field '{0}' is not writable")]
    ReadOnly(String),

    #[error("field '{0}' is not a boolean field")]
    NotBoolean(String),
}

struct FieldEntry<C> {
    key: String,
    column: C,
    writable: bool,
}

/// Field accessor table for one entity type.
///
/// Built from the entity's `Column` enum: every column is addressable by its
/// column name, compared case-insensitively and ignoring underscores, so
/// `"CreatedOn"`, `"created_on"` and `"createdon"` all resolve to the same column.
/// Primary-key columns are addressable but not writable.
pub struct FieldTable<E: EntityTrait> {
    entries: Vec<FieldEntry<E::Column>>,
}

impl<E: EntityTrait> Clone for FieldTable<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|e| FieldEntry {
                    key: e.key.clone(),
                    column: e.column,
                    writable: e.writable,
                })
                .collect(),
        }
    }
}

impl<E: EntityTrait> std::fmt::Debug for FieldTable<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.key))
            .finish()
    }
}

impl<E: EntityTrait> Default for FieldTable<E> {
    fn default() -> Self {
        Self::from_columns()
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Primary-key columns of `E`, in declaration order.
pub(crate) fn primary_key_columns<E: EntityTrait>() -> Vec<E::Column> {
    E::PrimaryKey::iter().map(PrimaryKeyToColumn::into_column).collect()
}

pub(crate) fn is_primary_key<E: EntityTrait>(column: E::Column) -> bool {
    primary_key_columns::<E>()
        .iter()
        .any(|pk| pk.as_str() == column.as_str())
}

impl<E: EntityTrait> FieldTable<E> {
    /// Table containing every column of the entity.
    #[must_use]
    pub fn from_columns() -> Self {
        let entries = E::Column::iter()
            .map(|column| FieldEntry {
                key: normalize(column.as_str()),
                column,
                writable: !is_primary_key::<E>(column),
            })
            .collect();
        Self { entries }
    }

    /// Register an additional name for a column.
    ///
    /// An alias that normalizes to a name already in the table takes it over.
    #[must_use]
    pub fn alias(mut self, name: &str, column: E::Column) -> Self {
        let key = normalize(name);
        let writable = !is_primary_key::<E>(column);
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                entry.column = column;
                entry.writable = writable;
            }
            None => self.entries.push(FieldEntry {
                key,
                column,
                writable,
            }),
        }
        self
    }

    /// Mark a column as read-only for name-addressed writes.
    #[must_use]
    pub fn read_only(mut self, column: E::Column) -> Self {
        for entry in &mut self.entries {
            if entry.column.as_str() == column.as_str() {
                entry.writable = false;
            }
        }
        self
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<E::Column> {
        let key = normalize(name);
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.column)
    }

    /// Resolve a name that is about to be written.
    ///
    /// # Errors
    /// [`FieldError::Unknown`] when no column matches, [`FieldError::ReadOnly`]
    /// when the column is a primary key or was marked read-only.
    pub fn resolve_writable(&self, name: &str) -> Result<E::Column, FieldError> {
        let key = normalize(name);
        let entry = self
            .entries
            .iter()
            .find(|e| e.key == key)
            .ok_or_else(|| FieldError::Unknown(name.to_owned()))?;
        if entry.writable {
            Ok(entry.column)
        } else {
            Err(FieldError::ReadOnly(name.to_owned()))
        }
    }
}

/// Registration bundle for one entity type.
pub struct EntityDescriptor<E: EntityTrait> {
    identity: Option<IdentityAccessor<E::Model>>,
    fields: FieldTable<E>,
}

impl<E: EntityTrait> Clone for EntityDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity,
            fields: self.fields.clone(),
        }
    }
}

impl<E: EntityTrait> std::fmt::Debug for EntityDescriptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("table", &E::default().table_name())
            .field("identity", &self.identity.is_some())
            .field("fields", &self.fields)
            .finish()
    }
}

impl<E: EntityTrait> Default for EntityDescriptor<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EntityTrait> EntityDescriptor<E> {
    /// Descriptor without the identity capability and with the default field table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identity: None,
            fields: FieldTable::from_columns(),
        }
    }

    /// Declare that the entity's model implements [`EntityModel`].
    #[must_use]
    pub fn with_identity(mut self) -> Self
    where
        E::Model: EntityModel,
    {
        self.identity = Some(as_entity_model::<E::Model>);
        self
    }

    #[must_use]
    pub fn with_fields(mut self, fields: FieldTable<E>) -> Self {
        self.fields = fields;
        self
    }

    #[must_use]
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// View `model` through its identity contract, if the capability was declared.
    #[must_use]
    pub fn identity<'m>(&self, model: &'m E::Model) -> Option<&'m dyn EntityModel> {
        self.identity.map(|accessor| accessor(model))
    }

    #[must_use]
    pub fn fields(&self) -> &FieldTable<E> {
        &self.fields
    }
}
