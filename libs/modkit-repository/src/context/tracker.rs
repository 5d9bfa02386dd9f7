use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sea_orm::{DatabaseTransaction, DbErr};

/// Deferred store mutation; resolves to the number of rows it affected.
pub type ApplyFn = Box<
    dyn for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<u64, DbErr>> + Send,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Added => "insert",
            ChangeKind::Modified => "update",
            ChangeKind::Removed => "delete",
        }
    }
}

pub struct PendingChange {
    pub kind: ChangeKind,
    pub table: String,
    pub apply: ApplyFn,
}

/// Ordered set of staged changes awaiting `save_changes`.
#[derive(Default)]
pub struct ChangeTracker {
    pending: Mutex<Vec<PendingChange>>,
}

impl ChangeTracker {
    pub(crate) fn stage<F>(&self, kind: ChangeKind, table: String, apply: F)
    where
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<u64, DbErr>>
            + Send
            + 'static,
    {
        self.pending.lock().push(PendingChange {
            kind,
            table,
            apply: Box::new(apply),
        });
    }

    pub(crate) fn take(&self) -> Vec<PendingChange> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }
}

/// Handle to a staged entity.
///
/// Before `save_changes` it holds nothing (or, for a no-op update, the unchanged
/// model). After a successful save it holds the model as persisted, including
/// store-generated values.
#[derive(Debug)]
pub struct Tracked<M> {
    slot: Arc<Mutex<Option<M>>>,
}

impl<M> Clone for Tracked<M> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<M: Clone> Tracked<M> {
    pub(crate) fn pending() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn resolved(model: M) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(model))),
        }
    }

    pub(crate) fn fill(&self, model: M) {
        *self.slot.lock() = Some(model);
    }

    /// The persisted model, once available.
    #[must_use]
    pub fn entity(&self) -> Option<M> {
        self.slot.lock().clone()
    }

    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.slot.lock().is_some()
    }
}
