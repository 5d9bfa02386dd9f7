//! Persistence context: one database connection, at most one open transaction,
//! and the set of changes staged since the last save.
//!
//! Reads and writes are routed through the open transaction when there is one,
//! otherwise through the connection pool. Staged changes are applied by
//! [`DbContext::save_changes`] inside their own transaction, or inside a savepoint
//! of the open transaction, so a failing save never leaves partial writes behind.

mod set;
mod tracker;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use sea_orm::{
    ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DatabaseTransaction,
    EntityTrait, TransactionTrait,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{RepositoryError, Result};

pub use set::{DbSet, PrimaryKeyOf};
pub(crate) use set::{changed_columns, changed_keys, key_values};
pub use tracker::Tracked;
pub(crate) use tracker::{ChangeKind, ChangeTracker};

/// Race `fut` against `cancel`.
///
/// The token is checked before the future is polled; a token that fires while the
/// future is in flight drops it (rolling back any transaction it owned).
///
/// # Errors
/// Returns [`RepositoryError::Cancelled`] when the token fired, or the future's own error.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(RepositoryError::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RepositoryError::Cancelled),
        res = fut => res,
    }
}

/// Connection, transaction slot and change tracker shared by every repository
/// created for one unit of work.
pub struct DbContext {
    conn: DatabaseConnection,
    tx: Mutex<Option<DatabaseTransaction>>,
    tracker: ChangeTracker,
    disposed: AtomicBool,
}

impl std::fmt::Debug for DbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContext")
            .field("backend", &self.conn.get_database_backend())
            .field("pending", &self.tracker.len())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl DbContext {
    /// Wrap an already established connection.
    #[must_use]
    pub fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            tx: Mutex::new(None),
            tracker: ChangeTracker::default(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Open a connection pool described by `config`.
    ///
    /// # Errors
    /// Returns [`RepositoryError::Db`] if the store cannot be reached.
    pub async fn connect(config: &PersistenceConfig) -> Result<Self> {
        let conn = Database::connect(config.connect_options()).await?;
        info!(
            backend = ?conn.get_database_backend(),
            max_conns = config.pool.max_conns,
            "persistence context connected"
        );
        Ok(Self::new(conn))
    }

    /// Typed access to the rows of entity `E`.
    #[must_use]
    pub fn set<E: EntityTrait>(&self) -> DbSet<'_, E> {
        DbSet::new(self)
    }

    #[must_use]
    pub fn db_engine(&self) -> DatabaseBackend {
        self.conn.get_database_backend()
    }

    /// The underlying connection pool.
    ///
    /// # Errors
    /// Returns [`RepositoryError::Disposed`] after [`DbContext::dispose`].
    pub fn connection(&self) -> Result<&DatabaseConnection> {
        self.ensure_open()?;
        Ok(&self.conn)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_disposed() {
            Err(RepositoryError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub(crate) fn base(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub(crate) fn tx_slot(&self) -> &Mutex<Option<DatabaseTransaction>> {
        &self.tx
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.tracker.len() > 0
    }

    /// Drop every staged change without touching the store.
    pub fn discard_changes(&self) {
        self.tracker.clear();
    }

    /// Apply all staged changes atomically and return the number of rows affected.
    ///
    /// The staged set is cleared whether or not the save succeeds.
    ///
    /// # Errors
    /// Returns [`RepositoryError::Db`] for the first failing change; nothing from
    /// this save is persisted in that case.
    pub async fn save_changes(&self) -> Result<u64> {
        self.ensure_open()?;
        let pending = self.tracker.take();
        if pending.is_empty() {
            return Ok(0);
        }

        let slot = self.tx.lock().await;
        let txn = match slot.as_ref() {
            Some(outer) => outer.begin().await?,
            None => self.conn.begin().await?,
        };

        let mut affected = 0u64;
        for change in pending {
            debug!(
                op = change.kind.as_str(),
                table = %change.table,
                "applying staged change"
            );
            let applied = (change.apply)(&txn).await;
            match applied {
                Ok(rows) => affected += rows,
                Err(e) => {
                    if let Err(rb) = txn.rollback().await {
                        warn!(error = %rb, "rollback of failed save did not complete");
                    }
                    return Err(e.into());
                }
            }
        }
        txn.commit().await?;

        debug!(count = affected, "changes saved");
        Ok(affected)
    }

    pub(crate) async fn begin_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        let mut slot = self.tx.lock().await;
        if slot.is_some() {
            return Err(RepositoryError::TransactionAlreadyActive);
        }
        *slot = Some(self.conn.begin().await?);
        info!("transaction started");
        Ok(())
    }

    pub(crate) async fn commit_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        let txn = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(RepositoryError::NoActiveTransaction)?;
        match txn.commit().await {
            Ok(()) => {
                info!("transaction committed");
                Ok(())
            }
            Err(e) => {
                // A transaction whose commit failed is rolled back when dropped.
                warn!(error = %e, "commit failed, transaction rolled back");
                Err(e.into())
            }
        }
    }

    pub(crate) async fn rollback_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        let txn = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(RepositoryError::NoActiveTransaction)?;
        txn.rollback().await?;
        info!("transaction rolled back");
        Ok(())
    }

    pub(crate) async fn is_in_transaction(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    /// Release the context: roll back an open transaction, drop staged changes and
    /// close the pool. Only the first call has any effect.
    ///
    /// # Errors
    /// Returns [`RepositoryError::Db`] if closing the pool fails.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tracker.clear();
        if let Some(txn) = self.tx.lock().await.take()
            && let Err(e) = txn.rollback().await
        {
            warn!(error = %e, "rollback during dispose failed");
        }
        self.conn.clone().close().await?;
        info!("persistence context disposed");
        Ok(())
    }
}
