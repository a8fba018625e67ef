use std::sync::{Mutex, MutexGuard};

use log::debug;
use sqlx::{Pool, Sqlite};

use crate::{
    core::transaction::{Transaction, TransactionManager},
    BatchError,
};

use super::{block_on, map_transaction_error};

type SqliteTransaction = sqlx::Transaction<'static, Sqlite>;

/// A [`TransactionManager`] over a SQLite pool.
///
/// At most one transaction is open at a time. Writers built on the same
/// manager run their statements on it through
/// [`with_transaction`](Self::with_transaction), so the step's commit or
/// rollback covers everything the writer did for the chunk.
pub struct SqliteTransactionManager {
    pool: Pool<Sqlite>,
    current: Mutex<Option<SqliteTransaction>>,
}

impl SqliteTransactionManager {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            current: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Runs `work` on the open transaction.
    ///
    /// # Errors
    /// [`BatchError::Transaction`] when no transaction is open.
    pub fn with_transaction<T>(
        &self,
        work: impl FnOnce(&mut SqliteTransaction) -> Result<T, BatchError>,
    ) -> Result<T, BatchError> {
        let mut current = self.lock()?;
        match current.as_mut() {
            Some(transaction) => work(transaction),
            None => Err(BatchError::Transaction(
                "no open transaction on the SQLite transaction manager".to_string(),
            )),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<SqliteTransaction>>, BatchError> {
        self.current
            .lock()
            .map_err(|_| BatchError::Transaction("transaction lock poisoned".to_string()))
    }

    fn take(&self) -> Result<SqliteTransaction, BatchError> {
        self.lock()?
            .take()
            .ok_or_else(|| BatchError::Transaction("transaction already ended".to_string()))
    }
}

impl TransactionManager for SqliteTransactionManager {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BatchError> {
        let mut current = self.lock()?;
        if current.is_some() {
            return Err(BatchError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }

        let transaction = block_on(self.pool.begin()).map_err(map_transaction_error)?;
        *current = Some(transaction);
        debug!("SQLite transaction started");

        Ok(Box::new(OpenTransaction { manager: self }))
    }
}

/// Handle on the manager's open transaction.
struct OpenTransaction<'m> {
    manager: &'m SqliteTransactionManager,
}

impl Transaction for OpenTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), BatchError> {
        let transaction = self.manager.take()?;
        block_on(transaction.commit()).map_err(map_transaction_error)?;
        debug!("SQLite transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), BatchError> {
        let transaction = self.manager.take()?;
        block_on(transaction.rollback()).map_err(map_transaction_error)?;
        debug!("SQLite transaction rolled back");
        Ok(())
    }
}

impl Drop for OpenTransaction<'_> {
    fn drop(&mut self) {
        // a transaction neither committed nor rolled back is rolled back by sqlx on drop
        if let Ok(mut current) = self.manager.current.lock() {
            if current.take().is_some() {
                debug!("SQLite transaction dropped without commit");
            }
        }
    }
}
