//! Transaction capability used to make every chunk write all-or-nothing.
//!
//! A step asks its [`TransactionManager`] for a transaction before handing a
//! chunk to the writer, commits it when the writer succeeds and rolls it back
//! otherwise. Writers bound to the same resource pick up the open transaction
//! from their manager; see `SqliteTransactionManager` for the database case.

use log::debug;

use crate::BatchError;

/// An open transaction. Consumed by `commit` or `rollback`.
pub trait Transaction {
    fn commit(self: Box<Self>) -> Result<(), BatchError>;

    fn rollback(self: Box<Self>) -> Result<(), BatchError>;
}

/// Hands out transactions for one transactional resource.
pub trait TransactionManager {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BatchError>;
}

/// A transaction manager for steps that touch no transactional resource,
/// such as tasklets or file writers.
#[derive(Default)]
pub struct ResourcelessTransactionManager;

struct ResourcelessTransaction;

impl Transaction for ResourcelessTransaction {
    fn commit(self: Box<Self>) -> Result<(), BatchError> {
        debug!("Resourceless commit");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), BatchError> {
        debug!("Resourceless rollback");
        Ok(())
    }
}

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BatchError> {
        Ok(Box::new(ResourcelessTransaction))
    }
}
