use std::future::Future;

use sqlx::{error::ErrorKind, query_builder::Separated, Database};

use crate::BatchError;

#[cfg(feature = "rdbc-sqlite")]
/// Transactions on a SQLite pool, shared by the step and its writer.
pub mod sqlite_transaction;

#[cfg(feature = "rdbc-sqlite")]
pub mod sqlite_writer;

/// Trait for binding item data to database query parameters.
///
/// The binder pushes one value per configured column, in column order.
///
/// # Examples
///
/// ```no_run
/// use chunked_batch::item::rdbc::DatabaseItemBinder;
/// use sqlx::{query_builder::Separated, Sqlite};
///
/// struct User {
///     id: i32,
///     name: String,
/// }
///
/// struct UserBinder;
/// impl DatabaseItemBinder<User, Sqlite> for UserBinder {
///     fn bind(&self, item: &User, mut query_builder: Separated<Sqlite, &str>) {
///         query_builder.push_bind(item.id);
///         query_builder.push_bind(item.name.clone());
///     }
/// }
/// ```
pub trait DatabaseItemBinder<O, DB: Database> {
    /// Binds the properties of an item to a separated query builder.
    ///
    /// # Arguments
    ///
    /// * `item` - The item whose properties should be bound.
    /// * `query_builder` - The separated query builder to bind parameters to.
    fn bind(&self, item: &O, query_builder: Separated<DB, &str>);
}

/// Runs a database future to completion from synchronous batch code.
///
/// Requires a multi-threaded tokio runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

/// Whether the connection itself failed, as opposed to the statement.
fn is_connection_failure(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Classifies an error raised while writing a chunk.
///
/// Constraint violations reject the chunk, connection failures may be
/// retried, anything else fails the write.
pub(crate) fn map_write_error(error: sqlx::Error) -> BatchError {
    if let sqlx::Error::Database(database_error) = &error {
        if matches!(
            database_error.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ) {
            return BatchError::WriteRejected(database_error.message().to_string());
        }
    }

    if is_connection_failure(&error) {
        BatchError::ConnectionLost(error.to_string())
    } else {
        BatchError::ItemWriter(error.to_string())
    }
}

/// Classifies an error raised while beginning, committing or rolling back.
pub(crate) fn map_transaction_error(error: sqlx::Error) -> BatchError {
    if is_connection_failure(&error) {
        BatchError::ConnectionLost(error.to_string())
    } else {
        BatchError::Transaction(error.to_string())
    }
}
